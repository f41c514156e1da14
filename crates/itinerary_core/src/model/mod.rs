//! Itinerary domain model.
//!
//! # Responsibility
//! - Define read models for trips, days and schedule items.
//! - Validate payload fields before they reach persistence.
//!
//! # Invariants
//! - Every record is identified by a stable UUID.
//! - Day and item ordinals are 1-based and dense within their owning group;
//!   only `crate::position` mutates them.

pub mod itinerary;
