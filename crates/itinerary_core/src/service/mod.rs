//! Itinerary use-case services.
//!
//! # Responsibility
//! - Orchestrate repository reads and position-manager mutations into
//!   trip/day/item use cases.
//! - Map low-level errors onto itinerary-level not-found kinds.
//!
//! # Invariants
//! - Every day or item operation is scoped by the trip id the caller passes;
//!   records of other trips are reported as not found.

use crate::model::itinerary::{DayId, ItemId, ItineraryValidationError, TripId};
use crate::position::{Collection, PositionError};
use crate::repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod day_service;
pub mod schedule_service;
pub mod trip_service;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors from itinerary services.
#[derive(Debug)]
pub enum ServiceError {
    Validation(ItineraryValidationError),
    TripNotFound(TripId),
    DayNotFound(DayId),
    ItemNotFound(ItemId),
    /// Ordinal operation rejected or aborted.
    Position(PositionError),
    Repo(RepoError),
}

impl ServiceError {
    /// Lifts a position error using the collection it came from to name
    /// missing groups and entities.
    pub fn from_position(collection: Collection, err: PositionError) -> Self {
        match (collection, err) {
            (Collection::Days, PositionError::GroupNotFound(id)) => Self::TripNotFound(id),
            (Collection::Days, PositionError::EntityNotFound(id)) => Self::DayNotFound(id),
            (Collection::Items, PositionError::GroupNotFound(id)) => Self::DayNotFound(id),
            (Collection::Items, PositionError::EntityNotFound(id)) => Self::ItemNotFound(id),
            (_, other) => Self::Position(other),
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Position(err) if err.is_retryable())
    }
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::TripNotFound(id) => write!(f, "trip not found: {id}"),
            Self::DayNotFound(id) => write!(f, "day not found: {id}"),
            Self::ItemNotFound(id) => write!(f, "schedule item not found: {id}"),
            Self::Position(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Position(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ItineraryValidationError> for ServiceError {
    fn from(value: ItineraryValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<RepoError> for ServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Validation(err) => Self::Validation(err),
            RepoError::NotFound { kind: "trip", id } => Self::TripNotFound(id),
            RepoError::NotFound { kind: "day", id } => Self::DayNotFound(id),
            RepoError::NotFound {
                kind: "schedule item",
                id,
            } => Self::ItemNotFound(id),
            other => Self::Repo(other),
        }
    }
}
