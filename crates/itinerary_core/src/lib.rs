//! Core domain logic for trip itineraries.
//! This crate is the single source of truth for day and schedule-item
//! ordering invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod position;
pub mod repo;
pub mod service;

pub use config::{ConfigError, CoreConfig, DbConfig, LoggingConfig, PositionConfig};
pub use db::{open_db, open_db_in_memory, open_db_with_config, DbError};
pub use logging::{
    default_log_level, init_logging, init_logging_from_config, logging_status, LoggingError,
};
pub use model::itinerary::{
    DayId, ItemId, ItineraryValidationError, NewScheduleItem, NewTrip, ScheduleItem,
    ScheduleItemPatch, Trip, TripDay, TripId, TripPatch,
};
pub use position::{
    Collection, ConcurrencyGuard, GroupOrder, GroupResize, InsertAt, PositionError,
    PositionManager, PositionResult, ReorderOutcome,
};
pub use repo::schedule_item_repo::{ScheduleItemRepository, SqliteScheduleItemRepository};
pub use repo::trip_repo::{SqliteTripRepository, TripRepository};
pub use repo::{RepoError, RepoResult};
pub use service::day_service::{DayRankChange, DayRankObserver, DayService, LoggingDayRankObserver};
pub use service::schedule_service::{DayItems, ScheduleService};
pub use service::trip_service::TripService;
pub use service::{ServiceError, ServiceResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
