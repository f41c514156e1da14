//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts for trips, days and
//!   schedule items.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Repositories never write ordinal columns except through the row-insert
//!   helpers the position manager calls with an already reserved ordinal.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::itinerary::{ItineraryValidationError, DATE_FORMAT};
use crate::position::PositionError;
use chrono::{NaiveDate, NaiveTime};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub mod schedule_item_repo;
pub mod trip_repo;

pub type RepoResult<T> = Result<T, RepoError>;

/// Errors from itinerary repositories.
#[derive(Debug)]
pub enum RepoError {
    Validation(ItineraryValidationError),
    Db(DbError),
    /// Target record does not exist.
    NotFound { kind: &'static str, id: Uuid },
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "itinerary repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "itinerary repository requires table `{table}`")
            }
            Self::InvalidData(message) => write!(f, "invalid itinerary data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::NotFound { .. } => None,
            Self::UninitializedConnection { .. } => None,
            Self::MissingRequiredTable(_) => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<ItineraryValidationError> for RepoError {
    fn from(value: ItineraryValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<RepoError> for PositionError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Db(err) => PositionError::from(err),
            other => PositionError::InvalidData(other.to_string()),
        }
    }
}

/// Checks schema version and presence of `tables`.
pub(crate) fn ensure_connection_ready(
    conn: &Connection,
    tables: &[&'static str],
) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in tables {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(RepoError::MissingRequiredTable(table));
        }
    }
    Ok(())
}

pub(crate) fn parse_uuid(value: &str, column: &'static str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

pub(crate) fn parse_date(value: &str, column: &'static str) -> RepoResult<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|_| RepoError::InvalidData(format!("invalid date `{value}` in {column}")))
}

pub(crate) fn parse_time(value: &str, column: &'static str) -> RepoResult<NaiveTime> {
    NaiveTime::parse_from_str(value, VISIT_TIME_FORMAT)
        .map_err(|_| RepoError::InvalidData(format!("invalid time `{value}` in {column}")))
}

/// Storage format of `schedule_items.visit_time`.
pub(crate) const VISIT_TIME_FORMAT: &str = "%H:%M:%S";
