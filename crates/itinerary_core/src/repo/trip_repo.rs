//! Trip and day repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist trips together with their generated day rows.
//! - Read days with their calendar date derived from trip start and `day_no`.
//!
//! # Invariants
//! - A new trip gets exactly one day per date in its inclusive span, numbered
//!   `1..=N`.
//! - Day listing is deterministic: `day_no ASC, day_uuid ASC`.
//! - The `*_row` helpers open no transaction of their own; services call
//!   them on the position manager's transaction so that adding, dropping or
//!   cascading days happens under the trip's group locks.

use super::{ensure_connection_ready, parse_date, parse_uuid, RepoError, RepoResult};
use crate::model::itinerary::{
    day_date, normalize_memo, DayId, NewTrip, Trip, TripDay, TripId, DATE_FORMAT,
};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use uuid::Uuid;

const TRIP_SELECT_SQL: &str = "SELECT
    t.trip_uuid AS trip_uuid,
    t.title AS title,
    t.start_date AS start_date,
    t.created_at AS created_at,
    t.updated_at AS updated_at,
    (SELECT COUNT(*) FROM trip_days d WHERE d.trip_uuid = t.trip_uuid) AS day_count
FROM trips t";

const DAY_SELECT_SQL: &str = "SELECT
    d.day_uuid AS day_uuid,
    d.trip_uuid AS trip_uuid,
    d.day_no AS day_no,
    d.memo AS memo,
    d.created_at AS created_at,
    d.updated_at AS updated_at,
    t.start_date AS start_date
FROM trip_days d
JOIN trips t ON t.trip_uuid = d.trip_uuid";

/// Repository interface for trips and their days.
pub trait TripRepository {
    /// Creates a trip and one day per date of its span.
    fn create_trip(&self, trip: &NewTrip) -> RepoResult<Trip>;
    fn get_trip(&self, trip_uuid: TripId) -> RepoResult<Option<Trip>>;
    /// Lists trips ordered by start date.
    fn list_trips(&self) -> RepoResult<Vec<Trip>>;
    /// Rewrites the trip header; day rows are not touched.
    fn update_trip(
        &self,
        trip_uuid: TripId,
        title: &str,
        start_date: NaiveDate,
    ) -> RepoResult<()>;
    /// Deletes a trip; days and items cascade.
    fn delete_trip(&self, trip_uuid: TripId) -> RepoResult<()>;
    fn list_days(&self, trip_uuid: TripId) -> RepoResult<Vec<TripDay>>;
    fn get_day(&self, day_uuid: DayId) -> RepoResult<Option<TripDay>>;
    /// Replaces a day memo; blank clears it.
    fn update_day_memo(&self, day_uuid: DayId, memo: Option<&str>) -> RepoResult<TripDay>;
}

/// SQLite-backed trip repository.
pub struct SqliteTripRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTripRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["trips", "trip_days"])?;
        Ok(Self { conn })
    }
}

impl TripRepository for SqliteTripRepository<'_> {
    fn create_trip(&self, trip: &NewTrip) -> RepoResult<Trip> {
        let title = trip.validate()?;
        let trip_uuid = Uuid::new_v4();

        // A brand-new trip is invisible until commit, so its days are numbered
        // directly instead of through the position manager.
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO trips (trip_uuid, title, start_date) VALUES (?1, ?2, ?3);",
            params![
                trip_uuid.to_string(),
                title,
                trip.start_date.format(DATE_FORMAT).to_string(),
            ],
        )?;
        for day_no in 1..=trip.day_count() {
            insert_day_row(&tx, Uuid::new_v4(), trip_uuid, day_no, None)?;
        }
        tx.commit()?;

        self.get_trip(trip_uuid)?.ok_or(RepoError::NotFound {
            kind: "trip",
            id: trip_uuid,
        })
    }

    fn get_trip(&self, trip_uuid: TripId) -> RepoResult<Option<Trip>> {
        self.conn
            .query_row(
                &format!("{TRIP_SELECT_SQL} WHERE t.trip_uuid = ?1;"),
                [trip_uuid.to_string()],
                |row| Ok(parse_trip_row(row)),
            )
            .optional()?
            .transpose()
    }

    fn list_trips(&self) -> RepoResult<Vec<Trip>> {
        let mut stmt = self.conn.prepare(&format!(
            "{TRIP_SELECT_SQL} ORDER BY t.start_date ASC, t.trip_uuid ASC;"
        ))?;
        let mut rows = stmt.query([])?;
        let mut trips = Vec::new();
        while let Some(row) = rows.next()? {
            trips.push(parse_trip_row(row)?);
        }
        Ok(trips)
    }

    fn update_trip(
        &self,
        trip_uuid: TripId,
        title: &str,
        start_date: NaiveDate,
    ) -> RepoResult<()> {
        update_trip_row(self.conn, trip_uuid, title, start_date)
    }

    fn delete_trip(&self, trip_uuid: TripId) -> RepoResult<()> {
        delete_trip_row(self.conn, trip_uuid)
    }

    fn list_days(&self, trip_uuid: TripId) -> RepoResult<Vec<TripDay>> {
        let mut stmt = self.conn.prepare(&format!(
            "{DAY_SELECT_SQL}
             WHERE d.trip_uuid = ?1
             ORDER BY d.day_no ASC, d.day_uuid ASC;"
        ))?;
        let mut rows = stmt.query([trip_uuid.to_string()])?;
        let mut days = Vec::new();
        while let Some(row) = rows.next()? {
            days.push(parse_day_row(row)?);
        }
        Ok(days)
    }

    fn get_day(&self, day_uuid: DayId) -> RepoResult<Option<TripDay>> {
        self.conn
            .query_row(
                &format!("{DAY_SELECT_SQL} WHERE d.day_uuid = ?1;"),
                [day_uuid.to_string()],
                |row| Ok(parse_day_row(row)),
            )
            .optional()?
            .transpose()
    }

    fn update_day_memo(&self, day_uuid: DayId, memo: Option<&str>) -> RepoResult<TripDay> {
        let memo = normalize_memo(memo)?;
        let changed = self.conn.execute(
            "UPDATE trip_days
             SET memo = ?2,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE day_uuid = ?1;",
            params![day_uuid.to_string(), memo],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                kind: "day",
                id: day_uuid,
            });
        }
        self.get_day(day_uuid)?.ok_or(RepoError::NotFound {
            kind: "day",
            id: day_uuid,
        })
    }
}

/// Rewrites title and start date of one trip.
pub fn update_trip_row(
    conn: &Connection,
    trip_uuid: TripId,
    title: &str,
    start_date: NaiveDate,
) -> RepoResult<()> {
    let changed = conn.execute(
        "UPDATE trips
         SET title = ?2,
             start_date = ?3,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE trip_uuid = ?1;",
        params![
            trip_uuid.to_string(),
            title,
            start_date.format(DATE_FORMAT).to_string(),
        ],
    )?;
    if changed == 0 {
        return Err(RepoError::NotFound {
            kind: "trip",
            id: trip_uuid,
        });
    }
    Ok(())
}

/// Deletes one trip row; days and items cascade.
pub fn delete_trip_row(conn: &Connection, trip_uuid: TripId) -> RepoResult<()> {
    let changed = conn.execute(
        "DELETE FROM trips WHERE trip_uuid = ?1;",
        [trip_uuid.to_string()],
    )?;
    if changed == 0 {
        return Err(RepoError::NotFound {
            kind: "trip",
            id: trip_uuid,
        });
    }
    Ok(())
}

/// Inserts one day row at an ordinal reserved by the caller.
pub fn insert_day_row(
    conn: &Connection,
    day_uuid: DayId,
    trip_uuid: TripId,
    day_no: i64,
    memo: Option<&str>,
) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO trip_days (day_uuid, trip_uuid, day_no, memo) VALUES (?1, ?2, ?3, ?4);",
        params![day_uuid.to_string(), trip_uuid.to_string(), day_no, memo],
    )?;
    Ok(())
}

fn parse_trip_row(row: &Row<'_>) -> RepoResult<Trip> {
    let trip_uuid: String = row.get("trip_uuid")?;
    let start_date: String = row.get("start_date")?;
    Ok(Trip {
        trip_uuid: parse_uuid(&trip_uuid, "trips.trip_uuid")?,
        title: row.get("title")?,
        start_date: parse_date(&start_date, "trips.start_date")?,
        day_count: row.get("day_count")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_day_row(row: &Row<'_>) -> RepoResult<TripDay> {
    let day_uuid: String = row.get("day_uuid")?;
    let trip_uuid: String = row.get("trip_uuid")?;
    let start_date: String = row.get("start_date")?;
    let day_no: i64 = row.get("day_no")?;
    Ok(TripDay {
        day_uuid: parse_uuid(&day_uuid, "trip_days.day_uuid")?,
        trip_uuid: parse_uuid(&trip_uuid, "trip_days.trip_uuid")?,
        day_no,
        memo: row.get("memo")?,
        date: day_date(parse_date(&start_date, "trips.start_date")?, day_no),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
