//! Day use-case service.
//!
//! # Responsibility
//! - Add, delete, relocate and reorder days of one trip through the position
//!   manager.
//! - Report committed day-rank changes to a [`DayRankObserver`].
//!
//! # Invariants
//! - A day's calendar date is always `start_date + (day_no - 1)`; it is
//!   derived on read and moves with the day's rank.
//! - Observers run after commit and cannot affect the committed order.

use super::{ServiceError, ServiceResult};
use crate::model::itinerary::{normalize_memo, DayId, TripDay, TripId};
use crate::position::{Collection, InsertAt, PositionError, PositionManager, ReorderOutcome};
use crate::repo::trip_repo::{insert_day_row, TripRepository};
use log::info;
use std::sync::Arc;
use uuid::Uuid;

/// A day whose rank changed inside its trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRankChange {
    pub trip_uuid: TripId,
    pub day_uuid: DayId,
    pub old_day_no: i64,
    pub new_day_no: i64,
    /// `new_day_no - old_day_no`; also the shift of the day's calendar date.
    pub offset_days: i64,
}

/// Receives day-rank changes after a relocation or reorder commits.
pub trait DayRankObserver: Send + Sync {
    fn day_rank_changed(&self, change: &DayRankChange);
}

/// Default observer: records the change and leaves item times untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDayRankObserver;

impl DayRankObserver for LoggingDayRankObserver {
    fn day_rank_changed(&self, change: &DayRankChange) {
        info!(
            "event=day_rank_changed module=service status=ok trip={} day={} old_day_no={} new_day_no={} offset_days={}",
            change.trip_uuid,
            change.day_uuid,
            change.old_day_no,
            change.new_day_no,
            change.offset_days
        );
    }
}

/// Day service facade.
pub struct DayService<'conn, R: TripRepository> {
    repo: R,
    positions: PositionManager<'conn>,
    observer: Arc<dyn DayRankObserver>,
}

impl<'conn, R: TripRepository> DayService<'conn, R> {
    pub fn new(repo: R, positions: PositionManager<'conn>) -> Self {
        Self {
            repo,
            positions,
            observer: Arc::new(LoggingDayRankObserver),
        }
    }

    /// Replaces the day-rank observer.
    pub fn with_observer(mut self, observer: Arc<dyn DayRankObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Days of `trip_uuid` in `day_no` order.
    pub fn list_days(&self, trip_uuid: TripId) -> ServiceResult<Vec<TripDay>> {
        self.ensure_trip(trip_uuid)?;
        self.repo.list_days(trip_uuid).map_err(Into::into)
    }

    /// Loads one day of `trip_uuid`; days of other trips are not found.
    pub fn get_day(&self, trip_uuid: TripId, day_uuid: DayId) -> ServiceResult<TripDay> {
        match self.repo.get_day(day_uuid)? {
            Some(day) if day.trip_uuid == trip_uuid => Ok(day),
            _ => Err(ServiceError::DayNotFound(day_uuid)),
        }
    }

    /// Adds a day at `at`; later days shift one date forward.
    pub fn add_day(
        &self,
        trip_uuid: TripId,
        at: InsertAt,
        memo: Option<&str>,
    ) -> ServiceResult<TripDay> {
        let memo = normalize_memo(memo)?;
        let day_uuid = Uuid::new_v4();
        self.positions
            .insert_entity(Collection::Days, trip_uuid, trip_uuid, at, |conn, day_no| {
                insert_day_row(conn, day_uuid, trip_uuid, day_no, memo.as_deref())
                    .map_err(PositionError::from)
            })
            .map_err(|err| ServiceError::from_position(Collection::Days, err))?;
        self.get_day(trip_uuid, day_uuid)
    }

    /// Deletes a day with its items and closes the gap.
    ///
    /// Returns the remaining days.
    pub fn delete_day(&self, trip_uuid: TripId, day_uuid: DayId) -> ServiceResult<Vec<TripDay>> {
        self.positions
            .delete_entity(Collection::Days, trip_uuid, day_uuid)
            .map_err(|err| ServiceError::from_position(Collection::Days, err))?;
        self.repo.list_days(trip_uuid).map_err(Into::into)
    }

    /// Moves a day to `new_day_no`, clamped to the trip's day range.
    pub fn relocate_day(
        &self,
        trip_uuid: TripId,
        day_uuid: DayId,
        new_day_no: i64,
    ) -> ServiceResult<Vec<TripDay>> {
        let outcome = self
            .positions
            .relocate_entity(Collection::Days, trip_uuid, day_uuid, new_day_no)
            .map_err(|err| ServiceError::from_position(Collection::Days, err))?;
        self.notify(trip_uuid, &outcome);
        self.repo.list_days(trip_uuid).map_err(Into::into)
    }

    /// Replaces the order of every day of the trip.
    pub fn reorder_days(
        &self,
        trip_uuid: TripId,
        ordered: &[DayId],
    ) -> ServiceResult<Vec<TripDay>> {
        let outcome = self
            .positions
            .reorder_group(Collection::Days, trip_uuid, trip_uuid, ordered)
            .map_err(|err| ServiceError::from_position(Collection::Days, err))?;
        self.notify(trip_uuid, &outcome);
        self.repo.list_days(trip_uuid).map_err(Into::into)
    }

    /// Replaces the memo of one day; blank clears it.
    pub fn update_day_memo(
        &self,
        trip_uuid: TripId,
        day_uuid: DayId,
        memo: Option<&str>,
    ) -> ServiceResult<TripDay> {
        self.get_day(trip_uuid, day_uuid)?;
        self.repo
            .update_day_memo(day_uuid, memo)
            .map_err(Into::into)
    }

    fn ensure_trip(&self, trip_uuid: TripId) -> ServiceResult<()> {
        self.repo
            .get_trip(trip_uuid)?
            .map(|_| ())
            .ok_or(ServiceError::TripNotFound(trip_uuid))
    }

    fn notify(&self, trip_uuid: TripId, outcome: &ReorderOutcome) {
        for change in &outcome.changes {
            if change.from.group != change.to.group {
                continue;
            }
            self.observer.day_rank_changed(&DayRankChange {
                trip_uuid,
                day_uuid: change.entity,
                old_day_no: change.from.ordinal,
                new_day_no: change.to.ordinal,
                offset_days: change.rank_delta(),
            });
        }
    }
}
