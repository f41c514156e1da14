//! Schedule item use-case service.
//!
//! # Responsibility
//! - Add, edit, delete, relocate and reorder items of a trip's days.
//! - Move items between days of the same trip in one batch.
//!
//! # Invariants
//! - Ordinal changes never touch an item's `visit_time`.
//! - Batch results list every day whose ordering was touched.

use super::{ServiceError, ServiceResult};
use crate::model::itinerary::{
    DayId, ItemId, NewScheduleItem, ScheduleItem, ScheduleItemPatch, TripId,
};
use crate::position::{Collection, GroupOrder, InsertAt, PositionError, PositionManager};
use crate::repo::schedule_item_repo::{insert_item_row, ScheduleItemRepository};
use crate::repo::trip_repo::TripRepository;
use uuid::Uuid;

/// Refreshed items of one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayItems {
    pub day_uuid: DayId,
    pub items: Vec<ScheduleItem>,
}

/// Schedule item service facade.
pub struct ScheduleService<'conn, T: TripRepository, S: ScheduleItemRepository> {
    trips: T,
    items: S,
    positions: PositionManager<'conn>,
}

impl<'conn, T: TripRepository, S: ScheduleItemRepository> ScheduleService<'conn, T, S> {
    pub fn new(trips: T, items: S, positions: PositionManager<'conn>) -> Self {
        Self {
            trips,
            items,
            positions,
        }
    }

    /// Items of one day in `seq_no` order.
    pub fn list_items(&self, trip_uuid: TripId, day_uuid: DayId) -> ServiceResult<Vec<ScheduleItem>> {
        self.ensure_day(trip_uuid, day_uuid)?;
        self.items.list_items(day_uuid).map_err(Into::into)
    }

    /// Loads one item; items of other trips are not found.
    pub fn get_item(&self, trip_uuid: TripId, item_uuid: ItemId) -> ServiceResult<ScheduleItem> {
        let item = self
            .items
            .get_item(item_uuid)?
            .ok_or(ServiceError::ItemNotFound(item_uuid))?;
        match self.trips.get_day(item.day_uuid)? {
            Some(day) if day.trip_uuid == trip_uuid => Ok(item),
            _ => Err(ServiceError::ItemNotFound(item_uuid)),
        }
    }

    /// Adds an item to `day_uuid` at `at`.
    pub fn add_item(
        &self,
        trip_uuid: TripId,
        day_uuid: DayId,
        item: &NewScheduleItem,
        at: InsertAt,
    ) -> ServiceResult<ScheduleItem> {
        let payload = item.validate()?;
        let item_uuid = Uuid::new_v4();
        self.positions
            .insert_entity(Collection::Items, trip_uuid, day_uuid, at, |conn, seq_no| {
                insert_item_row(conn, item_uuid, day_uuid, seq_no, &payload)
                    .map_err(PositionError::from)
            })
            .map_err(|err| ServiceError::from_position(Collection::Items, err))?;
        self.get_item(trip_uuid, item_uuid)
    }

    /// Updates visit time and memo; ordering is unaffected.
    pub fn update_item(
        &self,
        trip_uuid: TripId,
        item_uuid: ItemId,
        patch: &ScheduleItemPatch,
    ) -> ServiceResult<ScheduleItem> {
        self.get_item(trip_uuid, item_uuid)?;
        self.items
            .update_item(item_uuid, patch)
            .map_err(Into::into)
    }

    /// Deletes an item and closes the gap in its day.
    ///
    /// Returns the remaining items of that day.
    pub fn delete_item(
        &self,
        trip_uuid: TripId,
        item_uuid: ItemId,
    ) -> ServiceResult<Vec<ScheduleItem>> {
        let removed = self
            .positions
            .delete_entity(Collection::Items, trip_uuid, item_uuid)
            .map_err(|err| ServiceError::from_position(Collection::Items, err))?;
        self.items.list_items(removed.group).map_err(Into::into)
    }

    /// Moves an item to `new_seq_no` within its day, clamped to the day's range.
    pub fn relocate_item(
        &self,
        trip_uuid: TripId,
        item_uuid: ItemId,
        new_seq_no: i64,
    ) -> ServiceResult<Vec<ScheduleItem>> {
        let outcome = self
            .positions
            .relocate_entity(Collection::Items, trip_uuid, item_uuid, new_seq_no)
            .map_err(|err| ServiceError::from_position(Collection::Items, err))?;
        match outcome.groups.first() {
            Some(group) => self.items.list_items(group.group).map_err(Into::into),
            None => Ok(Vec::new()),
        }
    }

    /// Replaces the order of every item of one day.
    pub fn reorder_items(
        &self,
        trip_uuid: TripId,
        day_uuid: DayId,
        ordered: &[ItemId],
    ) -> ServiceResult<Vec<ScheduleItem>> {
        self.positions
            .reorder_group(Collection::Items, trip_uuid, day_uuid, ordered)
            .map_err(|err| ServiceError::from_position(Collection::Items, err))?;
        self.items.list_items(day_uuid).map_err(Into::into)
    }

    /// Applies the desired order of several days at once; items may move
    /// between days of the trip.
    pub fn batch_reorder_items(
        &self,
        trip_uuid: TripId,
        orders: Vec<GroupOrder>,
    ) -> ServiceResult<Vec<DayItems>> {
        let outcome = self
            .positions
            .batch_reorder(Collection::Items, trip_uuid, orders)
            .map_err(|err| ServiceError::from_position(Collection::Items, err))?;
        outcome
            .groups
            .iter()
            .map(|group| -> ServiceResult<DayItems> {
                Ok(DayItems {
                    day_uuid: group.group,
                    items: self.items.list_items(group.group)?,
                })
            })
            .collect()
    }

    fn ensure_day(&self, trip_uuid: TripId, day_uuid: DayId) -> ServiceResult<()> {
        match self.trips.get_day(day_uuid)? {
            Some(day) if day.trip_uuid == trip_uuid => Ok(()),
            _ => Err(ServiceError::DayNotFound(day_uuid)),
        }
    }
}
