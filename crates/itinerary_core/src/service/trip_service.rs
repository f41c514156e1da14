//! Trip use-case service.
//!
//! # Invariants
//! - Changing a trip's date span appends or drops days at the tail, so the
//!   remaining days keep their ids, ranks and items.
//! - Span changes and trip deletion hold the trip's day lock plus the item
//!   lock of every day they remove.

use super::{ServiceError, ServiceResult};
use crate::model::itinerary::{NewTrip, Trip, TripId, TripPatch};
use crate::position::{Collection, GroupResize, PositionError, PositionManager};
use crate::repo::trip_repo::{delete_trip_row, insert_day_row, update_trip_row, TripRepository};
use log::info;
use uuid::Uuid;

/// Trip service facade.
pub struct TripService<'conn, R: TripRepository> {
    repo: R,
    positions: PositionManager<'conn>,
}

impl<'conn, R: TripRepository> TripService<'conn, R> {
    pub fn new(repo: R, positions: PositionManager<'conn>) -> Self {
        Self { repo, positions }
    }

    /// Creates a trip with one day per date of its span.
    pub fn create_trip(&self, trip: &NewTrip) -> ServiceResult<Trip> {
        let created = self.repo.create_trip(trip)?;
        info!(
            "event=trip_create module=service status=ok trip={} days={}",
            created.trip_uuid, created.day_count
        );
        Ok(created)
    }

    pub fn get_trip(&self, trip_uuid: TripId) -> ServiceResult<Trip> {
        self.repo
            .get_trip(trip_uuid)?
            .ok_or(ServiceError::TripNotFound(trip_uuid))
    }

    pub fn list_trips(&self) -> ServiceResult<Vec<Trip>> {
        self.repo.list_trips().map_err(Into::into)
    }

    /// Applies `patch` to a trip.
    ///
    /// A new start date moves every derived day date. A new end date grows
    /// the trip with empty days or drops tail days with their items.
    pub fn update_trip(&self, trip_uuid: TripId, patch: &TripPatch) -> ServiceResult<Trip> {
        let current = self.get_trip(trip_uuid)?;
        if patch.is_empty() {
            return Ok(current);
        }
        let revision = patch.revise(&current)?;

        let resize = match patch.end_date {
            None => {
                update_trip_row(
                    self.positions.connection(),
                    trip_uuid,
                    &revision.title,
                    revision.start_date,
                )?;
                GroupResize::default()
            }
            Some(_) => {
                let len = usize::try_from(revision.day_count).map_err(|_| {
                    ServiceError::Position(PositionError::InvalidData(format!(
                        "day count {} out of range",
                        revision.day_count
                    )))
                })?;
                self.positions
                    .resize_group(
                        Collection::Days,
                        trip_uuid,
                        trip_uuid,
                        len,
                        |conn| {
                            update_trip_row(conn, trip_uuid, &revision.title, revision.start_date)
                                .map_err(PositionError::from)
                        },
                        |conn, day_no| {
                            insert_day_row(conn, Uuid::new_v4(), trip_uuid, day_no, None)
                                .map_err(PositionError::from)
                        },
                    )
                    .map_err(|err| ServiceError::from_position(Collection::Days, err))?
            }
        };

        info!(
            "event=trip_update module=service status=ok trip={} days={} removed={} appended={}",
            trip_uuid,
            revision.day_count,
            resize.removed.len(),
            resize.appended.len()
        );
        self.get_trip(trip_uuid)
    }

    /// Deletes a trip with all its days and items.
    pub fn delete_trip(&self, trip_uuid: TripId) -> ServiceResult<()> {
        let days = self
            .positions
            .drop_group(Collection::Days, trip_uuid, trip_uuid, |conn| {
                delete_trip_row(conn, trip_uuid).map_err(PositionError::from)
            })
            .map_err(|err| ServiceError::from_position(Collection::Days, err))?;
        info!("event=trip_delete module=service status=ok trip={trip_uuid} days={days}");
        Ok(())
    }
}
