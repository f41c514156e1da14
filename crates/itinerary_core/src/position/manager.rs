//! Position manager facade.
//!
//! # Responsibility
//! - Expose the ordinal operations for both collections.
//! - Pre-plan lock sets, re-validate them under lock and retry on drift.
//! - Emit one `key=value` log event per operation.
//!
//! # Invariants
//! - Every mutation runs inside [`ConcurrencyGuard::run`].
//! - Density of every touched group is re-checked before commit when
//!   `verify_density` is enabled.

use super::{
    batch::{BatchPlan, PlanMode},
    collect_changes, compactor, ensure_entity_in_scope, ensure_group_in_scope, insertion,
    single_move, snapshot_groups, Collection, ConcurrencyGuard, EntityId, GroupId, GroupOrder,
    GroupResize, GroupSlots, InsertAt, Placement, PositionError, PositionResult, PositionStore,
    ReorderOutcome, ScopeId, Slot, SqlitePositionStore,
};
use crate::config::PositionConfig;
use log::{debug, error, info, warn};
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

/// Ordinal operations over one connection.
pub struct PositionManager<'conn> {
    conn: &'conn Connection,
    guard: ConcurrencyGuard,
    config: PositionConfig,
}

impl<'conn> PositionManager<'conn> {
    pub fn new(conn: &'conn Connection, guard: ConcurrencyGuard, config: PositionConfig) -> Self {
        Self {
            conn,
            guard,
            config,
        }
    }

    /// Manager with default config and a private lock table.
    pub fn with_defaults(conn: &'conn Connection) -> Self {
        let config = PositionConfig::default();
        Self::new(conn, ConcurrencyGuard::from_config(&config), config)
    }

    pub fn connection(&self) -> &'conn Connection {
        self.conn
    }

    pub fn guard(&self) -> &ConcurrencyGuard {
        &self.guard
    }

    pub fn config(&self) -> &PositionConfig {
        &self.config
    }

    /// Current members of `group` in ordinal order.
    pub fn read_group(&self, collection: Collection, group: GroupId) -> PositionResult<Vec<Slot>> {
        let store = SqlitePositionStore::new(self.conn, collection);
        if store.group_scope(group)?.is_none() {
            return Err(PositionError::GroupNotFound(group));
        }
        store.read_group(group)
    }

    /// Opens a slot in `group` and lets `write_row` create the entity there.
    ///
    /// `write_row` runs inside the transaction with the chosen ordinal; its
    /// error rolls back the shift as well.
    pub fn insert_entity<T, F>(
        &self,
        collection: Collection,
        scope: ScopeId,
        group: GroupId,
        at: InsertAt,
        write_row: F,
    ) -> PositionResult<T>
    where
        F: FnOnce(&Connection, i64) -> PositionResult<T>,
    {
        let started_at = Instant::now();
        let keys = ConcurrencyGuard::keys_for(collection, [group]);
        let result = self.guard.run(self.conn, &keys, |tx| {
            let store = SqlitePositionStore::new(tx, collection);
            store.lock_group(group)?;
            ensure_group_in_scope(&store, scope, group)?;
            let ordinal = insertion::make_room(&store, group, at)?;
            let value = write_row(tx, ordinal)?;
            self.verify(&store, [group])?;
            Ok((ordinal, value))
        });
        log_outcome(
            "position_insert",
            collection,
            started_at,
            &result,
            |(ordinal, _)| format!("group={group} ordinal={ordinal}"),
        );
        result.map(|(_, value)| value)
    }

    /// Deletes `entity` and closes the gap it leaves.
    ///
    /// Returns where the entity was before deletion.
    pub fn delete_entity(
        &self,
        collection: Collection,
        scope: ScopeId,
        entity: EntityId,
    ) -> PositionResult<Placement> {
        let started_at = Instant::now();
        let result = self.with_plan_retries(|| {
            let planned = self.plan_single(collection, scope, entity)?;
            let mut keys = ConcurrencyGuard::keys_for(collection, [planned.group]);
            keys.extend(collection.dependent_key(entity));

            self.guard.run(self.conn, &keys, |tx| {
                let store = SqlitePositionStore::new(tx, collection);
                let Some(current) = relocated_since(&store, &planned)? else {
                    return Ok(None);
                };
                store.lock_group(current.group)?;
                ensure_entity_in_scope(&store, scope, &current)?;
                store.remove_entity(entity)?;
                compactor::close_gap(&store, current.group, current.ordinal)?;
                self.verify(&store, [current.group])?;
                Ok(Some(current))
            })
        });
        log_outcome(
            "position_delete",
            collection,
            started_at,
            &result,
            |placement| format!("group={} ordinal={}", placement.group, placement.ordinal),
        );
        result
    }

    /// Moves `entity` to `requested` within its group, clamped to `1..=N`.
    pub fn relocate_entity(
        &self,
        collection: Collection,
        scope: ScopeId,
        entity: EntityId,
        requested: i64,
    ) -> PositionResult<ReorderOutcome> {
        let started_at = Instant::now();
        let result = self.with_plan_retries(|| {
            let planned = self.plan_single(collection, scope, entity)?;
            let keys = ConcurrencyGuard::keys_for(collection, [planned.group]);

            self.guard.run(self.conn, &keys, |tx| {
                let store = SqlitePositionStore::new(tx, collection);
                let Some(current) = relocated_since(&store, &planned)? else {
                    return Ok(None);
                };
                store.lock_group(current.group)?;
                ensure_entity_in_scope(&store, scope, &current)?;
                let before = snapshot_groups(&store, [current.group])?;
                single_move::relocate(&store, current, requested, self.config.sentinel_offset)?;
                self.verify(&store, [current.group])?;
                let after = snapshot_groups(&store, [current.group])?;
                Ok(Some(outcome_from(&before, after)))
            })
        });
        log_outcome(
            "position_relocate",
            collection,
            started_at,
            &result,
            |outcome| format!("entity={entity} requested={requested} changed={}", outcome.changes.len()),
        );
        result
    }

    /// Replaces the order of `group` with `ordered`, which must list every
    /// current member exactly once.
    pub fn reorder_group(
        &self,
        collection: Collection,
        scope: ScopeId,
        group: GroupId,
        ordered: &[EntityId],
    ) -> PositionResult<ReorderOutcome> {
        let orders = vec![GroupOrder::new(group, ordered.to_vec())];
        self.run_plan("position_reorder", collection, scope, orders, PlanMode::FullSet)
    }

    /// Applies the desired order of several groups in one transaction.
    ///
    /// Listed entities may come from any group in `scope`; their origin
    /// groups are compacted.
    pub fn batch_reorder(
        &self,
        collection: Collection,
        scope: ScopeId,
        orders: Vec<GroupOrder>,
    ) -> PositionResult<ReorderOutcome> {
        self.run_plan("position_batch_reorder", collection, scope, orders, PlanMode::Batch)
    }

    /// Rewrites `group` to `1..=N` keeping its relative order.
    ///
    /// Returns the number of rewritten members.
    pub fn normalize_group(&self, collection: Collection, group: GroupId) -> PositionResult<usize> {
        let started_at = Instant::now();
        let keys = ConcurrencyGuard::keys_for(collection, [group]);
        let result = self.guard.run(self.conn, &keys, |tx| {
            let store = SqlitePositionStore::new(tx, collection);
            store.lock_group(group)?;
            let rewritten = compactor::renumber(&store, group)?;
            compactor::check_dense(&store, group)?;
            Ok(rewritten)
        });
        log_outcome(
            "position_normalize",
            collection,
            started_at,
            &result,
            |rewritten| format!("group={group} rewritten={rewritten}"),
        );
        result
    }

    /// Grows or truncates `group` to `len` members in one transaction.
    ///
    /// Surplus members are deleted from the tail, so survivors keep their
    /// ordinals. Missing members are appended through `create_row`, which
    /// receives each new ordinal. `edit_owner` runs first in the same
    /// transaction and commits or rolls back with the resize.
    pub fn resize_group<E, F>(
        &self,
        collection: Collection,
        scope: ScopeId,
        group: GroupId,
        len: usize,
        edit_owner: E,
        mut create_row: F,
    ) -> PositionResult<GroupResize>
    where
        E: FnOnce(&Connection) -> PositionResult<()>,
        F: FnMut(&Connection, i64) -> PositionResult<()>,
    {
        let started_at = Instant::now();
        let mut edit_owner = Some(edit_owner);
        let result = self.with_plan_retries(|| {
            let planned = self.read_group(collection, group)?;
            let surplus = planned
                .iter()
                .skip(len)
                .rev()
                .map(|slot| slot.entity)
                .collect::<Vec<_>>();
            let mut keys = ConcurrencyGuard::keys_for(collection, [group]);
            keys.extend(
                surplus
                    .iter()
                    .filter_map(|entity| collection.dependent_key(*entity)),
            );

            self.guard.run(self.conn, &keys, |tx| {
                let store = SqlitePositionStore::new(tx, collection);
                store.lock_group(group)?;
                ensure_group_in_scope(&store, scope, group)?;
                if store.read_group(group)? != planned {
                    return Ok(None);
                }
                if let Some(edit) = edit_owner.take() {
                    edit(tx)?;
                }
                for entity in &surplus {
                    store.remove_entity(*entity)?;
                }
                let mut appended = Vec::new();
                for _ in planned.len()..len {
                    let ordinal = insertion::make_room(&store, group, InsertAt::Append)?;
                    create_row(tx, ordinal)?;
                    appended.push(ordinal);
                }
                self.verify(&store, [group])?;
                Ok(Some(GroupResize {
                    removed: surplus.clone(),
                    appended,
                }))
            })
        });
        log_outcome(
            "position_resize",
            collection,
            started_at,
            &result,
            |resize| {
                format!(
                    "group={group} len={len} removed={} appended={}",
                    resize.removed.len(),
                    resize.appended.len()
                )
            },
        );
        result
    }

    /// Deletes `group` with all its members through `delete_row`.
    ///
    /// Holds the group lock and the dependent lock of every member while the
    /// rows go. Returns the number of members the group had.
    pub fn drop_group<F>(
        &self,
        collection: Collection,
        scope: ScopeId,
        group: GroupId,
        delete_row: F,
    ) -> PositionResult<usize>
    where
        F: FnOnce(&Connection) -> PositionResult<()>,
    {
        let started_at = Instant::now();
        let mut delete_row = Some(delete_row);
        let result = self.with_plan_retries(|| {
            let planned = self.read_group(collection, group)?;
            let mut keys = ConcurrencyGuard::keys_for(collection, [group]);
            keys.extend(
                planned
                    .iter()
                    .filter_map(|slot| collection.dependent_key(slot.entity)),
            );

            self.guard.run(self.conn, &keys, |tx| {
                let store = SqlitePositionStore::new(tx, collection);
                store.lock_group(group)?;
                ensure_group_in_scope(&store, scope, group)?;
                if store.read_group(group)? != planned {
                    return Ok(None);
                }
                if let Some(delete) = delete_row.take() {
                    delete(tx)?;
                }
                Ok(Some(planned.len()))
            })
        });
        log_outcome(
            "position_drop_group",
            collection,
            started_at,
            &result,
            |members| format!("group={group} members={members}"),
        );
        result
    }

    fn run_plan(
        &self,
        event: &str,
        collection: Collection,
        scope: ScopeId,
        orders: Vec<GroupOrder>,
        mode: PlanMode,
    ) -> PositionResult<ReorderOutcome> {
        let started_at = Instant::now();
        let result = self.with_plan_retries(|| {
            let plan = BatchPlan::prepare(
                &SqlitePositionStore::new(self.conn, collection),
                scope,
                orders.clone(),
                mode,
            )?;
            let affected = plan.affected_groups().clone();
            let keys = ConcurrencyGuard::keys_for(collection, affected.iter().copied());

            self.guard.run(self.conn, &keys, |tx| {
                let store = SqlitePositionStore::new(tx, collection);
                for group in &affected {
                    store.lock_group(*group)?;
                }
                if plan.has_drifted(&store)? {
                    return Ok(None);
                }
                let changes = plan.apply(&store, self.config.reorder_offset)?;
                self.verify(&store, affected.iter().copied())?;
                Ok(Some(ReorderOutcome {
                    groups: read_slots(&store, &affected)?,
                    changes,
                }))
            })
        });
        log_outcome(event, collection, started_at, &result, |outcome| {
            format!(
                "groups={} changed={}",
                outcome.groups.len(),
                outcome.changes.len()
            )
        });
        result
    }

    /// Locates `entity` outside the lock and checks its scope.
    fn plan_single(
        &self,
        collection: Collection,
        scope: ScopeId,
        entity: EntityId,
    ) -> PositionResult<Placement> {
        let store = SqlitePositionStore::new(self.conn, collection);
        let placement = store
            .locate(entity)?
            .ok_or(PositionError::EntityNotFound(entity))?;
        ensure_entity_in_scope(&store, scope, &placement)?;
        Ok(placement)
    }

    /// Runs `attempt` until it returns a value; `None` means the plan drifted.
    ///
    /// Always tries at least once, even when the config asks for zero.
    fn with_plan_retries<T>(
        &self,
        mut attempt: impl FnMut() -> PositionResult<Option<T>>,
    ) -> PositionResult<T> {
        let attempts = self.config.max_plan_attempts.max(1);
        for round in 1..=attempts {
            if let Some(value) = attempt()? {
                return Ok(value);
            }
            debug!("event=position_plan_drift module=position status=retry attempt={round}");
        }
        Err(PositionError::ConcurrencyAborted(format!(
            "affected groups kept changing after {attempts} attempts"
        )))
    }

    fn verify<S: PositionStore + ?Sized>(
        &self,
        store: &S,
        groups: impl IntoIterator<Item = GroupId>,
    ) -> PositionResult<()> {
        if !self.config.verify_density {
            return Ok(());
        }
        for group in groups {
            compactor::check_dense(store, group)?;
        }
        Ok(())
    }
}

/// Re-locates a planned entity under lock; `None` when it changed group.
fn relocated_since<S: PositionStore + ?Sized>(
    store: &S,
    planned: &Placement,
) -> PositionResult<Option<Placement>> {
    let current = store
        .locate(planned.entity)?
        .ok_or(PositionError::EntityNotFound(planned.entity))?;
    Ok((current.group == planned.group).then_some(current))
}

fn read_slots<S: PositionStore + ?Sized>(
    store: &S,
    groups: &BTreeSet<GroupId>,
) -> PositionResult<Vec<GroupSlots>> {
    groups
        .iter()
        .map(|group| {
            Ok(GroupSlots {
                group: *group,
                slots: store.read_group(*group)?,
            })
        })
        .collect()
}

fn outcome_from(
    before: &BTreeMap<GroupId, Vec<Slot>>,
    after: BTreeMap<GroupId, Vec<Slot>>,
) -> ReorderOutcome {
    let changes = collect_changes(before, &after);
    ReorderOutcome {
        groups: after
            .into_iter()
            .map(|(group, slots)| GroupSlots { group, slots })
            .collect(),
        changes,
    }
}

fn log_outcome<T>(
    event: &str,
    collection: Collection,
    started_at: Instant,
    result: &PositionResult<T>,
    details: impl FnOnce(&T) -> String,
) {
    let duration_ms = started_at.elapsed().as_millis();
    match result {
        Ok(value) => info!(
            "event={event} module=position status=ok collection={collection} {} duration_ms={duration_ms}",
            details(value)
        ),
        Err(err) if err.is_rejection() => warn!(
            "event={event} module=position status=rejected collection={collection} error_code={} duration_ms={duration_ms}",
            err.code()
        ),
        Err(err) => error!(
            "event={event} module=position status=error collection={collection} error_code={} error={} duration_ms={duration_ms}",
            err.code(),
            err
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::PositionManager;
    use crate::config::PositionConfig;
    use crate::db::open_db_in_memory;
    use crate::position::{Collection, ConcurrencyGuard, InsertAt, PositionError};
    use rusqlite::{params, Connection};
    use uuid::Uuid;

    fn seed_trip(conn: &Connection) -> Uuid {
        let trip = Uuid::new_v4();
        conn.execute(
            "INSERT INTO trips (trip_uuid, title, start_date) VALUES (?1, 'Trip', '2026-05-01');",
            [trip.to_string()],
        )
        .unwrap();
        trip
    }

    fn add_day(manager: &PositionManager<'_>, trip: Uuid, at: InsertAt) -> Uuid {
        let day = Uuid::new_v4();
        manager
            .insert_entity(Collection::Days, trip, trip, at, |conn, ordinal| {
                conn.execute(
                    "INSERT INTO trip_days (day_uuid, trip_uuid, day_no) VALUES (?1, ?2, ?3);",
                    params![day.to_string(), trip.to_string(), ordinal],
                )?;
                Ok(())
            })
            .unwrap();
        day
    }

    fn day_order(manager: &PositionManager<'_>, trip: Uuid) -> Vec<Uuid> {
        manager
            .read_group(Collection::Days, trip)
            .unwrap()
            .into_iter()
            .map(|slot| slot.entity)
            .collect()
    }

    #[test]
    fn insert_at_shifts_and_failed_row_write_rolls_back() {
        let conn = open_db_in_memory().unwrap();
        let manager = PositionManager::with_defaults(&conn);
        let trip = seed_trip(&conn);
        let first = add_day(&manager, trip, InsertAt::Append);
        let second = add_day(&manager, trip, InsertAt::At(1));
        assert_eq!(day_order(&manager, trip), vec![second, first]);

        let err = manager
            .insert_entity(Collection::Days, trip, trip, InsertAt::At(1), |_, _| {
                Err::<(), _>(PositionError::InvalidData("row rejected".to_string()))
            })
            .unwrap_err();
        assert!(matches!(err, PositionError::InvalidData(_)));
        let ordinals = manager
            .read_group(Collection::Days, trip)
            .unwrap()
            .into_iter()
            .map(|slot| slot.ordinal)
            .collect::<Vec<_>>();
        assert_eq!(ordinals, vec![1, 2]);
    }

    #[test]
    fn delete_relocate_and_reorder_keep_density() {
        let conn = open_db_in_memory().unwrap();
        let manager = PositionManager::with_defaults(&conn);
        let trip = seed_trip(&conn);
        let days = (0..4)
            .map(|_| add_day(&manager, trip, InsertAt::Append))
            .collect::<Vec<_>>();

        let removed = manager.delete_entity(Collection::Days, trip, days[1]).unwrap();
        assert_eq!(removed.ordinal, 2);
        assert_eq!(day_order(&manager, trip), vec![days[0], days[2], days[3]]);

        let outcome = manager
            .relocate_entity(Collection::Days, trip, days[3], 1)
            .unwrap();
        assert_eq!(day_order(&manager, trip), vec![days[3], days[0], days[2]]);
        assert_eq!(outcome.changes.len(), 3);

        let outcome = manager
            .reorder_group(Collection::Days, trip, trip, &[days[2], days[0], days[3]])
            .unwrap();
        assert_eq!(day_order(&manager, trip), vec![days[2], days[0], days[3]]);
        assert_eq!(outcome.slots_of(trip).map(<[_]>::len), Some(3));
    }

    #[test]
    fn operations_outside_scope_are_rejected() {
        let conn = open_db_in_memory().unwrap();
        let manager = PositionManager::with_defaults(&conn);
        let trip = seed_trip(&conn);
        let other_trip = seed_trip(&conn);
        let day = add_day(&manager, trip, InsertAt::Append);

        let err = manager
            .relocate_entity(Collection::Days, other_trip, day, 1)
            .unwrap_err();
        assert!(matches!(err, PositionError::EntityNotInScope { .. }));
        let err = manager
            .insert_entity(Collection::Days, other_trip, trip, InsertAt::Append, |_, _| Ok(()))
            .unwrap_err();
        assert!(matches!(err, PositionError::GroupNotInScope { .. }));
    }

    #[test]
    fn held_group_lock_aborts_after_timeout() {
        let conn = open_db_in_memory().unwrap();
        let config = PositionConfig {
            lock_timeout_ms: 20,
            ..PositionConfig::default()
        };
        let manager =
            PositionManager::new(&conn, ConcurrencyGuard::from_config(&config), config);
        let trip = seed_trip(&conn);
        let day = add_day(&manager, trip, InsertAt::Append);

        let keys = ConcurrencyGuard::keys_for(Collection::Days, [trip]);
        let _lease = manager
            .guard()
            .lock_table()
            .acquire(&keys, std::time::Duration::from_millis(10))
            .unwrap();
        let err = manager
            .relocate_entity(Collection::Days, trip, day, 1)
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn zero_plan_attempts_still_tries_once() {
        let conn = open_db_in_memory().unwrap();
        let config = PositionConfig {
            max_plan_attempts: 0,
            ..PositionConfig::default()
        };
        let manager =
            PositionManager::new(&conn, ConcurrencyGuard::from_config(&config), config);
        let trip = seed_trip(&conn);
        let first = add_day(&manager, trip, InsertAt::Append);
        let second = add_day(&manager, trip, InsertAt::Append);

        manager
            .relocate_entity(Collection::Days, trip, second, 1)
            .unwrap();
        assert_eq!(day_order(&manager, trip), vec![second, first]);
        let removed = manager.delete_entity(Collection::Days, trip, first).unwrap();
        assert_eq!(removed.ordinal, 2);
    }
}
