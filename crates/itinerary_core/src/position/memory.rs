//! In-memory [`PositionStore`] for exercising the algorithms without SQLite.
//!
//! Enforces per-group ordinal uniqueness on every write and rejects writes to
//! groups that were not locked first, so an algorithm that sequences its
//! writes wrongly fails here the same way it would against the real indexes.

use super::{
    EntityId, GroupId, Placement, PositionError, PositionResult, PositionStore, ScopeId, Slot,
};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct MemoryPositionStore {
    scopes: RefCell<BTreeMap<GroupId, ScopeId>>,
    rows: RefCell<BTreeMap<EntityId, (GroupId, i64)>>,
    locked: RefCell<BTreeSet<GroupId>>,
    writes: Cell<usize>,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a group owned by `scope`.
    pub fn add_group(&self, group: GroupId, scope: ScopeId) {
        self.scopes.borrow_mut().insert(group, scope);
    }

    /// Places `entities` in `group` at ordinals `1..=N`, bypassing locks.
    pub fn seed(&self, group: GroupId, entities: &[EntityId]) {
        let mut rows = self.rows.borrow_mut();
        for (index, entity) in entities.iter().enumerate() {
            rows.insert(*entity, (group, index as i64 + 1));
        }
    }

    /// Inserts a new entity at a free ordinal of a locked group.
    pub fn insert_new(
        &self,
        entity: EntityId,
        group: GroupId,
        ordinal: i64,
    ) -> PositionResult<()> {
        self.ensure_locked(group)?;
        self.ensure_free(group, ordinal, None)?;
        self.rows.borrow_mut().insert(entity, (group, ordinal));
        self.bump_writes();
        Ok(())
    }

    /// Drops every lock taken so far, ending the simulated operation.
    pub fn release_locks(&self) {
        self.locked.borrow_mut().clear();
    }

    /// Number of mutating writes since the last reset.
    pub fn write_count(&self) -> usize {
        self.writes.get()
    }

    pub fn reset_write_count(&self) {
        self.writes.set(0);
    }

    /// Entities of `group` in ordinal order.
    pub fn order_of(&self, group: GroupId) -> Vec<EntityId> {
        self.slots(group).into_iter().map(|slot| slot.entity).collect()
    }

    /// Ordinals of `group` in ascending order.
    pub fn ordinals_of(&self, group: GroupId) -> Vec<i64> {
        self.slots(group).into_iter().map(|slot| slot.ordinal).collect()
    }

    fn slots(&self, group: GroupId) -> Vec<Slot> {
        let mut slots = self
            .rows
            .borrow()
            .iter()
            .filter(|(_, (owner, _))| *owner == group)
            .map(|(entity, (_, ordinal))| Slot {
                entity: *entity,
                ordinal: *ordinal,
            })
            .collect::<Vec<_>>();
        slots.sort_by_key(|slot| (slot.ordinal, slot.entity));
        slots
    }

    fn ensure_locked(&self, group: GroupId) -> PositionResult<()> {
        if self.locked.borrow().contains(&group) {
            return Ok(());
        }
        Err(PositionError::InvariantViolation {
            group,
            detail: "write to a group that is not locked".to_string(),
        })
    }

    fn ensure_free(
        &self,
        group: GroupId,
        ordinal: i64,
        moving: Option<EntityId>,
    ) -> PositionResult<()> {
        let taken = self.rows.borrow().iter().any(|(entity, (owner, current))| {
            *owner == group && *current == ordinal && Some(*entity) != moving
        });
        if ordinal < 1 {
            return Err(PositionError::InvariantViolation {
                group,
                detail: format!("ordinal {ordinal} below 1"),
            });
        }
        if taken {
            return Err(PositionError::InvariantViolation {
                group,
                detail: format!("ordinal collision at {ordinal}"),
            });
        }
        Ok(())
    }

    fn bump_writes(&self) {
        self.writes.set(self.writes.get() + 1);
    }
}

/// Store with one locked group seeded with `count` fresh entities.
pub(crate) fn store_with(count: usize) -> (MemoryPositionStore, GroupId, Vec<EntityId>) {
    let store = MemoryPositionStore::new();
    let group = Uuid::new_v4();
    let entities = (0..count).map(|_| Uuid::new_v4()).collect::<Vec<_>>();
    store.add_group(group, Uuid::new_v4());
    store.seed(group, &entities);
    store.locked.borrow_mut().insert(group);
    (store, group, entities)
}

impl PositionStore for MemoryPositionStore {
    fn lock_group(&self, group: GroupId) -> PositionResult<()> {
        if !self.scopes.borrow().contains_key(&group) {
            return Err(PositionError::GroupNotFound(group));
        }
        self.locked.borrow_mut().insert(group);
        Ok(())
    }

    fn group_scope(&self, group: GroupId) -> PositionResult<Option<ScopeId>> {
        Ok(self.scopes.borrow().get(&group).copied())
    }

    fn read_group(&self, group: GroupId) -> PositionResult<Vec<Slot>> {
        Ok(self.slots(group))
    }

    fn locate(&self, entity: EntityId) -> PositionResult<Option<Placement>> {
        Ok(self
            .rows
            .borrow()
            .get(&entity)
            .map(|(group, ordinal)| Placement {
                entity,
                group: *group,
                ordinal: *ordinal,
            }))
    }

    fn write_position(
        &self,
        entity: EntityId,
        group: GroupId,
        ordinal: i64,
    ) -> PositionResult<()> {
        let (current_group, _) = *self
            .rows
            .borrow()
            .get(&entity)
            .ok_or(PositionError::EntityNotFound(entity))?;
        self.ensure_locked(current_group)?;
        self.ensure_locked(group)?;
        self.ensure_free(group, ordinal, Some(entity))?;
        self.rows.borrow_mut().insert(entity, (group, ordinal));
        self.bump_writes();
        Ok(())
    }

    fn offset_groups(&self, groups: &[GroupId], offset: i64) -> PositionResult<usize> {
        for group in groups {
            self.ensure_locked(*group)?;
        }
        let mut rows = self.rows.borrow_mut();
        let mut touched = 0;
        for (owner, ordinal) in rows.values_mut() {
            if groups.contains(owner) {
                *ordinal += offset;
                touched += 1;
            }
        }
        drop(rows);
        self.bump_writes();
        Ok(touched)
    }

    fn remove_entity(&self, entity: EntityId) -> PositionResult<()> {
        let (group, _) = *self
            .rows
            .borrow()
            .get(&entity)
            .ok_or(PositionError::EntityNotFound(entity))?;
        self.ensure_locked(group)?;
        self.rows.borrow_mut().remove(&entity);
        self.bump_writes();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryPositionStore;
    use crate::position::{PositionError, PositionStore};
    use uuid::Uuid;

    #[test]
    fn rejects_writes_to_unlocked_group() {
        let store = MemoryPositionStore::new();
        let scope = Uuid::new_v4();
        let group = Uuid::new_v4();
        let entity = Uuid::new_v4();
        store.add_group(group, scope);
        store.seed(group, &[entity]);

        assert!(matches!(
            store.write_position(entity, group, 2),
            Err(PositionError::InvariantViolation { .. })
        ));
        store.lock_group(group).unwrap();
        store.write_position(entity, group, 2).unwrap();
        assert_eq!(store.ordinals_of(group), vec![2]);
    }

    #[test]
    fn rejects_duplicate_ordinal() {
        let store = MemoryPositionStore::new();
        let group = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store.add_group(group, Uuid::new_v4());
        store.seed(group, &[a, b]);
        store.lock_group(group).unwrap();

        let err = store.write_position(a, group, 2).unwrap_err();
        assert!(matches!(err, PositionError::InvariantViolation { detail, .. } if detail.contains("collision")));
        assert_eq!(store.order_of(group), vec![a, b]);
    }
}
