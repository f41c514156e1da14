//! Multi-group reorder planning and application.
//!
//! # Responsibility
//! - Validate a reorder request against scope, membership and duplicates
//!   before any write.
//! - Compute the affected-group set: every named destination plus every
//!   origin group of a listed entity.
//! - Apply the request with offset, assign, compact.
//!
//! # Invariants
//! - Validation completes with zero writes on every rejection path.
//! - After `apply`, each named group starts with its listed entities in
//!   request order; unlisted members follow in their prior relative order.
//! - Every affected group ends dense.

use super::{
    collect_changes, compactor, ensure_entity_in_scope, ensure_group_in_scope, snapshot_groups,
    EntityId, GroupId, GroupOrder, Placement, PositionChange, PositionError, PositionResult,
    PositionStore, ScopeId, Slot,
};
use std::collections::{BTreeMap, BTreeSet};

/// How strictly a plan treats its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    /// One group, listed entities must be exactly its current members.
    FullSet,
    /// Any number of groups; entities may come from other groups in scope.
    Batch,
}

/// Validated reorder request bound to the placements it was planned on.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    mode: PlanMode,
    orders: Vec<GroupOrder>,
    origins: BTreeMap<EntityId, Placement>,
    affected: BTreeSet<GroupId>,
}

impl BatchPlan {
    /// Validates `orders` against the current store state.
    ///
    /// # Errors
    /// - `EmptyGroupOperation` when no entity is listed at all.
    /// - `DuplicateGroupInRequest` / `DuplicateEntityInRequest` for repeats.
    /// - `GroupNotFound` / `GroupNotInScope` for bad destination groups.
    /// - `EntityNotFound` / `EntityNotInScope` for bad entities.
    /// - `EntityNotInGroup` / `IncompleteOrdering` in [`PlanMode::FullSet`].
    pub fn prepare<S: PositionStore + ?Sized>(
        store: &S,
        scope: ScopeId,
        orders: Vec<GroupOrder>,
        mode: PlanMode,
    ) -> PositionResult<Self> {
        check_request_shape(&orders)?;
        for order in &orders {
            ensure_group_in_scope(store, scope, order.group)?;
        }

        let mut origins = BTreeMap::new();
        for entity in orders.iter().flat_map(|order| order.entities.iter()) {
            let placement = store
                .locate(*entity)?
                .ok_or(PositionError::EntityNotFound(*entity))?;
            ensure_entity_in_scope(store, scope, &placement)?;
            origins.insert(*entity, placement);
        }

        if mode == PlanMode::FullSet {
            check_full_set(store, &orders, &origins)?;
        }

        let affected = orders
            .iter()
            .map(|order| order.group)
            .chain(origins.values().map(|placement| placement.group))
            .collect();

        Ok(Self {
            mode,
            orders,
            origins,
            affected,
        })
    }

    pub fn mode(&self) -> PlanMode {
        self.mode
    }

    /// Groups whose locks must be held while applying.
    pub fn affected_groups(&self) -> &BTreeSet<GroupId> {
        &self.affected
    }

    /// Whether any listed entity left the group it was planned from.
    ///
    /// A plan that drifted must be recomputed; its lock set may be stale.
    pub fn has_drifted<S: PositionStore + ?Sized>(&self, store: &S) -> PositionResult<bool> {
        for (entity, planned) in &self.origins {
            let current = store
                .locate(*entity)?
                .ok_or(PositionError::EntityNotFound(*entity))?;
            if current.group != planned.group {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Rewrites ordinals of every affected group; groups must be locked.
    ///
    /// Returns every entity whose group or ordinal changed.
    pub fn apply<S: PositionStore + ?Sized>(
        &self,
        store: &S,
        reorder_offset: i64,
    ) -> PositionResult<Vec<PositionChange>> {
        let before = snapshot_groups(store, self.affected.iter().copied())?;
        let full_set = self.covers_whole_group(&before);
        if self.mode == PlanMode::FullSet && !full_set {
            // Membership changed after validation; re-run the strict checks
            // so the caller gets the precise rejection.
            check_full_set(store, &self.orders, &self.origins)?;
            return Err(PositionError::ConcurrencyAborted(
                "group membership changed during reorder".to_string(),
            ));
        }

        let groups = self.affected.iter().copied().collect::<Vec<_>>();
        store.offset_groups(&groups, reorder_offset)?;

        for order in &self.orders {
            for (index, entity) in order.entities.iter().enumerate() {
                store.write_position(*entity, order.group, index as i64 + 1)?;
            }
        }

        if !full_set {
            for group in &groups {
                compactor::renumber(store, *group)?;
            }
        }

        let after = snapshot_groups(store, groups)?;
        Ok(collect_changes(&before, &after))
    }

    /// True when the request is one group listing exactly its members, so
    /// assignment alone yields a dense group.
    fn covers_whole_group(&self, before: &BTreeMap<GroupId, Vec<Slot>>) -> bool {
        let [order] = self.orders.as_slice() else {
            return false;
        };
        let Some(current) = before.get(&order.group) else {
            return false;
        };
        current.len() == order.entities.len()
            && current
                .iter()
                .all(|slot| order.entities.contains(&slot.entity))
    }
}

fn check_request_shape(orders: &[GroupOrder]) -> PositionResult<()> {
    if orders.iter().all(|order| order.entities.is_empty()) {
        return Err(PositionError::EmptyGroupOperation);
    }

    let mut groups = BTreeSet::new();
    let mut entities = BTreeSet::new();
    for order in orders {
        if !groups.insert(order.group) {
            return Err(PositionError::DuplicateGroupInRequest(order.group));
        }
        for entity in &order.entities {
            if !entities.insert(*entity) {
                return Err(PositionError::DuplicateEntityInRequest(*entity));
            }
        }
    }
    Ok(())
}

fn check_full_set<S: PositionStore + ?Sized>(
    store: &S,
    orders: &[GroupOrder],
    origins: &BTreeMap<EntityId, Placement>,
) -> PositionResult<()> {
    let [order] = orders else {
        return Err(PositionError::InvalidData(
            "full reorder takes exactly one group".to_string(),
        ));
    };
    for entity in &order.entities {
        if let Some(placement) = origins.get(entity) {
            if placement.group != order.group {
                return Err(PositionError::EntityNotInGroup {
                    entity: *entity,
                    group: order.group,
                });
            }
        }
    }
    let expected = store.read_group(order.group)?.len();
    if expected != order.entities.len() {
        return Err(PositionError::IncompleteOrdering {
            group: order.group,
            expected,
            actual: order.entities.len(),
        });
    }
    Ok(())
}
