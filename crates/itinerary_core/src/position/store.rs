//! Storage contract used by the position algorithms.
//!
//! # Invariants
//! - `read_group` returns slots ordered by `ordinal ASC, entity ASC`.
//! - Mutating calls are only valid on groups locked through `lock_group`
//!   within the current operation.
//! - Implementations never reorder writes; callers sequence them so that no
//!   intermediate write collides with a live ordinal.

use super::{EntityId, GroupId, Placement, PositionResult, ScopeId, Slot};

/// Ordinal persistence for one collection.
pub trait PositionStore {
    /// Claims `group` for the current operation.
    ///
    /// Fails with `GroupNotFound` when the group does not exist.
    fn lock_group(&self, group: GroupId) -> PositionResult<()>;
    /// Owning scope of `group`, or `None` when the group does not exist.
    fn group_scope(&self, group: GroupId) -> PositionResult<Option<ScopeId>>;
    /// Current members of `group`.
    fn read_group(&self, group: GroupId) -> PositionResult<Vec<Slot>>;
    /// Current group and ordinal of `entity`.
    fn locate(&self, entity: EntityId) -> PositionResult<Option<Placement>>;
    /// Sets group and ordinal of an existing entity in one write.
    fn write_position(&self, entity: EntityId, group: GroupId, ordinal: i64)
        -> PositionResult<()>;
    /// Adds `offset` to every ordinal in `groups`; returns rows touched.
    fn offset_groups(&self, groups: &[GroupId], offset: i64) -> PositionResult<usize>;
    /// Deletes `entity` and its dependents.
    fn remove_entity(&self, entity: EntityId) -> PositionResult<()>;
}
