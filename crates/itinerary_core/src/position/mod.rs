//! Ordinal position manager.
//!
//! # Responsibility
//! - Keep per-group ordinals dense (`1..=N`, no gaps, no duplicates) across
//!   insert, delete, single relocation, full reorder and cross-group batch
//!   moves.
//! - Run every mutation under the group locks of its affected-group set and
//!   inside one transaction.
//!
//! # Invariants
//! - Every entity belongs to exactly one group; moving between groups rewrites
//!   group id and ordinal in one write.
//! - All entities named by a request share the request's ancestor scope.
//! - A failed operation leaves no partial renumbering behind.
//!
//! Components, leaf first: [`store`] (storage contract) with the [`sqlite`]
//! backend and an in-memory double for unit tests, [`compactor`], [`insertion`], [`single_move`],
//! [`batch`], [`guard`], then the [`manager`] facade and the [`audit`] pass.

use crate::db::DbError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub mod audit;
pub mod batch;
pub mod compactor;
pub mod guard;
pub mod insertion;
pub mod manager;
#[cfg(test)]
pub(crate) mod memory;
pub mod single_move;
pub mod sqlite;
pub mod store;

pub use batch::{BatchPlan, PlanMode};
pub use guard::{ConcurrencyGuard, GroupKey, GroupLease, GroupLockTable};
pub use manager::PositionManager;
pub use sqlite::SqlitePositionStore;
pub use store::PositionStore;

/// Identifier of a group (a trip for days, a day for items).
pub type GroupId = Uuid;
/// Identifier of a positioned entity (a day or an item).
pub type EntityId = Uuid;
/// Identifier of the owning ancestor every request is scoped to (a trip).
pub type ScopeId = Uuid;

/// Result type used by position operations.
pub type PositionResult<T> = Result<T, PositionError>;

/// Which ordered collection an operation works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// Days ordered within a trip.
    Days,
    /// Schedule items ordered within a day.
    Items,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Days => "days",
            Self::Items => "items",
        }
    }

    /// Group key that disappears together with `entity`.
    ///
    /// A day is itself the group of its items, so deleting a day also has to
    /// hold the lock of that item group.
    pub fn dependent_key(self, entity: EntityId) -> Option<GroupKey> {
        match self {
            Self::Days => Some(GroupKey::new(Self::Items, entity)),
            Self::Items => None,
        }
    }
}

impl Display for Collection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One member of a group as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub entity: EntityId,
    pub ordinal: i64,
}

/// Group + ordinal pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub group: GroupId,
    pub ordinal: i64,
}

/// Current location of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub entity: EntityId,
    pub group: GroupId,
    pub ordinal: i64,
}

impl Placement {
    pub fn position(&self) -> Position {
        Position {
            group: self.group,
            ordinal: self.ordinal,
        }
    }
}

/// Where a new entity goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertAt {
    /// After the current last member.
    Append,
    /// At this 1-based ordinal; members at or after it shift up by one.
    At(i64),
}

impl From<Option<i64>> for InsertAt {
    fn from(value: Option<i64>) -> Self {
        value.map_or(Self::Append, Self::At)
    }
}

/// Desired final order of one group inside a reorder request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupOrder {
    pub group: GroupId,
    pub entities: Vec<EntityId>,
}

impl GroupOrder {
    pub fn new(group: GroupId, entities: impl Into<Vec<EntityId>>) -> Self {
        Self {
            group,
            entities: entities.into(),
        }
    }
}

/// An entity whose group or ordinal changed during an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionChange {
    pub entity: EntityId,
    pub from: Position,
    pub to: Position,
}

impl PositionChange {
    /// `to.ordinal - from.ordinal`; meaningful when the group did not change.
    pub fn rank_delta(&self) -> i64 {
        self.to.ordinal - self.from.ordinal
    }
}

/// Refreshed ordering of one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSlots {
    pub group: GroupId,
    pub slots: Vec<Slot>,
}

/// Result of a relocate / reorder class operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderOutcome {
    /// Every touched group in ascending group id order.
    pub groups: Vec<GroupSlots>,
    /// Entities whose position changed, ordered by destination.
    pub changes: Vec<PositionChange>,
}

impl ReorderOutcome {
    pub fn slots_of(&self, group: GroupId) -> Option<&[Slot]> {
        self.groups
            .iter()
            .find(|entry| entry.group == group)
            .map(|entry| entry.slots.as_slice())
    }
}

/// Result of growing or truncating a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupResize {
    /// Tail members that were deleted, last ordinal first.
    pub removed: Vec<EntityId>,
    /// Ordinals handed to new members, ascending.
    pub appended: Vec<i64>,
}

/// Errors from position operations.
#[derive(Debug)]
pub enum PositionError {
    /// Group does not exist.
    GroupNotFound(GroupId),
    /// Entity does not exist.
    EntityNotFound(EntityId),
    /// Entity belongs to another ancestor than the request's scope.
    EntityNotInScope { entity: EntityId, scope: ScopeId },
    /// Group belongs to another ancestor than the request's scope.
    GroupNotInScope { group: GroupId, scope: ScopeId },
    /// Entity is in scope but not a member of the group being reordered.
    EntityNotInGroup { entity: EntityId, group: GroupId },
    /// Same entity listed more than once across the request.
    DuplicateEntityInRequest(EntityId),
    /// Same group listed more than once in a batch request.
    DuplicateGroupInRequest(GroupId),
    /// Request names nothing to reorder.
    EmptyGroupOperation,
    /// Full reorder does not list every member of the group.
    IncompleteOrdering {
        group: GroupId,
        expected: usize,
        actual: usize,
    },
    /// Explicit insert ordinal outside `1..=max + 1`.
    OrdinalOutOfRange { ordinal: i64, max: i64 },
    /// Lock wait or transaction failed because of contention; safe to retry.
    ConcurrencyAborted(String),
    /// Mutation API used without an open transaction.
    TransactionRequired,
    /// Density or uniqueness broke inside an operation.
    InvariantViolation { group: GroupId, detail: String },
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
    /// Underlying SQLite failure.
    Db(DbError),
}

impl PositionError {
    /// Stable machine-readable code for logs and callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::GroupNotFound(_) => "group_not_found",
            Self::EntityNotFound(_) => "entity_not_found",
            Self::EntityNotInScope { .. } => "entity_not_in_scope",
            Self::GroupNotInScope { .. } => "group_not_in_scope",
            Self::EntityNotInGroup { .. } => "entity_not_in_group",
            Self::DuplicateEntityInRequest(_) => "duplicate_entity_in_request",
            Self::DuplicateGroupInRequest(_) => "duplicate_group_in_request",
            Self::EmptyGroupOperation => "empty_group_operation",
            Self::IncompleteOrdering { .. } => "incomplete_ordering",
            Self::OrdinalOutOfRange { .. } => "ordinal_out_of_range",
            Self::ConcurrencyAborted(_) => "concurrency_aborted",
            Self::TransactionRequired => "transaction_required",
            Self::InvariantViolation { .. } => "invariant_violation",
            Self::InvalidData(_) => "invalid_data",
            Self::Db(_) => "db_error",
        }
    }

    /// Whether the caller may retry the whole operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyAborted(_))
    }

    /// Whether this is a rejected request rather than a storage failure.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::GroupNotFound(_)
                | Self::EntityNotFound(_)
                | Self::EntityNotInScope { .. }
                | Self::GroupNotInScope { .. }
                | Self::EntityNotInGroup { .. }
                | Self::DuplicateEntityInRequest(_)
                | Self::DuplicateGroupInRequest(_)
                | Self::EmptyGroupOperation
                | Self::IncompleteOrdering { .. }
                | Self::OrdinalOutOfRange { .. }
        )
    }
}

impl Display for PositionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GroupNotFound(id) => write!(f, "group not found: {id}"),
            Self::EntityNotFound(id) => write!(f, "entity not found: {id}"),
            Self::EntityNotInScope { entity, scope } => {
                write!(f, "entity {entity} does not belong to scope {scope}")
            }
            Self::GroupNotInScope { group, scope } => {
                write!(f, "group {group} does not belong to scope {scope}")
            }
            Self::EntityNotInGroup { entity, group } => {
                write!(f, "entity {entity} is not a member of group {group}")
            }
            Self::DuplicateEntityInRequest(id) => {
                write!(f, "entity listed more than once in request: {id}")
            }
            Self::DuplicateGroupInRequest(id) => {
                write!(f, "group listed more than once in request: {id}")
            }
            Self::EmptyGroupOperation => write!(f, "request names nothing to reorder"),
            Self::IncompleteOrdering {
                group,
                expected,
                actual,
            } => write!(
                f,
                "reorder of group {group} lists {actual} entities; group has {expected}"
            ),
            Self::OrdinalOutOfRange { ordinal, max } => {
                write!(f, "ordinal {ordinal} is outside 1..={max}")
            }
            Self::ConcurrencyAborted(reason) => write!(f, "operation aborted: {reason}"),
            Self::TransactionRequired => {
                write!(f, "position mutation requires an open transaction")
            }
            Self::InvariantViolation { group, detail } => {
                write!(f, "ordinal invariant violated in group {group}: {detail}")
            }
            Self::InvalidData(message) => write!(f, "invalid position data: {message}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for PositionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for PositionError {
    fn from(value: DbError) -> Self {
        if value.is_busy() {
            return Self::ConcurrencyAborted(value.to_string());
        }
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for PositionError {
    fn from(value: rusqlite::Error) -> Self {
        Self::from(DbError::Sqlite(value))
    }
}

/// Diffs two snapshots keyed by group and returns every entity whose
/// position changed, ordered by destination.
pub(crate) fn collect_changes(
    before: &BTreeMap<GroupId, Vec<Slot>>,
    after: &BTreeMap<GroupId, Vec<Slot>>,
) -> Vec<PositionChange> {
    let index = |snapshot: &BTreeMap<GroupId, Vec<Slot>>| {
        snapshot
            .iter()
            .flat_map(|(group, slots)| {
                slots.iter().map(move |slot| {
                    (
                        slot.entity,
                        Position {
                            group: *group,
                            ordinal: slot.ordinal,
                        },
                    )
                })
            })
            .collect::<BTreeMap<_, _>>()
    };
    let old = index(before);
    let new = index(after);

    let mut changes = new
        .iter()
        .filter_map(|(entity, to)| {
            let from = old.get(entity)?;
            (from != to).then_some(PositionChange {
                entity: *entity,
                from: *from,
                to: *to,
            })
        })
        .collect::<Vec<_>>();
    changes.sort_by_key(|change| change.to);
    changes
}

/// Reads the current slots of every group, keyed by group id.
pub(crate) fn snapshot_groups<S: PositionStore + ?Sized>(
    store: &S,
    groups: impl IntoIterator<Item = GroupId>,
) -> PositionResult<BTreeMap<GroupId, Vec<Slot>>> {
    groups
        .into_iter()
        .map(|group| Ok((group, store.read_group(group)?)))
        .collect()
}

/// Checks that `group` exists and belongs to `scope`.
pub(crate) fn ensure_group_in_scope<S: PositionStore + ?Sized>(
    store: &S,
    scope: ScopeId,
    group: GroupId,
) -> PositionResult<()> {
    match store.group_scope(group)? {
        None => Err(PositionError::GroupNotFound(group)),
        Some(owner) if owner == scope => Ok(()),
        Some(_) => Err(PositionError::GroupNotInScope { group, scope }),
    }
}

/// Checks that the group currently holding `placement` belongs to `scope`.
pub(crate) fn ensure_entity_in_scope<S: PositionStore + ?Sized>(
    store: &S,
    scope: ScopeId,
    placement: &Placement,
) -> PositionResult<()> {
    match store.group_scope(placement.group)? {
        Some(owner) if owner == scope => Ok(()),
        _ => Err(PositionError::EntityNotInScope {
            entity: placement.entity,
            scope,
        }),
    }
}
