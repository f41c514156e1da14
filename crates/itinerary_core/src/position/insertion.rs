//! Room-making for new entities.

use super::{GroupId, InsertAt, PositionError, PositionResult, PositionStore, Slot};

/// Resolves `at` against the current members of a group.
///
/// `Append` yields `max + 1` (`1` for an empty group); `At(k)` must satisfy
/// `1 <= k <= max + 1`.
pub fn resolve_target(slots: &[Slot], at: InsertAt) -> PositionResult<i64> {
    let max = slots.last().map_or(0, |slot| slot.ordinal);
    match at {
        InsertAt::Append => Ok(max + 1),
        InsertAt::At(ordinal) if (1..=max + 1).contains(&ordinal) => Ok(ordinal),
        InsertAt::At(ordinal) => Err(PositionError::OrdinalOutOfRange {
            ordinal,
            max: max + 1,
        }),
    }
}

/// Frees the target ordinal in a locked group and returns it.
///
/// Members at or above the target move up by one, highest first, so every
/// write lands on a free ordinal.
pub fn make_room<S: PositionStore + ?Sized>(
    store: &S,
    group: GroupId,
    at: InsertAt,
) -> PositionResult<i64> {
    let slots = store.read_group(group)?;
    let target = resolve_target(&slots, at)?;
    for slot in slots.iter().rev().filter(|slot| slot.ordinal >= target) {
        store.write_position(slot.entity, group, slot.ordinal + 1)?;
    }
    Ok(target)
}
