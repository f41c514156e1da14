//! Gap closing and renumbering.
//!
//! # Invariants
//! - Decrements are issued in ascending ordinal order so each target ordinal
//!   is free when written.
//! - After `renumber` the group holds exactly `1..=N` in its prior relative
//!   order.

use super::{GroupId, PositionError, PositionResult, PositionStore, Slot};

/// Shifts every member above `removed_ordinal` down by one.
///
/// Returns the number of shifted members.
pub fn close_gap<S: PositionStore + ?Sized>(
    store: &S,
    group: GroupId,
    removed_ordinal: i64,
) -> PositionResult<usize> {
    let mut shifted = 0;
    for slot in store
        .read_group(group)?
        .into_iter()
        .filter(|slot| slot.ordinal > removed_ordinal)
    {
        store.write_position(slot.entity, group, slot.ordinal - 1)?;
        shifted += 1;
    }
    Ok(shifted)
}

/// Rewrites `group` to `1..=N` keeping the current relative order.
///
/// Members already at their dense ordinal are left untouched. Returns the
/// number of rewritten members.
pub fn renumber<S: PositionStore + ?Sized>(store: &S, group: GroupId) -> PositionResult<usize> {
    let mut rewritten = 0;
    for (index, slot) in store.read_group(group)?.into_iter().enumerate() {
        let dense = index as i64 + 1;
        if slot.ordinal != dense {
            store.write_position(slot.entity, group, dense)?;
            rewritten += 1;
        }
    }
    Ok(rewritten)
}

/// Fails with `InvariantViolation` unless `group` is exactly `1..=N`.
pub fn check_dense<S: PositionStore + ?Sized>(store: &S, group: GroupId) -> PositionResult<()> {
    match density_violation(&store.read_group(group)?) {
        None => Ok(()),
        Some(detail) => Err(PositionError::InvariantViolation { group, detail }),
    }
}

/// Describes the first break in density of ordered `slots`, if any.
pub fn density_violation(slots: &[Slot]) -> Option<String> {
    slots.iter().enumerate().find_map(|(index, slot)| {
        let expected = index as i64 + 1;
        (slot.ordinal != expected)
            .then(|| format!("expected ordinal {expected}, found {}", slot.ordinal))
    })
}
