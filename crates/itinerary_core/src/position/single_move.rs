//! Relocation of one entity inside its group.
//!
//! The moving entity is parked above the live range, members strictly between
//! the old and new slot shift one step toward the vacated slot, then the
//! entity takes its target. Only members in that range are written.

use super::{Placement, PositionError, PositionResult, PositionStore};

/// Summary of one relocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveOutcome {
    pub from: i64,
    pub to: i64,
    /// Members other than the moved entity that were rewritten.
    pub shifted: usize,
}

/// Clamps a requested ordinal into `1..=len`.
pub fn clamp_target(requested: i64, len: usize) -> i64 {
    requested.clamp(1, (len as i64).max(1))
}

/// Moves `placement.entity` to `requested` (clamped) within its group.
pub fn relocate<S: PositionStore + ?Sized>(
    store: &S,
    placement: Placement,
    requested: i64,
    sentinel_offset: i64,
) -> PositionResult<MoveOutcome> {
    let group = placement.group;
    let slots = store.read_group(group)?;
    if !slots.iter().any(|slot| slot.entity == placement.entity) {
        return Err(PositionError::EntityNotInGroup {
            entity: placement.entity,
            group,
        });
    }

    let from = placement.ordinal;
    let to = clamp_target(requested, slots.len());
    if from == to {
        return Ok(MoveOutcome {
            from,
            to,
            shifted: 0,
        });
    }

    let sentinel = slots.len() as i64 + sentinel_offset;
    store.write_position(placement.entity, group, sentinel)?;

    let mut shifted = 0;
    if from < to {
        for slot in slots
            .iter()
            .filter(|slot| slot.ordinal > from && slot.ordinal <= to)
        {
            store.write_position(slot.entity, group, slot.ordinal - 1)?;
            shifted += 1;
        }
    } else {
        for slot in slots
            .iter()
            .rev()
            .filter(|slot| slot.ordinal >= to && slot.ordinal < from)
        {
            store.write_position(slot.entity, group, slot.ordinal + 1)?;
            shifted += 1;
        }
    }

    store.write_position(placement.entity, group, to)?;
    Ok(MoveOutcome { from, to, shifted })
}
