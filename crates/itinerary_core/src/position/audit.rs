//! Density audit and repair over a whole database.
//!
//! Used by maintenance tooling to find groups whose ordinals are not exactly
//! `1..=N` (rows written outside the manager, imports) and to renumber them.

use super::{
    compactor, Collection, GroupId, PositionManager, PositionResult, PositionStore,
    SqlitePositionStore,
};
use log::{info, warn};
use rusqlite::Connection;
use serde::Serialize;

const AUDITED_COLLECTIONS: [Collection; 2] = [Collection::Days, Collection::Items];

/// One group whose ordinals are not dense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DensityViolation {
    pub collection: Collection,
    pub group: GroupId,
    pub ordinals: Vec<i64>,
    pub detail: String,
}

/// Result of a repair pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub repaired: Vec<DensityViolation>,
    pub rewritten_rows: usize,
}

/// Lists non-dense groups of one collection.
pub fn audit_collection(
    conn: &Connection,
    collection: Collection,
) -> PositionResult<Vec<DensityViolation>> {
    let store = SqlitePositionStore::new(conn, collection);
    let mut violations = Vec::new();
    for group in store.list_groups()? {
        let slots = store.read_group(group)?;
        if let Some(detail) = compactor::density_violation(&slots) {
            violations.push(DensityViolation {
                collection,
                group,
                ordinals: slots.iter().map(|slot| slot.ordinal).collect(),
                detail,
            });
        }
    }
    Ok(violations)
}

/// Lists non-dense groups of every collection, days first.
pub fn audit_all(conn: &Connection) -> PositionResult<Vec<DensityViolation>> {
    let mut violations = Vec::new();
    for collection in AUDITED_COLLECTIONS {
        violations.extend(audit_collection(conn, collection)?);
    }
    info!(
        "event=position_audit module=position status=ok violations={}",
        violations.len()
    );
    Ok(violations)
}

/// Renumbers every non-dense group through `manager`.
pub fn repair_all(manager: &PositionManager<'_>) -> PositionResult<RepairReport> {
    let mut report = RepairReport::default();
    for violation in audit_all(manager.connection())? {
        warn!(
            "event=position_repair module=position status=start collection={} group={} detail={}",
            violation.collection, violation.group, violation.detail
        );
        report.rewritten_rows += manager.normalize_group(violation.collection, violation.group)?;
        report.repaired.push(violation);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::{audit_all, repair_all};
    use crate::db::open_db_in_memory;
    use crate::position::{Collection, PositionManager};
    use rusqlite::params;
    use uuid::Uuid;

    #[test]
    fn audit_finds_and_repair_fixes_gaps() {
        let conn = open_db_in_memory().unwrap();
        let trip = Uuid::new_v4();
        conn.execute(
            "INSERT INTO trips (trip_uuid, title, start_date) VALUES (?1, 'Trip', '2026-07-01');",
            [trip.to_string()],
        )
        .unwrap();
        for day_no in [1_i64, 3, 7] {
            conn.execute(
                "INSERT INTO trip_days (day_uuid, trip_uuid, day_no) VALUES (?1, ?2, ?3);",
                params![Uuid::new_v4().to_string(), trip.to_string(), day_no],
            )
            .unwrap();
        }

        let violations = audit_all(&conn).unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].collection, Collection::Days);
        assert_eq!(violations[0].ordinals, vec![1, 3, 7]);

        let manager = PositionManager::with_defaults(&conn);
        let report = repair_all(&manager).unwrap();
        assert_eq!(report.repaired.len(), 1);
        assert_eq!(report.rewritten_rows, 2);
        assert!(audit_all(&conn).unwrap().is_empty());
    }
}
