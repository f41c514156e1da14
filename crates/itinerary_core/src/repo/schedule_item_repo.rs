//! Schedule item repository contracts and SQLite implementation.
//!
//! # Invariants
//! - Item listing is deterministic: `seq_no ASC, item_uuid ASC`.
//! - `visit_time` is stored as `HH:MM:SS` text and never shifted by ordinal
//!   changes.

use super::{
    ensure_connection_ready, parse_time, parse_uuid, RepoError, RepoResult, VISIT_TIME_FORMAT,
};
use crate::model::itinerary::{
    normalize_memo, parse_visit_time, DayId, ItemId, ScheduleItem, ScheduleItemPatch,
    SchedulePayload,
};
use chrono::NaiveTime;
use rusqlite::{params, Connection, OptionalExtension, Row};

const ITEM_SELECT_SQL: &str = "SELECT
    item_uuid,
    day_uuid,
    place_ref,
    seq_no,
    visit_time,
    memo,
    created_at,
    updated_at
FROM schedule_items";

/// Repository interface for schedule items.
pub trait ScheduleItemRepository {
    fn list_items(&self, day_uuid: DayId) -> RepoResult<Vec<ScheduleItem>>;
    fn get_item(&self, item_uuid: ItemId) -> RepoResult<Option<ScheduleItem>>;
    /// Applies a validated partial update to non-ordinal fields.
    fn update_item(&self, item_uuid: ItemId, patch: &ScheduleItemPatch)
        -> RepoResult<ScheduleItem>;
}

/// SQLite-backed schedule item repository.
pub struct SqliteScheduleItemRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteScheduleItemRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["trip_days", "schedule_items"])?;
        Ok(Self { conn })
    }
}

impl ScheduleItemRepository for SqliteScheduleItemRepository<'_> {
    fn list_items(&self, day_uuid: DayId) -> RepoResult<Vec<ScheduleItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "{ITEM_SELECT_SQL}
             WHERE day_uuid = ?1
             ORDER BY seq_no ASC, item_uuid ASC;"
        ))?;
        let mut rows = stmt.query([day_uuid.to_string()])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_item_row(row)?);
        }
        Ok(items)
    }

    fn get_item(&self, item_uuid: ItemId) -> RepoResult<Option<ScheduleItem>> {
        self.conn
            .query_row(
                &format!("{ITEM_SELECT_SQL} WHERE item_uuid = ?1;"),
                [item_uuid.to_string()],
                |row| Ok(parse_item_row(row)),
            )
            .optional()?
            .transpose()
    }

    fn update_item(
        &self,
        item_uuid: ItemId,
        patch: &ScheduleItemPatch,
    ) -> RepoResult<ScheduleItem> {
        let current = self.get_item(item_uuid)?.ok_or(RepoError::NotFound {
            kind: "schedule item",
            id: item_uuid,
        })?;

        let visit_time = match &patch.visit_time {
            Some(raw) => parse_visit_time(raw.as_deref())?,
            None => current.visit_time,
        };
        let memo = match &patch.memo {
            Some(raw) => normalize_memo(raw.as_deref())?,
            None => current.memo,
        };

        self.conn.execute(
            "UPDATE schedule_items
             SET visit_time = ?2,
                 memo = ?3,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE item_uuid = ?1;",
            params![item_uuid.to_string(), format_time(visit_time), memo],
        )?;
        self.get_item(item_uuid)?.ok_or(RepoError::NotFound {
            kind: "schedule item",
            id: item_uuid,
        })
    }
}

/// Inserts one item row at an ordinal reserved by the caller.
pub fn insert_item_row(
    conn: &Connection,
    item_uuid: ItemId,
    day_uuid: DayId,
    seq_no: i64,
    payload: &SchedulePayload,
) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO schedule_items (item_uuid, day_uuid, place_ref, seq_no, visit_time, memo)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
        params![
            item_uuid.to_string(),
            day_uuid.to_string(),
            payload.place_ref,
            seq_no,
            format_time(payload.visit_time),
            payload.memo,
        ],
    )?;
    Ok(())
}

fn format_time(value: Option<NaiveTime>) -> Option<String> {
    value.map(|time| time.format(VISIT_TIME_FORMAT).to_string())
}

fn parse_item_row(row: &Row<'_>) -> RepoResult<ScheduleItem> {
    let item_uuid: String = row.get("item_uuid")?;
    let day_uuid: String = row.get("day_uuid")?;
    let visit_time = row
        .get::<_, Option<String>>("visit_time")?
        .map(|value| parse_time(&value, "schedule_items.visit_time"))
        .transpose()?;
    Ok(ScheduleItem {
        item_uuid: parse_uuid(&item_uuid, "schedule_items.item_uuid")?,
        day_uuid: parse_uuid(&day_uuid, "schedule_items.day_uuid")?,
        place_ref: row.get("place_ref")?,
        seq_no: row.get("seq_no")?,
        visit_time,
        memo: row.get("memo")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
