//! SQLite-backed [`PositionStore`].
//!
//! # Responsibility
//! - Map one [`Collection`] onto its table, group column and ordinal column.
//! - Translate `UNIQUE` collisions into invariant violations; other
//!   constraint failures stay storage errors.
//!
//! # Invariants
//! - Mutations require an open transaction on the connection.
//! - Ordinal writes touch exactly one row each.

use super::{
    Collection, EntityId, GroupId, Placement, PositionError, PositionResult, PositionStore,
    ScopeId, Slot,
};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

/// Table layout of one ordered collection.
struct Layout {
    table: &'static str,
    entity_col: &'static str,
    group_col: &'static str,
    ordinal_col: &'static str,
    group_table: &'static str,
    group_pk: &'static str,
    scope_col: &'static str,
}

const DAYS_LAYOUT: Layout = Layout {
    table: "trip_days",
    entity_col: "day_uuid",
    group_col: "trip_uuid",
    ordinal_col: "day_no",
    group_table: "trips",
    group_pk: "trip_uuid",
    scope_col: "trip_uuid",
};

const ITEMS_LAYOUT: Layout = Layout {
    table: "schedule_items",
    entity_col: "item_uuid",
    group_col: "day_uuid",
    ordinal_col: "seq_no",
    group_table: "trip_days",
    group_pk: "day_uuid",
    scope_col: "trip_uuid",
};

fn layout(collection: Collection) -> &'static Layout {
    match collection {
        Collection::Days => &DAYS_LAYOUT,
        Collection::Items => &ITEMS_LAYOUT,
    }
}

/// Position store over one collection of a migrated connection.
pub struct SqlitePositionStore<'conn> {
    conn: &'conn Connection,
    collection: Collection,
}

impl<'conn> SqlitePositionStore<'conn> {
    pub fn new(conn: &'conn Connection, collection: Collection) -> Self {
        Self { conn, collection }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// Every group of this collection, ascending by id.
    pub fn list_groups(&self) -> PositionResult<Vec<GroupId>> {
        let layout = layout(self.collection);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {pk} FROM {table} ORDER BY {pk} ASC;",
            pk = layout.group_pk,
            table = layout.group_table,
        ))?;
        let mut rows = stmt.query([])?;
        let mut groups = Vec::new();
        while let Some(row) = rows.next()? {
            let raw: String = row.get(0)?;
            groups.push(parse_uuid(&raw, layout.group_pk)?);
        }
        Ok(groups)
    }

    fn ensure_transaction(&self) -> PositionResult<()> {
        if self.conn.is_autocommit() {
            return Err(PositionError::TransactionRequired);
        }
        Ok(())
    }

    fn map_write_error(&self, group: GroupId, err: rusqlite::Error) -> PositionError {
        if let rusqlite::Error::SqliteFailure(failure, _) = &err {
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE {
                return PositionError::InvariantViolation {
                    group,
                    detail: format!("{} ordinal collision: {err}", self.collection),
                };
            }
        }
        PositionError::from(err)
    }
}

impl PositionStore for SqlitePositionStore<'_> {
    fn lock_group(&self, group: GroupId) -> PositionResult<()> {
        // SQLite locks the whole database; the IMMEDIATE transaction already
        // holds the write lock, so only existence is checked here.
        self.ensure_transaction()?;
        let layout = layout(self.collection);
        let exists: i64 = self.conn.query_row(
            &format!(
                "SELECT EXISTS(SELECT 1 FROM {table} WHERE {pk} = ?1);",
                table = layout.group_table,
                pk = layout.group_pk,
            ),
            [group.to_string()],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Err(PositionError::GroupNotFound(group));
        }
        Ok(())
    }

    fn group_scope(&self, group: GroupId) -> PositionResult<Option<ScopeId>> {
        let layout = layout(self.collection);
        let raw: Option<String> = self
            .conn
            .query_row(
                &format!(
                    "SELECT {scope} FROM {table} WHERE {pk} = ?1;",
                    scope = layout.scope_col,
                    table = layout.group_table,
                    pk = layout.group_pk,
                ),
                [group.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|value| parse_uuid(&value, layout.scope_col))
            .transpose()
    }

    fn read_group(&self, group: GroupId) -> PositionResult<Vec<Slot>> {
        let layout = layout(self.collection);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {entity}, {ordinal}
             FROM {table}
             WHERE {group_col} = ?1
             ORDER BY {ordinal} ASC, {entity} ASC;",
            entity = layout.entity_col,
            ordinal = layout.ordinal_col,
            table = layout.table,
            group_col = layout.group_col,
        ))?;
        let mut rows = stmt.query([group.to_string()])?;
        let mut slots = Vec::new();
        while let Some(row) = rows.next()? {
            let raw: String = row.get(0)?;
            slots.push(Slot {
                entity: parse_uuid(&raw, layout.entity_col)?,
                ordinal: row.get(1)?,
            });
        }
        Ok(slots)
    }

    fn locate(&self, entity: EntityId) -> PositionResult<Option<Placement>> {
        let layout = layout(self.collection);
        let row: Option<(String, i64)> = self
            .conn
            .query_row(
                &format!(
                    "SELECT {group_col}, {ordinal} FROM {table} WHERE {entity} = ?1;",
                    group_col = layout.group_col,
                    ordinal = layout.ordinal_col,
                    table = layout.table,
                    entity = layout.entity_col,
                ),
                [entity.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(group, ordinal)| {
            Ok(Placement {
                entity,
                group: parse_uuid(&group, layout.group_col)?,
                ordinal,
            })
        })
        .transpose()
    }

    fn write_position(
        &self,
        entity: EntityId,
        group: GroupId,
        ordinal: i64,
    ) -> PositionResult<()> {
        self.ensure_transaction()?;
        let layout = layout(self.collection);
        let changed = self
            .conn
            .execute(
                &format!(
                    "UPDATE {table}
                     SET {group_col} = ?2,
                         {ordinal_col} = ?3,
                         updated_at = (strftime('%s', 'now') * 1000)
                     WHERE {entity} = ?1;",
                    table = layout.table,
                    group_col = layout.group_col,
                    ordinal_col = layout.ordinal_col,
                    entity = layout.entity_col,
                ),
                params![entity.to_string(), group.to_string(), ordinal],
            )
            .map_err(|err| self.map_write_error(group, err))?;
        if changed == 0 {
            return Err(PositionError::EntityNotFound(entity));
        }
        Ok(())
    }

    fn offset_groups(&self, groups: &[GroupId], offset: i64) -> PositionResult<usize> {
        self.ensure_transaction()?;
        let layout = layout(self.collection);
        let sql = format!(
            "UPDATE {table}
             SET {ordinal} = {ordinal} + ?2
             WHERE {group_col} = ?1;",
            table = layout.table,
            ordinal = layout.ordinal_col,
            group_col = layout.group_col,
        );
        let mut touched = 0;
        for group in groups {
            touched += self
                .conn
                .execute(&sql, params![group.to_string(), offset])
                .map_err(|err| self.map_write_error(*group, err))?;
        }
        Ok(touched)
    }

    fn remove_entity(&self, entity: EntityId) -> PositionResult<()> {
        self.ensure_transaction()?;
        let layout = layout(self.collection);
        let changed = self.conn.execute(
            &format!(
                "DELETE FROM {table} WHERE {entity} = ?1;",
                table = layout.table,
                entity = layout.entity_col,
            ),
            [entity.to_string()],
        )?;
        if changed == 0 {
            return Err(PositionError::EntityNotFound(entity));
        }
        Ok(())
    }
}

fn parse_uuid(value: &str, column: &str) -> PositionResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| PositionError::InvalidData(format!("invalid uuid in `{column}`: {value}")))
}
