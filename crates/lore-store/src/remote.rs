//! The secondary store replication targets.
//!
//! Mirrors the local node / type / field layout as per-type tables with the
//! caller's opaque scope columns appended to every row; identity at the
//! remote is `(name, scope...)` rather than `name` alone, so many local
//! stores can share one remote.

use std::collections::BTreeMap;
use std::path::Path;

use lore_core::{parse_document, sanitize_field, sanitize_ident, ChangePayload, LoreError, LoreResult, UNTYPED};
use rusqlite::{Connection, OptionalExtension};

use crate::layout::RESERVED_TABLES;
use crate::schema::{meta_columns, q, table_columns, table_exists};

/// Opaque multi-tenant partitioning keys, e.g. `{team: eng, user: pat}`.
/// Ordered so column layout and WHERE clauses are deterministic.
pub type Scope = BTreeMap<String, String>;

pub struct RemoteStore {
    conn: Connection,
}

impl RemoteStore {
    pub fn open(path: &Path) -> LoreResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| LoreError::Storage(format!("open remote store: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            .map_err(|e| LoreError::Storage(format!("remote pragma: {e}")))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> LoreResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| LoreError::Storage(format!("open remote store: {e}")))?;
        Ok(Self { conn })
    }

    /// Replay one changelog entry against the remote, tagged with `scope`.
    /// Each entry applies in its own transaction so a failed entry leaves
    /// previously applied ones durable (re-push is idempotent).
    pub fn apply(&mut self, scope: &Scope, payload: &ChangePayload) -> LoreResult<()> {
        match payload {
            ChangePayload::Write {
                name,
                node_type,
                content,
            } => self.upsert_node(scope, name, node_type, content),
            ChangePayload::Rm { name, node_type } => self.delete_node(scope, name, node_type),
            ChangePayload::Mv {
                old,
                new,
                node_type,
            } => self.rename_node(scope, old, new, node_type),
            ChangePayload::Cp {
                dst,
                node_type,
                content,
                ..
            } => self.upsert_node(scope, dst, node_type, content),
            ChangePayload::TypeChange {
                name,
                old_type,
                new_type,
                content,
            } => self.change_type(scope, name, old_type, new_type, content),
            ChangePayload::TypeAdd { name } => self.register_type(scope, name),
            ChangePayload::TypeRm { name } => self.unregister_type(scope, name),
        }
    }

    // ------------------------------------------------------------------
    // Replayed mutations
    // ------------------------------------------------------------------

    pub fn upsert_node(
        &mut self,
        scope: &Scope,
        name: &str,
        type_name: &str,
        content: &str,
    ) -> LoreResult<()> {
        let scope_cols = scope_columns(scope)?;
        let doc = parse_document(content);
        let pairs = meta_columns(&doc.meta)?;

        let tx = self
            .conn
            .transaction()
            .map_err(|e| LoreError::Storage(e.to_string()))?;

        ensure_base(&tx, &scope_cols)?;
        let table = ensure_type_table(
            &tx,
            type_name,
            &pairs.iter().map(|(c, _)| c.clone()).collect::<Vec<_>>(),
            &scope_cols,
        )?;

        // Upsert on the composite (name, scope...) key.
        delete_scoped(&tx, &table, name, &scope_cols)?;
        let mut columns: Vec<String> = vec!["name".into(), "_content".into()];
        let mut values: Vec<String> = vec![name.to_string(), content.to_string()];
        for (col, encoded) in &pairs {
            columns.push(col.clone());
            values.push(encoded.clone());
        }
        insert_scoped(&tx, &table, &columns, &values, &scope_cols)?;

        delete_scoped(&tx, "nodes", name, &scope_cols)?;
        insert_scoped(
            &tx,
            "nodes",
            &["name".into(), "type".into()],
            &[name.to_string(), type_name.to_string()],
            &scope_cols,
        )?;

        if type_name != UNTYPED && !type_registered(&tx, type_name, &scope_cols)? {
            insert_scoped(
                &tx,
                "types",
                &["name".into()],
                &[type_name.to_string()],
                &scope_cols,
            )?;
        }

        tx.commit().map_err(|e| LoreError::Storage(e.to_string()))
    }

    pub fn delete_node(&mut self, scope: &Scope, name: &str, type_name: &str) -> LoreResult<()> {
        let scope_cols = scope_columns(scope)?;
        let tx = self
            .conn
            .transaction()
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        ensure_base(&tx, &scope_cols)?;

        let table = sanitize_ident(type_name);
        if table_exists(&tx, &table)? {
            delete_scoped(&tx, &table, name, &scope_cols)?;
        }
        delete_scoped(&tx, "nodes", name, &scope_cols)?;
        tx.commit().map_err(|e| LoreError::Storage(e.to_string()))
    }

    pub fn rename_node(
        &mut self,
        scope: &Scope,
        old: &str,
        new: &str,
        type_name: &str,
    ) -> LoreResult<()> {
        let scope_cols = scope_columns(scope)?;
        let tx = self
            .conn
            .transaction()
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        ensure_base(&tx, &scope_cols)?;

        let table = sanitize_ident(type_name);
        if table_exists(&tx, &table)? {
            rename_scoped(&tx, &table, old, new, &scope_cols)?;
        }
        rename_scoped(&tx, "nodes", old, new, &scope_cols)?;
        tx.commit().map_err(|e| LoreError::Storage(e.to_string()))
    }

    pub fn change_type(
        &mut self,
        scope: &Scope,
        name: &str,
        old_type: &str,
        new_type: &str,
        content: &str,
    ) -> LoreResult<()> {
        {
            let scope_cols = scope_columns(scope)?;
            let tx = self
                .conn
                .transaction()
                .map_err(|e| LoreError::Storage(e.to_string()))?;
            ensure_base(&tx, &scope_cols)?;
            let old_table = sanitize_ident(old_type);
            if table_exists(&tx, &old_table)? {
                delete_scoped(&tx, &old_table, name, &scope_cols)?;
            }
            tx.commit().map_err(|e| LoreError::Storage(e.to_string()))?;
        }
        self.upsert_node(scope, name, new_type, content)
    }

    pub fn register_type(&mut self, scope: &Scope, type_name: &str) -> LoreResult<()> {
        let scope_cols = scope_columns(scope)?;
        let tx = self
            .conn
            .transaction()
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        ensure_base(&tx, &scope_cols)?;
        if !type_registered(&tx, type_name, &scope_cols)? {
            insert_scoped(
                &tx,
                "types",
                &["name".into()],
                &[type_name.to_string()],
                &scope_cols,
            )?;
        }
        tx.commit().map_err(|e| LoreError::Storage(e.to_string()))
    }

    pub fn unregister_type(&mut self, scope: &Scope, type_name: &str) -> LoreResult<()> {
        let scope_cols = scope_columns(scope)?;
        let tx = self
            .conn
            .transaction()
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        ensure_base(&tx, &scope_cols)?;
        delete_scoped(&tx, "types", type_name, &scope_cols)?;
        tx.commit().map_err(|e| LoreError::Storage(e.to_string()))
    }

    // ------------------------------------------------------------------
    // Pull-side reads
    // ------------------------------------------------------------------

    /// `(name, type)` pairs in the scope, name-ordered.
    pub fn nodes_in_scope(&self, scope: &Scope) -> LoreResult<Vec<(String, String)>> {
        let scope_cols = scope_columns(scope)?;
        if !table_exists(&self.conn, "nodes")? {
            return Ok(Vec::new());
        }
        let mut sql = "SELECT name, type FROM nodes".to_string();
        if !scope_cols.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&scope_clause(1, &scope_cols));
        }
        sql.push_str(" ORDER BY name");

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        let params: Vec<&dyn rusqlite::types::ToSql> = scope_cols
            .iter()
            .map(|(_, v)| v as &dyn rusqlite::types::ToSql)
            .collect();
        let result = stmt
            .query_map(params.as_slice(), |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| LoreError::Storage(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| LoreError::Storage(e.to_string()));
        result
    }

    /// A scoped node's raw content.
    pub fn content_of(
        &self,
        scope: &Scope,
        name: &str,
        type_name: &str,
    ) -> LoreResult<Option<String>> {
        let scope_cols = scope_columns(scope)?;
        let table = sanitize_ident(type_name);
        if !table_exists(&self.conn, &table)? {
            return Ok(None);
        }

        let mut sql = format!("SELECT _content FROM {} WHERE name = ?1", q(&table));
        if !scope_cols.is_empty() {
            sql.push_str(" AND ");
            sql.push_str(&scope_clause(2, &scope_cols));
        }
        let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&name];
        for (_, v) in &scope_cols {
            params.push(v);
        }
        self.conn
            .query_row(&sql, params.as_slice(), |row| row.get(0))
            .optional()
            .map_err(|e| LoreError::Storage(e.to_string()))
    }

    /// Registered (non-sentinel) types in the scope.
    pub fn types_in_scope(&self, scope: &Scope) -> LoreResult<Vec<String>> {
        let scope_cols = scope_columns(scope)?;
        if !table_exists(&self.conn, "types")? {
            return Ok(Vec::new());
        }
        let mut sql = "SELECT name FROM types".to_string();
        if !scope_cols.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&scope_clause(1, &scope_cols));
        }
        sql.push_str(" ORDER BY name");
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        let params: Vec<&dyn rusqlite::types::ToSql> = scope_cols
            .iter()
            .map(|(_, v)| v as &dyn rusqlite::types::ToSql)
            .collect();
        let result = stmt
            .query_map(params.as_slice(), |row| row.get(0))
            .map_err(|e| LoreError::Storage(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| LoreError::Storage(e.to_string()));
        result
    }
}

// ---------------------------------------------------------------------------
// Scope plumbing
// ---------------------------------------------------------------------------

/// Sanitize scope keys into `(column, value)` pairs; keys may not land on
/// the row columns the mirror owns.
fn scope_columns(scope: &Scope) -> LoreResult<Vec<(String, String)>> {
    let mut out: Vec<(String, String)> = Vec::new();
    for (key, value) in scope {
        let col = sanitize_field(key);
        if ["name", "type", "_content"].contains(&col.as_str()) {
            return Err(LoreError::SchemaConflict(format!(
                "scope key '{key}' collides with reserved column '{col}'"
            )));
        }
        if out.iter().any(|(c, _)| *c == col) {
            return Err(LoreError::SchemaConflict(format!(
                "scope keys collide on column '{col}'"
            )));
        }
        out.push((col, value.clone()));
    }
    Ok(out)
}

fn scope_clause(start_idx: usize, scope_cols: &[(String, String)]) -> String {
    scope_cols
        .iter()
        .enumerate()
        .map(|(i, (col, _))| format!("{} = ?{}", q(col), start_idx + i))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn add_scope_columns(
    conn: &Connection,
    table: &str,
    scope_cols: &[(String, String)],
) -> LoreResult<()> {
    let existing = table_columns(conn, table)?;
    for (col, _) in scope_cols {
        if !existing.contains(col) {
            conn.execute_batch(&format!("ALTER TABLE {} ADD COLUMN {} TEXT", q(table), q(col)))
                .map_err(|e| LoreError::Storage(format!("add scope column: {e}")))?;
        }
    }
    Ok(())
}

fn ensure_base(conn: &Connection, scope_cols: &[(String, String)]) -> LoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS nodes (name TEXT NOT NULL, type TEXT NOT NULL);
         CREATE TABLE IF NOT EXISTS types (name TEXT NOT NULL);",
    )
    .map_err(|e| LoreError::Storage(format!("create remote base: {e}")))?;
    add_scope_columns(conn, "nodes", scope_cols)?;
    add_scope_columns(conn, "types", scope_cols)?;
    Ok(())
}

fn ensure_type_table(
    conn: &Connection,
    type_name: &str,
    field_cols: &[String],
    scope_cols: &[(String, String)],
) -> LoreResult<String> {
    let table = sanitize_ident(type_name);
    let folded = table.to_lowercase();
    if RESERVED_TABLES.contains(&folded.as_str()) || folded.starts_with("sqlite_") {
        return Err(LoreError::SchemaConflict(format!(
            "type name '{type_name}' shadows internal table '{table}'"
        )));
    }

    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (name TEXT NOT NULL, _content TEXT NOT NULL DEFAULT '')",
        q(&table)
    ))
    .map_err(|e| LoreError::Storage(format!("create remote type table: {e}")))?;

    let existing = table_columns(conn, &table)?;
    for col in field_cols {
        if !existing.contains(col) {
            conn.execute_batch(&format!("ALTER TABLE {} ADD COLUMN {} TEXT", q(&table), q(col)))
                .map_err(|e| LoreError::Storage(format!("add remote column: {e}")))?;
        }
    }
    add_scope_columns(conn, &table, scope_cols)?;
    Ok(table)
}

fn delete_scoped(
    conn: &Connection,
    table: &str,
    name: &str,
    scope_cols: &[(String, String)],
) -> LoreResult<()> {
    let mut sql = format!("DELETE FROM {} WHERE name = ?1", q(table));
    if !scope_cols.is_empty() {
        sql.push_str(" AND ");
        sql.push_str(&scope_clause(2, scope_cols));
    }
    let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&name];
    for (_, v) in scope_cols {
        params.push(v);
    }
    conn.execute(&sql, params.as_slice())
        .map_err(|e| LoreError::Storage(e.to_string()))?;
    Ok(())
}

fn insert_scoped(
    conn: &Connection,
    table: &str,
    columns: &[String],
    values: &[String],
    scope_cols: &[(String, String)],
) -> LoreResult<()> {
    let mut all_cols: Vec<String> = columns.to_vec();
    let mut all_vals: Vec<&str> = values.iter().map(String::as_str).collect();
    for (col, val) in scope_cols {
        all_cols.push(col.clone());
        all_vals.push(val);
    }

    let placeholders: Vec<String> = (1..=all_cols.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        q(table),
        all_cols.iter().map(|c| q(c)).collect::<Vec<_>>().join(", "),
        placeholders.join(", ")
    );
    let params: Vec<&dyn rusqlite::types::ToSql> = all_vals
        .iter()
        .map(|v| v as &dyn rusqlite::types::ToSql)
        .collect();
    conn.execute(&sql, params.as_slice())
        .map_err(|e| LoreError::Storage(e.to_string()))?;
    Ok(())
}

fn rename_scoped(
    conn: &Connection,
    table: &str,
    old: &str,
    new: &str,
    scope_cols: &[(String, String)],
) -> LoreResult<()> {
    let mut sql = format!("UPDATE {} SET name = ?1 WHERE name = ?2", q(table));
    if !scope_cols.is_empty() {
        sql.push_str(" AND ");
        sql.push_str(&scope_clause(3, scope_cols));
    }
    let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&new, &old];
    for (_, v) in scope_cols {
        params.push(v);
    }
    conn.execute(&sql, params.as_slice())
        .map_err(|e| LoreError::Storage(e.to_string()))?;
    Ok(())
}

fn type_registered(
    conn: &Connection,
    type_name: &str,
    scope_cols: &[(String, String)],
) -> LoreResult<bool> {
    let mut sql = "SELECT 1 FROM types WHERE name = ?1".to_string();
    if !scope_cols.is_empty() {
        sql.push_str(" AND ");
        sql.push_str(&scope_clause(2, scope_cols));
    }
    let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&type_name];
    for (_, v) in scope_cols {
        params.push(v);
    }
    let found: Option<i64> = conn
        .query_row(&sql, params.as_slice(), |row| row.get(0))
        .optional()
        .map_err(|e| LoreError::Storage(e.to_string()))?;
    Ok(found.is_some())
}
