use lore_core::{sanitize_field, sanitize_ident, LoreError, LoreResult, MetaValue, Metadata};
use rusqlite::{params, Connection, OptionalExtension};

use crate::layout::{Layout, RESERVED_TABLES};

/// Columns every typed row carries regardless of layout; metadata keys may
/// not sanitize onto them.
const FIXED_COLUMNS: &[&str] = &["name", "type", "_content"];

/// Quote an identifier for SQL interpolation. Identifiers are sanitized
/// before they get here, but quoting also keeps SQL keywords usable as
/// field names (`order`, `group`, ...).
pub(crate) fn q(ident: &str) -> String {
    format!("\"{ident}\"")
}

/// Sanitize metadata keys into `(column, encoded value)` pairs, in insertion
/// order. The reserved `type` key is skipped. Two distinct keys landing on
/// the same column, or a key landing on a fixed column, is a conflict that
/// rejects the write.
pub fn meta_columns(meta: &Metadata) -> LoreResult<Vec<(String, String)>> {
    let mut out: Vec<(String, String)> = Vec::new();
    let mut seen: Vec<(String, String)> = Vec::new(); // (column, original key)

    for (key, value) in meta.iter() {
        if key == "type" {
            continue;
        }
        let col = sanitize_field(key);
        if FIXED_COLUMNS.contains(&col.as_str()) {
            return Err(LoreError::SchemaConflict(format!(
                "metadata key '{key}' collides with reserved column '{col}'"
            )));
        }
        if let Some((_, prior)) = seen.iter().find(|(c, _)| *c == col) {
            return Err(LoreError::SchemaConflict(format!(
                "metadata keys '{prior}' and '{key}' collide on column '{col}'"
            )));
        }
        seen.push((col.clone(), key.to_string()));
        out.push((col, value.encode()));
    }

    Ok(out)
}

/// The typed-row registry: tracks `type -> ordered field set` and
/// materializes it in one of the two storage layouts.
#[derive(Debug, Clone, Copy)]
pub struct SchemaRegistry {
    layout: Layout,
}

impl SchemaRegistry {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// The table a type's rows live in.
    pub fn resolve_table(&self, type_name: &str) -> String {
        match self.layout {
            Layout::Unified => "_data".to_string(),
            Layout::PerType => sanitize_ident(type_name),
        }
    }

    /// Validate a type's table identifier against reserved names and against
    /// other live types whose identifiers would fold onto it (SQLite table
    /// names are case-insensitive).
    fn checked_table(&self, conn: &Connection, type_name: &str) -> LoreResult<String> {
        let ident = sanitize_ident(type_name);
        let folded = ident.to_lowercase();
        if RESERVED_TABLES.contains(&folded.as_str()) || folded.starts_with("sqlite_") {
            return Err(LoreError::SchemaConflict(format!(
                "type name '{type_name}' shadows internal table '{ident}'"
            )));
        }

        let mut stmt = conn
            .prepare("SELECT name FROM types UNION SELECT DISTINCT type FROM nodes")
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        let known = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| LoreError::Storage(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| LoreError::Storage(e.to_string()))?;

        for other in known {
            if other != type_name && sanitize_ident(&other).to_lowercase() == folded {
                return Err(LoreError::SchemaConflict(format!(
                    "type names '{other}' and '{type_name}' collide on table '{ident}'"
                )));
            }
        }

        Ok(ident)
    }

    /// Validate a type name for registration without creating storage.
    pub fn validate_type_name(&self, conn: &Connection, type_name: &str) -> LoreResult<()> {
        match self.layout {
            Layout::PerType => self.checked_table(conn, type_name).map(|_| ()),
            Layout::Unified => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Field sets
    // ------------------------------------------------------------------

    /// A type's ordered field set (sanitized column names).
    pub fn fields(&self, conn: &Connection, type_name: &str) -> LoreResult<Vec<String>> {
        match self.layout {
            Layout::PerType => {
                let table = sanitize_ident(type_name);
                if !table_exists(conn, &table)? {
                    return Ok(Vec::new());
                }
                Ok(table_columns(conn, &table)?
                    .into_iter()
                    .filter(|c| !FIXED_COLUMNS.contains(&c.as_str()))
                    .collect())
            }
            Layout::Unified => {
                let mut stmt = conn
                    .prepare("SELECT field FROM _type_fields WHERE type = ?1 ORDER BY ord")
                    .map_err(|e| LoreError::Storage(e.to_string()))?;
                let result = stmt
                    .query_map(params![type_name], |row| row.get(0))
                    .map_err(|e| LoreError::Storage(e.to_string()))?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| LoreError::Storage(e.to_string()));
                result
            }
        }
    }

    /// Additively widen a type's field set with new columns (already
    /// sanitized), creating the type's storage lazily.
    pub fn widen(&self, conn: &Connection, type_name: &str, cols: &[String]) -> LoreResult<()> {
        match self.layout {
            Layout::PerType => {
                let table = self.checked_table(conn, type_name)?;
                conn.execute_batch(&format!(
                    "CREATE TABLE IF NOT EXISTS {} (name TEXT PRIMARY KEY, _content TEXT NOT NULL DEFAULT '')",
                    q(&table)
                ))
                .map_err(|e| LoreError::Storage(format!("create type table: {e}")))?;

                let existing = table_columns(conn, &table)?;
                for col in cols {
                    if !existing.contains(col) {
                        conn.execute_batch(&format!(
                            "ALTER TABLE {} ADD COLUMN {} TEXT",
                            q(&table),
                            q(col)
                        ))
                        .map_err(|e| LoreError::Storage(format!("add column: {e}")))?;
                        tracing::debug!(node_type = type_name, field = col.as_str(), "schema widened");
                    }
                }
            }
            Layout::Unified => {
                let current = self.fields(conn, type_name)?;
                let data_cols = table_columns(conn, "_data")?;
                let mut next_ord = current.len() as i64;
                for col in cols {
                    if current.contains(col) {
                        continue;
                    }
                    if !data_cols.contains(col) {
                        conn.execute_batch(&format!(
                            "ALTER TABLE _data ADD COLUMN {} TEXT",
                            q(col)
                        ))
                        .map_err(|e| LoreError::Storage(format!("add column: {e}")))?;
                    }
                    conn.execute(
                        "INSERT OR IGNORE INTO _type_fields (type, field, ord) VALUES (?1, ?2, ?3)",
                        params![type_name, col, next_ord],
                    )
                    .map_err(|e| LoreError::Storage(e.to_string()))?;
                    next_ord += 1;
                    tracing::debug!(node_type = type_name, field = col.as_str(), "schema widened");
                }
            }
        }
        Ok(())
    }

    /// Set a type's field set to exactly `fields` (sanitized on the way in):
    /// missing columns are added, columns outside the set are dropped along
    /// with their values. Used by schema freezing.
    pub fn set_fields(&self, conn: &Connection, type_name: &str, fields: &[String]) -> LoreResult<()> {
        let wanted: Vec<String> = fields.iter().map(|f| sanitize_field(f)).collect();
        self.widen(conn, type_name, &wanted)?;

        match self.layout {
            Layout::PerType => {
                let table = sanitize_ident(type_name);
                let extra: Vec<String> = table_columns(conn, &table)?
                    .into_iter()
                    .filter(|c| !FIXED_COLUMNS.contains(&c.as_str()) && !wanted.contains(c))
                    .collect();
                for col in extra {
                    conn.execute_batch(&format!(
                        "ALTER TABLE {} DROP COLUMN {}",
                        q(&table),
                        q(&col)
                    ))
                    .map_err(|e| LoreError::Storage(format!("drop column: {e}")))?;
                }
            }
            Layout::Unified => {
                let extra: Vec<String> = self
                    .fields(conn, type_name)?
                    .into_iter()
                    .filter(|c| !wanted.contains(c))
                    .collect();
                for col in extra {
                    conn.execute(
                        "DELETE FROM _type_fields WHERE type = ?1 AND field = ?2",
                        params![type_name, col],
                    )
                    .map_err(|e| LoreError::Storage(e.to_string()))?;
                    conn.execute(
                        &format!("UPDATE _data SET {} = NULL WHERE type = ?1", q(&col)),
                        params![type_name],
                    )
                    .map_err(|e| LoreError::Storage(e.to_string()))?;

                    let still_used: Option<i64> = conn
                        .query_row(
                            "SELECT 1 FROM _type_fields WHERE field = ?1 LIMIT 1",
                            params![col],
                            |row| row.get(0),
                        )
                        .optional()
                        .map_err(|e| LoreError::Storage(e.to_string()))?;
                    if still_used.is_none() {
                        conn.execute_batch(&format!("ALTER TABLE _data DROP COLUMN {}", q(&col)))
                            .map_err(|e| LoreError::Storage(format!("drop column: {e}")))?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Rename a type, carrying its table (or field slice) and index rows
    /// along. The destination must not already be a live type.
    pub fn rename(&self, conn: &Connection, old: &str, new: &str) -> LoreResult<()> {
        let occupied: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM nodes WHERE type = ?1 UNION SELECT 1 FROM types WHERE name = ?1 LIMIT 1",
                params![new],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        if occupied.is_some() {
            return Err(LoreError::SchemaConflict(format!(
                "cannot rename type '{old}': '{new}' already exists"
            )));
        }

        match self.layout {
            Layout::PerType => {
                let new_table = self.checked_table(conn, new)?;
                let old_table = sanitize_ident(old);
                if table_exists(conn, &old_table)? {
                    conn.execute_batch(&format!(
                        "ALTER TABLE {} RENAME TO {}",
                        q(&old_table),
                        q(&new_table)
                    ))
                    .map_err(|e| LoreError::Storage(format!("rename table: {e}")))?;
                }
            }
            Layout::Unified => {
                conn.execute(
                    "UPDATE _type_fields SET type = ?1 WHERE type = ?2",
                    params![new, old],
                )
                .map_err(|e| LoreError::Storage(e.to_string()))?;
                conn.execute("UPDATE _data SET type = ?1 WHERE type = ?2", params![new, old])
                    .map_err(|e| LoreError::Storage(e.to_string()))?;
            }
        }

        conn.execute("UPDATE nodes SET type = ?1 WHERE type = ?2", params![new, old])
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        conn.execute("UPDATE types SET name = ?1 WHERE name = ?2", params![new, old])
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Drop a type's storage and registry entry. Callers migrate rows away
    /// first; any rows still present are discarded with the table.
    pub fn drop_type(&self, conn: &Connection, type_name: &str) -> LoreResult<()> {
        match self.layout {
            Layout::PerType => {
                let table = sanitize_ident(type_name);
                if !RESERVED_TABLES.contains(&table.to_lowercase().as_str()) {
                    conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", q(&table)))
                        .map_err(|e| LoreError::Storage(format!("drop type table: {e}")))?;
                }
            }
            Layout::Unified => {
                self.set_fields(conn, type_name, &[])?;
            }
        }
        conn.execute("DELETE FROM types WHERE name = ?1", params![type_name])
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Typed rows
    // ------------------------------------------------------------------

    /// Upsert a node's typed row, widening the schema with any new keys.
    /// A replaced row's columns outside this write's metadata reset to NULL.
    pub fn upsert_row(
        &self,
        conn: &Connection,
        type_name: &str,
        name: &str,
        content: &str,
        meta: &Metadata,
    ) -> LoreResult<()> {
        let pairs = meta_columns(meta)?;
        let cols: Vec<String> = pairs.iter().map(|(c, _)| c.clone()).collect();
        self.widen(conn, type_name, &cols)?;

        let table = self.resolve_table(type_name);
        let mut columns: Vec<String> = vec!["name".into(), "_content".into()];
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(name.to_string()), Box::new(content.to_string())];
        if self.layout == Layout::Unified {
            columns.insert(1, "type".into());
            values.insert(1, Box::new(type_name.to_string()));
        }
        for (col, encoded) in pairs {
            columns.push(col);
            values.push(Box::new(encoded));
        }

        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            q(&table),
            columns.iter().map(|c| q(c)).collect::<Vec<_>>().join(", "),
            placeholders.join(", ")
        );
        let params_refs: Vec<&dyn rusqlite::types::ToSql> =
            values.iter().map(|v| v.as_ref()).collect();
        conn.execute(&sql, params_refs.as_slice())
            .map_err(|e| LoreError::Storage(format!("upsert row: {e}")))?;
        Ok(())
    }

    /// Read a node's raw content and its typed-column projection (sanitized
    /// keys, in field order).
    pub fn read_row(
        &self,
        conn: &Connection,
        type_name: &str,
        name: &str,
    ) -> LoreResult<Option<(String, Metadata)>> {
        let table = self.resolve_table(type_name);
        if self.layout == Layout::PerType && !table_exists(conn, &table)? {
            return Ok(None);
        }

        let fields = self.fields(conn, type_name)?;
        let mut select: Vec<String> = vec![q("_content")];
        select.extend(fields.iter().map(|f| q(f)));
        let sql = format!(
            "SELECT {} FROM {} WHERE name = ?1",
            select.join(", "),
            q(&table)
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        let row = stmt
            .query_row(params![name], |row| {
                let content: String = row.get(0)?;
                let mut meta = Metadata::new();
                for (idx, field) in fields.iter().enumerate() {
                    let value: Option<String> = row.get(idx + 1)?;
                    if let Some(raw) = value {
                        meta.insert(field.clone(), MetaValue::decode(&raw));
                    }
                }
                Ok((content, meta))
            })
            .optional()
            .map_err(|e| LoreError::Storage(e.to_string()))?;

        Ok(row)
    }

    pub fn delete_row(&self, conn: &Connection, type_name: &str, name: &str) -> LoreResult<()> {
        let table = self.resolve_table(type_name);
        if self.layout == Layout::PerType && !table_exists(conn, &table)? {
            return Ok(());
        }
        conn.execute(&format!("DELETE FROM {} WHERE name = ?1", q(&table)), params![name])
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Rename a row in place (used by `mv`).
    pub fn move_row(&self, conn: &Connection, type_name: &str, old: &str, new: &str) -> LoreResult<()> {
        let table = self.resolve_table(type_name);
        if self.layout == Layout::PerType && !table_exists(conn, &table)? {
            return Ok(());
        }
        conn.execute(
            &format!("UPDATE {} SET name = ?1 WHERE name = ?2", q(&table)),
            params![new, old],
        )
        .map_err(|e| LoreError::Storage(e.to_string()))?;
        Ok(())
    }

    /// `(name, raw content)` pairs for one type, name-ordered.
    pub fn rows_of_type(&self, conn: &Connection, type_name: &str) -> LoreResult<Vec<(String, String)>> {
        let table = self.resolve_table(type_name);
        if self.layout == Layout::PerType && !table_exists(conn, &table)? {
            return Ok(Vec::new());
        }
        let sql = match self.layout {
            Layout::PerType => format!("SELECT name, _content FROM {} ORDER BY name", q(&table)),
            Layout::Unified => "SELECT name, _content FROM _data WHERE type = ?1 ORDER BY name".into(),
        };
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(String, String)> {
            Ok((row.get(0)?, row.get(1)?))
        };
        let rows = match self.layout {
            Layout::PerType => stmt
                .query_map([], map_row)
                .map_err(|e| LoreError::Storage(e.to_string()))?
                .collect::<Result<Vec<_>, _>>(),
            Layout::Unified => stmt
                .query_map(params![type_name], map_row)
                .map_err(|e| LoreError::Storage(e.to_string()))?
                .collect::<Result<Vec<_>, _>>(),
        };
        rows.map_err(|e| LoreError::Storage(e.to_string()))
    }

    /// `(name, raw content)` pairs across every type, name-ordered.
    pub fn all_rows(&self, conn: &Connection) -> LoreResult<Vec<(String, String)>> {
        let mut rows = match self.layout {
            Layout::Unified => {
                let mut stmt = conn
                    .prepare("SELECT name, _content FROM _data")
                    .map_err(|e| LoreError::Storage(e.to_string()))?;
                let result = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                    .map_err(|e| LoreError::Storage(e.to_string()))?
                    .collect::<Result<Vec<(String, String)>, _>>()
                    .map_err(|e| LoreError::Storage(e.to_string()))?;
                result
            }
            Layout::PerType => {
                let mut out = Vec::new();
                for t in live_types(conn)? {
                    out.extend(self.rows_of_type(conn, &t)?);
                }
                out
            }
        };
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(rows)
    }

    /// `(name, encoded tags)` pairs across every type carrying a `tags`
    /// field. This reads the typed projection, not the raw documents.
    pub fn tagged_rows(&self, conn: &Connection) -> LoreResult<Vec<(String, String)>> {
        let mut out: Vec<(String, String)> = Vec::new();
        match self.layout {
            Layout::Unified => {
                if table_columns(conn, "_data")?.iter().any(|c| c == "tags") {
                    let mut stmt = conn
                        .prepare("SELECT name, tags FROM _data WHERE tags IS NOT NULL")
                        .map_err(|e| LoreError::Storage(e.to_string()))?;
                    let rows = stmt
                        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                        .map_err(|e| LoreError::Storage(e.to_string()))?
                        .collect::<Result<Vec<(String, String)>, _>>()
                        .map_err(|e| LoreError::Storage(e.to_string()))?;
                    out.extend(rows);
                }
            }
            Layout::PerType => {
                for t in live_types(conn)? {
                    if !self.fields(conn, &t)?.iter().any(|f| f == "tags") {
                        continue;
                    }
                    let table = sanitize_ident(&t);
                    let mut stmt = conn
                        .prepare(&format!(
                            "SELECT name, tags FROM {} WHERE tags IS NOT NULL",
                            q(&table)
                        ))
                        .map_err(|e| LoreError::Storage(e.to_string()))?;
                    let rows = stmt
                        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                        .map_err(|e| LoreError::Storage(e.to_string()))?
                        .collect::<Result<Vec<(String, String)>, _>>()
                        .map_err(|e| LoreError::Storage(e.to_string()))?;
                    out.extend(rows);
                }
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

/// Types with at least one live node.
pub fn live_types(conn: &Connection) -> LoreResult<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT DISTINCT type FROM nodes ORDER BY type")
        .map_err(|e| LoreError::Storage(e.to_string()))?;
    let result = stmt
        .query_map([], |row| row.get(0))
        .map_err(|e| LoreError::Storage(e.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| LoreError::Storage(e.to_string()));
    result
}

pub fn table_exists(conn: &Connection, table: &str) -> LoreResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| LoreError::Storage(e.to_string()))?;
    Ok(found.is_some())
}

pub fn table_columns(conn: &Connection, table: &str) -> LoreResult<Vec<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", q(table)))
        .map_err(|e| LoreError::Storage(e.to_string()))?;
    let result = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(|e| LoreError::Storage(e.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| LoreError::Storage(e.to_string()));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout;

    fn setup(layout_kind: Layout) -> (Connection, SchemaRegistry) {
        let conn = Connection::open_in_memory().unwrap();
        layout::bind(&conn, layout_kind).unwrap();
        (conn, SchemaRegistry::new(layout_kind))
    }

    fn meta_of(pairs: &[(&str, &str)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), MetaValue::Text(v.to_string())))
            .collect()
    }

    #[test]
    fn per_type_widen_grows_in_order() {
        let (conn, reg) = setup(Layout::PerType);
        reg.widen(&conn, "paper", &["author".into()]).unwrap();
        reg.widen(&conn, "paper", &["year".into(), "author".into()])
            .unwrap();
        assert_eq!(reg.fields(&conn, "paper").unwrap(), vec!["author", "year"]);
        assert_eq!(reg.resolve_table("paper"), "paper");
    }

    #[test]
    fn unified_shares_columns_but_tracks_fields_per_type() {
        let (conn, reg) = setup(Layout::Unified);
        reg.widen(&conn, "paper", &["author".into()]).unwrap();
        reg.widen(&conn, "book", &["author".into(), "isbn".into()])
            .unwrap();

        // One physical column, two registry rows.
        let cols = table_columns(&conn, "_data").unwrap();
        assert_eq!(cols.iter().filter(|c| *c == "author").count(), 1);
        assert_eq!(reg.fields(&conn, "paper").unwrap(), vec!["author"]);
        assert_eq!(reg.fields(&conn, "book").unwrap(), vec!["author", "isbn"]);
    }

    #[test]
    fn upsert_and_read_round_trip() {
        for layout_kind in [Layout::PerType, Layout::Unified] {
            let (conn, reg) = setup(layout_kind);
            let meta = meta_of(&[("Author", "doe"), ("Year", "1999")]);
            reg.upsert_row(&conn, "paper", "p1", "raw content", &meta)
                .unwrap();

            let (content, projected) = reg.read_row(&conn, "paper", "p1").unwrap().unwrap();
            assert_eq!(content, "raw content");
            assert_eq!(projected.get("author").unwrap().as_text(), Some("doe"));
            assert_eq!(projected.get("year").unwrap().as_text(), Some("1999"));
        }
    }

    #[test]
    fn replace_clears_stale_fields() {
        let (conn, reg) = setup(Layout::PerType);
        reg.upsert_row(&conn, "paper", "p1", "one", &meta_of(&[("author", "doe")]))
            .unwrap();
        reg.upsert_row(&conn, "paper", "p1", "two", &meta_of(&[("year", "2001")]))
            .unwrap();

        let (_, projected) = reg.read_row(&conn, "paper", "p1").unwrap().unwrap();
        assert!(projected.get("author").is_none());
        assert_eq!(projected.get("year").unwrap().as_text(), Some("2001"));
    }

    #[test]
    fn list_values_round_trip_through_separator() {
        let (conn, reg) = setup(Layout::Unified);
        let mut meta = Metadata::new();
        meta.insert(
            "tags",
            MetaValue::List(vec!["a".into(), "b".into(), "c".into()]),
        );
        reg.upsert_row(&conn, "note", "n1", "x", &meta).unwrap();
        let (_, projected) = reg.read_row(&conn, "note", "n1").unwrap().unwrap();
        assert_eq!(
            projected.get("tags").unwrap(),
            &MetaValue::List(vec!["a".into(), "b".into(), "c".into()])
        );
    }

    #[test]
    fn sanitizer_collision_rejects() {
        let meta = meta_of(&[("created-at", "x"), ("created_at", "y")]);
        assert!(matches!(
            meta_columns(&meta),
            Err(LoreError::SchemaConflict(_))
        ));

        let reserved = meta_of(&[("_content", "x")]);
        assert!(matches!(
            meta_columns(&reserved),
            Err(LoreError::SchemaConflict(_))
        ));
    }

    #[test]
    fn reserved_type_names_conflict() {
        let (conn, reg) = setup(Layout::PerType);
        let err = reg.widen(&conn, "nodes", &[]).unwrap_err();
        assert!(matches!(err, LoreError::SchemaConflict(_)));
    }

    #[test]
    fn case_folding_type_collision() {
        let (conn, reg) = setup(Layout::PerType);
        reg.upsert_row(&conn, "Concept", "c1", "x", &Metadata::new())
            .unwrap();
        conn.execute(
            "INSERT INTO nodes (name, type) VALUES ('c1', 'Concept')",
            [],
        )
        .unwrap();
        let err = reg.widen(&conn, "concept", &[]).unwrap_err();
        assert!(matches!(err, LoreError::SchemaConflict(_)));
    }

    #[test]
    fn set_fields_prunes_and_adds() {
        for layout_kind in [Layout::PerType, Layout::Unified] {
            let (conn, reg) = setup(layout_kind);
            reg.upsert_row(
                &conn,
                "concept",
                "c1",
                "x",
                &meta_of(&[("description", "d"), ("stray", "s")]),
            )
            .unwrap();

            reg.set_fields(&conn, "concept", &["description".into(), "status".into()])
                .unwrap();
            assert_eq!(
                reg.fields(&conn, "concept").unwrap(),
                vec!["description", "status"]
            );

            let (_, projected) = reg.read_row(&conn, "concept", "c1").unwrap().unwrap();
            assert!(projected.get("stray").is_none());
            assert_eq!(projected.get("description").unwrap().as_text(), Some("d"));
        }
    }

    #[test]
    fn unified_set_fields_keeps_shared_columns() {
        let (conn, reg) = setup(Layout::Unified);
        reg.widen(&conn, "paper", &["author".into()]).unwrap();
        reg.widen(&conn, "book", &["author".into()]).unwrap();

        reg.set_fields(&conn, "paper", &[]).unwrap();
        // `book` still owns the column; it must survive the prune.
        assert!(table_columns(&conn, "_data").unwrap().contains(&"author".into()));
        assert_eq!(reg.fields(&conn, "book").unwrap(), vec!["author"]);
    }

    #[test]
    fn rename_carries_rows_and_fields() {
        for layout_kind in [Layout::PerType, Layout::Unified] {
            let (conn, reg) = setup(layout_kind);
            reg.upsert_row(&conn, "draft", "d1", "x", &meta_of(&[("status", "wip")]))
                .unwrap();
            conn.execute("INSERT INTO nodes (name, type) VALUES ('d1', 'draft')", [])
                .unwrap();
            conn.execute("INSERT INTO types (name) VALUES ('draft')", [])
                .unwrap();

            reg.rename(&conn, "draft", "note").unwrap();
            assert_eq!(reg.fields(&conn, "note").unwrap(), vec!["status"]);
            let (_, projected) = reg.read_row(&conn, "note", "d1").unwrap().unwrap();
            assert_eq!(projected.get("status").unwrap().as_text(), Some("wip"));

            let t: String = conn
                .query_row("SELECT type FROM nodes WHERE name = 'd1'", [], |r| r.get(0))
                .unwrap();
            assert_eq!(t, "note");
        }
    }

    #[test]
    fn rename_onto_live_type_conflicts() {
        let (conn, reg) = setup(Layout::PerType);
        conn.execute("INSERT INTO types (name) VALUES ('a')", []).unwrap();
        conn.execute("INSERT INTO types (name) VALUES ('b')", []).unwrap();
        assert!(matches!(
            reg.rename(&conn, "a", "b"),
            Err(LoreError::SchemaConflict(_))
        ));
    }

    #[test]
    fn drop_type_removes_storage() {
        let (conn, reg) = setup(Layout::PerType);
        reg.upsert_row(&conn, "scrap", "s1", "x", &Metadata::new())
            .unwrap();
        conn.execute("INSERT INTO types (name) VALUES ('scrap')", [])
            .unwrap();

        reg.drop_type(&conn, "scrap").unwrap();
        assert!(!table_exists(&conn, "scrap").unwrap());
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM types WHERE name = 'scrap'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
