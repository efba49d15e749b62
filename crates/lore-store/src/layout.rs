use lore_core::{LoreError, LoreResult};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

/// Storage layout for typed rows, chosen at database creation and recorded
/// in the `meta` table. A database is bound to exactly one layout for its
/// lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// One table per registered type, named after the type.
    #[default]
    PerType,
    /// A single `_data` table holding the union of all fields, with
    /// `_type_fields` recording which fields belong to which type.
    Unified,
}

impl Layout {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PerType => "per_type",
            Self::Unified => "unified",
        }
    }
}

impl std::str::FromStr for Layout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per_type" => Ok(Self::PerType),
            "unified" => Ok(Self::Unified),
            _ => Err(format!("unknown layout: {s}")),
        }
    }
}

impl std::fmt::Display for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Internal table names a per-type table may never shadow.
pub const RESERVED_TABLES: &[&str] = &[
    "nodes",
    "edges",
    "types",
    "changelog",
    "meta",
    "_data",
    "_type_fields",
];

pub const SCHEMA_VERSION: &str = "1";

const BASE_SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS nodes (
    name    TEXT PRIMARY KEY,
    type    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_nodes_type ON nodes(type);

CREATE TABLE IF NOT EXISTS types (
    name    TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS edges (
    source  TEXT NOT NULL,
    target  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source);

CREATE TABLE IF NOT EXISTS changelog (
    seq     INTEGER PRIMARY KEY AUTOINCREMENT,
    ts      TEXT NOT NULL,
    op      TEXT NOT NULL,
    subject TEXT NOT NULL,
    payload TEXT NOT NULL
);
";

const UNIFIED_SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS _data (
    name     TEXT PRIMARY KEY,
    type     TEXT NOT NULL,
    _content TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_data_type ON _data(type);

CREATE TABLE IF NOT EXISTS _type_fields (
    type    TEXT NOT NULL,
    field   TEXT NOT NULL,
    ord     INTEGER NOT NULL,
    PRIMARY KEY (type, field)
);
";

/// Bind a connection to a layout: create the base schema on a fresh
/// database, or verify the recorded layout on an existing one.
pub fn bind(conn: &Connection, layout: Layout) -> LoreResult<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS meta (k TEXT PRIMARY KEY, v TEXT NOT NULL);")
        .map_err(|e| LoreError::Storage(format!("create meta table: {e}")))?;

    let recorded: Option<String> = conn
        .query_row("SELECT v FROM meta WHERE k = 'layout'", [], |row| row.get(0))
        .optional()
        .map_err(|e| LoreError::Storage(e.to_string()))?;

    match recorded {
        Some(found) if found != layout.as_str() => {
            return Err(LoreError::LayoutMismatch {
                expected: layout.as_str().to_string(),
                found,
            });
        }
        Some(_) => {}
        None => {
            conn.execute(
                "INSERT INTO meta (k, v) VALUES ('layout', ?1), ('schema_version', ?2)",
                rusqlite::params![layout.as_str(), SCHEMA_VERSION],
            )
            .map_err(|e| LoreError::Storage(format!("record layout: {e}")))?;
        }
    }

    conn.execute_batch(BASE_SCHEMA_SQL)
        .map_err(|e| LoreError::Storage(format!("create base schema: {e}")))?;
    if layout == Layout::Unified {
        conn.execute_batch(UNIFIED_SCHEMA_SQL)
            .map_err(|e| LoreError::Storage(format!("create unified schema: {e}")))?;
    }

    tracing::debug!(layout = layout.as_str(), "schema bound");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_round_trips() {
        assert_eq!("per_type".parse::<Layout>().unwrap(), Layout::PerType);
        assert_eq!("unified".parse::<Layout>().unwrap(), Layout::Unified);
        assert!("columnar".parse::<Layout>().is_err());
    }

    #[test]
    fn bind_records_layout_once() {
        let conn = Connection::open_in_memory().unwrap();
        bind(&conn, Layout::PerType).unwrap();
        // Re-binding the same layout is idempotent.
        bind(&conn, Layout::PerType).unwrap();

        let v: String = conn
            .query_row("SELECT v FROM meta WHERE k = 'layout'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(v, "per_type");
    }

    #[test]
    fn bind_rejects_other_layout() {
        let conn = Connection::open_in_memory().unwrap();
        bind(&conn, Layout::Unified).unwrap();
        match bind(&conn, Layout::PerType) {
            Err(LoreError::LayoutMismatch { expected, found }) => {
                assert_eq!(expected, "per_type");
                assert_eq!(found, "unified");
            }
            other => panic!("expected LayoutMismatch, got {other:?}"),
        }
    }
}
