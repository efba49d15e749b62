//! The edge table: `(source, target)` with targets stored verbatim.
//!
//! Synchronization is full replacement: a write deletes every edge whose
//! source is the node and inserts the freshly extracted set. Resolution is
//! a query-time concern and never touches this table.

use lore_core::{LoreError, LoreResult};
use rusqlite::{params, Connection};

/// Replace a node's outgoing edges with `targets` (already deduplicated by
/// extraction, source order preserved via rowid).
pub fn replace_edges(conn: &Connection, source: &str, targets: &[String]) -> LoreResult<()> {
    conn.execute("DELETE FROM edges WHERE source = ?1", params![source])
        .map_err(|e| LoreError::Storage(e.to_string()))?;
    let mut stmt = conn
        .prepare("INSERT INTO edges (source, target) VALUES (?1, ?2)")
        .map_err(|e| LoreError::Storage(e.to_string()))?;
    for target in targets {
        stmt.execute(params![source, target])
            .map_err(|e| LoreError::Storage(e.to_string()))?;
    }
    Ok(())
}

/// Outgoing raw targets in insertion (source) order.
pub fn edges_from(conn: &Connection, source: &str) -> LoreResult<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT target FROM edges WHERE source = ?1 ORDER BY rowid")
        .map_err(|e| LoreError::Storage(e.to_string()))?;
    let result = stmt
        .query_map(params![source], |row| row.get(0))
        .map_err(|e| LoreError::Storage(e.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| LoreError::Storage(e.to_string()));
    result
}

/// Every edge, ordered by source then insertion.
pub fn all_edges(conn: &Connection) -> LoreResult<Vec<(String, String)>> {
    let mut stmt = conn
        .prepare("SELECT source, target FROM edges ORDER BY source, rowid")
        .map_err(|e| LoreError::Storage(e.to_string()))?;
    let result = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(|e| LoreError::Storage(e.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| LoreError::Storage(e.to_string()));
    result
}

/// Rewrite the source column on rename. Targets stay verbatim.
pub fn rename_source(conn: &Connection, old: &str, new: &str) -> LoreResult<()> {
    conn.execute(
        "UPDATE edges SET source = ?1 WHERE source = ?2",
        params![new, old],
    )
    .map_err(|e| LoreError::Storage(e.to_string()))?;
    Ok(())
}

/// Drop all outgoing edges of a deleted node. Inbound references to it are
/// other nodes' edges and remain, unresolved, until the name is reused.
pub fn delete_source(conn: &Connection, source: &str) -> LoreResult<()> {
    conn.execute("DELETE FROM edges WHERE source = ?1", params![source])
        .map_err(|e| LoreError::Storage(e.to_string()))?;
    Ok(())
}
