//! Append-only, monotonically sequenced mutation log.
//!
//! Appends run inside the same transaction as the mutation they describe, so
//! a rolled-back write leaves no log entry behind.

use chrono::Utc;
use lore_core::{ChangeEntry, ChangeOp, ChangePayload, LoreError, LoreResult};
use rusqlite::{params, Connection};

/// Append one entry. The sequence number is assigned by the store and
/// returned.
pub fn append(conn: &Connection, payload: &ChangePayload) -> LoreResult<i64> {
    let json = serde_json::to_string(payload)?;
    conn.execute(
        "INSERT INTO changelog (ts, op, subject, payload) VALUES (?1, ?2, ?3, ?4)",
        params![
            Utc::now().to_rfc3339(),
            payload.op().as_str(),
            payload.subject(),
            json,
        ],
    )
    .map_err(|e| LoreError::Storage(format!("changelog append: {e}")))?;
    Ok(conn.last_insert_rowid())
}

/// Entries with `seq > since_seq`, oldest first.
pub fn list(conn: &Connection, since_seq: i64, limit: Option<usize>) -> LoreResult<Vec<ChangeEntry>> {
    let sql = match limit {
        Some(_) => "SELECT seq, ts, op, subject, payload FROM changelog WHERE seq > ?1 ORDER BY seq LIMIT ?2",
        None => "SELECT seq, ts, op, subject, payload FROM changelog WHERE seq > ?1 ORDER BY seq",
    };
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| LoreError::Storage(e.to_string()))?;

    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(i64, String, String, String, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
    };
    let raw = match limit {
        Some(n) => stmt
            .query_map(params![since_seq, n as i64], map_row)
            .map_err(|e| LoreError::Storage(e.to_string()))?
            .collect::<Result<Vec<_>, _>>(),
        None => stmt
            .query_map(params![since_seq], map_row)
            .map_err(|e| LoreError::Storage(e.to_string()))?
            .collect::<Result<Vec<_>, _>>(),
    }
    .map_err(|e| LoreError::Storage(e.to_string()))?;

    let mut entries = Vec::with_capacity(raw.len());
    for (seq, ts, op, subject, payload) in raw {
        let op: ChangeOp = op
            .parse()
            .map_err(|e: String| LoreError::Storage(format!("changelog seq {seq}: {e}")))?;
        let payload: ChangePayload = serde_json::from_str(&payload)?;
        entries.push(ChangeEntry {
            seq,
            ts,
            op,
            subject,
            payload,
        });
    }
    Ok(entries)
}

/// Delete entries with `seq < before_seq`. Returns the number removed.
/// Sequence numbers keep increasing past a truncation (AUTOINCREMENT).
pub fn truncate(conn: &Connection, before_seq: i64) -> LoreResult<usize> {
    conn.execute("DELETE FROM changelog WHERE seq < ?1", params![before_seq])
        .map_err(|e| LoreError::Storage(e.to_string()))
}

/// Highest assigned sequence number, 0 on an empty log.
pub fn max_seq(conn: &Connection) -> LoreResult<i64> {
    conn.query_row("SELECT COALESCE(MAX(seq), 0) FROM changelog", [], |row| row.get(0))
        .map_err(|e| LoreError::Storage(e.to_string()))
}
