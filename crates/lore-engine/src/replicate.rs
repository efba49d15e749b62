//! Replication: push local mutations to a scope-tagged secondary store,
//! pull a scope's rows back as local writes.

use lore_core::{LoreError, LoreResult};
use lore_store::{changelog, RemoteStore, Scope};
use rusqlite::params;

use crate::engine::KnowledgeGraph;

impl KnowledgeGraph {
    /// Delta push: replay every changelog entry with `seq > since_seq`
    /// against the remote, tagged with `scope`. Returns the highest seq
    /// applied. Re-pushing from the same `since_seq` reproduces the same
    /// remote state.
    ///
    /// Each entry commits separately at the remote; a failing entry aborts
    /// the push with a `Replication` error carrying the last seq that did
    /// apply, so the caller can advance its cursor that far.
    pub fn push(&self, remote: &mut RemoteStore, scope: &Scope, since_seq: i64) -> LoreResult<i64> {
        if !self.config.changelog {
            return Err(LoreError::ChangelogDisabled);
        }

        let entries = {
            let conn = self.lock()?;
            changelog::list(&conn, since_seq, None)?
        };

        let mut last_applied = since_seq;
        for entry in entries {
            remote
                .apply(scope, &entry.payload)
                .map_err(|e| LoreError::Replication {
                    last_applied,
                    reason: e.to_string(),
                })?;
            last_applied = entry.seq;
        }
        Ok(last_applied)
    }

    /// Fallback for a disabled changelog: full-table scan emitting upserts
    /// only. Lossy: remote rows whose local node was deleted stay behind.
    pub fn push_snapshot(&self, remote: &mut RemoteStore, scope: &Scope) -> LoreResult<usize> {
        tracing::warn!("snapshot push emits upserts only; deletions do not propagate");

        let rows: Vec<(String, String, String)> = {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare("SELECT name, type FROM nodes ORDER BY name")
                .map_err(|e| LoreError::Storage(e.to_string()))?;
            let pairs = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
                .map_err(|e| LoreError::Storage(e.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| LoreError::Storage(e.to_string()))?;

            let mut out = Vec::with_capacity(pairs.len());
            for (name, node_type) in pairs {
                if let Some((content, _)) = self.registry.read_row(&conn, &node_type, &name)? {
                    out.push((name, node_type, content));
                }
            }
            out
        };

        let count = rows.len();
        for (name, node_type, content) in rows {
            remote.upsert_node(scope, &name, &node_type, &content)?;
        }
        Ok(count)
    }

    /// Pull every remote row matching `scope` and replay it as a local
    /// write, **bypassing the changelog** so pulled rows are never pushed
    /// back. Returns the number of nodes written. Deletions do not
    /// propagate on pull; the remote keeps no tombstones.
    pub fn pull(&self, remote: &RemoteStore, scope: &Scope) -> LoreResult<usize> {
        // Registered-but-empty types survive the round trip.
        for type_name in remote.types_in_scope(scope)? {
            let conn = self.lock()?;
            self.registry.validate_type_name(&conn, &type_name)?;
            conn.execute(
                "INSERT OR IGNORE INTO types (name) VALUES (?1)",
                params![type_name],
            )
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        }

        let mut count = 0;
        for (name, node_type) in remote.nodes_in_scope(scope)? {
            let Some(content) = remote.content_of(scope, &name, &node_type)? else {
                continue;
            };
            let mut conn = self.lock()?;
            let tx = conn
                .transaction()
                .map_err(|e| LoreError::Storage(e.to_string()))?;
            self.write_tx(&tx, &name, &content, false)?;
            self.gate(&tx)?;
            tx.commit().map_err(|e| LoreError::Storage(e.to_string()))?;
            count += 1;
        }
        Ok(count)
    }
}
