use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use lore_core::{
    extract_wikilinks, parse_document, validate_name, ChangePayload, LoreError, LoreResult,
    UNTYPED,
};
use lore_store::{changelog, layout, links, Layout, SchemaRegistry};
use rusqlite::{params, Connection, OptionalExtension};

use crate::config::EngineConfig;
use crate::validator::Validator;
use crate::view::GraphView;

/// The engine façade. Single-writer per handle: one connection behind a
/// mutex, every public operation synchronous, every mutation one
/// transaction covering schema migration, typed upsert, node-index update,
/// edge replacement, and changelog append.
pub struct KnowledgeGraph {
    pub(crate) conn: Mutex<Connection>,
    pub(crate) registry: SchemaRegistry,
    pub(crate) config: EngineConfig,
    validator: Mutex<Option<Validator>>,
}

impl std::fmt::Debug for KnowledgeGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeGraph")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl KnowledgeGraph {
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> LoreResult<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| LoreError::Storage(format!("failed to open sqlite: {e}")))?;
        conn.execute_batch(&format!(
            "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout={};",
            config.busy_timeout_ms
        ))
        .map_err(|e| LoreError::Storage(format!("pragma error: {e}")))?;
        Self::bind(conn, config)
    }

    pub fn open_in_memory(config: EngineConfig) -> LoreResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| LoreError::Storage(format!("failed to open in-memory sqlite: {e}")))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| LoreError::Storage(format!("pragma error: {e}")))?;
        Self::bind(conn, config)
    }

    fn bind(conn: Connection, config: EngineConfig) -> LoreResult<Self> {
        layout::bind(&conn, config.layout)?;
        Ok(Self {
            conn: Mutex::new(conn),
            registry: SchemaRegistry::new(config.layout),
            config,
            validator: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn layout(&self) -> Layout {
        self.registry.layout()
    }

    pub(crate) fn lock(&self) -> LoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| LoreError::Storage(e.to_string()))
    }

    // ------------------------------------------------------------------
    // Gatekeeper
    // ------------------------------------------------------------------

    /// Install a validator as the write gatekeeper. Any `freeze_schema`
    /// rules it carries set the frozen types' field sets immediately.
    pub fn set_validator(&self, validator: Validator) -> LoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        for (type_name, fields) in validator.frozen() {
            self.registry.set_fields(&tx, type_name, fields)?;
        }
        tx.commit().map_err(|e| LoreError::Storage(e.to_string()))?;

        *self
            .validator
            .lock()
            .map_err(|e| LoreError::Storage(e.to_string()))? = Some(validator);
        Ok(())
    }

    /// Remove the gatekeeper, restoring freeform writes.
    pub fn clear_validator(&self) -> LoreResult<()> {
        *self
            .validator
            .lock()
            .map_err(|e| LoreError::Storage(e.to_string()))? = None;
        Ok(())
    }

    /// Run the installed validator against the state visible inside the
    /// open transaction: the hypothetical post-state of the mutation. A
    /// returned error drops the transaction, so nothing persists.
    pub(crate) fn gate(&self, conn: &Connection) -> LoreResult<()> {
        let guard = self
            .validator
            .lock()
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        if let Some(validator) = guard.as_ref() {
            let view = GraphView::new(conn, self.registry)?;
            let violations = validator.check(&view)?;
            if !violations.is_empty() {
                return Err(LoreError::Invalid(violations));
            }
        }
        Ok(())
    }

    /// Run the installed validator against the committed state without
    /// mutating anything.
    pub fn check(&self) -> LoreResult<Vec<lore_core::Violation>> {
        let conn = self.lock()?;
        let guard = self
            .validator
            .lock()
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        match guard.as_ref() {
            Some(validator) => {
                let view = GraphView::new(&conn, self.registry)?;
                validator.check(&view)
            }
            None => Ok(Vec::new()),
        }
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Parse, upsert the typed row and raw content, replace outgoing edges,
    /// and append to the changelog, atomically.
    pub fn write(&self, name: &str, content: &str) -> LoreResult<()> {
        validate_name(name)?;
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        self.write_tx(&tx, name, content, true)?;
        self.gate(&tx)?;
        tx.commit().map_err(|e| LoreError::Storage(e.to_string()))
    }

    /// Create the node only if absent; a no-op on an existing node.
    /// Returns whether the node was created.
    pub fn touch(&self, name: &str, content: &str) -> LoreResult<bool> {
        validate_name(name)?;
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        if node_type_of(&tx, name)?.is_some() {
            return Ok(false);
        }
        self.write_tx(&tx, name, content, true)?;
        self.gate(&tx)?;
        tx.commit()
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        Ok(true)
    }

    pub(crate) fn write_tx(
        &self,
        conn: &Connection,
        name: &str,
        content: &str,
        log: bool,
    ) -> LoreResult<()> {
        let doc = parse_document(content);
        let node_type = doc.node_type().to_string();

        let old_type = node_type_of(conn, name)?;
        if let Some(old) = old_type.as_deref() {
            if old != node_type {
                // Per-type layout moves the row across tables; unified
                // updates in place through the REPLACE below.
                if self.registry.layout() == Layout::PerType {
                    self.registry.delete_row(conn, old, name)?;
                }
                if log {
                    self.log(
                        conn,
                        &ChangePayload::TypeChange {
                            name: name.to_string(),
                            old_type: old.to_string(),
                            new_type: node_type.clone(),
                            content: content.to_string(),
                        },
                    )?;
                }
            }
        }

        conn.execute(
            "INSERT OR REPLACE INTO nodes (name, type) VALUES (?1, ?2)",
            params![name, node_type],
        )
        .map_err(|e| LoreError::Storage(e.to_string()))?;
        self.registry
            .upsert_row(conn, &node_type, name, content, &doc.meta)?;

        if node_type != UNTYPED {
            conn.execute("INSERT OR IGNORE INTO types (name) VALUES (?1)", params![node_type])
                .map_err(|e| LoreError::Storage(e.to_string()))?;
        }

        links::replace_edges(conn, name, &extract_wikilinks(&doc.body))?;

        if log {
            self.log(
                conn,
                &ChangePayload::Write {
                    name: name.to_string(),
                    node_type,
                    content: content.to_string(),
                },
            )?;
        }
        Ok(())
    }

    /// Delete the node, its typed row, and its outgoing edges. Inbound
    /// references remain as unresolved edges until the name is reused.
    pub fn rm(&self, name: &str) -> LoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        let node_type =
            node_type_of(&tx, name)?.ok_or_else(|| LoreError::NotFound(name.to_string()))?;

        self.registry.delete_row(&tx, &node_type, name)?;
        tx.execute("DELETE FROM nodes WHERE name = ?1", params![name])
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        links::delete_source(&tx, name)?;

        self.log(
            &tx,
            &ChangePayload::Rm {
                name: name.to_string(),
                node_type,
            },
        )?;
        tx.commit().map_err(|e| LoreError::Storage(e.to_string()))
    }

    /// Atomic rename. Outgoing edges follow the node; inbound tokens are
    /// stored verbatim and re-resolve against the new name set per query.
    pub fn mv(&self, old: &str, new: &str) -> LoreResult<()> {
        validate_name(new)?;
        if old == new {
            return Ok(());
        }
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        let node_type =
            node_type_of(&tx, old)?.ok_or_else(|| LoreError::NotFound(old.to_string()))?;
        if node_type_of(&tx, new)?.is_some() {
            return Err(LoreError::Exists(new.to_string()));
        }

        self.registry.move_row(&tx, &node_type, old, new)?;
        tx.execute("UPDATE nodes SET name = ?1 WHERE name = ?2", params![new, old])
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        links::rename_source(&tx, old, new)?;

        self.log(
            &tx,
            &ChangePayload::Mv {
                old: old.to_string(),
                new: new.to_string(),
                node_type,
            },
        )?;
        self.gate(&tx)?;
        tx.commit().map_err(|e| LoreError::Storage(e.to_string()))
    }

    /// Deep copy: row, metadata, body, and outgoing edges.
    pub fn cp(&self, src: &str, dst: &str) -> LoreResult<()> {
        validate_name(dst)?;
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        let node_type =
            node_type_of(&tx, src)?.ok_or_else(|| LoreError::NotFound(src.to_string()))?;
        if node_type_of(&tx, dst)?.is_some() {
            return Err(LoreError::Exists(dst.to_string()));
        }

        let (content, _) = self
            .registry
            .read_row(&tx, &node_type, src)?
            .ok_or_else(|| LoreError::Storage(format!("typed row missing for '{src}'")))?;
        let doc = parse_document(&content);

        tx.execute(
            "INSERT INTO nodes (name, type) VALUES (?1, ?2)",
            params![dst, node_type],
        )
        .map_err(|e| LoreError::Storage(e.to_string()))?;
        self.registry
            .upsert_row(&tx, &node_type, dst, &content, &doc.meta)?;
        links::replace_edges(&tx, dst, &extract_wikilinks(&doc.body))?;

        self.log(
            &tx,
            &ChangePayload::Cp {
                src: src.to_string(),
                dst: dst.to_string(),
                node_type,
                content,
            },
        )?;
        self.gate(&tx)?;
        tx.commit().map_err(|e| LoreError::Storage(e.to_string()))
    }

    // ------------------------------------------------------------------
    // Type management
    // ------------------------------------------------------------------

    /// Register a type explicitly (idempotent). Writes register their type
    /// implicitly; this exists so empty types can be declared up front.
    pub fn add_type(&self, name: &str) -> LoreResult<()> {
        if name.is_empty() || name == UNTYPED {
            return Err(LoreError::InvalidInput(format!(
                "cannot register type '{name}'"
            )));
        }
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        self.registry.validate_type_name(&tx, name)?;

        let inserted = tx
            .execute("INSERT OR IGNORE INTO types (name) VALUES (?1)", params![name])
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        if inserted > 0 {
            self.log(
                &tx,
                &ChangePayload::TypeAdd {
                    name: name.to_string(),
                },
            )?;
        }
        tx.commit().map_err(|e| LoreError::Storage(e.to_string()))
    }

    /// Drop a type: its nodes migrate to the untyped sentinel (each one
    /// logged as a type change), then the type's storage goes away.
    pub fn remove_type(&self, name: &str) -> LoreResult<()> {
        if name == UNTYPED {
            return Err(LoreError::InvalidInput(
                "cannot remove the untyped sentinel".into(),
            ));
        }
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| LoreError::Storage(e.to_string()))?;

        let registered: Option<i64> = tx
            .query_row("SELECT 1 FROM types WHERE name = ?1", params![name], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        let rows = self.registry.rows_of_type(&tx, name)?;
        if registered.is_none() && rows.is_empty() {
            return Err(LoreError::NotFound(name.to_string()));
        }

        for (node, content) in rows {
            let doc = parse_document(&content);
            if self.registry.layout() == Layout::PerType {
                self.registry.delete_row(&tx, name, &node)?;
            }
            self.registry
                .upsert_row(&tx, UNTYPED, &node, &content, &doc.meta)?;
            tx.execute(
                "UPDATE nodes SET type = ?1 WHERE name = ?2",
                params![UNTYPED, node],
            )
            .map_err(|e| LoreError::Storage(e.to_string()))?;
            self.log(
                &tx,
                &ChangePayload::TypeChange {
                    name: node,
                    old_type: name.to_string(),
                    new_type: UNTYPED.to_string(),
                    content,
                },
            )?;
        }

        self.registry.drop_type(&tx, name)?;
        self.log(
            &tx,
            &ChangePayload::TypeRm {
                name: name.to_string(),
            },
        )?;
        self.gate(&tx)?;
        tx.commit().map_err(|e| LoreError::Storage(e.to_string()))
    }

    // ------------------------------------------------------------------

    fn log(&self, conn: &Connection, payload: &ChangePayload) -> LoreResult<()> {
        if self.config.changelog {
            changelog::append(conn, payload)?;
        }
        Ok(())
    }
}

/// The node index's type column, `None` when the node is absent.
pub(crate) fn node_type_of(conn: &Connection, name: &str) -> LoreResult<Option<String>> {
    conn.query_row("SELECT type FROM nodes WHERE name = ?1", params![name], |row| {
        row.get(0)
    })
    .optional()
    .map_err(|e| LoreError::Storage(e.to_string()))
}
