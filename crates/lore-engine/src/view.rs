use std::collections::BTreeMap;

use lore_core::{links, parse_document, Document, LoreError, LoreResult, Metadata};
use lore_store::{links as edge_store, SchemaRegistry};
use rusqlite::{params, Connection, OptionalExtension};

/// Read-only snapshot over a connection (or an open transaction; the
/// gatekeeper validates hypothetical post-states through one of these).
///
/// The node-name set is loaded once at construction and reused for every
/// resolution within the view's lifetime; views are rebuilt per query, never
/// cached across calls.
pub struct GraphView<'a> {
    conn: &'a Connection,
    registry: SchemaRegistry,
    names: Vec<String>, // sorted
}

impl<'a> GraphView<'a> {
    pub fn new(conn: &'a Connection, registry: SchemaRegistry) -> LoreResult<Self> {
        let mut stmt = conn
            .prepare("SELECT name FROM nodes ORDER BY name")
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        let names = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| LoreError::Storage(e.to_string()))?
            .collect::<Result<Vec<String>, _>>()
            .map_err(|e| LoreError::Storage(e.to_string()))?;

        Ok(Self {
            conn,
            registry,
            names,
        })
    }

    /// All node names, sorted.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn exists(&self, name: &str) -> bool {
        self.names.binary_search_by(|n| n.as_str().cmp(name)).is_ok()
    }

    pub fn node_type(&self, name: &str) -> LoreResult<Option<String>> {
        self.conn
            .query_row("SELECT type FROM nodes WHERE name = ?1", params![name], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| LoreError::Storage(e.to_string()))
    }

    /// Node names of one type (`"*"` for all), sorted.
    pub fn ls(&self, type_name: &str) -> LoreResult<Vec<String>> {
        if type_name == "*" {
            return Ok(self.names.clone());
        }
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM nodes WHERE type = ?1 ORDER BY name")
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        let result = stmt
            .query_map(params![type_name], |row| row.get(0))
            .map_err(|e| LoreError::Storage(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| LoreError::Storage(e.to_string()));
        result
    }

    /// Raw stored content.
    pub fn content(&self, name: &str) -> LoreResult<Option<String>> {
        let Some(node_type) = self.node_type(name)? else {
            return Ok(None);
        };
        Ok(self
            .registry
            .read_row(self.conn, &node_type, name)?
            .map(|(content, _)| content))
    }

    pub fn document(&self, name: &str) -> LoreResult<Option<Document>> {
        Ok(self.content(name)?.map(|c| parse_document(&c)))
    }

    /// Parsed header metadata, original key spelling preserved.
    pub fn frontmatter(&self, name: &str) -> LoreResult<Option<Metadata>> {
        Ok(self.document(name)?.map(|d| d.meta))
    }

    /// Outgoing raw tokens, source order.
    pub fn wikilinks_raw(&self, name: &str) -> LoreResult<Vec<String>> {
        edge_store::edges_from(self.conn, name)
    }

    /// Outgoing resolved targets in source order; unresolved tokens are
    /// filtered, duplicate resolutions collapse to first appearance.
    pub fn wikilinks(&self, name: &str) -> LoreResult<Vec<String>> {
        let mut out: Vec<String> = Vec::new();
        for token in self.wikilinks_raw(name)? {
            if let Some(resolved) = links::resolve(&token, &self.names) {
                if !out.iter().any(|r| r == resolved) {
                    out.push(resolved.to_string());
                }
            }
        }
        Ok(out)
    }

    /// Sources whose resolved outgoing edges include `name`, source-ordered.
    pub fn backlinks(&self, name: &str) -> LoreResult<Vec<String>> {
        let mut out: Vec<String> = Vec::new();
        for (source, target) in edge_store::all_edges(self.conn)? {
            if links::resolve(&target, &self.names) == Some(name)
                && !out.iter().any(|s| s == &source)
            {
                out.push(source);
            }
        }
        Ok(out)
    }

    /// Resolve a token: exact only, or the full exact → case-insensitive →
    /// normalized cascade.
    pub fn resolve(&self, token: &str, fuzzy: bool) -> Option<&str> {
        if fuzzy {
            links::resolve(token, &self.names)
        } else {
            self.names
                .binary_search_by(|n| n.as_str().cmp(token))
                .ok()
                .map(|idx| self.names[idx].as_str())
        }
    }

    /// Full resolved adjacency, unresolved targets skipped.
    pub fn graph(&self) -> LoreResult<BTreeMap<String, Vec<String>>> {
        let mut adjacency: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (source, target) in edge_store::all_edges(self.conn)? {
            if let Some(resolved) = links::resolve(&target, &self.names) {
                let targets = adjacency.entry(source).or_default();
                if !targets.iter().any(|t| t == resolved) {
                    targets.push(resolved.to_string());
                }
            }
        }
        Ok(adjacency)
    }
}
