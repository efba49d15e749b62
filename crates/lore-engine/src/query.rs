//! The read surface: lookups, search, graph queries, and the raw SQL
//! passthrough.

use std::collections::{BTreeMap, HashSet, VecDeque};

use lore_core::{parse_document, ChangeEntry, LoreError, LoreResult, Metadata, MetaValue, NodeInfo, UNTYPED};
use lore_store::changelog;
use regex::RegexBuilder;
use rusqlite::types::ValueRef;

use crate::engine::{node_type_of, KnowledgeGraph};
use crate::view::GraphView;

#[derive(Debug, Clone)]
pub struct GrepOptions {
    /// Restrict the search to one type.
    pub node_type: Option<String>,
    /// Match against body text as well as names.
    pub content: bool,
    pub ignore_case: bool,
    pub invert: bool,
}

impl Default for GrepOptions {
    fn default() -> Self {
        Self {
            node_type: None,
            content: false,
            ignore_case: true,
            invert: false,
        }
    }
}

/// One matching line from `grep_lines`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrepMatch {
    pub name: String,
    pub line: usize,
    pub text: String,
}

impl std::fmt::Display for GrepMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.name, self.line, self.text)
    }
}

impl KnowledgeGraph {
    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub fn exists(&self, name: &str) -> LoreResult<bool> {
        let conn = self.lock()?;
        Ok(node_type_of(&conn, name)?.is_some())
    }

    /// The raw content exactly as written.
    pub fn cat(&self, name: &str) -> LoreResult<String> {
        let conn = self.lock()?;
        let node_type =
            node_type_of(&conn, name)?.ok_or_else(|| LoreError::NotFound(name.to_string()))?;
        let (content, _) = self
            .registry
            .read_row(&conn, &node_type, name)?
            .ok_or_else(|| LoreError::NotFound(name.to_string()))?;
        Ok(content)
    }

    /// Content after the header.
    pub fn body(&self, name: &str) -> LoreResult<String> {
        Ok(parse_document(&self.cat(name)?).body)
    }

    /// Header metadata with the original key spelling and value shapes.
    pub fn frontmatter(&self, name: &str) -> LoreResult<Metadata> {
        Ok(parse_document(&self.cat(name)?).meta)
    }

    pub fn info(&self, name: &str) -> LoreResult<NodeInfo> {
        let conn = self.lock()?;
        let node_type =
            node_type_of(&conn, name)?.ok_or_else(|| LoreError::NotFound(name.to_string()))?;
        let (content, _) = self
            .registry
            .read_row(&conn, &node_type, name)?
            .ok_or_else(|| LoreError::NotFound(name.to_string()))?;
        let doc = parse_document(&content);
        let tags = doc
            .meta
            .list("tags")
            .into_iter()
            .map(str::to_string)
            .collect();

        Ok(NodeInfo {
            name: name.to_string(),
            node_type: (node_type != UNTYPED).then_some(node_type),
            tags,
            content_length: doc.body.len(),
            has_content: !doc.body.is_empty(),
            meta: doc.meta,
        })
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    /// Registered types, sorted.
    pub fn types(&self) -> LoreResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT name FROM types ORDER BY name")
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        let result = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| LoreError::Storage(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| LoreError::Storage(e.to_string()));
        result
    }

    /// Node names of one type, or every node for `"*"`. Sorted.
    pub fn ls(&self, type_name: &str) -> LoreResult<Vec<String>> {
        let conn = self.lock()?;
        let view = GraphView::new(&conn, self.registry)?;
        view.ls(type_name)
    }

    /// Find nodes by name regex and/or type.
    pub fn find(
        &self,
        name_pattern: Option<&str>,
        type_filter: Option<&str>,
    ) -> LoreResult<Vec<String>> {
        let re = name_pattern
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| LoreError::InvalidInput(format!("bad name pattern: {e}")))
            })
            .transpose()?;

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT name, type FROM nodes ORDER BY name")
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| LoreError::Storage(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| LoreError::Storage(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter(|(name, node_type)| {
                re.as_ref().map_or(true, |re| re.is_match(name))
                    && type_filter.map_or(true, |t| t == node_type)
            })
            .map(|(name, _)| name)
            .collect())
    }

    /// Names whose name (or body, with `content`) matches the pattern.
    pub fn grep(&self, pattern: &str, opts: &GrepOptions) -> LoreResult<Vec<String>> {
        let re = RegexBuilder::new(pattern)
            .case_insensitive(opts.ignore_case)
            .build()
            .map_err(|e| LoreError::InvalidInput(format!("bad pattern: {e}")))?;

        let conn = self.lock()?;
        let rows = match &opts.node_type {
            Some(t) => self.registry.rows_of_type(&conn, t)?,
            None => self.registry.all_rows(&conn)?,
        };

        Ok(rows
            .into_iter()
            .filter(|(name, content)| {
                let matched = re.is_match(name)
                    || (opts.content && re.is_match(&parse_document(content).body));
                matched != opts.invert
            })
            .map(|(name, _)| name)
            .collect())
    }

    /// Line-oriented grep over body text: `name:line_no:line` records.
    pub fn grep_lines(&self, pattern: &str, opts: &GrepOptions) -> LoreResult<Vec<GrepMatch>> {
        let re = RegexBuilder::new(pattern)
            .case_insensitive(opts.ignore_case)
            .build()
            .map_err(|e| LoreError::InvalidInput(format!("bad pattern: {e}")))?;

        let conn = self.lock()?;
        let rows = match &opts.node_type {
            Some(t) => self.registry.rows_of_type(&conn, t)?,
            None => self.registry.all_rows(&conn)?,
        };

        let mut out = Vec::new();
        for (name, content) in rows {
            let body = parse_document(&content).body;
            for (idx, line) in body.lines().enumerate() {
                if re.is_match(line) != opts.invert {
                    out.push(GrepMatch {
                        name: name.clone(),
                        line: idx + 1,
                        text: line.to_string(),
                    });
                }
            }
        }
        Ok(out)
    }

    /// A node's tags (the `tags` metadata field; a scalar reads as one tag).
    pub fn tags(&self, name: &str) -> LoreResult<Vec<String>> {
        Ok(self
            .frontmatter(name)?
            .list("tags")
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// `tag -> node names` across the whole graph, read from the typed
    /// projection.
    pub fn tag_index(&self) -> LoreResult<BTreeMap<String, Vec<String>>> {
        let conn = self.lock()?;
        let mut index: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, encoded) in self.registry.tagged_rows(&conn)? {
            for tag in MetaValue::decode(&encoded).items() {
                if tag.is_empty() {
                    continue;
                }
                let names = index.entry(tag.to_string()).or_default();
                if !names.iter().any(|n| n == &name) {
                    names.push(name.clone());
                }
            }
        }
        Ok(index)
    }

    /// `type -> ordered field set` for every registered type.
    pub fn schema(&self) -> LoreResult<BTreeMap<String, Vec<String>>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT name FROM types ORDER BY name")
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        let types = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| LoreError::Storage(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| LoreError::Storage(e.to_string()))?;

        let mut out = BTreeMap::new();
        for t in types {
            let fields = self.registry.fields(&conn, &t)?;
            out.insert(t, fields);
        }
        Ok(out)
    }

    /// Type-grouped listing with body previews.
    pub fn tree(&self) -> LoreResult<String> {
        let conn = self.lock()?;
        let mut lines: Vec<String> = Vec::new();

        let mut stmt = conn
            .prepare("SELECT name FROM types ORDER BY name")
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        let types = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| LoreError::Storage(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| LoreError::Storage(e.to_string()))?;

        for t in types {
            lines.push(format!("{t}/"));
            let rows = self.registry.rows_of_type(&conn, &t)?;
            render_group(&mut lines, &rows);
        }

        let untyped = self.registry.rows_of_type(&conn, UNTYPED)?;
        if !untyped.is_empty() {
            lines.push("(untyped)".to_string());
            render_group(&mut lines, &untyped);
        }

        Ok(lines.join("\n"))
    }

    // ------------------------------------------------------------------
    // Graph
    // ------------------------------------------------------------------

    /// Resolved outgoing targets in source order.
    pub fn wikilinks(&self, name: &str) -> LoreResult<Vec<String>> {
        let conn = self.lock()?;
        GraphView::new(&conn, self.registry)?.wikilinks(name)
    }

    /// Outgoing tokens exactly as written, including unresolved ones.
    pub fn wikilinks_raw(&self, name: &str) -> LoreResult<Vec<String>> {
        let conn = self.lock()?;
        GraphView::new(&conn, self.registry)?.wikilinks_raw(name)
    }

    /// Sources whose resolved outgoing edges include `name`.
    pub fn backlinks(&self, name: &str) -> LoreResult<Vec<String>> {
        let conn = self.lock()?;
        GraphView::new(&conn, self.registry)?.backlinks(name)
    }

    /// Map a wikilink token to a canonical node name.
    pub fn resolve(&self, token: &str, fuzzy: bool) -> LoreResult<Option<String>> {
        let conn = self.lock()?;
        let view = GraphView::new(&conn, self.registry)?;
        Ok(view.resolve(token, fuzzy).map(str::to_string))
    }

    /// Full resolved adjacency.
    pub fn graph(&self) -> LoreResult<BTreeMap<String, Vec<String>>> {
        let conn = self.lock()?;
        GraphView::new(&conn, self.registry)?.graph()
    }

    /// Breadth-first expansion from `name` through resolved outgoing edges,
    /// up to `depth` hops. Returns `(node, content)` in discovery order;
    /// revisits and diamond joins are suppressed.
    pub fn read(&self, name: &str, depth: usize) -> LoreResult<Vec<(String, String)>> {
        let conn = self.lock()?;
        let view = GraphView::new(&conn, self.registry)?;
        if !view.exists(name) {
            return Err(LoreError::NotFound(name.to_string()));
        }

        let mut out: Vec<(String, String)> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        visited.insert(name.to_string());
        queue.push_back((name.to_string(), depth));

        while let Some((node, remaining)) = queue.pop_front() {
            let content = view.content(&node)?.unwrap_or_default();
            out.push((node.clone(), content));
            if remaining == 0 {
                continue;
            }
            for target in view.wikilinks(&node)? {
                if visited.insert(target.clone()) {
                    queue.push_back((target, remaining - 1));
                }
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Changelog
    // ------------------------------------------------------------------

    /// Entries with `seq > since_seq`, oldest first.
    pub fn changelog_entries(
        &self,
        since_seq: i64,
        limit: Option<usize>,
    ) -> LoreResult<Vec<ChangeEntry>> {
        let conn = self.lock()?;
        changelog::list(&conn, since_seq, limit)
    }

    /// Drop entries older than `before_seq`; returns how many were removed.
    pub fn truncate_changelog(&self, before_seq: i64) -> LoreResult<usize> {
        let conn = self.lock()?;
        changelog::truncate(&conn, before_seq)
    }

    /// Highest assigned changelog sequence number.
    pub fn changelog_seq(&self) -> LoreResult<i64> {
        let conn = self.lock()?;
        changelog::max_seq(&conn)
    }

    // ------------------------------------------------------------------
    // Raw SQL
    // ------------------------------------------------------------------

    /// Raw SQL passthrough. Rows come back as JSON values.
    pub fn query(
        &self,
        sql: &str,
        params_in: &[&dyn rusqlite::types::ToSql],
    ) -> LoreResult<Vec<Vec<serde_json::Value>>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        let column_count = stmt.column_count();

        let mut rows = stmt
            .query(params_in)
            .map_err(|e| LoreError::Storage(e.to_string()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| LoreError::Storage(e.to_string()))? {
            let mut values = Vec::with_capacity(column_count);
            for idx in 0..column_count {
                let value = row
                    .get_ref(idx)
                    .map_err(|e| LoreError::Storage(e.to_string()))?;
                values.push(match value {
                    ValueRef::Null => serde_json::Value::Null,
                    ValueRef::Integer(i) => serde_json::Value::from(i),
                    ValueRef::Real(f) => serde_json::Number::from_f64(f)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null),
                    ValueRef::Text(t) => {
                        serde_json::Value::String(String::from_utf8_lossy(t).into_owned())
                    }
                    ValueRef::Blob(b) => {
                        serde_json::Value::String(String::from_utf8_lossy(b).into_owned())
                    }
                });
            }
            out.push(values);
        }
        Ok(out)
    }
}

fn render_group(lines: &mut Vec<String>, rows: &[(String, String)]) {
    for (idx, (name, content)) in rows.iter().enumerate() {
        let connector = if idx == rows.len() - 1 {
            "└── "
        } else {
            "├── "
        };
        let body = parse_document(content).body;
        match body.lines().find(|l| !l.trim().is_empty()) {
            Some(first) => {
                let preview: String = first.chars().take(50).collect();
                let ellipsis = if first.chars().count() > 50 { "..." } else { "" };
                lines.push(format!("{connector}{name}: {preview}{ellipsis}"));
            }
            None => lines.push(format!("{connector}{name}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grep_match_renders_like_grep() {
        let m = GrepMatch {
            name: "note".into(),
            line: 3,
            text: "the line".into(),
        };
        assert_eq!(m.to_string(), "note:3:the line");
    }

    #[test]
    fn grep_options_default_is_case_insensitive_names_only() {
        let opts = GrepOptions::default();
        assert!(opts.ignore_case);
        assert!(!opts.content);
        assert!(!opts.invert);
        assert!(opts.node_type.is_none());
    }
}
