use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize};

use crate::error::{LoreError, LoreResult};

/// Sentinel type assigned to nodes whose header carries no `type` key.
pub const UNTYPED: &str = "untyped";

/// Separator used to pack list values into a single text column.
pub const LIST_SEP: char = '\u{1f}';

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// A single frontmatter value: scalar text (original spelling preserved) or
/// a list of such.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Text(String),
    List(Vec<String>),
}

impl MetaValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::List(_) => None,
        }
    }

    /// View the value as list items; a scalar is a one-element list.
    pub fn items(&self) -> Vec<&str> {
        match self {
            Self::Text(s) => vec![s.as_str()],
            Self::List(items) => items.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.is_empty(),
            Self::List(items) => items.is_empty(),
        }
    }

    /// Pack into a single text column using the reserved separator.
    pub fn encode(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::List(items) => items.join(&LIST_SEP.to_string()),
        }
    }

    /// Inverse of [`encode`](Self::encode): a stored value containing the
    /// separator is a list, everything else a scalar.
    pub fn decode(raw: &str) -> Self {
        if raw.contains(LIST_SEP) {
            Self::List(raw.split(LIST_SEP).map(str::to_string).collect())
        } else {
            Self::Text(raw.to_string())
        }
    }
}

impl std::fmt::Display for MetaValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::List(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

/// Insertion-ordered `field -> value` mapping.
///
/// Field order is load-bearing: it drives the column order a type's table
/// grows in, so a plain `HashMap` will not do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    entries: Vec<(String, MetaValue)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, replacing in place when the key is already present (later
    /// duplicate keys in a header win without reordering).
    pub fn insert(&mut self, key: impl Into<String>, value: MetaValue) {
        let key = key.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<MetaValue> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// List view of a field: scalars read as one-element lists, missing
    /// fields as empty.
    pub fn list(&self, key: &str) -> Vec<&str> {
        self.get(key).map(|v| v.items()).unwrap_or_default()
    }
}

impl Serialize for Metadata {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl FromIterator<(String, MetaValue)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (String, MetaValue)>>(iter: I) -> Self {
        let mut meta = Self::new();
        for (k, v) in iter {
            meta.insert(k, v);
        }
        meta
    }
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Sanitize a metadata key into a column identifier: lowercase, map
/// non-alphanumerics to `_`, prefix a leading digit with `_`.
pub fn sanitize_field(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for ch in key.chars() {
        if ch.is_alphanumeric() {
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
        } else {
            out.push('_');
        }
    }
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Sanitize a type name into a table identifier. Case is preserved, since type
/// names are case-sensitive strings; collision checks downstream must
/// compare case-insensitively (SQLite table names fold case).
pub fn sanitize_ident(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_alphanumeric() {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Node names are free-form apart from being non-empty and unable to nest
/// inside a wikilink.
pub fn validate_name(name: &str) -> LoreResult<()> {
    if name.is_empty() {
        return Err(LoreError::InvalidInput("node name must not be empty".into()));
    }
    if name.contains("[[") || name.contains("]]") {
        return Err(LoreError::InvalidInput(format!(
            "node name must not contain wikilink delimiters: {name}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Changelog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    NodeWrite,
    NodeRm,
    NodeMv,
    NodeCp,
    NodeTypeChange,
    TypeAdd,
    TypeRm,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NodeWrite => "node.write",
            Self::NodeRm => "node.rm",
            Self::NodeMv => "node.mv",
            Self::NodeCp => "node.cp",
            Self::NodeTypeChange => "node.type_change",
            Self::TypeAdd => "type.add",
            Self::TypeRm => "type.rm",
        }
    }
}

impl std::str::FromStr for ChangeOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "node.write" => Ok(Self::NodeWrite),
            "node.rm" => Ok(Self::NodeRm),
            "node.mv" => Ok(Self::NodeMv),
            "node.cp" => Ok(Self::NodeCp),
            "node.type_change" => Ok(Self::NodeTypeChange),
            "type.add" => Ok(Self::TypeAdd),
            "type.rm" => Ok(Self::TypeRm),
            _ => Err(format!("unknown change op: {s}")),
        }
    }
}

impl std::fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Self-contained description of one mutation, sufficient to replay it
/// against another store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangePayload {
    Write {
        name: String,
        node_type: String,
        content: String,
    },
    Rm {
        name: String,
        node_type: String,
    },
    Mv {
        old: String,
        new: String,
        node_type: String,
    },
    Cp {
        src: String,
        dst: String,
        node_type: String,
        content: String,
    },
    TypeChange {
        name: String,
        old_type: String,
        new_type: String,
        content: String,
    },
    TypeAdd {
        name: String,
    },
    TypeRm {
        name: String,
    },
}

impl ChangePayload {
    pub fn op(&self) -> ChangeOp {
        match self {
            Self::Write { .. } => ChangeOp::NodeWrite,
            Self::Rm { .. } => ChangeOp::NodeRm,
            Self::Mv { .. } => ChangeOp::NodeMv,
            Self::Cp { .. } => ChangeOp::NodeCp,
            Self::TypeChange { .. } => ChangeOp::NodeTypeChange,
            Self::TypeAdd { .. } => ChangeOp::TypeAdd,
            Self::TypeRm { .. } => ChangeOp::TypeRm,
        }
    }

    /// The node or type the mutation is about, as recorded in the `subject`
    /// column.
    pub fn subject(&self) -> &str {
        match self {
            Self::Write { name, .. }
            | Self::Rm { name, .. }
            | Self::TypeChange { name, .. }
            | Self::TypeAdd { name }
            | Self::TypeRm { name } => name,
            Self::Mv { old, .. } => old,
            Self::Cp { dst, .. } => dst,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub seq: i64,
    pub ts: String,
    pub op: ChangeOp,
    pub subject: String,
    pub payload: ChangePayload,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// One failed rule on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub node: String,
    pub rule: String,
    pub message: String,
}

impl Violation {
    pub fn new(
        node: impl Into<String>,
        rule: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            node: node.into(),
            rule: rule.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: [{}] {}", self.node, self.rule, self.message)
    }
}

// ---------------------------------------------------------------------------
// Read views
// ---------------------------------------------------------------------------

/// Summary view returned by `info`.
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub name: String,
    /// `None` for the untyped sentinel.
    pub node_type: Option<String>,
    pub meta: Metadata,
    pub tags: Vec<String>,
    pub content_length: usize,
    pub has_content: bool,
}
