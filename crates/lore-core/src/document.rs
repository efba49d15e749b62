use crate::model::{MetaValue, Metadata, UNTYPED};

/// A parsed node document: header metadata plus body text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub meta: Metadata,
    pub body: String,
}

impl Document {
    /// The type selected by the reserved `type` metadata key, or the
    /// untyped sentinel when absent (or not a scalar).
    pub fn node_type(&self) -> &str {
        match self.meta.get("type").and_then(MetaValue::as_text) {
            Some(t) if !t.is_empty() => t,
            _ => UNTYPED,
        }
    }
}

/// Split a raw document into frontmatter metadata and body.
///
/// The header starts when the first non-empty line is exactly `---` and runs
/// until the next `---` line. Anything malformed (no opening fence, no
/// closing fence, unparseable header lines) degrades to "no metadata, full
/// string is body". Header syntax never fails a write.
pub fn parse_document(content: &str) -> Document {
    let lines: Vec<&str> = content.lines().collect();

    let open = match lines.iter().position(|l| !l.trim().is_empty()) {
        Some(idx) if is_fence(lines[idx]) => idx,
        _ => {
            return Document {
                meta: Metadata::new(),
                body: content.to_string(),
            }
        }
    };

    let close = match lines[open + 1..].iter().position(|l| is_fence(l)) {
        Some(rel) => open + 1 + rel,
        None => {
            return Document {
                meta: Metadata::new(),
                body: content.to_string(),
            }
        }
    };

    let meta = parse_header(&lines[open + 1..close]);
    let body = lines[close + 1..]
        .join("\n")
        .trim_start_matches('\n')
        .to_string();

    Document { meta, body }
}

fn is_fence(line: &str) -> bool {
    line.trim_end() == "---"
}

/// Decode the header block as a minimal YAML subset: `key: value` lines,
/// inline lists `[a, b, c]`, block lists of indented `- item` lines, and
/// `#` comments. Values keep their original text; no boolean or integer
/// coercion.
fn parse_header(lines: &[&str]) -> Metadata {
    let mut meta = Metadata::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let stripped = line.trim();

        if stripped.is_empty() || stripped.starts_with('#') {
            i += 1;
            continue;
        }

        let Some(colon) = stripped.find(':') else {
            i += 1;
            continue;
        };
        let key = stripped[..colon].trim();
        let mut rest = stripped[colon + 1..].trim();

        // Inline comment, unless the value opens with a bracket or quote.
        if !rest.is_empty() && !rest.starts_with('[') && !rest.starts_with('"') && !rest.starts_with('\'') {
            if let Some(idx) = rest.find(" #") {
                rest = rest[..idx].trim();
            }
        }

        if key.is_empty() {
            i += 1;
            continue;
        }

        if !rest.is_empty() {
            meta.insert(key, parse_inline_value(rest));
            i += 1;
            continue;
        }

        // Block form: gather indented continuation lines.
        let mut items: Vec<String> = Vec::new();
        let mut scalar: Option<String> = None;
        let mut j = i + 1;
        while j < lines.len() {
            let bline = lines[j];
            if !bline.starts_with(char::is_whitespace) && !bline.trim().is_empty() {
                break;
            }
            let bstripped = bline.trim();
            if bstripped.is_empty() || bstripped.starts_with('#') {
                j += 1;
                continue;
            }
            if let Some(item) = bstripped.strip_prefix("- ") {
                items.push(unquote(item.trim()).to_string());
            } else if scalar.is_none() && items.is_empty() {
                scalar = Some(unquote(bstripped).to_string());
            }
            j += 1;
        }

        if !items.is_empty() {
            meta.insert(key, MetaValue::List(items));
        } else {
            meta.insert(key, MetaValue::Text(scalar.unwrap_or_default()));
        }
        i = j;
    }

    meta
}

fn parse_inline_value(raw: &str) -> MetaValue {
    if let Some(inner) = raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        let inner = inner.trim();
        if inner.is_empty() {
            return MetaValue::List(Vec::new());
        }
        let items = split_inline_list(inner)
            .into_iter()
            .map(|item| unquote(item.trim()).to_string())
            .filter(|item| !item.is_empty())
            .collect();
        return MetaValue::List(items);
    }
    MetaValue::Text(unquote(raw).to_string())
}

/// Split an inline list body on commas, respecting quoted segments.
fn split_inline_list(s: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut start = 0;
    let mut in_quote: Option<char> = None;

    for (idx, ch) in s.char_indices() {
        match in_quote {
            Some(q) if ch == q => in_quote = None,
            Some(_) => {}
            None if ch == '"' || ch == '\'' => in_quote = Some(ch),
            None if ch == ',' => {
                items.push(&s[start..idx]);
                start = idx + 1;
            }
            None => {}
        }
    }
    items.push(&s[start..]);
    items
}

fn unquote(val: &str) -> &str {
    if val.len() >= 2 {
        let bytes = val.as_bytes();
        if (bytes[0] == b'"' && bytes[val.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[val.len() - 1] == b'\'')
        {
            return &val[1..val.len() - 1];
        }
    }
    val
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scalar_header() {
        let doc = parse_document("---\ntype: concept\ndescription: a thing\n---\nBody here.");
        assert_eq!(doc.node_type(), "concept");
        assert_eq!(
            doc.meta.get("description").unwrap().as_text(),
            Some("a thing")
        );
        assert_eq!(doc.body, "Body here.");
    }

    #[test]
    fn parses_inline_list() {
        let doc = parse_document("---\ntags: [rust, sqlite, graphs]\n---\nx");
        assert_eq!(
            doc.meta.get("tags").unwrap(),
            &MetaValue::List(vec!["rust".into(), "sqlite".into(), "graphs".into()])
        );
    }

    #[test]
    fn parses_block_list() {
        let doc = parse_document("---\ntags:\n  - alpha\n  - beta\n---\nx");
        assert_eq!(
            doc.meta.get("tags").unwrap(),
            &MetaValue::List(vec!["alpha".into(), "beta".into()])
        );
    }

    #[test]
    fn preserves_scalar_text_without_coercion() {
        let doc = parse_document("---\ndraft: true\ncount: 042\n---\nx");
        assert_eq!(doc.meta.get("draft").unwrap().as_text(), Some("true"));
        assert_eq!(doc.meta.get("count").unwrap().as_text(), Some("042"));
    }

    #[test]
    fn strips_quotes_and_comments() {
        let doc = parse_document(
            "---\n# leading comment\ntitle: \"Quoted Title\"\nauthor: someone # trailing\n---\nx",
        );
        assert_eq!(doc.meta.get("title").unwrap().as_text(), Some("Quoted Title"));
        assert_eq!(doc.meta.get("author").unwrap().as_text(), Some("someone"));
    }

    #[test]
    fn no_frontmatter_is_all_body() {
        let content = "Just regular content\nwith no header";
        let doc = parse_document(content);
        assert!(doc.meta.is_empty());
        assert_eq!(doc.body, content);
        assert_eq!(doc.node_type(), UNTYPED);
    }

    #[test]
    fn unclosed_fence_is_all_body() {
        let content = "---\ntype: concept\nno closing fence";
        let doc = parse_document(content);
        assert!(doc.meta.is_empty());
        assert_eq!(doc.body, content);
    }

    #[test]
    fn leading_blank_lines_before_fence_are_tolerated() {
        let doc = parse_document("\n\n---\ntype: note\n---\nBody");
        assert_eq!(doc.node_type(), "note");
        assert_eq!(doc.body, "Body");
    }

    #[test]
    fn malformed_header_lines_are_skipped_not_fatal() {
        let doc = parse_document("---\njust words\ntype: ok\n---\nBody");
        assert_eq!(doc.node_type(), "ok");
        assert_eq!(doc.meta.len(), 1);
    }

    #[test]
    fn empty_inline_list() {
        let doc = parse_document("---\ntags: []\n---\nx");
        assert_eq!(doc.meta.get("tags").unwrap(), &MetaValue::List(vec![]));
    }

    #[test]
    fn quoted_list_items_keep_commas() {
        let doc = parse_document("---\npeople: [\"Doe, Jane\", smith]\n---\nx");
        assert_eq!(
            doc.meta.get("people").unwrap(),
            &MetaValue::List(vec!["Doe, Jane".into(), "smith".into()])
        );
    }

    #[test]
    fn duplicate_keys_last_wins_in_place() {
        let doc = parse_document("---\na: one\nb: two\na: three\n---\nx");
        let keys: Vec<_> = doc.meta.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(doc.meta.get("a").unwrap().as_text(), Some("three"));
    }
}
