//! Wikilink extraction and name resolution.
//!
//! Targets are kept verbatim; resolution against the live node set happens
//! at query time, so a link written before its target exists starts working
//! the moment the target is created.

/// Extract `[[target]]` tokens from body text, left to right.
///
/// A `|` splits display text from the target and only the target (left
/// side) is kept. Targets are trimmed; empties are dropped; duplicates
/// collapse to the first appearance, preserving source order.
pub fn extract_wikilinks(content: &str) -> Vec<String> {
    let mut targets: Vec<String> = Vec::new();
    let mut search_start = 0usize;

    while search_start < content.len() {
        let Some(open_rel) = content[search_start..].find("[[") else {
            break;
        };
        let link_start = search_start + open_rel + 2;
        let Some(close_rel) = content[link_start..].find("]]") else {
            break;
        };
        let link_end = link_start + close_rel;
        search_start = link_end + 2;

        let raw = &content[link_start..link_end];
        let target = raw.split_once('|').map_or(raw, |(left, _)| left).trim();

        if !target.is_empty() && !targets.iter().any(|t| t == target) {
            targets.push(target.to_string());
        }
    }

    targets
}

/// Normalize a name for fuzzy matching: lowercase, with runs of `-`, `_`,
/// and whitespace collapsed to a single `-`.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for ch in name.trim().chars() {
        if ch == '-' || ch == '_' || ch.is_whitespace() {
            pending_sep = !out.is_empty();
        } else {
            if pending_sep {
                out.push('-');
                pending_sep = false;
            }
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
        }
    }
    out
}

/// Resolve a wikilink token against the current node names.
///
/// Tiers: exact match, then case-insensitive, then normalized. Pure and
/// deterministic: `names` is expected sorted so ties break toward the
/// lexicographically first candidate.
pub fn resolve<'a>(token: &str, names: &'a [String]) -> Option<&'a str> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    if let Some(name) = names.iter().find(|n| n.as_str() == token) {
        return Some(name.as_str());
    }

    let lowered = token.to_lowercase();
    if let Some(name) = names.iter().find(|n| n.to_lowercase() == lowered) {
        return Some(name.as_str());
    }

    let normalized = normalize_name(token);
    names
        .iter()
        .find(|n| normalize_name(n) == normalized)
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        let mut v: Vec<String> = list.iter().map(|s| s.to_string()).collect();
        v.sort();
        v
    }

    #[test]
    fn extracts_in_source_order() {
        let links = extract_wikilinks("See [[beta]] then [[alpha]] then [[beta]] again");
        assert_eq!(links, vec!["beta", "alpha"]);
    }

    #[test]
    fn pipe_keeps_target_side() {
        let links = extract_wikilinks("Read [[target-note|the display text]] now");
        assert_eq!(links, vec!["target-note"]);
    }

    #[test]
    fn trims_and_drops_empty_targets() {
        let links = extract_wikilinks("[[  padded  ]] and [[]] and [[ ]]");
        assert_eq!(links, vec!["padded"]);
    }

    #[test]
    fn unclosed_link_is_ignored() {
        assert!(extract_wikilinks("dangling [[never closed").is_empty());
    }

    #[test]
    fn normalize_collapses_separator_runs() {
        assert_eq!(normalize_name("My  Cool__Note"), "my-cool-note");
        assert_eq!(normalize_name("already-normal"), "already-normal");
        assert_eq!(normalize_name("  edge -_ case  "), "edge-case");
    }

    #[test]
    fn resolve_prefers_exact_over_fuzzy() {
        let ns = names(&["Note", "note"]);
        assert_eq!(resolve("note", &ns), Some("note"));
        assert_eq!(resolve("Note", &ns), Some("Note"));
    }

    #[test]
    fn resolve_case_insensitive_tier() {
        let ns = names(&["My Note"]);
        assert_eq!(resolve("my note", &ns), Some("My Note"));
    }

    #[test]
    fn resolve_normalized_tier() {
        let ns = names(&["my-note"]);
        assert_eq!(resolve("My Note", &ns), Some("my-note"));
        assert_eq!(resolve("my_note", &ns), Some("my-note"));
    }

    #[test]
    fn resolve_unmatched_is_none() {
        let ns = names(&["alpha"]);
        assert_eq!(resolve("omega", &ns), None);
        assert_eq!(resolve("", &ns), None);
    }
}
