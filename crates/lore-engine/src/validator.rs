//! Composable validation rules and the gatekeeper validator.
//!
//! A rule is a type-filtered check over a read-only graph view. `check`
//! runs every rule and collects every violation, never short-circuiting, so
//! callers always see the full list.

use lore_core::{sanitize_field, LoreResult, Metadata, Violation};

use crate::view::GraphView;

pub type RuleCheck =
    Box<dyn Fn(&GraphView<'_>, &str, &Metadata) -> LoreResult<Vec<Violation>> + Send + Sync>;

pub struct Rule {
    type_filter: Option<String>,
    check: RuleCheck,
    /// Present only on `freeze_schema` rules: the exact field set the
    /// schema registry is instructed to keep on install.
    frozen_fields: Option<Vec<String>>,
}

impl Rule {
    pub fn new(type_filter: Option<&str>, check: RuleCheck) -> Self {
        Self {
            type_filter: type_filter.map(str::to_string),
            check,
            frozen_fields: None,
        }
    }
}

/// An ordered collection of rules.
#[derive(Default)]
pub struct Validator {
    rules: Vec<Rule>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule; chains.
    pub fn add(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// `(type, fields)` pairs from `freeze_schema` rules, applied to the
    /// schema registry when the validator is installed.
    pub(crate) fn frozen(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.rules.iter().filter_map(|rule| {
            match (&rule.type_filter, &rule.frozen_fields) {
                (Some(t), Some(fields)) => Some((t.as_str(), fields.as_slice())),
                _ => None,
            }
        })
    }

    /// Run every rule against every node it applies to, collecting all
    /// violations.
    pub fn check(&self, view: &GraphView<'_>) -> LoreResult<Vec<Violation>> {
        let mut violations = Vec::new();
        for rule in &self.rules {
            let names: Vec<String> = match &rule.type_filter {
                Some(t) => view.ls(t)?,
                None => view.names().to_vec(),
            };
            for name in names {
                let meta = view.frontmatter(&name)?.unwrap_or_default();
                violations.extend((rule.check)(view, &name, &meta)?);
            }
        }
        Ok(violations)
    }
}

// ---------------------------------------------------------------------------
// Built-in rule factories
// ---------------------------------------------------------------------------

/// Nodes of `type_name` may only carry the listed fields. On install, the
/// schema registry's field set for the type is set to exactly this list.
pub fn freeze_schema(type_name: &str, fields: &[&str]) -> Rule {
    let originals: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
    let allowed: Vec<String> = fields.iter().map(|f| sanitize_field(f)).collect();

    let mut rule = Rule::new(
        Some(type_name),
        Box::new(move |_view, node, meta| {
            let mut extra: Vec<&str> = meta
                .keys()
                .filter(|k| *k != "type" && !allowed.contains(&sanitize_field(k)))
                .collect();
            extra.sort_unstable();
            if extra.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(vec![Violation::new(
                    node,
                    "freeze_schema",
                    format!("disallowed field(s): {}", extra.join(", ")),
                )])
            }
        }),
    );
    rule.frozen_fields = Some(originals);
    rule
}

/// Every node of `type_name` has `field` present and non-empty.
pub fn requires_field(type_name: &str, field: &str) -> Rule {
    let field = field.to_string();
    Rule::new(
        Some(type_name),
        Box::new(move |_view, node, meta| {
            let wanted = sanitize_field(&field);
            let present = meta
                .iter()
                .any(|(k, v)| sanitize_field(k) == wanted && !v.is_empty());
            if present {
                Ok(Vec::new())
            } else {
                Ok(vec![Violation::new(
                    node,
                    "requires_field",
                    format!("missing field '{field}'"),
                )])
            }
        }),
    )
}

/// Every node of `type_name` carries `tag` in its `tags` field.
pub fn requires_tag(type_name: &str, tag: &str) -> Rule {
    let tag = tag.to_string();
    Rule::new(
        Some(type_name),
        Box::new(move |_view, node, meta| {
            if meta.list("tags").iter().any(|t| *t == tag) {
                Ok(Vec::new())
            } else {
                Ok(vec![Violation::new(
                    node,
                    "requires_tag",
                    format!("missing tag '{tag}'"),
                )])
            }
        }),
    )
}

/// Every node of `type_name` has at least one outgoing edge that resolves
/// to a node of `target_type`. Unresolved tokens count as missing.
pub fn requires_link(type_name: &str, target_type: &str) -> Rule {
    let target_type = target_type.to_string();
    Rule::new(
        Some(type_name),
        Box::new(move |view, node, _meta| {
            for target in view.wikilinks(node)? {
                if view.node_type(&target)?.as_deref() == Some(target_type.as_str()) {
                    return Ok(Vec::new());
                }
            }
            Ok(vec![Violation::new(
                node,
                "requires_link",
                format!("must link to at least one node of type '{target_type}'"),
            )])
        }),
    )
}

/// Every node has at least one resolved link in or out.
pub fn no_orphans() -> Rule {
    Rule::new(
        None,
        Box::new(|view, node, _meta| {
            if !view.wikilinks(node)?.is_empty() || !view.backlinks(node)?.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(vec![Violation::new(
                    node,
                    "no_orphans",
                    "node has no incoming or outgoing links",
                )])
            }
        }),
    )
}

/// An arbitrary predicate: return a message to flag the node, `None` to
/// pass.
pub fn custom<F>(type_filter: Option<&str>, rule_name: &str, predicate: F) -> Rule
where
    F: Fn(&GraphView<'_>, &str, &Metadata) -> Option<String> + Send + Sync + 'static,
{
    let rule_name = rule_name.to_string();
    Rule::new(
        type_filter,
        Box::new(move |view, node, meta| {
            Ok(match predicate(view, node, meta) {
                Some(message) => vec![Violation::new(node, rule_name.clone(), message)],
                None => Vec::new(),
            })
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::KnowledgeGraph;
    use lore_core::LoreError;

    fn graph() -> KnowledgeGraph {
        KnowledgeGraph::open_in_memory(EngineConfig::default()).unwrap()
    }

    #[test]
    fn check_collects_all_violations_not_just_first() {
        let kg = graph();
        kg.write("a", "---\ntype: concept\n---\nno links").unwrap();
        kg.write("b", "---\ntype: concept\n---\nno links").unwrap();

        kg.set_validator(
            Validator::new()
                .add(requires_field("concept", "description"))
                .add(no_orphans()),
        )
        .unwrap();

        let violations = kg.check().unwrap();
        // Two missing fields plus two orphans.
        assert_eq!(violations.len(), 4);
    }

    #[test]
    fn requires_tag_accepts_scalar_and_list() {
        let kg = graph();
        kg.write("x", "---\ntype: note\ntags: [keep, draft]\n---\nb").unwrap();
        kg.write("y", "---\ntype: note\ntags: keep\n---\nb").unwrap();

        kg.set_validator(Validator::new().add(requires_tag("note", "keep")))
            .unwrap();
        assert!(kg.check().unwrap().is_empty());

        match kg.write("z", "---\ntype: note\ntags: [other]\n---\nb") {
            Err(LoreError::Invalid(violations)) => {
                assert_eq!(violations[0].rule, "requires_tag");
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn requires_link_counts_unresolved_as_missing() {
        let kg = graph();
        kg.write("person1", "---\ntype: person\n---\nbio").unwrap();
        kg.write(
            "paper1",
            "---\ntype: paper\n---\nCites [[person1]].",
        )
        .unwrap();
        kg.write(
            "paper2",
            "---\ntype: paper\n---\nCites [[nobody-yet]].",
        )
        .unwrap();

        let v = Validator::new().add(requires_link("paper", "person"));
        kg.set_validator(v).unwrap();

        let violations = kg.check().unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].node, "paper2");
    }

    #[test]
    fn custom_rule_messages_flow_through() {
        let kg = graph();
        kg.write("short", "---\ntype: note\n---\nhi").unwrap();

        kg.set_validator(Validator::new().add(custom(
            Some("note"),
            "min_length",
            |view, node, _meta| {
                let body = view
                    .document(node)
                    .ok()
                    .flatten()
                    .map(|d| d.body)
                    .unwrap_or_default();
                (body.len() < 10).then(|| format!("body too short ({} bytes)", body.len()))
            },
        )))
        .unwrap();

        let violations = kg.check().unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule, "min_length");
    }

    #[test]
    fn freeze_schema_reports_extras_sorted() {
        let kg = graph();
        kg.write(
            "c1",
            "---\ntype: concept\ndescription: d\nzzz: 1\naaa: 2\n---\nb",
        )
        .unwrap();

        kg.set_validator(Validator::new().add(freeze_schema("concept", &["description"])))
            .unwrap();
        let violations = kg.check().unwrap();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("aaa, zzz"));
    }
}
