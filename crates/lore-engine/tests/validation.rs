//! Gatekeeper semantics: a rejected mutation leaves no trace: node,
//! edges, schema, and changelog identical to the pre-state.

use lore_engine::{
    freeze_schema, no_orphans, requires_field, requires_link, EngineConfig, KnowledgeGraph,
    Layout, LoreError, Validator,
};

fn graph() -> KnowledgeGraph {
    KnowledgeGraph::open_in_memory(EngineConfig::default()).unwrap()
}

#[test]
fn rejected_write_leaves_no_partial_state() {
    let kg = graph();
    kg.set_validator(Validator::new().add(requires_field("concept", "description")))
        .unwrap();

    let seq_before = kg.changelog_seq().unwrap();
    let schema_before = kg.schema().unwrap();

    let err = kg
        .write("c1", "---\ntype: concept\n---\nLinks [[x]].")
        .unwrap_err();
    match err {
        LoreError::Invalid(violations) => {
            assert_eq!(violations.len(), 1);
            assert_eq!(violations[0].node, "c1");
            assert_eq!(violations[0].rule, "requires_field");
        }
        other => panic!("expected Invalid, got {other:?}"),
    }

    assert!(!kg.exists("c1").unwrap());
    assert!(kg.wikilinks_raw("c1").unwrap().is_empty());
    assert_eq!(kg.changelog_seq().unwrap(), seq_before);
    assert_eq!(kg.schema().unwrap(), schema_before);
    assert!(kg.ls("*").unwrap().is_empty());
}

#[test]
fn conforming_write_passes_the_gate() {
    let kg = graph();
    kg.set_validator(Validator::new().add(requires_field("concept", "description")))
        .unwrap();

    kg.write("c1", "---\ntype: concept\ndescription: fine\n---\nBody.")
        .unwrap();
    assert!(kg.exists("c1").unwrap());
    // Untyped nodes are outside the rule's filter.
    kg.write("loose", "no header at all").unwrap();
}

#[test]
fn gate_covers_mv_cp_and_type_removal() {
    let kg = graph();
    kg.write("p", "---\ntype: paper\n---\nCites [[person1]].").unwrap();
    kg.write("person1", "---\ntype: person\n---\nbio").unwrap();
    kg.set_validator(Validator::new().add(requires_link("paper", "person")))
        .unwrap();

    // Renaming the link target away breaks the paper's only resolved link.
    let err = kg.mv("person1", "person-renamed").unwrap_err();
    assert!(matches!(err, LoreError::Invalid(_)));
    assert!(kg.exists("person1").unwrap());
    assert!(!kg.exists("person-renamed").unwrap());

    // Copying a paper duplicates its conforming links: allowed.
    kg.cp("p", "p2").unwrap();

    // Dropping the person type would leave both papers linkless.
    let err = kg.remove_type("person").unwrap_err();
    assert!(matches!(err, LoreError::Invalid(_)));
    assert_eq!(kg.ls("person").unwrap(), vec!["person1"]);
}

#[test]
fn violations_accumulate_across_rules_and_nodes() {
    let kg = graph();
    kg.write("a", "---\ntype: concept\n---\nx").unwrap();
    kg.write("b", "---\ntype: concept\n---\nx").unwrap();

    let err = kg
        .set_validator(
            Validator::new()
                .add(requires_field("concept", "description"))
                .add(no_orphans()),
        )
        .and_then(|_| kg.write("c", "---\ntype: concept\n---\nx"))
        .unwrap_err();

    match err {
        // a, b, c all missing description; a, b, c all orphans.
        LoreError::Invalid(violations) => assert_eq!(violations.len(), 6),
        other => panic!("expected Invalid, got {other:?}"),
    }
    assert!(!kg.exists("c").unwrap());
}

#[test]
fn freeze_schema_prunes_fields_on_install() {
    for layout in [Layout::PerType, Layout::Unified] {
        let kg = KnowledgeGraph::open_in_memory(EngineConfig::with_layout(layout)).unwrap();
        kg.write(
            "c1",
            "---\ntype: concept\ndescription: d\nscratch: tmp\n---\nx",
        )
        .unwrap();
        assert_eq!(
            kg.schema().unwrap()["concept"],
            vec!["description", "scratch"]
        );

        // Install drops `scratch` from the registry...
        kg.set_validator(Validator::new().add(freeze_schema("concept", &["description"])))
            .unwrap();
        assert_eq!(kg.schema().unwrap()["concept"], vec!["description"]);

        // c1's header still carries `scratch`, so the whole-graph gate
        // flags it until the document itself is cleaned up.
        kg.clear_validator().unwrap();
        kg.write("c1", "---\ntype: concept\ndescription: d\n---\nx")
            .unwrap();
        kg.set_validator(Validator::new().add(freeze_schema("concept", &["description"])))
            .unwrap();

        // ...and the gate rejects new out-of-set fields.
        let err = kg
            .write("c2", "---\ntype: concept\ndescription: d\nrogue: 1\n---\nx")
            .unwrap_err();
        match err {
            LoreError::Invalid(violations) => {
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].rule, "freeze_schema");
                assert!(violations[0].message.contains("rogue"));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
        assert!(!kg.exists("c2").unwrap());
    }
}

#[test]
fn clear_validator_restores_freeform_writes() {
    let kg = graph();
    kg.set_validator(Validator::new().add(requires_field("concept", "description")))
        .unwrap();
    assert!(kg.write("c1", "---\ntype: concept\n---\nx").is_err());

    kg.clear_validator().unwrap();
    kg.write("c1", "---\ntype: concept\n---\nx").unwrap();
    assert!(kg.exists("c1").unwrap());
}

#[test]
fn check_reports_without_mutating() {
    let kg = graph();
    kg.write("orphan", "all alone").unwrap();
    kg.set_validator(Validator::new().add(no_orphans())).unwrap();

    let violations = kg.check().unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].rule, "no_orphans");
    // check() is read-only.
    assert!(kg.exists("orphan").unwrap());
}
