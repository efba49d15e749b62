//! Push-by-delta, pull-by-scope, and the lossy snapshot fallback.

use lore_engine::{EngineConfig, KnowledgeGraph, LoreError, RemoteStore, Scope};

fn graph() -> KnowledgeGraph {
    KnowledgeGraph::open_in_memory(EngineConfig::default()).unwrap()
}

fn scope_of(pairs: &[(&str, &str)]) -> Scope {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn push_replays_writes_renames_and_deletes() {
    let kg = graph();
    let mut remote = RemoteStore::open_in_memory().unwrap();
    let scope = scope_of(&[("team", "eng")]);

    kg.write("a", "---\ntype: note\nstatus: live\n---\nA body").unwrap();
    kg.write("b", "---\ntype: note\n---\nB body").unwrap();
    let seq = kg.push(&mut remote, &scope, 0).unwrap();
    assert_eq!(seq, kg.changelog_seq().unwrap());

    assert_eq!(
        remote.nodes_in_scope(&scope).unwrap(),
        vec![
            ("a".to_string(), "note".to_string()),
            ("b".to_string(), "note".to_string()),
        ]
    );

    // Incremental delta from the cursor.
    kg.mv("b", "b2").unwrap();
    kg.rm("a").unwrap();
    let seq2 = kg.push(&mut remote, &scope, seq).unwrap();
    assert!(seq2 > seq);

    assert_eq!(
        remote.nodes_in_scope(&scope).unwrap(),
        vec![("b2".to_string(), "note".to_string())]
    );
    assert_eq!(
        remote.content_of(&scope, "b2", "note").unwrap().as_deref(),
        Some("---\ntype: note\n---\nB body")
    );
}

#[test]
fn push_is_idempotent() {
    let kg = graph();
    let mut remote = RemoteStore::open_in_memory().unwrap();
    let scope = scope_of(&[("team", "eng")]);

    kg.write("a", "---\ntype: note\n---\nx").unwrap();
    kg.write("b", "plain").unwrap();
    kg.mv("b", "c").unwrap();

    let first = kg.push(&mut remote, &scope, 0).unwrap();
    let state_first = remote.nodes_in_scope(&scope).unwrap();

    let second = kg.push(&mut remote, &scope, 0).unwrap();
    assert_eq!(first, second);
    assert_eq!(remote.nodes_in_scope(&scope).unwrap(), state_first);
}

#[test]
fn push_with_no_new_entries_returns_cursor() {
    let kg = graph();
    let mut remote = RemoteStore::open_in_memory().unwrap();
    let scope = scope_of(&[]);

    kg.write("a", "x").unwrap();
    let seq = kg.push(&mut remote, &scope, 0).unwrap();
    assert_eq!(kg.push(&mut remote, &scope, seq).unwrap(), seq);
}

#[test]
fn type_changes_replay_at_the_remote() {
    let kg = graph();
    let mut remote = RemoteStore::open_in_memory().unwrap();
    let scope = scope_of(&[("team", "eng")]);

    kg.write("n", "---\ntype: draft\n---\nx").unwrap();
    kg.push(&mut remote, &scope, 0).unwrap();

    kg.write("n", "---\ntype: published\n---\nx").unwrap();
    kg.push(&mut remote, &scope, 0).unwrap();

    assert_eq!(
        remote.nodes_in_scope(&scope).unwrap(),
        vec![("n".to_string(), "published".to_string())]
    );
    // The draft-table row is gone.
    assert_eq!(remote.content_of(&scope, "n", "draft").unwrap(), None);
}

#[test]
fn scopes_partition_the_remote() {
    let eng_kg = graph();
    let ops_kg = graph();
    let mut remote = RemoteStore::open_in_memory().unwrap();
    let eng = scope_of(&[("team", "eng")]);
    let ops = scope_of(&[("team", "ops")]);

    eng_kg.write("shared", "---\ntype: note\n---\neng version").unwrap();
    ops_kg.write("shared", "---\ntype: note\n---\nops version").unwrap();

    eng_kg.push(&mut remote, &eng, 0).unwrap();
    ops_kg.push(&mut remote, &ops, 0).unwrap();

    assert_eq!(
        remote.content_of(&eng, "shared", "note").unwrap().as_deref(),
        Some("---\ntype: note\n---\neng version")
    );
    assert_eq!(
        remote.content_of(&ops, "shared", "note").unwrap().as_deref(),
        Some("---\ntype: note\n---\nops version")
    );
}

#[test]
fn pull_restores_state_and_bypasses_the_changelog() {
    let source = graph();
    let mut remote = RemoteStore::open_in_memory().unwrap();
    let scope = scope_of(&[("team", "eng"), ("user", "pat")]);

    source
        .write("a", "---\ntype: concept\ndescription: d\n---\nLinks [[b]].")
        .unwrap();
    source.write("b", "---\ntype: concept\n---\nBody").unwrap();
    source.add_type("empty-type").unwrap();
    source.push(&mut remote, &scope, 0).unwrap();

    let target = graph();
    let pulled = target.pull(&remote, &scope).unwrap();
    assert_eq!(pulled, 2);

    // Full fidelity: content, schema, links.
    assert_eq!(target.cat("a").unwrap(), source.cat("a").unwrap());
    assert_eq!(target.ls("concept").unwrap(), vec!["a", "b"]);
    assert_eq!(target.wikilinks("a").unwrap(), vec!["b"]);
    assert_eq!(target.backlinks("b").unwrap(), vec!["a"]);
    assert!(target.types().unwrap().contains(&"empty-type".to_string()));
    assert!(target
        .schema()
        .unwrap()["concept"]
        .contains(&"description".to_string()));

    // Pulled rows must never push back: the local changelog stayed empty.
    assert_eq!(target.changelog_seq().unwrap(), 0);
}

#[test]
fn pull_upserts_over_existing_nodes() {
    let source = graph();
    let target = graph();
    let mut remote = RemoteStore::open_in_memory().unwrap();
    let scope = scope_of(&[("team", "eng")]);

    source.write("n", "---\ntype: note\n---\nremote truth").unwrap();
    source.push(&mut remote, &scope, 0).unwrap();

    target.write("n", "---\ntype: note\n---\nstale local").unwrap();
    target.pull(&remote, &scope).unwrap();
    assert_eq!(target.cat("n").unwrap(), "---\ntype: note\n---\nremote truth");
}

#[test]
fn delta_push_requires_the_changelog() {
    let kg = KnowledgeGraph::open_in_memory(EngineConfig::default().without_changelog()).unwrap();
    let mut remote = RemoteStore::open_in_memory().unwrap();
    let scope = scope_of(&[("team", "eng")]);

    kg.write("a", "x").unwrap();
    assert!(matches!(
        kg.push(&mut remote, &scope, 0),
        Err(LoreError::ChangelogDisabled)
    ));
}

#[test]
fn snapshot_push_works_without_changelog_but_is_lossy() {
    let kg = KnowledgeGraph::open_in_memory(EngineConfig::default().without_changelog()).unwrap();
    let mut remote = RemoteStore::open_in_memory().unwrap();
    let scope = scope_of(&[("team", "eng")]);

    kg.write("keep", "---\ntype: note\n---\nx").unwrap();
    kg.write("drop", "---\ntype: note\n---\ny").unwrap();
    assert_eq!(kg.push_snapshot(&mut remote, &scope).unwrap(), 2);

    kg.rm("drop").unwrap();
    assert_eq!(kg.push_snapshot(&mut remote, &scope).unwrap(), 1);

    // Deletion did not propagate: the remote still holds both rows.
    assert_eq!(
        remote.nodes_in_scope(&scope).unwrap(),
        vec![
            ("drop".to_string(), "note".to_string()),
            ("keep".to_string(), "note".to_string()),
        ]
    );
}

#[test]
fn truncated_changelog_still_pushes_later_deltas() {
    let kg = graph();
    let mut remote = RemoteStore::open_in_memory().unwrap();
    let scope = scope_of(&[]);

    kg.write("a", "x").unwrap();
    let cursor = kg.push(&mut remote, &scope, 0).unwrap();

    kg.write("b", "y").unwrap();
    kg.truncate_changelog(cursor + 1).unwrap();

    let seq = kg.push(&mut remote, &scope, cursor).unwrap();
    assert_eq!(seq, kg.changelog_seq().unwrap());
    assert_eq!(
        remote.nodes_in_scope(&scope).unwrap(),
        vec![
            ("a".to_string(), "untyped".to_string()),
            ("b".to_string(), "untyped".to_string()),
        ]
    );
}
