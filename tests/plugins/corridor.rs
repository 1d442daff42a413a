use palace::Palace;
use palace::core::audit;
use palace::core::caller::Caller;
use palace::core::error::PalaceError;
use palace::core::model::{AuditAction, Authority, LifecycleStatus, Scope, Source};
use palace::core::store::Store;
use palace::plugins::corridor;
use palace::plugins::records::{self, NewLearning, RecordMeta};
use tempfile::tempdir;

fn human() -> Caller {
    Caller::human("alice")
}

fn learning(store: &Store, content: &str, authority: Authority) -> String {
    records::create_learning(
        store,
        &NewLearning {
            content: content.to_string(),
            confidence: Some(0.8),
            scope: Scope::Palace,
            tags: vec!["rust".to_string()],
            ..NewLearning::default()
        },
        &RecordMeta {
            source: Source::Human,
            authority,
            actor_id: "alice".to_string(),
            session_id: None,
            origin_workspace: None,
        },
    )
    .unwrap()
    .id
}

#[test]
fn test_promotion_copies_learning_with_origin() {
    let tmp = tempdir().unwrap();
    let alpha = Palace::open(&tmp.path().join("alpha")).unwrap();
    let corridor_store = Store::corridor(tmp.path().join("corridor"));
    let id = learning(alpha.store(), "cargo caches break on NFS", Authority::Approved);

    let receipt = corridor::promote_to_corridor(alpha.store(), &corridor_store, &id, &human())
        .unwrap();
    assert_eq!(receipt.workspace_learning_id, id);
    assert_eq!(receipt.origin_workspace, "alpha");

    let promoted = records::get_learning(&corridor_store, &receipt.corridor_learning_id).unwrap();
    assert_eq!(promoted.scope, Scope::Corridor);
    assert_eq!(promoted.origin_workspace.as_deref(), Some("alpha"));
    assert_eq!(promoted.confidence, 0.8);
    assert_eq!(promoted.content, "cargo caches break on NFS");

    // The workspace copy is untouched.
    let original = records::get_learning(alpha.store(), &id).unwrap();
    assert_eq!(original.scope, Scope::Palace);
    assert_eq!(original.lifecycle_status, LifecycleStatus::Active);

    let entries = audit::list_audit(alpha.store(), Some(&id)).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, AuditAction::PromoteCorridor);

    let listed = corridor::list_corridor_learnings(&corridor_store, Some("alpha")).unwrap();
    assert_eq!(listed.len(), 1);
    assert!(
        corridor::list_corridor_learnings(&corridor_store, Some("beta"))
            .unwrap()
            .is_empty()
    );
}

#[test]
fn test_corridor_learnings_reach_other_workspaces() {
    let tmp = tempdir().unwrap();
    let corridor_root = tmp.path().join("corridor");
    let alpha = Palace::open(&tmp.path().join("alpha")).unwrap();
    let id = learning(alpha.store(), "pin the toolchain", Authority::Approved);
    corridor::promote_to_corridor(
        alpha.store(),
        &Store::corridor(&corridor_root),
        &id,
        &human(),
    )
    .unwrap();

    let beta = Palace::open(&tmp.path().join("beta"))
        .unwrap()
        .with_corridor(&corridor_root)
        .unwrap();
    let state = beta.authoritative_state("src/main.rs").unwrap();
    assert_eq!(state.learnings.len(), 1);
    let l = &state.learnings[0];
    assert_eq!(l.content, "pin the toolchain");
    assert_eq!(l.source_scope, Scope::Corridor);
    assert_eq!(l.origin_workspace.as_deref(), Some("alpha"));

    // Without the corridor attached the learning is invisible.
    let isolated = Palace::open(&tmp.path().join("gamma")).unwrap();
    assert!(isolated.authoritative_state("src/main.rs").unwrap().learnings.is_empty());
}

#[test]
fn test_promotion_guards() {
    let tmp = tempdir().unwrap();
    let alpha = Palace::open(&tmp.path().join("alpha")).unwrap();
    let corridor_store = Store::corridor(tmp.path().join("corridor"));
    let approved = learning(alpha.store(), "approved", Authority::Approved);
    let proposed = learning(alpha.store(), "unreviewed", Authority::Proposed);
    let obsolete = learning(alpha.store(), "obsolete", Authority::Approved);
    records::set_learning_lifecycle(alpha.store(), &obsolete, LifecycleStatus::Obsolete).unwrap();

    assert!(matches!(
        corridor::promote_to_corridor(
            alpha.store(),
            &corridor_store,
            &approved,
            &Caller::agent("claude")
        ),
        Err(PalaceError::Forbidden(_))
    ));
    assert!(matches!(
        corridor::promote_to_corridor(alpha.store(), &corridor_store, &proposed, &human()),
        Err(PalaceError::ValidationError(_))
    ));
    assert!(matches!(
        corridor::promote_to_corridor(alpha.store(), &corridor_store, &obsolete, &human()),
        Err(PalaceError::ValidationError(_))
    ));
    assert!(matches!(
        corridor::promote_to_corridor(alpha.store(), alpha.store(), &approved, &human()),
        Err(PalaceError::ValidationError(_))
    ));
    assert!(matches!(
        corridor::promote_to_corridor(alpha.store(), &corridor_store, "l_missing", &human()),
        Err(PalaceError::NotFound(_))
    ));
}

#[test]
fn test_uninitialized_corridor_is_empty() {
    let tmp = tempdir().unwrap();
    let corridor_store = Store::corridor(tmp.path().join("never-created"));
    assert!(
        corridor::list_corridor_learnings(&corridor_store, None)
            .unwrap()
            .is_empty()
    );
}
