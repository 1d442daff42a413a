use palace::core::audit;
use palace::core::caller::Caller;
use palace::core::db;
use palace::core::error::PalaceError;
use palace::core::model::{
    AuditAction, Authority, ProposalStatus, ProposedAs, RecordKind, Scope, Source,
};
use palace::core::store::Store;
use palace::plugins::proposals::{
    self, DirectWrite, NewProposal, Submission, classify_candidate, dedupe_key,
};
use palace::plugins::records::{self, NewDecision, NewLearning, RecordFilter};
use std::thread;
use tempfile::tempdir;

fn test_store() -> (tempfile::TempDir, Store) {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join(".palace");
    db::initialize_palace_db(&root).unwrap();
    (tmp, Store::workspace(root))
}

fn agent() -> Caller {
    Caller::agent("claude").with_session("s-1")
}

fn reviewer() -> Caller {
    Caller::human("reviewer1")
}

fn proposal(proposed_as: ProposedAs, content: &str) -> NewProposal {
    NewProposal {
        proposed_as,
        content: content.to_string(),
        context: String::new(),
        rationale: String::new(),
        scope: Scope::Palace,
        scope_path: String::new(),
        confidence: None,
        classification: None,
    }
}

#[test]
fn test_create_proposal_defaults() {
    let (_tmp, store) = test_store();
    let p = proposals::create_proposal(
        &store,
        &agent(),
        &proposal(ProposedAs::Learning, "the build fails when cache is cold"),
    )
    .unwrap();
    assert!(p.id.starts_with("p_"));
    assert_eq!(p.status, ProposalStatus::Pending);
    assert_eq!(p.source, Source::Agent);
    assert_eq!(p.confidence, Some(0.5));
    assert_eq!(p.created_by, "claude");
    assert_eq!(p.session_id.as_deref(), Some("s-1"));
    assert!(!p.classification_signals.is_empty());
    assert_eq!(proposals::get_proposal(&store, &p.id).unwrap(), p);
}

#[test]
fn test_duplicate_pending_proposal_conflicts() {
    let (_tmp, store) = test_store();
    let first = proposals::create_proposal(
        &store,
        &agent(),
        &proposal(ProposedAs::Decision, "use JWT"),
    )
    .unwrap();

    let err = proposals::create_proposal(
        &store,
        &Caller::agent("other"),
        &proposal(ProposedAs::Decision, "  Use   jwt "),
    )
    .unwrap_err();
    assert!(matches!(err, PalaceError::Conflict { .. }));
    assert_eq!(err.conflicting_id(), Some(first.id.as_str()));
    assert_eq!(
        proposals::list_proposals(&store, Some(ProposalStatus::Pending), None)
            .unwrap()
            .len(),
        1
    );

    // Same content as a learning is a different proposal.
    proposals::create_proposal(&store, &agent(), &proposal(ProposedAs::Learning, "use JWT"))
        .unwrap();
}

#[test]
fn test_concurrent_duplicates_leave_one_survivor() {
    let (_tmp, store) = test_store();
    let results: Vec<Result<_, PalaceError>> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let store = store.clone();
                s.spawn(move || {
                    proposals::create_proposal(
                        &store,
                        &Caller::agent(&format!("agent-{}", n)),
                        &proposal(ProposedAs::Decision, "adopt structured logging"),
                    )
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let ok = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 1);
    let winner = results.iter().find_map(|r| r.as_ref().ok()).unwrap();
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(err.conflicting_id(), Some(winner.id.as_str()));
    }
    assert_eq!(
        proposals::list_proposals(&store, None, None).unwrap().len(),
        1
    );
}

#[test]
fn test_approve_promotes_exactly_one_record() {
    let (_tmp, store) = test_store();
    let p = proposals::create_proposal(
        &store,
        &agent(),
        &NewProposal {
            rationale: "stateless".to_string(),
            ..proposal(ProposedAs::Decision, "use JWT")
        },
    )
    .unwrap();

    let receipt = proposals::approve_proposal(&store, &reviewer(), &p.id, "lgtm").unwrap();
    assert_eq!(receipt.record_kind, RecordKind::Decision);

    let decisions = records::list_decisions(&store, &RecordFilter::default()).unwrap();
    assert_eq!(decisions.len(), 1);
    let d = &decisions[0];
    assert_eq!(d.id, receipt.record_id);
    assert_eq!(d.authority, Authority::Approved);
    assert_eq!(d.source, Source::Agent);
    assert_eq!(d.rationale, "stateless");

    let reviewed = proposals::get_proposal(&store, &p.id).unwrap();
    assert_eq!(reviewed.status, ProposalStatus::Approved);
    assert_eq!(reviewed.reviewed_by.as_deref(), Some("reviewer1"));
    assert_eq!(reviewed.review_note.as_deref(), Some("lgtm"));
    assert_eq!(reviewed.promoted_record_id.as_deref(), Some(receipt.record_id.as_str()));

    let entries = audit::list_audit(&store, Some(&receipt.record_id)).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, AuditAction::Approve);
    assert_eq!(entries[0].actor_id, "reviewer1");

    // Terminal proposals cannot be reviewed again.
    let again = proposals::approve_proposal(&store, &reviewer(), &p.id, "").unwrap_err();
    assert_eq!(again.conflicting_id(), Some(p.id.as_str()));
    assert!(matches!(
        proposals::reject_proposal(&store, &reviewer(), &p.id, ""),
        Err(PalaceError::Conflict { .. })
    ));

    // A fresh proposal with the same content is allowed once the first is terminal.
    proposals::create_proposal(&store, &agent(), &proposal(ProposedAs::Decision, "use JWT"))
        .unwrap();
}

#[test]
fn test_approved_learning_keeps_confidence() {
    let (_tmp, store) = test_store();
    let p = proposals::create_proposal(
        &store,
        &agent(),
        &NewProposal {
            confidence: Some(0.7),
            scope: Scope::File,
            scope_path: "auth.go".to_string(),
            ..proposal(ProposedAs::Learning, "JWT needs rotation")
        },
    )
    .unwrap();
    let receipt = proposals::approve_proposal(&store, &reviewer(), &p.id, "").unwrap();
    let l = records::get_learning(&store, &receipt.record_id).unwrap();
    assert_eq!(l.confidence, 0.7);
    assert_eq!(l.scope, Scope::File);
    assert_eq!(l.scope_path, "auth.go");
}

#[test]
fn test_reject_promotes_nothing() {
    let (_tmp, store) = test_store();
    let p = proposals::create_proposal(
        &store,
        &agent(),
        &proposal(ProposedAs::Learning, "tests are slow because of fixtures"),
    )
    .unwrap();

    let rejected = proposals::reject_proposal(&store, &reviewer(), &p.id, "not true").unwrap();
    assert_eq!(rejected.status, ProposalStatus::Rejected);
    assert_eq!(rejected.promoted_record_id, None);
    assert!(
        records::list_learnings(&store, &RecordFilter::default(), records::ReadHit::Ignore)
            .unwrap()
            .is_empty()
    );

    let entries = audit::list_audit(&store, Some(&p.id)).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, AuditAction::Reject);
}

#[test]
fn test_agents_cannot_review_or_write_directly() {
    let (_tmp, store) = test_store();
    let p = proposals::create_proposal(&store, &agent(), &proposal(ProposedAs::Decision, "x"))
        .unwrap();

    assert!(matches!(
        proposals::approve_proposal(&store, &agent(), &p.id, ""),
        Err(PalaceError::Forbidden(_))
    ));
    assert!(matches!(
        proposals::reject_proposal(&store, &agent(), &p.id, ""),
        Err(PalaceError::Forbidden(_))
    ));
    let direct = proposals::direct_write(
        &store,
        &agent(),
        &DirectWrite {
            kind: ProposedAs::Decision,
            content: "x".to_string(),
            rationale: String::new(),
            context: String::new(),
            scope: Scope::Palace,
            scope_path: String::new(),
            confidence: None,
            tags: Vec::new(),
        },
    );
    assert!(matches!(direct, Err(PalaceError::Forbidden(_))));
    assert_eq!(
        proposals::get_proposal(&store, &p.id).unwrap().status,
        ProposalStatus::Pending
    );
}

#[test]
fn test_unknown_proposal_is_not_found() {
    let (_tmp, store) = test_store();
    assert!(matches!(
        proposals::approve_proposal(&store, &reviewer(), "p_missing", ""),
        Err(PalaceError::NotFound(_))
    ));
    assert!(matches!(
        proposals::get_proposal(&store, "p_missing"),
        Err(PalaceError::NotFound(_))
    ));
}

#[test]
fn test_direct_write_audits_content_hash() {
    let (_tmp, store) = test_store();
    let receipt = proposals::direct_write(
        &store,
        &reviewer(),
        &DirectWrite {
            kind: ProposedAs::Learning,
            content: "migrations must be reversible".to_string(),
            rationale: String::new(),
            context: String::new(),
            scope: Scope::Palace,
            scope_path: String::new(),
            confidence: Some(0.9),
            tags: vec!["db".to_string()],
        },
    )
    .unwrap();

    assert_eq!(receipt.record_kind, RecordKind::Learning);
    assert_eq!(
        receipt.content_hash,
        audit::content_hash("migrations must be reversible")
    );
    let entries = audit::list_audit(&store, Some(&receipt.record_id)).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, AuditAction::DirectWrite);
    assert_eq!(Some(entries[0].id.clone()), receipt.audit_id);
    assert_eq!(entries[0].details["content_hash"], receipt.content_hash.as_str());

    let l = records::get_learning(&store, &receipt.record_id).unwrap();
    assert_eq!(l.authority, Authority::Approved);
    assert_eq!(l.source, Source::Human);
    assert_eq!(records::get_tags(&store, &l.id).unwrap(), vec!["db"]);
}

#[test]
fn test_submit_routes_by_caller() {
    let (_tmp, store) = test_store();
    let req = NewDecision {
        content: "prefer composition".to_string(),
        ..NewDecision::default()
    };

    let from_agent = proposals::submit_decision(&store, &agent(), &req).unwrap();
    assert!(from_agent.is_proposal());
    assert!(
        records::list_decisions(&store, &RecordFilter::default())
            .unwrap()
            .is_empty()
    );

    match proposals::submit_decision(&store, &reviewer(), &req).unwrap() {
        Submission::Written(receipt) => assert_eq!(receipt.record_kind, RecordKind::Decision),
        Submission::Proposed(p) => panic!("human write became proposal {}", p.id),
    }

    let learning = proposals::submit_learning(
        &store,
        &agent(),
        &NewLearning {
            content: "cold cache doubles build time".to_string(),
            confidence: Some(0.6),
            ..NewLearning::default()
        },
    )
    .unwrap();
    match learning {
        Submission::Proposed(p) => {
            assert_eq!(p.proposed_as, ProposedAs::Learning);
            assert_eq!(p.confidence, Some(0.6));
        }
        Submission::Written(_) => panic!("agent learning was written directly"),
    }
}

#[test]
fn test_list_proposals_filters_by_status() {
    let (_tmp, store) = test_store();
    let a = proposals::create_proposal(&store, &agent(), &proposal(ProposedAs::Decision, "a"))
        .unwrap();
    proposals::create_proposal(&store, &agent(), &proposal(ProposedAs::Decision, "b")).unwrap();
    proposals::reject_proposal(&store, &reviewer(), &a.id, "").unwrap();

    assert_eq!(
        proposals::list_proposals(&store, Some(ProposalStatus::Pending), None)
            .unwrap()
            .len(),
        1
    );
    let rejected = proposals::list_proposals(&store, Some(ProposalStatus::Rejected), None).unwrap();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].id, a.id);
    assert_eq!(
        proposals::list_proposals(&store, None, Some(1)).unwrap().len(),
        1
    );
}

#[test]
fn test_invalid_proposals_are_rejected() {
    let (_tmp, store) = test_store();
    assert!(matches!(
        proposals::create_proposal(&store, &agent(), &proposal(ProposedAs::Decision, " ")),
        Err(PalaceError::ValidationError(_))
    ));
    assert!(matches!(
        proposals::create_proposal(
            &store,
            &agent(),
            &NewProposal {
                confidence: Some(2.0),
                ..proposal(ProposedAs::Learning, "x")
            }
        ),
        Err(PalaceError::ValidationError(_))
    ));
}

#[test]
fn test_classifier_and_dedupe_key() {
    assert_eq!(
        classify_candidate("We decided to standardize on Postgres").proposed_as,
        ProposedAs::Decision
    );
    assert_eq!(
        classify_candidate("Turns out the build fails when the cache is cold").proposed_as,
        ProposedAs::Learning
    );
    assert_eq!(classify_candidate("hello").confidence, 0.5);

    let a = dedupe_key(ProposedAs::Decision, "Use JWT", Scope::Palace, "");
    let b = dedupe_key(ProposedAs::Decision, "use   jwt", Scope::Palace, "");
    let c = dedupe_key(ProposedAs::Decision, "use jwt", Scope::File, "auth.go");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.len(), 64);
}
