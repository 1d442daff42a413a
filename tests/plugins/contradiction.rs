use palace::core::caller::Caller;
use palace::core::config::ContradictionConfig;
use palace::core::db;
use palace::core::error::PalaceError;
use palace::core::model::{DecisionStatus, LinkKind, Relation, Scope};
use palace::core::store::Store;
use palace::plugins::contradiction::{self, pair_key};
use palace::plugins::links::{self, FsCodeValidator, LinkFilter};
use palace::plugins::records::{self, NewDecision, RecordMeta};
use palace::plugins::semantic::{Collaborators, ContradictionVerdict, PairwiseClassifier};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn test_store() -> (tempfile::TempDir, Store) {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join(".palace");
    db::initialize_palace_db(&root).unwrap();
    (tmp, Store::workspace(root))
}

fn human() -> Caller {
    Caller::human("alice")
}

fn decision(store: &Store, content: &str) -> String {
    records::create_decision(
        store,
        &NewDecision {
            content: content.to_string(),
            scope: Scope::Palace,
            ..NewDecision::default()
        },
        &RecordMeta::approved_by(&human()),
    )
    .unwrap()
    .id
}

/// Flags a pair as contradictory when exactly one side says "never".
struct NegationClassifier {
    confidence: f64,
}

impl PairwiseClassifier for NegationClassifier {
    fn classify(&self, a: &str, b: &str) -> anyhow::Result<ContradictionVerdict> {
        let conflict = a.contains("never") != b.contains("never");
        Ok(ContradictionVerdict {
            is_contradiction: conflict,
            contradiction_type: "direct".to_string(),
            confidence: if conflict { self.confidence } else { 0.1 },
            explanation: "negation".to_string(),
        })
    }
}

struct BrokenClassifier;

impl PairwiseClassifier for BrokenClassifier {
    fn classify(&self, _a: &str, _b: &str) -> anyhow::Result<ContradictionVerdict> {
        anyhow::bail!("model endpoint returned 503")
    }
}

struct SlowClassifier;

impl PairwiseClassifier for SlowClassifier {
    fn classify(&self, _a: &str, _b: &str) -> anyhow::Result<ContradictionVerdict> {
        std::thread::sleep(Duration::from_millis(500));
        anyhow::bail!("too late")
    }
}

fn collaborators(confidence: f64) -> Collaborators {
    Collaborators::none().with_classifier(Arc::new(NegationClassifier { confidence }))
}

fn seed(store: &Store) -> (String, String) {
    let a = decision(store, "use JWT tokens for service auth");
    let b = decision(store, "never use JWT tokens for service auth");
    decision(store, "postgres is the primary datastore");
    (a, b)
}

fn contradiction_links(tmp: &tempfile::TempDir, store: &Store) -> usize {
    links::list_links(
        store,
        &LinkFilter {
            relation: Some(Relation::Contradicts),
            ..LinkFilter::default()
        },
        &FsCodeValidator::new(tmp.path()),
    )
    .unwrap()
    .len()
}

#[test]
fn test_check_finds_contradiction_without_embedder() {
    let (tmp, store) = test_store();
    let (a, b) = seed(&store);

    let report = contradiction::check_record(
        &store,
        &collaborators(0.9),
        &ContradictionConfig::default(),
        &human(),
        &a,
        false,
    )
    .unwrap();
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].conflicting_id, b);
    assert!(report.findings[0].similarity.unwrap() >= 0.3);
    assert_eq!(report.findings[0].link_id, None);
    assert_eq!(contradiction_links(&tmp, &store), 0);
}

#[test]
fn test_agent_auto_link_is_suppressed() {
    let (tmp, store) = test_store();
    let (a, _b) = seed(&store);

    let report = contradiction::check_record(
        &store,
        &collaborators(0.9),
        &ContradictionConfig::default(),
        &Caller::agent("claude"),
        &a,
        true,
    )
    .unwrap();
    assert_eq!(report.findings.len(), 1);
    assert!(report.auto_link_requested);
    assert!(report.auto_link_suppressed);
    assert!(report.findings.iter().all(|f| f.link_id.is_none()));
    assert_eq!(contradiction_links(&tmp, &store), 0);
}

#[test]
fn test_human_auto_link_persists_once() {
    let (tmp, store) = test_store();
    let (a, b) = seed(&store);
    let config = ContradictionConfig::default();

    let first =
        contradiction::check_record(&store, &collaborators(0.9), &config, &human(), &a, true)
            .unwrap();
    let link_id = first.findings[0].link_id.clone().unwrap();
    assert!(!first.auto_link_suppressed);

    let second =
        contradiction::check_record(&store, &collaborators(0.9), &config, &human(), &a, true)
            .unwrap();
    assert_eq!(second.findings[0].link_id.as_deref(), Some(link_id.as_str()));
    assert_eq!(contradiction_links(&tmp, &store), 1);

    let link = links::get_link(&store, &link_id, &FsCodeValidator::new(tmp.path())).unwrap();
    assert_eq!(link.source_id, a);
    assert_eq!(link.target_id, b);
    assert_eq!(link.target_kind, LinkKind::Decision);
}

#[test]
fn test_reverse_check_reuses_existing_link() {
    let (tmp, store) = test_store();
    let (a, b) = seed(&store);
    let config = ContradictionConfig::default();
    let classifier = collaborators(0.9);

    let forward =
        contradiction::check_record(&store, &classifier, &config, &human(), &a, true).unwrap();
    let reverse =
        contradiction::check_record(&store, &classifier, &config, &human(), &b, true).unwrap();
    assert_eq!(reverse.findings.len(), 1);
    assert_eq!(reverse.findings[0].conflicting_id, a);
    assert_eq!(reverse.findings[0].link_id, forward.findings[0].link_id);

    let pair = contradiction::check_pair(&store, &classifier, &config, &human(), &b, &a, true)
        .unwrap();
    assert_eq!(pair.link_id, forward.findings[0].link_id);
    assert_eq!(contradiction_links(&tmp, &store), 1);

    let summary = contradiction::summary(&store, 10).unwrap();
    assert_eq!(summary.total, 1);
    assert_eq!(summary.active, 1);
}

#[test]
fn test_low_confidence_verdicts_are_not_reported() {
    let (_tmp, store) = test_store();
    let (a, b) = seed(&store);
    let config = ContradictionConfig::default();

    let report =
        contradiction::check_record(&store, &collaborators(0.5), &config, &human(), &a, true)
            .unwrap();
    assert!(report.findings.is_empty());

    let pair =
        contradiction::check_pair(&store, &collaborators(0.5), &config, &human(), &a, &b, true)
            .unwrap();
    assert!(pair.verdict.is_contradiction);
    assert!(!pair.reported);
    assert_eq!(pair.link_id, None);
}

#[test]
fn test_missing_classifier_is_an_error() {
    let (_tmp, store) = test_store();
    let (a, b) = seed(&store);
    let config = ContradictionConfig::default();

    assert!(matches!(
        contradiction::check_record(&store, &Collaborators::none(), &config, &human(), &a, false),
        Err(PalaceError::CollaboratorUnavailable(_))
    ));
    assert!(matches!(
        contradiction::check_pair(&store, &Collaborators::none(), &config, &human(), &a, &b, false),
        Err(PalaceError::CollaboratorUnavailable(_))
    ));
}

#[test]
fn test_classifier_failures_surface() {
    let (_tmp, store) = test_store();
    let (a, b) = seed(&store);
    let config = ContradictionConfig::default();

    let broken = Collaborators::none().with_classifier(Arc::new(BrokenClassifier));
    assert!(matches!(
        contradiction::check_pair(&store, &broken, &config, &human(), &a, &b, false),
        Err(PalaceError::CollaboratorFailed(_))
    ));

    let slow = Collaborators::none()
        .with_classifier(Arc::new(SlowClassifier))
        .with_timeout(Duration::from_millis(50));
    assert!(matches!(
        contradiction::check_pair(&store, &slow, &config, &human(), &a, &b, false),
        Err(PalaceError::Timeout(_))
    ));
}

#[test]
fn test_ignored_pairs_are_excluded() {
    let (_tmp, store) = test_store();
    let (a, b) = seed(&store);
    let config = ContradictionConfig::default();

    let ignored =
        contradiction::ignore_contradiction(&store, &human(), &b, &a, "different services")
            .unwrap();
    assert_eq!(ignored.pair_key, pair_key(&a, &b));

    let report =
        contradiction::check_record(&store, &collaborators(0.9), &config, &human(), &a, true)
            .unwrap();
    assert!(report.findings.is_empty());

    let pair =
        contradiction::check_pair(&store, &collaborators(0.9), &config, &human(), &a, &b, true)
            .unwrap();
    assert!(pair.ignored);
    assert!(!pair.reported);

    let again = contradiction::ignore_contradiction(&store, &human(), &a, &b, "").unwrap_err();
    assert_eq!(again.conflicting_id(), Some(pair_key(&a, &b).as_str()));
    assert_eq!(contradiction::list_ignored(&store).unwrap().len(), 1);
}

#[test]
fn test_summary_counts_active_and_resolved() {
    let (_tmp, store) = test_store();
    let (a, b) = seed(&store);
    let c = decision(&store, "never deploy on fridays");
    let d = decision(&store, "deploy on fridays");
    let config = ContradictionConfig::default();
    let classifier = collaborators(0.9);

    contradiction::check_pair(&store, &classifier, &config, &human(), &a, &b, true).unwrap();
    contradiction::check_pair(&store, &classifier, &config, &human(), &c, &d, true).unwrap();
    records::update_decision_status(&store, &c, DecisionStatus::Reversed).unwrap();

    let summary = contradiction::summary(&store, 10).unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.active, 1);
    assert_eq!(summary.resolved, 1);
    assert!(summary.top[0].active);
    assert_eq!(summary.top[0].source_id, a);

    assert_eq!(contradiction::summary(&store, 1).unwrap().top.len(), 1);
}

#[test]
fn test_pair_with_itself_is_invalid() {
    let (_tmp, store) = test_store();
    let (a, _b) = seed(&store);
    assert!(matches!(
        contradiction::check_pair(
            &store,
            &collaborators(0.9),
            &ContradictionConfig::default(),
            &human(),
            &a,
            &a,
            false
        ),
        Err(PalaceError::ValidationError(_))
    ));
}
