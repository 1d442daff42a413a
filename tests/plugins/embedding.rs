use palace::Palace;
use palace::core::caller::Caller;
use palace::core::db;
use palace::core::model::Scope;
use palace::core::store::Store;
use palace::plugins::embedding::EmbeddingQueue;
use palace::plugins::proposals::Submission;
use palace::plugins::records::{self, NewDecision, NewIdea, NewLearning, RecordMeta};
use palace::plugins::semantic::{self, Collaborators, Embedder};
use rustc_hash::FxHashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::tempdir;

fn test_store() -> (tempfile::TempDir, Store) {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join(".palace");
    db::initialize_palace_db(&root).unwrap();
    (tmp, Store::workspace(root))
}

fn decision(store: &Store, content: &str) -> String {
    records::create_decision(
        store,
        &NewDecision {
            content: content.to_string(),
            scope: Scope::Palace,
            ..NewDecision::default()
        },
        &RecordMeta::approved_by(&Caller::human("alice")),
    )
    .unwrap()
    .id
}

/// Three-dimensional topic vector: auth, storage, background.
struct TopicEmbedder {
    calls: AtomicUsize,
}

impl TopicEmbedder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

impl Embedder for TopicEmbedder {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let lower = text.to_lowercase();
        let auth = ["jwt", "token", "login", "auth"]
            .iter()
            .any(|w| lower.contains(w));
        let storage = ["postgres", "database"].iter().any(|w| lower.contains(w));
        Ok(vec![
            if auth { 1.0 } else { 0.0 },
            if storage { 1.0 } else { 0.0 },
            0.1,
        ])
    }

    fn model(&self) -> String {
        "topic-3".to_string()
    }
}

struct FailingEmbedder;

struct PanickingEmbedder;

impl Embedder for PanickingEmbedder {
    fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        panic!("embedding backend crashed")
    }

    fn model(&self) -> String {
        "panicking".to_string()
    }
}

impl Embedder for FailingEmbedder {
    fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        anyhow::bail!("quota exceeded")
    }

    fn model(&self) -> String {
        "failing".to_string()
    }
}

#[test]
fn test_queue_embeds_enqueued_records() {
    let (_tmp, store) = test_store();
    let a = decision(&store, "use JWT tokens");
    let b = decision(&store, "postgres is the primary database");
    let embedder = TopicEmbedder::new();
    let collaborators = Collaborators::none().with_embedder(embedder.clone());

    let queue = EmbeddingQueue::start(store.clone(), collaborators, 2).unwrap();
    assert!(queue.enqueue(&a));
    assert!(queue.enqueue(&b));
    assert!(queue.wait_idle(Duration::from_secs(10)));

    let stats = queue.shutdown();
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.pending, 0);

    let stored = semantic::load_embeddings(&store).unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|e| e.model == "topic-3" && e.vector.len() == 3));
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_backfill_queues_only_missing_vectors() {
    let (_tmp, store) = test_store();
    let a = decision(&store, "use JWT tokens");
    decision(&store, "postgres is the primary database");
    decision(&store, "prefer small modules");
    let collaborators = Collaborators::none().with_embedder(TopicEmbedder::new());
    semantic::embed_record(&store, &collaborators, &a).unwrap();

    let queue = EmbeddingQueue::start(store.clone(), collaborators, 2).unwrap();
    assert_eq!(queue.backfill_missing().unwrap(), 2);
    assert!(queue.wait_idle(Duration::from_secs(10)));
    assert_eq!(queue.stats().processed, 2);
    assert!(semantic::records_missing_embeddings(&store).unwrap().is_empty());
    assert_eq!(queue.backfill_missing().unwrap(), 0);
}

#[test]
fn test_failures_are_counted_not_raised() {
    let (_tmp, store) = test_store();
    let a = decision(&store, "use JWT tokens");
    let collaborators = Collaborators::none().with_embedder(Arc::new(FailingEmbedder));

    let queue = EmbeddingQueue::start(store.clone(), collaborators, 1).unwrap();
    assert!(queue.enqueue(&a));
    assert!(queue.enqueue("d_does_not_exist"));
    assert!(queue.wait_idle(Duration::from_secs(10)));
    let stats = queue.shutdown();
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.processed, 0);
    assert!(semantic::load_embeddings(&store).unwrap().is_empty());
}

#[test]
fn test_queue_without_embedder_accepts_nothing() {
    let (_tmp, store) = test_store();
    let a = decision(&store, "use JWT tokens");
    let queue = EmbeddingQueue::start(store.clone(), Collaborators::none(), 2).unwrap();
    assert!(!queue.enqueue(&a));
    assert_eq!(queue.backfill_missing().unwrap(), 0);
    assert!(queue.wait_idle(Duration::from_millis(10)));
}

#[test]
fn test_hybrid_search_fuses_vector_hits() {
    let (_tmp, store) = test_store();
    let jwt = decision(&store, "use JWT tokens");
    let pg = decision(&store, "postgres is the primary database");
    let collaborators = Collaborators::none().with_embedder(TopicEmbedder::new());
    for id in [&jwt, &pg] {
        semantic::embed_record(&store, &collaborators, id).unwrap();
    }

    // No keyword matches "login"; only the vector side finds the JWT decision.
    let hits = semantic::hybrid_search(&store, &collaborators, "login", 5).unwrap();
    assert_eq!(hits[0].id, jwt);
    assert_eq!(hits[0].keyword_rank, None);
    assert_eq!(hits[0].vector_rank, Some(1));

    // A keyword and vector match outranks a vector-only one.
    let hits = semantic::hybrid_search(&store, &collaborators, "JWT", 5).unwrap();
    assert_eq!(hits[0].id, jwt);
    assert_eq!(hits[0].keyword_rank, Some(1));
    assert_eq!(hits[0].vector_rank, Some(1));
}

#[test]
fn test_hybrid_search_degrades_to_keywords() {
    let (_tmp, store) = test_store();
    let jwt = decision(&store, "use JWT tokens");
    decision(&store, "postgres is the primary database");

    let hits = semantic::hybrid_search(&store, &Collaborators::none(), "jwt", 5).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, jwt);
    assert_eq!(hits[0].vector_rank, None);

    let failing = Collaborators::none().with_embedder(Arc::new(FailingEmbedder));
    let hits = semantic::hybrid_search(&store, &failing, "jwt", 5).unwrap();
    assert_eq!(hits.len(), 1);
}

#[test]
fn test_similar_records_prefer_vectors() {
    let (_tmp, store) = test_store();
    let jwt = decision(&store, "use JWT tokens");
    let login = decision(&store, "login requires auth");
    decision(&store, "postgres is the primary database");
    let collaborators = Collaborators::none().with_embedder(TopicEmbedder::new());
    for id in [&jwt, &login] {
        semantic::embed_record(&store, &collaborators, id).unwrap();
    }

    let record = records::get_record(&store, &jwt).unwrap();
    let similar = semantic::similar_records(
        &store,
        &collaborators,
        &record,
        &FxHashSet::default(),
        5,
        0.5,
    )
    .unwrap();
    // No shared keywords, but the vectors agree.
    assert_eq!(similar.len(), 1);
    assert_eq!(similar[0].record.id(), login);
    assert!(similar[0].similarity > 0.99);
}

#[test]
fn test_panicking_embedder_does_not_wedge_the_queue() {
    let (_tmp, store) = test_store();
    let a = decision(&store, "use JWT tokens");
    let b = decision(&store, "postgres is the primary database");
    let collaborators = Collaborators::none().with_embedder(Arc::new(PanickingEmbedder));

    let queue = EmbeddingQueue::start(store.clone(), collaborators, 1).unwrap();
    assert!(queue.enqueue(&a));
    assert!(queue.enqueue(&b));
    assert!(queue.wait_idle(Duration::from_secs(10)));
    let stats = queue.shutdown();
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.in_flight, 0);
}

#[test]
fn test_palace_writes_feed_the_embedding_queue() {
    let tmp = tempdir().unwrap();
    let embedder = TopicEmbedder::new();
    let palace = Palace::open(tmp.path())
        .unwrap()
        .with_collaborators(Collaborators::none().with_embedder(embedder.clone()));
    let human = Caller::human("alice");

    let idea = palace
        .create_idea(
            &human,
            &NewIdea {
                content: "login page could remember the last tenant".to_string(),
                ..NewIdea::default()
            },
        )
        .unwrap();
    let written = match palace
        .submit_decision(
            &human,
            &NewDecision {
                content: "use JWT tokens".to_string(),
                ..NewDecision::default()
            },
        )
        .unwrap()
    {
        Submission::Written(receipt) => receipt.record_id,
        Submission::Proposed(p) => panic!("human write became proposal {}", p.id),
    };
    let proposal = match palace
        .submit_learning(
            &Caller::agent("claude"),
            &NewLearning {
                content: "postgres vacuum needs tuning".to_string(),
                ..NewLearning::default()
            },
        )
        .unwrap()
    {
        Submission::Proposed(p) => p,
        Submission::Written(r) => panic!("agent write landed directly as {}", r.record_id),
    };
    let approved = palace.approve_proposal(&human, &proposal.id, "ok").unwrap();

    let queue = palace.embedding_queue().unwrap();
    assert!(queue.wait_idle(Duration::from_secs(10)));
    assert_eq!(queue.stats().processed, 3);

    let stored: FxHashSet<String> = semantic::load_embeddings(palace.store())
        .unwrap()
        .into_iter()
        .map(|e| e.record_id)
        .collect();
    for id in [&idea.id, &written, &approved.record_id] {
        assert!(stored.contains(id.as_str()), "no vector for {}", id);
    }
    assert!(semantic::records_missing_embeddings(palace.store()).unwrap().is_empty());
}

#[test]
fn test_palace_without_embedder_has_no_queue() {
    let tmp = tempdir().unwrap();
    let palace = Palace::open(tmp.path()).unwrap();
    assert!(palace.embedding_queue().is_none());
    palace
        .create_decision(
            &NewDecision {
                content: "use JWT tokens".to_string(),
                ..NewDecision::default()
            },
            &RecordMeta::approved_by(&Caller::human("alice")),
        )
        .unwrap();
    assert!(semantic::load_embeddings(palace.store()).unwrap().is_empty());
}
