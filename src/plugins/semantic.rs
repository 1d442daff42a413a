//! Embedding and classification collaborators, plus the similarity layer
//! built on top of them.
//!
//! The engine never generates embeddings or verdicts itself. It talks to
//! injected [`Embedder`], [`PairwiseClassifier`] and [`Summarizer`]
//! implementations, always through [`call_with_timeout`]. Without an
//! embedder every similarity feature falls back to keyword overlap.

use crate::core::broker::DbBroker;
use crate::core::error::PalaceError;
use crate::core::model::RecordKind;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::records::{self, Record};
use rayon::prelude::*;
use regex::Regex;
use rusqlite::params;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use std::sync::{Arc, LazyLock};
use std::thread;
use std::time::Duration;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Reciprocal rank fusion constant.
pub const RRF_K: f64 = 60.0;

pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
    /// Identifier of the embedding model, stored next to each vector.
    fn model(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContradictionVerdict {
    pub is_contradiction: bool,
    /// Free-form category, e.g. `direct`, `temporal`, `scope`.
    pub contradiction_type: String,
    pub confidence: f64,
    pub explanation: String,
}

pub trait PairwiseClassifier: Send + Sync {
    fn classify(&self, record_a: &str, record_b: &str) -> anyhow::Result<ContradictionVerdict>;
}

pub trait Summarizer: Send + Sync {
    fn summarize(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Injected collaborators. Any of them may be absent.
#[derive(Clone)]
pub struct Collaborators {
    pub embedder: Option<Arc<dyn Embedder>>,
    pub classifier: Option<Arc<dyn PairwiseClassifier>>,
    pub summarizer: Option<Arc<dyn Summarizer>>,
    pub timeout: Duration,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            embedder: None,
            classifier: None,
            summarizer: None,
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl Collaborators {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_config(config: &crate::core::config::CollaboratorConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.call_timeout_secs),
            ..Self::default()
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn PairwiseClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn require_classifier(&self) -> Result<Arc<dyn PairwiseClassifier>, PalaceError> {
        self.classifier.clone().ok_or_else(|| {
            PalaceError::CollaboratorUnavailable(
                "no pairwise classifier configured; contradiction checks need one (inject a PairwiseClassifier into Collaborators)"
                    .to_string(),
            )
        })
    }

    /// Embed text with the configured embedder, bounded by the call timeout.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>, PalaceError> {
        let embedder = self.embedder.clone().ok_or_else(|| {
            PalaceError::CollaboratorUnavailable("no embedder configured".to_string())
        })?;
        let text = text.to_string();
        call_with_timeout("embedder", self.timeout, move || embedder.embed(&text))
    }

    pub fn classify(&self, a: &str, b: &str) -> Result<ContradictionVerdict, PalaceError> {
        let classifier = self.require_classifier()?;
        let (a, b) = (a.to_string(), b.to_string());
        call_with_timeout("classifier", self.timeout, move || classifier.classify(&a, &b))
    }

    pub fn summarize(&self, prompt: &str) -> Result<String, PalaceError> {
        let summarizer = self.summarizer.clone().ok_or_else(|| {
            PalaceError::CollaboratorUnavailable("no summarizer configured".to_string())
        })?;
        let prompt = prompt.to_string();
        call_with_timeout("summarizer", self.timeout, move || summarizer.summarize(&prompt))
    }
}

/// Run a collaborator call on its own thread and give up after `timeout`.
///
/// A timed-out call keeps running detached; its result is dropped.
pub fn call_with_timeout<T, F>(label: &str, timeout: Duration, f: F) -> Result<T, PalaceError>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("palace-{}", label))
        .spawn(move || {
            let _ = tx.send(f());
        })?;

    match rx.recv_timeout(timeout) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(PalaceError::CollaboratorFailed(format!("{}: {:#}", label, e))),
        Err(mpsc::RecvTimeoutError::Timeout) => {
            tracing::warn!(collaborator = label, timeout_ms = timeout.as_millis() as u64, "collaborator call timed out");
            Err(PalaceError::Timeout(format!(
                "{} did not answer within {:?}",
                label, timeout
            )))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(PalaceError::CollaboratorFailed(
            format!("{}: worker exited without a result", label),
        )),
    }
}

// --- Similarity ---

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom > 0.0 { dot / denom } else { 0.0 }
}

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}][\p{L}\p{N}_]+").expect("static regex"));

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "are", "was", "use", "not", "but", "all", "any",
    "can", "has", "have", "from", "into", "our", "its", "should", "must", "will", "when",
];

/// Lowercase word tokens of two or more characters, without stopwords.
pub fn tokenize(text: &str) -> FxHashSet<String> {
    let lower = text.to_lowercase();
    TOKEN_RE
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|t| !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Jaccard overlap of the token sets of two texts.
pub fn keyword_overlap(a: &str, b: &str) -> f32 {
    let ta = tokenize(a);
    let tb = tokenize(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let shared = ta.intersection(&tb).count();
    let union = ta.len() + tb.len() - shared;
    shared as f32 / union as f32
}

// --- Stored vectors ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEmbedding {
    pub record_id: String,
    pub record_kind: RecordKind,
    pub model: String,
    pub vector: Vec<f32>,
    pub created_at: String,
}

pub fn save_embedding(
    store: &Store,
    record_id: &str,
    record_kind: RecordKind,
    model: &str,
    vector: &[f32],
) -> Result<(), PalaceError> {
    let encoded = serde_json::to_string(vector)?;
    let now = time::now_epoch_z();
    let broker = DbBroker::new(&store.root);
    broker.with_write(&records::palace_db(store), "palace", "embedding.save", |conn| {
        conn.execute(
            "INSERT INTO embeddings(record_id, record_kind, model, dims, vector, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(record_id) DO UPDATE SET
                record_kind = excluded.record_kind,
                model = excluded.model,
                dims = excluded.dims,
                vector = excluded.vector,
                created_at = excluded.created_at",
            params![record_id, record_kind, model, vector.len() as i64, encoded, now],
        )?;
        Ok(())
    })
}

pub fn load_embeddings(store: &Store) -> Result<Vec<StoredEmbedding>, PalaceError> {
    DbBroker::new(&store.root).with_read(&records::palace_db(store), |conn| {
        let mut stmt = conn.prepare(
            "SELECT record_id, record_kind, model, vector, created_at FROM embeddings ORDER BY record_id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, RecordKind>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(rows.len());
        for (record_id, record_kind, model, vector, created_at) in rows {
            out.push(StoredEmbedding {
                record_id,
                record_kind,
                model,
                vector: serde_json::from_str(&vector)?,
                created_at,
            });
        }
        Ok(out)
    })
}

/// Ids of live records that have no stored vector yet.
pub fn records_missing_embeddings(store: &Store) -> Result<Vec<String>, PalaceError> {
    let embedded: FxHashSet<String> = load_embeddings(store)?
        .into_iter()
        .map(|e| e.record_id)
        .collect();
    Ok(records::list_live_records(store)?
        .into_iter()
        .map(|r| r.id().to_string())
        .filter(|id| !embedded.contains(id))
        .collect())
}

/// Embed one record and store its vector.
pub fn embed_record(
    store: &Store,
    collaborators: &Collaborators,
    record_id: &str,
) -> Result<(), PalaceError> {
    let record = records::get_record(store, record_id)?;
    let embedder = collaborators.embedder.clone().ok_or_else(|| {
        PalaceError::CollaboratorUnavailable("no embedder configured".to_string())
    })?;
    let vector = collaborators.embed(&record.full_text())?;
    save_embedding(store, record_id, record.kind(), &embedder.model(), &vector)
}

// --- Candidate search ---

#[derive(Debug, Clone)]
pub struct SimilarRecord {
    pub record: Record,
    pub similarity: f32,
}

/// Live records most similar to `record`, excluding itself and any id in
/// `exclude`, best first.
///
/// With an embedder the query text is embedded and compared to stored
/// vectors; records without a vector, and every record when the embedder is
/// missing or fails, are scored by keyword overlap instead.
pub fn similar_records(
    store: &Store,
    collaborators: &Collaborators,
    record: &Record,
    exclude: &FxHashSet<String>,
    limit: usize,
    min_similarity: f32,
) -> Result<Vec<SimilarRecord>, PalaceError> {
    let text = record.full_text();
    let query_vector = match collaborators.embedder {
        Some(_) => match collaborators.embed(&text) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(record = record.id(), error = %e, "embedding failed; using keyword similarity");
                None
            }
        },
        None => None,
    };
    let vectors: FxHashMap<String, Vec<f32>> = if query_vector.is_some() {
        load_embeddings(store)?
            .into_iter()
            .map(|e| (e.record_id, e.vector))
            .collect()
    } else {
        FxHashMap::default()
    };

    let candidates: Vec<Record> = records::list_live_records(store)?
        .into_iter()
        .filter(|r| r.id() != record.id() && !exclude.contains(r.id()))
        .collect();

    let mut scored: Vec<SimilarRecord> = candidates
        .into_par_iter()
        .map(|candidate| {
            let similarity = match (&query_vector, vectors.get(candidate.id())) {
                (Some(q), Some(v)) => cosine_similarity(q, v),
                _ => keyword_overlap(&text, &candidate.full_text()),
            };
            SimilarRecord {
                record: candidate,
                similarity,
            }
        })
        .filter(|s| s.similarity >= min_similarity)
        .collect();

    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.record.id().cmp(b.record.id()))
    });
    scored.truncate(limit);
    Ok(scored)
}

// --- Hybrid search ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridHit {
    pub id: String,
    pub kind: RecordKind,
    pub content: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_rank: Option<usize>,
}

/// Keyword search fused with vector similarity by reciprocal rank.
/// Without a working embedder this is keyword search alone.
pub fn hybrid_search(
    store: &Store,
    collaborators: &Collaborators,
    query: &str,
    limit: usize,
) -> Result<Vec<HybridHit>, PalaceError> {
    let pool = limit.saturating_mul(3).max(limit);
    let keyword = records::search_all(store, query, pool)?;

    let vector_ranked: Vec<(String, f32)> = match collaborators.embedder {
        Some(_) => match collaborators.embed(query) {
            Ok(q) => {
                let mut ranked: Vec<(String, f32)> = load_embeddings(store)?
                    .par_iter()
                    .map(|e| (e.record_id.clone(), cosine_similarity(&q, &e.vector)))
                    .filter(|(_, s)| *s > 0.0)
                    .collect();
                ranked.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.0.cmp(&b.0))
                });
                ranked.truncate(pool);
                ranked
            }
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed; keyword-only search");
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    let mut hits: FxHashMap<String, HybridHit> = FxHashMap::default();
    for (rank, hit) in keyword.iter().enumerate() {
        hits.insert(
            hit.id.clone(),
            HybridHit {
                id: hit.id.clone(),
                kind: hit.kind,
                content: hit.content.clone(),
                score: 1.0 / (RRF_K + rank as f64 + 1.0),
                keyword_rank: Some(rank + 1),
                vector_rank: None,
            },
        );
    }
    for (rank, (id, _)) in vector_ranked.iter().enumerate() {
        let contribution = 1.0 / (RRF_K + rank as f64 + 1.0);
        if let Some(hit) = hits.get_mut(id) {
            hit.score += contribution;
            hit.vector_rank = Some(rank + 1);
            continue;
        }
        // Vector-only hits must still be live records.
        let record = match records::get_record(store, id) {
            Ok(r) if r.is_live() => r,
            Ok(_) | Err(PalaceError::NotFound(_)) | Err(PalaceError::ValidationError(_)) => continue,
            Err(e) => return Err(e),
        };
        hits.insert(
            id.clone(),
            HybridHit {
                id: id.clone(),
                kind: record.kind(),
                content: record.content().to_string(),
                score: contribution,
                keyword_rank: None,
                vector_rank: Some(rank + 1),
            },
        );
    }

    let mut out: Vec<HybridHit> = hits.into_values().collect();
    out.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    out.truncate(limit);
    Ok(out)
}
