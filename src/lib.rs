//! Palace: a knowledge governance engine for AI coding agents.
//!
//! **Palace keeps the decisions, learnings and ideas of a codebase, and decides
//! which of them are authoritative for any path an agent is about to touch.**
//!
//! Agents propose; humans approve. Anything an agent writes lands as a
//! proposal until a human reviews it, and every authoritative write leaves an
//! entry in an append-only audit ledger.
//!
//! # Architecture
//!
//! ## Dual-Store Model
//!
//! - **Workspace Store** (`<repo>/.palace/palace.db`): project-scoped records,
//!   links, proposals and audit log.
//! - **Corridor Store** (`~/.palace/corridor/palace.db`): one per human
//!   operator, holding learnings promoted out of individual workspaces.
//!
//! ## The Thin Waist
//!
//! All reads and writes route through `DbBroker` for:
//! - Serialization (per-database write lock)
//! - Operation logging (`broker.events.jsonl`)
//!
//! ## Subsystems (Plugins)
//!
//! - `records`: ideas, decisions and learnings
//! - `links`: typed relations, including stale code links
//! - `scope`: room resolution and the inheritance chain
//! - `context`: authoritative context assembly for a path
//! - `decay`: confidence decay for unused learnings
//! - `contradiction`: pairwise contradiction checks
//! - `proposals`: the agent-proposes, human-approves workflow
//! - `corridor`: cross-workspace promotion
//! - `semantic`: collaborator traits, similarity and hybrid search
//! - `embedding`: background embedding worker pool
//! - `briefing`: session briefings with template fallback
//!
//! # Examples
//!
//! ```no_run
//! use palace::Palace;
//! use palace::core::caller::Caller;
//! use palace::plugins::records::NewDecision;
//!
//! let palace = Palace::open(std::path::Path::new(".")).unwrap();
//! let agent = Caller::agent("claude");
//! let submission = palace.submit_decision(
//!     &agent,
//!     &NewDecision {
//!         content: "use JWT for API auth".to_string(),
//!         ..NewDecision::default()
//!     },
//! )
//! .unwrap();
//! assert!(submission.is_proposal());
//! ```

pub mod core;
pub mod plugins;
pub mod subsystems;

use crate::core::caller::Caller;
use crate::core::config::PalaceConfig;
use crate::core::db;
use crate::core::error::PalaceError;
use crate::core::session::SessionRegistry;
use crate::core::store::{Store, StoreKind};
use crate::plugins::briefing::{self, Briefing};
use crate::plugins::context::{AuthoritativeState, ContextAssembler};
use crate::plugins::embedding::EmbeddingQueue;
use crate::plugins::links::FsCodeValidator;
use crate::plugins::proposals::{self, ApprovalReceipt, DirectWrite, DirectWriteReceipt, Submission};
use crate::plugins::records::{
    self, Decision, Idea, Learning, NewDecision, NewIdea, NewLearning, RecordMeta,
};
use crate::plugins::semantic::Collaborators;
use std::path::{Path, PathBuf};

/// Name of the per-workspace state directory.
pub const STATE_DIR_NAME: &str = ".palace";

/// One opened workspace with its configuration and collaborators.
pub struct Palace {
    workspace_root: PathBuf,
    store: Store,
    corridor: Option<Store>,
    config: PalaceConfig,
    collaborators: Collaborators,
    sessions: SessionRegistry,
    code_validator: FsCodeValidator,
    /// Running only while an embedder is configured.
    embeddings: Option<EmbeddingQueue>,
}

impl Palace {
    /// Open (and initialize if needed) the workspace rooted at `workspace_root`.
    ///
    /// State lives in `<workspace_root>/.palace`; `palace.toml` in that
    /// directory is loaded when present.
    pub fn open(workspace_root: &Path) -> Result<Self, PalaceError> {
        let state_root = workspace_root.join(STATE_DIR_NAME);
        std::fs::create_dir_all(&state_root)?;
        let config = PalaceConfig::load(&state_root)?;
        Self::open_with_config(workspace_root, config)
    }

    pub fn open_with_config(
        workspace_root: &Path,
        config: PalaceConfig,
    ) -> Result<Self, PalaceError> {
        config.validate()?;
        let state_root = workspace_root.join(STATE_DIR_NAME);
        db::initialize_palace_db(&state_root)?;
        tracing::debug!(root = %state_root.display(), "opened palace workspace");

        Ok(Self {
            workspace_root: workspace_root.to_path_buf(),
            store: Store::workspace(&state_root),
            corridor: None,
            collaborators: Collaborators::from_config(&config.collaborators),
            config,
            sessions: SessionRegistry::new(),
            code_validator: FsCodeValidator::new(workspace_root),
            embeddings: None,
        })
    }

    /// Attach the operator's personal corridor store.
    pub fn with_corridor(mut self, corridor_root: &Path) -> Result<Self, PalaceError> {
        db::initialize_palace_db(corridor_root)?;
        self.corridor = Some(Store::corridor(corridor_root));
        Ok(self)
    }

    /// Replace the collaborators. With an embedder present, a worker pool of
    /// `[collaborators] embedding_workers` threads starts embedding new records.
    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.embeddings = None;
        if collaborators.embedder.is_some() {
            match EmbeddingQueue::start(
                self.store.clone(),
                collaborators.clone(),
                self.config.collaborators.embedding_workers,
            ) {
                Ok(queue) => self.embeddings = Some(queue),
                Err(e) => tracing::warn!(error = %e, "could not start embedding workers"),
            }
        }
        self.collaborators = collaborators;
        self
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn corridor(&self) -> Option<&Store> {
        self.corridor.as_ref()
    }

    pub fn config(&self) -> &PalaceConfig {
        &self.config
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn code_validator(&self) -> &FsCodeValidator {
        &self.code_validator
    }

    pub fn embedding_queue(&self) -> Option<&EmbeddingQueue> {
        self.embeddings.as_ref()
    }

    fn queue_embedding(&self, record_id: &str) {
        if let Some(queue) = &self.embeddings
            && !queue.enqueue(record_id)
        {
            tracing::debug!(record = record_id, "record not queued for embedding");
        }
    }

    pub fn create_idea(&self, caller: &Caller, req: &NewIdea) -> Result<Idea, PalaceError> {
        let idea = records::create_idea(&self.store, caller, req)?;
        self.queue_embedding(&idea.id);
        Ok(idea)
    }

    pub fn create_decision(
        &self,
        req: &NewDecision,
        meta: &RecordMeta,
    ) -> Result<Decision, PalaceError> {
        let decision = records::create_decision(&self.store, req, meta)?;
        self.queue_embedding(&decision.id);
        Ok(decision)
    }

    pub fn create_learning(
        &self,
        req: &NewLearning,
        meta: &RecordMeta,
    ) -> Result<Learning, PalaceError> {
        let learning = records::create_learning(&self.store, req, meta)?;
        self.queue_embedding(&learning.id);
        Ok(learning)
    }

    /// Governed write: humans write directly, agents propose.
    pub fn submit_decision(
        &self,
        caller: &Caller,
        req: &NewDecision,
    ) -> Result<Submission, PalaceError> {
        let submission = proposals::submit_decision(&self.store, caller, req)?;
        if let Submission::Written(receipt) = &submission {
            self.queue_embedding(&receipt.record_id);
        }
        Ok(submission)
    }

    pub fn submit_learning(
        &self,
        caller: &Caller,
        req: &NewLearning,
    ) -> Result<Submission, PalaceError> {
        let submission = proposals::submit_learning(&self.store, caller, req)?;
        if let Submission::Written(receipt) = &submission {
            self.queue_embedding(&receipt.record_id);
        }
        Ok(submission)
    }

    pub fn direct_write(
        &self,
        caller: &Caller,
        req: &DirectWrite,
    ) -> Result<DirectWriteReceipt, PalaceError> {
        let receipt = proposals::direct_write(&self.store, caller, req)?;
        self.queue_embedding(&receipt.record_id);
        Ok(receipt)
    }

    pub fn approve_proposal(
        &self,
        reviewer: &Caller,
        id: &str,
        note: &str,
    ) -> Result<ApprovalReceipt, PalaceError> {
        let receipt = proposals::approve_proposal(&self.store, reviewer, id, note)?;
        self.queue_embedding(&receipt.record_id);
        Ok(receipt)
    }

    pub fn assembler(&self) -> ContextAssembler<'_> {
        let assembler = ContextAssembler::new(&self.store, &self.config);
        match &self.corridor {
            Some(corridor) if corridor.kind == StoreKind::Corridor => {
                assembler.with_corridor(corridor)
            }
            _ => assembler,
        }
    }

    /// Authoritative decisions and learnings for `path`.
    pub fn authoritative_state(&self, path: &str) -> Result<AuthoritativeState, PalaceError> {
        self.assembler().assemble(path)
    }

    pub fn briefing(&self, path: &str) -> Result<Briefing, PalaceError> {
        briefing::briefing(&self.assembler(), &self.collaborators, path)
    }
}
