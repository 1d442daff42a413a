use palace::Palace;
use palace::core::caller::Caller;
use palace::core::config::PalaceConfig;
use palace::core::db;
use palace::core::model::Scope;
use palace::core::store::Store;
use palace::plugins::briefing::{self, BriefingSource};
use palace::plugins::context::ContextAssembler;
use palace::plugins::records::{self, NewDecision, NewLearning, RecordMeta};
use palace::plugins::semantic::{Collaborators, Summarizer};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

fn seeded_store() -> (tempfile::TempDir, Store) {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join(".palace");
    db::initialize_palace_db(&root).unwrap();
    let store = Store::workspace(root);
    seed(&store);
    (tmp, store)
}

fn seed(store: &Store) {
    let meta = RecordMeta::approved_by(&Caller::human("alice"));
    records::create_decision(
        store,
        &NewDecision {
            content: "use JWT".to_string(),
            rationale: "stateless auth".to_string(),
            scope: Scope::Palace,
            ..NewDecision::default()
        },
        &meta,
    )
    .unwrap();
    records::create_learning(
        store,
        &NewLearning {
            content: "clock skew breaks exp checks".to_string(),
            confidence: Some(0.4),
            scope: Scope::Palace,
            ..NewLearning::default()
        },
        &meta,
    )
    .unwrap();
}

/// Records the prompt it was given and answers with a fixed text.
struct EchoSummarizer {
    reply: String,
    prompts: Mutex<Vec<String>>,
}

impl Summarizer for EchoSummarizer {
    fn summarize(&self, prompt: &str) -> anyhow::Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.reply.clone())
    }
}

struct DownSummarizer;

impl Summarizer for DownSummarizer {
    fn summarize(&self, _prompt: &str) -> anyhow::Result<String> {
        anyhow::bail!("connection refused")
    }
}

struct SlowSummarizer;

impl Summarizer for SlowSummarizer {
    fn summarize(&self, _prompt: &str) -> anyhow::Result<String> {
        std::thread::sleep(Duration::from_millis(500));
        Ok("late".to_string())
    }
}

fn build(store: &Store, collaborators: &Collaborators) -> briefing::Briefing {
    let config = PalaceConfig::default();
    let assembler = ContextAssembler::new(store, &config);
    briefing::briefing(&assembler, collaborators, "src/auth/jwt.go").unwrap()
}

#[test]
fn test_template_without_summarizer() {
    let (_tmp, store) = seeded_store();
    let b = build(&store, &Collaborators::none());
    assert_eq!(b.generated_by, BriefingSource::Template);
    assert_eq!(b.path, "src/auth/jwt.go");
    assert!(b.text.starts_with("Briefing for src/auth/jwt.go"));
    assert!(b.text.contains("use JWT (why: stateless auth)"));
    assert!(b.text.contains("clock skew breaks exp checks (confidence 0.40)"));
    assert_eq!(b.text, briefing::render_template(&b.state));
}

#[test]
fn test_summarizer_output_is_used() {
    let (_tmp, store) = seeded_store();
    let summarizer = Arc::new(EchoSummarizer {
        reply: "  Use JWT; watch clock skew.\n".to_string(),
        prompts: Mutex::new(Vec::new()),
    });
    let collaborators = Collaborators::none().with_summarizer(summarizer.clone());

    let b = build(&store, &collaborators);
    assert_eq!(b.generated_by, BriefingSource::Summarizer);
    assert_eq!(b.text, "Use JWT; watch clock skew.");

    let prompts = summarizer.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("src/auth/jwt.go"));
    assert!(prompts[0].contains("use JWT"));
}

#[test]
fn test_failures_fall_back_to_template() {
    let (_tmp, store) = seeded_store();

    let down = Collaborators::none().with_summarizer(Arc::new(DownSummarizer));
    assert_eq!(build(&store, &down).generated_by, BriefingSource::Template);

    let slow = Collaborators::none()
        .with_summarizer(Arc::new(SlowSummarizer))
        .with_timeout(Duration::from_millis(50));
    assert_eq!(build(&store, &slow).generated_by, BriefingSource::Template);

    let blank = Collaborators::none().with_summarizer(Arc::new(EchoSummarizer {
        reply: "   ".to_string(),
        prompts: Mutex::new(Vec::new()),
    }));
    let b = build(&store, &blank);
    assert_eq!(b.generated_by, BriefingSource::Template);
    assert!(b.text.contains("use JWT"));
}

#[test]
fn test_empty_workspace_briefing() {
    let tmp = tempdir().unwrap();
    let palace = Palace::open(tmp.path()).unwrap();
    let b = palace.briefing("").unwrap();
    assert_eq!(b.generated_by, BriefingSource::Template);
    assert!(b.text.starts_with("Briefing for workspace"));
    assert!(b.text.contains("Decisions (0 of 0):\n- none"));
    assert!(b.text.contains("Learnings (0 of 0):\n- none"));
}

#[test]
fn test_palace_briefing_uses_its_collaborators() {
    let tmp = tempdir().unwrap();
    let palace = Palace::open(tmp.path())
        .unwrap()
        .with_collaborators(Collaborators::none().with_summarizer(Arc::new(EchoSummarizer {
            reply: "all good".to_string(),
            prompts: Mutex::new(Vec::new()),
        })));
    seed(palace.store());

    let b = palace.briefing("main.go").unwrap();
    assert_eq!(b.generated_by, BriefingSource::Summarizer);
    assert_eq!(b.text, "all good");
    assert_eq!(b.state.decisions.len(), 1);
    assert_eq!(b.state.learnings.len(), 1);
}
