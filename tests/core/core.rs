use palace::Palace;
use palace::STATE_DIR_NAME;
use palace::core::audit;
use palace::core::caller::Caller;
use palace::core::config::{CONFIG_FILE_NAME, PalaceConfig};
use palace::core::db;
use palace::core::error::PalaceError;
use palace::core::model::{AuditAction, Scope};
use palace::core::requests::decode_params;
use palace::core::store::{Store, StoreKind};
use palace::core::time;
use palace::plugins::records::NewDecision;
use palace::subsystems;
use rusqlite::Connection;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_open_creates_state_dir_and_database() {
    let tmp = tempdir().unwrap();
    let palace = Palace::open(tmp.path()).unwrap();
    let state = tmp.path().join(STATE_DIR_NAME);
    assert!(db::palace_db_path(&state).exists());
    assert_eq!(palace.store().kind, StoreKind::Workspace);
    assert_eq!(palace.store().root, state);
    assert!(palace.corridor().is_none());

    // Reopening an initialized workspace is fine.
    Palace::open(tmp.path()).unwrap();
}

#[test]
fn test_open_reads_config_file() {
    let tmp = tempdir().unwrap();
    let state = tmp.path().join(STATE_DIR_NAME);
    fs::create_dir_all(&state).unwrap();
    fs::write(
        state.join(CONFIG_FILE_NAME),
        r#"
[scope]
default_room = "core"

[[scope.rooms]]
name = "auth"
entry_points = ["src/auth/"]

[decay]
decay_days = 90
decay_rate = 0.2

[context]
max_decisions = 5
"#,
    )
    .unwrap();

    let palace = Palace::open(tmp.path()).unwrap();
    let config = palace.config();
    assert_eq!(config.scope.default_room.as_deref(), Some("core"));
    assert_eq!(config.scope.rooms[0].name, "auth");
    assert_eq!(config.decay.decay_days, 90);
    assert_eq!(config.decay.decay_interval_days, 30);
    assert_eq!(config.context.max_decisions, 5);
    assert_eq!(config.context.max_learnings, 20);

    assert_eq!(
        palace.authoritative_state("src/auth/jwt.go").unwrap().room,
        "auth"
    );
}

#[test]
fn test_invalid_config_is_rejected() {
    assert!(matches!(
        PalaceConfig::from_toml_str("[decay]\ndecay_rate = 1.5\n"),
        Err(PalaceError::ValidationError(_))
    ));
    assert!(matches!(
        PalaceConfig::from_toml_str("[decay]\ndecay_interval_days = 0\n"),
        Err(PalaceError::ValidationError(_))
    ));
    assert!(matches!(
        PalaceConfig::from_toml_str("[decay\n"),
        Err(PalaceError::ConfigError(_))
    ));

    let tmp = tempdir().unwrap();
    let state = tmp.path().join(STATE_DIR_NAME);
    fs::create_dir_all(&state).unwrap();
    fs::write(
        state.join(CONFIG_FILE_NAME),
        "[collaborators]\nembedding_workers = 0\n",
    )
    .unwrap();
    assert!(Palace::open(tmp.path()).is_err());
}

#[test]
fn test_decode_params_into_requests() {
    let request: NewDecision = decode_params(
        "decision.create",
        serde_json::json!({
            "content": "use JWT",
            "scope": "file",
            "scope_path": "auth.go",
        }),
    )
    .unwrap();
    assert_eq!(request.content, "use JWT");
    assert_eq!(request.scope, Scope::File);

    let err = decode_params::<NewDecision>(
        "decision.create",
        serde_json::json!({"content": "x", "scope": "universe"}),
    )
    .unwrap_err();
    assert!(matches!(err, PalaceError::ValidationError(_)));
}

#[test]
fn test_caller_privileges() {
    let human = Caller::human("alice").with_session("s-1");
    assert!(human.is_privileged());
    assert_eq!(human.session_id.as_deref(), Some("s-1"));
    assert!(human.require_human("proposal.approve").is_ok());

    let agent = Caller::agent("claude");
    assert!(!agent.is_privileged());
    let err = agent.require_human("proposal.approve").unwrap_err();
    assert!(matches!(err, PalaceError::Forbidden(_)));
    assert!(err.to_string().contains("proposal.approve"));
}

#[test]
fn test_audit_log_is_append_only() {
    let tmp = tempdir().unwrap();
    let palace = Palace::open(tmp.path()).unwrap();
    let store = palace.store();

    let first = audit::append_audit(
        store,
        AuditAction::DirectWrite,
        &Caller::human("alice"),
        "d_1",
        "decision",
        serde_json::json!({"content_hash": audit::content_hash("use JWT")}),
    )
    .unwrap();
    audit::append_audit(
        store,
        AuditAction::Approve,
        &Caller::human("bob"),
        "p_1",
        "proposal",
        serde_json::json!({}),
    )
    .unwrap();

    let conn = Connection::open(db::palace_db_path(&store.root)).unwrap();
    assert!(
        conn.execute("UPDATE audit_log SET actor_id = 'mallory'", [])
            .is_err()
    );
    assert!(conn.execute("DELETE FROM audit_log", []).is_err());
    drop(conn);

    let entries = audit::list_audit(store, None).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].id, first.id);
    assert_eq!(entries[0].actor_id, "alice");
    assert_eq!(
        entries[0].details["content_hash"],
        serde_json::json!(audit::content_hash("use JWT"))
    );
    assert_eq!(audit::list_audit(store, Some("p_1")).unwrap().len(), 1);
}

#[test]
fn test_audit_failure_is_swallowed() {
    let tmp = tempdir().unwrap();
    // The directory is never initialized, so the write has nowhere to go.
    let store = Store::workspace(tmp.path().join("missing").join("deeper"));
    let entry = audit::record_best_effort(
        &store,
        AuditAction::Reject,
        &Caller::human("alice"),
        "p_1",
        "proposal",
        serde_json::json!({}),
    );
    assert!(entry.is_none());
}

#[test]
fn test_content_hash_is_sha256_hex() {
    assert_eq!(
        audit::content_hash("abc"),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn test_sessions_are_per_palace() {
    let tmp = tempdir().unwrap();
    let a = Palace::open(&tmp.path().join("a")).unwrap();
    let b = Palace::open(&tmp.path().join("b")).unwrap();

    a.sessions().set_focus("s1", "claude", "src/auth.go").unwrap();
    assert!(b.sessions().focus("s1").unwrap().is_none());

    let handoff = a.sessions().handoff("s1", "cursor", "refresh half done").unwrap();
    assert_eq!(handoff.focus, "src/auth.go");
    assert_eq!(a.sessions().claim_handoffs("cursor").unwrap().len(), 1);
}

#[test]
fn test_store_workspace_name() {
    assert_eq!(
        Store::workspace("/home/dev/billing/.palace").workspace_name(),
        "billing"
    );
    assert_eq!(Store::workspace("/srv/payments").workspace_name(), "payments");
}

#[test]
fn test_epoch_timestamps() {
    assert_eq!(time::epoch_z(1_700_000_000), "1700000000Z");
    assert_eq!(time::parse_epoch_z("1700000000Z").unwrap(), 1_700_000_000);
    assert!(time::parse_epoch_z("yesterday").is_err());
    assert_eq!(time::days_between(0, 86_399), 0);
    assert_eq!(time::days_between(0, 86_400 * 3 + 5), 3);
    assert_eq!(time::days_between(100, 50), 0);
    assert!(time::new_id("d").starts_with("d_"));
}

#[test]
fn test_subsystem_schemas() {
    let schemas = subsystems::all_schemas();
    let schemas = schemas.as_array().unwrap();
    assert_eq!(schemas.len(), subsystems::SUBSYSTEMS.len());
    for (info, schema) in subsystems::SUBSYSTEMS.iter().zip(schemas) {
        assert_eq!(schema["name"], serde_json::json!(info.name));
        assert!(schema["commands"].is_array());
    }
}
