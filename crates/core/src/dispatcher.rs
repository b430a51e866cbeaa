//! Tool Dispatcher (C11, §4.8): the single entry point every transport
//! (the CLI's stdio loop, eventually an MCP server) calls through. Given a
//! tool name and its JSON arguments, this enforces the phase gate, times
//! the call, records it onto the session for audit, and normalizes errors.

use std::time::Instant;

use serde_json::Value;

use crate::error::{to_error_payload, SessionError};
use crate::session::{phase, ToolCallRecord};
use crate::tools::{ToolContext, ToolRegistry};

fn digest(value: &Value) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(value.to_string().as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// Dispatches one tool call, returning the tool's JSON output on success or
/// a `{error, message}` payload on failure -- never an `Err` the transport
/// would have to translate itself, except when the tool name is entirely
/// unknown (a transport-level bug, not an agent-facing error).
pub async fn dispatch(registry: &ToolRegistry, ctx: &ToolContext, name: &str, args: Value) -> anyhow::Result<Value> {
    let Some(tool) = registry.get(name) else {
        anyhow::bail!("unknown tool '{name}'");
    };

    let session = match args.get("session_id").and_then(|v| v.as_str()) {
        Some(id) => ctx.sessions.get(id).await,
        None => None,
    };

    if let Some(handle) = &session {
        let current_phase = handle.lock().await.phase;
        if !phase::is_admitted(current_phase, name) {
            let payload = to_error_payload(
                &SessionError::PhaseBlocked { tool: name.to_string(), phase: current_phase.as_str().to_string() }.into(),
            );
            return Ok(payload);
        }
    } else if !phase::ALWAYS_ADMITTED.contains(&name) && name != "start_session" {
        return Ok(to_error_payload(&SessionError::NoActiveSession.into()));
    }

    let start = Instant::now();
    let arg_digest = digest(&args);
    let result = tool.execute(args, ctx).await;
    let elapsed = start.elapsed();

    match result {
        Ok(out) => {
            if let Some(handle) = &session {
                let mut s = handle.lock().await;
                s.record_tool_call(ToolCallRecord {
                    tool: name.to_string(),
                    start_ns: 0,
                    end_ns: elapsed.as_nanos(),
                    arg_digest,
                    result_digest: digest(&out.output),
                });
            }
            Ok(out.output)
        }
        Err(e) => Ok(to_error_payload(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Intent, Session, SessionRegistry};
    use crate::tools::default_registry;
    use code_intel_config::Settings;
    use serde_json::json;
    use std::sync::Arc;

    fn ctx(repo_root: std::path::PathBuf, sessions: Arc<SessionRegistry>) -> ToolContext {
        ToolContext { repo_root, sessions, index: None, settings: Arc::new(Settings::default()) }
    }

    #[tokio::test]
    async fn phase_blocked_tool_returns_error_payload_not_err() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionRegistry::new());
        let session = Session::new(
            Intent::Investigate,
            "why does login fail".into(),
            dir.path().to_path_buf(),
            code_intel_config::GateLevel::Auto,
        );
        let id = session.id.clone();
        sessions.create(session).await;

        let registry = default_registry();
        let c = ctx(dir.path().to_path_buf(), sessions);
        let out = dispatch(&registry, &c, "submit_for_review", json!({"session_id": id}))
            .await
            .unwrap();
        assert_eq!(out["error"], "phase_blocked");
    }

    #[tokio::test]
    async fn always_admitted_tool_runs_without_a_session() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionRegistry::new());
        let registry = default_registry();
        let c = ctx(dir.path().to_path_buf(), sessions);
        let out = dispatch(&registry, &c, "get_outcome_stats", json!({})).await.unwrap();
        assert!(out.get("error").is_none());
    }
}
