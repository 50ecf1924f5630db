//! Integration tests for the agent session manager.
//!
//! Real invocations use shell-script fake agents run through `/bin/sh`.

use std::time::{Duration, Instant};

use agent_relay::agent::{detect_agent, AgentAvailability, Readiness, EMPTY_SUCCESS_RESPONSE};
use agent_relay::config::AgentConfig;
use agent_relay::session::Role;

use super::test_helpers::{scripted_agent, simulated_agent, write_agent_script};

// ── Simulation mode ──────────────────────────────────────────

#[tokio::test]
async fn simulation_reply_describes_session() {
    let temp = tempfile::tempdir().expect("tempdir");
    let agent = simulated_agent(temp.path());

    let result = agent.chat("hello", "s1").await;

    assert!(result.success, "{result:?}");
    assert_eq!(result.session_id.as_deref(), Some("s1"));
    assert!(result.error.is_none());
    assert!(result.response.contains("Simulation mode"));
    assert!(result.response.contains("s1"));
    assert!(result.response.contains("hello"));

    let sessions = agent.list_sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_id, "s1");
    assert_eq!(sessions[0].message_count, 2);
    let dir = sessions[0].working_dir.display().to_string();
    assert!(result.response.contains(&dir), "reply names {dir}");
}

#[tokio::test]
async fn simulation_keeps_sessions_apart() {
    let temp = tempfile::tempdir().expect("tempdir");
    let agent = simulated_agent(temp.path());

    agent.chat("one", "a").await;
    agent.chat("two", "a").await;
    agent.chat("three", "b").await;

    assert_eq!(agent.session_info("a").expect("a").message_count, 4);
    assert_eq!(agent.session_info("b").expect("b").message_count, 2);
    assert_ne!(
        agent.session_info("a").expect("a").working_dir,
        agent.session_info("b").expect("b").working_dir
    );

    let history = agent.sessions().history("a").expect("history");
    let roles: Vec<Role> = history.iter().map(|h| h.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
    assert_eq!(history[2].content, "two");
}

#[tokio::test]
async fn delete_and_shutdown_remove_directories() {
    let temp = tempfile::tempdir().expect("tempdir");
    let agent = simulated_agent(temp.path());
    agent.chat("x", "a").await;
    agent.chat("y", "b").await;
    let dir_a = agent.session_info("a").expect("a").working_dir;
    let dir_b = agent.session_info("b").expect("b").working_dir;

    assert!(agent.delete_session("a"));
    assert!(!dir_a.exists());
    assert!(!agent.delete_session("a"));

    assert_eq!(agent.shutdown(), 1);
    assert!(!dir_b.exists());
    assert!(agent.list_sessions().is_empty());
}

#[tokio::test]
async fn unusable_session_root_yields_failure_without_session() {
    let temp = tempfile::tempdir().expect("tempdir");
    let file_root = temp.path().join("not-a-dir");
    std::fs::write(&file_root, "x").expect("write");
    let agent = simulated_agent(&file_root);

    let result = agent.chat("hello", "s1").await;

    assert!(!result.success);
    assert!(result.session_id.is_none());
    assert!(result.error.is_some());
    assert!(result.response.is_empty());
}

// ── Detection ────────────────────────────────────────────────

#[tokio::test]
async fn detection_skips_missing_candidates() {
    let config = AgentConfig {
        candidates: vec![
            vec!["/definitely/not/an/agent".to_owned()],
            vec!["/bin/sh".to_owned(), "-c".to_owned(), "exit 0".to_owned()],
        ],
        ..AgentConfig::default()
    };

    let availability = detect_agent(&config).await;

    assert_eq!(
        availability,
        AgentAvailability::Available {
            command: vec!["/bin/sh".to_owned(), "-c".to_owned(), "exit 0".to_owned()],
        }
    );
}

#[tokio::test]
async fn detection_without_answering_candidate_is_unavailable() {
    let config = AgentConfig {
        candidates: vec![
            vec!["/definitely/not/an/agent".to_owned()],
            vec!["/bin/sh".to_owned(), "-c".to_owned(), "exit 1".to_owned()],
        ],
        ..AgentConfig::default()
    };

    let availability = detect_agent(&config).await;

    assert_eq!(availability, AgentAvailability::Unavailable);
    assert!(!availability.is_available());
}

// ── Real invocations ─────────────────────────────────────────

#[tokio::test]
async fn stream_result_becomes_response() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = write_agent_script(
        temp.path(),
        r#"echo '{"type":"system","subtype":"init"}'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"thinking"}]}}'
echo '{"type":"result","result":"final answer"}'"#,
    );
    let agent = scripted_agent(&temp.path().join("sessions"), &script, 10);

    let result = agent.chat("question", "s1").await;

    assert!(result.success, "{result:?}");
    assert_eq!(result.response, "final answer");
    assert_eq!(result.session_id.as_deref(), Some("s1"));

    let history = agent.sessions().history("s1").expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, "final answer");
}

#[tokio::test]
async fn agent_runs_in_session_directory() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = write_agent_script(temp.path(), r#"printf '{"type":"result","result":"%s"}\n' "$(pwd)""#);
    let agent = scripted_agent(&temp.path().join("sessions"), &script, 10);

    let result = agent.chat("where are you", "s1").await;

    let working_dir = agent.session_info("s1").expect("info").working_dir;
    assert!(result.success, "{result:?}");
    assert_eq!(
        std::path::Path::new(&result.response)
            .canonicalize()
            .expect("canonical"),
        working_dir.canonicalize().expect("canonical")
    );
}

#[tokio::test]
async fn message_arrives_as_stream_json_on_stdin() {
    let temp = tempfile::tempdir().expect("tempdir");
    let capture = temp.path().join("stdin.txt");
    // The helper consumes stdin first, so this agent is written by hand.
    let script = temp.path().join("echo-agent.sh");
    std::fs::write(
        &script,
        format!(
            "case \"$1\" in --help) exit 0 ;; esac\ncat > '{}'\necho done\n",
            capture.display()
        ),
    )
    .expect("write script");
    let agent = scripted_agent(&temp.path().join("sessions"), &script, 10);

    let result = agent.chat("hi \"there\"", "s1").await;

    assert!(result.success, "{result:?}");
    assert_eq!(result.response, "done", "raw stdout is the fallback");
    let written = std::fs::read_to_string(&capture).expect("capture");
    let record: serde_json::Value = serde_json::from_str(written.trim()).expect("json line");
    assert_eq!(record["type"], "user");
    assert_eq!(record["content"], "hi \"there\"");
}

#[tokio::test]
async fn silent_success_uses_placeholder() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = write_agent_script(temp.path(), "exit 0");
    let agent = scripted_agent(&temp.path().join("sessions"), &script, 10);

    let result = agent.chat("noop", "s1").await;

    assert!(result.success);
    assert_eq!(result.response, EMPTY_SUCCESS_RESPONSE);
}

#[tokio::test]
async fn nonzero_exit_reports_stderr() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = write_agent_script(temp.path(), "echo 'model overloaded' >&2\nexit 2");
    let agent = scripted_agent(&temp.path().join("sessions"), &script, 10);

    let result = agent.chat("hello", "s1").await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("model overloaded"));
    assert_eq!(result.session_id.as_deref(), Some("s1"));
    assert!(result.response.is_empty());
    assert_eq!(agent.session_info("s1").expect("info").message_count, 2);
}

#[tokio::test]
async fn nonzero_exit_without_output_reports_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = write_agent_script(temp.path(), "exit 7");
    let agent = scripted_agent(&temp.path().join("sessions"), &script, 10);

    let result = agent.chat("hello", "s1").await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("agent exited with code 7"));
}

#[tokio::test]
async fn spawn_failure_is_recorded_in_history() {
    let temp = tempfile::tempdir().expect("tempdir");
    let sessions_root = temp.path().join("sessions");
    // Passes the readiness probe, then removes every session directory so
    // the real invocation cannot start in its working directory.
    let script = temp.path().join("vanishing-dir-agent.sh");
    std::fs::write(
        &script,
        format!(
            "case \"$1\" in --help) rm -rf '{}'/*; exit 0 ;; esac\necho unreachable\n",
            sessions_root.display()
        ),
    )
    .expect("write script");
    let agent = scripted_agent(&sessions_root, &script, 10);

    let result = agent.chat("hello", "s1").await;

    assert!(!result.success, "{result:?}");
    assert_eq!(result.session_id.as_deref(), Some("s1"));
    let error = result.error.expect("error text");
    assert!(error.contains("failed to spawn"), "{error}");

    let history = agent.sessions().history("s1").expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].content, error);
}

#[tokio::test]
#[serial_test::serial]
async fn slow_agent_times_out() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = write_agent_script(temp.path(), "exec sleep 10");
    let agent = scripted_agent(&temp.path().join("sessions"), &script, 1);

    let started = Instant::now();
    let result = agent.chat("hello", "s1").await;

    assert!(!result.success);
    assert!(
        result.error.as_deref().is_some_and(|e| e.contains("timed out")),
        "{result:?}"
    );
    assert_eq!(result.session_id.as_deref(), Some("s1"));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn unready_agent_returns_guidance() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = temp.path().join("locked-agent.sh");
    std::fs::write(&script, "exit 1\n").expect("write script");
    let agent = scripted_agent(&temp.path().join("sessions"), &script, 10);

    assert!(matches!(
        agent.check_readiness().await,
        Readiness::Unauthenticated(_)
    ));

    let result = agent.chat("hello", "s1").await;

    assert!(!result.success);
    assert!(
        result
            .error
            .as_deref()
            .is_some_and(|e| e.contains("authentication")),
        "{result:?}"
    );
    assert_eq!(result.session_id.as_deref(), Some("s1"));
}

#[tokio::test]
async fn ready_agent_passes_probe() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = write_agent_script(temp.path(), "exit 0");
    let agent = scripted_agent(&temp.path().join("sessions"), &script, 10);

    assert_eq!(agent.check_readiness().await, Readiness::Ready);
    assert!(agent.availability().is_available());
}
