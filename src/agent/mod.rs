//! Agent session manager.
//!
//! Multiplexes many logical conversations over repeated invocations of an
//! external command-line agent. Each request:
//!
//! 1. resolves (or lazily creates) its [`Session`](crate::session) and
//!    records the user message;
//! 2. when the agent was detected at startup, runs a short readiness probe
//!    and short-circuits with guidance text if the agent is not ready;
//! 3. invokes the agent in the session's working directory with the
//!    encoded message on stdin and decodes the event stream it prints;
//! 4. when no agent was detected, answers with a clearly labelled
//!    simulation response instead of spawning anything;
//! 5. records the reply in the session history.
//!
//! [`AgentManager::chat`] never returns an error: every failure is folded
//! into a [`ChatResult`] with `success == false`.

pub mod codec;

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::AgentConfig;
use crate::process::{self, CommandSpec, RunOutcome};
use crate::session::{Role, SessionInfo, SessionStore};
use crate::{AppError, Result};

/// Response text used when the agent exits cleanly without printing anything.
pub const EMPTY_SUCCESS_RESPONSE: &str = "Command executed successfully";

/// Whether an agent binary was found at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentAvailability {
    /// No candidate invocation answered `--version`; requests are simulated.
    Unavailable,
    /// A candidate answered; `command` is its argv prefix.
    Available {
        /// Program and leading arguments of the detected invocation form.
        command: Vec<String>,
    },
}

impl AgentAvailability {
    /// `true` when a real agent binary was detected.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }
}

/// Result of the per-request readiness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The agent answered the probe; real invocations may proceed.
    Ready,
    /// The agent is installed but not usable; carries operator guidance.
    Unauthenticated(String),
}

/// Terminal outcome of one chat request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ChatResult {
    /// Whether the request produced a usable response.
    pub success: bool,
    /// Response text; empty on failure.
    pub response: String,
    /// Human-readable error on failure.
    pub error: Option<String>,
    /// Session the request ran in; `None` when the session could not be
    /// resolved.
    pub session_id: Option<String>,
}

impl ChatResult {
    /// Successful result.
    #[must_use]
    pub fn ok(response: impl Into<String>, session_id: &str) -> Self {
        Self {
            success: true,
            response: response.into(),
            error: None,
            session_id: Some(session_id.to_owned()),
        }
    }

    /// Failed result with an empty response.
    #[must_use]
    pub fn failure(error: impl Into<String>, session_id: Option<&str>) -> Self {
        Self {
            success: false,
            response: String::new(),
            error: Some(error.into()),
            session_id: session_id.map(str::to_owned),
        }
    }
}

/// Probe each candidate invocation form with `--version` and return the
/// first one that exits successfully.
pub async fn detect_agent(config: &AgentConfig) -> AgentAvailability {
    for candidate in &config.candidates {
        let Ok(spec) = CommandSpec::from_argv(candidate) else {
            continue;
        };
        let spec = spec.arg("--version");

        match process::run(&spec, &[], config.detect_timeout()).await {
            Ok(outcome) if outcome.success() => {
                info!(command = %candidate.join(" "), "found agent CLI");
                return AgentAvailability::Available {
                    command: candidate.clone(),
                };
            }
            Ok(outcome) => {
                info!(
                    command = %candidate.join(" "),
                    exit_code = ?outcome.exit_code(),
                    "agent candidate did not answer --version"
                );
            }
            Err(err) => {
                info!(command = %candidate.join(" "), %err, "agent candidate not runnable");
            }
        }
    }

    warn!("agent CLI not found; chat requests will be simulated");
    AgentAvailability::Unavailable
}

/// Orchestrates chat requests against the external agent.
#[derive(Debug)]
pub struct AgentManager {
    config: AgentConfig,
    sessions: Arc<SessionStore>,
    availability: AgentAvailability,
}

impl AgentManager {
    /// Detect the agent binary once and build a manager around the result.
    pub async fn detect(config: AgentConfig, sessions: Arc<SessionStore>) -> Self {
        let availability = detect_agent(&config).await;
        Self::with_availability(config, sessions, availability)
    }

    /// Build a manager with a known availability, skipping detection.
    #[must_use]
    pub fn with_availability(
        config: AgentConfig,
        sessions: Arc<SessionStore>,
        availability: AgentAvailability,
    ) -> Self {
        Self {
            config,
            sessions,
            availability,
        }
    }

    /// Availability cached at construction.
    #[must_use]
    pub fn availability(&self) -> &AgentAvailability {
        &self.availability
    }

    /// Shared session store.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Process one chat message in the given session.
    ///
    /// Never fails: unexpected errors become a [`ChatResult`] with
    /// `success == false` and no session id.
    pub async fn chat(&self, message: &str, session_id: &str) -> ChatResult {
        let span = info_span!("chat", session_id);
        match self.try_chat(message, session_id).instrument(span).await {
            Ok(result) => result,
            Err(err) => {
                error!(session_id, %err, "chat request failed");
                ChatResult::failure(err.to_string(), None)
            }
        }
    }

    /// Run the lightweight readiness probe against the detected agent.
    pub async fn check_readiness(&self) -> Readiness {
        let AgentAvailability::Available { ref command } = self.availability else {
            return Readiness::Unauthenticated("agent CLI not available".into());
        };

        let spec = match CommandSpec::from_argv(command) {
            Ok(spec) => spec.arg("--help"),
            Err(err) => return Readiness::Unauthenticated(format!("readiness check failed: {err}")),
        };

        match process::run(&spec, &[], self.config.probe_timeout()).await {
            Ok(outcome) if outcome.success() => Readiness::Ready,
            Ok(_) => Readiness::Unauthenticated(format!(
                "Run '{} auth' to authenticate the agent CLI",
                command.join(" ")
            )),
            Err(err) => Readiness::Unauthenticated(format!("readiness check failed: {err}")),
        }
    }

    /// Information about one session.
    #[must_use]
    pub fn session_info(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.describe(session_id)
    }

    /// Information about every session.
    #[must_use]
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.sessions.list_all()
    }

    /// Destroy one session. Returns `false` if it did not exist.
    pub fn delete_session(&self, session_id: &str) -> bool {
        self.sessions.destroy(session_id)
    }

    /// Destroy every session; called at process shutdown.
    pub fn shutdown(&self) -> usize {
        let removed = self.sessions.destroy_all();
        info!(removed, "all sessions cleaned up");
        removed
    }

    async fn try_chat(&self, message: &str, session_id: &str) -> Result<ChatResult> {
        let session = self.sessions.get_or_create(session_id)?;
        self.sessions.touch(session_id);
        self.sessions
            .append_history(session_id, Role::User, message, Utc::now());

        let result = match self.availability {
            AgentAvailability::Available { ref command } => match self.check_readiness().await {
                Readiness::Ready => self.invoke(command, message, &session).await,
                Readiness::Unauthenticated(guidance) => {
                    warn!(session_id, "agent not ready");
                    ChatResult::failure(
                        format!("Agent authentication required. {guidance}"),
                        Some(session_id),
                    )
                }
            },
            AgentAvailability::Unavailable => self.simulate(message, session_id)?,
        };

        let recorded = if result.response.is_empty() {
            result.error.as_deref().unwrap_or_default()
        } else {
            result.response.as_str()
        };
        self.sessions
            .append_history(session_id, Role::Assistant, recorded, Utc::now());

        Ok(result)
    }

    /// Run one agent invocation; every failure is folded into the result.
    async fn invoke(&self, command: &[String], message: &str, session: &SessionInfo) -> ChatResult {
        let session_id = session.session_id.as_str();
        let mut spec = match CommandSpec::from_argv(command) {
            Ok(spec) => spec.args(self.config.args.iter().cloned()),
            Err(err) => return ChatResult::failure(err.to_string(), Some(session_id)),
        };
        if let Some(ref mcp_config) = self.config.mcp_config {
            spec = spec
                .arg("--mcp-config")
                .arg(mcp_config.to_string_lossy().into_owned());
        }
        let spec = spec.current_dir(&session.working_dir);

        let payload = codec::encode_user_message(message);
        let outcome =
            match process::run(&spec, payload.as_bytes(), self.config.invocation_timeout()).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    let err = AppError::Agent(err.to_string());
                    error!(session_id, %err, "agent invocation could not run");
                    return ChatResult::failure(err.to_string(), Some(session_id));
                }
            };

        match outcome {
            RunOutcome::TimedOut { timeout, .. } => ChatResult::failure(
                format!("agent timed out after {}s", timeout.as_secs()),
                Some(session_id),
            ),
            ref exited if exited.success() => {
                let stdout = exited.stdout().trim();
                let response = codec::decode_stream(stdout).unwrap_or_else(|| {
                    if stdout.is_empty() {
                        EMPTY_SUCCESS_RESPONSE.to_owned()
                    } else {
                        stdout.to_owned()
                    }
                });
                info!(session_id, chars = response.len(), "agent responded");
                ChatResult::ok(response, session_id)
            }
            ref exited => {
                let diagnostic = exited.diagnostic();
                let error = match (diagnostic.is_empty(), exited.exit_code()) {
                    (false, _) => diagnostic,
                    (true, Some(code)) => format!("agent exited with code {code}"),
                    (true, None) => "agent terminated by signal".to_owned(),
                };
                warn!(session_id, exit_code = ?exited.exit_code(), "agent invocation failed");
                ChatResult::failure(error, Some(session_id))
            }
        }
    }

    fn simulate(&self, message: &str, session_id: &str) -> Result<ChatResult> {
        let session = self
            .sessions
            .describe(session_id)
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?;

        let response = format!(
            "**[Simulation mode: no agent CLI detected]**\n\
             \n\
             This reply was generated locally; no agent process was run.\n\
             \n\
             **Your message:** {message}\n\
             \n\
             **Session:** `{id}`\n\
             **Working directory:** `{dir}`\n\
             **Messages in this session:** {count}\n\
             \n\
             To enable real responses, install the agent CLI \
             (`npm install -g @anthropic-ai/claude-code`), authenticate it, \
             and restart the server.",
            id = session.session_id,
            dir = session.working_dir.display(),
            count = session.message_count,
        );

        Ok(ChatResult::ok(response, session_id))
    }
}
