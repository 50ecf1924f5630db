//! Session store: per-conversation working directories and history.
//!
//! Each session key owns a uniquely named directory under the store root
//! (created by [`tempfile`]) and an append-only message history. The
//! directory exists exactly as long as the store entry does.
//!
//! The store-wide mutex is held only for in-memory mutation and directory
//! creation. Agent invocations run outside of it, so requests on different
//! keys never wait on each other's subprocess.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{info, warn};

use crate::{AppError, Result};

/// Maximum number of key characters embedded in a directory name.
const MAX_KEY_CHARS: usize = 48;

/// Author of a history entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Inbound client message.
    User,
    /// Outbound agent (or synthetic) reply.
    Assistant,
}

/// One message in a session's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HistoryEntry {
    /// Who produced the message.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// When the message was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Read-only projection of a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionInfo {
    /// Caller-supplied session key.
    pub session_id: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent request touching the session.
    pub last_activity: DateTime<Utc>,
    /// Number of history entries.
    pub message_count: usize,
    /// Isolated working directory.
    pub working_dir: PathBuf,
}

#[derive(Debug)]
struct Session {
    id: String,
    dir: TempDir,
    history: Vec<HistoryEntry>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl Session {
    fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            created_at: self.created_at,
            last_activity: self.last_activity,
            message_count: self.history.len(),
            working_dir: self.dir.path().to_path_buf(),
        }
    }
}

/// Owner of all live sessions.
#[derive(Debug)]
pub struct SessionStore {
    root: PathBuf,
    prefix: String,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    /// Create an empty store placing session directories under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Directory under which session directories are created.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return the session for `key`, creating it with a fresh working
    /// directory and empty history if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the working directory cannot be created.
    pub fn get_or_create(&self, key: &str) -> Result<SessionInfo> {
        let mut sessions = self.lock();
        if let Some(session) = sessions.get(key) {
            return Ok(session.info());
        }

        std::fs::create_dir_all(&self.root).map_err(|err| {
            AppError::Io(format!(
                "failed to create session root {}: {err}",
                self.root.display()
            ))
        })?;

        let prefix = format!("{}{}_", self.prefix, sanitize_key(key));
        let dir = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(&self.root)
            .map_err(|err| {
                AppError::Io(format!("failed to create working dir for session {key}: {err}"))
            })?;

        let now = Utc::now();
        let session = Session {
            id: key.to_owned(),
            dir,
            history: Vec::new(),
            created_at: now,
            last_activity: now,
        };
        let info = session.info();
        sessions.insert(key.to_owned(), session);

        info!(session_id = key, working_dir = %info.working_dir.display(), "session created");
        Ok(info)
    }

    /// Update the last-activity timestamp. No-op for unknown keys.
    pub fn touch(&self, key: &str) {
        if let Some(session) = self.lock().get_mut(key) {
            session.last_activity = Utc::now();
        }
    }

    /// Append a message to the session history. No-op for unknown keys.
    pub fn append_history(&self, key: &str, role: Role, content: &str, timestamp: DateTime<Utc>) {
        if let Some(session) = self.lock().get_mut(key) {
            session.history.push(HistoryEntry {
                role,
                content: content.to_owned(),
                timestamp,
            });
        }
    }

    /// Read-only projection of one session.
    #[must_use]
    pub fn describe(&self, key: &str) -> Option<SessionInfo> {
        self.lock().get(key).map(Session::info)
    }

    /// Copy of the session's history in append order.
    #[must_use]
    pub fn history(&self, key: &str) -> Option<Vec<HistoryEntry>> {
        self.lock().get(key).map(|session| session.history.clone())
    }

    /// Snapshot of every session.
    #[must_use]
    pub fn list_all(&self) -> Vec<SessionInfo> {
        self.lock().values().map(Session::info).collect()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// `true` when no session exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove a session and its working directory.
    ///
    /// Returns `false` when the key was unknown. Directory removal is
    /// advisory: a failure is logged and the entry is still removed.
    pub fn destroy(&self, key: &str) -> bool {
        let removed = self.lock().remove(key);
        let Some(session) = removed else {
            return false;
        };

        let path = session.dir.path().to_path_buf();
        match session.dir.close() {
            Ok(()) => info!(session_id = key, "cleaned up session working directory"),
            Err(err) => warn!(
                session_id = key,
                path = %path.display(),
                %err,
                "failed to remove session working directory"
            ),
        }
        true
    }

    /// Destroy every session. Returns how many were removed.
    pub fn destroy_all(&self) -> usize {
        let keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.iter().filter(|key| self.destroy(key)).count()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reduce a session key to characters that are safe in a directory name.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .take(MAX_KEY_CHARS)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
