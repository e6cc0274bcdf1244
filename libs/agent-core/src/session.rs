//! Durable conversation checkpoints.
//!
//! A session is saved after every completed iteration so an interrupted run
//! can be picked up again with `--resume <id>`. [`FileSessionStore`] keeps one
//! JSON document per session; [`InMemorySessionStore`] backs tests and
//! throwaway runs.

use crate::types::{Message, TokenUsage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const SESSION_VERSION_V1: u16 = 1;
pub const SESSION_FORMAT_V1: &str = "gitsage_session_v1";

const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("invalid session id `{0}`: only ASCII letters, digits, `-` and `_` are allowed")]
    InvalidId(String),

    #[error("session store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid session payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("unsupported session version: {0}")]
    UnsupportedVersion(u16),

    #[error("unsupported session format: {0}")]
    UnsupportedFormat(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub agent_type: String,
    pub messages: Vec<Message>,
    pub iteration_count: usize,
    pub max_iterations: usize,
    #[serde(default)]
    pub token_usage: TokenUsage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Session {
    pub fn new(id: impl Into<String>, agent_type: impl Into<String>, max_iterations: usize) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            agent_type: agent_type.into(),
            messages: Vec::new(),
            iteration_count: 0,
            max_iterations,
            token_usage: TokenUsage::default(),
            created_at: now,
            updated_at: now,
            metadata: BTreeMap::new(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            agent_type: self.agent_type.clone(),
            message_count: self.messages.len(),
            iteration_count: self.iteration_count,
            max_iterations: self.max_iterations,
            created_at: self.created_at,
            updated_at: self.updated_at,
            metadata: self.metadata.clone(),
        }
    }
}

/// Everything about a session except its messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub agent_type: String,
    #[serde(default)]
    pub message_count: usize,
    pub iteration_count: usize,
    pub max_iterations: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, session: &Session) -> Result<(), SessionStoreError>;

    async fn load(&self, id: &str) -> Result<Session, SessionStoreError>;

    /// Most recently updated first.
    async fn list(&self) -> Result<Vec<SessionSummary>, SessionStoreError>;

    async fn delete(&self, id: &str) -> Result<(), SessionStoreError>;

    /// Keep the `max_keep` most recently updated sessions and delete the rest.
    /// Returns how many were deleted.
    async fn cleanup_old(&self, max_keep: usize) -> Result<usize, SessionStoreError> {
        let sessions = self.list().await?;
        let mut removed = 0;
        for summary in sessions.iter().skip(max_keep) {
            self.delete(&summary.id).await?;
            removed += 1;
        }
        if removed > 0 {
            tracing::debug!(removed, max_keep, "pruned old sessions");
        }
        Ok(removed)
    }
}

/// `<agent_type>-<YYYYMMDD-HHMMSS>-<6 hex>`
pub fn generate_session_id(agent_type: &str) -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(6).collect();
    format!(
        "{agent_type}-{}-{suffix}",
        Utc::now().format("%Y%m%d-%H%M%S")
    )
}

pub fn validate_session_id(id: &str) -> Result<(), SessionStoreError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SessionStoreError::InvalidId(id.to_string()))
    }
}

#[derive(Serialize)]
struct SessionEnvelopeRef<'a> {
    version: u16,
    format: &'a str,
    message_count: usize,
    #[serde(flatten)]
    session: &'a Session,
}

pub fn serialize_session(session: &Session) -> Result<Vec<u8>, SessionStoreError> {
    let envelope = SessionEnvelopeRef {
        version: SESSION_VERSION_V1,
        format: SESSION_FORMAT_V1,
        message_count: session.messages.len(),
        session,
    };
    Ok(serde_json::to_vec_pretty(&envelope)?)
}

/// Decode a stored session envelope, rejecting unknown versions and formats.
pub fn deserialize_session(payload: &[u8]) -> Result<Session, SessionStoreError> {
    let value: Value = serde_json::from_slice(payload)?;
    check_envelope(&value)?;
    Ok(serde_json::from_value(value)?)
}

fn check_envelope(value: &Value) -> Result<(), SessionStoreError> {
    if let Some(version) = value.get("version").and_then(Value::as_u64) {
        let version = u16::try_from(version).unwrap_or(u16::MAX);
        if version != SESSION_VERSION_V1 {
            return Err(SessionStoreError::UnsupportedVersion(version));
        }
    }
    if let Some(format) = value.get("format").and_then(Value::as_str)
        && format != SESSION_FORMAT_V1
    {
        return Err(SessionStoreError::UnsupportedFormat(format.to_string()));
    }
    Ok(())
}

/// One `<id>.json` file per session under `dir`.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, SessionStoreError> {
        validate_session_id(id)?;
        Ok(self.dir.join(format!("{id}.json")))
    }

    async fn read_summary(&self, path: &Path) -> Result<SessionSummary, SessionStoreError> {
        let payload = tokio::fs::read(path).await?;

        // Unknown fields are skipped, so message bodies are never built.
        if let Ok(summary) = serde_json::from_slice::<SessionSummary>(&payload) {
            return Ok(summary);
        }

        Ok(deserialize_session(&payload)?.summary())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        let path = self.path_for(&session.id)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let payload = serialize_session(session)?;
        let tmp = self.dir.join(format!(".{}.json.tmp", session.id));
        tokio::fs::write(&tmp, &payload).await?;
        if let Err(error) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(error.into());
        }
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Session, SessionStoreError> {
        let path = self.path_for(id)?;
        let payload = match tokio::fs::read(&path).await {
            Ok(payload) => payload,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionStoreError::NotFound(id.to_string()));
            }
            Err(error) => return Err(error.into()),
        };
        deserialize_session(&payload)
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, SessionStoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let valid_id = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .is_some_and(|id| validate_session_id(id).is_ok());
            if !valid_id {
                continue;
            }

            match self.read_summary(&path).await {
                Ok(summary) => summaries.push(summary),
                Err(error) => {
                    tracing::warn!(path = %path.display(), "skipping unreadable session: {error}");
                }
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| b.id.cmp(&a.id)));
        Ok(summaries)
    }

    async fn delete(&self, id: &str) -> Result<(), SessionStoreError> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(SessionStoreError::NotFound(id.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        validate_session_id(&session.id)?;
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Session, SessionStoreError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SessionStoreError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, SessionStoreError> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .read()
            .await
            .values()
            .map(Session::summary)
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| b.id.cmp(&a.id)));
        Ok(summaries)
    }

    async fn delete(&self, id: &str) -> Result<(), SessionStoreError> {
        self.sessions
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SessionStoreError::NotFound(id.to_string()))
    }
}
