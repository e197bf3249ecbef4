use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::agents::AgentId;
use crate::error::{Result, ToolError};
use crate::storage::ArtifactRef;
use crate::tools::ToolId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Caller,
    Agent,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn caller(content: impl Into<String>) -> Self {
        Self::new(Role::Caller, content)
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self::new(Role::Agent, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvocationOutcome {
    Succeeded {
        summary: String,
        artifacts: Vec<ArtifactRef>,
    },
    Failed {
        error: ToolError,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub call_id: String,
    pub tool_id: ToolId,
    pub arguments: Value,
    pub outcome: InvocationOutcome,
    pub duration_ms: u64,
}

impl ToolInvocation {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, InvocationOutcome::Succeeded { .. })
    }

    pub fn artifacts(&self) -> &[ArtifactRef] {
        match &self.outcome {
            InvocationOutcome::Succeeded { artifacts, .. } => artifacts,
            InvocationOutcome::Failed { .. } => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnOutcome {
    Completed,
    Failed { reason: String },
    Timeout,
}

/// One complete exchange: the caller's message, every tool call, and the reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub agent_id: AgentId,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub messages: Vec<Message>,
    pub invocations: Vec<ToolInvocation>,
    pub outcome: TurnOutcome,
}

impl Turn {
    pub fn reply(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Agent)
            .map(|m| m.content.as_str())
    }
}

/// Append-only per-agent record of turns.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Appends a whole turn; readers see all of it or none of it.
    async fn append(&self, agent_id: &str, turn: Turn) -> Result<()>;

    /// Turns in append order.
    async fn read(&self, agent_id: &str) -> Result<Vec<Turn>>;

    /// Last `limit` caller/agent messages, oldest first.
    async fn recent_messages(&self, agent_id: &str, limit: usize) -> Result<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .read(agent_id)
            .await?
            .into_iter()
            .flat_map(|turn| turn.messages)
            .filter(|m| m.role != Role::Tool)
            .collect();
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.split_off(skip))
    }
}

#[derive(Default)]
pub struct InMemoryHistoryStore {
    turns: RwLock<HashMap<AgentId, Vec<Turn>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, agent_id: &str, turn: Turn) -> Result<()> {
        let mut turns = self.turns.write().await;
        turns.entry(agent_id.to_string()).or_default().push(turn);
        Ok(())
    }

    async fn read(&self, agent_id: &str) -> Result<Vec<Turn>> {
        let turns = self.turns.read().await;
        Ok(turns.get(agent_id).cloned().unwrap_or_default())
    }
}

/// One JSON line per turn, one file per agent.
pub struct JsonlHistoryStore {
    directory: PathBuf,
    // writers exclusive, readers shared: a reader never sees a half-written line
    lock: RwLock<()>,
}

impl JsonlHistoryStore {
    pub fn new(directory: PathBuf) -> Self {
        Self {
            directory,
            lock: RwLock::new(()),
        }
    }

    fn file_for(&self, agent_id: &str) -> PathBuf {
        let safe: String = agent_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.directory.join(format!("{}.jsonl", safe))
    }
}

#[async_trait]
impl HistoryStore for JsonlHistoryStore {
    async fn append(&self, agent_id: &str, turn: Turn) -> Result<()> {
        let mut line = serde_json::to_string(&turn)?;
        line.push('\n');

        let _guard = self.lock.write().await;
        tokio::fs::create_dir_all(&self.directory).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(self.file_for(agent_id))
            .await?;

        // terminate a torn line left by an interrupted write so it stays on its own
        let len = file.metadata().await?.len();
        if len > 0 {
            file.seek(SeekFrom::Start(len - 1)).await?;
            let mut last = [0u8; 1];
            file.read_exact(&mut last).await?;
            if last[0] != b'\n' {
                warn!("History for {} ends in an interrupted line; starting a new one", agent_id);
                line.insert(0, '\n');
            }
        }

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!("Appended turn {} for agent {}", turn.id, agent_id);
        Ok(())
    }

    async fn read(&self, agent_id: &str) -> Result<Vec<Turn>> {
        let _guard = self.lock.read().await;
        let content = match tokio::fs::read_to_string(self.file_for(agent_id)).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        // an unterminated last line is an interrupted write
        let complete = match content.rfind('\n') {
            Some(end) => &content[..end],
            None => "",
        };

        let mut turns = Vec::new();
        for line in complete.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<Turn>(line) {
                Ok(turn) if turn.agent_id == agent_id => turns.push(turn),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable history line for {}: {}", agent_id, e),
            }
        }
        Ok(turns)
    }
}
