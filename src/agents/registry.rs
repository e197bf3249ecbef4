use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::agents::{Agent, AgentSummary, NewAgent};
use crate::error::{DispatchError, Result};
use crate::tools::{ToolDefinition, ToolId};

struct Entries<T> {
    by_id: HashMap<String, T>,
    // creation order for listings
    order: Vec<String>,
}

impl<T> Default for Entries<T> {
    fn default() -> Self {
        Self {
            by_id: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<T: Clone> Entries<T> {
    fn insert(&mut self, id: String, value: T) {
        self.order.push(id.clone());
        self.by_id.insert(id, value);
    }

    fn list(&self) -> Vec<T> {
        self.order.iter().filter_map(|id| self.by_id.get(id).cloned()).collect()
    }

    fn remove(&mut self, id: &str) {
        self.order.retain(|existing| existing != id);
        self.by_id.remove(id);
    }
}

/// On-disk form of the registry, entries in creation order.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    tools: Vec<ToolDefinition>,
    agents: Vec<Agent>,
}

/// Agent and tool definitions keyed by identifier. Read-mostly.
#[derive(Default)]
pub struct Registry {
    tools: RwLock<Entries<ToolDefinition>>,
    agents: RwLock<Entries<Agent>>,
    /// Snapshot file rewritten after every creation; in-memory only when unset.
    path: Option<PathBuf>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry backed by a JSON snapshot at `path`, loading whatever it already holds.
    pub async fn open(path: PathBuf) -> Result<Self> {
        let snapshot = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str::<Snapshot>(&content).map_err(|e| {
                DispatchError::Storage(format!("unreadable registry {:?}: {}", path, e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => return Err(e.into()),
        };

        let mut tools = Entries::default();
        for tool in snapshot.tools {
            tools.insert(tool.id.clone(), tool);
        }
        let mut agents = Entries::default();
        for agent in snapshot.agents {
            agents.insert(agent.id.clone(), agent);
        }
        info!(
            "Loaded registry from {:?} ({} tools, {} agents)",
            path,
            tools.order.len(),
            agents.order.len()
        );

        Ok(Self {
            tools: RwLock::new(tools),
            agents: RwLock::new(agents),
            path: Some(path),
        })
    }

    // callers hold the write lock of the collection they changed, so writes never interleave
    async fn persist(&self, tools: &Entries<ToolDefinition>, agents: &Entries<Agent>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = Snapshot {
            tools: tools.list(),
            agents: agents.list(),
        };
        write_snapshot(path, &snapshot).await.map_err(|e| {
            warn!("Failed to persist registry to {:?}: {}", path, e);
            DispatchError::Storage(format!("registry not saved: {}", e))
        })
    }

    pub async fn create_tool(&self, tool: ToolDefinition) -> Result<ToolDefinition> {
        validate_identifier(&tool.id)?;
        tool.check_schema().map_err(DispatchError::InvalidArguments)?;

        let mut tools = self.tools.write().await;
        if tools.by_id.contains_key(&tool.id) {
            return Err(DispatchError::AlreadyExists(format!("tool {}", tool.id)));
        }
        tools.insert(tool.id.clone(), tool.clone());
        let agents = self.agents.read().await;
        if let Err(e) = self.persist(&tools, &agents).await {
            tools.remove(&tool.id);
            return Err(e);
        }

        info!("Registered tool {} ({:?})", tool.id, tool.kind);
        Ok(tool)
    }

    pub async fn get_tool(&self, tool_id: &str) -> Result<ToolDefinition> {
        self.tools
            .read()
            .await
            .by_id
            .get(tool_id)
            .cloned()
            .ok_or_else(|| DispatchError::ToolNotFound(tool_id.to_string()))
    }

    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        self.tools.read().await.list()
    }

    pub async fn create_agent(&self, request: NewAgent) -> Result<Agent> {
        if request.name.trim().is_empty() {
            return Err(DispatchError::InvalidArguments("agent name must not be empty".to_string()));
        }
        if let Some(id) = &request.id {
            validate_identifier(id)?;
        }

        let tools = self.tools.read().await;
        if let Some(missing) = request.tool_ids.iter().find(|id| !tools.by_id.contains_key(*id)) {
            return Err(DispatchError::ToolNotFound(missing.clone()));
        }

        let agent = request.into_agent();
        let mut agents = self.agents.write().await;
        if agents.by_id.contains_key(&agent.id) {
            return Err(DispatchError::AlreadyExists(format!("agent {}", agent.id)));
        }
        agents.insert(agent.id.clone(), agent.clone());
        if let Err(e) = self.persist(&tools, &agents).await {
            agents.remove(&agent.id);
            return Err(e);
        }

        info!("Created agent {} ({}) with {} tools", agent.id, agent.name, agent.tool_ids.len());
        Ok(agent)
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<Agent> {
        self.agents
            .read()
            .await
            .by_id
            .get(agent_id)
            .cloned()
            .ok_or_else(|| DispatchError::AgentNotFound(agent_id.to_string()))
    }

    pub async fn list_agents(&self) -> Vec<AgentSummary> {
        self.agents.read().await.list().iter().map(AgentSummary::from).collect()
    }

    /// The agent together with its permitted tools, in the agent's order.
    pub async fn resolve(&self, agent_id: &str) -> Result<(Agent, Vec<ToolDefinition>)> {
        let agent = self.get_agent(agent_id).await?;

        let tools = self.tools.read().await;
        let permitted = agent
            .tool_ids
            .iter()
            .map(|id: &ToolId| {
                tools
                    .by_id
                    .get(id)
                    .cloned()
                    .ok_or_else(|| DispatchError::ToolNotFound(id.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("Resolved agent {} with {} tools", agent.id, permitted.len());
        Ok((agent, permitted))
    }
}

async fn write_snapshot(path: &Path, snapshot: &Snapshot) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_vec_pretty(snapshot)?;
    // readers only ever see a complete snapshot
    let staging = path.with_extension("json.tmp");
    tokio::fs::write(&staging, content).await?;
    tokio::fs::rename(&staging, path).await
}

fn validate_identifier(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= 64
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(DispatchError::InvalidArguments(format!(
            "identifier '{}' must be 1-64 characters of [A-Za-z0-9_-]",
            id
        )))
    }
}
