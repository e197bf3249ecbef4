use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tools::ToolId;

pub type AgentId = String;

/// A named configuration: instructions plus the tools it may call. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub instructions: String,
    pub tool_ids: Vec<ToolId>,
    pub created_at: DateTime<Utc>,
}

/// Creation request; the id is generated when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAgent {
    #[serde(default)]
    pub id: Option<AgentId>,
    pub name: String,
    pub instructions: String,
    #[serde(default)]
    pub tool_ids: Vec<ToolId>,
}

impl NewAgent {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>, tool_ids: Vec<ToolId>) -> Self {
        Self {
            id: None,
            name: name.into(),
            instructions: instructions.into(),
            tool_ids,
        }
    }

    pub fn with_id(mut self, id: impl Into<AgentId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub(crate) fn into_agent(self) -> Agent {
        Agent {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: self.name,
            instructions: self.instructions,
            tool_ids: self.tool_ids,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: AgentId,
    pub name: String,
    pub tool_ids: Vec<ToolId>,
}

impl From<&Agent> for AgentSummary {
    fn from(agent: &Agent) -> Self {
        Self {
            id: agent.id.clone(),
            name: agent.name.clone(),
            tool_ids: agent.tool_ids.clone(),
        }
    }
}
