pub mod openai;
pub mod settings;
pub mod types;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ToolResult};
use crate::history::Message;
use crate::tools::{CatalogEntry, ToolId};

pub use openai::{LlmTranslator, OpenAiClient, OpenAiDecisionProcedure};
pub use settings::{ModelSettings, SettingsHandle, SettingsUpdate};

/// A tool call chosen by the decision procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub tool_id: ToolId,
    /// Left as a raw string when the model produced something other than JSON.
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub call_id: String,
    pub tool_id: ToolId,
    pub content: String,
    pub is_error: bool,
}

/// Tool calls of the first decision together with their results, in call order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRound {
    pub preamble: Option<String>,
    pub calls: Vec<ToolCall>,
    pub results: Vec<ToolCallResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub instructions: String,
    pub history: Vec<Message>,
    /// Only the tools the agent is permitted to use.
    pub catalog: Vec<CatalogEntry>,
    pub message: String,
    /// Set on the re-entrant call that folds tool results back in.
    pub tool_round: Option<ToolRound>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl Decision {
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn call(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text: None,
            tool_calls,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// Maps instructions, history, catalog and message to text and/or tool calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DecisionProcedure: Send + Sync {
    async fn decide(&self, request: DecisionRequest) -> Result<Decision>;
}

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        target_language: &str,
        source_language: Option<&str>,
    ) -> ToolResult<String>;
}
