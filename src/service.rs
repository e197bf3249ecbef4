use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::agents::{self, Agent, AgentSummary, NewAgent, Registry};
use crate::batch::BatchScraper;
use crate::config::Config;
use crate::dispatcher::{Dispatcher, Reply};
use crate::error::{DispatchError, Result};
use crate::fetcher::build_fetcher;
use crate::history::{HistoryStore, InMemoryHistoryStore, JsonlHistoryStore, Turn};
use crate::llm::{LlmTranslator, ModelSettings, OpenAiClient, OpenAiDecisionProcedure, SettingsHandle, SettingsUpdate};
use crate::storage::ArtifactStore;
use crate::tools::{ToolExecutor, ToolSummary};

/// Registry snapshot kept beside the per-agent `.jsonl` history files.
pub const REGISTRY_FILE: &str = "registry.json";

/// Task-oriented entry point: an instruction plus the pages it concerns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub instruction: String,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub context: Option<String>,
}

impl TaskPayload {
    pub fn render(&self) -> String {
        let mut message = self.instruction.trim().to_string();
        if !self.urls.is_empty() {
            message.push_str("\n\nURLs:");
            for url in &self.urls {
                message.push_str(&format!("\n- {}", url));
            }
        }
        if let Some(context) = self.context.as_deref().filter(|c| !c.trim().is_empty()) {
            message.push_str(&format!("\n\nContext: {}", context.trim()));
        }
        message
    }
}

/// Transport-agnostic facade over the registry, dispatcher and history.
pub struct AgentHub {
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
    history: Arc<dyn HistoryStore>,
    settings: Arc<SettingsHandle>,
}

impl AgentHub {
    pub fn new(
        registry: Arc<Registry>,
        dispatcher: Arc<Dispatcher>,
        history: Arc<dyn HistoryStore>,
        settings: Arc<SettingsHandle>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            history,
            settings,
        }
    }

    /// Wires every component from configuration and seeds the built-in tools and agents.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = Arc::new(ArtifactStore::new(&config.output));
        store
            .ensure_directory()
            .await
            .map_err(|e| DispatchError::Storage(e.to_string()))?;

        let fetcher = build_fetcher(&config.fetcher).await?;
        let batch = Arc::new(BatchScraper::new(fetcher.clone(), store.clone(), &config.batch));

        let client = Arc::new(OpenAiClient::from_env(&config.model)?);
        let settings = client.settings();
        let decider = Arc::new(OpenAiDecisionProcedure::new(client.clone()));
        let translator = Arc::new(LlmTranslator::new(client));

        let executor = Arc::new(ToolExecutor::new(
            fetcher,
            batch,
            translator,
            store,
            config.fetcher.max_text_chars,
        ));

        let history: Arc<dyn HistoryStore> = match &config.history.directory {
            Some(directory) => {
                info!("Recording history under {:?}", directory);
                Arc::new(JsonlHistoryStore::new(directory.clone()))
            }
            None => Arc::new(InMemoryHistoryStore::new()),
        };

        let registry = match &config.history.directory {
            Some(directory) => Registry::open(directory.join(REGISTRY_FILE)).await?,
            None => Registry::new(),
        };
        let registry = Arc::new(registry);
        agents::seed(&registry).await?;

        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            decider,
            executor,
            history.clone(),
            &config.dispatcher,
        ));

        Ok(Self::new(registry, dispatcher, history, settings))
    }

    pub async fn send_message(&self, agent_id: &str, text: &str) -> Result<Reply> {
        if text.trim().is_empty() {
            return Err(DispatchError::InvalidArguments("message cannot be empty".to_string()));
        }
        self.dispatcher.handle(agent_id, text).await
    }

    pub async fn run_agent_task(&self, agent_id: &str, task: TaskPayload) -> Result<Reply> {
        if task.instruction.trim().is_empty() {
            return Err(DispatchError::InvalidArguments("instruction cannot be empty".to_string()));
        }
        self.dispatcher.handle(agent_id, &task.render()).await
    }

    pub async fn list_agents(&self) -> Vec<AgentSummary> {
        self.registry.list_agents().await
    }

    pub async fn create_agent(&self, request: NewAgent) -> Result<Agent> {
        self.registry.create_agent(request).await
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<Agent> {
        self.registry.get_agent(agent_id).await
    }

    pub async fn list_tools(&self) -> Vec<ToolSummary> {
        self.registry.list_tools().await.iter().map(|t| t.summary()).collect()
    }

    pub async fn get_history(&self, agent_id: &str) -> Result<Vec<Turn>> {
        let agent = self.registry.get_agent(agent_id).await?;
        self.history.read(&agent.id).await
    }

    pub async fn view_settings(&self) -> ModelSettings {
        self.settings.current().await
    }

    /// Changes model settings for every turn dispatched afterwards.
    pub async fn update_settings(&self, update: SettingsUpdate) -> Result<ModelSettings> {
        self.settings.update(update).await
    }
}
