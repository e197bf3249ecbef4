use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::ModelConfig;
use crate::error::{DispatchError, Result, ToolError, ToolResult};
use crate::history::Role;
use crate::llm::types::{
    function_type, ApiError, ChatMessage, ChatRequest, ChatResponse, FunctionCall, FunctionSpec, ToolSpec,
    WireToolCall,
};
use crate::llm::settings::{ModelSettings, SettingsHandle};
use crate::llm::{Decision, DecisionProcedure, DecisionRequest, ToolCall, Translator};

/// Chat completions client with a bound on concurrent requests.
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    settings: Arc<SettingsHandle>,
    rate_limiter: Semaphore,
}

impl OpenAiClient {
    pub fn new(config: &ModelConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DispatchError::Config(format!("Failed to build model client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            settings: Arc::new(SettingsHandle::new(ModelSettings::from(config))),
            rate_limiter: Semaphore::new(config.max_concurrent_requests.max(1)),
        })
    }

    /// Reads the API key from the environment variable named in the config.
    pub fn from_env(config: &ModelConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            DispatchError::Config(format!("Environment variable {} is not set", config.api_key_env))
        })?;
        Self::new(config, api_key)
    }

    /// Settings read on every request; updates apply to the next call.
    pub fn settings(&self) -> Arc<SettingsHandle> {
        self.settings.clone()
    }

    pub async fn request(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolSpec>,
        tool_choice: Option<&str>,
    ) -> ChatRequest {
        let settings = self.settings.current().await;
        ChatRequest {
            model: settings.model,
            messages,
            tool_choice: if tools.is_empty() { None } else { tool_choice.map(str::to_string) },
            tools,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        }
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatMessage> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| DispatchError::DecisionProcedure(format!("Rate limiter error: {}", e)))?;

        let url = format!("{}/chat/completions", self.base_url);
        debug!("Calling {} with {} messages", url, request.messages.len());

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| DispatchError::DecisionProcedure(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            let message = serde_json::from_str::<ApiError>(&error_text)
                .map(|api_error| api_error.error.message)
                .unwrap_or(error_text);

            warn!("Model API returned {}: {}", status, message);
            return Err(DispatchError::DecisionProcedure(match status {
                StatusCode::TOO_MANY_REQUESTS => format!("rate limited: {}", message),
                _ => format!("status {}: {}", status.as_u16(), message),
            }));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::DecisionProcedure(format!("Failed to parse response: {}", e)))?;

        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| DispatchError::DecisionProcedure("response contained no choices".to_string()))
    }
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Function-calling decision procedure over [`OpenAiClient`].
pub struct OpenAiDecisionProcedure {
    client: Arc<OpenAiClient>,
}

impl OpenAiDecisionProcedure {
    pub fn new(client: Arc<OpenAiClient>) -> Self {
        Self { client }
    }

    fn messages(request: &DecisionRequest) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::new("system", request.instructions.clone())];

        for message in &request.history {
            match message.role {
                Role::Caller => messages.push(ChatMessage::new("user", message.content.clone())),
                Role::Agent => messages.push(ChatMessage::new("assistant", message.content.clone())),
                Role::Tool => {}
            }
        }
        messages.push(ChatMessage::new("user", request.message.clone()));

        if let Some(round) = &request.tool_round {
            messages.push(ChatMessage {
                role: "assistant".to_string(),
                content: round.preamble.clone(),
                tool_calls: round
                    .calls
                    .iter()
                    .map(|call| WireToolCall {
                        id: call.id.clone(),
                        kind: function_type(),
                        function: FunctionCall {
                            name: call.tool_id.clone(),
                            arguments: encode_arguments(&call.arguments),
                        },
                    })
                    .collect(),
                tool_call_id: None,
            });
            for result in &round.results {
                messages.push(ChatMessage::tool_result(result.call_id.clone(), result.content.clone()));
            }
        }

        messages
    }

    fn tools(request: &DecisionRequest) -> Vec<ToolSpec> {
        request
            .catalog
            .iter()
            .map(|entry| ToolSpec {
                kind: function_type(),
                function: FunctionSpec {
                    name: entry.id.clone(),
                    description: entry.description.clone(),
                    parameters: entry.input_schema.clone(),
                },
            })
            .collect()
    }
}

fn encode_arguments(arguments: &Value) -> String {
    match arguments {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

fn decode_arguments(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

#[async_trait]
impl DecisionProcedure for OpenAiDecisionProcedure {
    async fn decide(&self, request: DecisionRequest) -> Result<Decision> {
        // after a tool round the model must answer in text
        let tool_choice = if request.tool_round.is_some() { "none" } else { "auto" };
        let chat = self
            .client
            .request(Self::messages(&request), Self::tools(&request), Some(tool_choice))
            .await;

        let reply = self.client.chat(&chat).await?;

        Ok(Decision {
            text: reply.content.filter(|text| !text.trim().is_empty()),
            tool_calls: reply
                .tool_calls
                .into_iter()
                .map(|call| ToolCall {
                    id: call.id,
                    tool_id: call.function.name,
                    arguments: decode_arguments(call.function.arguments),
                })
                .collect(),
        })
    }
}

/// Translation tool backed by the same chat model.
pub struct LlmTranslator {
    client: Arc<OpenAiClient>,
}

impl LlmTranslator {
    pub fn new(client: Arc<OpenAiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Translator for LlmTranslator {
    async fn translate(&self, text: &str, target_language: &str, source_language: Option<&str>) -> ToolResult<String> {
        let source = source_language
            .map(|lang| format!(" from {}", lang))
            .unwrap_or_default();
        let system = format!(
            "You are a translation engine. Translate the user's text{} into {}. Reply with the translation only.",
            source, target_language
        );

        let chat = self
            .client
            .request(vec![ChatMessage::new("system", system), ChatMessage::new("user", text)], Vec::new(), None)
            .await;

        let reply = self
            .client
            .chat(&chat)
            .await
            .map_err(|e| ToolError::Translation(e.to_string()))?;

        reply
            .content
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ToolError::Translation("model returned an empty translation".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Message;
    use crate::llm::{ToolCallResult, ToolRound};
    use crate::tools::{ToolDefinition, ToolKind};
    use axum::extract::State;
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::Mutex;

    type Captured = Arc<Mutex<Vec<Value>>>;

    async fn spawn_model(reply: Value, status: HttpStatus) -> (String, Captured) {
        let captured: Captured = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/v1/chat/completions",
                post(move |State(seen): State<Captured>, Json(body): Json<Value>| {
                    let reply = reply.clone();
                    async move {
                        seen.lock().unwrap().push(body);
                        (status, Json(reply))
                    }
                }),
            )
            .with_state(captured.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/v1", addr), captured)
    }

    fn client(base_url: String) -> Arc<OpenAiClient> {
        let config = ModelConfig {
            base_url,
            ..ModelConfig::default()
        };
        Arc::new(OpenAiClient::new(&config, "sk-test").unwrap())
    }

    fn request() -> DecisionRequest {
        let tool = ToolDefinition::builtin("translate", "Translate", "Translate text", ToolKind::Translate);
        DecisionRequest {
            instructions: "Be helpful".to_string(),
            history: vec![Message::caller("hi"), Message::tool("ignored"), Message::agent("hello")],
            catalog: vec![tool.catalog_entry()],
            message: "translate 'hello' to French".to_string(),
            tool_round: None,
        }
    }

    #[tokio::test]
    async fn test_decide_parses_tool_calls() {
        let reply = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [
                        { "id": "call_1", "type": "function",
                          "function": { "name": "translate", "arguments": "{\"text\":\"hello\",\"target_language\":\"French\"}" } },
                        { "id": "call_2", "type": "function",
                          "function": { "name": "translate", "arguments": "not json" } }
                    ]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let (base_url, captured) = spawn_model(reply, HttpStatus::OK).await;
        let procedure = OpenAiDecisionProcedure::new(client(base_url));

        let decision = procedure.decide(request()).await.unwrap();

        assert_eq!(decision.text, None);
        assert_eq!(decision.tool_calls.len(), 2);
        assert_eq!(decision.tool_calls[0].tool_id, "translate");
        assert_eq!(decision.tool_calls[0].arguments["target_language"], "French");
        assert_eq!(decision.tool_calls[1].arguments, Value::String("not json".to_string()));

        let body = captured.lock().unwrap()[0].clone();
        assert_eq!(body["model"], "gpt-4.1");
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["tools"][0]["function"]["name"], "translate");
        assert_eq!(body["tools"][0]["function"]["parameters"]["required"], json!(["text", "target_language"]));
        let roles: Vec<&str> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
    }

    #[tokio::test]
    async fn test_decide_with_tool_round_sends_results() {
        let reply = json!({ "choices": [{ "message": { "role": "assistant", "content": "bonjour" } }] });
        let (base_url, captured) = spawn_model(reply, HttpStatus::OK).await;
        let procedure = OpenAiDecisionProcedure::new(client(base_url));

        let call = ToolCall {
            id: "call_1".to_string(),
            tool_id: "translate".to_string(),
            arguments: json!({ "text": "hello", "target_language": "French" }),
        };
        let mut req = request();
        req.tool_round = Some(ToolRound {
            preamble: None,
            calls: vec![call],
            results: vec![ToolCallResult {
                call_id: "call_1".to_string(),
                tool_id: "translate".to_string(),
                content: "bonjour".to_string(),
                is_error: false,
            }],
        });

        let decision = procedure.decide(req).await.unwrap();
        assert_eq!(decision.text.as_deref(), Some("bonjour"));
        assert!(decision.tool_calls.is_empty());

        let body = captured.lock().unwrap()[0].clone();
        assert_eq!(body["tool_choice"], "none");
        let messages = body["messages"].as_array().unwrap();
        let last = &messages[messages.len() - 1];
        assert_eq!(last["role"], "tool");
        assert_eq!(last["tool_call_id"], "call_1");
        let assistant = &messages[messages.len() - 2];
        assert_eq!(assistant["tool_calls"][0]["function"]["name"], "translate");
    }

    #[tokio::test]
    async fn test_settings_update_applies_to_next_request() {
        let reply = json!({ "choices": [{ "message": { "role": "assistant", "content": "ok" } }] });
        let (base_url, captured) = spawn_model(reply, HttpStatus::OK).await;
        let client = client(base_url);
        let procedure = OpenAiDecisionProcedure::new(client.clone());

        client
            .settings()
            .update(crate::llm::SettingsUpdate {
                model: Some("gpt-4o-mini".to_string()),
                max_tokens: Some(512),
                ..Default::default()
            })
            .await
            .unwrap();
        procedure.decide(request()).await.unwrap();

        let body = captured.lock().unwrap()[0].clone();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["temperature"], 0.0);
    }

    #[tokio::test]
    async fn test_error_status_is_decision_error() {
        let reply = json!({ "error": { "message": "model overloaded" } });
        let (base_url, _) = spawn_model(reply, HttpStatus::SERVICE_UNAVAILABLE).await;
        let procedure = OpenAiDecisionProcedure::new(client(base_url));

        let err = procedure.decide(request()).await.unwrap_err();
        assert_eq!(err.kind(), "decision_procedure");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("model overloaded"));
    }

    #[tokio::test]
    async fn test_empty_choices_is_decision_error() {
        let (base_url, _) = spawn_model(json!({ "choices": [] }), HttpStatus::OK).await;
        let procedure = OpenAiDecisionProcedure::new(client(base_url));

        let err = procedure.decide(request()).await.unwrap_err();
        assert!(matches!(err, DispatchError::DecisionProcedure(_)));
    }

    #[tokio::test]
    async fn test_translator() {
        let reply = json!({ "choices": [{ "message": { "role": "assistant", "content": " bonjour \n" } }] });
        let (base_url, captured) = spawn_model(reply, HttpStatus::OK).await;
        let translator = LlmTranslator::new(client(base_url));

        let text = translator.translate("hello", "French", Some("English")).await.unwrap();
        assert_eq!(text, "bonjour");

        let body = captured.lock().unwrap()[0].clone();
        assert!(body.get("tools").is_none());
        assert!(body["messages"][0]["content"].as_str().unwrap().contains("from English into French"));
    }

    #[test]
    fn test_debug_redacts_key() {
        let client = OpenAiClient::new(&ModelConfig::default(), "sk-secret").unwrap();
        let rendered = format!("{:?}", client);
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("REDACTED"));
    }
}
