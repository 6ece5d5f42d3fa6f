//! Completion gateway: the single seam between agents and model providers.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ModelConfig;
use crate::error::{ConclaveError, Result};
use crate::message::{ContentPart, Message, ToolCall};
use crate::tool::ToolDefinition;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub preamble: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            preamble: None,
            messages,
            tools: Vec::new(),
        }
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// Ordered text and tool-call parts produced by one completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: Vec<ContentPart>,
}

impl CompletionResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentPart::text(text)],
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            content: calls.into_iter().map(ContentPart::ToolCall).collect(),
        }
    }

    pub fn requested_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolCall(call) => Some(call.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn into_message(self) -> Message {
        Message::assistant_parts(self.content)
    }
}

/// Minimal abstraction around a chat completion provider.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier, used in logs.
    fn name(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;
}

pub type ProviderFactory =
    Arc<dyn Fn(&ModelConfig) -> Result<Arc<dyn LanguageModel>> + Send + Sync>;

/// String-keyed provider factories, so the provider can be picked at runtime
/// from configuration.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, ProviderFactory>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, provider: impl Into<String>, factory: F)
    where
        F: Fn(&ModelConfig) -> Result<Arc<dyn LanguageModel>> + Send + Sync + 'static,
    {
        self.factories.insert(provider.into(), Arc::new(factory));
    }

    pub fn with_provider<F>(mut self, provider: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ModelConfig) -> Result<Arc<dyn LanguageModel>> + Send + Sync + 'static,
    {
        self.register(provider, factory);
        self
    }

    pub fn providers(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn build(&self, config: &ModelConfig) -> Result<Arc<dyn LanguageModel>> {
        let factory = self
            .factories
            .get(&config.provider)
            .ok_or_else(|| ConclaveError::UnknownProvider(config.provider.clone()))?;
        factory(config)
    }
}

/// A deterministic model used for tests and demos.
///
/// Each scripted entry is either a JSON directive or plain text:
/// - `{"action":"respond","content":"..."}`
/// - `{"action":"call_tool","name":"...","arguments":{...}}`
/// - `{"action":"call_tools","calls":[{"name":"...","arguments":{...}}]}`
/// - `{"action":"fail","message":"..."}` yields a provider error
/// - `{"action":"malformed","detail":"..."}` yields a malformed-response error
pub struct StubModel {
    name: String,
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<CompletionRequest>>,
    issued_calls: Mutex<usize>,
}

impl StubModel {
    pub fn new(responses: Vec<String>) -> Arc<Self> {
        Self::named("stub-model", responses)
    }

    pub fn named(name: impl Into<String>, responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            issued_calls: Mutex::new(0),
        })
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().expect("stub model poisoned").clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().expect("stub model poisoned").len()
    }

    fn next_call_id(&self) -> String {
        let mut issued = self.issued_calls.lock().expect("stub model poisoned");
        *issued += 1;
        format!("call_{}", *issued)
    }
}

#[derive(Debug, Deserialize)]
struct StubCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum StubDirective {
    Respond { content: String },
    CallTool { name: String, arguments: Value },
    CallTools { calls: Vec<StubCall> },
    Fail { message: String },
    Malformed { detail: String },
}

#[async_trait]
impl LanguageModel for StubModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.requests
            .lock()
            .expect("stub model poisoned")
            .push(request);
        let raw = self
            .responses
            .lock()
            .expect("stub model poisoned")
            .pop_front()
            .ok_or_else(|| {
                ConclaveError::Provider("StubModel ran out of scripted responses".into())
            })?;

        match serde_json::from_str::<StubDirective>(&raw) {
            Ok(StubDirective::Respond { content }) => Ok(CompletionResponse::text(content)),
            Ok(StubDirective::CallTool { name, arguments }) => {
                Ok(CompletionResponse::tool_calls(vec![
                    ToolCall::new(name, arguments).with_id(self.next_call_id())
                ]))
            }
            Ok(StubDirective::CallTools { calls }) => Ok(CompletionResponse::tool_calls(
                calls
                    .into_iter()
                    .map(|call| ToolCall::new(call.name, call.arguments).with_id(self.next_call_id()))
                    .collect(),
            )),
            Ok(StubDirective::Fail { message }) => Err(ConclaveError::Provider(message)),
            Ok(StubDirective::Malformed { detail }) => {
                Err(ConclaveError::MalformedResponse(detail))
            }
            Err(_) => Ok(CompletionResponse::text(raw)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn stub_replays_directives_in_order() {
        let model = StubModel::new(vec![
            r#"{"action":"call_tools","calls":[{"name":"add","arguments":{"x":1,"y":2}},{"name":"sub","arguments":{"x":3,"y":1}}]}"#.into(),
            r#"{"action":"respond","content":"done"}"#.into(),
            "plain text".into(),
        ]);

        let first = model.complete(CompletionRequest::default()).await.unwrap();
        let calls = first.requested_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "add");
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[1].arguments, json!({"x": 3, "y": 1}));

        let second = model.complete(CompletionRequest::default()).await.unwrap();
        assert_eq!(second.joined_text(), "done");

        let third = model.complete(CompletionRequest::default()).await.unwrap();
        assert_eq!(third.joined_text(), "plain text");

        let exhausted = model.complete(CompletionRequest::default()).await.unwrap_err();
        assert!(exhausted.is_retryable());
        assert_eq!(model.requests().len(), 4);
    }

    #[tokio::test]
    async fn stub_scripts_errors() {
        let model = StubModel::new(vec![
            r#"{"action":"fail","message":"rate limited"}"#.into(),
            r#"{"action":"malformed","detail":"missing choices"}"#.into(),
        ]);
        let provider = model.complete(CompletionRequest::default()).await.unwrap_err();
        assert!(matches!(provider, ConclaveError::Provider(m) if m == "rate limited"));
        let malformed = model.complete(CompletionRequest::default()).await.unwrap_err();
        assert!(matches!(malformed, ConclaveError::MalformedResponse(_)));
    }

    #[test]
    fn registry_builds_named_providers() {
        let registry = ProviderRegistry::new().with_provider("scripted", |cfg: &ModelConfig| {
            let model: Arc<dyn LanguageModel> = StubModel::named(cfg.model.clone(), Vec::new());
            Ok(model)
        });

        let config = ModelConfig {
            provider: "scripted".into(),
            model: "script-1".into(),
            ..ModelConfig::default()
        };
        let model = registry.build(&config).unwrap();
        assert_eq!(model.name(), "script-1");

        let unknown = ModelConfig {
            provider: "nope".into(),
            ..config
        };
        assert!(matches!(
            registry.build(&unknown),
            Err(ConclaveError::UnknownProvider(p)) if p == "nope"
        ));
    }
}
