use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ConclaveError, Result};
use crate::message::{ToolCall, ToolResult};
use crate::schema::ParameterSchema;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::default()
    }

    async fn call(&self, input: Value) -> Result<Value>;
}

/// Name, description and argument shape advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: ParameterSchema,
}

impl ToolDefinition {
    fn of(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters(),
        }
    }
}

struct RegisteredTool {
    definition: ToolDefinition,
    handler: Arc<dyn Tool>,
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<RegisteredTool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_shared(Arc::new(tool))
    }

    pub fn register_shared(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let definition = ToolDefinition::of(tool.as_ref());
        if self.tools.contains_key(&definition.name) {
            return Err(ConclaveError::DuplicateToolName(definition.name));
        }
        debug!(tool = %definition.name, "registered tool");
        self.tools.insert(
            definition.name.clone(),
            Arc::new(RegisteredTool {
                definition,
                handler: tool,
            }),
        );
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions ordered by tool name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|registered| registered.definition.clone())
            .collect()
    }

    pub fn definition(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name).map(|registered| &registered.definition)
    }

    /// Validate `input` and invoke the named tool, surfacing every failure as an error.
    pub async fn call(&self, name: &str, input: Value) -> Result<Value> {
        let registered = self
            .tools
            .get(name)
            .ok_or_else(|| ConclaveError::UnknownTool(name.to_string()))?;
        registered
            .definition
            .parameters
            .validate(&input)
            .map_err(|reason| ConclaveError::InvalidArguments {
                tool: name.to_string(),
                reason,
            })?;
        match registered.handler.call(input).await {
            Ok(value) => Ok(value),
            Err(err @ ConclaveError::ToolInvocation { .. }) => Err(err),
            Err(err) => Err(ConclaveError::ToolInvocation {
                name: name.to_string(),
                source: Box::new(err),
            }),
        }
    }

    /// Execute a model-requested call. Failures become a [`ToolResult`] the
    /// model can react to instead of aborting the agent loop.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        match self.call(&call.name, call.arguments.clone()).await {
            Ok(output) => ToolResult::success(call, output),
            Err(err) => {
                warn!(tool = %call.name, error = %err, "tool call failed");
                ToolResult::failure(call, err.to_string())
            }
        }
    }
}

type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A tool backed by an async closure.
#[derive(Clone)]
pub struct FunctionTool {
    name: String,
    description: String,
    parameters: ParameterSchema,
    handler: Handler,
}

impl FunctionTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ParameterSchema,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(move |input| -> BoxFuture<'static, Result<Value>> {
                Box::pin(handler(input))
            }),
        }
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> ParameterSchema {
        self.parameters.clone()
    }

    async fn call(&self, input: Value) -> Result<Value> {
        (self.handler)(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolOutcome;
    use crate::schema::ParameterKind;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes the `text` field back"
        }

        fn parameters(&self) -> ParameterSchema {
            ParameterSchema::new().required("text", ParameterKind::String, "text to echo")
        }

        async fn call(&self, input: Value) -> Result<Value> {
            Ok(input["text"].clone())
        }
    }

    fn failing_tool() -> FunctionTool {
        FunctionTool::new("explode", "Always fails", ParameterSchema::new(), |_| async {
            Err(ConclaveError::tool("explode", "boom"))
        })
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        let err = registry.register(EchoTool).unwrap_err();
        assert!(matches!(err, ConclaveError::DuplicateToolName(name) if name == "echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn definitions_are_name_ordered() {
        let mut registry = ToolRegistry::new();
        registry.register(failing_tool()).unwrap();
        registry.register(EchoTool).unwrap();
        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["echo", "explode"]);
        assert_eq!(
            registry.definition("echo").unwrap().parameters.parameters[0].name,
            "text"
        );
    }

    #[tokio::test]
    async fn call_reports_unknown_and_invalid() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();

        let unknown = registry.call("missing", json!({})).await.unwrap_err();
        assert!(matches!(unknown, ConclaveError::UnknownTool(_)));

        let invalid = registry.call("echo", json!({"text": 3})).await.unwrap_err();
        assert!(matches!(invalid, ConclaveError::InvalidArguments { .. }));

        let ok = registry.call("echo", json!({"text": "ping"})).await.unwrap();
        assert_eq!(ok, json!("ping"));
    }

    #[tokio::test]
    async fn execute_captures_failures_as_results() {
        let mut registry = ToolRegistry::new();
        registry.register(failing_tool()).unwrap();

        let call = ToolCall::new("explode", json!({}));
        let result = registry.execute(&call).await;
        assert_eq!(result.call_id, call.id);
        match result.outcome {
            ToolOutcome::Failure(message) => {
                assert_eq!(message, "tool `explode` invocation failed: boom")
            }
            other => panic!("expected failure, got {other:?}"),
        }

        let unknown = registry.execute(&ToolCall::new("nope", json!({}))).await;
        assert!(unknown.is_error());
    }
}
