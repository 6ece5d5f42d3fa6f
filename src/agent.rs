use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace, warn, Instrument};
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::delegation::{self, AgentTool};
use crate::error::{ConclaveError, Result};
use crate::hooks::AgentHook;
use crate::knowledge::Retriever;
use crate::llm::{CompletionRequest, CompletionResponse, LanguageModel};
use crate::memory::ConversationMemory;
use crate::message::Message;
use crate::telemetry::PAYLOAD_TARGET;
use crate::tool::{Tool, ToolRegistry};

/// A completion model bound to an optional tool registry and memory.
///
/// `prompt` runs the agentic loop: the model is called, any requested tools
/// are executed in order and their results fed back, until the model answers
/// with text or the iteration bound is hit.
pub struct Agent {
    id: Uuid,
    name: String,
    description: String,
    preamble: String,
    model: Arc<dyn LanguageModel>,
    tools: Arc<ToolRegistry>,
    memory: Option<ConversationMemory>,
    retriever: Option<(Arc<dyn Retriever>, usize)>,
    hooks: Vec<Arc<dyn AgentHook>>,
    max_iterations: usize,
    max_delegation_depth: usize,
    completion_timeout: Option<Duration>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("model", &self.model.name())
            .field("tools", &self.tools.names())
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}

impl Agent {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self::from_config(&AgentConfig::default(), model)
    }

    pub fn from_config(config: &AgentConfig, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: config.name.clone(),
            description: config.description.clone(),
            preamble: config.preamble.clone(),
            model,
            tools: Arc::new(ToolRegistry::new()),
            memory: None,
            retriever: None,
            hooks: Vec::new(),
            max_iterations: config.max_iterations,
            max_delegation_depth: config.max_delegation_depth,
            completion_timeout: config.completion_timeout(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = preamble.into();
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    /// Share a registry with other agents. It must be fully populated first.
    pub fn with_shared_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool<T: Tool + 'static>(mut self, tool: T) -> Result<Self> {
        self.register_tool(tool)?;
        Ok(self)
    }

    /// Expose `worker` to this agent as a tool named after the worker.
    pub fn with_worker(self, worker: Agent) -> Result<Self> {
        let depth = self.max_delegation_depth;
        self.with_tool(AgentTool::new(worker).with_max_depth(depth))
    }

    pub fn register_tool<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        Arc::make_mut(&mut self.tools).register(tool)
    }

    pub fn with_memory(mut self, memory: ConversationMemory) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>, top_k: usize) -> Self {
        self.retriever = Some((retriever, top_k.max(1)));
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn AgentHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Maximum number of tool-calling rounds per prompt.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_delegation_depth(mut self, depth: usize) -> Self {
        self.max_delegation_depth = depth;
        self
    }

    pub fn with_completion_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout = Some(timeout);
        self
    }

    /// Identity assigned at construction. Unlike the name it is never shared.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn memory(&self) -> Option<&ConversationMemory> {
        self.memory.as_ref()
    }

    pub fn max_delegation_depth(&self) -> usize {
        self.max_delegation_depth
    }

    /// Run one exchange. Yields exactly one final reply or one error.
    pub async fn prompt(&mut self, input: impl Into<String>) -> Result<String> {
        let input = input.into();
        let span = tracing::info_span!("agent.prompt", agent = %self.name);
        delegation::within(self.id, self.run(input)).instrument(span).await
    }

    async fn run(&mut self, input: String) -> Result<String> {
        info!(chars = input.len(), "prompt started");
        let preamble = self.build_preamble(&input).await;
        let user = Message::user(input);

        let mut working: Vec<Message> = self
            .memory
            .as_ref()
            .map(|memory| memory.messages().to_vec())
            .unwrap_or_default();
        working.push(user.clone());
        let definitions = self.tools.definitions();

        for round in 0..=self.max_iterations {
            let request = CompletionRequest {
                preamble: Some(preamble.clone()),
                messages: working.clone(),
                tools: definitions.clone(),
            };
            for hook in &self.hooks {
                hook.before_completion(&self.name, &request).await?;
            }
            let response = self.complete(request).await?;
            for hook in &self.hooks {
                hook.after_completion(&self.name, &response).await?;
            }

            let calls = response.requested_calls();
            if calls.is_empty() {
                let reply = response.joined_text();
                if reply.is_empty() {
                    return Err(ConclaveError::MalformedResponse(
                        "response contained neither text nor tool calls".into(),
                    ));
                }
                self.remember(user, Message::assistant(reply.clone())).await;
                info!(rounds = round, "prompt finished");
                return Ok(reply);
            }

            if round == self.max_iterations {
                warn!(limit = self.max_iterations, "tool-calling bound reached");
                break;
            }

            working.push(response.into_message());
            let mut results = Vec::with_capacity(calls.len());
            for call in &calls {
                for hook in &self.hooks {
                    hook.before_tool_call(&self.name, call).await?;
                }
                debug!(tool = %call.name, "executing tool call");
                let result = self.tools.execute(call).await;
                for hook in &self.hooks {
                    hook.after_tool_result(&self.name, &result).await?;
                }
                results.push(result);
            }
            working.push(Message::tool_results(results));
        }

        Err(ConclaveError::MaxIterations {
            agent: self.name.clone(),
            limit: self.max_iterations,
        })
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        trace!(
            target: PAYLOAD_TARGET,
            agent = %self.name,
            request = %serde_json::to_string(&request).unwrap_or_default(),
            "completion request"
        );
        let pending = self.model.complete(request);
        let response = match self.completion_timeout {
            Some(limit) => tokio::time::timeout(limit, pending).await.map_err(|_| {
                ConclaveError::Provider(format!(
                    "completion from `{}` timed out after {limit:?}",
                    self.model.name()
                ))
            })??,
            None => pending.await?,
        };
        trace!(
            target: PAYLOAD_TARGET,
            agent = %self.name,
            response = %serde_json::to_string(&response).unwrap_or_default(),
            "completion response"
        );
        Ok(response)
    }

    async fn build_preamble(&self, input: &str) -> String {
        let mut preamble = match &self.memory {
            Some(memory) => memory.build_context(&self.preamble),
            None => self.preamble.clone(),
        };

        if let Some((retriever, top_k)) = &self.retriever {
            match retriever.retrieve(input, *top_k).await {
                Ok(snippets) if !snippets.is_empty() => {
                    preamble.push_str("\n\nRelevant context:\n");
                    for snippet in snippets {
                        preamble.push_str("- ");
                        preamble.push_str(&snippet);
                        preamble.push('\n');
                    }
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "retrieval failed; continuing without context"),
            }
        }

        preamble
    }

    async fn remember(&mut self, user: Message, reply: Message) {
        let Some(memory) = self.memory.as_mut() else {
            return;
        };
        memory.push(user);
        memory.push(reply);
        if memory.needs_compaction() {
            // failures keep the history intact and are retried after the next exchange
            if let Err(err) = memory.compact(self.model.as_ref()).await {
                warn!(error = %err, "memory compaction deferred");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use crate::knowledge::{Document, KnowledgeBase};
    use crate::embedding::HashingEmbedder;
    use crate::llm::StubModel;
    use crate::message::{ContentPart, ToolCall, ToolOutcome, ToolResult};
    use crate::schema::ParameterSchema;
    use crate::tool::FunctionTool;
    use crate::toolkit::calculator_toolkit;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes the input back"
        }

        fn parameters(&self) -> ParameterSchema {
            ParameterSchema::new().allow_additional()
        }

        async fn call(&self, input: Value) -> Result<Value> {
            Ok(input)
        }
    }

    #[tokio::test]
    async fn returns_llm_response_without_tools() {
        let model = StubModel::new(vec![r#"{"action":"respond","content":"Hello!"}"#.into()]);
        let mut agent = Agent::new(model.clone()).with_memory(ConversationMemory::default());

        let reply = agent.prompt("hi").await.unwrap();

        assert_eq!(reply, "Hello!");
        assert_eq!(agent.memory().unwrap().len(), 2);
        let request = &model.requests()[0];
        assert_eq!(request.preamble.as_deref(), Some("You are a helpful assistant."));
        assert!(request.tools.is_empty());
    }

    #[tokio::test]
    async fn executes_tool_then_replies() {
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"add","arguments":{"x":4,"y":5}}"#.into(),
            r#"{"action":"respond","content":"4 plus 5 is 9."}"#.into(),
        ]);
        let mut agent = Agent::new(model.clone()).with_tools(calculator_toolkit());

        let reply = agent.prompt("what is 4 plus 5").await.unwrap();
        assert_eq!(reply, "4 plus 5 is 9.");

        let requests = model.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tools.len(), 4);
        let follow_up = &requests[1].messages;
        assert_eq!(follow_up.len(), 3);
        let call = follow_up[1].tool_calls().next().unwrap();
        assert_eq!(call.arguments, json!({"x": 4, "y": 5}));
        let result = follow_up[2].tool_results_iter().next().unwrap();
        assert_eq!(result.outcome, ToolOutcome::Success(json!(9)));
        assert_eq!(result.call_id, call.id);
    }

    #[tokio::test]
    async fn executes_multiple_calls_in_response_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let recorder = |label: &'static str, order: Arc<Mutex<Vec<&'static str>>>| {
            FunctionTool::new(label, "records", ParameterSchema::new(), move |_| {
                let order = order.clone();
                async move {
                    order.lock().unwrap().push(label);
                    Ok(json!(label))
                }
            })
        };
        let model = StubModel::new(vec![
            r#"{"action":"call_tools","calls":[{"name":"second"},{"name":"first"}]}"#.into(),
            r#"{"action":"respond","content":"ok"}"#.into(),
        ]);
        let mut agent = Agent::new(model)
            .with_tool(recorder("first", order.clone()))
            .unwrap()
            .with_tool(recorder("second", order.clone()))
            .unwrap();

        agent.prompt("go").await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["second", "first"]);
    }

    #[tokio::test]
    async fn tool_failures_are_reported_to_the_model() {
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"div","arguments":{"x":1,"y":0}}"#.into(),
            r#"{"action":"call_tool","name":"missing","arguments":{}}"#.into(),
            r#"{"action":"respond","content":"Cannot divide by zero."}"#.into(),
        ]);
        let mut agent = Agent::new(model.clone()).with_tools(calculator_toolkit());

        let reply = agent.prompt("divide 1 by 0").await.unwrap();
        assert_eq!(reply, "Cannot divide by zero.");

        let requests = model.requests();
        let first: Vec<&ToolResult> = requests[1].messages[2].tool_results_iter().collect();
        assert!(first[0].is_error());
        let second: Vec<&ToolResult> = requests[2].messages[4].tool_results_iter().collect();
        assert!(matches!(&second[0].outcome, ToolOutcome::Failure(m) if m.contains("not found")));
    }

    #[tokio::test]
    async fn stops_after_max_iterations() {
        let call = r#"{"action":"call_tool","name":"echo","arguments":{"n":1}}"#;
        let model = StubModel::new(vec![call.into(); 5]);
        let mut agent = Agent::new(model.clone())
            .with_name("looper")
            .with_max_iterations(2)
            .with_tool(EchoTool)
            .unwrap()
            .with_memory(ConversationMemory::default());

        let err = agent.prompt("loop forever").await.unwrap_err();
        assert!(matches!(
            err,
            ConclaveError::MaxIterations { ref agent, limit: 2 } if agent == "looper"
        ));
        assert_eq!(model.requests().len(), 3);
        assert!(agent.memory().unwrap().is_empty());
    }

    #[tokio::test]
    async fn chain_within_bound_terminates_with_text() {
        let call = r#"{"action":"call_tool","name":"echo","arguments":{}}"#;
        let model = StubModel::new(vec![
            call.into(),
            call.into(),
            r#"{"action":"respond","content":"done"}"#.into(),
        ]);
        let mut agent = Agent::new(model)
            .with_max_iterations(2)
            .with_tool(EchoTool)
            .unwrap();

        assert_eq!(agent.prompt("twice").await.unwrap(), "done");
    }

    #[tokio::test]
    async fn provider_errors_propagate() {
        let model = StubModel::new(vec![r#"{"action":"fail","message":"unauthorized"}"#.into()]);
        let mut agent = Agent::new(model).with_memory(ConversationMemory::default());

        let err = agent.prompt("hello").await.unwrap_err();
        assert!(matches!(err, ConclaveError::Provider(_)));
        assert!(agent.memory().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_response_is_malformed() {
        let model = StubModel::new(vec![r#"{"action":"call_tools","calls":[]}"#.into()]);
        let mut agent = Agent::new(model);
        let err = agent.prompt("hello").await.unwrap_err();
        assert!(matches!(err, ConclaveError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn compacts_memory_after_exchange() {
        let model = StubModel::new(vec![
            "first answer".into(),
            "second answer".into(),
            "user asked two questions".into(),
            "third answer".into(),
        ]);
        let mut agent = Agent::new(model.clone())
            .with_preamble("Be concise.")
            .with_memory(ConversationMemory::with_max_messages(2));

        agent.prompt("one").await.unwrap();
        assert_eq!(agent.memory().unwrap().len(), 2);

        agent.prompt("two").await.unwrap();
        let memory = agent.memory().unwrap();
        assert!(memory.is_empty());
        assert_eq!(memory.summary(), Some("user asked two questions"));

        agent.prompt("three").await.unwrap();
        let last = model.requests().pop().unwrap();
        assert_eq!(
            last.preamble.as_deref(),
            Some("Be concise.\n\nPrevious conversation summary:\nuser asked two questions")
        );
        assert_eq!(last.messages, vec![Message::user("three")]);
    }

    #[tokio::test]
    async fn history_is_sent_with_new_prompt() {
        let model = StubModel::new(vec!["a1".into(), "a2".into()]);
        let mut agent = Agent::new(model.clone()).with_memory(ConversationMemory::default());
        agent.prompt("q1").await.unwrap();
        agent.prompt("q2").await.unwrap();

        let second = &model.requests()[1];
        assert_eq!(
            second.messages,
            vec![
                Message::user("q1"),
                Message::assistant("a1"),
                Message::user("q2"),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn completion_timeout_surfaces_as_provider_error() {
        struct SlowModel;

        #[async_trait]
        impl LanguageModel for SlowModel {
            fn name(&self) -> &str {
                "slow"
            }

            async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(CompletionResponse::text("late"))
            }
        }

        let mut agent =
            Agent::new(Arc::new(SlowModel)).with_completion_timeout(Duration::from_secs(5));
        let err = agent.prompt("hello").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn retrieved_context_is_added_to_preamble() {
        let kb = KnowledgeBase::new(Arc::new(HashingEmbedder::new(128)));
        kb.add_document(Document::new("rig", "Rig is a Rust library for LLM apps."))
            .await
            .unwrap();
        let model = StubModel::new(vec!["It is a library.".into()]);
        let mut agent = Agent::new(model.clone()).with_retriever(Arc::new(kb), 1);

        agent.prompt("What is Rig?").await.unwrap();
        let preamble = model.requests()[0].preamble.clone().unwrap();
        assert!(preamble.contains("Relevant context:\n- Rig is a Rust library"));
    }

    #[tokio::test]
    async fn hooks_observe_the_loop() {
        #[derive(Default)]
        struct Recorder(Mutex<Vec<String>>);

        #[async_trait]
        impl AgentHook for Recorder {
            async fn before_completion(&self, agent: &str, _r: &CompletionRequest) -> Result<()> {
                self.0.lock().unwrap().push(format!("{agent}:completion"));
                Ok(())
            }

            async fn before_tool_call(&self, _agent: &str, call: &ToolCall) -> Result<()> {
                self.0.lock().unwrap().push(format!("tool:{}", call.name));
                Ok(())
            }

            async fn after_tool_result(&self, _agent: &str, result: &ToolResult) -> Result<()> {
                self.0.lock().unwrap().push(format!("result:{}", result.is_error()));
                Ok(())
            }
        }

        let recorder = Arc::new(Recorder::default());
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"echo","arguments":{"a":1}}"#.into(),
            "done".into(),
        ]);
        let mut agent = Agent::new(model)
            .with_name("watched")
            .with_tool(EchoTool)
            .unwrap()
            .with_hook(recorder.clone());

        agent.prompt("go").await.unwrap();
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![
                "watched:completion",
                "tool:echo",
                "result:false",
                "watched:completion"
            ]
        );
    }

    #[test]
    fn assistant_tool_message_keeps_parts() {
        let response = CompletionResponse {
            content: vec![
                ContentPart::text("let me check"),
                ContentPart::ToolCall(ToolCall::new("echo", json!({}))),
            ],
        };
        let message = response.into_message();
        assert_eq!(message.text(), "let me check");
        assert_eq!(message.tool_calls().count(), 1);
    }
}
