use std::sync::Arc;

use async_trait::async_trait;
use conclave::{
    Agent, AgentConfig, AppConfig, ClassifierRouter, ConclaveError, ConversationMemory,
    Dispatcher, Embedder, FunctionTool, LanguageModel, Message, ModelConfig, ParameterKind,
    ParameterSchema, ProviderRegistry, RetryPolicy, RouteDefinition, Router, SemanticRouter,
    StubModel, ToolOutcome, ToolRegistry,
};
use serde_json::{json, Value};

fn binary_op(name: &str, op: fn(i64, i64) -> i64) -> FunctionTool {
    let schema = ParameterSchema::new()
        .required("x", ParameterKind::Integer, "left operand")
        .required("y", ParameterKind::Integer, "right operand");
    FunctionTool::new(name, format!("Apply `{name}` to x and y"), schema, move |args: Value| async move {
        let x = args["x"].as_i64().unwrap_or_default();
        let y = args["y"].as_i64().unwrap_or_default();
        Ok(json!(op(x, y)))
    })
}

#[tokio::test]
async fn add_tool_round_trip() {
    let mut tools = ToolRegistry::new();
    tools.register(binary_op("add", |x, y| x + y)).unwrap();
    tools.register(binary_op("sub", |x, y| x - y)).unwrap();

    let model = StubModel::new(vec![
        r#"{"action":"call_tool","name":"add","arguments":{"x":4,"y":5}}"#.into(),
        r#"{"action":"respond","content":"4 plus 5 is 9."}"#.into(),
    ]);
    let mut agent = Agent::new(model.clone()).with_tools(tools);

    let reply = agent.prompt("what is 4 plus 5").await.unwrap();
    assert!(reply.contains('9'));

    let requests = model.requests();
    assert_eq!(requests.len(), 2);
    let names: Vec<&str> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["add", "sub"]);

    let history = &requests[1].messages;
    let calls: Vec<_> = history.iter().flat_map(|m| m.tool_calls()).collect();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "add");
    assert_eq!(calls[0].arguments, json!({"x": 4, "y": 5}));

    let results: Vec<_> = history.iter().flat_map(|m| m.tool_results_iter()).collect();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].outcome, ToolOutcome::Success(json!(9)));
}

#[tokio::test]
async fn ten_messages_compact_to_summary() {
    let mut memory = ConversationMemory::with_max_messages(4);
    for i in 0..5 {
        memory.push(Message::user(format!("question {i}")));
        memory.push(Message::assistant(format!("answer {i}")));
    }
    assert_eq!(memory.len(), 10);

    let model = StubModel::new(vec!["Five questions were answered.".into()]);
    assert!(memory.compact(model.as_ref()).await.unwrap());
    assert_eq!(memory.len(), 0);
    assert!(!memory.summary().unwrap_or_default().is_empty());
}

#[tokio::test]
async fn compaction_is_all_or_nothing() {
    let scripts = [
        r#"{"action":"fail","message":"unavailable"}"#,
        r#"{"action":"malformed","detail":"no choices"}"#,
        "A tidy summary.",
    ];
    for script in scripts {
        let mut memory = ConversationMemory::with_max_messages(2).with_summary("earlier");
        for i in 0..3 {
            memory.push(Message::user(format!("q{i}")));
        }
        let before = memory.clone();

        let model = StubModel::new(vec![script.into()]);
        match memory.compact(model.as_ref()).await {
            Ok(true) => {
                assert!(memory.is_empty());
                assert_eq!(memory.summary(), Some("A tidy summary."));
            }
            Ok(false) => panic!("compaction was due"),
            Err(err) => {
                assert!(matches!(err, ConclaveError::Compaction(_)));
                assert_eq!(memory, before);
            }
        }
    }
}

#[tokio::test]
async fn classifier_rejects_unknown_label() {
    let model = StubModel::new(vec!["banana".into()]);
    let router = ClassifierRouter::new(model, ["rust", "maths"]);
    let err = router.route("What is a monad?").await.unwrap_err();
    assert!(matches!(err, ConclaveError::NoMatchingRoute(_)));
}

/// Places texts on two fixed axes: code-ness and math-ness.
struct AxisEmbedder;

#[async_trait]
impl Embedder for AxisEmbedder {
    fn model_id(&self) -> &str {
        "axes-2"
    }

    async fn embed(&self, text: &str) -> conclave::Result<Vec<f32>> {
        let text = text.to_lowercase();
        let count = |words: &[&str]| words.iter().filter(|w| text.contains(*w)).count() as f32;
        Ok(vec![
            count(&["code", "program", "compile", "function"]),
            count(&["math", "equation", "derivative", "integral", "sum"]),
        ])
    }
}

#[tokio::test]
async fn semantic_router_prefers_math_route() {
    let routes = vec![
        RouteDefinition::new("coding", "Writing and debugging program code")
            .with_example("Why does my function not compile?"),
        RouteDefinition::new("math", "Mathematics and equations")
            .with_example("Take the derivative of this equation"),
    ];
    let router = SemanticRouter::build(Arc::new(AxisEmbedder), routes.clone())
        .await
        .unwrap();
    assert_eq!(router.route("Solve the integral of x").await.unwrap(), "math");

    // same definitions and query always give the same answer
    for _ in 0..3 {
        let again = SemanticRouter::build(Arc::new(AxisEmbedder), routes.clone())
            .await
            .unwrap();
        assert_eq!(again.route("Solve the integral of x").await.unwrap(), "math");
    }
}

#[tokio::test]
async fn tool_chains_within_bound_finish_and_longer_ones_fail() {
    let step = r#"{"action":"call_tool","name":"add","arguments":{"x":1,"y":1}}"#;
    for (chain, limit) in [(0usize, 3usize), (2, 3), (3, 3), (4, 3)] {
        let mut script: Vec<String> = vec![step.to_string(); chain];
        script.push("finished".into());
        let mut tools = ToolRegistry::new();
        tools.register(binary_op("add", |x, y| x + y)).unwrap();
        let mut agent = Agent::new(StubModel::new(script))
            .with_tools(tools)
            .with_max_iterations(limit);

        let outcome = agent.prompt("count").await;
        if chain <= limit {
            assert_eq!(outcome.unwrap(), "finished");
        } else {
            assert!(matches!(outcome, Err(ConclaveError::MaxIterations { limit: 3, .. })));
        }
    }
}

#[tokio::test]
async fn agent_built_from_config_and_registry() {
    let config: AppConfig = toml::from_str(
        "[agent]\nname='triage'\npreamble='Route politely.'\n[model]\nprovider='scripted'\nmodel='script-1'\n[memory]\nmax_messages=4",
    )
    .unwrap();

    let registry = ProviderRegistry::new().with_provider("scripted", |cfg: &ModelConfig| {
        let model: Arc<dyn LanguageModel> =
            StubModel::named(cfg.model.clone(), vec!["Hello from config.".into()]);
        Ok(model)
    });
    let model = registry.build(&config.model).unwrap();
    assert_eq!(model.name(), "script-1");

    let mut agent = Agent::from_config(&config.agent, model)
        .with_memory(ConversationMemory::from_config(&config.memory));
    assert_eq!(agent.name(), "triage");
    assert_eq!(agent.prompt("hi").await.unwrap(), "Hello from config.");
    assert_eq!(agent.memory().unwrap().max_messages(), 4);
    assert_eq!(AgentConfig::default().max_iterations, 6);
}

#[tokio::test(start_paused = true)]
async fn retry_policy_recovers_transient_provider_errors() {
    let model = StubModel::new(vec![
        r#"{"action":"fail","message":"429 too many requests"}"#.into(),
        "recovered".into(),
    ]);
    let agent = tokio::sync::Mutex::new(Agent::new(model));
    let agent = &agent;

    let reply = RetryPolicy::default_external_call()
        .retry(move |_| async move { agent.lock().await.prompt("hello").await })
        .await
        .unwrap();
    assert_eq!(reply, "recovered");
}

#[tokio::test]
async fn dispatcher_routes_semantically_to_agents() {
    let routes = vec![
        RouteDefinition::new("coding", "Writing program code"),
        RouteDefinition::new("math", "Mathematics and equations"),
    ];
    let router = SemanticRouter::build(Arc::new(AxisEmbedder), routes).await.unwrap();
    let dispatcher = Dispatcher::new(Arc::new(router))
        .with_route("coding", Agent::new(StubModel::new(vec!["Use a loop.".into()])))
        .with_route("math", Agent::new(StubModel::new(vec!["x^2 / 2".into()])));

    let (route, reply) = dispatcher.dispatch("integral of x").await.unwrap();
    assert_eq!(route, "math");
    assert_eq!(reply, "x^2 / 2");
}
