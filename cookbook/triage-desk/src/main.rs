use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use conclave::{
    calculator_toolkit, init_tracing, Agent, AppConfig, ConversationMemory, Dispatcher,
    HashingEmbedder, LanguageModel, ModelConfig, ProviderRegistry, RouteDefinition,
    SemanticRouter, StubModel, Swarm, SwarmEvent,
};
use serde_json::json;
use tracing::info;

/// Route a question to a specialist agent, optionally followed by a short swarm exchange.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file; `CONCLAVE_*` variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Question to route
    #[arg(default_value = "Calculate the derivative and sum of 4 and 5")]
    query: String,

    /// Also run a three-peer swarm for one reflection tick
    #[arg(long)]
    swarm: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_env_or_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => {
            let mut config = AppConfig::default();
            config.apply_env_overrides()?;
            config
        }
    };
    let telemetry = init_tracing(&config.telemetry)?;

    let providers = scripted_providers();
    let dispatcher = build_desk(&config, &providers).await?;

    let (route, reply) = dispatcher.dispatch(&cli.query).await?;
    println!("Route: {route}");
    println!("Reply: {reply}");

    if cli.swarm {
        run_swarm(&config, &providers).await?;
    }
    telemetry.shutdown()?;
    Ok(())
}

/// A `scripted` provider whose replies come from the `script` option, one per line.
fn scripted_providers() -> ProviderRegistry {
    ProviderRegistry::new().with_provider("scripted", |cfg: &ModelConfig| {
        let script = cfg
            .options
            .get("script")
            .map(|raw| raw.lines().map(str::to_string).collect())
            .unwrap_or_default();
        let model: Arc<dyn LanguageModel> = StubModel::named(cfg.model.clone(), script);
        Ok(model)
    })
}

fn scripted(model: &str, replies: &[String]) -> ModelConfig {
    let mut config = ModelConfig {
        provider: "scripted".into(),
        model: model.into(),
        ..ModelConfig::default()
    };
    config.options.insert("script".into(), replies.join("\n"));
    config
}

async fn build_desk(config: &AppConfig, providers: &ProviderRegistry) -> Result<Dispatcher> {
    let math_script = [
        json!({"action": "call_tool", "name": "add", "arguments": {"x": 4, "y": 5}}).to_string(),
        "4 plus 5 is 9.".to_string(),
    ];
    let math = Agent::from_config(&config.agent, providers.build(&scripted("math-desk", &math_script))?)
        .with_name("math")
        .with_preamble("You are a mathematics expert who excels at solving complex problems.")
        .with_tools(calculator_toolkit())
        .with_memory(ConversationMemory::from_config(&config.memory));

    let coding = Agent::from_config(
        &config.agent,
        providers.build(&scripted("coding-desk", &["Reach for tokio::spawn.".to_string()]))?,
    )
    .with_name("coding")
    .with_preamble("You are an expert coding assistant specializing in Rust programming.");

    let general = Agent::from_config(
        &config.agent,
        providers.build(&scripted("front-desk", &["I can help with code or maths.".to_string()]))?,
    )
    .with_name("general");

    let routes = vec![
        RouteDefinition::new("coding", "Programming, code, and software development in Rust")
            .with_example("How do I write an async function in Rust?")
            .with_example("Debug this code"),
        RouteDefinition::new("math", "Mathematics, calculations, and equations")
            .with_example("Solve this equation")
            .with_example("Calculate the derivative")
            .with_example("What is the sum of two numbers?"),
    ];
    let router = SemanticRouter::build(Arc::new(HashingEmbedder::default()), routes)
        .await?
        .with_config(&config.router);

    let default_route = config
        .router
        .default_route
        .clone()
        .unwrap_or_else(|| "general".to_string());
    Ok(Dispatcher::new(Arc::new(router))
        .with_route("math", math)
        .with_route("coding", coding)
        .with_route("general", general)
        .with_default_route(default_route))
}

async fn run_swarm(config: &AppConfig, providers: &ProviderRegistry) -> Result<()> {
    let mut swarm = Swarm::new(config.swarm.clone());
    let peers = [
        ("Tom", vec!["Autonomous agents divide work and scale.".to_string(), "Tom analysed autonomy.".to_string()]),
        ("Richard", vec!["Richard noted Tom's analysis.".to_string()]),
        ("Harry", vec!["Harry noted Tom's analysis.".to_string()]),
    ];
    for (id, script) in &peers {
        let model = providers.build(&scripted(id, script))?;
        let agent = Agent::from_config(&config.agent, model)
            .with_name(*id)
            .with_preamble(format!(
                "Your name is {id}. Process tasks autonomously and coordinate with other agents."
            ));
        swarm.add_agent(*id, agent)?;
    }
    swarm.connect_all();

    let mut events = swarm.subscribe();
    let handle = swarm.start();
    handle
        .task("Tom", "Analyze the benefits of autonomous agent systems")
        .await?;

    let tick = config.swarm.tick_interval();
    info!(wait_secs = tick.as_secs() + 1, "waiting for one reflection tick");
    tokio::time::sleep(tick + std::time::Duration::from_secs(1)).await;

    handle.shutdown().await?;
    while let Ok(event) = events.try_recv() {
        match event {
            SwarmEvent::TaskCompleted { peer, result, .. } => println!("[{peer}] completed: {result}"),
            SwarmEvent::ResponseReceived { peer, from, .. } => println!("[{peer}] heard from {from}"),
            SwarmEvent::Reflection { peer, summary } => println!("[{peer}] reflects: {summary}"),
            SwarmEvent::TaskFailed { peer, error, .. } => println!("[{peer}] failed: {error}"),
            SwarmEvent::TriggerHandled { peer, reply, .. } => println!("[{peer}] trigger: {reply}"),
            SwarmEvent::Stopped { peer } => println!("[{peer}] stopped"),
        }
    }
    Ok(())
}
