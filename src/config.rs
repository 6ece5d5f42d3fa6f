use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConclaveError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default = "default_agent_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_preamble")]
    pub preamble: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_max_delegation_depth")]
    pub max_delegation_depth: usize,
    #[serde(default)]
    pub completion_timeout_secs: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            description: String::new(),
            preamble: default_preamble(),
            max_iterations: default_max_iterations(),
            max_delegation_depth: default_max_delegation_depth(),
            completion_timeout_secs: None,
        }
    }
}

impl AgentConfig {
    pub fn completion_timeout(&self) -> Option<Duration> {
        self.completion_timeout_secs.map(Duration::from_secs)
    }
}

fn default_agent_name() -> String {
    "assistant".into()
}

fn default_preamble() -> String {
    "You are a helpful assistant.".into()
}

fn default_max_iterations() -> usize {
    6
}

fn default_max_delegation_depth() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    /// Free-form provider settings (endpoint, organization, ...).
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    #[serde(default = "default_max_summary_chars")]
    pub max_summary_chars: Option<usize>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            max_summary_chars: default_max_summary_chars(),
        }
    }
}

fn default_max_messages() -> usize {
    20
}

fn default_max_summary_chars() -> Option<usize> {
    Some(4000)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RouterConfig {
    /// Minimum cosine similarity for semantic routing; unset means always route.
    #[serde(default)]
    pub min_score: Option<f32>,
    #[serde(default)]
    pub default_route: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwarmConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            inbox_capacity: default_inbox_capacity(),
        }
    }
}

impl SwarmConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }
}

fn default_tick_interval_secs() -> u64 {
    10
}

fn default_inbox_capacity() -> usize {
    100
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence when set.
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
    /// OTLP/HTTP traces endpoint, e.g. `http://localhost:4318/v1/traces`.
    /// Export needs the `otel` feature.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            format: LogFormat::default(),
            otlp_endpoint: None,
            service_name: default_service_name(),
        }
    }
}

fn default_filter() -> String {
    "info".into()
}

fn default_service_name() -> String {
    "conclave".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub swarm: SwarmConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&raw)
            .map_err(|err| ConclaveError::Config(format!("failed to parse configuration: {err}")))?;
        Ok(cfg)
    }

    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    /// Apply `CONCLAVE_*` environment variables on top of the current values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(name) = env::var("CONCLAVE_AGENT_NAME") {
            self.agent.name = name;
        }
        if let Ok(preamble) = env::var("CONCLAVE_PREAMBLE") {
            self.agent.preamble = preamble;
        }
        if let Some(parsed) = parse_env::<usize>("CONCLAVE_MAX_ITERATIONS")? {
            self.agent.max_iterations = parsed;
        }
        if let Some(parsed) = parse_env::<usize>("CONCLAVE_MAX_DELEGATION_DEPTH")? {
            self.agent.max_delegation_depth = parsed;
        }
        if let Some(parsed) = parse_env::<u64>("CONCLAVE_COMPLETION_TIMEOUT_SECS")? {
            self.agent.completion_timeout_secs = Some(parsed);
        }
        if let Ok(provider) = env::var("CONCLAVE_PROVIDER") {
            self.model.provider = provider;
        }
        if let Ok(model) = env::var("CONCLAVE_MODEL") {
            self.model.model = model;
        }
        if let Some(parsed) = parse_env::<usize>("CONCLAVE_MAX_MESSAGES")? {
            self.memory.max_messages = parsed;
        }
        if let Some(parsed) = parse_env::<usize>("CONCLAVE_MAX_SUMMARY_CHARS")? {
            self.memory.max_summary_chars = Some(parsed);
        }
        if let Some(parsed) = parse_env::<f32>("CONCLAVE_ROUTER_MIN_SCORE")? {
            self.router.min_score = Some(parsed.clamp(-1.0, 1.0));
        }
        if let Ok(route) = env::var("CONCLAVE_DEFAULT_ROUTE") {
            self.router.default_route = Some(route);
        }
        if let Some(parsed) = parse_env::<u64>("CONCLAVE_SWARM_TICK_SECS")? {
            self.swarm.tick_interval_secs = parsed;
        }
        if let Ok(filter) = env::var("CONCLAVE_LOG") {
            self.telemetry.filter = filter;
        }
        if let Ok(format) = env::var("CONCLAVE_LOG_FORMAT") {
            self.telemetry.format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(ConclaveError::Config(format!(
                        "unknown log format `{other}`"
                    )))
                }
            };
        }
        if let Ok(endpoint) = env::var("CONCLAVE_OTLP_ENDPOINT") {
            self.telemetry.otlp_endpoint = Some(endpoint).filter(|e| !e.trim().is_empty());
        }
        if let Ok(service) = env::var("CONCLAVE_SERVICE_NAME") {
            self.telemetry.service_name = service;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConclaveError::Config(format!("invalid value `{raw}` for {key}"))),
        Err(_) => Ok(None),
    }
}
