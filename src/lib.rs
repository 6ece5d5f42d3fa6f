//! Building blocks for LLM-driven agent applications.
//!
//! The crate provides:
//! - A completion gateway (`LanguageModel`) with a scripted `StubModel` and a
//!   runtime `ProviderRegistry`.
//! - Schema-validated tools (`Tool`, `ToolRegistry`, `FunctionTool`).
//! - Bounded conversation memory that compacts into a rolling summary.
//! - An `Agent` that loops between the model and its tools.
//! - Classifier and semantic routers plus a `Dispatcher` in front of agents.
//! - Manager/worker delegation (`AgentTool`) and an actor-style `Swarm`.

mod agent;
pub mod config;
pub mod delegation;
mod embedding;
mod error;
mod hooks;
mod knowledge;
mod llm;
mod memory;
mod message;
mod retry;
pub mod router;
mod schema;
pub mod swarm;
pub mod telemetry;
mod tool;
mod toolkit;

pub use agent::Agent;
pub use config::{
    AgentConfig, AppConfig, LogFormat, MemoryConfig, ModelConfig, RouterConfig, SwarmConfig,
    TelemetryConfig,
};
pub use delegation::AgentTool;
pub use embedding::{cosine_similarity, Embedder, Embedding, HashingEmbedder};
pub use error::{ConclaveError, Result};
pub use hooks::AgentHook;
pub use knowledge::{Document, KnowledgeBase, Retriever, ScoredDocument};
pub use llm::{
    CompletionRequest, CompletionResponse, LanguageModel, ProviderFactory, ProviderRegistry,
    StubModel,
};
pub use memory::{ConversationMemory, MemoryState, SUMMARY_INSTRUCTIONS};
pub use message::{ContentPart, Message, Role, ToolCall, ToolOutcome, ToolResult};
pub use retry::RetryPolicy;
pub use router::{
    ClassifierRouter, Dispatcher, RouteDefinition, RouteMatch, Router, SemanticRouter,
};
pub use schema::{Parameter, ParameterKind, ParameterSchema};
pub use swarm::{PeerSnapshot, Swarm, SwarmEvent, SwarmHandle, SwarmMessage};
pub use telemetry::{init_tracing, TracingGuard};
pub use tool::{FunctionTool, Tool, ToolDefinition, ToolRegistry};
pub use toolkit::calculator_toolkit;
