//! Manager/worker delegation: exposing an [`Agent`] as a tool of another.
//!
//! Every running prompt records its agent's id on a task-local delegation chain.
//! [`AgentTool`] consults the chain before forwarding, which bounds nesting
//! depth and refuses to re-enter an agent that is already mid-prompt.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::agent::Agent;
use crate::error::{ConclaveError, Result};
use crate::schema::{ParameterKind, ParameterSchema};
use crate::tool::Tool;

pub const DEFAULT_MAX_DELEGATION_DEPTH: usize = 3;

tokio::task_local! {
    static CHAIN: Vec<Uuid>;
}

/// Ids of the agents currently handling this request, outermost first.
pub fn current_chain() -> Vec<Uuid> {
    CHAIN.try_with(|chain| chain.clone()).unwrap_or_default()
}

pub(crate) async fn within<F: Future>(agent: Uuid, fut: F) -> F::Output {
    let mut chain = current_chain();
    chain.push(agent);
    CHAIN.scope(chain, fut).await
}

/// Wraps a worker agent so a manager can call it like any other tool.
pub struct AgentTool {
    agent_id: Uuid,
    name: String,
    description: String,
    agent: Arc<Mutex<Agent>>,
    max_depth: usize,
}

impl AgentTool {
    pub fn new(agent: Agent) -> Self {
        let name = agent.name().to_string();
        let description = agent.description().to_string();
        Self {
            agent_id: agent.id(),
            name,
            description,
            agent: Arc::new(Mutex::new(agent)),
            max_depth: DEFAULT_MAX_DELEGATION_DEPTH,
        }
    }

    /// Expose an agent that is also reachable elsewhere.
    pub async fn shared(agent: Arc<Mutex<Agent>>) -> Self {
        let (agent_id, name, description) = {
            let guard = agent.lock().await;
            (guard.id(), guard.name().to_string(), guard.description().to_string())
        };
        Self {
            agent_id,
            name,
            description,
            agent,
            max_depth: DEFAULT_MAX_DELEGATION_DEPTH,
        }
    }

    /// Number of nested delegation hops allowed below the outermost agent.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn agent(&self) -> Arc<Mutex<Agent>> {
        Arc::clone(&self.agent)
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new().required(
            "prompt",
            ParameterKind::String,
            format!("The request to hand to {}", self.name),
        )
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let prompt = input
            .get("prompt")
            .and_then(Value::as_str)
            .ok_or_else(|| ConclaveError::InvalidArguments {
                tool: self.name.clone(),
                reason: "missing `prompt`".into(),
            })?
            .to_string();

        let chain = current_chain();
        if chain.contains(&self.agent_id) {
            return Err(ConclaveError::DelegationCycle(self.name.clone()));
        }
        if chain.len() > self.max_depth {
            return Err(ConclaveError::DelegationDepth {
                agent: self.name.clone(),
                limit: self.max_depth,
            });
        }

        info!(worker = %self.name, depth = chain.len(), "delegating to worker");
        let mut worker = self.agent.lock().await;
        let reply = worker.prompt(prompt).await?;
        Ok(json!(reply))
    }
}
