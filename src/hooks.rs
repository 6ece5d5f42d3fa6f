use async_trait::async_trait;

use crate::error::Result;
use crate::llm::{CompletionRequest, CompletionResponse};
use crate::message::{ToolCall, ToolResult};

/// Observation points inside the agent loop. Returning an error aborts the prompt.
#[async_trait]
pub trait AgentHook: Send + Sync {
    async fn before_completion(&self, _agent: &str, _request: &CompletionRequest) -> Result<()> {
        Ok(())
    }

    async fn after_completion(&self, _agent: &str, _response: &CompletionResponse) -> Result<()> {
        Ok(())
    }

    async fn before_tool_call(&self, _agent: &str, _call: &ToolCall) -> Result<()> {
        Ok(())
    }

    async fn after_tool_result(&self, _agent: &str, _result: &ToolResult) -> Result<()> {
        Ok(())
    }
}
