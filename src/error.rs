use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConclaveError>;

#[derive(Debug, Error)]
pub enum ConclaveError {
    /// Transport, authentication or rate-limit failure reported by a model provider.
    #[error("provider error: {0}")]
    Provider(String),

    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error("tool `{0}` is already registered")]
    DuplicateToolName(String),

    #[error("tool `{0}` not found")]
    UnknownTool(String),

    #[error("invalid arguments for tool `{tool}`: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("tool `{name}` invocation failed: {source}")]
    ToolInvocation {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("no matching route: {0}")]
    NoMatchingRoute(String),

    #[error("compaction failed: {0}")]
    Compaction(String),

    #[error("agent `{agent}` exceeded {limit} tool-calling iterations")]
    MaxIterations { agent: String, limit: usize },

    #[error("delegating to `{agent}` would exceed the delegation depth of {limit}")]
    DelegationDepth { agent: String, limit: usize },

    #[error("agent `{0}` is already handling this request")]
    DelegationCycle(String),

    #[error("embedding model mismatch: expected `{expected}`, found `{found}`")]
    EmbeddingMismatch { expected: String, found: String },

    #[error("unknown provider `{0}`")]
    UnknownProvider(String),

    #[error("swarm peer `{0}` not found")]
    UnknownPeer(String),

    #[error("swarm peer `{0}` is already registered")]
    DuplicatePeer(String),

    #[error("swarm peer `{0}` is no longer accepting messages")]
    PeerUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ConclaveError {
    /// Failure raised from inside a tool handler.
    pub fn tool(name: impl Into<String>, message: impl Into<String>) -> Self {
        let message: String = message.into();
        ConclaveError::ToolInvocation {
            name: name.into(),
            source: message.into(),
        }
    }

    /// Only provider failures are worth retrying without model or human input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConclaveError::Provider(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_missing() -> Result<String> {
        Ok(std::fs::read_to_string("/definitely/not/here.toml")?)
    }

    #[test]
    fn only_io_converts_implicitly() {
        assert!(matches!(read_missing(), Err(ConclaveError::Io(_))));
    }

    #[test]
    fn only_provider_failures_retry() {
        assert!(ConclaveError::Provider("429".into()).is_retryable());
        assert!(!ConclaveError::tool("div", "division by zero").is_retryable());
        assert!(!ConclaveError::Config("bad".into()).is_retryable());
    }
}
