use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success(Value),
    Failure(String),
}

/// Outcome of executing a [`ToolCall`], fed back to the model on the next completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(call: &ToolCall, output: Value) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            outcome: ToolOutcome::Success(output),
        }
    }

    pub fn failure(call: &ToolCall, error: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            outcome: ToolOutcome::Failure(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Failure(_))
    }

    pub fn output(&self) -> Option<&Value> {
        match &self.outcome {
            ToolOutcome::Success(value) => Some(value),
            ToolOutcome::Failure(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::text(text)],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentPart::text(text)],
        }
    }

    pub fn assistant_parts(content: Vec<ContentPart>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// Tool results are returned to the model on the user side of the exchange.
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            role: Role::User,
            content: results.into_iter().map(ContentPart::ToolResult).collect(),
        }
    }

    /// Text parts joined with newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> + '_ {
        self.content.iter().filter_map(|part| match part {
            ContentPart::ToolCall(call) => Some(call),
            _ => None,
        })
    }

    pub fn tool_results_iter(&self) -> impl Iterator<Item = &ToolResult> + '_ {
        self.content.iter().filter_map(|part| match part {
            ContentPart::ToolResult(result) => Some(result),
            _ => None,
        })
    }

    /// Render the message as a single transcript line block.
    pub fn transcript_line(&self) -> String {
        let speaker = match self.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        let mut lines = Vec::new();
        for part in &self.content {
            match part {
                ContentPart::Text { text } => lines.push(format!("{speaker}: {text}")),
                ContentPart::ToolCall(call) => lines.push(format!(
                    "{speaker}: [called `{}` with {}]",
                    call.name, call.arguments
                )),
                ContentPart::ToolResult(result) => match &result.outcome {
                    ToolOutcome::Success(value) => {
                        lines.push(format!("Tool `{}` returned {value}", result.name))
                    }
                    ToolOutcome::Failure(error) => {
                        lines.push(format!("Tool `{}` failed: {error}", result.name))
                    }
                },
            }
        }
        lines.join("\n")
    }
}
