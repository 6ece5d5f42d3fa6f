use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::MemoryConfig;
use crate::error::{ConclaveError, Result};
use crate::llm::{CompletionRequest, LanguageModel};
use crate::message::Message;

pub const SUMMARY_INSTRUCTIONS: &str = "Please provide a concise summary of the following conversation, \
capturing key points, decisions, and context.";

const SUMMARY_HEADER: &str = "Previous conversation summary:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryState {
    /// Accumulating messages.
    Active,
    /// A summary is being generated.
    Compacting,
    /// History was just replaced by a summary.
    Idle,
}

/// Bounded transcript with a rolling summary.
///
/// Once more than `max_messages` are held, [`ConversationMemory::compact`]
/// replaces the whole history with a model-written summary. Compaction is
/// atomic: either history is cleared and the summary replaced, or neither
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMemory {
    messages: Vec<Message>,
    summary: Option<String>,
    max_messages: usize,
    max_summary_chars: Option<usize>,
    state: MemoryState,
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::with_max_messages(20)
    }
}

impl ConversationMemory {
    pub fn with_max_messages(max_messages: usize) -> Self {
        Self {
            messages: Vec::new(),
            summary: None,
            max_messages,
            max_summary_chars: None,
            state: MemoryState::Active,
        }
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        let mut memory = Self::with_max_messages(config.max_messages);
        memory.max_summary_chars = config.max_summary_chars;
        memory
    }

    pub fn with_max_summary_chars(mut self, limit: usize) -> Self {
        self.max_summary_chars = Some(limit);
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.state = MemoryState::Active;
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Message> + '_ {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn state(&self) -> MemoryState {
        self.state
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    pub fn needs_compaction(&self) -> bool {
        self.messages.len() > self.max_messages
    }

    /// Drop history and summary.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.summary = None;
        self.state = MemoryState::Active;
    }

    /// Preamble for the next request: `base_preamble` followed by the rolling summary.
    pub fn build_context(&self, base_preamble: &str) -> String {
        match &self.summary {
            Some(summary) if base_preamble.is_empty() => format!("{SUMMARY_HEADER}\n{summary}"),
            Some(summary) => format!("{base_preamble}\n\n{SUMMARY_HEADER}\n{summary}"),
            None => base_preamble.to_string(),
        }
    }

    /// Flat transcript of the current history, prefixed by any earlier summary.
    pub fn transcript(&self) -> String {
        let mut sections = Vec::new();
        if let Some(summary) = &self.summary {
            sections.push(format!("{SUMMARY_HEADER}\n{summary}"));
        }
        sections.extend(self.messages.iter().map(Message::transcript_line));
        sections.join("\n")
    }

    /// Summarize and clear history when it exceeds `max_messages`.
    ///
    /// Returns `Ok(false)` when no compaction was needed. On error the memory
    /// is left exactly as it was.
    pub async fn compact(&mut self, model: &dyn LanguageModel) -> Result<bool> {
        if !self.needs_compaction() {
            return Ok(false);
        }

        self.state = MemoryState::Compacting;
        info!(
            messages = self.messages.len(),
            max_messages = self.max_messages,
            "compacting conversation"
        );

        match self.generate_summary(model).await {
            Ok(summary) => {
                debug!(chars = summary.chars().count(), "stored conversation summary");
                self.summary = Some(summary);
                self.messages.clear();
                self.state = MemoryState::Idle;
                Ok(true)
            }
            Err(err) => {
                warn!(error = %err, "compaction failed; history kept");
                self.state = MemoryState::Active;
                Err(match err {
                    ConclaveError::Compaction(_) => err,
                    other => ConclaveError::Compaction(other.to_string()),
                })
            }
        }
    }

    async fn generate_summary(&self, model: &dyn LanguageModel) -> Result<String> {
        let prompt = format!("{SUMMARY_INSTRUCTIONS}\n\n{}", self.transcript());
        let summary = request_text(model, prompt).await?;

        let Some(limit) = self.max_summary_chars else {
            return Ok(summary);
        };
        if summary.chars().count() <= limit {
            return Ok(summary);
        }

        debug!(limit, "summary over limit; condensing");
        let condensed = request_text(
            model,
            format!(
                "Condense the following summary to at most {limit} characters, \
                 keeping the most important facts and decisions:\n\n{summary}"
            ),
        )
        .await?;
        Ok(condensed.chars().take(limit).collect())
    }
}

async fn request_text(model: &dyn LanguageModel, prompt: String) -> Result<String> {
    let response = model
        .complete(CompletionRequest::new(vec![Message::user(prompt)]))
        .await?;
    let text = response.joined_text();
    if text.trim().is_empty() {
        return Err(ConclaveError::Compaction(
            "model returned no summary text".into(),
        ));
    }
    Ok(text)
}
