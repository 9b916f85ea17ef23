//! Invocation request and response types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProviderAttempt;
use crate::registry::ProviderFamily;

/// Role of a chat message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions for the model
    System,
    /// End-user turn
    User,
    /// Model turn
    Assistant,
}

impl ChatRole {
    /// Lowercase wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single chat message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who is speaking
    pub role: ChatRole,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// Create a message
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// System message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    /// User message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    /// Assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

/// A request to run a logical model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Correlates attempts and usage records for this invocation
    pub request_id: Uuid,

    /// Logical model id from the registry
    pub model_id: String,

    /// Ordered conversation
    pub messages: Vec<ChatMessage>,

    /// Override for the model's output token ceiling
    pub max_tokens: Option<u32>,

    /// Sampling temperature override
    pub temperature: Option<f32>,

    /// System prompt, merged ahead of any system-role messages
    pub system_prompt: Option<String>,

    /// Caller asked for streaming; responses are still delivered whole
    pub stream: bool,
}

impl InvocationRequest {
    /// Create a request for `model_id` with no messages
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            model_id: model_id.into(),
            messages: Vec::new(),
            max_tokens: None,
            temperature: None,
            system_prompt: None,
            stream: false,
        }
    }

    /// Append a message
    #[must_use]
    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    /// Append a user message
    #[must_use]
    pub fn with_user(self, content: impl Into<String>) -> Self {
        self.with_message(ChatMessage::user(content))
    }

    /// Set the system prompt
    #[must_use]
    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    /// Set the output token override
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the temperature override
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the streaming flag
    #[must_use]
    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// Result of a successful invocation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InvocationResponse {
    /// Id of the originating request
    pub request_id: Uuid,

    /// Generated text
    pub content: String,

    /// Logical model id that was requested
    pub model_id: String,

    /// Backend model id that actually served the request
    pub model_used: String,

    /// Family that actually served the request
    pub provider: ProviderFamily,

    /// Prompt tokens (reported or estimated)
    pub input_tokens: u64,

    /// Completion tokens (reported or estimated)
    pub output_tokens: u64,

    /// Wall-clock time of the successful dispatch, retries included
    pub latency_ms: u64,

    /// Cost in cents, rounded up
    pub cost_cents: u64,

    /// Reserved; always false
    pub cached: bool,

    /// Failed attempts that preceded this success
    #[serde(default)]
    pub failed_attempts: Vec<ProviderAttempt>,
}

impl InvocationResponse {
    /// Whether a fallback family served the request
    #[must_use]
    pub fn served_by_fallback(&self) -> bool {
        !self.failed_attempts.is_empty()
    }
}
