//! Provider Adapters
//!
//! One adapter per wire protocol. The router hands every adapter the same
//! [`ProviderCall`]; adapters translate it to the family's request body, send
//! it, and map the response back to an [`AdapterOutput`].
//!
//! Adapters never retry, time out or track health themselves. That is the
//! job of the resilience layer wrapped around `complete`.

mod anthropic;
mod bedrock;
mod ollama;
mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ProviderSettings;
use crate::registry::{ProviderFamily, WireProtocol};
use crate::resilience::RetryClassify;
use crate::types::{ChatMessage, ChatRole, InvocationRequest};

pub use anthropic::AnthropicAdapter;
pub use bedrock::BedrockAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAiCompatibleAdapter;

// ============================================================================
// Adapter Trait
// ============================================================================

/// A client for one provider family
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Family this adapter serves
    fn family(&self) -> ProviderFamily;

    /// Run one non-streaming completion
    async fn complete(&self, call: &ProviderCall) -> Result<AdapterOutput, CallError>;
}

/// Provider-neutral request handed to an adapter
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderCall {
    /// Model id understood by the backend
    pub backend_model: String,
    /// Conversation without system-role entries
    pub messages: Vec<ChatMessage>,
    /// Merged system prompt
    pub system: Option<String>,
    /// Output token ceiling
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: Option<f32>,
}

impl ProviderCall {
    /// Build a call from an invocation
    ///
    /// The request's system prompt comes first, then any system-role
    /// messages in order. `max_tokens` is capped at the model's ceiling.
    #[must_use]
    pub fn from_request(
        request: &InvocationRequest,
        backend_model: impl Into<String>,
        max_output_tokens: u32,
    ) -> Self {
        let mut system_parts: Vec<&str> = Vec::new();
        if let Some(prompt) = request.system_prompt.as_deref() {
            if !prompt.is_empty() {
                system_parts.push(prompt);
            }
        }
        let mut messages = Vec::with_capacity(request.messages.len());
        for message in &request.messages {
            if message.role == ChatRole::System {
                system_parts.push(&message.content);
            } else {
                messages.push(message.clone());
            }
        }

        let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));
        let max_tokens = request
            .max_tokens
            .map_or(max_output_tokens, |requested| requested.min(max_output_tokens));

        Self {
            backend_model: backend_model.into(),
            messages,
            system,
            max_tokens,
            temperature: request.temperature,
        }
    }

    /// Conversation with the system prompt folded into the first user turn
    ///
    /// Used by protocols without a system role. When there is no user turn
    /// the system prompt becomes one.
    #[must_use]
    pub fn folded_messages(&self) -> Vec<ChatMessage> {
        let mut messages = self.messages.clone();
        let Some(system) = &self.system else {
            return messages;
        };
        match messages.iter_mut().find(|m| m.role == ChatRole::User) {
            Some(first_user) => {
                first_user.content = format!("{system}\n\n{}", first_user.content);
            }
            None => messages.insert(0, ChatMessage::user(system.clone())),
        }
        messages
    }

    /// Conversation as one prompt for protocols without chat roles
    ///
    /// A lone user turn is passed through without a role label.
    #[must_use]
    pub fn prompt_text(&self) -> String {
        let messages = self.folded_messages();
        if let [only] = messages.as_slice() {
            if only.role == ChatRole::User {
                return only.content.clone();
            }
        }
        messages
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// All text sent upstream, for token estimation
    #[must_use]
    pub fn input_text(&self) -> String {
        let mut text = self.system.clone().unwrap_or_default();
        for message in &self.messages {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&message.content);
        }
        text
    }
}

/// What an adapter got back
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdapterOutput {
    /// Generated text
    pub content: String,
    /// Prompt tokens reported by the provider
    pub input_tokens: Option<u64>,
    /// Completion tokens reported by the provider
    pub output_tokens: Option<u64>,
}

// ============================================================================
// Call Errors
// ============================================================================

/// Failure of a single adapter call
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CallError {
    /// Connection or transport failure
    #[error("network error: {0}")]
    Network(String),

    /// Upstream 5xx
    #[error("upstream returned {status}: {message}")]
    Server {
        /// HTTP status
        status: u16,
        /// Response body excerpt
        message: String,
    },

    /// Upstream 429
    #[error("upstream rate limited")]
    RateLimited {
        /// Delay requested by `retry-after`
        retry_after: Option<Duration>,
    },

    /// Credential rejected
    #[error("authentication failed ({status})")]
    Auth {
        /// HTTP status
        status: u16,
    },

    /// Upstream rejected the request itself
    #[error("invalid request ({status}): {message}")]
    InvalidRequest {
        /// HTTP status
        status: u16,
        /// Response body excerpt
        message: String,
    },

    /// Credential environment variable unset or empty
    #[error("missing credentials: {env_var} is not set")]
    MissingCredentials {
        /// Variable that was consulted
        env_var: String,
    },

    /// Body could not be understood
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Transport-level deadline hit
    #[error("request timed out")]
    Timeout,
}

impl CallError {
    /// Map a non-success HTTP status
    #[must_use]
    pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let message = excerpt(body);
        match status {
            429 => Self::RateLimited { retry_after },
            401 | 403 => Self::Auth { status },
            400..=499 => Self::InvalidRequest { status, message },
            _ => Self::Server { status, message },
        }
    }
}

impl RetryClassify for CallError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Server { .. } | Self::RateLimited { .. } | Self::Timeout
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for CallError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

fn excerpt(body: &str) -> String {
    const LIMIT: usize = 300;
    let trimmed = body.trim();
    match trimmed.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

/// Parse a `retry-after` header given in seconds
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Send a JSON request and decode a JSON response
async fn send_json(request: reqwest::RequestBuilder) -> Result<serde_json::Value, CallError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        return Err(CallError::from_status(status.as_u16(), &body, retry_after));
    }
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| CallError::InvalidResponse(e.to_string()))
}

// ============================================================================
// Credentials
// ============================================================================

/// Credential looked up from the environment on every call
///
/// Reading at call time lets operators rotate keys without a restart.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Credentials {
    env_var: Option<String>,
}

impl Credentials {
    /// Credential read from `env_var`
    pub fn from_env(env_var: impl Into<String>) -> Self {
        Self {
            env_var: Some(env_var.into()),
        }
    }

    /// No credential needed
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Current value
    ///
    /// # Errors
    ///
    /// [`CallError::MissingCredentials`] when a variable is configured but
    /// unset or empty.
    pub fn resolve(&self) -> Result<Option<String>, CallError> {
        let Some(var) = &self.env_var else {
            return Ok(None);
        };
        match std::env::var(var) {
            Ok(value) if !value.trim().is_empty() => Ok(Some(value)),
            _ => Err(CallError::MissingCredentials {
                env_var: var.clone(),
            }),
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Create the HTTP adapter for a family
#[must_use]
pub fn create_adapter(
    family: ProviderFamily,
    settings: &ProviderSettings,
    client: reqwest::Client,
) -> Arc<dyn ProviderAdapter> {
    let credentials = settings
        .api_key_env
        .as_deref()
        .map_or_else(Credentials::none, Credentials::from_env);
    let base_url = settings.base_url.trim_end_matches('/').to_string();

    match family.protocol() {
        WireProtocol::OpenAiChat => Arc::new(OpenAiCompatibleAdapter::new(
            family,
            base_url,
            credentials,
            client,
        )),
        WireProtocol::AnthropicMessages => {
            Arc::new(AnthropicAdapter::new(base_url, credentials, client))
        }
        WireProtocol::BedrockConverse => Arc::new(BedrockAdapter::new(base_url, credentials, client)),
        WireProtocol::OllamaGenerate => Arc::new(OllamaAdapter::new(base_url, client)),
    }
}
