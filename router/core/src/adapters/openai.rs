//! OpenAI-compatible chat completions
//!
//! Serves every family that speaks `/chat/completions`: OpenAI itself,
//! LiteLLM proxies, Groq, Perplexity and OpenRouter.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{send_json, AdapterOutput, CallError, Credentials, ProviderAdapter, ProviderCall};
use crate::registry::ProviderFamily;

/// Adapter for `/chat/completions` endpoints
#[derive(Clone, Debug)]
pub struct OpenAiCompatibleAdapter {
    family: ProviderFamily,
    base_url: String,
    credentials: Credentials,
    client: reqwest::Client,
}

impl OpenAiCompatibleAdapter {
    /// Create an adapter rooted at `base_url` (which includes any `/v1`)
    pub fn new(
        family: ProviderFamily,
        base_url: impl Into<String>,
        credentials: Credentials,
        client: reqwest::Client,
    ) -> Self {
        Self {
            family,
            base_url: base_url.into(),
            credentials,
            client,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn family(&self) -> ProviderFamily {
        self.family
    }

    async fn complete(&self, call: &ProviderCall) -> Result<AdapterOutput, CallError> {
        let mut request = self.client.post(self.completions_url()).json(&build_body(call));
        if let Some(key) = self.credentials.resolve()? {
            request = request.bearer_auth(key);
        }
        let body = send_json(request).await?;
        parse_response(&body)
    }
}

pub(super) fn build_body(call: &ProviderCall) -> Value {
    let mut messages = Vec::with_capacity(call.messages.len() + 1);
    if let Some(system) = &call.system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    for message in &call.messages {
        messages.push(json!({ "role": message.role.as_str(), "content": message.content }));
    }

    let mut body = json!({
        "model": call.backend_model,
        "messages": messages,
        "max_tokens": call.max_tokens,
        "stream": false,
    });
    if let Some(temperature) = call.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

pub(super) fn parse_response(body: &Value) -> Result<AdapterOutput, CallError> {
    let content = body
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| CallError::InvalidResponse("missing choices[0].message.content".into()))?;

    Ok(AdapterOutput {
        content: content.to_string(),
        input_tokens: body.pointer("/usage/prompt_tokens").and_then(Value::as_u64),
        output_tokens: body.pointer("/usage/completion_tokens").and_then(Value::as_u64),
    })
}
