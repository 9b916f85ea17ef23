//! Anthropic Messages API

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{send_json, AdapterOutput, CallError, Credentials, ProviderAdapter, ProviderCall};
use crate::registry::ProviderFamily;

const API_VERSION: &str = "2023-06-01";

/// Adapter for `/v1/messages`
#[derive(Clone, Debug)]
pub struct AnthropicAdapter {
    base_url: String,
    credentials: Credentials,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    /// Create an adapter rooted at `base_url`
    pub fn new(base_url: impl Into<String>, credentials: Credentials, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            credentials,
            client,
        }
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Anthropic
    }

    async fn complete(&self, call: &ProviderCall) -> Result<AdapterOutput, CallError> {
        let mut request = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("anthropic-version", API_VERSION)
            .json(&build_body(call));
        if let Some(key) = self.credentials.resolve()? {
            request = request.header("x-api-key", key);
        }
        let body = send_json(request).await?;
        parse_response(&body)
    }
}

pub(super) fn build_body(call: &ProviderCall) -> Value {
    let messages: Vec<Value> = call
        .messages
        .iter()
        .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
        .collect();

    let mut body = json!({
        "model": call.backend_model,
        "messages": messages,
        "max_tokens": call.max_tokens,
    });
    if let Some(system) = &call.system {
        body["system"] = json!(system);
    }
    if let Some(temperature) = call.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

pub(super) fn parse_response(body: &Value) -> Result<AdapterOutput, CallError> {
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| CallError::InvalidResponse("missing content blocks".into()))?;

    // Only text blocks carry output; tool-use blocks are not requested.
    let content: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect();

    Ok(AdapterOutput {
        content,
        input_tokens: body.pointer("/usage/input_tokens").and_then(Value::as_u64),
        output_tokens: body.pointer("/usage/output_tokens").and_then(Value::as_u64),
    })
}
