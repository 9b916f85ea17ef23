//! Bedrock Converse API
//!
//! Authenticates with a Bedrock API key sent as a bearer token, which avoids
//! SigV4 request signing.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{send_json, AdapterOutput, CallError, Credentials, ProviderAdapter, ProviderCall};
use crate::registry::ProviderFamily;

/// Adapter for `/model/{id}/converse`
#[derive(Clone, Debug)]
pub struct BedrockAdapter {
    base_url: String,
    credentials: Credentials,
    client: reqwest::Client,
}

impl BedrockAdapter {
    /// Create an adapter rooted at the regional runtime endpoint
    pub fn new(base_url: impl Into<String>, credentials: Credentials, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            credentials,
            client,
        }
    }

    fn converse_url(&self, model: &str) -> String {
        // Model ids contain ':' which must not be read as a port.
        let model = model.replace(':', "%3A");
        format!("{}/model/{model}/converse", self.base_url)
    }
}

#[async_trait]
impl ProviderAdapter for BedrockAdapter {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Bedrock
    }

    async fn complete(&self, call: &ProviderCall) -> Result<AdapterOutput, CallError> {
        let mut request = self
            .client
            .post(self.converse_url(&call.backend_model))
            .json(&build_body(call));
        if let Some(key) = self.credentials.resolve()? {
            request = request.bearer_auth(key);
        }
        let body = send_json(request).await?;
        parse_response(&body)
    }
}

pub(super) fn build_body(call: &ProviderCall) -> Value {
    let messages: Vec<Value> = call
        .messages
        .iter()
        .map(|m| json!({ "role": m.role.as_str(), "content": [{ "text": m.content }] }))
        .collect();

    let mut inference = json!({ "maxTokens": call.max_tokens });
    if let Some(temperature) = call.temperature {
        inference["temperature"] = json!(temperature);
    }

    let mut body = json!({
        "messages": messages,
        "inferenceConfig": inference,
    });
    if let Some(system) = &call.system {
        body["system"] = json!([{ "text": system }]);
    }
    body
}

pub(super) fn parse_response(body: &Value) -> Result<AdapterOutput, CallError> {
    let blocks = body
        .pointer("/output/message/content")
        .and_then(Value::as_array)
        .ok_or_else(|| CallError::InvalidResponse("missing output.message.content".into()))?;
    let content: String = blocks
        .iter()
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect();

    Ok(AdapterOutput {
        content,
        input_tokens: body.pointer("/usage/inputTokens").and_then(Value::as_u64),
        output_tokens: body.pointer("/usage/outputTokens").and_then(Value::as_u64),
    })
}
