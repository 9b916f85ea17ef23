//! Ollama Backend
//!
//! Local models through `/api/generate`. The generate endpoint has no chat
//! roles, so the system prompt and conversation are folded into one prompt.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{send_json, AdapterOutput, CallError, ProviderAdapter, ProviderCall};
use crate::registry::ProviderFamily;

/// Adapter for a local Ollama server
#[derive(Clone, Debug)]
pub struct OllamaAdapter {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaAdapter {
    /// Create an adapter for the server at `base_url`
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Ollama
    }

    async fn complete(&self, call: &ProviderCall) -> Result<AdapterOutput, CallError> {
        let request = self.client.post(self.generate_url()).json(&build_body(call));
        let body = send_json(request).await?;
        parse_response(&body)
    }
}

pub(super) fn build_body(call: &ProviderCall) -> Value {
    let mut options = json!({ "num_predict": call.max_tokens });
    if let Some(temperature) = call.temperature {
        options["temperature"] = json!(temperature);
    }
    json!({
        "model": call.backend_model,
        "prompt": call.prompt_text(),
        "stream": false,
        "options": options,
    })
}

pub(super) fn parse_response(body: &Value) -> Result<AdapterOutput, CallError> {
    let content = body
        .get("response")
        .and_then(Value::as_str)
        .ok_or_else(|| CallError::InvalidResponse("missing response field".into()))?;

    Ok(AdapterOutput {
        content: content.to_string(),
        input_tokens: body.get("prompt_eval_count").and_then(Value::as_u64),
        output_tokens: body.get("eval_count").and_then(Value::as_u64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InvocationRequest;

    #[test]
    fn test_system_folded_into_prompt() {
        let request = InvocationRequest::new("m")
            .with_system_prompt("You are a helpful assistant.")
            .with_user("Hello!")
            .with_max_tokens(64);
        let body = build_body(&ProviderCall::from_request(&request, "llama3.2", 2048));

        assert_eq!(body["prompt"], "You are a helpful assistant.\n\nHello!");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 64);
        assert!(body.get("system").is_none());
    }

    #[test]
    fn test_parse_generate_output() {
        let body = json!({
            "model": "llama3.2",
            "response": "hi there",
            "done": true,
            "prompt_eval_count": 12,
            "eval_count": 4
        });
        let output = parse_response(&body).unwrap();
        assert_eq!(output.content, "hi there");
        assert_eq!(output.input_tokens, Some(12));
        assert_eq!(output.output_tokens, Some(4));
    }
}
