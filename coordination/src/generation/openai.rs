//! Chat-completions client for OpenAI-compatible endpoints.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::prompt::{system_prompt, user_prompt};
use super::{GenerationError, GenerationRequest, GenerationResult, TextGenerator};
use crate::config::GeneratorConfig;

/// Generator backed by any `/chat/completions` endpoint (OpenAI, vLLM,
/// llama.cpp server, proxies).
pub struct OpenAiCompatGenerator {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatGenerator {
    pub fn new(config: &GeneratorConfig) -> GenerationResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| GenerationError::RequestFailed(format!("HTTP client: {e}")))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatGenerator {
    async fn generate(&self, request: &GenerationRequest) -> GenerationResult<String> {
        let start = std::time::Instant::now();

        let request_body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [
                { "role": "system", "content": system_prompt(request) },
                { "role": "user", "content": user_prompt(request) }
            ]
        });

        let mut builder = self.client.post(self.endpoint()).json(&request_body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| GenerationError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api { status, body });
        }

        let resp_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GenerationError::ParseError(e.to_string()))?;

        let content = extract_content(&resp_json)?;
        debug!(
            speaker = %request.speaker,
            model = %self.model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            chars = content.len(),
            "Chat completion received"
        );
        Ok(content)
    }
}

fn extract_content(resp: &serde_json::Value) -> GenerationResult<String> {
    let content = resp["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| GenerationError::ParseError("missing choices[0].message.content".into()))?
        .trim();
    if content.is_empty() {
        return Err(GenerationError::Empty);
    }
    Ok(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_content() {
        let resp = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "  Fair point.  " } }]
        });
        assert_eq!(extract_content(&resp).unwrap(), "Fair point.");

        let empty = serde_json::json!({ "choices": [{ "message": { "content": "" } }] });
        assert_eq!(extract_content(&empty), Err(GenerationError::Empty));

        let malformed = serde_json::json!({ "error": "nope" });
        assert!(matches!(
            extract_content(&malformed),
            Err(GenerationError::ParseError(_))
        ));
    }

    #[test]
    fn test_endpoint_normalizes_trailing_slash() {
        let config = GeneratorConfig {
            base_url: "http://localhost:8080/v1/".to_string(),
            model: "local".to_string(),
            api_key: Some(String::new()),
            timeout_secs: 30,
            ..GeneratorConfig::default()
        };
        let generator = OpenAiCompatGenerator::new(&config).unwrap();
        assert_eq!(generator.endpoint(), "http://localhost:8080/v1/chat/completions");
        assert!(generator.api_key.is_none());
    }
}
