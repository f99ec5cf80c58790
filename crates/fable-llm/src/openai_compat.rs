//! Adapter for OpenAI-compatible chat completion endpoints.
//!
//! OpenRouter, Groq, and local Ollama all speak this wire format, so one
//! adapter covers the whole fallback chain. Non-streaming: the engine
//! consumes whole completions only.

use async_trait::async_trait;
use serde_json::json;

use fable_types::{FableError, Result};

use crate::{GenerationService, GenerationSpec, Generated, Usage};

#[derive(Debug)]
pub struct OpenAiCompatService {
    name: String,
    api_key: Option<String>,
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OpenAiCompatService {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            api_key,
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    /// OpenRouter, keyed by `OPENROUTER_API_KEY`.
    pub fn openrouter_from_env(model: impl Into<String>) -> Result<Self> {
        let key = std::env::var("OPENROUTER_API_KEY").map_err(|_| FableError::Auth {
            provider: "openrouter".into(),
        })?;
        Ok(Self::new(
            "openrouter",
            "https://openrouter.ai/api/v1",
            Some(key),
            model,
        ))
    }

    /// Groq, keyed by `GROQ_API_KEY`.
    pub fn groq_from_env(model: impl Into<String>) -> Result<Self> {
        let key = std::env::var("GROQ_API_KEY").map_err(|_| FableError::Auth {
            provider: "groq".into(),
        })?;
        Ok(Self::new(
            "groq",
            "https://api.groq.com/openai/v1",
            Some(key),
            model,
        ))
    }

    /// Local Ollama endpoint; no key required.
    pub fn ollama(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new("ollama", base_url, None, model)
    }

    fn build_request_body(&self, spec: &GenerationSpec) -> serde_json::Value {
        let mut user_content = String::new();
        for artifact in &spec.context {
            user_content.push_str(artifact);
            user_content.push_str("\n\n");
        }
        user_content.push_str(&spec.instructions);
        if let Some(words) = spec.target_words {
            user_content.push_str(&format!(
                "\n\nTarget length: at least {words} words of finished prose."
            ));
        }

        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": spec.role.system_context() },
                { "role": "user", "content": user_content },
            ],
            "max_tokens": spec.max_output_tokens,
        })
    }

    fn parse_response(&self, body: serde_json::Value) -> Result<Generated> {
        let text = body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        if text.trim().is_empty() {
            return Err(FableError::InvalidOutput {
                reason: format!("provider {} returned an empty completion", self.name),
            });
        }

        let usage = Usage {
            input_tokens: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: body["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        };

        Ok(Generated {
            text,
            provider: self.name.clone(),
            model: body["model"]
                .as_str()
                .unwrap_or(&self.model)
                .to_string(),
            usage,
        })
    }
}

/// Map an HTTP error response onto the Fable error taxonomy.
fn map_error(provider: &str, status: u16, body: &str) -> FableError {
    match status {
        429 => {
            let retry_ms = serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v["error"]["retry_after"].as_f64())
                .map(|s| (s * 1000.0) as u64)
                .unwrap_or(5000);
            FableError::RateLimited {
                provider: provider.to_string(),
                retry_after_ms: retry_ms,
            }
        }
        401 | 403 => FableError::Auth {
            provider: provider.to_string(),
        },
        402 => FableError::QuotaExhausted {
            provider: provider.to_string(),
        },
        500 | 502 | 503 | 504 => FableError::Transient {
            provider: provider.to_string(),
            message: format!("HTTP {status}: {}", truncate(body, 200)),
        },
        _ => FableError::Other(format!(
            "provider {provider} returned HTTP {status}: {}",
            truncate(body, 200)
        )),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl GenerationService for OpenAiCompatService {
    async fn generate(&self, spec: &GenerationSpec) -> Result<Generated> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = self.build_request_body(spec);

        let mut req = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| FableError::Transient {
            provider: self.name.clone(),
            message: format!("request failed: {e}"),
        })?;

        let status = resp.status();
        let response_body = resp.text().await.map_err(|e| FableError::Transient {
            provider: self.name.clone(),
            message: format!("failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(map_error(&self.name, status.as_u16(), &response_body));
        }

        let parsed: serde_json::Value =
            serde_json::from_str(&response_body).map_err(|e| FableError::InvalidOutput {
                reason: format!("provider {} returned malformed JSON: {e}", self.name),
            })?;

        tracing::debug!(provider = %self.name, model = %self.model, "generation call completed");
        self.parse_response(parsed)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RolePreset;

    fn adapter() -> OpenAiCompatService {
        OpenAiCompatService::new("testprov", "http://localhost:9", None, "test-model")
    }

    #[test]
    fn map_error_429_is_rate_limited() {
        let err = map_error("groq", 429, r#"{"error": {"retry_after": 2.5}}"#);
        match err {
            FableError::RateLimited {
                provider,
                retry_after_ms,
            } => {
                assert_eq!(provider, "groq");
                assert_eq!(retry_after_ms, 2500);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn map_error_429_without_hint_uses_default_delay() {
        let err = map_error("groq", 429, "rate limited");
        match err {
            FableError::RateLimited { retry_after_ms, .. } => {
                assert_eq!(retry_after_ms, 5000)
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn map_error_auth_and_quota() {
        assert!(matches!(
            map_error("openrouter", 401, ""),
            FableError::Auth { .. }
        ));
        assert!(matches!(
            map_error("openrouter", 403, ""),
            FableError::Auth { .. }
        ));
        assert!(matches!(
            map_error("openrouter", 402, ""),
            FableError::QuotaExhausted { .. }
        ));
    }

    #[test]
    fn map_error_5xx_is_transient() {
        for status in [500, 502, 503, 504] {
            assert!(matches!(
                map_error("ollama", status, "server error"),
                FableError::Transient { .. }
            ));
        }
    }

    #[test]
    fn map_error_unknown_status_is_other() {
        assert!(matches!(
            map_error("ollama", 418, ""),
            FableError::Other(_)
        ));
    }

    #[test]
    fn request_body_includes_role_context_and_artifacts() {
        let spec = GenerationSpec::new(RolePreset::SceneWriter, "Write the scene")
            .with_context("STORY ARC: a heist")
            .with_target_words(1200);
        let body = adapter().build_request_body(&spec);

        assert_eq!(body["model"], "test-model");
        let system = body["messages"][0]["content"].as_str().unwrap();
        assert!(system.contains("prose writer"));
        let user = body["messages"][1]["content"].as_str().unwrap();
        assert!(user.contains("STORY ARC: a heist"));
        assert!(user.contains("Write the scene"));
        assert!(user.contains("1200 words"));
    }

    #[test]
    fn parse_response_extracts_text_and_usage() {
        let body = json!({
            "model": "served-model",
            "choices": [{ "message": { "content": "Generated prose." } }],
            "usage": { "prompt_tokens": 120, "completion_tokens": 450 },
        });
        let gen = adapter().parse_response(body).unwrap();
        assert_eq!(gen.text, "Generated prose.");
        assert_eq!(gen.provider, "testprov");
        assert_eq!(gen.model, "served-model");
        assert_eq!(gen.usage.input_tokens, 120);
        assert_eq!(gen.usage.output_tokens, 450);
    }

    #[test]
    fn parse_response_rejects_empty_completion() {
        let body = json!({ "choices": [{ "message": { "content": "  " } }] });
        let err = adapter().parse_response(body).unwrap_err();
        assert!(matches!(err, FableError::InvalidOutput { .. }));
    }
}
