//! Claude tool client.
//!
//! Wraps Anthropic's Messages API behind the [`Tool`] trait, exposing
//! the `reasoning`, `vision` and `synthesis` capabilities. The adapter
//! asks the model for a small JSON object and normalizes whatever comes
//! back into the payload shape instruments expect; replies that are not
//! valid JSON degrade to plain text with a conservative confidence.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::warn;

use crate::error::LoopError;
use crate::tools::{Tool, caps};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const MAX_ATTEMPTS: u32 = 3;

pub struct ClaudeTool {
    api_key: String,
    model: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
}

impl ClaudeTool {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            http,
            max_tokens: 2048,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// One Messages API round trip, retried on transient failures
    /// (timeouts, 429, 5xx) with a short backoff.
    async fn complete(&self, system: &str, content: Value) -> Result<String, LoopError> {
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system,
            "messages": [{"role": "user", "content": content}],
        });

        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            let response = self
                .http
                .post(format!("{}/v1/messages", self.base_url))
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let payload: Value = resp.json().await.map_err(|e| LoopError::Tool {
                        tool: "claude".to_string(),
                        message: format!("malformed response body: {e}"),
                    })?;
                    let text = payload["content"]
                        .as_array()
                        .and_then(|blocks| {
                            blocks
                                .iter()
                                .find_map(|b| b["text"].as_str().map(str::to_owned))
                        })
                        .unwrap_or_default();
                    return Ok(text);
                }
                Ok(resp) => {
                    let status = resp.status();
                    let detail = resp.text().await.unwrap_or_default();
                    last_error = format!("status {status}: {detail}");
                    // Client errors other than rate limiting will not
                    // improve on retry.
                    if status.is_client_error() && status.as_u16() != 429 {
                        break;
                    }
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            if attempt < MAX_ATTEMPTS {
                warn!(attempt, error = %last_error, "claude call failed, retrying");
                tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
            }
        }

        Err(LoopError::Tool {
            tool: "claude".to_string(),
            message: last_error,
        })
    }

    /// Parse the model's reply into the normalized payload. Expects a
    /// JSON object; anything else becomes `{text, confidence: 0.6}`.
    fn normalize(text: &str) -> Value {
        let trimmed = text.trim();
        let candidate = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .map(|s| s.trim_end_matches("```").trim())
            .unwrap_or(trimmed);

        match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(map)) => {
                let mut obj = Value::Object(map);
                if obj.get("text").is_none() {
                    if let Some(summary) = obj.get("summary").cloned() {
                        obj["text"] = summary;
                    }
                }
                if !obj["confidence"].is_number() {
                    obj["confidence"] = json!(0.6);
                }
                obj
            }
            _ => json!({"text": trimmed, "confidence": 0.6}),
        }
    }

    fn image_blocks(images: &Value) -> Vec<Value> {
        let Some(items) = images.as_array() else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|img| {
                if let Some(url) = img["url"].as_str() {
                    Some(json!({
                        "type": "image",
                        "source": {"type": "url", "url": url},
                    }))
                } else {
                    img["data"].as_str().map(|data| {
                        json!({
                            "type": "image",
                            "source": {
                                "type": "base64",
                                "media_type": img["media_type"].as_str().unwrap_or("image/png"),
                                "data": data,
                            },
                        })
                    })
                }
            })
            .collect()
    }
}

#[async_trait]
impl Tool for ClaudeTool {
    fn name(&self) -> &str {
        "claude"
    }

    fn capabilities(&self) -> &[&'static str] {
        &[caps::REASONING, caps::VISION, caps::SYNTHESIS]
    }

    async fn call(&self, capability: &str, input: Value) -> Result<Value, LoopError> {
        let text = match capability {
            caps::REASONING => {
                let prompt = input["prompt"].as_str().unwrap_or_default();
                let mode = input["mode"].as_str().unwrap_or("answer");
                let system = format!(
                    "You are a {mode} step inside an iterative research loop. \
                     Reply with a single JSON object: {{\"text\": string, \
                     \"confidence\": number 0..1, \"sources\": [string], \
                     \"spawn\": [string], \"contradiction\": string|null}}. \
                     Omit fields you have nothing for."
                );
                self.complete(&system, json!(prompt)).await?
            }
            caps::VISION => {
                let prompt = input["prompt"].as_str().unwrap_or("Describe the image.");
                let mut content = Self::image_blocks(&input["images"]);
                content.push(json!({"type": "text", "text": prompt}));
                let system = "Answer about the supplied images. Reply with a single JSON \
                              object: {\"text\": string, \"confidence\": number 0..1}.";
                self.complete(system, Value::Array(content)).await?
            }
            caps::SYNTHESIS => {
                let prompt = format!(
                    "Merge these findings into one answer for the query {:?}. \
                     Note any contradiction between them. Reply with a single JSON object: \
                     {{\"summary\": string, \"confidence\": number 0..1, \
                     \"discrepancy\": string|null}}.\n\nFindings:\n{}",
                    input["query"].as_str().unwrap_or_default(),
                    serde_json::to_string_pretty(&input["results"]).unwrap_or_default(),
                );
                self.complete("You merge research results.", json!(prompt))
                    .await?
            }
            other => {
                return Err(LoopError::Tool {
                    tool: "claude".to_string(),
                    message: format!("unsupported capability {other:?}"),
                });
            }
        };

        Ok(Self::normalize(&text))
    }

    async fn health_check(&self) -> Result<()> {
        // Cheap reachability probe; an auth failure is still "reachable".
        let resp = self
            .http
            .get(format!("{}/v1/models", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await
            .context("anthropic api unreachable")?;
        if resp.status().is_server_error() {
            anyhow::bail!("anthropic api returned {}", resp.status());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_parses_json_object() {
        let out = ClaudeTool::normalize(r#"{"text": "answer", "confidence": 0.9}"#);
        assert_eq!(out["text"], "answer");
        assert_eq!(out["confidence"], 0.9);
    }

    #[test]
    fn normalize_strips_code_fences() {
        let out = ClaudeTool::normalize("```json\n{\"text\": \"fenced\", \"confidence\": 0.8}\n```");
        assert_eq!(out["text"], "fenced");
    }

    #[test]
    fn normalize_falls_back_to_plain_text() {
        let out = ClaudeTool::normalize("just a sentence");
        assert_eq!(out["text"], "just a sentence");
        assert_eq!(out["confidence"], 0.6);
    }

    #[test]
    fn normalize_promotes_summary_to_text() {
        let out = ClaudeTool::normalize(r#"{"summary": "merged", "confidence": 0.7}"#);
        assert_eq!(out["text"], "merged");
        assert_eq!(out["summary"], "merged");
    }
}
