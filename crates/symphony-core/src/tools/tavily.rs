//! Tavily web-search tool client, exposing the `web_search` capability.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::warn;

use crate::error::LoopError;
use crate::tools::{Tool, caps};

const DEFAULT_BASE_URL: &str = "https://api.tavily.com";
const MAX_ATTEMPTS: u32 = 2;

pub struct TavilyTool {
    api_key: String,
    base_url: String,
    http: Client,
    max_results: u32,
}

impl TavilyTool {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            http,
            max_results: 5,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Tool for TavilyTool {
    fn name(&self) -> &str {
        "tavily"
    }

    fn capabilities(&self) -> &[&'static str] {
        &[caps::WEB_SEARCH]
    }

    async fn call(&self, capability: &str, input: Value) -> Result<Value, LoopError> {
        if capability != caps::WEB_SEARCH {
            return Err(LoopError::Tool {
                tool: "tavily".to_string(),
                message: format!("unsupported capability {capability:?}"),
            });
        }

        let query = input["query"].as_str().unwrap_or_default();
        let body = json!({
            "api_key": self.api_key,
            "query": query,
            "max_results": self.max_results,
        });

        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            let response = self
                .http
                .post(format!("{}/search", self.base_url))
                .json(&body)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let payload: Value = resp.json().await.map_err(|e| LoopError::Tool {
                        tool: "tavily".to_string(),
                        message: format!("malformed response body: {e}"),
                    })?;
                    let results: Vec<Value> = payload["results"]
                        .as_array()
                        .map(|items| {
                            items
                                .iter()
                                .map(|r| {
                                    json!({
                                        "title": r["title"].as_str().unwrap_or(""),
                                        "url": r["url"].as_str().unwrap_or(""),
                                        "snippet": r["content"].as_str().unwrap_or(""),
                                    })
                                })
                                .collect()
                        })
                        .unwrap_or_default();
                    return Ok(json!({"results": results}));
                }
                Ok(resp) => {
                    let status = resp.status();
                    last_error = format!("status {status}");
                    if status.is_client_error() && status.as_u16() != 429 {
                        break;
                    }
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            if attempt < MAX_ATTEMPTS {
                warn!(attempt, error = %last_error, "tavily call failed, retrying");
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }

        Err(LoopError::Tool {
            tool: "tavily".to_string(),
            message: last_error,
        })
    }

    async fn health_check(&self) -> Result<()> {
        let resp = self
            .http
            .get(&self.base_url)
            .send()
            .await
            .context("tavily api unreachable")?;
        if resp.status().is_server_error() {
            anyhow::bail!("tavily api returned {}", resp.status());
        }
        Ok(())
    }
}
