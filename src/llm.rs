//! OpenAI chat completions as the assistant's language model.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::OpenAiConfig;
use crate::error::{Error, Result};
use crate::ports::LanguageModel;
use crate::prompting::{render_system_prompt, split_units, SystemPromptContext};

pub struct OpenAiModel {
    http: reqwest::Client,
    config: OpenAiConfig,
    agency_name: String,
    agency_notes: String,
    max_windows: usize,
}

impl OpenAiModel {
    pub fn new(
        http: reqwest::Client,
        config: OpenAiConfig,
        agency_name: String,
        agency_notes: String,
        max_windows: usize,
    ) -> Self {
        Self {
            http,
            config,
            agency_name,
            agency_notes,
            max_windows,
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    async fn converse(
        &self,
        recipient: &str,
        combined_text: &str,
        display_name: &str,
    ) -> Result<Vec<String>> {
        if self.config.api_key.trim().is_empty() {
            return Err(Error::Config("OPENAI_API_KEY not configured".to_string()));
        }
        let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
        let system = render_system_prompt(&SystemPromptContext {
            agency_name: &self.agency_name,
            customer_name: display_name,
            today: &today,
            max_windows: self.max_windows,
            agency_notes: &self.agency_notes,
        });

        let response = self
            .http
            .post(format!(
                "{}/chat/completions",
                self.config.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "model": self.config.model,
                "messages": [
                    { "role": "system", "content": system },
                    { "role": "user", "content": combined_text }
                ],
                "temperature": 0.4
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream {
                service: "openai",
                status,
                body,
            });
        }
        let payload = response.json::<Value>().await?;
        let content = payload
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|msg| msg.get("content"))
            .and_then(Value::as_str)
            .unwrap_or("");
        let units = split_units(content);
        debug!(recipient = %recipient, units = units.len(), "model completion received");
        Ok(units)
    }
}
