use crate::error::ExtractError;
use crate::models::{Field, RawFields};
use crate::scrapers::html::visible_text;
use crate::scrapers::traits::{Extractor, Page};
use crate::scrapers::types::LlmConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use scraper::Html;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str = "You extract real-estate listing details from web pages. \
Answer with a single JSON object and nothing else. Use null for anything the page does not state.";

/// Extractor backed by an OpenAI-compatible chat completions endpoint
pub struct LlmExtractor {
    client: Client,
    config: LlmConfig,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl LlmExtractor {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create LLM HTTP client")?;

        Ok(Self { client, config })
    }

    fn user_prompt(&self, page: &Page) -> String {
        let document = Html::parse_document(&page.content);
        let visible = visible_text(&document);
        let text = truncate_chars(&visible, self.config.max_input_chars);

        let keys = Field::ALL
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "Listing URL: {}\n\n\
             Return a JSON object with exactly these keys: {}.\n\
             price is an object {{\"amount\": number, \"unit\": ISO currency code}}. \
             lot_size keeps its unit, e.g. \"0.25 acres\". image_urls is an array of URLs.\n\n\
             Page text:\n{}",
            page.url, keys, text
        )
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract(&self, page: &Page) -> Result<RawFields, ExtractError> {
        let prompt = self.user_prompt(page);
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt,
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        debug!(model = %self.config.model, url = %page.url, "Requesting LLM extraction");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url.trim_end_matches('/')))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "LLM endpoint returned error status");
            return Err(ExtractError::Backend(format!("HTTP {}: {}", status, body)));
        }

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ExtractError::MalformedResponse("no choices in response".into()))?;

        parse_fields(&content)
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}

/// Models sometimes wrap the object in a markdown fence
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn parse_fields(content: &str) -> Result<RawFields, ExtractError> {
    match serde_json::from_str::<Value>(strip_code_fence(content))? {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(ExtractError::MalformedResponse(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
