use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use super::{GenerationError, Prompt, TextGenerator};

const MAX_TOKENS: u32 = 300;
const TEMPERATURE: f32 = 0.3;
const TOP_P: f32 = 0.9;

#[derive(Debug, Clone)]
pub struct TyphoonConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-style chat completions client for the Typhoon API.
#[derive(Clone)]
pub struct TyphoonClient {
    http_client: HttpClient,
    endpoint: Url,
    api_key: String,
    model: String,
}

impl TyphoonClient {
    pub fn new(config: TyphoonConfig) -> Result<Self, GenerationError> {
        let endpoint = Url::parse(&format!(
            "{}/chat/completions",
            config.base_url.trim_end_matches('/')
        ))
        .map_err(|e| GenerationError::Transport(format!("invalid base url: {}", e)))?;

        let http_client = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint,
            api_key: config.api_key,
            model: config.model,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl TextGenerator for TyphoonClient {
    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
            top_p: TOP_P,
        };

        let response = self
            .http_client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            log::warn!("Typhoon API error: {} - {}", status, error_text);
            return Err(status_error(status));
        }

        let raw = response.text().await.map_err(transport_error)?;
        parse_completion(&raw)
    }
}

fn transport_error(err: reqwest::Error) -> GenerationError {
    if err.is_timeout() {
        GenerationError::Timeout
    } else {
        GenerationError::Transport(err.to_string())
    }
}

fn status_error(status: StatusCode) -> GenerationError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        GenerationError::RateLimited
    } else {
        GenerationError::Status(status.as_u16())
    }
}

/// Text of the first choice, trimmed. Empty text counts as malformed.
fn parse_completion(raw: &str) -> Result<String, GenerationError> {
    let response: ChatResponse =
        serde_json::from_str(raw).map_err(|e| GenerationError::Malformed(e.to_string()))?;
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .unwrap_or_default();
    if content.is_empty() {
        return Err(GenerationError::Malformed("no completion text".to_string()));
    }
    Ok(content)
}
