use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::GeminiConfig;
use crate::conversation::{ChatHistory, Message, Part};
use crate::error::MygeminiError;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: &'a [Message],
    system_instruction: SystemInstruction,
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

impl GenerateResponse {
    /// Concatenated text parts of the first candidate.
    fn text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

pub struct GeminiClient {
    client: reqwest::Client,
    url: String,
    model: String,
    system_instruction: String,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Result<Self, MygeminiError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "x-goog-api-key",
            reqwest::header::HeaderValue::from_str(config.api_key.trim())
                .map_err(|e| MygeminiError::Llm(format!("invalid API key: {}", e)))?,
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .default_headers(headers)
            .build()
            .map_err(|e| MygeminiError::Llm(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!(
                "{}/models/{}:generateContent",
                config.endpoint.trim_end_matches('/'),
                config.model
            ),
            model: config.model.clone(),
            system_instruction: config.system_instruction.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn generate(&self, history: &ChatHistory) -> Result<String, MygeminiError> {
        debug!("Sending {} messages to {}", history.len(), self.model);

        let request = GenerateRequest {
            contents: history.messages(),
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: self.system_instruction.clone(),
                }],
            },
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| MygeminiError::Llm(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|env| env.error.message)
                .unwrap_or_default();
            return Err(MygeminiError::Api(if detail.is_empty() {
                format!("status {}", status)
            } else {
                format!("status {}: {}", status, detail)
            }));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| MygeminiError::Llm(format!("failed to parse response: {}", e)))?;

        let text = body
            .text()
            .ok_or_else(|| MygeminiError::Llm("empty response".to_string()))?;

        debug!("Gemini answered with {} chars", text.chars().count());
        Ok(text)
    }
}
