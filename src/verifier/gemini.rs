use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::verifier::{Judge, JudgeError, JudgeRequest};

const API_KEY_HEADER: &str = "x-goog-api-key";
const ERROR_BODY_LIMIT: usize = 200;

/// Connection settings for the Gemini `generateContent` endpoint.
#[derive(Clone, Debug)]
pub struct GeminiSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: serde_json::Value,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Deserialize)]
struct ResponseCandidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Schema forcing the model to answer with exactly the verdict fields.
fn verdict_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "is_match": { "type": "BOOLEAN" },
            "confidence": { "type": "STRING", "enum": ["high", "medium", "low"] },
            "reasoning": { "type": "STRING" }
        },
        "required": ["is_match", "confidence", "reasoning"],
        "propertyOrdering": ["is_match", "confidence", "reasoning"]
    })
}

fn endpoint(base_url: &str, model: &str) -> Result<Url, JudgeError> {
    let mut base = base_url.to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Url::parse(&base)
        .and_then(|url| url.join(&format!("v1beta/models/{model}:generateContent")))
        .map_err(|error| JudgeError::Request(format!("invalid endpoint {base_url}: {error}")))
}

fn request_body(prompt: &str) -> Result<Vec<u8>, JudgeError> {
    let request = GenerateRequest {
        contents: vec![RequestContent {
            role: "user",
            parts: vec![RequestPart { text: prompt }],
        }],
        generation_config: GenerationConfig {
            response_mime_type: "application/json",
            response_schema: verdict_schema(),
        },
    };
    serde_json::to_vec(&request).map_err(|error| JudgeError::Request(error.to_string()))
}

/// Collects the text parts of the first candidate.
fn response_text(body: &str) -> Result<String, JudgeError> {
    let response: GenerateResponse =
        serde_json::from_str(body).map_err(|error| JudgeError::Malformed(error.to_string()))?;
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(JudgeError::EmptyResponse);
    }
    Ok(text)
}

/// [`Judge`] backed by Google's Gemini API.
pub struct GeminiJudge {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
}

impl GeminiJudge {
    pub fn new(settings: GeminiSettings) -> Result<Self, JudgeError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|error| JudgeError::Request(error.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint(&settings.base_url, &settings.model)?,
            api_key: settings.api_key,
        })
    }
}

#[async_trait]
impl Judge for GeminiJudge {
    async fn judge(&self, request: &JudgeRequest) -> Result<String, JudgeError> {
        let body = request_body(&request.prompt())?;

        let res = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(API_KEY_HEADER, &self.api_key)
            .body(body)
            .send()
            .await
            .map_err(|error| JudgeError::Request(error.to_string()))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|error| JudgeError::Request(error.to_string()))?;

        if !status.is_success() {
            return Err(JudgeError::Status {
                status: status.as_u16(),
                body: text.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }

        response_text(&text)
    }
}
