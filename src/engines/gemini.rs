//! Gemini vision engine
//!
//! Primary recognizer. Sends the document to the hosted Gemini
//! `generateContent` endpoint as inline base64 data and asks for a verbatim
//! transcription. The model returns no calibrated score, so a successful
//! transcription is reported at [`PRIMARY_CONFIDENCE`].

use crate::config::{ApiKey, PrimaryConfig};
use crate::confidence::PRIMARY_CONFIDENCE;
use crate::engine::{OcrMethod, OcrOutcome, OcrRequest, Recognizer};
use crate::error::RecognizerError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const OCR_PROMPT: &str = "Extract all text from this document exactly as written, \
preserving line breaks. Return only the extracted text, nothing else. \
If the document contains no text, return an empty response.";

/// Gemini-backed primary recognizer
pub struct GeminiEngine {
    client: reqwest::Client,
    api_key: Option<ApiKey>,
    model: String,
    endpoint: String,
    timeout: Duration,
}

impl GeminiEngine {
    pub fn new(config: &PrimaryConfig) -> Result<Self, RecognizerError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RecognizerError::Unavailable(format!("Failed to build HTTP client: {}", e)))?;

        if config.api_key.is_some() {
            tracing::info!("Gemini engine configured with model {}", config.model);
        } else {
            tracing::info!("No Gemini API key configured, primary OCR disabled");
        }

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            endpoint: config.endpoint.clone(),
            timeout: config.timeout,
        })
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }

    fn prompt(request: &OcrRequest) -> String {
        match request.options.lang.as_deref() {
            Some(lang) if !lang.trim().is_empty() => {
                format!("{} The text is in language '{}'.", OCR_PROMPT, lang.trim())
            }
            _ => OCR_PROMPT.to_string(),
        }
    }

    fn classify(&self, err: reqwest::Error) -> RecognizerError {
        if err.is_timeout() {
            RecognizerError::Timeout(self.timeout)
        } else {
            RecognizerError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl Recognizer for GeminiEngine {
    fn method(&self) -> OcrMethod {
        OcrMethod::Primary
    }

    fn name(&self) -> &'static str {
        "gemini"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn attempt(&self, request: &OcrRequest) -> Result<OcrOutcome, RecognizerError> {
        let api_key = self.api_key.as_ref().ok_or(RecognizerError::NotConfigured)?;

        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text {
                        text: Self::prompt(request),
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: request.content_type.clone(),
                            data: STANDARD.encode(&request.bytes),
                        },
                    },
                ],
            }],
        };

        tracing::debug!(
            "Calling Gemini {} with {} bytes of {}",
            self.model,
            request.bytes.len(),
            request.content_type
        );

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RecognizerError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let raw = response.text().await.map_err(|e| self.classify(e))?;
        let parsed: GenerateContentResponse = serde_json::from_str(&raw)
            .map_err(|e| RecognizerError::MalformedResponse(e.to_string()))?;

        let text = parsed.text().ok_or_else(|| {
            RecognizerError::MalformedResponse("response has no candidate text".to_string())
        })?;
        let text = strip_code_fence(&text);

        if text.trim().is_empty() {
            return Err(RecognizerError::EmptyResult);
        }

        Ok(OcrOutcome::from_text(
            OcrMethod::Primary,
            text,
            PRIMARY_CONFIDENCE,
        ))
    }
}

/// Unwrap a reply the model wrapped in a single ``` fence
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed
        .strip_prefix("```")
        .and_then(|rest| rest.strip_suffix("```"))
    else {
        return trimmed;
    };

    // Drop an optional info string such as ```text
    match inner.split_once('\n') {
        Some((info, body)) if info.chars().all(|c| c.is_ascii_lowercase()) => body.trim(),
        _ => inner.trim(),
    }
}

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text parts of the first candidate
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let parts: Vec<&str> = content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.concat())
        }
    }
}
