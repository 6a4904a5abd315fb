use crate::confidence;
use crate::error::RecognizerError;
use async_trait::async_trait;
use axum::body::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which tier produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrMethod {
    /// Externally hosted vision model
    #[serde(alias = "gemini")]
    Primary,
    /// Locally executed OCR engine
    #[serde(alias = "paddleocr")]
    Fallback,
}

impl OcrMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for OcrMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OcrMethod {
    type Err = String;

    /// Accepts the historical engine labels as well
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "primary" | "gemini" => Ok(Self::Primary),
            "fallback" | "paddleocr" => Ok(Self::Fallback),
            other => Err(format!("unknown OCR method: {}", other)),
        }
    }
}

/// Optional recognition flags supplied with an upload.
///
/// Absent or unknown keys leave the feature disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionOptions {
    /// OCR language code (e.g. "en", "fr")
    pub lang: Option<String>,
    /// Recognition model version requested by the caller
    pub ocr_version: Option<String>,
    pub use_doc_orientation_classify: bool,
    pub use_doc_unwarping: bool,
    pub use_textline_orientation: bool,
}

/// One document image to recognize
#[derive(Debug, Clone)]
pub struct OcrRequest {
    pub bytes: Bytes,
    pub content_type: String,
    pub options: RecognitionOptions,
}

impl OcrRequest {
    pub fn new(bytes: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
            options: RecognitionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RecognitionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn is_pdf(&self) -> bool {
        self.content_type == "application/pdf" || self.bytes.starts_with(b"%PDF-")
    }
}

/// A recognized line of text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextLine {
    pub text: String,
    pub confidence: f32,
    /// Corner points in pixel coordinates, clockwise from top-left
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polygon: Option<Vec<[f32; 2]>>,
}

impl TextLine {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence: confidence::clamp_unit(confidence),
            polygon: None,
        }
    }

    pub fn with_polygon(mut self, polygon: Vec<[f32; 2]>) -> Self {
        self.polygon = Some(polygon);
        self
    }
}

/// Normalized result of one recognition attempt
#[derive(Debug, Clone, PartialEq)]
pub struct OcrOutcome {
    pub text: String,
    pub confidence: f32,
    pub lines: Vec<TextLine>,
    pub method: OcrMethod,
    pub warnings: Vec<String>,
}

impl OcrOutcome {
    /// Outcome of an engine that only reports aggregate text
    pub fn from_text(method: OcrMethod, text: impl AsRef<str>, confidence: f32) -> Self {
        Self {
            text: text.as_ref().trim().to_string(),
            confidence: confidence::clamp_unit(confidence),
            lines: Vec::new(),
            method,
            warnings: Vec::new(),
        }
    }

    /// Outcome of a line-level engine; text and confidence derive from the lines.
    ///
    /// Zero lines is a blank page: empty text, confidence per [`confidence::aggregate`].
    pub fn from_lines(method: OcrMethod, lines: Vec<TextLine>) -> Self {
        let lines: Vec<TextLine> = lines
            .into_iter()
            .map(|line| TextLine {
                text: line.text.trim().to_string(),
                confidence: confidence::clamp_unit(line.confidence),
                polygon: line.polygon,
            })
            .filter(|line| !line.text.is_empty())
            .collect();

        let text = lines
            .iter()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let confidence = confidence::aggregate(lines.iter().map(|line| line.confidence));

        Self {
            text,
            confidence,
            lines,
            method,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }
}

/// Capability shared by every OCR tier
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Tier this recognizer reports results as
    fn method(&self) -> OcrMethod;

    /// Backend identifier (e.g., "gemini", "ocrs")
    fn name(&self) -> &'static str;

    /// False when the recognizer cannot run at all (e.g. no credential)
    fn is_configured(&self) -> bool {
        true
    }

    /// Recognize the text in one document
    async fn attempt(&self, request: &OcrRequest) -> Result<OcrOutcome, RecognizerError>;
}
