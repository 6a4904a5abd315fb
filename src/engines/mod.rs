//! OCR engine implementations
//!
//! The primary tier (Gemini) is always compiled; the local fallback tier is
//! conditionally compiled based on feature flags.

pub mod gemini;

#[cfg(feature = "engine-ocrs")]
pub mod ocrs;

use crate::config::Config;
use crate::engine::Recognizer;
use crate::error::RecognizerError;
use std::sync::Arc;

/// The two recognizers in priority order
pub struct Engines {
    pub primary: Arc<dyn Recognizer>,
    pub fallback: Arc<dyn Recognizer>,
}

impl Engines {
    /// Build both tiers from configuration
    pub fn new(config: &Config) -> Result<Self, RecognizerError> {
        let primary: Arc<dyn Recognizer> = Arc::new(gemini::GeminiEngine::new(&config.primary)?);
        let fallback = fallback_engine(config)?;

        Ok(Self { primary, fallback })
    }
}

#[cfg(feature = "engine-ocrs")]
fn fallback_engine(config: &Config) -> Result<Arc<dyn Recognizer>, RecognizerError> {
    tracing::info!("Initializing ocrs fallback engine...");
    Ok(Arc::new(ocrs::OcrsEngine::new(&config.fallback)?))
}

#[cfg(not(feature = "engine-ocrs"))]
fn fallback_engine(_config: &Config) -> Result<Arc<dyn Recognizer>, RecognizerError> {
    Err(RecognizerError::Unavailable(
        "No fallback OCR engine available. Build with --features engine-ocrs".to_string(),
    ))
}
