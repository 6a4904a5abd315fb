//! Two-tier OCR resolution
//!
//! Tiers are tried strictly in order, one at a time, and the first success
//! wins. A tier without credentials is skipped quietly; any other tier
//! failure is logged and the next tier is tried. When every tier has failed
//! the caller gets [`ResolveError::Exhausted`] carrying each tier's reason.
//!
//! The resolver never persists anything. Dropping the returned future stops
//! waiting on the active tier; network calls are cancelled with it, while
//! blocking engine work runs to completion on its own thread.

use crate::confidence;
use crate::engine::{OcrMethod, OcrOutcome, OcrRequest, Recognizer};
use crate::error::{RecognizerError, ResolveError, TierFailure};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One position in the fallback chain
#[derive(Clone)]
pub struct Tier {
    recognizer: Arc<dyn Recognizer>,
    timeout: Option<Duration>,
}

impl Tier {
    pub fn new(recognizer: Arc<dyn Recognizer>) -> Self {
        Self {
            recognizer,
            timeout: None,
        }
    }

    /// Bound how long this tier may take before it counts as failed
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn attempt(&self, request: &OcrRequest) -> Result<OcrOutcome, RecognizerError> {
        let attempt = self.recognizer.attempt(request);
        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .unwrap_or(Err(RecognizerError::Timeout(limit))),
            None => attempt.await,
        }?;

        validate(outcome, self.recognizer.method())
    }
}

/// Successful resolution
#[derive(Debug, Clone)]
pub struct Resolution {
    pub outcome: OcrOutcome,
    /// Tiers tried before the winning one, with their reasons
    pub skipped: Vec<TierFailure>,
    pub elapsed: Duration,
}

impl Resolution {
    pub fn method(&self) -> OcrMethod {
        self.outcome.method
    }
}

/// Public description of a tier
#[derive(Debug, Clone, Serialize)]
pub struct TierInfo {
    pub method: OcrMethod,
    pub engine: &'static str,
    pub configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Ordered fallback chain of recognizers
pub struct OcrResolver {
    tiers: Vec<Tier>,
}

impl OcrResolver {
    /// Primary (bounded by `primary_timeout`) then fallback
    pub fn new(
        primary: Arc<dyn Recognizer>,
        fallback: Arc<dyn Recognizer>,
        primary_timeout: Duration,
    ) -> Self {
        Self::with_tiers(vec![
            Tier::new(primary).with_timeout(primary_timeout),
            Tier::new(fallback),
        ])
    }

    pub fn with_tiers(tiers: Vec<Tier>) -> Self {
        Self { tiers }
    }

    pub fn tiers(&self) -> Vec<TierInfo> {
        self.tiers
            .iter()
            .map(|tier| TierInfo {
                method: tier.recognizer.method(),
                engine: tier.recognizer.name(),
                configured: tier.recognizer.is_configured(),
                timeout_ms: tier.timeout.map(|t| t.as_millis() as u64),
            })
            .collect()
    }

    /// Recognize `request` with the first tier that succeeds
    pub async fn resolve(&self, request: &OcrRequest) -> Result<Resolution, ResolveError> {
        let start = Instant::now();
        let mut failures = Vec::new();

        for tier in &self.tiers {
            let method = tier.recognizer.method();
            let engine = tier.recognizer.name();

            if !tier.recognizer.is_configured() {
                tracing::info!("{} OCR ({}) not configured, skipping", method, engine);
                failures.push(TierFailure {
                    method,
                    error: RecognizerError::NotConfigured,
                });
                continue;
            }

            match tier.attempt(request).await {
                Ok(outcome) => {
                    let elapsed = start.elapsed();
                    tracing::info!(
                        "OCR resolved by {} ({}) in {}ms, confidence: {:.2}, text length: {}",
                        method,
                        engine,
                        elapsed.as_millis(),
                        outcome.confidence,
                        outcome.text.len()
                    );
                    return Ok(Resolution {
                        outcome,
                        skipped: failures,
                        elapsed,
                    });
                }
                Err(error) => {
                    if error.is_not_configured() {
                        tracing::info!("{} OCR ({}) not configured, skipping", method, engine);
                    } else {
                        tracing::warn!("{} OCR ({}) failed: {}, trying next", method, engine, error);
                    }
                    failures.push(TierFailure { method, error });
                }
            }
        }

        let err = ResolveError::Exhausted { failures };
        tracing::error!("OCR failed after {}ms: {}", start.elapsed().as_millis(), err);
        Err(err)
    }
}

/// Normalize an outcome and tag it with the tier that produced it.
///
/// An empty primary result is a failure so the next tier gets a chance; an
/// empty fallback result is a blank page.
fn validate(mut outcome: OcrOutcome, method: OcrMethod) -> Result<OcrOutcome, RecognizerError> {
    outcome.method = method;
    outcome.text = outcome.text.trim().to_string();
    outcome.confidence = confidence::clamp_unit(outcome.confidence);
    for line in &mut outcome.lines {
        line.confidence = confidence::clamp_unit(line.confidence);
    }

    if method == OcrMethod::Primary && outcome.text.is_empty() {
        return Err(RecognizerError::EmptyResult);
    }

    Ok(outcome)
}
