//! Document persistence
//!
//! The resolver hands its result to a [`DocumentStore`]; the store owns the
//! record from then on. Records are immutable once created and can only be
//! deleted.

mod memory;
mod supabase;

pub use memory::MemoryStore;
pub use supabase::SupabaseStore;

use crate::config::StoreConfig;
use crate::engine::OcrMethod;
use crate::error::StoreError;
use crate::resolver::Resolution;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const MAX_LIST_LIMIT: usize = 100;

/// A resolved document that has not been stored yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub filename: String,
    pub extracted_text: String,
    pub confidence: f32,
    pub ocr_method: OcrMethod,
    /// Lowercase extension including the dot, e.g. ".png"
    pub file_type: String,
    pub file_size: u64,
}

impl NewDocument {
    pub fn from_resolution(
        resolution: &Resolution,
        filename: impl Into<String>,
        file_type: impl Into<String>,
        file_size: u64,
    ) -> Self {
        Self {
            filename: filename.into(),
            extracted_text: resolution.outcome.text.clone(),
            confidence: resolution.outcome.confidence,
            ocr_method: resolution.method(),
            file_type: file_type.into(),
            file_size,
        }
    }

    /// Assign identity; done exactly once, by the store
    fn into_resolved(self) -> ResolvedDocument {
        ResolvedDocument {
            id: Uuid::new_v4(),
            filename: self.filename,
            extracted_text: self.extracted_text,
            confidence: self.confidence,
            ocr_method: self.ocr_method,
            file_type: self.file_type,
            file_size: self.file_size,
            created_at: Utc::now(),
        }
    }
}

/// Persisted record of a successful resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedDocument {
    pub id: Uuid,
    pub filename: String,
    pub extracted_text: String,
    pub confidence: f32,
    pub ocr_method: OcrMethod,
    pub file_type: String,
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
}

/// Page through documents, newest first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ListQuery {
    /// Limit clamped to 1..=MAX_LIST_LIMIT and offset, with defaults applied
    pub fn bounds(&self) -> (usize, usize) {
        let limit = self
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);
        (limit, self.offset.unwrap_or(0))
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Backend identifier (e.g., "memory", "supabase")
    fn kind(&self) -> &'static str;

    async fn create(&self, document: NewDocument) -> Result<ResolvedDocument, StoreError>;

    async fn get(&self, id: Uuid) -> Result<ResolvedDocument, StoreError>;

    async fn list(&self, query: ListQuery) -> Result<Vec<ResolvedDocument>, StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
}

/// Build the configured store
pub fn from_config(config: &StoreConfig) -> Result<Arc<dyn DocumentStore>, StoreError> {
    match config {
        StoreConfig::Supabase { url, key } => {
            tracing::info!("Supabase document store configured at {}", url);
            Ok(Arc::new(SupabaseStore::new(url, key.clone())?))
        }
        StoreConfig::Memory => {
            tracing::warn!(
                "Supabase not configured (SUPABASE_URL and SUPABASE_KEY); documents are kept in memory only"
            );
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
