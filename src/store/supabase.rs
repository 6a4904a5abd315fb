//! Supabase document store
//!
//! Talks to the PostgREST API of a Supabase project. Rows live in the
//! `documents` table with one column per [`ResolvedDocument`] field; the id
//! and timestamp are assigned here before the insert.

use super::{DocumentStore, ListQuery, NewDocument, ResolvedDocument};
use crate::config::ApiKey;
use crate::error::StoreError;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use uuid::Uuid;

const TABLE: &str = "documents";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct SupabaseStore {
    client: reqwest::Client,
    table_url: String,
    key: ApiKey,
}

impl SupabaseStore {
    pub fn new(url: &str, key: ApiKey) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Backend(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            table_url: format!("{}/rest/v1/{}", url.trim_end_matches('/'), TABLE),
            key,
        })
    }

    fn request(&self, method: Method) -> RequestBuilder {
        self.client
            .request(method, &self.table_url)
            .header("apikey", self.key.expose())
            .bearer_auth(self.key.expose())
    }

    async fn rows<T: DeserializeOwned>(request: RequestBuilder) -> Result<Vec<T>, StoreError> {
        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let response = check_status(response).await?;

        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }
}

async fn check_status(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Backend(format!("Supabase returned {}: {}", status, body)))
}

fn id_filter(id: Uuid) -> [(&'static str, String); 1] {
    [("id", format!("eq.{}", id))]
}

#[async_trait]
impl DocumentStore for SupabaseStore {
    fn kind(&self) -> &'static str {
        "supabase"
    }

    async fn create(&self, document: NewDocument) -> Result<ResolvedDocument, StoreError> {
        let resolved = document.into_resolved();
        tracing::info!("Saving document {} to Supabase", resolved.id);

        let rows: Vec<ResolvedDocument> = Self::rows(
            self.request(Method::POST)
                .header("Prefer", "return=representation")
                .json(&resolved),
        )
        .await?;

        // PostgREST echoes the inserted row
        let stored = rows
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Backend("insert returned no rows".to_string()))?;
        tracing::info!("Successfully saved document {} to database", stored.id);
        Ok(stored)
    }

    async fn get(&self, id: Uuid) -> Result<ResolvedDocument, StoreError> {
        let rows: Vec<ResolvedDocument> = Self::rows(
            self.request(Method::GET)
                .query(&[("select", "*")])
                .query(&id_filter(id)),
        )
        .await?;

        rows.into_iter().next().ok_or(StoreError::NotFound(id))
    }

    async fn list(&self, query: ListQuery) -> Result<Vec<ResolvedDocument>, StoreError> {
        let (limit, offset) = query.bounds();
        Self::rows(self.request(Method::GET).query(&[
            ("select", "*".to_string()),
            ("order", "created_at.desc".to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ]))
        .await
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let rows: Vec<serde_json::Value> = Self::rows(
            self.request(Method::DELETE)
                .header("Prefer", "return=representation")
                .query(&id_filter(id)),
        )
        .await?;

        if rows.is_empty() {
            return Err(StoreError::NotFound(id));
        }
        tracing::info!("Deleted document {} from Supabase", id);
        Ok(())
    }
}
