use super::{DocumentStore, ListQuery, NewDocument, ResolvedDocument};
use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

/// Process-local store, used when no database is configured
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<Vec<ResolvedDocument>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, document: NewDocument) -> Result<ResolvedDocument, StoreError> {
        let resolved = document.into_resolved();
        self.documents.write().push(resolved.clone());
        tracing::debug!("Stored document {} in memory", resolved.id);
        Ok(resolved)
    }

    async fn get(&self, id: Uuid) -> Result<ResolvedDocument, StoreError> {
        self.documents
            .read()
            .iter()
            .find(|doc| doc.id == id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list(&self, query: ListQuery) -> Result<Vec<ResolvedDocument>, StoreError> {
        let (limit, offset) = query.bounds();
        let documents = self.documents.read();

        // Newest insert first among equal timestamps
        let mut ordered: Vec<&ResolvedDocument> = documents.iter().rev().collect();
        ordered.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(ordered
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let mut documents = self.documents.write();
        let index = documents
            .iter()
            .position(|doc| doc.id == id)
            .ok_or(StoreError::NotFound(id))?;
        documents.remove(index);
        Ok(())
    }
}
