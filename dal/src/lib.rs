//! Data access layer for per-asset metadata records.
//!
//! The database core only relies on two operations of the underlying document
//! store: inserting a record and looking records up through an indexed field
//! (`hash` at minimum). Everything else about the store is a host concern.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document};
use tokio::sync::Mutex;

/// Store of per-asset metadata documents.
#[async_trait]
pub trait DocumentStore: 'static + fmt::Debug + Send + Sync {
    async fn insert_one(&self, doc: Document) -> anyhow::Result<()>;

    /// Finds all documents whose `field` equals `value`. `field` must be
    /// indexed by the store; the core only queries `hash`.
    async fn find_by_index(&self, field: &str, value: &Bson) -> anyhow::Result<Vec<Document>>;
}

#[async_trait]
impl<T: DocumentStore + ?Sized> DocumentStore for Arc<T> {
    async fn insert_one(&self, doc: Document) -> anyhow::Result<()> {
        (**self).insert_one(doc).await
    }

    async fn find_by_index(&self, field: &str, value: &Bson) -> anyhow::Result<Vec<Document>> {
        (**self).find_by_index(field, value).await
    }
}

/// In-memory document store used by workers in tests and by the import
/// pipeline's integration suite.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    docs: Mutex<Vec<Document>>,
}

impl MemoryDocumentStore {
    pub async fn len(&self) -> usize {
        self.docs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.lock().await.is_empty()
    }

    pub async fn all(&self) -> Vec<Document> {
        self.docs.lock().await.clone()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn insert_one(&self, doc: Document) -> anyhow::Result<()> {
        self.docs.lock().await.push(doc);
        Ok(())
    }

    async fn find_by_index(&self, field: &str, value: &Bson) -> anyhow::Result<Vec<Document>> {
        let docs = self.docs.lock().await;
        Ok(docs
            .iter()
            .filter(|doc| doc.get(field) == Some(value))
            .cloned()
            .collect())
    }
}
