//! In-process backends for development mode and tests.
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    error::BankError,
    storage::{ObjectStorage, StoredObject},
    store::{DocumentStore, Fields, RawDocument},
};

/// Clones share the same documents.
#[derive(Clone, Default)]
pub struct MemoryStore {
    collections: Arc<RwLock<HashMap<String, BTreeMap<String, Fields>>>>,
}

impl MemoryStore {
    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn authorized(&self, _id_token: &str) -> Arc<dyn DocumentStore> {
        Arc::new(self.clone())
    }

    async fn create(&self, collection: &str, fields: Fields) -> Result<String, BankError> {
        let id = Uuid::new_v4().simple().to_string();

        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), fields);

        Ok(id)
    }

    async fn set(&self, collection: &str, id: &str, fields: Fields) -> Result<(), BankError> {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields);

        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<RawDocument>, BankError> {
        let collections = self.collections.read().await;

        Ok(collections
            .get(collection)
            .and_then(|documents| documents.get(id))
            .map(|fields| RawDocument {
                id: id.to_string(),
                fields: fields.clone(),
            }))
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), BankError> {
        let mut collections = self.collections.write().await;

        let existing = collections
            .get_mut(collection)
            .and_then(|documents| documents.get_mut(id))
            .ok_or_else(|| BankError::not_found(collection, id))?;
        existing.extend(fields);

        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), BankError> {
        if let Some(documents) = self.collections.write().await.get_mut(collection) {
            documents.remove(id);
        }

        Ok(())
    }

    async fn list(&self, collection: &str) -> Result<Vec<RawDocument>, BankError> {
        let collections = self.collections.read().await;

        Ok(collections
            .get(collection)
            .map(|documents| {
                documents
                    .iter()
                    .map(|(id, fields)| RawDocument {
                        id: id.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_eq(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<RawDocument>, BankError> {
        Ok(self
            .list(collection)
            .await?
            .into_iter()
            .filter(|document| document.fields.get(field) == Some(value))
            .collect())
    }
}

#[derive(Clone)]
pub struct MemoryStorage {
    base_url: String,
    objects: Arc<RwLock<HashMap<String, (String, Bytes)>>>,
}

impl MemoryStorage {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            objects: Arc::default(),
        }
    }

    /// Content type and bytes stored at `path`.
    pub async fn get(&self, path: &str) -> Option<(String, Bytes)> {
        self.objects.read().await.get(path).cloned()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new("memory://objects")
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    fn authorized(&self, _id_token: &str) -> Arc<dyn ObjectStorage> {
        Arc::new(self.clone())
    }

    async fn upload(
        &self,
        path: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<StoredObject, BankError> {
        self.objects
            .write()
            .await
            .insert(path.to_string(), (content_type.to_string(), bytes));

        Ok(StoredObject {
            path: path.to_string(),
            download_url: format!("{}/{path}", self.base_url),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::collections::to_fields;

    fn fields(value: Value) -> Fields {
        to_fields(&value).unwrap()
    }

    #[tokio::test]
    async fn test_update_merges_and_requires_existing() {
        let store = MemoryStore::default();
        let id = store
            .create("workers", fields(json!({"name": "Ana", "phone": "1"})))
            .await
            .unwrap();

        store
            .update("workers", &id, fields(json!({"phone": "2"})))
            .await
            .unwrap();
        let document = store.get("workers", &id).await.unwrap().unwrap();
        assert_eq!(Value::Object(document.fields), json!({"name": "Ana", "phone": "2"}));

        let missing = store.update("workers", "nope", Fields::new()).await;
        assert!(matches!(missing, Err(BankError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_find_eq() {
        let store = MemoryStore::default();
        store
            .create("blogs", fields(json!({"slug": "a"})))
            .await
            .unwrap();
        store
            .create("blogs", fields(json!({"slug": "b"})))
            .await
            .unwrap();

        let found = store.find_eq("blogs", "slug", &json!("b")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].fields["slug"], json!("b"));
    }

    #[tokio::test]
    async fn test_authorized_handle_shares_documents() {
        let store = MemoryStore::default();
        let id = store
            .authorized("token")
            .create("workers", fields(json!({"name": "Ana"})))
            .await
            .unwrap();

        assert!(store.get("workers", &id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_storage_urls() {
        let storage = MemoryStorage::new("http://localhost:1111/uploads/");
        let stored = storage
            .upload("workers/a.png", "image/png", Bytes::from_static(b"png"))
            .await
            .unwrap();

        assert_eq!(stored.download_url, "http://localhost:1111/uploads/workers/a.png");
        assert_eq!(storage.get("workers/a.png").await.unwrap().0, "image/png");
    }
}
