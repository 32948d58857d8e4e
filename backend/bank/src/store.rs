use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::BankError;

pub type Fields = Map<String, Value>;

/// Untyped document as the store hands it back.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDocument {
    pub id: String,
    pub fields: Fields,
}

impl RawDocument {
    pub fn decode<T: DeserializeOwned>(self) -> Result<Document<T>, BankError> {
        let data = serde_json::from_value(Value::Object(self.fields))?;

        Ok(Document { id: self.id, data })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document<T> {
    pub id: String,
    pub data: T,
}

/// Collection-scoped document CRUD.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// A handle that sends requests on behalf of the user holding `id_token`.
    fn authorized(&self, id_token: &str) -> Arc<dyn DocumentStore>;

    /// Creates a document with a store-generated id and returns that id.
    async fn create(&self, collection: &str, fields: Fields) -> Result<String, BankError>;

    /// Creates or replaces the document at `id`.
    async fn set(&self, collection: &str, id: &str, fields: Fields) -> Result<(), BankError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<RawDocument>, BankError>;

    /// Merges `fields` into an existing document; [`BankError::NotFound`] if absent.
    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), BankError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), BankError>;

    async fn list(&self, collection: &str) -> Result<Vec<RawDocument>, BankError>;

    async fn find_eq(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<RawDocument>, BankError>;
}
