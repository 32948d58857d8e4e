//! Typed access to the collections the site uses.
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    error::BankError,
    store::{Document, DocumentStore, Fields},
};

pub const USERS: &str = "users";
pub const PRODUCTS: &str = "products";
pub const WORKERS: &str = "workers";
pub const CATEGORIES: &str = "categories";
pub const BLOGS: &str = "blogs";
pub const ORDERS: &str = "orders";

pub fn to_fields<T: Serialize>(value: &T) -> Result<Fields, BankError> {
    match serde_json::to_value(value)? {
        Value::Object(fields) => Ok(fields),
        other => Err(BankError::Codec(format!("expected an object, got {other}"))),
    }
}

pub async fn fetch<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
) -> Result<Option<Document<T>>, BankError> {
    store
        .get(collection, id)
        .await?
        .map(|raw| raw.decode())
        .transpose()
}

pub async fn fetch_all<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
) -> Result<Vec<Document<T>>, BankError> {
    store
        .list(collection)
        .await?
        .into_iter()
        .map(|raw| raw.decode())
        .collect()
}

pub async fn find<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    field: &str,
    value: impl Into<Value>,
) -> Result<Vec<Document<T>>, BankError> {
    store
        .find_eq(collection, field, &value.into())
        .await?
        .into_iter()
        .map(|raw| raw.decode())
        .collect()
}

pub async fn insert<T: Serialize>(
    store: &dyn DocumentStore,
    collection: &str,
    value: &T,
) -> Result<String, BankError> {
    store.create(collection, to_fields(value)?).await
}
