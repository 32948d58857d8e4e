//! # Firestore
//!
//! REST client for the managed document store.
//!
//! Documents travel as typed values (`stringValue`, `integerValue`, `mapValue`, ...). The codec
//! below flattens them into plain JSON on the way in and rebuilds them on the way out, so the
//! rest of the crate only ever sees [`Fields`].
//!
//! ## Endpoints
//! - `POST   {documents}/{collection}`: create with generated id
//! - `PATCH  {documents}/{collection}/{id}`: set, or merge with an update mask
//! - `GET    {documents}/{collection}/{id}`: read
//! - `DELETE {documents}/{collection}/{id}`: delete
//! - `POST   {documents}:runQuery`: equality queries
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::{Number, Value, json};
use tracing::debug;

use crate::{
    error::BankError,
    store::{DocumentStore, Fields, RawDocument},
    timestamp::Timestamp,
};

const FIRESTORE_ROOT: &str = "https://firestore.googleapis.com/v1";
const PAGE_SIZE: &str = "300";

#[derive(Clone)]
pub struct Firestore {
    client: Client,
    documents_url: String,
    api_key: String,
    id_token: Option<String>,
}

impl Firestore {
    pub fn new(client: Client, project_id: &str, api_key: &str) -> Self {
        Self {
            client,
            documents_url: format!(
                "{FIRESTORE_ROOT}/projects/{project_id}/databases/(default)/documents"
            ),
            api_key: api_key.to_string(),
            id_token: None,
        }
    }

    /// Same store, with requests carrying `id_token` as a bearer credential.
    pub fn with_id_token(&self, id_token: &str) -> Self {
        Self {
            id_token: Some(id_token.to_string()),
            ..self.clone()
        }
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let request = self.client.request(method, url);

        match &self.id_token {
            Some(id_token) => request.bearer_auth(id_token),
            None => request,
        }
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{collection}/{id}", self.documents_url)
    }
}

#[async_trait]
impl DocumentStore for Firestore {
    fn authorized(&self, id_token: &str) -> Arc<dyn DocumentStore> {
        Arc::new(self.with_id_token(id_token))
    }

    async fn create(&self, collection: &str, fields: Fields) -> Result<String, BankError> {
        let response = self
            .request(Method::POST, format!("{}/{collection}", self.documents_url))
            .query(&[("key", &self.api_key)])
            .json(&json!({ "fields": encode_fields(&fields) }))
            .send()
            .await?;

        let document = decode_document(&check(response).await?.json::<Value>().await?)?;
        debug!("Created {collection}/{}", document.id);

        Ok(document.id)
    }

    async fn set(&self, collection: &str, id: &str, fields: Fields) -> Result<(), BankError> {
        let response = self
            .request(Method::PATCH, self.document_url(collection, id))
            .query(&[("key", &self.api_key)])
            .json(&json!({ "fields": encode_fields(&fields) }))
            .send()
            .await?;

        check(response).await?;
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<RawDocument>, BankError> {
        let response = self
            .request(Method::GET, self.document_url(collection, id))
            .query(&[("key", &self.api_key)])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = check(response).await?.json::<Value>().await?;
        decode_document(&body).map(Some)
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), BankError> {
        let mut query: Vec<(&str, &str)> = vec![
            ("key", self.api_key.as_str()),
            ("currentDocument.exists", "true"),
        ];
        query.extend(fields.keys().map(|key| ("updateMask.fieldPaths", key.as_str())));

        let response = self
            .request(Method::PATCH, self.document_url(collection, id))
            .query(&query)
            .json(&json!({ "fields": encode_fields(&fields) }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(BankError::not_found(collection, id));
        }

        check(response).await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), BankError> {
        let response = self
            .request(Method::DELETE, self.document_url(collection, id))
            .query(&[("key", &self.api_key)])
            .send()
            .await?;

        check(response).await?;
        Ok(())
    }

    async fn list(&self, collection: &str) -> Result<Vec<RawDocument>, BankError> {
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("key", self.api_key.clone()),
                ("pageSize", PAGE_SIZE.to_string()),
            ];
            if let Some(token) = page_token.take() {
                query.push(("pageToken", token));
            }

            let response = self
                .request(Method::GET, format!("{}/{collection}", self.documents_url))
                .query(&query)
                .send()
                .await?;
            let page = check(response).await?.json::<Value>().await?;

            if let Some(items) = page.get("documents").and_then(Value::as_array) {
                for item in items {
                    documents.push(decode_document(item)?);
                }
            }

            match page.get("nextPageToken").and_then(Value::as_str) {
                Some(token) if !token.is_empty() => page_token = Some(token.to_string()),
                _ => break,
            }
        }

        Ok(documents)
    }

    async fn find_eq(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<RawDocument>, BankError> {
        let query = json!({
            "structuredQuery": {
                "from": [{ "collectionId": collection }],
                "where": {
                    "fieldFilter": {
                        "field": { "fieldPath": field },
                        "op": "EQUAL",
                        "value": encode_value(value),
                    }
                }
            }
        });

        let response = self
            .request(Method::POST, format!("{}:runQuery", self.documents_url))
            .query(&[("key", &self.api_key)])
            .json(&query)
            .send()
            .await?;
        let rows = check(response).await?.json::<Vec<Value>>().await?;

        rows.iter()
            .filter_map(|row| row.get("document"))
            .map(decode_document)
            .collect()
    }
}

async fn check(response: Response) -> Result<Response, BankError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(BankError::Status {
        status: status.as_u16(),
        body,
    })
}

pub fn encode_fields(fields: &Fields) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(key, value)| (key.clone(), encode_value(value)))
            .collect(),
    )
}

pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(flag) => json!({ "booleanValue": flag }),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => json!({ "integerValue": integer.to_string() }),
            None => json!({ "doubleValue": number.as_f64() }),
        },
        Value::String(text) => json!({ "stringValue": text }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Object(map) => match Timestamp::is_literal(map)
            .then(|| Timestamp::from_value(value))
            .flatten()
        {
            Some(timestamp) => json!({ "timestampValue": timestamp.to_rfc3339() }),
            None => json!({ "mapValue": { "fields": encode_fields(map) } }),
        },
    }
}

pub fn decode_document(document: &Value) -> Result<RawDocument, BankError> {
    let name = document
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| BankError::Codec("document without a name".to_string()))?;
    let id = name.rsplit('/').next().unwrap_or(name).to_string();

    Ok(RawDocument {
        id,
        fields: decode_fields(document.get("fields"))?,
    })
}

fn decode_fields(fields: Option<&Value>) -> Result<Fields, BankError> {
    let Some(fields) = fields.and_then(Value::as_object) else {
        return Ok(Fields::new());
    };

    fields
        .iter()
        .map(|(key, value)| Ok((key.clone(), decode_value(value)?)))
        .collect()
}

pub fn decode_value(value: &Value) -> Result<Value, BankError> {
    let Some((kind, inner)) = value.as_object().and_then(|typed| typed.iter().next()) else {
        return Err(BankError::Codec(format!("untyped value {value}")));
    };

    match kind.as_str() {
        "nullValue" => Ok(Value::Null),
        "booleanValue" | "doubleValue" | "stringValue" | "referenceValue" | "bytesValue"
        | "geoPointValue" => Ok(inner.clone()),
        "integerValue" => {
            let integer = match inner {
                Value::String(text) => text.parse::<i64>().ok(),
                other => other.as_i64(),
            };

            integer
                .map(|integer| Value::Number(Number::from(integer)))
                .ok_or_else(|| BankError::Codec(format!("bad integer {inner}")))
        }
        "timestampValue" => {
            let timestamp = Timestamp::from_value(inner)
                .ok_or_else(|| BankError::Codec(format!("bad timestamp {inner}")))?;

            Ok(serde_json::to_value(timestamp)?)
        }
        "arrayValue" => inner
            .get("values")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(decode_value).collect::<Result<Vec<_>, _>>())
            .transpose()
            .map(|items| Value::Array(items.unwrap_or_default())),
        "mapValue" => decode_fields(inner.get("fields")).map(Value::Object),
        other => Err(BankError::Codec(format!("unsupported value type {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_requests_carry_id_token() {
        let store = Firestore::new(Client::new(), "hillsgo", "api-key");

        let anonymous = store
            .request(Method::GET, store.document_url("workers", "w1"))
            .build()
            .unwrap();
        assert!(anonymous.headers().get("authorization").is_none());

        let request = store
            .with_id_token("token-1")
            .request(Method::GET, store.document_url("workers", "w1"))
            .build()
            .unwrap();
        assert_eq!(request.headers()["authorization"], "Bearer token-1");
        assert!(request.url().path().ends_with("/documents/workers/w1"));
    }

    #[test]
    fn test_decode_document() {
        let raw = json!({
            "name": "projects/p/databases/(default)/documents/workers/abc123",
            "fields": {
                "name": { "stringValue": "Ana" },
                "jobs": { "integerValue": "12" },
                "rating": { "doubleValue": 4.5 },
                "verified": { "booleanValue": true },
                "created_at": { "timestampValue": "2024-05-01T00:00:00Z" },
                "tags": { "arrayValue": { "values": [{ "stringValue": "plumbing" }] } },
                "address": { "mapValue": { "fields": { "city": { "stringValue": "Kigali" } } } },
                "empty": { "arrayValue": {} }
            }
        });

        let document = decode_document(&raw).unwrap();
        assert_eq!(document.id, "abc123");
        assert_eq!(
            Value::Object(document.fields),
            json!({
                "name": "Ana",
                "jobs": 12,
                "rating": 4.5,
                "verified": true,
                "created_at": { "seconds": 1714521600, "nanoseconds": 0 },
                "tags": ["plumbing"],
                "address": { "city": "Kigali" },
                "empty": []
            })
        );
    }

    #[test]
    fn test_encode_restores_timestamps() {
        let encoded = encode_value(&json!({ "seconds": 1714521600, "nanoseconds": 0 }));
        assert_eq!(encoded, json!({ "timestampValue": "2024-05-01T00:00:00Z" }));

        let plain_map = encode_value(&json!({ "seconds": 3 }));
        assert!(plain_map.get("mapValue").is_some());
    }

    #[test]
    fn test_encode_scalars() {
        assert_eq!(encode_value(&json!(7)), json!({ "integerValue": "7" }));
        assert_eq!(encode_value(&json!(1.5)), json!({ "doubleValue": 1.5 }));
        assert_eq!(encode_value(&json!(null)), json!({ "nullValue": null }));
    }

    #[test]
    fn test_document_without_name() {
        assert!(decode_document(&json!({ "fields": {} })).is_err());
    }
}
