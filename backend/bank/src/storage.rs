//! Object storage for product images and worker photos.
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Url, header::CONTENT_TYPE};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::{error::BankError, utils::slugify};

const STORAGE_ROOT: &str = "https://firebasestorage.googleapis.com/v0/b";

/// A file as it arrives from a form or from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub path: String,
    pub download_url: String,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// A handle that uploads on behalf of the user holding `id_token`.
    fn authorized(&self, id_token: &str) -> Arc<dyn ObjectStorage>;

    async fn upload(
        &self,
        path: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<StoredObject, BankError>;
}

/// `{prefix}/{uuid}-{slug of the file stem}.{extension}`
pub fn unique_path(prefix: &str, file_name: &str) -> String {
    let (stem, extension) = match file_name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => (stem, Some(extension)),
        _ => (file_name, None),
    };

    let mut name = Uuid::new_v4().to_string();
    let stem = slugify(stem);
    if !stem.is_empty() {
        name.push('-');
        name.push_str(&stem);
    }
    if let Some(extension) = extension.map(slugify).filter(|extension| !extension.is_empty()) {
        name.push('.');
        name.push_str(&extension);
    }

    format!("{prefix}/{name}")
}

/// Uploads `upload` under a fresh path below `prefix`.
pub async fn store_upload(
    storage: &dyn ObjectStorage,
    prefix: &str,
    upload: Upload,
) -> Result<StoredObject, BankError> {
    let path = unique_path(prefix, &upload.file_name);

    storage
        .upload(&path, &upload.content_type, upload.bytes)
        .await
}

#[derive(Clone)]
pub struct FirebaseStorage {
    client: Client,
    bucket: String,
    id_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    name: String,
    #[serde(default)]
    download_tokens: Option<String>,
}

impl FirebaseStorage {
    pub fn new(client: Client, bucket: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            id_token: None,
        }
    }

    pub fn with_id_token(&self, id_token: &str) -> Self {
        Self {
            id_token: Some(id_token.to_string()),
            ..self.clone()
        }
    }

    fn upload_request(&self, path: &str, content_type: &str, bytes: Bytes) -> RequestBuilder {
        let request = self
            .client
            .post(format!("{STORAGE_ROOT}/{}/o", self.bucket))
            .query(&[("uploadType", "media"), ("name", path)])
            .header(CONTENT_TYPE, content_type)
            .body(bytes);

        match &self.id_token {
            Some(id_token) => request.bearer_auth(id_token),
            None => request,
        }
    }

    fn object_url(&self, path: &str) -> Result<Url, BankError> {
        let mut url = Url::parse(&format!("{STORAGE_ROOT}/{}/o", self.bucket))
            .map_err(|e| BankError::Codec(format!("bad bucket url: {e}")))?;

        url.path_segments_mut()
            .map_err(|_| BankError::Codec("bucket url cannot hold a path".to_string()))?
            .push(path);

        Ok(url)
    }

    /// Public URL for an uploaded object, authorized by its download token.
    pub fn download_url(&self, path: &str, token: Option<&str>) -> Result<String, BankError> {
        let mut url = self.object_url(path)?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("alt", "media");
            if let Some(token) = token {
                query.append_pair("token", token);
            }
        }

        Ok(url.to_string())
    }
}

#[async_trait]
impl ObjectStorage for FirebaseStorage {
    fn authorized(&self, id_token: &str) -> Arc<dyn ObjectStorage> {
        Arc::new(self.with_id_token(id_token))
    }

    async fn upload(
        &self,
        path: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<StoredObject, BankError> {
        let response = self
            .upload_request(path, content_type, bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BankError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let uploaded: UploadResponse = response.json().await?;
        let token = uploaded
            .download_tokens
            .as_deref()
            .and_then(|tokens| tokens.split(',').next());
        debug!("Uploaded {}", uploaded.name);

        Ok(StoredObject {
            download_url: self.download_url(&uploaded.name, token)?,
            path: uploaded.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Client;

    use super::*;

    #[test]
    fn test_unique_path_keeps_extension() {
        let path = unique_path("products", "My Photo.JPG");
        assert!(path.starts_with("products/"));
        assert!(path.ends_with("-my-photo.jpg"));
    }

    #[test]
    fn test_unique_path_is_unique() {
        assert_ne!(unique_path("workers", "a.png"), unique_path("workers", "a.png"));
    }

    #[test]
    fn test_unique_path_without_usable_name() {
        let path = unique_path("workers", "!!!");
        assert_eq!(path.len(), "workers/".len() + 36);
    }

    #[test]
    fn test_upload_carries_id_token() {
        let storage = FirebaseStorage::new(Client::new(), "hills.appspot.com");
        let body = || Bytes::from_static(b"png");

        let anonymous = storage
            .upload_request("workers/a.png", "image/png", body())
            .build()
            .unwrap();
        assert!(anonymous.headers().get("authorization").is_none());

        let request = storage
            .with_id_token("token-1")
            .upload_request("workers/a.png", "image/png", body())
            .build()
            .unwrap();
        assert_eq!(request.headers()["authorization"], "Bearer token-1");
        assert_eq!(request.headers()["content-type"], "image/png");
    }

    #[test]
    fn test_download_url_encodes_path() {
        let storage = FirebaseStorage::new(Client::new(), "hills.appspot.com");
        let url = storage
            .download_url("workers/abc-photo.png", Some("tok"))
            .unwrap();

        assert_eq!(
            url,
            "https://firebasestorage.googleapis.com/v0/b/hills.appspot.com/o/\
             workers%2Fabc-photo.png?alt=media&token=tok"
        );
    }
}
