use thiserror::Error;

#[derive(Error, Debug)]
pub enum BankError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Remote returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed document: {0}")]
    Codec(String),

    #[error("Serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Document {collection}/{id} not found")]
    NotFound { collection: String, id: String },
}

impl BankError {
    pub fn not_found(collection: &str, id: &str) -> Self {
        Self::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }
}
