use std::path::PathBuf;

use bank::timestamp::{Timestamp, lenient};
use serde::Deserialize;

/// One worker in an import file. `photo` is a path relative to the file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkerEntry {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub photo: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BlogEntry {
    pub title: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub published_at: Option<Timestamp>,
}

/// What an import did, printed at the end of a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub created: usize,
    pub skipped: usize,
}
