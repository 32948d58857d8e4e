use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use bank::Upload;
use bytes::Bytes;
use indicatif::{ProgressBar, ProgressStyle};
use serde::de::DeserializeOwned;

pub fn progress_bar(len: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )?
        .progress_chars("=> "),
    );

    Ok(pb)
}

/// Reads a JSON array of entries.
pub fn read_entries<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;

    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

/// `path` as given when absolute, otherwise relative to the import file's directory.
pub fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

pub fn read_upload(path: &Path) -> Result<Upload> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload")
        .to_string();

    Ok(Upload {
        file_name,
        content_type: content_type(path).to_string(),
        bytes: Bytes::from(bytes),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type() {
        assert_eq!(content_type(Path::new("a/b.JPG")), "image/jpeg");
        assert_eq!(content_type(Path::new("photo.png")), "image/png");
        assert_eq!(content_type(Path::new("notes")), "application/octet-stream");
    }

    #[test]
    fn test_resolve() {
        let base = Path::new("/data/import");

        assert_eq!(resolve(base, Path::new("ana.png")), PathBuf::from("/data/import/ana.png"));
        assert_eq!(resolve(base, Path::new("/tmp/ana.png")), PathBuf::from("/tmp/ana.png"));
    }
}
