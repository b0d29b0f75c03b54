use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::model::GeneratedImage;

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("not a base64 data URI")]
    InvalidDataUri,
    #[error("invalid base64 payload: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid file name: {0}")]
    InvalidFilename(String),
}

/// Destination for generated images when auto-save is on.
#[async_trait]
pub trait ImageSink: Send + Sync {
    async fn save(&self, image: &GeneratedImage) -> Result<PathBuf, SaveError>;
}

/// Writes images as files into one directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Decode the payload of a `data:<mime>;base64,<payload>` URI.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, SaveError> {
    let rest = uri.strip_prefix("data:").ok_or(SaveError::InvalidDataUri)?;
    let (meta, payload) = rest.split_once(',').ok_or(SaveError::InvalidDataUri)?;
    if !meta.ends_with(";base64") {
        return Err(SaveError::InvalidDataUri);
    }
    Ok(STANDARD.decode(payload.trim())?)
}

fn validate_filename(name: &str) -> Result<(), SaveError> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(SaveError::InvalidFilename(name.to_string()));
    }
    Ok(())
}

#[async_trait]
impl ImageSink for DirectorySink {
    async fn save(&self, image: &GeneratedImage) -> Result<PathBuf, SaveError> {
        validate_filename(&image.filename)?;
        let bytes = decode_data_uri(&image.url)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(&image.filename);
        tokio::fs::write(&path, &bytes).await?;
        info!(path = %path.display(), bytes = bytes.len(), "saved image");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn image(filename: &str, url: &str) -> GeneratedImage {
        GeneratedImage {
            filename: filename.into(),
            url: url.into(),
        }
    }

    #[test]
    fn decodes_base64_payload() {
        assert_eq!(
            decode_data_uri("data:image/jpeg;base64,aGVsbG8=").unwrap(),
            b"hello".to_vec()
        );
        assert!(matches!(
            decode_data_uri("https://example.com/a.jpg"),
            Err(SaveError::InvalidDataUri)
        ));
        assert!(matches!(
            decode_data_uri("data:text/plain,hello"),
            Err(SaveError::InvalidDataUri)
        ));
        assert!(matches!(
            decode_data_uri("data:image/jpeg;base64,@@@"),
            Err(SaveError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn writes_file_and_creates_dir() {
        let td = tempdir().unwrap();
        let sink = DirectorySink::new(td.path().join("out"));
        let path = sink
            .save(&image("cat_1.jpg", "data:image/jpeg;base64,aGVsbG8="))
            .await
            .unwrap();
        assert_eq!(path, td.path().join("out").join("cat_1.jpg"));
        assert_eq!(std::fs::read(path).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let td = tempdir().unwrap();
        let sink = DirectorySink::new(td.path());
        let err = sink
            .save(&image("../evil.jpg", "data:image/jpeg;base64,aGVsbG8="))
            .await
            .unwrap_err();
        assert!(matches!(err, SaveError::InvalidFilename(_)));
    }
}
