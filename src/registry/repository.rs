//! File repository for the persisted registry document

use std::path::{Path, PathBuf};

use tokio::fs;

use super::types::RegistryDocument;
use crate::error::{Error, Result};

/// Reads and writes the registry document on disk
pub struct RegistryRepository {
    path: PathBuf,
}

impl RegistryRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted document.
    ///
    /// A missing file is first-run state: an empty document is created and
    /// persisted before returning. A present-but-unparsable file is a
    /// `Persistence` error; the file is left on disk for inspection and is
    /// never silently replaced with an empty registry.
    pub async fn load(&self) -> Result<RegistryDocument> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let doc = RegistryDocument::default();
                self.save(&doc).await?;
                tracing::info!(path = %self.path.display(), "Created empty registry file");
                return Ok(doc);
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&raw).map_err(|e| {
            Error::Persistence(format!(
                "corrupt registry file {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Atomically overwrite the document (temp file + rename), so a reader
    /// never observes a partially written file.
    pub async fn save(&self, doc: &RegistryDocument) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).await?;
        }

        let json = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json.as_bytes()).await?;
        fs::rename(&tmp, &self.path).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_creates_empty_file_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let repo = RegistryRepository::new(dir.path().join("cameraInfo.json"));

        let doc = repo.load().await.unwrap();
        assert!(doc.camera_info_array.is_empty());
        assert!(repo.path().exists());

        let raw = std::fs::read_to_string(repo.path()).unwrap();
        assert!(raw.contains("cameraInfoArray"));
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error_not_an_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cameraInfo.json");
        std::fs::write(&path, "{not json").unwrap();

        let repo = RegistryRepository::new(&path);
        let err = repo.load().await.unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));

        // File is untouched
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{not json");
    }
}
