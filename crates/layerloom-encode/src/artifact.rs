use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};

use layerloom_core::{LayerloomError, LayerloomResult};

/// A finished, encoded animation ready for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mime_type: String,
    pub frame_count: usize,
    pub width: u32,
    pub height: u32,
}

impl Artifact {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// SHA-256 of the encoded bytes as lowercase hex.
    pub fn digest_hex(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    /// Metadata without the payload, for reports.
    pub fn info(&self) -> ArtifactInfo {
        ArtifactInfo {
            filename: self.filename.clone(),
            mime_type: self.mime_type.clone(),
            frame_count: self.frame_count,
            width: self.width,
            height: self.height,
            size_bytes: self.len(),
            sha256: self.digest_hex(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactInfo {
    pub filename: String,
    pub mime_type: String,
    pub frame_count: usize,
    pub width: u32,
    pub height: u32,
    pub size_bytes: usize,
    pub sha256: String,
}

/// Receives the finished artifact (save dialog, upload, disk...).
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Deliver the artifact and return where it ended up.
    async fn deliver(&self, artifact: &Artifact) -> LayerloomResult<String>;
}

/// Writes artifacts into a directory under their own filename.
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn target(&self, filename: &str) -> LayerloomResult<PathBuf> {
        let name = Path::new(filename);
        if filename.is_empty() || name.file_name() != Some(name.as_os_str()) {
            return Err(LayerloomError::Config(format!(
                "artifact filename '{}' must be a bare file name",
                filename
            )));
        }
        Ok(self.dir.join(name))
    }
}

#[async_trait]
impl ArtifactSink for FileSink {
    async fn deliver(&self, artifact: &Artifact) -> LayerloomResult<String> {
        let path = self.target(&artifact.filename)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, &artifact.bytes).await?;
        tracing::info!(
            "Saved {} ({} bytes, {}) to {}",
            artifact.filename,
            artifact.len(),
            artifact.mime_type,
            path.display()
        );
        Ok(path.display().to_string())
    }
}
