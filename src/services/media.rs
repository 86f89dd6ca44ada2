//! Media storage behind the file blocks
//!
//! The engine only handles file *descriptors*. `LocalMediaStore` keeps the
//! bytes on disk under a single root; any other backend can implement
//! `MediaStore`.

use crate::error::MediaError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Metadata for an uploaded or stored file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub name: String,
    #[serde(alias = "type", alias = "mimetype", default = "default_mime")]
    pub mime_type: String,
    #[serde(alias = "fileSize", default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Inline text content, used by form uploads that carry the body directly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

fn default_mime() -> String {
    "application/octet-stream".to_string()
}

impl FileDescriptor {
    /// Describe a remote file without fetching it
    pub fn from_url(url: &str) -> Self {
        let name = url
            .split(|c: char| c == '?' || c == '#')
            .next()
            .and_then(|u| u.rsplit('/').next())
            .filter(|n| !n.is_empty())
            .unwrap_or("download")
            .to_string();
        Self {
            mime_type: guess_mime(&name),
            name,
            size: 0,
            path: None,
            url: Some(url.to_string()),
            content: None,
        }
    }
}

/// Best-effort MIME type from a file extension
pub fn guess_mime(name: &str) -> String {
    mime_guess::from_path(name).first_or_octet_stream().essence_str().to_string()
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Describe a file already on the server
    async fn resolve(&self, path: &str) -> Result<FileDescriptor, MediaError>;

    /// Persist a file for `app_id` and return its stored descriptor
    async fn store(&self, app_id: &str, file: &FileDescriptor) -> Result<FileDescriptor, MediaError>;

    /// Read a stored file as UTF-8 text
    async fn read_text(&self, file: &FileDescriptor) -> Result<String, MediaError>;
}

/// Files on the local filesystem below `root`
#[derive(Debug, Clone)]
pub struct LocalMediaStore {
    root: PathBuf,
    public_prefix: String,
}

impl LocalMediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_prefix: "/media".to_string(),
        }
    }

    /// Map a relative path to a location under the root
    fn locate(&self, relative: &str) -> Result<PathBuf, MediaError> {
        let candidate = Path::new(relative);
        let escapes = candidate
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if relative.is_empty() || escapes {
            return Err(MediaError::OutsideRoot(relative.to_string()));
        }
        Ok(self.root.join(candidate))
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn resolve(&self, path: &str) -> Result<FileDescriptor, MediaError> {
        let full = self.locate(path)?;
        let metadata = match tokio::fs::metadata(&full).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(MediaError::NotFound(path.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MediaError::NotFound(path.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let name = full
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(path)
            .to_string();
        Ok(FileDescriptor {
            mime_type: guess_mime(&name),
            name,
            size: metadata.len(),
            path: Some(path.to_string()),
            url: Some(format!("{}/{}", self.public_prefix, path)),
            content: None,
        })
    }

    async fn store(&self, app_id: &str, file: &FileDescriptor) -> Result<FileDescriptor, MediaError> {
        // Remote-only files keep pointing at their origin
        if file.path.is_none() && file.content.is_none() {
            return Ok(file.clone());
        }

        let safe_name: String = file
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let relative = format!("{}/{}-{}", app_id, uuid::Uuid::new_v4(), safe_name);
        let target = self.locate(&relative)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let size = match (&file.content, &file.path) {
            (Some(content), _) => {
                tokio::fs::write(&target, content.as_bytes()).await?;
                content.len() as u64
            }
            (None, Some(source)) => tokio::fs::copy(self.locate(source)?, &target).await?,
            (None, None) => 0,
        };

        tracing::info!("📁 Stored '{}' for app '{}' ({} bytes)", file.name, app_id, size);
        Ok(FileDescriptor {
            name: file.name.clone(),
            mime_type: file.mime_type.clone(),
            size,
            url: Some(format!("{}/{}", self.public_prefix, relative)),
            path: Some(relative),
            content: None,
        })
    }

    async fn read_text(&self, file: &FileDescriptor) -> Result<String, MediaError> {
        if let Some(content) = &file.content {
            return Ok(content.clone());
        }
        let path = file
            .path
            .as_deref()
            .ok_or_else(|| MediaError::NotFound(file.name.clone()))?;
        match tokio::fs::read(self.locate(path)?).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(MediaError::NotFound(path.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}
