//! `file.upload` and `file.download`

use super::{string_list, Block, BlockEnv, BlockOutcome};
use crate::error::{BlockError, MediaError};
use crate::services::FileDescriptor;
use serde_json::{json, Map, Value};

/// Parse a context value as a file descriptor; the first entry of a list wins
fn descriptor(value: &Value) -> Option<FileDescriptor> {
    match value {
        Value::Array(items) => items.first().and_then(descriptor),
        Value::Object(_) => serde_json::from_value(value.clone()).ok(),
        _ => None,
    }
}

/// Find the file to upload, trying each configured source in turn
async fn upload_source(env: &BlockEnv<'_>) -> Result<Option<FileDescriptor>, BlockError> {
    if let Some(element) = env.str("fileUploadElementId") {
        let found = env
            .context
            .get(element)
            .or_else(|| env.context.get("uploads").and_then(|u| u.get(element)))
            .and_then(descriptor);
        if found.is_some() {
            return Ok(found);
        }
    }
    if let Some(key) = env.str("fileContextKey") {
        if let Some(found) = env.context.lookup(key).and_then(descriptor) {
            return Ok(Some(found));
        }
    }
    if let Some(path) = env.str("serverPath") {
        return match env.services.media.resolve(path).await {
            Ok(file) => Ok(Some(file)),
            Err(MediaError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        };
    }
    Ok(env.str("fileUrl").map(FileDescriptor::from_url))
}

/// `image/*` style wildcards are allowed
fn mime_allowed(mime: &str, allowed: &[String]) -> bool {
    allowed.is_empty()
        || allowed.iter().any(|pattern| {
            let pattern = pattern.to_ascii_lowercase();
            let mime = mime.to_ascii_lowercase();
            match pattern.strip_suffix("/*") {
                Some(family) => mime.split('/').next() == Some(family),
                None => pattern == "*" || pattern == mime,
            }
        })
}

pub(super) async fn execute_upload(env: &BlockEnv<'_>) -> Result<BlockOutcome, BlockError> {
    let block = Block::FileUpload;
    let Some(file) = upload_source(env).await? else {
        return Ok(BlockOutcome::failure(block, "No file provided for upload"));
    };

    let allowed = string_list(env.config.get("allowedFileTypes"));
    if !mime_allowed(&file.mime_type, &allowed) {
        return Ok(BlockOutcome::failure(
            block,
            format!("File type '{}' is not allowed", file.mime_type),
        ));
    }

    let max_size = env.u64("maxFileSize").unwrap_or(env.services.settings.max_file_size);
    if file.size > max_size {
        return Ok(BlockOutcome::failure(
            block,
            format!("File size {} bytes exceeds the {} byte limit", file.size, max_size),
        ));
    }

    let stored = env.services.media.store(env.app_id, &file).await?;
    let stored = serde_json::to_value(&stored).unwrap_or(Value::Null);

    let mut payload = Map::new();
    payload.insert("file".into(), stored.clone());
    Ok(BlockOutcome::success(block, payload)
        .with_update("lastUploadedFile", stored.clone())
        .with_output(stored))
}

pub(super) async fn execute_download(env: &BlockEnv<'_>) -> Result<BlockOutcome, BlockError> {
    let block = Block::FileDownload;
    let source = env.str("downloadSourceType").unwrap_or("lastUpload");

    let file = match source {
        "context" => {
            let Some(key) = env
                .str("downloadContextKey")
                .or_else(|| env.str("fileContextKey"))
                .or_else(|| env.str("variable"))
            else {
                return Ok(BlockOutcome::missing(block, "downloadContextKey"));
            };
            env.context.lookup(key).and_then(descriptor)
        }
        "lastUpload" => env.context.get("lastUploadedFile").and_then(descriptor),
        "path" => {
            let Some(path) = env.str("serverPath").or_else(|| env.str("filePath")) else {
                return Ok(BlockOutcome::missing(block, "serverPath"));
            };
            match env.services.media.resolve(path).await {
                Ok(file) => Some(file),
                Err(MediaError::NotFound(_)) => None,
                Err(e) => return Err(e.into()),
            }
        }
        "url" => {
            let Some(url) = env.str("fileUrl") else {
                return Ok(BlockOutcome::missing(block, "fileUrl"));
            };
            Some(FileDescriptor::from_url(url))
        }
        other => {
            return Ok(BlockOutcome::failure(
                block,
                format!("Unsupported downloadSourceType '{}'", other),
            ))
        }
    };

    let Some(file) = file else {
        return Ok(BlockOutcome::failure(block, format!("No file found for download ({})", source)));
    };

    let download_url = file.url.clone().or_else(|| file.path.clone());
    let file = serde_json::to_value(&file).unwrap_or(Value::Null);
    let mut payload = Map::new();
    payload.insert("file".into(), file.clone());
    payload.insert("downloadUrl".into(), json!(download_url));
    Ok(BlockOutcome::success(block, payload)
        .with_update("lastDownload", file.clone())
        .with_output(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_mime_types() {
        let allowed = vec!["image/*".to_string(), "application/pdf".to_string()];
        assert!(mime_allowed("image/png", &allowed));
        assert!(mime_allowed("APPLICATION/PDF", &allowed));
        assert!(!mime_allowed("text/plain", &allowed));
        assert!(mime_allowed("text/plain", &[]));
    }

    #[test]
    fn descriptors_from_lists() {
        let value = json!([{ "name": "a.txt", "mimeType": "text/plain", "size": 3 }]);
        assert_eq!(descriptor(&value).unwrap().name, "a.txt");
        assert!(descriptor(&json!("a.txt")).is_none());
    }
}
