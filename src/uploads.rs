// src/uploads.rs - Book cover files on disk

use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

pub const COVERS_DIR: &str = "covers";
pub const PUBLIC_PREFIX: &str = "/uploads";

const ALLOWED_COVER_TYPES: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/webp", "webp"),
];

/// File extension for an accepted cover MIME type.
pub fn cover_extension(mime: &str) -> ApiResult<&'static str> {
    let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    ALLOWED_COVER_TYPES
        .iter()
        .find(|(allowed, _)| *allowed == essence)
        .map(|(_, ext)| *ext)
        .ok_or_else(|| ApiError::ValidationError(format!(
            "Cover must be a JPEG, PNG or WebP image (got '{}')",
            mime
        )))
}

pub fn validate_cover_size(size: usize, max_bytes: usize) -> ApiResult<()> {
    if size == 0 {
        return Err(ApiError::bad_request("Cover file is empty"));
    }
    if size > max_bytes {
        return Err(ApiError::ValidationError(format!(
            "Cover is too large: {} bytes (limit {} bytes)",
            size, max_bytes
        )));
    }
    Ok(())
}

/// Writes the cover under `<upload_dir>/covers/` and returns its public URL.
pub async fn store_cover(upload_dir: &Path, book_id: &str, extension: &str, bytes: &[u8]) -> ApiResult<String> {
    let dir = upload_dir.join(COVERS_DIR);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| ApiError::InternalServerError(format!("Failed to create directory: {}", e)))?;

    let filename = format!("{}_{}.{}", book_id, Uuid::new_v4().simple(), extension);
    tokio::fs::write(dir.join(&filename), bytes)
        .await
        .map_err(|e| ApiError::InternalServerError(format!("Failed to write file: {}", e)))?;

    Ok(format!("{}/{}/{}", PUBLIC_PREFIX, COVERS_DIR, filename))
}

/// Best-effort removal of a stored cover; failures are only logged.
pub async fn remove_cover(upload_dir: &Path, url: &str) {
    let Some(path) = cover_path(upload_dir, url) else {
        return;
    };
    if let Err(e) = tokio::fs::remove_file(&path).await {
        log::warn!("Could not remove cover {}: {}", path.display(), e);
    }
}

/// Disk path for a URL produced by [`store_cover`]; None for anything else.
pub fn cover_path(upload_dir: &Path, url: &str) -> Option<PathBuf> {
    let prefix = format!("{}/{}/", PUBLIC_PREFIX, COVERS_DIR);
    let name = url.strip_prefix(&prefix)?;
    if name.is_empty() || name.contains('/') || name.contains("..") {
        return None;
    }
    Some(upload_dir.join(COVERS_DIR).join(name))
}
