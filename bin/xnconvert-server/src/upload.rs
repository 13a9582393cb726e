//! Multipart upload intake for `POST /convert`.

use std::path::Path;
use std::sync::Arc;

use axum::extract::Multipart;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::ServerError;
use crate::storage::{Artifacts, Storage};

/// Multipart field carrying the image.
pub const IMAGE_FIELD: &str = "image";
/// Optional multipart field carrying a raw option string.
pub const OPTIONS_FIELD: &str = "options";

/// Upload extensions the converter is asked to read.
pub const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp", "tiff", "tif"];

/// A received upload. The bytes already sit at `artifacts.input()`.
#[derive(Debug)]
pub struct Upload {
    pub artifacts: Artifacts,
    /// Client-supplied filename, used only to name the output.
    pub original_filename: String,
    /// Raw `options` field, if sent.
    pub options: Option<String>,
}

/// Read the multipart body, saving the `image` file under a fresh unique
/// name in the uploads directory.
///
/// Fails with [`ServerError::NoFileProvided`] when there is no file. Fields
/// other than `image` and `options` are ignored. Any partial write is deleted
/// when the returned error drops the guard.
pub async fn receive_upload(storage: &Arc<Storage>, mut multipart: Multipart) -> Result<Upload, ServerError> {
    let mut file: Option<(Artifacts, String)> = None;
    let mut options = None;

    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some(IMAGE_FIELD) => {
                // A text part under the file's name is not a file.
                let Some(file_name) = field.file_name().filter(|n| !n.is_empty()).map(str::to_owned) else {
                    debug!("ignoring `image` part without a filename");
                    continue;
                };
                if file.is_some() {
                    return Err(ServerError::BadRequest("Only one file may be uploaded".into()));
                }
                check_extension(&file_name)?;

                let artifacts = storage.begin();
                let mut out = tokio::fs::File::create(artifacts.input())
                    .await
                    .map_err(|e| ServerError::Internal(format!("Failed to create upload file: {e}")))?;
                let mut size = 0usize;
                while let Some(chunk) = field.chunk().await? {
                    size += chunk.len();
                    out.write_all(&chunk)
                        .await
                        .map_err(|e| ServerError::Internal(format!("Failed to write upload file: {e}")))?;
                }
                out.flush()
                    .await
                    .map_err(|e| ServerError::Internal(format!("Failed to write upload file: {e}")))?;

                debug!(
                    file_name = %file_name,
                    path = %artifacts.input().display(),
                    size_bytes = size,
                    "received file upload"
                );
                file = Some((artifacts, file_name));
            }
            Some(OPTIONS_FIELD) => {
                options = Some(field.text().await?);
            }
            other => debug!(field = ?other, "ignoring unknown multipart field"),
        }
    }

    let (artifacts, original_filename) = file.ok_or(ServerError::NoFileProvided)?;
    Ok(Upload {
        artifacts,
        original_filename,
        options,
    })
}

fn check_extension(file_name: &str) -> Result<(), ServerError> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext {
        Some(ext) if ALLOWED_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        _ => Err(ServerError::BadRequest(format!(
            "File type not allowed. Allowed types: {}",
            ALLOWED_EXTENSIONS.join(", ")
        ))),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accepts_known_extensions_case_insensitively() {
        for name in ["a.png", "b.JPG", "c.jpeg", "d.TiFf", "e.webp"] {
            assert!(check_extension(name).is_ok(), "{name} should be allowed");
        }
    }

    #[test]
    fn rejects_unknown_or_missing_extensions() {
        for name in ["script.sh", "noext", "archive.png.exe", ".png"] {
            assert!(
                matches!(check_extension(name), Err(ServerError::BadRequest(_))),
                "{name} should be rejected"
            );
        }
    }
}
