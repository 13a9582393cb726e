use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Multipart body accepted by `POST /convert`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConvertUpload {
    /// Image to convert (png, jpg, jpeg, gif, webp, bmp, tiff).
    #[schema(value_type = String, format = Binary)]
    pub image: Vec<u8>,
    /// XnConvert flags replacing the defaults, e.g. `"-resize 500 500"`.
    pub options: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

/// Error body for a failed converter run.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversionErrorBody {
    pub error: String,
    /// Underlying failure (exit status, stderr, timeout).
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CleanupResponse {
    pub status: String,
    /// Number of files deleted.
    pub removed: usize,
}
