//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`]. Most errors become a JSON body of the
//! form `{"error": "..."}`; converter failures add a `details` field, and a
//! failed file transfer answers in plain text.

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::converter::{ConversionError, OptionsError};
use crate::storage::OutputInUse;

/// Message returned when the request carries no `image` file.
pub const NO_FILE_MESSAGE: &str = "Aucun fichier n'a été envoyé";
/// Message returned when the converter itself failed.
pub const CONVERSION_FAILED_MESSAGE: &str = "Erreur lors de la conversion";
/// Message returned when the converter succeeded without writing output.
pub const OUTPUT_MISSING_MESSAGE: &str = "Le fichier de sortie n'a pas été créé";
/// Plain-text body returned when the converted file cannot be sent.
pub const TRANSFER_FAILED_MESSAGE: &str = "Erreur lors de l'envoi du fichier";

/// All errors that can occur in the xnconvert-server request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The multipart body had no file in the `image` field.
    #[error("no file provided")]
    NoFileProvided,

    /// The caller's option string failed the allow-list.
    #[error("invalid options: {0}")]
    InvalidOptions(#[from] OptionsError),

    /// Another in-flight request is writing the same output file.
    #[error(transparent)]
    OutputInUse(#[from] OutputInUse),

    /// The request body exceeded the upload limit.
    #[error("payload too large")]
    PayloadTooLarge,

    /// Spawning, running or verifying the converter failed.
    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// The converted file could not be opened for streaming.
    #[error("transfer error: {0}")]
    Transfer(#[source] std::io::Error),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<MultipartError> for ServerError {
    fn from(e: MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ServerError::PayloadTooLarge
        } else {
            ServerError::BadRequest(format!("Failed to read multipart body: {}", e.body_text()))
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            // Client-facing errors: expose the message directly.
            ServerError::NoFileProvided => (StatusCode::BAD_REQUEST, json!({ "error": NO_FILE_MESSAGE })),
            ServerError::InvalidOptions(e) => {
                (StatusCode::BAD_REQUEST, json!({ "error": format!("Invalid options: {e}") }))
            }
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, json!({ "error": m })),
            ServerError::OutputInUse(e) => (StatusCode::CONFLICT, json!({ "error": e.to_string() })),
            ServerError::PayloadTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, json!({ "error": "File too large" })),

            ServerError::Conversion(e) => match e {
                ConversionError::Busy { .. } => {
                    warn!(error = %e, "conversion rejected: no free slot");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        json!({ "error": "conversion capacity exhausted, retry later" }),
                    )
                }
                ConversionError::OutputMissing(_) => {
                    error!(error = %e, "conversion produced no output");
                    (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": OUTPUT_MISSING_MESSAGE }))
                }
                _ => {
                    error!(error = %e, "conversion failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        json!({ "error": CONVERSION_FAILED_MESSAGE, "details": e.to_string() }),
                    )
                }
            },

            ServerError::Transfer(e) => {
                error!(error = %e, "failed to send converted file");
                return (StatusCode::INTERNAL_SERVER_ERROR, TRANSFER_FAILED_MESSAGE).into_response();
            }

            // Internal errors: log the full detail, return a generic message.
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "internal server error" }))
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(e: anyhow::Error) -> Self {
        error!(error = ?e, "converting anyhow error to ServerError::Internal");
        ServerError::Internal(e.to_string())
    }
}
