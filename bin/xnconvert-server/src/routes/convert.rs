//! `POST /convert`: upload → XnConvert → streamed JPEG.

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use futures::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use utoipa::OpenApi;

use crate::converter::ConversionOptions;
use crate::error::ServerError;
use crate::schemas::convert::{ConversionErrorBody, ConvertUpload, ErrorBody};
use crate::state::AppState;
use crate::storage::Artifacts;
use crate::upload::{receive_upload, Upload};

#[derive(OpenApi)]
#[openapi(
    paths(convert),
    components(schemas(
        ConvertUpload,
        ErrorBody,
        ConversionErrorBody,
    )),
)]
pub struct ConvertApi;

pub fn router(max_upload_bytes: usize) -> Router<Arc<AppState>> {
    Router::new()
        .route("/convert", post(convert))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}

/// Convert one uploaded image.
///
/// The upload is saved under a unique name, XnConvert is run on it inside a
/// headless display, and the JPEG it writes is streamed back. Both temporary
/// files are deleted once the response body is finished, or as soon as the
/// request fails.
#[utoipa::path(
    post,
    path = "/convert",
    tag = "convert",
    request_body(content = ConvertUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Converted image", content_type = "image/jpeg", body = Vec<u8>),
        (status = 400, description = "No file, bad file type or rejected options", body = ErrorBody),
        (status = 409, description = "Same output name already in progress", body = ErrorBody),
        (status = 413, description = "File too large", body = ErrorBody),
        (status = 500, description = "Conversion failed or produced no output", body = ConversionErrorBody),
        (status = 503, description = "All conversion slots busy", body = ErrorBody),
    )
)]
pub async fn convert(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, ServerError> {
    let Upload {
        mut artifacts,
        original_filename,
        options,
    } = receive_upload(&state.storage, multipart).await?;

    let options = options
        .as_deref()
        .map(ConversionOptions::parse)
        .transpose()?;

    let output_path = state.storage.output_path_for(&original_filename);
    artifacts.claim_output(output_path.clone())?;

    let command = state
        .converter
        .build_command(artifacts.input(), &output_path, options.as_ref());
    info!(
        original = %original_filename,
        output = %output_path.display(),
        custom_options = options.as_ref().is_some_and(|o| !o.is_empty()),
        "converting upload"
    );

    state.converter.run(&command).await?;

    respond(artifacts, &output_path).await
}

/// Stream `output` back to the client.
///
/// `artifacts` moves into the body stream, so both files are deleted when
/// the stream finishes or the client goes away.
async fn respond(artifacts: Artifacts, output: &Path) -> Result<Response, ServerError> {
    let file = tokio::fs::File::open(output)
        .await
        .map_err(ServerError::Transfer)?;
    let content_length = file.metadata().await.map(|m| m.len()).ok();

    let file_name = output
        .file_name()
        .map(|n| n.to_string_lossy().replace(['"', '\\'], "_"))
        .unwrap_or_default();
    let disposition = HeaderValue::from_str(&format!("inline; filename=\"{file_name}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("inline"));

    let stream = ReaderStream::new(file).map(move |chunk| {
        if let Err(e) = &chunk {
            warn!(upload = %artifacts.input().display(), error = %e, "transfer of converted file failed");
        }
        chunk
    });

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/jpeg")
        .header(header::CONTENT_DISPOSITION, disposition);
    if let Some(len) = content_length {
        builder = builder.header(header::CONTENT_LENGTH, len);
    }
    builder
        .body(Body::from_stream(stream))
        .map_err(|e| ServerError::Internal(format!("failed to build response: {e}")))
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod test {
    use super::*;
    use crate::config::Config;
    use crate::error::{CONVERSION_FAILED_MESSAGE, NO_FILE_MESSAGE, OUTPUT_MISSING_MESSAGE, TRANSFER_FAILED_MESSAGE};
    use crate::storage::Storage;
    use axum::response::IntoResponse;
    use crate::routes;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::path::PathBuf;
    use tower::ServiceExt;

    const BOUNDARY: &str = "xnconvert-test-boundary";

    /// Stand-in for `xnconvert`: run as `sh -c SCRIPT stub xnconvert ARGS...`,
    /// so `$1` is the converter name. Records its argv, then copies
    /// `-input` to `-output`.
    fn copy_stub(record_to: &Path) -> String {
        format!(
            r#"shift; printf '%s\n' "$@" > '{}'
while [ $# -gt 0 ]; do
  case "$1" in
    -input) src="$2"; shift 2 ;;
    -output) dst="$2"; shift 2 ;;
    *) shift ;;
  esac
done
cp "$src" "$dst""#,
            record_to.display()
        )
    }

    struct Harness {
        _tmp: tempfile::TempDir,
        root: PathBuf,
        app: Router,
    }

    impl Harness {
        fn new(script: impl FnOnce(&Path) -> String) -> Self {
            Self::with_config(script, |_| {})
        }

        fn with_config(script: impl FnOnce(&Path) -> String, tweak: impl FnOnce(&mut Config)) -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let root = tmp.path().to_path_buf();
            std::fs::create_dir(root.join("uploads")).unwrap();
            std::fs::create_dir(root.join("outputs")).unwrap();

            let mut config = Config {
                uploads_dir: root.join("uploads"),
                outputs_dir: root.join("outputs"),
                wrapper: vec!["sh".into(), "-c".into(), script(&root), "stub".into()],
                enable_swagger: false,
                ..Config::default()
            };
            tweak(&mut config);
            let app = routes::build(Arc::new(AppState::new(config)));
            Self { _tmp: tmp, root, app }
        }

        fn invoked_args(&self) -> Option<String> {
            std::fs::read_to_string(self.root.join("argv")).ok()
        }

        fn leftover_files(&self) -> usize {
            ["uploads", "outputs"]
                .iter()
                .map(|d| std::fs::read_dir(self.root.join(d)).unwrap().count())
                .sum()
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>, axum::http::HeaderMap) {
            let response = self.app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
            (status, body, headers)
        }
    }

    enum Part<'a> {
        File(&'a str, &'a str, &'a [u8]),
        Text(&'a str, &'a str),
    }

    fn convert_request(parts: &[Part<'_>]) -> Request<Body> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::File(name, file_name, bytes) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                             Content-Type: application/octet-stream\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(bytes);
                }
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}").as_bytes(),
                    );
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/convert")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    fn json_of(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn photo_is_converted_streamed_and_cleaned_up() {
        let h = Harness::new(|root| copy_stub(&root.join("argv")));
        let image = b"\x89PNG\r\n\x1a\nnot really a png";

        let (status, body, headers) = h.send(convert_request(&[Part::File("image", "photo.png", image)])).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, image);
        assert_eq!(headers[header::CONTENT_TYPE], "image/jpeg");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "inline; filename=\"photo_converted.jpg\""
        );

        let argv = h.invoked_args().expect("converter should have run");
        let expected_output = h.root.join("outputs/photo_converted.jpg");
        assert!(argv.contains(&format!("-output\n{}\n", expected_output.display())));
        assert!(argv.contains(&crate::config::DEFAULT_OPTIONS.replace(' ', "\n")));
        assert!(argv.ends_with("-overwrite\n"));

        assert_eq!(h.leftover_files(), 0, "both temporary files must be gone");
    }

    #[tokio::test]
    async fn caller_options_are_passed_unmodified() {
        let h = Harness::new(|root| copy_stub(&root.join("argv")));

        let (status, _, _) = h
            .send(convert_request(&[
                Part::Text("options", "-resize 500 500"),
                Part::File("image", "photo.png", b"img"),
            ]))
            .await;

        assert_eq!(status, StatusCode::OK);
        let argv = h.invoked_args().unwrap();
        assert!(argv.contains("-resize\n500\n500\n-overwrite\n"));
        assert!(!argv.contains("hanning"));
    }

    #[tokio::test]
    async fn missing_file_is_400_and_never_invokes_converter() {
        let h = Harness::new(|root| copy_stub(&root.join("argv")));

        let (status, body, _) = h.send(convert_request(&[Part::Text("options", "-q 50")])).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json_of(&body), json!({ "error": NO_FILE_MESSAGE }));
        assert!(h.invoked_args().is_none());
        assert_eq!(h.leftover_files(), 0);
    }

    #[tokio::test]
    async fn rejected_options_are_400_and_upload_is_deleted() {
        let h = Harness::new(|root| copy_stub(&root.join("argv")));

        let (status, body, _) = h
            .send(convert_request(&[
                Part::File("image", "photo.png", b"img"),
                Part::Text("options", "-output /etc/passwd"),
            ]))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json_of(&body)["error"].as_str().unwrap().contains("-output"));
        assert!(h.invoked_args().is_none());
        assert_eq!(h.leftover_files(), 0);
    }

    #[tokio::test]
    async fn disallowed_extension_is_400() {
        let h = Harness::new(|root| copy_stub(&root.join("argv")));

        let (status, _, _) = h.send(convert_request(&[Part::File("image", "evil.sh", b"#!/bin/sh")])).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(h.invoked_args().is_none());
        assert_eq!(h.leftover_files(), 0);
    }

    #[tokio::test]
    async fn failing_converter_is_500_with_details_and_cleans_up() {
        let h = Harness::new(|_| "echo 'cannot decode' >&2; exit 2".into());

        let (status, body, _) = h.send(convert_request(&[Part::File("image", "photo.png", b"img")])).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_of(&body);
        assert_eq!(body["error"], CONVERSION_FAILED_MESSAGE);
        assert!(body["details"].as_str().unwrap().contains("cannot decode"));
        assert_eq!(h.leftover_files(), 0);
    }

    #[tokio::test]
    async fn missing_output_is_500_and_cleans_up() {
        let h = Harness::new(|_| "exit 0".into());

        let (status, body, _) = h.send(convert_request(&[Part::File("image", "photo.png", b"img")])).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_of(&body), json!({ "error": OUTPUT_MISSING_MESSAGE }));
        assert_eq!(h.leftover_files(), 0);
    }

    #[tokio::test]
    async fn client_disconnect_before_reading_body_cleans_up() {
        let h = Harness::new(|root| copy_stub(&root.join("argv")));

        let response = h
            .app
            .clone()
            .oneshot(convert_request(&[Part::File("image", "photo.png", b"img")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(h.leftover_files(), 2, "files live until the body is gone");

        drop(response.into_body());
        assert_eq!(h.leftover_files(), 0);
    }

    #[tokio::test]
    async fn unreadable_output_is_plain_text_500_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::new(tmp.path().join("uploads"), tmp.path().join("outputs")));
        storage.prepare().await.unwrap();

        let mut artifacts = storage.begin();
        std::fs::write(artifacts.input(), b"img").unwrap();
        let output = storage.output_path_for("photo.png");
        artifacts.claim_output(output.clone()).unwrap();

        let Err(err) = respond(artifacts, &output).await else {
            panic!("streaming a missing output must fail");
        };
        assert!(matches!(err, ServerError::Transfer(_)), "got {err:?}");

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], TRANSFER_FAILED_MESSAGE.as_bytes());

        assert_eq!(std::fs::read_dir(storage.uploads_dir()).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(storage.outputs_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn oversized_upload_is_413() {
        let h = Harness::with_config(|root| copy_stub(&root.join("argv")), |cfg| cfg.max_upload_bytes = 1024);
        let big = vec![0u8; 8 * 1024];

        let (status, body, _) = h.send(convert_request(&[Part::File("image", "big.png", &big)])).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json_of(&body), json!({ "error": "File too large" }));
        assert!(h.invoked_args().is_none());
        assert_eq!(h.leftover_files(), 0);
    }

    #[tokio::test]
    async fn concurrent_requests_do_not_interfere() {
        let h = Harness::new(|root| copy_stub(&root.join("argv")));

        let a = h.send(convert_request(&[Part::File("image", "first.png", b"AAAA")]));
        let b = h.send(convert_request(&[Part::File("image", "second.jpg", b"BBBB")]));
        let ((sa, ba, _), (sb, bb, _)) = tokio::join!(a, b);

        assert_eq!((sa, sb), (StatusCode::OK, StatusCode::OK));
        assert_eq!(ba, b"AAAA");
        assert_eq!(bb, b"BBBB");
        assert_eq!(h.leftover_files(), 0);
    }

    #[tokio::test]
    async fn cleanup_sweeps_stale_files() {
        let h = Harness::new(|root| copy_stub(&root.join("argv")));
        std::fs::write(h.root.join("uploads/stale"), b"x").unwrap();
        std::fs::write(h.root.join("outputs/stale_converted.jpg"), b"y").unwrap();

        let request = Request::builder()
            .method("POST")
            .uri("/cleanup")
            .body(Body::empty())
            .unwrap();
        let (status, body, _) = h.send(request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body), json!({ "status": "cleanup successful", "removed": 2 }));
        assert_eq!(h.leftover_files(), 0);
    }

    #[tokio::test]
    async fn root_is_plain_text_and_carries_trace_id() {
        let h = Harness::new(|_| "exit 0".into());
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();

        let (status, body, headers) = h.send(request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"API XnConvert est en ligne!");
        assert!(headers.contains_key(crate::middleware::trace::X_TRACE_ID));
    }
}
