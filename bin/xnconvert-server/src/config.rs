//! Server configuration, loaded from environment variables at startup.

use std::path::PathBuf;
use std::time::Duration;

/// Option string handed to XnConvert when the caller does not send one:
/// keep the aspect ratio, resample with a Hanning filter into a 1000x1500
/// box, centre it on a white 1000x1500 canvas and encode as JPEG q80.
pub const DEFAULT_OPTIONS: &str =
    "-ratio -rtype hanning -resize 1000 1500 -canvas 1000 1500 center -bgcolor 255 255 255 -out jpeg -q 80";

/// Runtime configuration for xnconvert-server.
///
/// Every field has a default so the server starts without any environment
/// variables set. Only `PORT` is expected to change in a typical deployment.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP port to listen on, bound on all interfaces (default: `3000`).
    pub port: u16,

    /// Directory receiving raw uploads (default: `uploads`).
    pub uploads_dir: PathBuf,

    /// Directory receiving converter output (default: `outputs`).
    pub outputs_dir: PathBuf,

    /// Headless display wrapper, program first (default: `xvfb-run -a`).
    /// Empty runs the converter directly.
    pub wrapper: Vec<String>,

    /// Converter executable (default: `xnconvert`).
    pub converter_bin: String,

    /// Option string used when the request carries none.
    pub default_options: String,

    /// Upper bound on one converter run before the child is killed.
    pub conversion_timeout: Duration,

    /// Number of converter processes allowed to run at once.
    pub max_concurrent: usize,

    /// How long a request may wait for a free converter slot.
    pub queue_timeout: Duration,

    /// Maximum accepted request body, in bytes.
    pub max_upload_bytes: usize,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Comma-separated CORS origins; `None` allows any origin.
    pub cors_allowed_origins: Option<String>,

    /// Serve Swagger UI and the OpenAPI document.
    pub enable_swagger: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            uploads_dir: PathBuf::from("uploads"),
            outputs_dir: PathBuf::from("outputs"),
            wrapper: vec!["xvfb-run".to_owned(), "-a".to_owned()],
            converter_bin: "xnconvert".to_owned(),
            default_options: DEFAULT_OPTIONS.to_owned(),
            conversion_timeout: Duration::from_secs(120),
            max_concurrent: 4,
            queue_timeout: Duration::from_secs(30),
            max_upload_bytes: 16 * 1024 * 1024,
            log_level: "info".to_owned(),
            log_json: false,
            cors_allowed_origins: None,
            enable_swagger: true,
        }
    }
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: parse_env("PORT", defaults.port),
            uploads_dir: std::env::var_os("XNCONVERT_UPLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.uploads_dir),
            outputs_dir: std::env::var_os("XNCONVERT_OUTPUTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.outputs_dir),
            wrapper: std::env::var("XNCONVERT_WRAPPER")
                .map(|v| v.split_whitespace().map(str::to_owned).collect())
                .unwrap_or(defaults.wrapper),
            converter_bin: env_or("XNCONVERT_BIN", &defaults.converter_bin),
            default_options: env_or("XNCONVERT_DEFAULT_OPTIONS", &defaults.default_options),
            conversion_timeout: Duration::from_secs(parse_env(
                "XNCONVERT_TIMEOUT_SECS",
                defaults.conversion_timeout.as_secs(),
            )),
            max_concurrent: parse_env("XNCONVERT_MAX_CONCURRENT", defaults.max_concurrent).max(1),
            queue_timeout: Duration::from_secs(parse_env(
                "XNCONVERT_QUEUE_TIMEOUT_SECS",
                defaults.queue_timeout.as_secs(),
            )),
            max_upload_bytes: megabytes(parse_env("XNCONVERT_MAX_UPLOAD_MB", 16)),
            log_level: env_or("XNCONVERT_LOG", &defaults.log_level),
            log_json: parse_bool("XNCONVERT_LOG_JSON").unwrap_or(defaults.log_json),
            cors_allowed_origins: std::env::var("XNCONVERT_CORS_ORIGINS").ok(),
            enable_swagger: parse_bool("XNCONVERT_ENABLE_SWAGGER").unwrap_or(defaults.enable_swagger),
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn megabytes(mb: usize) -> usize {
    mb.saturating_mul(1024 * 1024)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}
