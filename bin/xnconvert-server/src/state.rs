//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::config::Config;
use crate::converter::Converter;
use crate::storage::Storage;

/// State shared across all HTTP handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Upload and output directories, plus in-flight file tracking.
    pub storage: Arc<Storage>,
    /// Command builder and bounded subprocess runner.
    pub converter: Arc<Converter>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let storage = Storage::new(config.uploads_dir.clone(), config.outputs_dir.clone());
        let converter = Converter::from_config(&config);
        Self {
            config: Arc::new(config),
            storage: Arc::new(storage),
            converter: Arc::new(converter),
        }
    }
}
