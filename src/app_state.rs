use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::UploadSettings;
use crate::db::UploadStore;
use crate::services::{
    broadcaster::StatusBroadcaster,
    storage::ObjectStore,
    validation::{DefaultValidator, UploadValidator},
};

/// Shared application state passed to all route handlers and background tasks.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn UploadStore>,
    pub storage: Arc<dyn ObjectStore>,
    pub broadcaster: Arc<StatusBroadcaster>,
    pub validator: Arc<dyn UploadValidator>,
    pub settings: Arc<UploadSettings>,
    /// Held for the duration of a stalled-upload sweep.
    pub sweep_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn UploadStore>,
        storage: Arc<dyn ObjectStore>,
        settings: UploadSettings,
    ) -> Self {
        Self {
            store,
            storage,
            broadcaster: Arc::new(StatusBroadcaster::new()),
            validator: Arc::new(DefaultValidator),
            settings: Arc::new(settings),
            sweep_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Replace the request validator.
    pub fn with_validator(mut self, validator: Arc<dyn UploadValidator>) -> Self {
        self.validator = validator;
        self
    }
}
