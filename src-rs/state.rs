use std::sync::Arc;

use crate::{config::Config, processor::WebhookProcessor};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub processor: WebhookProcessor,
}

impl AppState {
    pub fn new(config: Config, processor: WebhookProcessor) -> Self {
        Self {
            config: Arc::new(config),
            processor,
        }
    }
}
