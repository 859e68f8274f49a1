use std::sync::Arc;

use crate::config::Config;
use crate::hub::HubHandle;
use crate::pipeline::Pipeline;

pub mod config;
pub mod connection;
pub mod handlers;
pub mod hub;
pub mod pipeline;
mod session_registry;

/// Shared by every worker through `web::Data`.
pub struct AppState {
    pub hub: HubHandle,
    pub pipeline: Arc<Pipeline>,
    pub session_queue_capacity: usize,
    pub max_frame_size: usize,
}

impl AppState {
    pub fn new(hub: HubHandle, pipeline: Pipeline, config: &Config) -> Self {
        Self {
            hub,
            pipeline: Arc::new(pipeline),
            session_queue_capacity: config.session_queue_capacity,
            max_frame_size: config.max_frame_size,
        }
    }
}
