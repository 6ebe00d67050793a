//! HTTP API for the bridge
//!
//! Thin caller surface over [`BridgeHandle`] plus the in-process tracker the
//! binary hosts.

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;

use crate::bridge::BridgeHandle;
use crate::session::MemorySession;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub bridge: BridgeHandle,
    pub tracker: Arc<MemorySession>,
}

impl AppState {
    pub fn new(bridge: BridgeHandle, tracker: Arc<MemorySession>) -> Self {
        Self { bridge, tracker }
    }
}
