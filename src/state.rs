use std::sync::Arc;

use crate::realtime::RealtimeHub;
use crate::store::SharedStore;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Durable store (sqlite or in-memory, chosen at startup)
    pub store: SharedStore,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Realtime hub: presence, rooms, typing, fanout
    pub hub: Arc<RealtimeHub>,
}
