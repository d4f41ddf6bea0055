use crate::db::DbPool;
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
///
/// The connection registry is the only shared mutable resource besides the
/// database; everything else is recomputed per request.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// Active WebSocket connections per user
    pub connections: ConnectionRegistry,
}
