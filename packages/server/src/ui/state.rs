//! Server state.

use std::sync::Arc;

use crate::usecase::PresenceCoordinator;

/// Shared application state
pub struct AppState {
    /// PresenceCoordinator（プレゼンスのファサード）
    pub coordinator: Arc<PresenceCoordinator>,
}
