use crate::application::services::room_manager::RoomManager;
use crate::bootstrap::config::Config;

/// Shared state handed to every HTTP/WS handler as axum router state.
#[derive(Clone)]
pub struct AppContext {
    pub cfg: Config,
    pub room_manager: RoomManager,
}

impl AppContext {
    pub fn new(cfg: Config, room_manager: RoomManager) -> Self {
        Self { cfg, room_manager }
    }
}
