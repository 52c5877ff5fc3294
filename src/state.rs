use std::sync::Arc;

use crate::config::AppConfig;
use crate::gateway::RoomManager;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub manager: Arc<RoomManager>,
}
