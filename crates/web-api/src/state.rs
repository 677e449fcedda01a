use std::sync::Arc;

use application::{ChatService, RoomRelay};

#[derive(Clone)]
pub struct AppState {
    pub chat_service: Arc<ChatService>,
    pub relay: Arc<RoomRelay>,
}

impl AppState {
    pub fn new(chat_service: Arc<ChatService>, relay: Arc<RoomRelay>) -> Self {
        Self {
            chat_service,
            relay,
        }
    }
}
