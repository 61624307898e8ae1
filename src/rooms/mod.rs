mod msg;
pub mod session;
mod ws;

use axum::{Router, routing::get};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rooms/{room}/messages", get(msg::history).post(msg::post_message))
        .route("/ws/{room}", get(ws::room_ws))
}
