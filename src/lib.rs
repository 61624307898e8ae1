pub mod config;
pub mod db;
pub mod delivery;
pub mod history;
pub mod models;
pub mod registry;
pub mod rooms;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::FromRef,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;

use config::Config;
use db::Store;
use delivery::MessageRouter;
use history::HistoryPaginator;
use models::ValidationError;
use registry::ConnectionRegistry;

/// Built once per process; every handler and session reaches the registry
/// through this state.
#[derive(Clone, FromRef)]
pub struct AppState {
    pub store: Store,
    pub registry: Arc<ConnectionRegistry>,
    pub router: MessageRouter,
    pub history: HistoryPaginator,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Store, config: Config) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            router: MessageRouter::new(registry.clone(), config.send_timeout),
            history: HistoryPaginator::new(store.clone()),
            registry,
            store,
            config: Arc::new(config),
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .merge(rooms::router())
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            AppError::Validation(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            AppError::Database(_) => {
                error!(error = %self, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_owned())
            }
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
