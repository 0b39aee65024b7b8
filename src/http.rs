use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::auth::JwtService;
use crate::handlers::{job_status_handler, ping_handler, start_sync_handler, wishlist_handler};
use crate::store::{JobStore, SqliteStore, UserStore, WishlistStore};

#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<dyn JobStore>,
    pub users: Arc<dyn UserStore>,
    pub wishlist: Arc<dyn WishlistStore>,
    pub auth: Arc<JwtService>,
}

impl AppState {
    pub fn new(store: SqliteStore, auth: JwtService) -> Self {
        let store = Arc::new(store);
        Self {
            jobs: store.clone(),
            users: store.clone(),
            wishlist: store,
            auth: Arc::new(auth),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/api/ping", get(ping_handler))
        .route("/api/sync", post(start_sync_handler))
        .route("/api/jobs/{job_id}", get(job_status_handler))
        .route("/api/wishlist", get(wishlist_handler))
        .layer(trace_layer)
        .layer(cors)
        .with_state(state)
}
