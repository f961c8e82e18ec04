// HTTP API: profile queries, scraped components, and runtime config.

mod config;
mod http;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};

use crate::profile_repo::ProfileStorage;
use crate::scrape::ScrapeManager;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) store: Arc<ProfileStorage>,
    pub(crate) manager: Arc<ScrapeManager>,
}

pub fn app(store: Arc<ProfileStorage>, manager: Arc<ScrapeManager>) -> Router {
    let state = AppState { store, manager };
    Router::new()
        .route("/", get(|| async { "conprof: continuous profiling collector" }))
        .route("/version", get(http::version_handler))
        .route(
            "/config",
            get(config::get_config).post(config::update_config),
        )
        .route("/continuous-profiling/list", post(http::query_list))
        .route("/continuous-profiling/download", post(http::download))
        .route("/continuous-profiling/components", get(http::components))
        .route(
            "/continuous-profiling/estimate_size",
            get(http::estimate_size),
        )
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
