// src/routes.rs
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use http::{header::CONTENT_TYPE, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use crate::{handlers, state::AppState};

pub fn create_routes(state: AppState) -> Router {
    let api = Router::new()
        .route("/polls", post(handlers::create_poll))
        .route("/polls/{slug}", get(handlers::get_poll))
        .route("/polls/{slug}/vote", post(handlers::vote_poll))
        .route("/polls/{slug}/results", get(handlers::poll_results))
        .route("/polls/{slug}/results/stream", get(handlers::poll_results_stream))
        .route("/surveys", post(handlers::create_survey))
        .route("/surveys/{slug}", get(handlers::get_survey))
        .route("/surveys/{slug}/vote", post(handlers::vote_survey))
        .route("/surveys/{slug}/results", get(handlers::survey_results))
        .route("/surveys/{slug}/results/stream", get(handlers::survey_results_stream))
        .route("/owners/{owner_id}/surveys", get(handlers::owner_surveys));

    Router::new().nest("/api", api).with_state(state)
}

pub fn cors(origin: Option<&str>) -> CorsLayer {
    let allow_origin = match origin.map(str::parse::<HeaderValue>) {
        Some(Ok(origin)) => AllowOrigin::exact(origin),
        Some(Err(e)) => {
            warn!("Invalid CORS_ORIGIN ({e}), allowing any origin");
            AllowOrigin::any()
        }
        None => AllowOrigin::any(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60))
}
