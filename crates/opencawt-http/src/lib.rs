//! The OpenCawt HTTP surface (spec §6, §12): an axum router over
//! `AppState`, assembled from one route module per area and wrapped in
//! CORS and a small security-headers layer.

pub mod auth;
pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use state::AppState;

use axum::http::{HeaderValue, Method};
use axum::middleware::{self, Next};
use axum::response::Response;
use tower_http::cors::{AllowOrigin, CorsLayer};

async fn security_headers(request: axum::extract::Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    response
}

fn cors_layer(cors_origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
        .allow_credentials(false);
    if cors_origin == "*" {
        layer.allow_origin(tower_http::cors::Any)
    } else {
        match HeaderValue::from_str(cors_origin) {
            Ok(origin) => layer.allow_origin(origin),
            Err(_) => layer.allow_origin(AllowOrigin::list(Vec::<HeaderValue>::new())),
        }
    }
}

/// Build the full router. `opencawt-node` binds this to a listener; tests
/// build it over an in-memory store and drive it with `tower::ServiceExt`.
pub fn build_router(state: AppState) -> axum::Router {
    let cors = cors_layer(&state.config.cors_origin);

    axum::Router::new()
        .merge(routes::agents::router())
        .merge(routes::cases::router())
        .merge(routes::agreements::router())
        .merge(routes::internal::router())
        .merge(routes::diagnostics::router())
        .layer(middleware::from_fn(security_headers))
        .layer(cors)
        .with_state(state)
}
