use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::auth;
use super::handlers::{accounts, commands, system};

fn build_localhost_cors(api_port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", api_port),
        format!("http://localhost:{}", api_port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/stats", get(system::get_stats_endpoint))
        .route("/api/accounts", get(accounts::get_accounts_endpoint))
        .route(
            "/api/accounts/{id}/activity",
            get(accounts::get_activity_endpoint),
        )
        .route(
            "/api/accounts/{id}/messages",
            get(accounts::get_messages_endpoint),
        )
        .route(
            "/api/accounts/{id}/status",
            post(accounts::update_status_endpoint),
        )
        .route(
            "/api/accounts/{id}/check-session",
            post(accounts::check_session_endpoint),
        )
        .route(
            "/api/accounts/{id}/clear-history",
            post(accounts::clear_history_endpoint),
        )
        .route(
            "/api/accounts/{id}/collect",
            post(accounts::trigger_collect_endpoint),
        )
        .route("/api/broadcast", post(commands::broadcast_endpoint))
        .route("/api/commands", get(commands::get_commands_endpoint))
        .route("/api/system/toggle", post(system::toggle_system_endpoint))
        .route(
            "/api/config/rewards",
            get(system::get_rewards_config_endpoint),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors(state.api_port))
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}
