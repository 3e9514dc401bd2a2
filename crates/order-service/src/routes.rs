//! 路由配置

use axum::{
    Router, middleware,
    routing::{get, post},
};
use order_shared::observability::middleware as obs_middleware;

use crate::{handlers, state::AppState};

/// 业务 API 路由，挂载在 /api 下
pub fn api_routes() -> Router<AppState> {
    Router::new().route("/orders", post(handlers::create_order))
}

/// 完整应用路由，包含健康检查与可观测性中间件
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api", api_routes())
        .route("/health", get(handlers::health_check))
        .layer(middleware::from_fn(obs_middleware::access_log))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state)
}
