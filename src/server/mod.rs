mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum_auth::AuthBearer;
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use self::state::*;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::search_handler,
        api::stats_handler,
        api::index_handler,
        api::index_status_handler,
        api::index_cancel_handler,
        api::metrics_handler,
    ),
    components(schemas(types::SearchForm, types::SearchResponse, types::IndexRequest, types::JobStatus))
)]
pub struct ApiDoc;

/// 校验 `Authorization: Bearer <token>`
async fn auth(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if token != state.token {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(request).await)
}

/// 构建API服务器
pub fn create_app(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/search", post(api::search_handler))
        .route("/stats", get(api::stats_handler))
        .route("/index", post(api::index_handler))
        .route("/index/status", get(api::index_status_handler))
        .route("/index/cancel", post(api::index_cancel_handler))
        .route("/metrics", get(api::metrics_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth));

    Router::new()
        .merge(api)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::disable())
        // 上传限制：10M
        .layer(RequestBodyLimitLayer::new(1024 * 1024 * 10))
        .with_state(state)
}
