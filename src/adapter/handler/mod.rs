pub mod error;
pub mod logging_handler;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::adapter::middleware::request_logging::request_logging;
use crate::infrastructure::metrics::Metrics;
use crate::infrastructure::rabbitmq::BrokerHealth;
use crate::usecase::{
    DeleteLogEntryUseCase, EmitLogUseCase, GetLogEntriesByDateRangeUseCase,
    GetLogEntriesByRequestIdUseCase, GetLogEntriesByUserIdUseCase, GetLogEntryUseCase,
    ListLogEntriesUseCase,
};

pub use error::{ErrorBody, ErrorResponse, LoggingError};

/// AppState はアプリケーション全体の共有状態を表す。
#[derive(Clone)]
pub struct AppState {
    pub emit_log_uc: Arc<EmitLogUseCase>,
    pub list_log_entries_uc: Arc<ListLogEntriesUseCase>,
    pub get_by_request_id_uc: Arc<GetLogEntriesByRequestIdUseCase>,
    pub get_by_user_id_uc: Arc<GetLogEntriesByUserIdUseCase>,
    pub get_by_date_range_uc: Arc<GetLogEntriesByDateRangeUseCase>,
    pub get_log_entry_uc: Arc<GetLogEntryUseCase>,
    pub delete_log_entry_uc: Arc<DeleteLogEntryUseCase>,
    pub metrics: Arc<Metrics>,
    pub consumer_health: Arc<dyn BrokerHealth>,
    /// `limit` クエリの上限。
    pub max_page_size: u32,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        logging_handler::healthz,
        logging_handler::readyz,
        logging_handler::metrics,
        logging_handler::emit_test_log,
        logging_handler::list_entries,
        logging_handler::entries_by_request_id,
        logging_handler::entries_by_user_id,
        logging_handler::entries_by_date_range,
        logging_handler::get_entry,
        logging_handler::delete_entry,
    ),
    components(schemas(
        logging_handler::TestLogRequest,
        logging_handler::TestLogResponse,
        logging_handler::LogEntryResponse,
        logging_handler::ListEntriesResponse,
        logging_handler::PaginationResponse,
        logging_handler::RequestEntriesResponse,
        logging_handler::UserEntriesResponse,
        logging_handler::DateRangeResponse,
        logging_handler::DateRangeEntriesResponse,
        logging_handler::ReadinessResponse,
        ErrorResponse,
        ErrorBody,
    )),
)]
pub struct ApiDoc;

async fn openapi_json() -> axum::Json<utoipa::openapi::OpenApi> {
    axum::Json(ApiDoc::openapi())
}

/// REST API ルーターを構築する。
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/healthz", get(logging_handler::healthz))
        .route("/readyz", get(logging_handler::readyz))
        .route("/metrics", get(logging_handler::metrics))
        .route("/api-docs/openapi.json", get(openapi_json));

    // date-range / request / user は {id} より具体的なので axum が優先して解決する
    let api_routes = Router::new()
        .route("/v1/logging/test", post(logging_handler::emit_test_log))
        .route("/v1/logging/entries", get(logging_handler::list_entries))
        .route(
            "/v1/logging/entries/date-range",
            get(logging_handler::entries_by_date_range),
        )
        .route(
            "/v1/logging/entries/request/{requestId}",
            get(logging_handler::entries_by_request_id),
        )
        .route(
            "/v1/logging/entries/user/{userId}",
            get(logging_handler::entries_by_user_id),
        )
        .route(
            "/v1/logging/entries/{id}",
            get(logging_handler::get_entry).delete(logging_handler::delete_entry),
        );

    public_routes
        .merge(api_routes)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            request_logging,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
