use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::LoggingError;
use super::AppState;
use crate::adapter::middleware::request_logging::REQUEST_ID_HEADER;
use crate::domain::entity::{LogEntry, LogLevel};
use crate::usecase::EmitLogInput;

/// テスト発行イベントに付ける context。
pub const TEST_CONTEXT: &str = "TEST_CONTROLLER";

const DEFAULT_PAGE: u32 = 1;
const DEFAULT_LIMIT: u32 = 10;

// --- Request / Response DTOs ---

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct TestLogRequest {
    pub message: String,
    /// error / warn / info / debug。省略時は info。
    #[serde(default)]
    pub level: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct TestLogResponse {
    pub message: String,
    pub level: LogLevel,
    pub content: String,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListEntriesQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct DateRangeQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogEntryResponse {
    pub id: Option<i64>,
    pub level: LogLevel,
    pub message: String,
    pub context: Option<String>,
    pub method: Option<String>,
    pub url: Option<String>,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub user_id: Option<i64>,
    pub status_code: Option<i32>,
    pub response_time_ms: Option<i64>,
    pub request_id: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<serde_json::Value>,
    pub timestamp: String,
    pub created_at: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct PaginationResponse {
    pub page: u32,
    pub limit: u32,
    /// このページで返した件数。
    pub total: usize,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ListEntriesResponse {
    pub data: Vec<LogEntryResponse>,
    pub pagination: PaginationResponse,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequestEntriesResponse {
    pub data: Vec<LogEntryResponse>,
    pub request_id: String,
    pub total: usize,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserEntriesResponse {
    pub data: Vec<LogEntryResponse>,
    pub user_id: i64,
    pub total: usize,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeResponse {
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeEntriesResponse {
    pub data: Vec<LogEntryResponse>,
    pub date_range: DateRangeResponse,
    pub total: usize,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ReadinessResponse {
    pub status: String,
    pub producer: bool,
    pub consumer: bool,
}

// --- Helpers ---

fn to_entry_response(entry: LogEntry) -> LogEntryResponse {
    LogEntryResponse {
        id: entry.id,
        level: entry.level,
        message: entry.message,
        context: entry.context,
        method: entry.method,
        url: entry.url,
        user_agent: entry.user_agent,
        ip: entry.ip,
        user_id: entry.user_id,
        status_code: entry.status_code,
        response_time_ms: entry.response_time_ms,
        request_id: entry.request_id,
        metadata: entry.metadata.map(serde_json::Value::Object),
        timestamp: entry.timestamp.to_rfc3339(),
        created_at: entry.created_at.map(|t| t.to_rfc3339()),
    }
}

fn to_entry_responses(entries: Vec<LogEntry>) -> Vec<LogEntryResponse> {
    entries.into_iter().map(to_entry_response).collect()
}

fn parse_positive(name: &str, raw: Option<&str>, default: u32) -> Result<u32, LoggingError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(v) => match v.parse::<u32>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(LoggingError::Validation(format!(
                "{name} must be a positive integer: {v}"
            ))),
        },
    }
}

fn parse_id(name: &str, raw: &str) -> Result<i64, LoggingError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| LoggingError::Validation(format!("{name} must be numeric: {raw}")))
}

/// オフセット無しの日時として受け付ける書式。UTC とみなす。
const NAIVE_DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// RFC 3339、オフセット無しの ISO 8601 日時、YYYY-MM-DD を受け付ける。
/// 日付のみの場合、開始は 00:00、終了はその日の終わり（UTC）。
pub(crate) fn parse_date_bound(raw: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(naive) = NAIVE_DATE_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
    {
        return Some(naive.and_utc());
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let time = if end_of_day {
        NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999)?
    } else {
        NaiveTime::MIN
    };
    Some(date.and_time(time).and_utc())
}

fn required_date(
    name: &str,
    raw: Option<&str>,
    end_of_day: bool,
) -> Result<DateTime<Utc>, LoggingError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| LoggingError::Validation(format!("{name} is required")))?;
    parse_date_bound(raw, end_of_day)
        .ok_or_else(|| LoggingError::Validation(format!("{name} is not a valid date: {raw}")))
}

// --- Handlers ---

#[utoipa::path(get, path = "/healthz", responses((status = 200, description = "Health check OK")))]
pub async fn healthz() -> &'static str {
    "ok"
}

#[utoipa::path(
    get,
    path = "/readyz",
    responses(
        (status = 200, description = "Broker connections are open", body = ReadinessResponse),
        (status = 503, description = "Producer or consumer is disconnected", body = ReadinessResponse),
    )
)]
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let producer = state.emit_log_uc.is_healthy();
    let consumer = state.consumer_health.is_healthy();
    let ready = producer && consumer;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            status: if ready { "ready" } else { "not_ready" }.to_string(),
            producer,
            consumer,
        }),
    )
}

#[utoipa::path(get, path = "/metrics", responses((status = 200, description = "Prometheus metrics")))]
pub async fn metrics(State(state): State<AppState>) -> String {
    state.metrics.gather_metrics()
}

#[utoipa::path(
    post,
    path = "/v1/logging/test",
    request_body = TestLogRequest,
    responses(
        (status = 201, description = "Log entry queued", body = TestLogResponse),
        (status = 400, description = "Invalid request", body = super::error::ErrorResponse),
    )
)]
pub async fn emit_test_log(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<TestLogRequest>, JsonRejection>,
) -> Result<impl IntoResponse, LoggingError> {
    let Json(req) = body.map_err(|e| LoggingError::Validation(e.body_text()))?;
    let level = match req.level.as_deref() {
        None => LogLevel::Info,
        Some(raw) => LogLevel::from_str_value(raw)
            .map_err(|e| LoggingError::Validation(e.to_string()))?,
    };
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let queued = state
        .emit_log_uc
        .execute(EmitLogInput {
            context: Some(TEST_CONTEXT.to_string()),
            request_id,
            ..EmitLogInput::new(level, req.message.clone())
        })
        .await;
    if !queued {
        // 発行失敗はログに残すだけで、呼び出し元には返さない
        tracing::warn!(level = %level, "test log event could not be queued");
    }

    Ok((
        StatusCode::CREATED,
        Json(TestLogResponse {
            message: "Log entry queued successfully".to_string(),
            level,
            content: req.message,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/v1/logging/entries",
    params(ListEntriesQuery),
    responses(
        (status = 200, description = "Log entries, newest first", body = ListEntriesResponse),
        (status = 400, description = "Invalid paging parameters", body = super::error::ErrorResponse),
    )
)]
pub async fn list_entries(
    State(state): State<AppState>,
    Query(query): Query<ListEntriesQuery>,
) -> Result<Json<ListEntriesResponse>, LoggingError> {
    let page = parse_positive("page", query.page.as_deref(), DEFAULT_PAGE)?;
    let limit = parse_positive("limit", query.limit.as_deref(), DEFAULT_LIMIT)?
        .min(state.max_page_size);

    let entries = state.list_log_entries_uc.execute(page, limit).await?;
    let total = entries.len();

    Ok(Json(ListEntriesResponse {
        data: to_entry_responses(entries),
        pagination: PaginationResponse { page, limit, total },
    }))
}

#[utoipa::path(
    get,
    path = "/v1/logging/entries/request/{requestId}",
    params(("requestId" = String, Path, description = "Correlation request id")),
    responses((status = 200, description = "Log entries, oldest first", body = RequestEntriesResponse))
)]
pub async fn entries_by_request_id(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<RequestEntriesResponse>, LoggingError> {
    let entries = state.get_by_request_id_uc.execute(&request_id).await?;
    let total = entries.len();
    Ok(Json(RequestEntriesResponse {
        data: to_entry_responses(entries),
        request_id,
        total,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/logging/entries/user/{userId}",
    params(("userId" = String, Path, description = "Numeric user id")),
    responses(
        (status = 200, description = "Log entries, newest first", body = UserEntriesResponse),
        (status = 400, description = "Non-numeric user id", body = super::error::ErrorResponse),
    )
)]
pub async fn entries_by_user_id(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserEntriesResponse>, LoggingError> {
    let user_id = parse_id("userId", &user_id)?;
    let entries = state.get_by_user_id_uc.execute(user_id).await?;
    let total = entries.len();
    Ok(Json(UserEntriesResponse {
        data: to_entry_responses(entries),
        user_id,
        total,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/logging/entries/date-range",
    params(DateRangeQuery),
    responses(
        (status = 200, description = "Log entries in range, oldest first", body = DateRangeEntriesResponse),
        (status = 400, description = "Missing or invalid dates", body = super::error::ErrorResponse),
    )
)]
pub async fn entries_by_date_range(
    State(state): State<AppState>,
    Query(query): Query<DateRangeQuery>,
) -> Result<Json<DateRangeEntriesResponse>, LoggingError> {
    let start = required_date("startDate", query.start_date.as_deref(), false)?;
    let end = required_date("endDate", query.end_date.as_deref(), true)?;
    if start > end {
        return Err(LoggingError::Validation(
            "startDate must not be after endDate".to_string(),
        ));
    }

    let entries = state.get_by_date_range_uc.execute(start, end).await?;
    let total = entries.len();
    Ok(Json(DateRangeEntriesResponse {
        data: to_entry_responses(entries),
        date_range: DateRangeResponse {
            start_date: query.start_date.unwrap_or_default(),
            end_date: query.end_date.unwrap_or_default(),
        },
        total,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/logging/entries/{id}",
    params(("id" = i64, Path, description = "Log entry id")),
    responses(
        (status = 200, description = "Log entry found", body = LogEntryResponse),
        (status = 404, description = "Log entry not found", body = super::error::ErrorResponse),
    )
)]
pub async fn get_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LogEntryResponse>, LoggingError> {
    let id = parse_id("id", &id)?;
    let entry = state
        .get_log_entry_uc
        .execute(id)
        .await?
        .ok_or_else(|| LoggingError::NotFound(id.to_string()))?;
    Ok(Json(to_entry_response(entry)))
}

#[utoipa::path(
    delete,
    path = "/v1/logging/entries/{id}",
    params(("id" = i64, Path, description = "Log entry id")),
    responses((status = 204, description = "Log entry removed (or already absent)"))
)]
pub async fn delete_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, LoggingError> {
    let id = parse_id("id", &id)?;
    state.delete_log_entry_uc.execute(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
