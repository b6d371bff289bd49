use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;

use crate::adapter::handler::AppState;
use crate::usecase::ApiRequestLog;

/// リクエスト ID を受け渡すヘッダー名。
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
const UNKNOWN_IP: &str = "unknown";

/// イベント化しないプローブ系パス。
const SKIPPED_PATHS: &[&str] = &["/healthz", "/readyz", "/metrics"];

/// AuthenticatedUserId は認証済みユーザーの ID。
///
/// 認証レイヤーがリクエストまたはレスポンスの extension に入れておくと、
/// API リクエストイベントの userId に載る。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUserId(pub i64);

/// request_logging は全リクエストを計測し、レスポンス後に API リクエストイベントを発行する。
///
/// 発行は別タスクで行い、結果はレスポンスに影響しない。
pub async fn request_logging(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let url = req
        .uri()
        .path_and_query()
        .map_or_else(|| req.uri().path().to_string(), |pq| pq.as_str().to_string());
    let path = req.uri().path().to_string();

    let request_id = request_id(req.headers());
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        // ハンドラーが同じ ID を参照できるようにリクエスト側にも入れる
        req.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    let user_agent = req
        .headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(req.headers(), peer);
    let request_user = req.extensions().get::<AuthenticatedUserId>().copied();

    let mut response = next.run(req).await;

    let elapsed = start.elapsed();
    let status = response.status().as_u16();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    state
        .metrics
        .record_http_request(&method, status, elapsed.as_secs_f64());

    if SKIPPED_PATHS.contains(&path.as_str()) {
        return response;
    }

    let user_id = response
        .extensions()
        .get::<AuthenticatedUserId>()
        .copied()
        .or(request_user)
        .map(|AuthenticatedUserId(id)| id);
    let entry = ApiRequestLog {
        method,
        url,
        status_code: status,
        response_time_ms: i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX),
        user_agent,
        ip: Some(ip),
        user_id,
        request_id: Some(request_id),
    };
    let emit_log_uc = state.emit_log_uc.clone();
    tokio::spawn(async move {
        emit_log_uc.log_api_request(entry).await;
    });

    response
}

/// 受信ヘッダーの x-request-id を使い、無ければ UUID v4 を採番する。
fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string)
}

/// x-forwarded-for の先頭、無ければ接続元アドレス。
pub(crate) fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_IP.to_string())
}
