//! JSON transport for the approval workflow.
//!
//! - `POST /api/approvals`                                   request approval
//! - `GET  /api/approvals/{record_id}`                       status snapshot
//! - `POST /api/approvals/{record_id}/approve`               approve the active step
//! - `POST /api/approvals/{record_id}/reject`                reject the active step
//! - `POST /api/approvals/{record_id}/withdraw`              withdraw a pending chain
//! - `GET  /api/approvers/{approver_id}/pending`             approver work queue
//! - `GET  /api/notices/{notice_id}/approvals`               approval history
//! - `GET  /api/notices/{notice_id}/approvals/latest`        latest record for a notice
//! - `GET  /api/notices/{notice_id}/publishable`             publish gate decision
//! - `POST /api/signatures`                                  capture a signature image
//! - `GET  /api/signatures/{signature_ref}`                  fetch a signature image
//! - `GET  /api/gate/signals`                                undelivered gate signals
//! - `POST /api/gate/signals/{event_id}/ack`                 acknowledge a gate signal
//! - `GET  /api/users/{user_id}/notifications`               inbox
//! - `POST /api/users/{user_id}/notifications/{id}/read`     mark one read
//! - `POST /api/users/{user_id}/notifications/read-all`      mark all read
//! - `PUT  /api/directory/notices/{notice_id}`               registry sync (admin)
//! - `PUT  /api/directory/approvers/{approver_id}`           registry sync (admin)

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use noticeboard_core::approvals::ApprovalRequest;
use noticeboard_core::config::AdminConfig;
use noticeboard_core::domain::approval::{ApprovalSnapshot, RecordId};
use noticeboard_core::domain::event::{OutboxEntry, OutboxEventId};
use noticeboard_core::domain::notice::{ApproverRef, NoticeId, NoticeRef, UserId};
use noticeboard_core::domain::notification::NotificationId;
use noticeboard_core::domain::signature::SignatureRef;
use noticeboard_core::errors::{ApplicationError, ApprovalError, ErrorKind, InterfaceError};
use noticeboard_core::gate::GateDecision;
use noticeboard_core::signature::SignaturePayload;
use noticeboard_service::{
    ApproveInput, InboxPage, RejectInput, Services, SignatureReceipt, WithdrawInput,
};

pub const CORRELATION_HEADER: &str = "x-correlation-id";
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Clone)]
pub struct ApiState {
    services: Services,
    admin: AdminConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorKind,
    pub message: String,
    pub correlation_id: String,
}

type ApiFailure = (StatusCode, Json<ErrorBody>);
type ApiResult<T> = Result<Json<T>, ApiFailure>;

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct CaptureSignatureRequest {
    /// Data URL or bare base64.
    pub image: String,
    #[serde(default)]
    pub captured_by: Option<UserId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AckResponse {
    pub event_id: OutboxEventId,
    pub acknowledged: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadAllResponse {
    pub user_id: UserId,
    pub updated: u64,
}

#[derive(Debug, Deserialize)]
pub struct NoticeSyncRequest {
    #[serde(default)]
    pub author_id: Option<UserId>,
    pub requires_approval: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApproverSyncRequest {
    pub display_name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

pub fn router(services: Services, admin: AdminConfig) -> Router {
    Router::new()
        .route("/api/approvals", post(request_approval))
        .route("/api/approvals/{record_id}", get(get_status))
        .route("/api/approvals/{record_id}/approve", post(approve))
        .route("/api/approvals/{record_id}/reject", post(reject))
        .route("/api/approvals/{record_id}/withdraw", post(withdraw))
        .route("/api/approvers/{approver_id}/pending", get(pending_for))
        .route("/api/notices/{notice_id}/approvals", get(history_for))
        .route("/api/notices/{notice_id}/approvals/latest", get(status_for_notice))
        .route("/api/notices/{notice_id}/publishable", get(is_publishable))
        .route("/api/signatures", post(capture_signature))
        .route("/api/signatures/{signature_ref}", get(fetch_signature))
        .route("/api/gate/signals", get(gate_signals))
        .route("/api/gate/signals/{event_id}/ack", post(acknowledge_signal))
        .route("/api/users/{user_id}/notifications", get(list_notifications))
        .route("/api/users/{user_id}/notifications/read-all", post(mark_all_read))
        .route("/api/users/{user_id}/notifications/{notification_id}/read", post(mark_read))
        .route("/api/directory/notices/{notice_id}", put(sync_notice))
        .route("/api/directory/approvers/{approver_id}", put(sync_approver))
        .with_state(ApiState { services, admin })
}

// ---------------------------------------------------------------------------
// Approval chain
// ---------------------------------------------------------------------------

async fn request_approval(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<ApprovalRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApprovalSnapshot>), ApiFailure> {
    let correlation_id = correlation_id(&headers);
    let request = body(payload, &correlation_id)?;
    let snapshot = state
        .services
        .approvals
        .request_approval(request, &correlation_id)
        .await
        .map_err(|error| failure(error, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

async fn get_status(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(record_id): Path<String>,
) -> ApiResult<ApprovalSnapshot> {
    let correlation_id = correlation_id(&headers);
    state
        .services
        .approvals
        .get_status(&RecordId(record_id))
        .await
        .map(Json)
        .map_err(|error| failure(error, &correlation_id))
}

async fn approve(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(record_id): Path<String>,
    payload: Result<Json<ApproveInput>, JsonRejection>,
) -> ApiResult<ApprovalSnapshot> {
    let correlation_id = correlation_id(&headers);
    let input = body(payload, &correlation_id)?;
    state
        .services
        .approvals
        .approve(&RecordId(record_id), input, &correlation_id)
        .await
        .map(Json)
        .map_err(|error| failure(error, &correlation_id))
}

async fn reject(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(record_id): Path<String>,
    payload: Result<Json<RejectInput>, JsonRejection>,
) -> ApiResult<ApprovalSnapshot> {
    let correlation_id = correlation_id(&headers);
    let input = body(payload, &correlation_id)?;
    state
        .services
        .approvals
        .reject(&RecordId(record_id), input, &correlation_id)
        .await
        .map(Json)
        .map_err(|error| failure(error, &correlation_id))
}

async fn withdraw(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(record_id): Path<String>,
    payload: Result<Json<WithdrawInput>, JsonRejection>,
) -> ApiResult<ApprovalSnapshot> {
    let correlation_id = correlation_id(&headers);
    let mut input = body(payload, &correlation_id)?;
    input.admin_override = state.admin.accepts(header_value(&headers, ADMIN_TOKEN_HEADER));
    state
        .services
        .approvals
        .withdraw(&RecordId(record_id), input, &correlation_id)
        .await
        .map(Json)
        .map_err(|error| failure(error, &correlation_id))
}

// ---------------------------------------------------------------------------
// Projections and gate
// ---------------------------------------------------------------------------

async fn pending_for(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(approver_id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<ApprovalSnapshot>> {
    let correlation_id = correlation_id(&headers);
    state
        .services
        .queries
        .pending_for(&UserId(approver_id), query.limit)
        .await
        .map(Json)
        .map_err(|error| failure(error, &correlation_id))
}

async fn history_for(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(notice_id): Path<String>,
) -> ApiResult<Vec<ApprovalSnapshot>> {
    let correlation_id = correlation_id(&headers);
    state
        .services
        .queries
        .history_for(&NoticeId(notice_id))
        .await
        .map(Json)
        .map_err(|error| failure(error, &correlation_id))
}

async fn status_for_notice(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(notice_id): Path<String>,
) -> ApiResult<ApprovalSnapshot> {
    let correlation_id = correlation_id(&headers);
    state
        .services
        .queries
        .status_for_notice(&NoticeId(notice_id))
        .await
        .map(Json)
        .map_err(|error| failure(error, &correlation_id))
}

async fn is_publishable(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(notice_id): Path<String>,
) -> ApiResult<GateDecision> {
    let correlation_id = correlation_id(&headers);
    state
        .services
        .gate
        .is_publishable(&NoticeId(notice_id))
        .await
        .map(Json)
        .map_err(|error| failure(error, &correlation_id))
}

async fn gate_signals(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<OutboxEntry>> {
    let correlation_id = correlation_id(&headers);
    state
        .services
        .gate
        .pending_signals(query.limit)
        .await
        .map(Json)
        .map_err(|error| failure(error, &correlation_id))
}

async fn acknowledge_signal(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(event_id): Path<String>,
) -> ApiResult<AckResponse> {
    let correlation_id = correlation_id(&headers);
    let event_id = OutboxEventId(event_id);
    let acknowledged = state
        .services
        .gate
        .acknowledge(&event_id, &correlation_id)
        .await
        .map_err(|error| failure(error, &correlation_id))?;
    Ok(Json(AckResponse { event_id, acknowledged }))
}

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

async fn capture_signature(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<CaptureSignatureRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SignatureReceipt>), ApiFailure> {
    let correlation_id = correlation_id(&headers);
    let request = body(payload, &correlation_id)?;
    let decoded = SignaturePayload::decode(&request.image)
        .map_err(|error| failure(error.into(), &correlation_id))?;
    let receipt = state
        .services
        .signatures
        .capture(decoded, request.captured_by, &correlation_id)
        .await
        .map_err(|error| failure(error, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn fetch_signature(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(signature_ref): Path<String>,
) -> Result<Response, ApiFailure> {
    let correlation_id = correlation_id(&headers);
    let blob = state
        .services
        .signatures
        .fetch(&SignatureRef(signature_ref))
        .await
        .map_err(|error| failure(error, &correlation_id))?;
    Ok(([(header::CONTENT_TYPE, blob.content_type)], blob.bytes).into_response())
}

// ---------------------------------------------------------------------------
// Inbox
// ---------------------------------------------------------------------------

async fn list_notifications(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<InboxPage> {
    let correlation_id = correlation_id(&headers);
    state
        .services
        .inbox
        .list(&UserId(user_id), query.limit)
        .await
        .map(Json)
        .map_err(|error| failure(error, &correlation_id))
}

async fn mark_read(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((user_id, notification_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiFailure> {
    let correlation_id = correlation_id(&headers);
    state
        .services
        .inbox
        .mark_read(&NotificationId(notification_id), &UserId(user_id))
        .await
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(|error| failure(error, &correlation_id))
}

async fn mark_all_read(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> ApiResult<ReadAllResponse> {
    let correlation_id = correlation_id(&headers);
    let user_id = UserId(user_id);
    let updated = state
        .services
        .inbox
        .mark_all_read(&user_id)
        .await
        .map_err(|error| failure(error, &correlation_id))?;
    Ok(Json(ReadAllResponse { user_id, updated }))
}

// ---------------------------------------------------------------------------
// Directory sync
// ---------------------------------------------------------------------------

async fn sync_notice(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(notice_id): Path<String>,
    payload: Result<Json<NoticeSyncRequest>, JsonRejection>,
) -> ApiResult<NoticeRef> {
    let correlation_id = correlation_id(&headers);
    require_admin(&state, &headers, &correlation_id)?;
    let request = body(payload, &correlation_id)?;
    let notice = NoticeRef {
        notice_id: NoticeId(notice_id),
        author_id: request.author_id,
        requires_approval: request.requires_approval,
    };
    state
        .services
        .registry
        .upsert_notice(&notice)
        .await
        .map_err(|error| failure(error.into(), &correlation_id))?;
    info!(
        event_name = "directory.notice.synced",
        correlation_id = %correlation_id,
        notice_id = %notice.notice_id,
        requires_approval = notice.requires_approval,
        "notice registry entry synced"
    );
    Ok(Json(notice))
}

async fn sync_approver(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(approver_id): Path<String>,
    payload: Result<Json<ApproverSyncRequest>, JsonRejection>,
) -> ApiResult<ApproverRef> {
    let correlation_id = correlation_id(&headers);
    require_admin(&state, &headers, &correlation_id)?;
    let request = body(payload, &correlation_id)?;
    let approver = ApproverRef {
        approver_id: UserId(approver_id),
        display_name: request.display_name,
        role: request.role,
        active: request.active,
    };
    state
        .services
        .registry
        .upsert_approver(&approver)
        .await
        .map_err(|error| failure(error.into(), &correlation_id))?;
    info!(
        event_name = "directory.approver.synced",
        correlation_id = %correlation_id,
        approver_id = %approver.approver_id,
        active = approver.active,
        "approver registry entry synced"
    );
    Ok(Json(approver))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok()).map(str::trim).filter(|v| !v.is_empty())
}

fn correlation_id(headers: &HeaderMap) -> String {
    header_value(headers, CORRELATION_HEADER)
        .map(str::to_owned)
        .unwrap_or_else(|| format!("req-{}", Uuid::new_v4()))
}

fn require_admin(state: &ApiState, headers: &HeaderMap, correlation_id: &str) -> Result<(), ApiFailure> {
    if state.admin.accepts(header_value(headers, ADMIN_TOKEN_HEADER)) {
        Ok(())
    } else {
        Err(failure(
            ApprovalError::Forbidden("directory sync requires a valid admin token".to_owned()).into(),
            correlation_id,
        ))
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>, correlation_id: &str) -> Result<T, ApiFailure> {
    payload.map(|Json(value)| value).map_err(|rejection| {
        failure(ApprovalError::InvalidRequest(rejection.body_text()).into(), correlation_id)
    })
}

fn failure(error: ApplicationError, correlation_id: &str) -> ApiFailure {
    let interface = error.into_interface(correlation_id);
    let status = status_code(&interface);
    let kind = interface.kind();

    // Store and internal failures carry technical detail; callers get the
    // user-safe text instead.
    let message = match kind {
        ErrorKind::Unavailable | ErrorKind::Internal => interface.user_message().to_owned(),
        _ => interface.message().to_owned(),
    };

    if status.is_server_error() {
        error!(
            event_name = "api.request.failed",
            correlation_id,
            error_kind = kind.as_str(),
            status = status.as_u16(),
            error = interface.message(),
            "request failed"
        );
    } else {
        warn!(
            event_name = "api.request.refused",
            correlation_id,
            error_kind = kind.as_str(),
            status = status.as_u16(),
            error = interface.message(),
            "request refused"
        );
    }

    (status, Json(ErrorBody { error: kind, message, correlation_id: correlation_id.to_owned() }))
}

fn status_code(error: &InterfaceError) -> StatusCode {
    match error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
        Router,
    };
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use noticeboard_core::config::AppConfig;
    use noticeboard_db::{connect_with_settings, migrations};
    use noticeboard_service::Services;

    use super::router;

    const ADMIN_TOKEN: &str = "test-admin-token";
    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n', 1, 2, 3, 4];

    async fn app() -> Router {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let mut config = AppConfig::default();
        config.admin.token = Some(ADMIN_TOKEN.to_owned().into());
        router(Services::from_pool(&pool, &config), config.admin.clone())
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };

        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, bytes.to_vec())
    }

    async fn send_json(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let (status, bytes) = send(app, method, uri, body, headers).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    async fn request_chain(app: &Router, notice: &str, approvers: &[&str]) -> String {
        let (status, body) = send_json(
            app,
            Method::POST,
            "/api/approvals",
            Some(json!({ "notice_id": notice, "approver_ids": approvers, "requested_by": "author" })),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["record_id"].as_str().expect("record id").to_owned()
    }

    #[tokio::test]
    async fn three_approvers_in_order_make_the_notice_publishable() {
        let app = app().await;
        let record_id = request_chain(&app, "N-1", &["hod", "dean", "principal"]).await;

        let (_, status) =
            send_json(&app, Method::GET, &format!("/api/approvals/{record_id}"), None, &[]).await;
        assert_eq!(status["overall_status"], "pending");
        assert_eq!(status["current_index"], 0);

        for (index, actor) in ["hod", "dean", "principal"].into_iter().enumerate() {
            let (code, snapshot) = send_json(
                &app,
                Method::POST,
                &format!("/api/approvals/{record_id}/approve"),
                Some(json!({ "actor_id": actor, "comments": "ok" })),
                &[],
            )
            .await;
            assert_eq!(code, StatusCode::OK, "{snapshot}");
            assert_eq!(snapshot["approved_steps"], index + 1);
        }

        let (code, decision) =
            send_json(&app, Method::GET, "/api/notices/N-1/publishable", None, &[]).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(decision["publishable"], true);
        assert_eq!(decision["approval_status"], "approved");

        let (_, signals) = send_json(&app, Method::GET, "/api/gate/signals", None, &[]).await;
        let event_id = signals[0]["id"].as_str().expect("event id").to_owned();
        let (code, ack) = send_json(
            &app,
            Method::POST,
            &format!("/api/gate/signals/{event_id}/ack"),
            None,
            &[],
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(ack["acknowledged"], true);
    }

    #[tokio::test]
    async fn wrong_actor_is_refused_with_the_callers_correlation_id() {
        let app = app().await;
        let record_id = request_chain(&app, "N-2", &["hod", "dean"]).await;

        let (code, body) = send_json(
            &app,
            Method::POST,
            &format!("/api/approvals/{record_id}/approve"),
            Some(json!({ "actor_id": "dean" })),
            &[("x-correlation-id", "corr-42")],
        )
        .await;

        assert_eq!(code, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "not_your_turn");
        assert_eq!(body["correlation_id"], "corr-42");

        let (_, pending) =
            send_json(&app, Method::GET, "/api/approvers/hod/pending", None, &[]).await;
        assert_eq!(pending.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn rejection_is_terminal_and_requires_a_reason() {
        let app = app().await;
        let record_id = request_chain(&app, "N-3", &["hod", "dean"]).await;
        let reject_uri = format!("/api/approvals/{record_id}/reject");

        let (code, body) = send_json(
            &app,
            Method::POST,
            &reject_uri,
            Some(json!({ "actor_id": "hod", "reason": "  " })),
            &[],
        )
        .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "missing_reason");

        let (code, _) = send_json(
            &app,
            Method::POST,
            &reject_uri,
            Some(json!({ "actor_id": "hod", "reason": "wrong date" })),
            &[],
        )
        .await;
        assert_eq!(code, StatusCode::OK);

        let (code, body) = send_json(
            &app,
            Method::POST,
            &format!("/api/approvals/{record_id}/approve"),
            Some(json!({ "actor_id": "dean" })),
            &[],
        )
        .await;
        assert_eq!(code, StatusCode::CONFLICT);
        assert_eq!(body["error"], "already_decided");

        let (_, decision) =
            send_json(&app, Method::GET, "/api/notices/N-3/publishable", None, &[]).await;
        assert_eq!(decision["publishable"], false);
    }

    #[tokio::test]
    async fn duplicate_request_conflicts_and_unknown_record_is_not_found() {
        let app = app().await;
        request_chain(&app, "N-4", &["hod"]).await;

        let (code, body) = send_json(
            &app,
            Method::POST,
            "/api/approvals",
            Some(json!({ "notice_id": "N-4", "approver_ids": ["hod"], "requested_by": "author" })),
            &[],
        )
        .await;
        assert_eq!(code, StatusCode::CONFLICT);
        assert_eq!(body["error"], "already_pending");

        let (code, body) =
            send_json(&app, Method::GET, "/api/approvals/APR-missing", None, &[]).await;
        assert_eq!(code, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (code, body) =
            send_json(&app, Method::POST, "/api/approvals", Some(json!({ "notice_id": 7 })), &[])
                .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_request");
    }

    #[tokio::test]
    async fn admin_token_unblocks_a_stuck_chain() {
        let app = app().await;
        let record_id = request_chain(&app, "N-5", &["hod"]).await;
        let withdraw_uri = format!("/api/approvals/{record_id}/withdraw");
        let body = json!({ "actor_id": "office-admin", "reason": "approver on leave" });

        let (code, refused) =
            send_json(&app, Method::POST, &withdraw_uri, Some(body.clone()), &[]).await;
        assert_eq!(code, StatusCode::FORBIDDEN);
        assert_eq!(refused["error"], "forbidden");

        let (code, snapshot) = send_json(
            &app,
            Method::POST,
            &withdraw_uri,
            Some(body),
            &[("x-admin-token", ADMIN_TOKEN)],
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(snapshot["overall_status"], "withdrawn");

        let second = request_chain(&app, "N-5", &["dean"]).await;
        let (_, history) =
            send_json(&app, Method::GET, "/api/notices/N-5/approvals", None, &[]).await;
        assert_eq!(history.as_array().map(Vec::len), Some(2));
        assert_eq!(history[1]["record_id"], second.as_str());
        assert_eq!(history[1]["supersedes"], record_id.as_str());

        let (code, latest) =
            send_json(&app, Method::GET, "/api/notices/N-5/approvals/latest", None, &[]).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(latest["record_id"], second.as_str());

        let (code, _) =
            send_json(&app, Method::GET, "/api/notices/N-none/approvals/latest", None, &[]).await;
        assert_eq!(code, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn approval_that_never_persists_answers_service_unavailable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let mut config = AppConfig::default();
        config.approvals.cas_retry_limit = 2;
        let app = router(Services::from_pool(&pool, &config), config.admin.clone());
        let record_id = request_chain(&app, "N-busy", &["hod"]).await;

        // Every versioned update is skipped, so each write comes back stale.
        sqlx::query(
            "CREATE TRIGGER hold_record_version BEFORE UPDATE ON approval_record
             BEGIN SELECT RAISE(IGNORE); END",
        )
        .execute(&pool)
        .await
        .expect("trigger");

        let (code, body) = send_json(
            &app,
            Method::POST,
            &format!("/api/approvals/{record_id}/approve"),
            Some(json!({ "actor_id": "hod" })),
            &[("x-correlation-id", "req-busy")],
        )
        .await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "unavailable");
        assert_eq!(body["correlation_id"], "req-busy");
        assert!(!body["message"].as_str().unwrap_or_default().contains("approval_record"));

        let (_, status) =
            send_json(&app, Method::GET, &format!("/api/approvals/{record_id}"), None, &[]).await;
        assert_eq!(status["version"], 1);
    }

    #[tokio::test]
    async fn signed_approval_reflects_the_captured_signature() {
        let app = app().await;
        let record_id = request_chain(&app, "N-6", &["hod"]).await;

        let encoded = format!("data:image/png;base64,{}", STANDARD.encode(PNG));
        let (code, receipt) = send_json(
            &app,
            Method::POST,
            "/api/signatures",
            Some(json!({ "image": encoded, "captured_by": "hod" })),
            &[],
        )
        .await;
        assert_eq!(code, StatusCode::CREATED, "{receipt}");
        let signature_ref = receipt["signature_ref"].as_str().expect("ref").to_owned();
        assert_eq!(receipt["content_type"], "image/png");

        let (code, bytes) =
            send(&app, Method::GET, &format!("/api/signatures/{signature_ref}"), None, &[]).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(bytes, PNG);

        let (code, snapshot) = send_json(
            &app,
            Method::POST,
            &format!("/api/approvals/{record_id}/approve"),
            Some(json!({ "actor_id": "hod", "signature_ref": signature_ref })),
            &[],
        )
        .await;
        assert_eq!(code, StatusCode::OK, "{snapshot}");
        assert_eq!(snapshot["steps"][0]["signature_ref"], signature_ref.as_str());
        assert_eq!(snapshot["steps"][0]["signed"], true);

        let (code, body) = send_json(
            &app,
            Method::POST,
            "/api/signatures",
            Some(json!({ "image": "not base64 !!" })),
            &[],
        )
        .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_signature");
    }

    #[tokio::test]
    async fn directory_sync_requires_the_admin_token() {
        let app = app().await;
        let body = json!({ "author_id": "author", "requires_approval": false });

        let (code, _) = send_json(
            &app,
            Method::PUT,
            "/api/directory/notices/N-7",
            Some(body.clone()),
            &[],
        )
        .await;
        assert_eq!(code, StatusCode::FORBIDDEN);

        let (code, synced) = send_json(
            &app,
            Method::PUT,
            "/api/directory/notices/N-7",
            Some(body),
            &[("x-admin-token", ADMIN_TOKEN)],
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(synced["notice_id"], "N-7");

        let (_, decision) =
            send_json(&app, Method::GET, "/api/notices/N-7/publishable", None, &[]).await;
        assert_eq!(decision["approval_status"], "not_required");

        let (code, approver) = send_json(
            &app,
            Method::PUT,
            "/api/directory/approvers/hod",
            Some(json!({ "display_name": "Head of Department", "role": "hod" })),
            &[("x-admin-token", ADMIN_TOKEN)],
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(approver["active"], true);
    }

    #[tokio::test]
    async fn inbox_routes_scope_reads_to_the_owner() {
        let app = app().await;
        let (code, page) =
            send_json(&app, Method::GET, "/api/users/emp-1/notifications", None, &[]).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(page["unread"], 0);

        let (code, body) = send_json(
            &app,
            Method::POST,
            "/api/users/emp-1/notifications/NTF-missing/read",
            None,
            &[],
        )
        .await;
        assert_eq!(code, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (code, all) = send_json(
            &app,
            Method::POST,
            "/api/users/emp-1/notifications/read-all",
            None,
            &[],
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(all["updated"], 0);
    }
}
