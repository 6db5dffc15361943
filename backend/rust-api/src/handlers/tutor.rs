use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use mongodb::bson::oid::ObjectId;
use validator::Validate;

use crate::{
    error::ApiError,
    middlewares::auth::JwtClaims,
    models::inquiry::{InquiryResponse, ReplyInquiryRequest},
    models::session::{
        CreateSessionRequest, DecideRescheduleRequest, SessionResponse, UpdateSessionRequest,
    },
    services::{inquiry_service::InquiryService, session_service::SessionService, AppState},
};

const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// POST /api/tutor/sessions
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    headers: HeaderMap,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_tutor_role(&claims)?;
    payload
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let tutor_user_id = parse_object_id(&claims.sub, "user id")?;
    let idempotency_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    let service = SessionService::new(
        state.mongo.clone(),
        state.redis.clone(),
        state.config.booking_policy(),
    );
    let session = service
        .create_session(&tutor_user_id, &payload, idempotency_key)
        .await?;

    Ok((StatusCode::CREATED, Json(SessionResponse::from(&session))))
}

/// GET /api/tutor/sessions
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_tutor_role(&claims)?;
    let tutor_user_id = parse_object_id(&claims.sub, "user id")?;

    let service = SessionService::new(
        state.mongo.clone(),
        state.redis.clone(),
        state.config.booking_policy(),
    );
    let sessions = service.list_sessions_for_tutor(&tutor_user_id).await?;

    let payload = sessions
        .iter()
        .map(SessionResponse::from)
        .collect::<Vec<_>>();
    Ok(Json(payload))
}

/// PUT /api/tutor/sessions/update/{session_id}
pub async fn update_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
    Json(payload): Json<UpdateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_tutor_role(&claims)?;
    payload
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let tutor_user_id = parse_object_id(&claims.sub, "user id")?;
    let session_id = parse_object_id(&session_id, "session_id")?;

    let service = SessionService::new(
        state.mongo.clone(),
        state.redis.clone(),
        state.config.booking_policy(),
    );
    let session = service
        .update_session(&tutor_user_id, &session_id, &payload)
        .await?;

    Ok(Json(SessionResponse::from(&session)))
}

/// DELETE /api/tutor/sessions/delete/{session_id}
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_tutor_role(&claims)?;
    let tutor_user_id = parse_object_id(&claims.sub, "user id")?;
    let session_id = parse_object_id(&session_id, "session_id")?;

    let service = SessionService::new(
        state.mongo.clone(),
        state.redis.clone(),
        state.config.booking_policy(),
    );
    service.delete_session(&tutor_user_id, &session_id).await?;

    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// PUT /api/tutor/sessions/{session_id}/reschedule/decide
pub async fn decide_reschedule(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
    Json(payload): Json<DecideRescheduleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_tutor_role(&claims)?;
    let tutor_user_id = parse_object_id(&claims.sub, "user id")?;
    let session_id = parse_object_id(&session_id, "session_id")?;

    let service = SessionService::new(
        state.mongo.clone(),
        state.redis.clone(),
        state.config.booking_policy(),
    );
    let session = service
        .decide_reschedule(&tutor_user_id, &session_id, payload.action)
        .await?;

    Ok(Json(SessionResponse::from(&session)))
}

/// GET /api/tutor/inquiries
pub async fn list_inquiries(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_tutor_role(&claims)?;
    let tutor_user_id = parse_object_id(&claims.sub, "user id")?;

    let service = InquiryService::new(state.mongo.clone());
    let inquiries = service.list_for_tutor(&tutor_user_id).await?;

    let payload = inquiries
        .iter()
        .map(InquiryResponse::from)
        .collect::<Vec<_>>();
    Ok(Json(payload))
}

/// PUT /api/tutor/inquiries/{inquiry_id}/read
pub async fn mark_inquiry_read(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(inquiry_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_tutor_role(&claims)?;
    let tutor_user_id = parse_object_id(&claims.sub, "user id")?;
    let inquiry_id = parse_object_id(&inquiry_id, "inquiry_id")?;

    let service = InquiryService::new(state.mongo.clone());
    service.mark_read(&tutor_user_id, &inquiry_id).await?;

    Ok(Json(serde_json::json!({ "read": true })))
}

/// PUT /api/tutor/inquiries/{inquiry_id}/reply
pub async fn reply_inquiry(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(inquiry_id): Path<String>,
    Json(payload): Json<ReplyInquiryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_tutor_role(&claims)?;
    payload
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let tutor_user_id = parse_object_id(&claims.sub, "user id")?;
    let inquiry_id = parse_object_id(&inquiry_id, "inquiry_id")?;

    let service = InquiryService::new(state.mongo.clone());
    let inquiry = service.reply(&tutor_user_id, &inquiry_id, &payload).await?;

    Ok(Json(InquiryResponse::from(&inquiry)))
}

/// POST /api/tutor/inquiries/{inquiry_id}/convert
pub async fn convert_inquiry(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(inquiry_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_tutor_role(&claims)?;
    let tutor_user_id = parse_object_id(&claims.sub, "user id")?;
    let inquiry_id = parse_object_id(&inquiry_id, "inquiry_id")?;

    let service = InquiryService::new(state.mongo.clone());
    service
        .convert_to_booking(&tutor_user_id, &inquiry_id)
        .await?;

    Ok(Json(serde_json::json!({ "converted": true })))
}

fn ensure_tutor_role(claims: &JwtClaims) -> Result<(), ApiError> {
    if claims.role == "tutor" || claims.role == "admin" {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Tutor role required".to_string()))
    }
}

fn parse_object_id(value: &str, field: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(value)
        .map_err(|_| ApiError::Validation(format!("Invalid {}: must be an ObjectId", field)))
}
