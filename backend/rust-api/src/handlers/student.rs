use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use mongodb::bson::oid::ObjectId;
use serde::Serialize;
use validator::Validate;

use crate::{
    error::ApiError,
    middlewares::auth::JwtClaims,
    models::inquiry::{CreateInquiryRequest, InquiryResponse},
    models::session::{
        RateSessionRequest, RescheduleRequest, SessionResponse, SessionResponseRequest,
        SessionStatus,
    },
    services::{
        inquiry_service::InquiryService, payment_service::PaymentService,
        session_service::SessionService, AppState,
    },
};

/// Session as one student sees it: their effective status plus whether the
/// access window for this (tutor, subject, level) still needs paying for.
#[derive(Debug, Serialize)]
struct StudentSessionEntry {
    #[serde(flatten)]
    session: SessionResponse,
    effective_status: SessionStatus,
    effective_status_label: &'static str,
    payment_required: bool,
}

/// GET /api/student/sessions
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_student_role(&claims)?;
    let student_user_id = parse_object_id(&claims.sub, "user id")?;

    let session_service = SessionService::new(
        state.mongo.clone(),
        state.redis.clone(),
        state.config.booking_policy(),
    );
    let (profile, sessions) = session_service
        .list_sessions_for_student(&student_user_id)
        .await?;
    let student_id = profile.id.ok_or(ApiError::NotFound("student profile"))?;

    let payment_service = PaymentService::new(state.mongo.clone());
    let mut payload = Vec::with_capacity(sessions.len());
    for session in &sessions {
        let payment = payment_service
            .find_valid_payment(
                &student_id,
                &session.tutor_id,
                &session.subject,
                &session.academic_level,
            )
            .await?;

        let effective_status = session.effective_status_for(&student_id);
        payload.push(StudentSessionEntry {
            session: SessionResponse::from(session),
            effective_status,
            effective_status_label: effective_status.label(),
            payment_required: payment.is_none(),
        });
    }

    Ok(Json(payload))
}

/// POST /api/student/sessions/{session_id}/respond
pub async fn respond_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
    Json(payload): Json<SessionResponseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_student_role(&claims)?;
    let student_user_id = parse_object_id(&claims.sub, "user id")?;
    let session_id = parse_object_id(&session_id, "session_id")?;

    let service = SessionService::new(
        state.mongo.clone(),
        state.redis.clone(),
        state.config.booking_policy(),
    );
    let session = service
        .respond_to_session(&student_user_id, &session_id, payload.action)
        .await?;

    Ok(Json(SessionResponse::from(&session)))
}

/// POST /api/student/sessions/{session_id}/reschedule
pub async fn propose_reschedule(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
    Json(payload): Json<RescheduleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_student_role(&claims)?;
    let student_user_id = parse_object_id(&claims.sub, "user id")?;
    let session_id = parse_object_id(&session_id, "session_id")?;

    let service = SessionService::new(
        state.mongo.clone(),
        state.redis.clone(),
        state.config.booking_policy(),
    );
    let session = service
        .propose_reschedule(&student_user_id, &session_id, &payload.proposed_date)
        .await?;

    Ok(Json(SessionResponse::from(&session)))
}

/// POST /api/student/sessions/{session_id}/rate
pub async fn rate_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
    Json(payload): Json<RateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_student_role(&claims)?;
    payload
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let student_user_id = parse_object_id(&claims.sub, "user id")?;
    let session_id = parse_object_id(&session_id, "session_id")?;

    let service = SessionService::new(
        state.mongo.clone(),
        state.redis.clone(),
        state.config.booking_policy(),
    );
    let session = service
        .rate_session(&student_user_id, &session_id, &payload)
        .await?;

    Ok(Json(SessionResponse::from(&session)))
}

/// POST /api/student/inquiries
pub async fn create_inquiry(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Json(payload): Json<CreateInquiryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_student_role(&claims)?;
    payload
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let student_user_id = parse_object_id(&claims.sub, "user id")?;

    let service = InquiryService::new(state.mongo.clone());
    let inquiry = service.create_inquiry(&student_user_id, &payload).await?;

    Ok((StatusCode::CREATED, Json(InquiryResponse::from(&inquiry))))
}

fn ensure_student_role(claims: &JwtClaims) -> Result<(), ApiError> {
    if claims.role == "student" || claims.role == "parent" || claims.role == "admin" {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Student role required".to_string()))
    }
}

fn parse_object_id(value: &str, field: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(value)
        .map_err(|_| ApiError::Validation(format!("Invalid {}: must be an ObjectId", field)))
}
