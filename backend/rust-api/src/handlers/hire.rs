use std::sync::Arc;

use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use mongodb::bson::oid::ObjectId;
use validator::Validate;

use crate::{
    error::ApiError,
    middlewares::auth::JwtClaims,
    models::student::{HireRecordResponse, HireRequestPayload, RespondHireRequest},
    services::{hire_service::HireService, AppState},
};

/// POST /api/auth/tutors/sessions - student (or parent on their behalf)
/// submits a hire request to a tutor.
pub async fn request_hire(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Json(payload): Json<HireRequestPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    // Students may only hire for themselves; parents and admins may act on
    // behalf of a student account.
    match claims.role.as_str() {
        "student" => {
            if claims.sub != payload.student_user_id {
                return Err(ApiError::Forbidden(
                    "You can only submit hire requests for your own account".to_string(),
                ));
            }
        }
        "parent" | "admin" => {}
        _ => {
            return Err(ApiError::Forbidden("Student role required".to_string()));
        }
    }

    let service = HireService::new(state.mongo.clone());
    let record = service.request_hire(&payload).await?;

    Ok((StatusCode::CREATED, Json(HireRecordResponse::from(&record))))
}

/// PUT /api/auth/tutors/hire-requests/respond - tutor accepts or rejects.
pub async fn respond_hire(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Json(payload): Json<RespondHireRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if claims.role != "tutor" && claims.role != "admin" {
        return Err(ApiError::Forbidden("Tutor role required".to_string()));
    }

    let tutor_user_id = parse_object_id(&claims.sub, "user id")?;

    let service = HireService::new(state.mongo.clone());
    let record = service.respond_to_hire(&tutor_user_id, &payload).await?;

    Ok(Json(HireRecordResponse::from(&record)))
}

fn parse_object_id(value: &str, field: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(value)
        .map_err(|_| ApiError::Validation(format!("Invalid {}: must be an ObjectId", field)))
}
