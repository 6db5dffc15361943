use std::sync::Arc;

use axum::{
    body::Bytes,
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
    models::payment::{CheckoutResponse, RequestPaymentRequest},
    services::{
        gateway::{
            GatewayClient, GatewayEvent, EVENT_CHECKOUT_COMPLETED, EVENT_CHECKOUT_FAILED,
            SIGNATURE_HEADER,
        },
        hire_service::HireService,
        payment_service::PaymentService,
        AppState,
    },
};

/// POST /api/payment/create-checkout-session - open a pending ledger row and
/// a hosted checkout at the gateway.
pub async fn create_checkout_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Json(payload): Json<RequestPaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if claims.role != "student" && claims.role != "parent" {
        return Err(ApiError::Forbidden("Student role required".to_string()));
    }
    payload
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let student_user_id = parse_object_id(&claims.sub, "user id")?;
    let tutor_id = parse_object_id(&payload.tutor_id, "tutor_id")?;
    let academic_level_id = parse_object_id(&payload.academic_level_id, "academic_level_id")?;

    let hire_service = HireService::new(state.mongo.clone());
    let profile = hire_service.find_student_by_user(&student_user_id).await?;
    let student_id = profile.id.ok_or(ApiError::NotFound("student profile"))?;

    let payment_service = PaymentService::new(state.mongo.clone());
    let payment = payment_service
        .request_payment(
            student_id,
            tutor_id,
            &payload.subject,
            academic_level_id,
            payload.payment_type,
        )
        .await?;
    let payment_id = payment.id.ok_or(ApiError::NotFound("payment"))?;

    let gateway = GatewayClient::new(
        state.config.gateway_url.clone(),
        state.config.gateway_secret.clone(),
    );
    let checkout = gateway
        .create_checkout_session(
            &payment,
            &state.config.checkout_success_url,
            &state.config.checkout_cancel_url,
        )
        .await?;

    payment_service
        .attach_gateway_session(&payment_id, &checkout.id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            payment_id: payment_id.to_hex(),
            checkout_url: checkout.url,
            amount: payment.monthly_amount,
        }),
    ))
}

/// POST /api/payment/webhook - gateway confirmation callback.
///
/// Authenticated by the HMAC body signature, not by JWT. A replayed event is
/// acknowledged with 200 so the gateway stops retrying; genuine store errors
/// return 500 so it retries later.
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Forbidden("Missing webhook signature".to_string()))?;

    if !GatewayClient::verify_signature(&state.config.gateway_secret, &body, signature) {
        tracing::warn!("Webhook signature verification failed");
        return Err(ApiError::Forbidden("Invalid webhook signature".to_string()));
    }

    let event: GatewayEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::Validation(format!("Malformed webhook payload: {}", e)))?;
    let payment_id = parse_object_id(&event.reference, "reference")?;

    let payment_service = PaymentService::new(state.mongo.clone());
    let outcome = match event.event_type.as_str() {
        EVENT_CHECKOUT_COMPLETED => payment_service.confirm_payment(&payment_id).await.map(|_| ()),
        EVENT_CHECKOUT_FAILED => payment_service.mark_failed(&payment_id).await,
        other => {
            tracing::debug!("Ignoring unhandled gateway event type: {}", other);
            Ok(())
        }
    };

    match outcome {
        Ok(()) => Ok(Json(serde_json::json!({ "received": true }))),
        // Replays are acknowledged, not retried
        Err(ApiError::AlreadyProcessed(msg)) => {
            tracing::info!("Webhook replay ignored: {}", msg);
            Ok(Json(serde_json::json!({ "received": true })))
        }
        Err(err) => Err(err),
    }
}

/// GET /api/auth/student/payment-status/{user_id} - which hired tuples still
/// lack a valid payment (dashboard warning banner feed).
pub async fn payment_status(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // Students may only read their own status
    if claims.role == "student" && claims.sub != user_id {
        return Err(ApiError::Forbidden(
            "You can only view your own payment status".to_string(),
        ));
    }

    let student_user_id = parse_object_id(&user_id, "user_id")?;

    let hire_service = HireService::new(state.mongo.clone());
    let profile = hire_service.find_student_by_user(&student_user_id).await?;

    let payment_service = PaymentService::new(state.mongo.clone());
    let entries = payment_service.payment_status_for_student(&profile).await?;

    Ok(Json(entries))
}

fn parse_object_id(value: &str, field: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(value)
        .map_err(|_| ApiError::Validation(format!("Invalid {}: must be an ObjectId", field)))
}
