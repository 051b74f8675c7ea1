// libs/otp-cell/src/handlers.rs
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use shared_models::error::AppError;

use crate::models::{SendOtpRequest, VerificationOutcome, VerifyOtpRequest};
use crate::services::verification::OtpService;

/// POST /otp/send
#[axum::debug_handler]
pub async fn send_otp(
    State(service): State<Arc<OtpService>>,
    Json(request): Json<SendOtpRequest>,
) -> Result<Json<Value>, AppError> {
    let user_id = request
        .user_id
        .ok_or_else(|| AppError::validation("user_id", "Provide user_id to request OTP."))?;

    service
        .send_otp(user_id, request.verif_type, &request.target)
        .await?;

    Ok(Json(json!({
        "success": true,
        "detail": "If the account exists, an OTP has been sent."
    })))
}

/// POST /otp/verify
///
/// Every outcome carries its reason code; failures use the status code
/// the client keys its message on (429 for an exhausted attempt budget).
#[axum::debug_handler]
pub async fn verify_otp(
    State(service): State<Arc<OtpService>>,
    Json(request): Json<VerifyOtpRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let max_len = service.policy().code_length;
    if request.otp.is_empty() || request.otp.chars().count() > max_len {
        return Err(AppError::validation(
            "otp",
            format!("Ensure this field has no more than {} characters.", max_len),
        ));
    }

    let outcome = service
        .verify_otp(request.verif_type, &request.target, &request.otp)
        .await?;

    let (status, detail) = match outcome {
        VerificationOutcome::Verified => (StatusCode::OK, format!("{} verified.", request.verif_type)),
        VerificationOutcome::Expired => (StatusCode::BAD_REQUEST, "OTP expired. Request a new OTP.".to_string()),
        VerificationOutcome::TooManyAttempts => (StatusCode::TOO_MANY_REQUESTS, "Too many attempts.".to_string()),
        VerificationOutcome::AlreadyUsed => (StatusCode::BAD_REQUEST, "OTP already used.".to_string()),
        VerificationOutcome::Invalid => (StatusCode::BAD_REQUEST, "Invalid OTP.".to_string()),
    };

    Ok((status, Json(json!({
        "success": outcome.is_success(),
        "reason": outcome.reason(),
        "detail": detail
    }))))
}
