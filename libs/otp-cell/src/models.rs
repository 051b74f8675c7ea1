// libs/otp-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::error::AppError;

// ==============================================================================
// VERIFICATION RECORD
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VerificationType {
    Email,
    Phone,
}

impl VerificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationType::Email => "email",
            VerificationType::Phone => "phone",
        }
    }

    /// Profile flag flipped once a target of this type is verified.
    pub fn verified_flag(&self) -> &'static str {
        match self {
            VerificationType::Email => "email_verified",
            VerificationType::Phone => "phone_verified",
        }
    }
}

impl fmt::Display for VerificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One issued passcode for a `(verif_type, target)` pair. A new record is
/// created for every send; only the salted digest of the code is kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub verif_type: VerificationType,
    pub target: String,
    pub otp_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub used: bool,
}

/// Result of checking a candidate code. Serialized as the reason code.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    Verified,
    Invalid,
    Expired,
    TooManyAttempts,
    AlreadyUsed,
}

impl VerificationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, VerificationOutcome::Verified)
    }

    pub fn reason(&self) -> &'static str {
        match self {
            VerificationOutcome::Verified => "verified",
            VerificationOutcome::Invalid => "invalid",
            VerificationOutcome::Expired => "expired",
            VerificationOutcome::TooManyAttempts => "too_many_attempts",
            VerificationOutcome::AlreadyUsed => "already_used",
        }
    }

    /// `(success, reason)` pair as exposed to collaborators.
    pub fn as_pair(&self) -> (bool, &'static str) {
        (self.is_success(), self.reason())
    }
}

impl fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

// ==============================================================================
// POLICY
// ==============================================================================

pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;
pub const MIN_CODE_LENGTH: usize = 4;
pub const MAX_CODE_LENGTH: usize = 12;

#[derive(Debug, Clone)]
pub struct OtpPolicy {
    pub ttl_minutes: i64,
    pub code_length: usize,
    pub max_attempts: i32,
}

impl Default for OtpPolicy {
    fn default() -> Self {
        Self {
            ttl_minutes: 10,
            code_length: 6,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Clamps `OTP_LENGTH` into the supported code length range.
impl From<&AppConfig> for OtpPolicy {
    fn from(config: &AppConfig) -> Self {
        let code_length = config.otp_length.clamp(MIN_CODE_LENGTH, MAX_CODE_LENGTH);
        if code_length != config.otp_length {
            warn!(
                "OTP_LENGTH={} is outside {}..={}, using {}",
                config.otp_length, MIN_CODE_LENGTH, MAX_CODE_LENGTH, code_length
            );
        }

        Self {
            ttl_minutes: config.otp_ttl_minutes,
            code_length,
            max_attempts: config.otp_max_attempts,
        }
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendOtpRequest {
    pub verif_type: VerificationType,
    pub target: String,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOtpRequest {
    pub verif_type: VerificationType,
    pub target: String,
    pub otp: String,
}

/// Handle on a sent code; never carries the plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentOtp {
    pub verification_id: Uuid,
    pub verif_type: VerificationType,
    pub expires_at: Option<DateTime<Utc>>,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum OtpError {
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("User not found")]
    UserNotFound,

    #[error("Verification not found")]
    VerificationNotFound,

    #[error("Failed to deliver code: {0}")]
    Delivery(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl OtpError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        OtpError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl From<OtpError> for AppError {
    fn from(err: OtpError) -> Self {
        match err {
            OtpError::Validation { field, message } => AppError::validation(field, message),
            OtpError::UserNotFound => AppError::NotFound("User not found.".to_string()),
            OtpError::VerificationNotFound => AppError::NotFound("Verification not found.".to_string()),
            OtpError::Delivery(_) => AppError::ExternalService("Failed to send OTP.".to_string()),
            OtpError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_clamps_configured_code_length() {
        let policy = |otp_length| {
            OtpPolicy::from(&AppConfig {
                otp_length,
                ..AppConfig::default()
            })
        };

        assert_eq!(policy(2).code_length, MIN_CODE_LENGTH);
        assert_eq!(policy(40).code_length, MAX_CODE_LENGTH);
        assert_eq!(policy(8).code_length, 8);
        assert_eq!(policy(8).max_attempts, AppConfig::default().otp_max_attempts);
    }

    #[test]
    fn test_outcome_reason_codes() {
        assert_eq!(VerificationOutcome::Verified.as_pair(), (true, "verified"));
        assert_eq!(VerificationOutcome::Invalid.as_pair(), (false, "invalid"));
        assert_eq!(VerificationOutcome::Expired.as_pair(), (false, "expired"));
        assert_eq!(VerificationOutcome::TooManyAttempts.as_pair(), (false, "too_many_attempts"));
        assert_eq!(VerificationOutcome::AlreadyUsed.as_pair(), (false, "already_used"));
    }

    #[test]
    fn test_outcome_serializes_as_reason() {
        let value = serde_json::to_value(VerificationOutcome::TooManyAttempts).unwrap();
        assert_eq!(value, "too_many_attempts");
    }

    #[test]
    fn test_verification_type_wire_names() {
        let parsed: VerificationType = serde_json::from_str("\"phone\"").unwrap();
        assert_eq!(parsed, VerificationType::Phone);
        assert_eq!(VerificationType::Email.verified_flag(), "email_verified");
    }
}
