// libs/appointment-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::error::AppError;

/// Half-width of the exclusion window around an active appointment.
pub const CONFLICT_WINDOW_MINUTES: i64 = 30;
/// A meeting may be started from `scheduled_time` up to this many minutes later.
pub const START_WINDOW_MINUTES: i64 = 30;
/// Grace period after `scheduled_time` before an untouched confirmed
/// appointment is swept to `missed`.
pub const MISSED_GRACE_MINUTES: i64 = 5;

pub fn conflict_window() -> Duration {
    Duration::minutes(CONFLICT_WINDOW_MINUTES)
}

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub scheduled_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    pub meet_link: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Appointment {
    pub fn new(
        patient_id: Uuid,
        doctor_id: Uuid,
        scheduled_time: DateTime<Utc>,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id,
            doctor_id,
            scheduled_time,
            status: AppointmentStatus::Requested,
            reason,
            meet_link: None,
            started_at: None,
            completed_at: None,
            created_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Whether `actor_id` is a party to this appointment.
    pub fn involves(&self, actor_id: Uuid) -> bool {
        self.patient_id == actor_id || self.doctor_id == actor_id
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Requested,
    Confirmed,
    Completed,
    Cancelled,
    Pending,
    Missed,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Requested => "requested",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Missed => "missed",
        }
    }

    /// Statuses that hold a slot in the doctor's schedule.
    pub fn is_active(&self) -> bool {
        matches!(self, AppointmentStatus::Requested | AppointmentStatus::Confirmed)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub doctor_id: Uuid,
    pub scheduled_time: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Partial update. `meet_link` distinguishes "absent" from an explicit
/// `null` so a link can be cleared.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub status: Option<AppointmentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "double_option")]
    pub meet_link: Option<Option<String>>,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

impl UpdateAppointmentRequest {
    /// True when only `status` and/or `meet_link` are being changed.
    pub fn is_status_only(&self) -> bool {
        self.scheduled_time.is_none() && self.reason.is_none()
    }
}

/// `scheduled_time` arrives as text so that an unparseable value surfaces
/// as `invalid_time` rather than a generic body rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub scheduled_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetMeetLinkRequest {
    pub meet_link: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentSearchQuery {
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

impl AppointmentSearchQuery {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.patient_id.is_none_or(|id| appointment.patient_id == id)
            && self.doctor_id.is_none_or(|id| appointment.doctor_id == id)
            && self.status.is_none_or(|status| appointment.status == status)
    }

    pub fn validate_paging(&self) -> Result<(), AppointmentError> {
        if self.limit.is_some_and(|limit| limit < 0) {
            return Err(AppointmentError::validation("limit", "Ensure this value is greater than or equal to 0."));
        }
        if self.offset.is_some_and(|offset| offset < 0) {
            return Err(AppointmentError::validation("offset", "Ensure this value is greater than or equal to 0."));
        }
        Ok(())
    }
}

// ==============================================================================
// PRESCRIPTION MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prescription {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub uploaded_by: Option<Uuid>,
    pub file: Option<String>,
    #[serde(default)]
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadPrescriptionRequest {
    /// Reference returned by the file storage collaborator.
    pub file: String,
    #[serde(default)]
    pub notes: String,
}

/// A prescription together with the appointment it belongs to, which
/// carries the parties needed for access checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrescriptionWithAppointment {
    #[serde(flatten)]
    pub prescription: Prescription,
    pub appointment: Appointment,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Prescription not found")]
    PrescriptionNotFound,

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Invalid appointment time: {0}")]
    InvalidTime(String),

    #[error("Doctor is not available at the chosen time.")]
    ConflictDetected,

    #[error("Meeting can only be started during scheduled time window")]
    OutsideWindow,

    #[error("Appointment is already completed and cannot be changed")]
    AlreadyCompleted,

    #[error("Appointment cannot be moved from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Not authorized to act on this appointment")]
    NotAuthorized,

    #[error("File not available")]
    FileUnavailable,

    #[error("Prescription already exists for this appointment")]
    DuplicatePrescription,

    #[error("Validation error on {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl AppointmentError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppointmentError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Stable reason code for logs and client messaging.
    pub fn code(&self) -> &'static str {
        match self {
            AppointmentError::NotFound
            | AppointmentError::PrescriptionNotFound
            | AppointmentError::FileUnavailable => "not_found",
            AppointmentError::DoctorNotFound => "doctor_not_found",
            AppointmentError::InvalidTime(_) => "invalid_time",
            AppointmentError::ConflictDetected => "scheduling_conflict",
            AppointmentError::OutsideWindow => "outside_window",
            AppointmentError::AlreadyCompleted => "already_completed",
            AppointmentError::InvalidTransition { .. } => "invalid_transition",
            AppointmentError::NotAuthorized => "not_authorized",
            AppointmentError::DuplicatePrescription => "duplicate_prescription",
            AppointmentError::Validation { .. } => "validation_error",
            AppointmentError::DatabaseError(_) => "database_error",
        }
    }
}

impl From<AppointmentError> for AppError {
    fn from(e: AppointmentError) -> Self {
        match e {
            AppointmentError::NotFound => AppError::NotFound("Appointment not found".to_string()),
            AppointmentError::PrescriptionNotFound => {
                AppError::NotFound("Prescription not found".to_string())
            }
            AppointmentError::FileUnavailable => AppError::NotFound("File not available".to_string()),
            AppointmentError::DoctorNotFound => AppError::validation("doctor_id", "Doctor not found."),
            AppointmentError::InvalidTime(msg) => AppError::validation("scheduled_time", msg),
            AppointmentError::ConflictDetected => AppError::conflict(
                "scheduled_time",
                "Doctor is not available at the chosen time.",
            ),
            AppointmentError::OutsideWindow
            | AppointmentError::AlreadyCompleted
            | AppointmentError::InvalidTransition { .. } => AppError::BadRequest(e.to_string()),
            AppointmentError::NotAuthorized => {
                AppError::Forbidden("You are not allowed to update this appointment.".to_string())
            }
            AppointmentError::DuplicatePrescription => AppError::conflict(
                "appointment",
                "A prescription already exists for this appointment.",
            ),
            AppointmentError::Validation { field, message } => AppError::validation(field, message),
            AppointmentError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}

/// serde helper for `Option<Option<T>>` fields: absent -> `None`,
/// `null` -> `Some(None)`.
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, T>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}
