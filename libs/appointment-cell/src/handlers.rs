// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::error::AppError;
use shared_utils::extractor::CurrentActor;

use crate::models::{
    AppointmentSearchQuery, CreateAppointmentRequest, RescheduleAppointmentRequest,
    SetMeetLinkRequest, UpdateAppointmentRequest, UploadPrescriptionRequest,
};
use crate::services::booking::AppointmentBookingService;
use crate::services::prescriptions::PrescriptionService;

/// Shared state for the appointment and prescription routers.
#[derive(Clone)]
pub struct AppointmentState {
    pub config: Arc<AppConfig>,
    pub booking: Arc<AppointmentBookingService>,
    pub prescriptions: Arc<PrescriptionService>,
}

// ==============================================================================
// APPOINTMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<AppointmentState>,
    CurrentActor(actor): CurrentActor,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let appointment = state.booking.create_appointment(&actor, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "appointment": appointment,
            "message": "Appointment requested successfully"
        })),
    ))
}

#[axum::debug_handler]
pub async fn list_appointments(
    State(state): State<AppointmentState>,
    CurrentActor(actor): CurrentActor,
    Query(query): Query<AppointmentSearchQuery>,
) -> Result<Json<Value>, AppError> {
    let appointments = state.booking.list_appointments(&actor, query).await?;

    Ok(Json(json!({
        "success": true,
        "appointments": appointments,
        "total": appointments.len()
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<AppointmentState>,
    CurrentActor(actor): CurrentActor,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.booking.get_appointment(appointment_id, &actor).await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn update_appointment(
    State(state): State<AppointmentState>,
    CurrentActor(actor): CurrentActor,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = state
        .booking
        .update_appointment(appointment_id, &actor, request)
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment updated successfully"
    })))
}

#[axum::debug_handler]
pub async fn start_meet(
    State(state): State<AppointmentState>,
    CurrentActor(actor): CurrentActor,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.booking.start_meeting(appointment_id, &actor).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "detail": "Meeting started"
    })))
}

#[axum::debug_handler]
pub async fn complete_meet(
    State(state): State<AppointmentState>,
    CurrentActor(actor): CurrentActor,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.booking.complete_meeting(appointment_id, &actor).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "detail": "Meeting completed"
    })))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<AppointmentState>,
    CurrentActor(actor): CurrentActor,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = state
        .booking
        .reschedule_appointment(appointment_id, &actor, request.scheduled_time.as_deref())
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "detail": "Appointment rescheduled successfully"
    })))
}

#[axum::debug_handler]
pub async fn set_meet_link(
    State(state): State<AppointmentState>,
    CurrentActor(actor): CurrentActor,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<SetMeetLinkRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = state
        .booking
        .set_meet_link(appointment_id, &actor, request.meet_link)
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "detail": "Meet link saved"
    })))
}

// ==============================================================================
// PRESCRIPTION HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn upload_prescription(
    State(state): State<AppointmentState>,
    CurrentActor(actor): CurrentActor,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UploadPrescriptionRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let prescription = state
        .prescriptions
        .upload(appointment_id, &actor, request)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "prescription": prescription
        })),
    ))
}

#[axum::debug_handler]
pub async fn list_prescriptions(
    State(state): State<AppointmentState>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<Value>, AppError> {
    let prescriptions = state.prescriptions.list(&actor).await?;

    Ok(Json(json!({
        "success": true,
        "prescriptions": prescriptions,
        "total": prescriptions.len()
    })))
}

/// Returns the storage reference; the bytes are served by the file store.
#[axum::debug_handler]
pub async fn download_prescription(
    State(state): State<AppointmentState>,
    CurrentActor(actor): CurrentActor,
    Path(prescription_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let file = state
        .prescriptions
        .file_for_download(prescription_id, &actor)
        .await?;
    let filename = file.rsplit('/').next().unwrap_or(&file).to_string();

    Ok(Json(json!({
        "success": true,
        "file": file,
        "filename": filename
    })))
}
