// libs/appointment-cell/src/services/store.rs
use std::cmp::Reverse;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use shared_database::supabase::{SupabaseClient, SupabaseError};

use crate::models::{
    conflict_window, Appointment, AppointmentError, AppointmentSearchQuery, AppointmentStatus,
};
use crate::services::conflict::find_conflict;

/// Persistence for appointments.
///
/// `insert_checked` and `update_checked` re-run the conflict window check
/// atomically with their write and fail with `ConflictDetected` when another
/// active appointment of the same doctor got there first.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn insert_checked(&self, appointment: &Appointment) -> Result<Appointment, AppointmentError>;

    async fn update_checked(&self, appointment: &Appointment) -> Result<Appointment, AppointmentError>;

    /// Write the transition fields (`status`, `reason`, `meet_link`,
    /// `started_at`, `completed_at`). `scheduled_time` keeps its stored value.
    async fn update(&self, appointment: &Appointment) -> Result<Appointment, AppointmentError>;

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError>;

    /// Ordered by `scheduled_time` descending.
    async fn list(&self, query: &AppointmentSearchQuery) -> Result<Vec<Appointment>, AppointmentError>;

    /// Active appointments of the doctor inside the window around `time`.
    async fn find_active_near(
        &self,
        doctor_id: Uuid,
        time: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<Vec<Appointment>, AppointmentError>;

    /// Move every untouched confirmed appointment scheduled before `cutoff`
    /// to `missed`. Returns how many were changed.
    async fn mark_missed_before(&self, cutoff: DateTime<Utc>) -> Result<usize, AppointmentError>;
}

fn paginate(rows: Vec<Appointment>, query: &AppointmentSearchQuery) -> Vec<Appointment> {
    let offset = query.offset.unwrap_or(0).max(0) as usize;
    let iter = rows.into_iter().skip(offset);
    match query.limit {
        Some(limit) if limit >= 0 => iter.take(limit as usize).collect(),
        _ => iter.collect(),
    }
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

#[derive(Default)]
pub struct InMemoryAppointmentStore {
    appointments: RwLock<Vec<Appointment>>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.appointments.read().await.len()
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn insert_checked(&self, appointment: &Appointment) -> Result<Appointment, AppointmentError> {
        let mut appointments = self.appointments.write().await;

        if appointment.is_active()
            && find_conflict(appointments.iter(), appointment.doctor_id, appointment.scheduled_time, None).is_some()
        {
            return Err(AppointmentError::ConflictDetected);
        }

        appointments.push(appointment.clone());
        Ok(appointment.clone())
    }

    async fn update_checked(&self, appointment: &Appointment) -> Result<Appointment, AppointmentError> {
        let mut appointments = self.appointments.write().await;

        if appointment.is_active()
            && find_conflict(
                appointments.iter(),
                appointment.doctor_id,
                appointment.scheduled_time,
                Some(appointment.id),
            )
            .is_some()
        {
            return Err(AppointmentError::ConflictDetected);
        }

        let slot = appointments
            .iter_mut()
            .find(|a| a.id == appointment.id)
            .ok_or(AppointmentError::NotFound)?;
        *slot = appointment.clone();
        Ok(appointment.clone())
    }

    async fn update(&self, appointment: &Appointment) -> Result<Appointment, AppointmentError> {
        let mut appointments = self.appointments.write().await;
        let index = appointments
            .iter()
            .position(|a| a.id == appointment.id)
            .ok_or(AppointmentError::NotFound)?;

        let stored = &appointments[index];
        if !stored.is_active()
            && appointment.is_active()
            && find_conflict(appointments.iter(), stored.doctor_id, stored.scheduled_time, Some(stored.id)).is_some()
        {
            return Err(AppointmentError::ConflictDetected);
        }

        let slot = &mut appointments[index];
        slot.status = appointment.status;
        slot.reason = appointment.reason.clone();
        slot.meet_link = appointment.meet_link.clone();
        slot.started_at = appointment.started_at;
        slot.completed_at = appointment.completed_at;
        Ok(slot.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        Ok(self.appointments.read().await.iter().find(|a| a.id == id).cloned())
    }

    async fn list(&self, query: &AppointmentSearchQuery) -> Result<Vec<Appointment>, AppointmentError> {
        let mut rows: Vec<Appointment> = self
            .appointments
            .read()
            .await
            .iter()
            .filter(|a| query.matches(a))
            .cloned()
            .collect();
        rows.sort_by_key(|a| Reverse(a.scheduled_time));
        Ok(paginate(rows, query))
    }

    async fn find_active_near(
        &self,
        doctor_id: Uuid,
        time: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let window = conflict_window();
        Ok(self
            .appointments
            .read()
            .await
            .iter()
            .filter(|a| {
                a.doctor_id == doctor_id
                    && a.is_active()
                    && Some(a.id) != exclude_appointment_id
                    && a.scheduled_time >= time - window
                    && a.scheduled_time <= time + window
            })
            .cloned()
            .collect())
    }

    async fn mark_missed_before(&self, cutoff: DateTime<Utc>) -> Result<usize, AppointmentError> {
        let mut appointments = self.appointments.write().await;
        let mut changed = 0;
        for apt in appointments.iter_mut().filter(|a| {
            a.status == AppointmentStatus::Confirmed
                && a.scheduled_time < cutoff
                && a.started_at.is_none()
                && a.meet_link.is_none()
        }) {
            apt.status = AppointmentStatus::Missed;
            changed += 1;
        }
        Ok(changed)
    }
}

// ==============================================================================
// SUPABASE STORE
// ==============================================================================

/// PostgREST-backed store. Checked writes go through the
/// `book_appointment` / `reschedule_appointment` SQL functions, which take
/// a per-doctor advisory lock and raise `23P01` (HTTP 409) on overlap.
pub struct SupabaseAppointmentStore {
    supabase: Arc<SupabaseClient>,
    token: String,
}

impl SupabaseAppointmentStore {
    pub fn new(supabase: Arc<SupabaseClient>, token: impl Into<String>) -> Self {
        Self {
            supabase,
            token: token.into(),
        }
    }

    fn map_write_error(e: anyhow::Error) -> AppointmentError {
        match e.downcast_ref::<SupabaseError>() {
            Some(SupabaseError::Conflict { .. }) => AppointmentError::ConflictDetected,
            Some(SupabaseError::NotFound { message }) if message.contains("doctor") => {
                AppointmentError::DoctorNotFound
            }
            Some(SupabaseError::NotFound { .. }) => AppointmentError::NotFound,
            _ => AppointmentError::DatabaseError(e.to_string()),
        }
    }

    fn parse_rows(rows: Vec<Value>) -> Result<Vec<Appointment>, AppointmentError> {
        rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse appointments: {}", e)))
    }

    fn first_row(rows: Vec<Value>) -> Result<Appointment, AppointmentError> {
        Self::parse_rows(rows)?
            .into_iter()
            .next()
            .ok_or(AppointmentError::NotFound)
    }

    fn row_params(appointment: &Appointment) -> Value {
        json!({
            "p_id": appointment.id,
            "p_patient_id": appointment.patient_id,
            "p_doctor_id": appointment.doctor_id,
            "p_scheduled_time": appointment.scheduled_time,
            "p_status": appointment.status,
            "p_reason": appointment.reason,
            "p_meet_link": appointment.meet_link,
            "p_started_at": appointment.started_at,
            "p_completed_at": appointment.completed_at,
            "p_created_at": appointment.created_at,
        })
    }

    async fn get_rows(&self, path: &str) -> Result<Vec<Value>, AppointmentError> {
        self.supabase
            .request(Method::GET, path, Some(&self.token), None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))
    }
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn insert_checked(&self, appointment: &Appointment) -> Result<Appointment, AppointmentError> {
        let rows: Vec<Value> = self
            .supabase
            .rpc("book_appointment", Some(&self.token), Self::row_params(appointment))
            .await
            .map_err(Self::map_write_error)?;

        Self::first_row(rows)
    }

    async fn update_checked(&self, appointment: &Appointment) -> Result<Appointment, AppointmentError> {
        let rows: Vec<Value> = self
            .supabase
            .rpc("reschedule_appointment", Some(&self.token), Self::row_params(appointment))
            .await
            .map_err(Self::map_write_error)?;

        Self::first_row(rows)
    }

    async fn update(&self, appointment: &Appointment) -> Result<Appointment, AppointmentError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment.id);
        let body = json!({
            "status": appointment.status,
            "reason": appointment.reason,
            "meet_link": appointment.meet_link,
            "started_at": appointment.started_at,
            "completed_at": appointment.completed_at,
        });

        let rows: Vec<Value> = self
            .supabase
            .request_returning(Method::PATCH, &path, Some(&self.token), Some(body))
            .await
            .map_err(Self::map_write_error)?;

        Self::first_row(rows)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", id);
        let rows = self.get_rows(&path).await?;
        Ok(Self::parse_rows(rows)?.into_iter().next())
    }

    async fn list(&self, query: &AppointmentSearchQuery) -> Result<Vec<Appointment>, AppointmentError> {
        let mut query_parts = Vec::new();

        if let Some(patient_id) = query.patient_id {
            query_parts.push(format!("patient_id=eq.{}", patient_id));
        }
        if let Some(doctor_id) = query.doctor_id {
            query_parts.push(format!("doctor_id=eq.{}", doctor_id));
        }
        if let Some(status) = query.status {
            query_parts.push(format!("status=eq.{}", status));
        }
        query_parts.push("order=scheduled_time.desc".to_string());
        if let Some(limit) = query.limit {
            query_parts.push(format!("limit={}", limit));
        }
        if let Some(offset) = query.offset {
            query_parts.push(format!("offset={}", offset));
        }

        let path = format!("/rest/v1/appointments?{}", query_parts.join("&"));
        Self::parse_rows(self.get_rows(&path).await?)
    }

    async fn find_active_near(
        &self,
        doctor_id: Uuid,
        time: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let window = conflict_window();
        let mut query_parts = vec![
            format!("doctor_id=eq.{}", doctor_id),
            "status=in.(requested,confirmed)".to_string(),
            format!("scheduled_time=gte.{}", urlencoding::encode(&(time - window).to_rfc3339())),
            format!("scheduled_time=lte.{}", urlencoding::encode(&(time + window).to_rfc3339())),
        ];

        if let Some(exclude_id) = exclude_appointment_id {
            query_parts.push(format!("id=neq.{}", exclude_id));
        }

        let path = format!("/rest/v1/appointments?{}", query_parts.join("&"));
        Self::parse_rows(self.get_rows(&path).await?)
    }

    async fn mark_missed_before(&self, cutoff: DateTime<Utc>) -> Result<usize, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?status=eq.confirmed&scheduled_time=lt.{}&started_at=is.null&meet_link=is.null&select=id",
            urlencoding::encode(&cutoff.to_rfc3339())
        );

        let rows: Vec<Value> = self
            .supabase
            .request_returning(
                Method::PATCH,
                &path,
                Some(&self.token),
                Some(json!({ "status": AppointmentStatus::Missed })),
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        if !rows.is_empty() {
            info!("Marked {} appointments missed", rows.len());
        } else {
            debug!("No stale confirmed appointments before {}", cutoff);
        }
        Ok(rows.len())
    }
}
