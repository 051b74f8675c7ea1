// libs/appointment-cell/src/services/prescriptions.rs
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use shared_database::supabase::{is_conflict_error, SupabaseClient};
use shared_models::auth::{Actor, Role};
use shared_utils::clock::Clock;

use crate::models::{
    AppointmentError, AppointmentStatus, Prescription, PrescriptionWithAppointment,
    UploadPrescriptionRequest,
};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::store::AppointmentStore;

/// Which prescriptions a caller may list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrescriptionScope {
    All,
    /// Prescriptions on the patient's own appointments.
    Patient(Uuid),
    /// Prescriptions the doctor uploaded or that belong to their appointments.
    Doctor(Uuid),
}

impl PrescriptionScope {
    pub fn for_actor(actor: &Actor) -> Self {
        match actor.role {
            Role::Admin => PrescriptionScope::All,
            Role::Patient => PrescriptionScope::Patient(actor.user_id),
            Role::Doctor => PrescriptionScope::Doctor(actor.user_id),
        }
    }

    fn admits(&self, item: &PrescriptionWithAppointment) -> bool {
        match *self {
            PrescriptionScope::All => true,
            PrescriptionScope::Patient(id) => item.appointment.patient_id == id,
            PrescriptionScope::Doctor(id) => {
                item.prescription.uploaded_by == Some(id) || item.appointment.doctor_id == id
            }
        }
    }
}

#[async_trait]
pub trait PrescriptionStore: Send + Sync {
    /// Fails with `DuplicatePrescription` if the appointment already has one.
    async fn insert(&self, prescription: &Prescription) -> Result<Prescription, AppointmentError>;

    async fn get(&self, id: Uuid) -> Result<Option<PrescriptionWithAppointment>, AppointmentError>;

    /// Newest first.
    async fn list(&self, scope: PrescriptionScope) -> Result<Vec<PrescriptionWithAppointment>, AppointmentError>;
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

/// Joins against an appointment store for the embedded appointment.
pub struct InMemoryPrescriptionStore {
    prescriptions: RwLock<Vec<Prescription>>,
    appointments: Arc<dyn AppointmentStore>,
}

impl InMemoryPrescriptionStore {
    pub fn new(appointments: Arc<dyn AppointmentStore>) -> Self {
        Self {
            prescriptions: RwLock::new(Vec::new()),
            appointments,
        }
    }

    async fn join(&self, prescription: Prescription) -> Result<Option<PrescriptionWithAppointment>, AppointmentError> {
        Ok(self
            .appointments
            .get(prescription.appointment_id)
            .await?
            .map(|appointment| PrescriptionWithAppointment { prescription, appointment }))
    }
}

#[async_trait]
impl PrescriptionStore for InMemoryPrescriptionStore {
    async fn insert(&self, prescription: &Prescription) -> Result<Prescription, AppointmentError> {
        let mut prescriptions = self.prescriptions.write().await;
        if prescriptions.iter().any(|p| p.appointment_id == prescription.appointment_id) {
            return Err(AppointmentError::DuplicatePrescription);
        }
        prescriptions.push(prescription.clone());
        Ok(prescription.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PrescriptionWithAppointment>, AppointmentError> {
        let found = self.prescriptions.read().await.iter().find(|p| p.id == id).cloned();
        match found {
            Some(prescription) => self.join(prescription).await,
            None => Ok(None),
        }
    }

    async fn list(&self, scope: PrescriptionScope) -> Result<Vec<PrescriptionWithAppointment>, AppointmentError> {
        let snapshot = self.prescriptions.read().await.clone();

        let mut rows = Vec::with_capacity(snapshot.len());
        for prescription in snapshot {
            if let Some(item) = self.join(prescription).await? {
                if scope.admits(&item) {
                    rows.push(item);
                }
            }
        }
        rows.sort_by(|a, b| b.prescription.created_at.cmp(&a.prescription.created_at));
        Ok(rows)
    }
}

// ==============================================================================
// SUPABASE STORE
// ==============================================================================

const EMBED_APPOINTMENT: &str = "select=*,appointment:appointments!inner(*)";

pub struct SupabasePrescriptionStore {
    supabase: Arc<SupabaseClient>,
    token: String,
}

impl SupabasePrescriptionStore {
    pub fn new(supabase: Arc<SupabaseClient>, token: impl Into<String>) -> Self {
        Self {
            supabase,
            token: token.into(),
        }
    }

    async fn fetch(&self, filter: Option<String>) -> Result<Vec<PrescriptionWithAppointment>, AppointmentError> {
        let mut path = format!("/rest/v1/prescriptions?{}&order=created_at.desc", EMBED_APPOINTMENT);
        if let Some(filter) = filter {
            path.push('&');
            path.push_str(&filter);
        }

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(&self.token), None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<PrescriptionWithAppointment>, _>>()
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse prescriptions: {}", e)))
    }
}

#[async_trait]
impl PrescriptionStore for SupabasePrescriptionStore {
    async fn insert(&self, prescription: &Prescription) -> Result<Prescription, AppointmentError> {
        let body = serde_json::to_value(prescription)
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to encode prescription: {}", e)))?;

        let rows: Vec<Value> = self
            .supabase
            .request_returning(Method::POST, "/rest/v1/prescriptions", Some(&self.token), Some(body))
            .await
            .map_err(|e| {
                if is_conflict_error(&e) {
                    AppointmentError::DuplicatePrescription
                } else {
                    AppointmentError::DatabaseError(e.to_string())
                }
            })?;

        rows.into_iter()
            .next()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse prescription: {}", e)))?
            .ok_or_else(|| AppointmentError::DatabaseError("Insert returned no rows".to_string()))
    }

    async fn get(&self, id: Uuid) -> Result<Option<PrescriptionWithAppointment>, AppointmentError> {
        Ok(self.fetch(Some(format!("id=eq.{}", id))).await?.into_iter().next())
    }

    async fn list(&self, scope: PrescriptionScope) -> Result<Vec<PrescriptionWithAppointment>, AppointmentError> {
        match scope {
            PrescriptionScope::All => self.fetch(None).await,
            PrescriptionScope::Patient(id) => self.fetch(Some(format!("appointment.patient_id=eq.{}", id))).await,
            PrescriptionScope::Doctor(id) => {
                let mut rows = self.fetch(Some(format!("uploaded_by=eq.{}", id))).await?;
                let mut seen: HashSet<Uuid> = rows.iter().map(|r| r.prescription.id).collect();

                for row in self.fetch(Some(format!("appointment.doctor_id=eq.{}", id))).await? {
                    if seen.insert(row.prescription.id) {
                        rows.push(row);
                    }
                }
                rows.sort_by(|a, b| b.prescription.created_at.cmp(&a.prescription.created_at));
                Ok(rows)
            }
        }
    }
}

// ==============================================================================
// SERVICE
// ==============================================================================

pub struct PrescriptionService {
    prescriptions: Arc<dyn PrescriptionStore>,
    appointments: Arc<dyn AppointmentStore>,
    clock: Arc<dyn Clock>,
    lifecycle: AppointmentLifecycleService,
}

impl PrescriptionService {
    pub fn new(
        prescriptions: Arc<dyn PrescriptionStore>,
        appointments: Arc<dyn AppointmentStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            prescriptions,
            appointments,
            clock,
            lifecycle: AppointmentLifecycleService::new(),
        }
    }

    /// Attach a prescription to an appointment the doctor owns and has at
    /// least started.
    #[instrument(skip(self, request))]
    pub async fn upload(
        &self,
        appointment_id: Uuid,
        actor: &Actor,
        request: UploadPrescriptionRequest,
    ) -> Result<Prescription, AppointmentError> {
        let appointment = self
            .appointments
            .get(appointment_id)
            .await?
            .ok_or(AppointmentError::NotAuthorized)?;
        self.lifecycle.ensure_doctor_owns(&appointment, actor)?;

        if appointment.status != AppointmentStatus::Completed && appointment.started_at.is_none() {
            return Err(AppointmentError::validation(
                "appointment",
                "Prescriptions can only be uploaded for a started or completed appointment.",
            ));
        }

        let file = request.file.trim();
        if file.is_empty() {
            return Err(AppointmentError::validation("file", "No file was submitted."));
        }

        let prescription = Prescription {
            id: Uuid::new_v4(),
            appointment_id,
            uploaded_by: Some(actor.user_id),
            file: Some(file.to_string()),
            notes: request.notes,
            created_at: self.clock.now(),
        };

        let stored = self.prescriptions.insert(&prescription).await?;
        info!("Prescription {} uploaded for appointment {}", stored.id, appointment_id);
        Ok(stored)
    }

    pub async fn list(&self, actor: &Actor) -> Result<Vec<PrescriptionWithAppointment>, AppointmentError> {
        self.prescriptions.list(PrescriptionScope::for_actor(actor)).await
    }

    /// The file reference, if the caller is the appointment's patient, the
    /// uploading doctor, or an admin.
    #[instrument(skip(self))]
    pub async fn file_for_download(&self, id: Uuid, actor: &Actor) -> Result<String, AppointmentError> {
        let item = self
            .prescriptions
            .get(id)
            .await?
            .ok_or(AppointmentError::PrescriptionNotFound)?;

        let allowed = actor.is_admin()
            || item.appointment.patient_id == actor.user_id
            || item.prescription.uploaded_by == Some(actor.user_id);

        if !allowed {
            warn!("User {} denied download of prescription {}", actor.user_id, id);
            return Err(AppointmentError::NotAuthorized);
        }

        item.prescription
            .file
            .filter(|f| !f.is_empty())
            .ok_or(AppointmentError::FileUnavailable)
    }
}
