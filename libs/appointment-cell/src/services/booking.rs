// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use tracing::{debug, info, instrument};
use uuid::Uuid;

use shared_models::auth::{Actor, Role};
use shared_utils::clock::Clock;

use crate::models::{
    Appointment, AppointmentError, AppointmentSearchQuery, AppointmentStatus,
    CreateAppointmentRequest, UpdateAppointmentRequest,
};
use crate::services::conflict::ConflictDetectionService;
use crate::services::lifecycle::{parse_scheduled_time, validate_meet_link, AppointmentLifecycleService};
use crate::services::store::AppointmentStore;
use crate::services::sweeper::MissedAppointmentSweeper;

pub struct AppointmentBookingService {
    store: Arc<dyn AppointmentStore>,
    clock: Arc<dyn Clock>,
    conflict_service: ConflictDetectionService,
    lifecycle_service: AppointmentLifecycleService,
    sweeper: MissedAppointmentSweeper,
}

impl AppointmentBookingService {
    pub fn new(store: Arc<dyn AppointmentStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            conflict_service: ConflictDetectionService::new(Arc::clone(&store), Arc::clone(&clock)),
            lifecycle_service: AppointmentLifecycleService::new(),
            sweeper: MissedAppointmentSweeper::new(Arc::clone(&store), Arc::clone(&clock)),
            store,
            clock,
        }
    }

    // ==========================================================================
    // BOOKING
    // ==========================================================================

    /// A patient books a slot with a doctor. The record starts `requested`.
    #[instrument(skip(self, request), fields(doctor_id = %request.doctor_id))]
    pub async fn create_appointment(
        &self,
        actor: &Actor,
        request: CreateAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        if !actor.is_patient() {
            return Err(AppointmentError::NotAuthorized);
        }

        self.conflict_service
            .check_conflicts(request.doctor_id, request.scheduled_time, None)
            .await?;

        let reason = request
            .reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        let appointment = Appointment::new(
            actor.user_id,
            request.doctor_id,
            request.scheduled_time,
            reason,
            self.clock.now(),
        );

        let created = self.store.insert_checked(&appointment).await?;
        info!(
            "Appointment {} requested by patient {} with doctor {} at {}",
            created.id, created.patient_id, created.doctor_id, created.scheduled_time
        );
        Ok(created)
    }

    // ==========================================================================
    // READS
    // ==========================================================================

    /// Unknown and not-visible appointments both read as not found.
    pub async fn get_appointment(&self, id: Uuid, actor: &Actor) -> Result<Appointment, AppointmentError> {
        match self.store.get(id).await? {
            Some(appointment) if self.lifecycle_service.can_view(&appointment, actor) => Ok(appointment),
            _ => Err(AppointmentError::NotFound),
        }
    }

    /// Sweeps stale confirmed appointments first, then lists what the
    /// caller may see: patients their own, doctors theirs, admins all.
    #[instrument(skip(self, query))]
    pub async fn list_appointments(
        &self,
        actor: &Actor,
        mut query: AppointmentSearchQuery,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        query.validate_paging()?;
        self.sweeper.sweep().await?;

        match actor.role {
            Role::Patient => query.patient_id = Some(actor.user_id),
            Role::Doctor => query.doctor_id = Some(actor.user_id),
            Role::Admin => {}
        }

        let appointments = self.store.list(&query).await?;
        debug!("Listed {} appointments for {}", appointments.len(), actor.user_id);
        Ok(appointments)
    }

    pub async fn sweep_missed(&self) -> Result<usize, AppointmentError> {
        self.sweeper.sweep().await
    }

    // ==========================================================================
    // DOCTOR ACTIONS
    // ==========================================================================

    /// Loads an appointment for a doctor action. An unknown id fails the
    /// same way as someone else's appointment.
    async fn load_owned(&self, id: Uuid, actor: &Actor) -> Result<Appointment, AppointmentError> {
        let appointment = self
            .store
            .get(id)
            .await?
            .ok_or(AppointmentError::NotAuthorized)?;
        self.lifecycle_service.ensure_doctor_owns(&appointment, actor)?;
        Ok(appointment)
    }

    /// Bringing an inactive appointment back into the active set re-checks
    /// the window atomically with the write. The time itself may be past.
    async fn persist_transition(
        &self,
        appointment: &Appointment,
        was_active: bool,
    ) -> Result<Appointment, AppointmentError> {
        if !was_active && appointment.is_active() {
            return self.store.update_checked(appointment).await;
        }
        self.store.update(appointment).await
    }

    #[instrument(skip(self))]
    pub async fn start_meeting(&self, id: Uuid, actor: &Actor) -> Result<Appointment, AppointmentError> {
        let mut appointment = self.load_owned(id, actor).await?;

        if !self.lifecycle_service.start_meeting(&mut appointment, self.clock.now())? {
            return Ok(appointment);
        }

        let updated = self.store.update(&appointment).await?;
        info!("Meeting started for appointment {}", id);
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn complete_meeting(&self, id: Uuid, actor: &Actor) -> Result<Appointment, AppointmentError> {
        let mut appointment = self.load_owned(id, actor).await?;

        if !self.lifecycle_service.complete_meeting(&mut appointment, self.clock.now()) {
            return Ok(appointment);
        }

        let updated = self.store.update(&appointment).await?;
        info!("Meeting completed for appointment {}", id);
        Ok(updated)
    }

    /// `raw_time` is parsed here so a malformed value reports `invalid_time`.
    #[instrument(skip(self))]
    pub async fn reschedule_appointment(
        &self,
        id: Uuid,
        actor: &Actor,
        raw_time: Option<&str>,
    ) -> Result<Appointment, AppointmentError> {
        let mut appointment = self.load_owned(id, actor).await?;
        self.lifecycle_service.ensure_reschedulable(&appointment)?;

        let new_time = parse_scheduled_time(raw_time)?;
        self.conflict_service
            .check_conflicts(appointment.doctor_id, new_time, Some(id))
            .await?;

        self.lifecycle_service.reschedule(&mut appointment, new_time)?;
        let updated = self.store.update_checked(&appointment).await?;

        info!("Appointment {} rescheduled to {}", id, new_time);
        Ok(updated)
    }

    #[instrument(skip(self, link))]
    pub async fn set_meet_link(
        &self,
        id: Uuid,
        actor: &Actor,
        link: Option<String>,
    ) -> Result<Appointment, AppointmentError> {
        let mut appointment = self.load_owned(id, actor).await?;

        let link = link
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| AppointmentError::validation("meet_link", "This field is required."))?;
        let link = validate_meet_link(&link)?;

        let was_active = appointment.is_active();
        self.lifecycle_service.set_meet_link(&mut appointment, link);
        let updated = self.persist_transition(&appointment, was_active).await?;

        info!("Meet link saved for appointment {}", id);
        Ok(updated)
    }

    /// Changes `status` and/or `meet_link` only, without schedule
    /// revalidation. `pending` and `cancelled` are reached this way.
    #[instrument(skip(self, meet_link))]
    pub async fn update_status_only(
        &self,
        id: Uuid,
        actor: &Actor,
        status: Option<AppointmentStatus>,
        meet_link: Option<Option<String>>,
    ) -> Result<Appointment, AppointmentError> {
        let mut appointment = self.load_owned(id, actor).await?;
        let previous = appointment.status;

        self.lifecycle_service
            .apply_status_update(&mut appointment, status, meet_link)?;
        let updated = self
            .persist_transition(&appointment, previous.is_active())
            .await?;

        if previous != updated.status {
            info!("Appointment {} moved {} -> {}", id, previous, updated.status);
        }
        Ok(updated)
    }

    /// General edit by the owning doctor. Anything beyond `status` and
    /// `meet_link` revalidates the slot against the conflict checker,
    /// excluding this appointment.
    #[instrument(skip(self, request))]
    pub async fn update_appointment(
        &self,
        id: Uuid,
        actor: &Actor,
        request: UpdateAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        if request.is_status_only() {
            return self
                .update_status_only(id, actor, request.status, request.meet_link)
                .await;
        }

        let mut appointment = self.load_owned(id, actor).await?;
        let new_time = request.scheduled_time.unwrap_or(appointment.scheduled_time);

        if new_time != appointment.scheduled_time && appointment.completed_at.is_some() {
            return Err(AppointmentError::AlreadyCompleted);
        }

        self.conflict_service
            .check_conflicts(appointment.doctor_id, new_time, Some(id))
            .await?;

        self.lifecycle_service
            .apply_status_update(&mut appointment, request.status, request.meet_link)?;
        appointment.scheduled_time = new_time;
        if let Some(reason) = request.reason {
            let reason = reason.trim().to_string();
            appointment.reason = (!reason.is_empty()).then_some(reason);
        }

        let updated = self.store.update_checked(&appointment).await?;
        info!("Appointment {} updated", id);
        Ok(updated)
    }
}
