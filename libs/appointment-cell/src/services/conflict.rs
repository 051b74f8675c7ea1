// libs/appointment-cell/src/services/conflict.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_utils::clock::Clock;

use crate::models::{conflict_window, Appointment, AppointmentError};
use crate::services::store::AppointmentStore;

/// Time must be strictly after `now`.
pub fn validate_future_time(proposed: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), AppointmentError> {
    if proposed <= now {
        return Err(AppointmentError::InvalidTime(
            "Scheduled time must be in the future.".to_string(),
        ));
    }
    Ok(())
}

/// Whether `existing` blocks booking `doctor_id` at `proposed`: same doctor,
/// active status, and within the window on either side (bounds inclusive).
pub fn blocks_slot(
    existing: &Appointment,
    doctor_id: Uuid,
    proposed: DateTime<Utc>,
    exclude_appointment_id: Option<Uuid>,
) -> bool {
    if Some(existing.id) == exclude_appointment_id || existing.doctor_id != doctor_id {
        return false;
    }
    if !existing.is_active() {
        return false;
    }

    let window = conflict_window();
    existing.scheduled_time >= proposed - window && existing.scheduled_time <= proposed + window
}

/// First appointment in `appointments` that blocks the slot, if any.
pub fn find_conflict<'a, I>(
    appointments: I,
    doctor_id: Uuid,
    proposed: DateTime<Utc>,
    exclude_appointment_id: Option<Uuid>,
) -> Option<&'a Appointment>
where
    I: IntoIterator<Item = &'a Appointment>,
{
    appointments
        .into_iter()
        .find(|apt| blocks_slot(apt, doctor_id, proposed, exclude_appointment_id))
}

pub struct ConflictDetectionService {
    store: Arc<dyn AppointmentStore>,
    clock: Arc<dyn Clock>,
}

impl ConflictDetectionService {
    pub fn new(store: Arc<dyn AppointmentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Fail with `invalid_time` for a past slot, or `scheduling_conflict`
    /// when another active appointment of the doctor sits inside the window.
    ///
    /// This is the up-front check that yields a precise error. The store
    /// repeats the window check atomically with the write.
    pub async fn check_conflicts(
        &self,
        doctor_id: Uuid,
        proposed: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<(), AppointmentError> {
        debug!("Checking conflicts for doctor {} at {}", doctor_id, proposed);

        validate_future_time(proposed, self.clock.now())?;

        let nearby = self
            .store
            .find_active_near(doctor_id, proposed, exclude_appointment_id)
            .await?;

        if let Some(existing) = find_conflict(&nearby, doctor_id, proposed, exclude_appointment_id) {
            warn!(
                "Conflict detected for doctor {}: appointment {} at {}",
                doctor_id, existing.id, existing.scheduled_time
            );
            return Err(AppointmentError::ConflictDetected);
        }

        Ok(())
    }
}
