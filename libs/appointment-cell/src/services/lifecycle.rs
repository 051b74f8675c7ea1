// libs/appointment-cell/src/services/lifecycle.rs
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use reqwest::Url;
use tracing::{debug, warn};

use shared_models::auth::Actor;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, MISSED_GRACE_MINUTES, START_WINDOW_MINUTES,
};

/// Guards and effects of every appointment transition. Pure: callers load
/// the appointment, apply a transition here, then persist the result.
#[derive(Debug, Default, Clone, Copy)]
pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Doctor actions are only allowed for the appointment's own doctor.
    pub fn ensure_doctor_owns(&self, appointment: &Appointment, actor: &Actor) -> Result<(), AppointmentError> {
        if actor.is_doctor() && appointment.doctor_id == actor.user_id {
            return Ok(());
        }
        warn!(
            "User {} ({}) attempted a doctor action on appointment {}",
            actor.user_id, actor.role, appointment.id
        );
        Err(AppointmentError::NotAuthorized)
    }

    /// Read access: either party, or an admin.
    pub fn can_view(&self, appointment: &Appointment, actor: &Actor) -> bool {
        actor.is_admin() || appointment.involves(actor.user_id)
    }

    /// `requested`/`confirmed` -> `confirmed`, stamping `started_at`, if `now`
    /// is within `[scheduled_time, scheduled_time + 30min]`. Starting an
    /// already started meeting is a no-op that keeps the first stamp.
    /// Returns whether the appointment changed.
    pub fn start_meeting(&self, appointment: &mut Appointment, now: DateTime<Utc>) -> Result<bool, AppointmentError> {
        if !appointment.status.is_active() {
            return Err(AppointmentError::InvalidTransition {
                from: appointment.status,
                to: AppointmentStatus::Confirmed,
            });
        }

        if appointment.started_at.is_some() {
            debug!("Appointment {} already started", appointment.id);
            return Ok(false);
        }

        let window_end = appointment.scheduled_time + Duration::minutes(START_WINDOW_MINUTES);
        if now < appointment.scheduled_time || now > window_end {
            return Err(AppointmentError::OutsideWindow);
        }

        appointment.started_at = Some(now);
        appointment.status = AppointmentStatus::Confirmed;
        Ok(true)
    }

    /// Any status -> `completed`. The first `completed_at` is kept.
    pub fn complete_meeting(&self, appointment: &mut Appointment, now: DateTime<Utc>) -> bool {
        if appointment.status == AppointmentStatus::Completed && appointment.completed_at.is_some() {
            return false;
        }

        appointment.completed_at.get_or_insert(now);
        appointment.status = AppointmentStatus::Completed;
        true
    }

    /// Whether the appointment may be moved at all. Time validation is the
    /// conflict checker's job and happens before [`Self::reschedule`].
    pub fn ensure_reschedulable(&self, appointment: &Appointment) -> Result<(), AppointmentError> {
        if appointment.completed_at.is_some() {
            return Err(AppointmentError::AlreadyCompleted);
        }

        match appointment.status {
            AppointmentStatus::Requested
            | AppointmentStatus::Confirmed
            | AppointmentStatus::Missed
            | AppointmentStatus::Pending => Ok(()),
            from @ (AppointmentStatus::Cancelled | AppointmentStatus::Completed) => {
                Err(AppointmentError::InvalidTransition {
                    from,
                    to: AppointmentStatus::Confirmed,
                })
            }
        }
    }

    /// Move to `new_time` and reset to a clean pre-session `confirmed` state.
    pub fn reschedule(&self, appointment: &mut Appointment, new_time: DateTime<Utc>) -> Result<(), AppointmentError> {
        self.ensure_reschedulable(appointment)?;

        appointment.scheduled_time = new_time;
        appointment.status = AppointmentStatus::Confirmed;
        appointment.started_at = None;
        appointment.completed_at = None;
        appointment.meet_link = None;
        Ok(())
    }

    /// Any status -> `confirmed` with the given link; session progress is cleared.
    pub fn set_meet_link(&self, appointment: &mut Appointment, link: String) {
        appointment.meet_link = Some(link);
        appointment.status = AppointmentStatus::Confirmed;
        appointment.started_at = None;
        appointment.completed_at = None;
    }

    /// Restricted update of `status` and/or `meet_link` without
    /// revalidating the schedule. A completed appointment cannot be moved
    /// back out of `completed`.
    pub fn apply_status_update(
        &self,
        appointment: &mut Appointment,
        status: Option<AppointmentStatus>,
        meet_link: Option<Option<String>>,
    ) -> Result<(), AppointmentError> {
        if let Some(status) = status {
            if appointment.completed_at.is_some() && status != AppointmentStatus::Completed {
                return Err(AppointmentError::AlreadyCompleted);
            }
            appointment.status = status;
        }

        if let Some(link) = meet_link {
            appointment.meet_link = link.map(|l| validate_meet_link(&l)).transpose()?;
        }

        Ok(())
    }

    /// The sweeper guard: confirmed, more than the grace period past its
    /// slot, and never engaged (no start stamp, no link).
    pub fn should_mark_missed(&self, appointment: &Appointment, now: DateTime<Utc>) -> bool {
        appointment.status == AppointmentStatus::Confirmed
            && appointment.scheduled_time < missed_cutoff(now)
            && appointment.started_at.is_none()
            && appointment.meet_link.is_none()
    }
}

/// Appointments scheduled strictly before this instant are eligible for
/// the missed sweep.
pub fn missed_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::minutes(MISSED_GRACE_MINUTES)
}

/// Accepts RFC 3339, or a naive ISO 8601 date-time taken as UTC.
pub fn parse_scheduled_time(raw: Option<&str>) -> Result<DateTime<Utc>, AppointmentError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppointmentError::InvalidTime("scheduled_time is required".to_string()))?;

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| AppointmentError::InvalidTime("Invalid datetime format".to_string()))
}

pub fn validate_meet_link(link: &str) -> Result<String, AppointmentError> {
    let link = link.trim();
    match Url::parse(link) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => Ok(link.to_string()),
        _ => Err(AppointmentError::validation("meet_link", "Enter a valid URL.")),
    }
}
