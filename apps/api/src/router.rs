use std::sync::Arc;

use axum::{routing::get, Router};
use tracing::{info, warn};

use appointment_cell::services::{
    AppointmentBookingService, AppointmentStore, InMemoryAppointmentStore, InMemoryPrescriptionStore,
    PrescriptionService, PrescriptionStore, SupabaseAppointmentStore, SupabasePrescriptionStore,
};
use appointment_cell::{appointment_routes, prescription_routes, AppointmentState};
use otp_cell::services::{
    ContactVerificationSink, InMemoryContactSink, InMemoryVerificationStore, ProviderDelivery,
    SupabaseContactSink, SupabaseVerificationStore, VerificationStore,
};
use otp_cell::{otp_routes, OtpPolicy, OtpService};
use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_utils::clock::{Clock, SystemClock};

pub struct Services {
    pub appointments: AppointmentState,
    pub otp: Arc<OtpService>,
}

/// Wires every service to Supabase when it is configured, otherwise to
/// process-local stores.
pub fn build_services(config: Arc<AppConfig>) -> Services {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let (appointment_store, prescription_store, verification_store, contacts): (
        Arc<dyn AppointmentStore>,
        Arc<dyn PrescriptionStore>,
        Arc<dyn VerificationStore>,
        Arc<dyn ContactVerificationSink>,
    ) = if config.is_configured() {
        info!("Using Supabase storage at {}", config.supabase_url);
        let supabase = Arc::new(SupabaseClient::new(&config));
        let token = config.storage_token().to_string();
        (
            Arc::new(SupabaseAppointmentStore::new(Arc::clone(&supabase), token.clone())),
            Arc::new(SupabasePrescriptionStore::new(Arc::clone(&supabase), token.clone())),
            Arc::new(SupabaseVerificationStore::new(Arc::clone(&supabase), token.clone())),
            Arc::new(SupabaseContactSink::new(supabase, token)),
        )
    } else {
        warn!("Supabase not configured; using in-memory storage");
        let appointments: Arc<dyn AppointmentStore> = Arc::new(InMemoryAppointmentStore::new());
        (
            Arc::clone(&appointments),
            Arc::new(InMemoryPrescriptionStore::new(appointments)),
            Arc::new(InMemoryVerificationStore::new()),
            Arc::new(InMemoryContactSink::new()),
        )
    };

    let otp = OtpService::new(
        verification_store,
        Arc::new(ProviderDelivery::new(&config)),
        contacts,
        Arc::clone(&clock),
        OtpPolicy::from(config.as_ref()),
    );

    let appointments = AppointmentState {
        booking: Arc::new(AppointmentBookingService::new(
            Arc::clone(&appointment_store),
            Arc::clone(&clock),
        )),
        prescriptions: Arc::new(PrescriptionService::new(prescription_store, appointment_store, clock)),
        config,
    };

    Services {
        appointments,
        otp: Arc::new(otp),
    }
}

pub fn create_router(services: Services) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic API is running!" }))
        .nest("/appointments", appointment_routes(services.appointments.clone()))
        .nest("/prescriptions", prescription_routes(services.appointments))
        .nest("/otp", otp_routes(services.otp))
}
