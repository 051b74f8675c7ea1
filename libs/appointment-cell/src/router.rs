// libs/appointment-cell/src/router.rs
use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, AppointmentState};

pub fn appointment_routes(state: AppointmentState) -> Router {
    // All appointment operations require authentication
    Router::new()
        .route("/", post(handlers::create_appointment).get(handlers::list_appointments))
        .route(
            "/{appointment_id}",
            get(handlers::get_appointment)
                .patch(handlers::update_appointment)
                .put(handlers::update_appointment),
        )
        .route("/{appointment_id}/start_meet", post(handlers::start_meet))
        .route("/{appointment_id}/complete_meet", post(handlers::complete_meet))
        .route("/{appointment_id}/reschedule", post(handlers::reschedule_appointment))
        .route("/{appointment_id}/set_meet_link", post(handlers::set_meet_link))
        .route("/{appointment_id}/upload_prescription", post(handlers::upload_prescription))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware))
        .with_state(state)
}

pub fn prescription_routes(state: AppointmentState) -> Router {
    Router::new()
        .route("/", get(handlers::list_prescriptions))
        .route("/{prescription_id}/download", get(handlers::download_prescription))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware))
        .with_state(state)
}
