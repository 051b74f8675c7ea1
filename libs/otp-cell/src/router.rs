// libs/otp-cell/src/router.rs
use std::sync::Arc;

use axum::{routing::post, Router};

use crate::handlers;
use crate::services::verification::OtpService;

/// Verification endpoints are reachable before the user can authenticate.
pub fn otp_routes(service: Arc<OtpService>) -> Router {
    Router::new()
        .route("/send", post(handlers::send_otp))
        .route("/verify", post(handlers::verify_otp))
        .with_state(service)
}
