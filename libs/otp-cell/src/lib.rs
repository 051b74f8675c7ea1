pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{
    OtpError, OtpPolicy, SendOtpRequest, SentOtp, Verification, VerificationOutcome,
    VerificationType, VerifyOtpRequest,
};
pub use router::otp_routes;
pub use services::OtpService;
