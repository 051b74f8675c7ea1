pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use handlers::AppointmentState;
pub use models::{
    Appointment, AppointmentError, AppointmentSearchQuery, AppointmentStatus, Prescription,
};
pub use router::{appointment_routes, prescription_routes};
pub use services::{AppointmentBookingService, PrescriptionService};
