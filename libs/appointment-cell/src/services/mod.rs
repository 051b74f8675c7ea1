pub mod booking;
pub mod conflict;
pub mod lifecycle;
pub mod prescriptions;
pub mod store;
pub mod sweeper;

pub use booking::AppointmentBookingService;
pub use conflict::ConflictDetectionService;
pub use lifecycle::AppointmentLifecycleService;
pub use prescriptions::{
    InMemoryPrescriptionStore, PrescriptionScope, PrescriptionService, PrescriptionStore,
    SupabasePrescriptionStore,
};
pub use store::{AppointmentStore, InMemoryAppointmentStore, SupabaseAppointmentStore};
pub use sweeper::MissedAppointmentSweeper;
