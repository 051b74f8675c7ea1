pub mod contact;
pub mod delivery;
pub mod engine;
pub mod store;
pub mod verification;

pub use contact::{ContactVerificationSink, InMemoryContactSink, SupabaseContactSink};
pub use delivery::{DeliveryError, EmailApiSender, OtpDelivery, ProviderDelivery, SmsApiSender};
pub use store::{InMemoryVerificationStore, SupabaseVerificationStore, VerificationStore};
pub use verification::OtpService;
