// =====================================================================================
// OTP SERVICE TESTS
// Issue / verify flow against the in-memory store with a manual clock
// =====================================================================================

use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use uuid::Uuid;

use otp_cell::models::{OtpError, OtpPolicy, Verification, VerificationOutcome, VerificationType};
use otp_cell::services::{
    DeliveryError, InMemoryContactSink, InMemoryVerificationStore, OtpDelivery, OtpService,
    VerificationStore,
};
use shared_utils::clock::{Clock, ManualClock};

#[derive(Default)]
struct RecordingDelivery {
    sent: Mutex<Vec<(VerificationType, String, String)>>,
    fail: bool,
}

impl RecordingDelivery {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn last_code(&self) -> String {
        self.sent.lock().unwrap().last().map(|(_, _, code)| code.clone()).unwrap()
    }
}

#[async_trait]
impl OtpDelivery for RecordingDelivery {
    async fn deliver(
        &self,
        verif_type: VerificationType,
        target: &str,
        code: &str,
    ) -> Result<(), DeliveryError> {
        if self.fail {
            return Err(DeliveryError::NotConfigured("sms_not_configured"));
        }
        self.sent
            .lock()
            .unwrap()
            .push((verif_type, target.to_string(), code.to_string()));
        Ok(())
    }
}

struct Harness {
    service: OtpService,
    store: Arc<InMemoryVerificationStore>,
    delivery: Arc<RecordingDelivery>,
    contacts: Arc<InMemoryContactSink>,
    clock: Arc<ManualClock>,
}

fn harness_with(delivery: RecordingDelivery) -> Harness {
    let store = Arc::new(InMemoryVerificationStore::new());
    let delivery = Arc::new(delivery);
    let contacts = Arc::new(InMemoryContactSink::new());
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()));

    let service = OtpService::new(
        store.clone(),
        delivery.clone(),
        contacts.clone(),
        clock.clone(),
        OtpPolicy::default(),
    );

    Harness { service, store, delivery, contacts, clock }
}

fn harness() -> Harness {
    harness_with(RecordingDelivery::default())
}

fn wrong_code(code: &str) -> String {
    let first = if code.starts_with('0') { '1' } else { '0' };
    format!("{}{}", first, &code[1..])
}

const EMAIL: &str = "patient@example.com";

#[tokio::test]
async fn test_issue_then_verify_succeeds_exactly_once() {
    let h = harness();
    let user_id = Uuid::new_v4();

    let (_, code) = h.service.issue_otp(user_id, VerificationType::Email, EMAIL).await.unwrap();

    let first = h.service.verify_otp(VerificationType::Email, EMAIL, &code).await.unwrap();
    assert_eq!(first.as_pair(), (true, "verified"));
    assert!(h.contacts.is_verified(user_id, VerificationType::Email).await);

    for _ in 0..3 {
        let again = h.service.verify_otp(VerificationType::Email, EMAIL, &code).await.unwrap();
        assert_eq!(again.as_pair(), (false, "already_used"));
    }
}

#[tokio::test]
async fn test_wrong_code_counts_exactly_one_attempt() {
    let h = harness();
    let (verification, code) = h
        .service
        .issue_otp(Uuid::new_v4(), VerificationType::Email, EMAIL)
        .await
        .unwrap();

    let outcome = h
        .service
        .verify_otp(VerificationType::Email, EMAIL, &wrong_code(&code))
        .await
        .unwrap();

    assert_eq!(outcome.as_pair(), (false, "invalid"));
    let stored = h.store.get(verification.id).await.unwrap();
    assert_eq!(stored.attempts, 1);
    assert!(!stored.used);
}

#[tokio::test]
async fn test_exhausted_budget_rejects_correct_code() {
    let h = harness();
    let (verification, code) = h
        .service
        .issue_otp(Uuid::new_v4(), VerificationType::Phone, "+919876543210")
        .await
        .unwrap();

    for _ in 0..5 {
        let outcome = h
            .service
            .verify_otp(VerificationType::Phone, "+919876543210", &wrong_code(&code))
            .await
            .unwrap();
        assert_eq!(outcome, VerificationOutcome::Invalid);
    }

    let outcome = h
        .service
        .verify_otp(VerificationType::Phone, "+919876543210", &code)
        .await
        .unwrap();
    assert_eq!(outcome.as_pair(), (false, "too_many_attempts"));

    // the ceiling check happens before counting
    let stored = h.store.get(verification.id).await.unwrap();
    assert_eq!(stored.attempts, 5);
    assert!(!stored.used);
}

#[tokio::test]
async fn test_expired_code_is_rejected_without_counting() {
    let h = harness();
    let (verification, code) = h
        .service
        .issue_otp(Uuid::new_v4(), VerificationType::Email, EMAIL)
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(10));
    let at_expiry = h.service.verify_otp(VerificationType::Email, EMAIL, &wrong_code(&code)).await.unwrap();
    assert_eq!(at_expiry, VerificationOutcome::Invalid);

    h.clock.advance(Duration::seconds(1));
    let outcome = h.service.verify_otp(VerificationType::Email, EMAIL, &code).await.unwrap();
    assert_eq!(outcome.as_pair(), (false, "expired"));
    assert_eq!(h.store.get(verification.id).await.unwrap().attempts, 1);
}

#[tokio::test]
async fn test_verify_uses_most_recent_record() {
    let h = harness();
    let user_id = Uuid::new_v4();

    let (_, old_code) = h.service.issue_otp(user_id, VerificationType::Email, EMAIL).await.unwrap();
    h.clock.advance(Duration::minutes(1));
    let (_, new_code) = h.service.issue_otp(user_id, VerificationType::Email, EMAIL).await.unwrap();
    assert_eq!(h.store.len().await, 2);

    if old_code != new_code {
        let stale = h.service.verify_otp(VerificationType::Email, EMAIL, &old_code).await.unwrap();
        assert_eq!(stale, VerificationOutcome::Invalid);
    }

    let fresh = h.service.verify_otp(VerificationType::Email, EMAIL, &new_code).await.unwrap();
    assert_eq!(fresh, VerificationOutcome::Verified);
}

#[tokio::test]
async fn test_unknown_target_is_not_found() {
    let h = harness();
    let result = h.service.verify_otp(VerificationType::Email, "nobody@example.com", "123456").await;
    assert_matches!(result, Err(OtpError::VerificationNotFound));
}

#[tokio::test]
async fn test_send_delivers_plaintext_to_provider_only() {
    let h = harness();
    let user_id = Uuid::new_v4();

    let sent = h.service.send_otp(user_id, VerificationType::Email, EMAIL).await.unwrap();
    assert_eq!(sent.expires_at, Some(h.clock.now() + Duration::minutes(10)));

    let code = h.delivery.last_code();
    assert_eq!(code.len(), 6);

    let stored = h.store.get(sent.verification_id).await.unwrap();
    assert!(!stored.otp_hash.unwrap().contains(&code));

    let outcome = h.service.verify_otp(VerificationType::Email, EMAIL, &code).await.unwrap();
    assert!(outcome.is_success());
}

#[tokio::test]
async fn test_delivery_failure_keeps_verification_record() {
    let h = harness_with(RecordingDelivery::failing());

    let result = h
        .service
        .send_otp(Uuid::new_v4(), VerificationType::Phone, "+919876543210")
        .await;

    assert_matches!(result, Err(OtpError::Delivery(msg)) if msg == "sms_not_configured");
    let latest = h
        .store
        .latest_for(VerificationType::Phone, "+919876543210")
        .await
        .unwrap();
    assert!(latest.is_some());
}

#[tokio::test]
async fn test_invalid_target_is_rejected_before_storage() {
    let h = harness();
    let result = h.service.send_otp(Uuid::new_v4(), VerificationType::Email, "not an email").await;

    assert_matches!(result, Err(OtpError::Validation { field, .. }) if field == "target");
    assert_eq!(h.store.len().await, 0);
}

#[tokio::test]
async fn test_concurrent_verifies_cannot_overspend_last_attempt() {
    let h = harness();
    let (verification, code) = h
        .service
        .issue_otp(Uuid::new_v4(), VerificationType::Email, EMAIL)
        .await
        .unwrap();

    for _ in 0..4 {
        h.service.verify_otp(VerificationType::Email, EMAIL, &wrong_code(&code)).await.unwrap();
    }

    let service = Arc::new(h.service);
    let wrong = wrong_code(&code);
    let a = {
        let service = service.clone();
        let wrong = wrong.clone();
        tokio::spawn(async move { service.verify_otp(VerificationType::Email, EMAIL, &wrong).await })
    };
    let b = {
        let service = service.clone();
        tokio::spawn(async move { service.verify_otp(VerificationType::Email, EMAIL, &wrong).await })
    };

    let outcomes = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];
    let invalid = outcomes.iter().filter(|o| **o == VerificationOutcome::Invalid).count();
    let exhausted = outcomes.iter().filter(|o| **o == VerificationOutcome::TooManyAttempts).count();

    assert_eq!(invalid, 1);
    assert_eq!(exhausted, 1);
    assert_eq!(h.store.get(verification.id).await.unwrap().attempts, 5);
}

/// Loses the first `losses` attempt writes to a simulated rival verify that
/// spends one attempt each time.
struct ContendedStore {
    inner: InMemoryVerificationStore,
    losses: Mutex<usize>,
}

#[async_trait]
impl VerificationStore for ContendedStore {
    async fn insert(&self, verification: &Verification) -> Result<(), OtpError> {
        self.inner.insert(verification).await
    }

    async fn latest_for(
        &self,
        verif_type: VerificationType,
        target: &str,
    ) -> Result<Option<Verification>, OtpError> {
        self.inner.latest_for(verif_type, target).await
    }

    async fn record_attempt(
        &self,
        id: Uuid,
        expected_attempts: i32,
        attempts: i32,
        used: bool,
    ) -> Result<bool, OtpError> {
        let rival_wins = {
            let mut losses = self.losses.lock().unwrap();
            if *losses > 0 {
                *losses -= 1;
                true
            } else {
                false
            }
        };

        if rival_wins {
            self.inner
                .record_attempt(id, expected_attempts, expected_attempts + 1, false)
                .await?;
            return Ok(false);
        }
        self.inner.record_attempt(id, expected_attempts, attempts, used).await
    }
}

fn contended_service(losses: usize) -> (OtpService, Arc<ContendedStore>) {
    let store = Arc::new(ContendedStore {
        inner: InMemoryVerificationStore::new(),
        losses: Mutex::new(losses),
    });
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()));
    let service = OtpService::new(
        store.clone(),
        Arc::new(RecordingDelivery::default()),
        Arc::new(InMemoryContactSink::new()),
        clock,
        OtpPolicy::default(),
    );
    (service, store)
}

#[tokio::test]
async fn test_verify_outlasts_many_lost_writes() {
    let (service, store) = contended_service(4);
    let (verification, code) = service
        .issue_otp(Uuid::new_v4(), VerificationType::Email, EMAIL)
        .await
        .unwrap();

    let outcome = service.verify_otp(VerificationType::Email, EMAIL, &code).await.unwrap();

    assert_eq!(outcome, VerificationOutcome::Verified);
    let stored = store.inner.get(verification.id).await.unwrap();
    assert_eq!(stored.attempts, 5);
    assert!(stored.used);
}

#[tokio::test]
async fn test_verify_reports_exhaustion_when_rivals_spend_every_attempt() {
    let (service, store) = contended_service(10);
    let (verification, code) = service
        .issue_otp(Uuid::new_v4(), VerificationType::Email, EMAIL)
        .await
        .unwrap();

    let outcome = service.verify_otp(VerificationType::Email, EMAIL, &code).await.unwrap();

    assert_eq!(outcome, VerificationOutcome::TooManyAttempts);
    assert_eq!(store.inner.get(verification.id).await.unwrap().attempts, 5);
}
