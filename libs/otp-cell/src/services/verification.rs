// libs/otp-cell/src/services/verification.rs
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shared_utils::clock::Clock;

use crate::models::{
    OtpError, OtpPolicy, SentOtp, Verification, VerificationOutcome, VerificationType,
};
use crate::services::contact::ContactVerificationSink;
use crate::services::delivery::OtpDelivery;
use crate::services::store::VerificationStore;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email pattern")
});

static PHONE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+?[1-9]\d{1,14}$|^\+?\d{1,4}[\s\-\.\(\)]*\d{1,14}$").expect("valid phone pattern")
});

pub fn validate_target(verif_type: VerificationType, target: &str) -> Result<(), OtpError> {
    let target = target.trim();
    if target.is_empty() {
        return Err(OtpError::validation("target", "This field may not be blank."));
    }

    let valid = match verif_type {
        VerificationType::Email => target.len() <= 254 && EMAIL_PATTERN.is_match(target),
        VerificationType::Phone => PHONE_PATTERN.is_match(target),
    };

    if valid {
        Ok(())
    } else {
        Err(OtpError::validation(
            "target",
            format!("Enter a valid {} target.", verif_type),
        ))
    }
}

pub struct OtpService {
    store: Arc<dyn VerificationStore>,
    delivery: Arc<dyn OtpDelivery>,
    contacts: Arc<dyn ContactVerificationSink>,
    clock: Arc<dyn Clock>,
    policy: OtpPolicy,
}

impl OtpService {
    pub fn new(
        store: Arc<dyn VerificationStore>,
        delivery: Arc<dyn OtpDelivery>,
        contacts: Arc<dyn ContactVerificationSink>,
        clock: Arc<dyn Clock>,
        policy: OtpPolicy,
    ) -> Self {
        Self {
            store,
            delivery,
            contacts,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &OtpPolicy {
        &self.policy
    }

    /// Create and persist a fresh verification, returning it with the
    /// plaintext code. Nothing is delivered.
    #[instrument(skip(self, target))]
    pub async fn issue_otp(
        &self,
        user_id: Uuid,
        verif_type: VerificationType,
        target: &str,
    ) -> Result<(Verification, String), OtpError> {
        validate_target(verif_type, target)?;

        let now = self.clock.now();
        let mut verification =
            Verification::new(user_id, verif_type, target.trim(), self.policy.max_attempts, now);
        let code = verification.generate_otp(self.policy.ttl_minutes, self.policy.code_length, now)?;

        self.store.insert(&verification).await?;

        info!("Created {} verification {} for user {}", verif_type, verification.id, user_id);
        Ok((verification, code))
    }

    /// Issue a code and hand it to the delivery provider. A delivery
    /// failure is reported but the stored verification is kept.
    #[instrument(skip(self, target))]
    pub async fn send_otp(
        &self,
        user_id: Uuid,
        verif_type: VerificationType,
        target: &str,
    ) -> Result<SentOtp, OtpError> {
        let (verification, code) = self.issue_otp(user_id, verif_type, target).await?;

        if let Err(e) = self.delivery.deliver(verif_type, &verification.target, &code).await {
            warn!("Delivery failed for verification {}: {}", verification.id, e);
            return Err(OtpError::Delivery(e.to_string()));
        }

        Ok(SentOtp {
            verification_id: verification.id,
            verif_type,
            expires_at: verification.expires_at,
        })
    }

    /// Check `code` against the most recent verification for the pair.
    #[instrument(skip(self, target, code))]
    pub async fn verify_otp(
        &self,
        verif_type: VerificationType,
        target: &str,
        code: &str,
    ) -> Result<VerificationOutcome, OtpError> {
        let target = target.trim();
        let mut tries = 0;

        loop {
            let mut verification = self
                .store
                .latest_for(verif_type, target)
                .await?
                .ok_or(OtpError::VerificationNotFound)?;

            // Each lost write is some other caller spending an attempt, so
            // the record reaches a terminal outcome within max_attempts reads.
            tries += 1;
            let max_tries = verification.effective_max_attempts().max(0) as usize + 1;
            if tries > max_tries {
                return Err(OtpError::DatabaseError(
                    "verification kept changing concurrently".to_string(),
                ));
            }

            let attempts_before = verification.attempts;
            let outcome = verification.verify_otp(code, self.clock.now());

            if verification.attempts == attempts_before {
                debug!("Verification {} rejected without attempt: {}", verification.id, outcome);
                return Ok(outcome);
            }

            let written = self
                .store
                .record_attempt(verification.id, attempts_before, verification.attempts, verification.used)
                .await?;

            if !written {
                debug!(
                    "Verification {} changed concurrently, re-reading (try {}/{})",
                    verification.id, tries, max_tries
                );
                continue;
            }

            if outcome.is_success() {
                info!("Verification {} succeeded", verification.id);
                if let Err(e) = self.contacts.mark_verified(verification.user_id, verif_type).await {
                    error!(
                        "Verification {} succeeded but marking {} failed: {}",
                        verification.id,
                        verif_type.verified_flag(),
                        e
                    );
                }
            } else {
                debug!(
                    "Verification {} attempt {}/{}: {}",
                    verification.id,
                    verification.attempts,
                    verification.effective_max_attempts(),
                    outcome
                );
            }

            return Ok(outcome);
        }
    }
}
