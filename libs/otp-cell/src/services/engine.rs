// libs/otp-cell/src/services/engine.rs
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, Rng, RngCore};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::models::{
    OtpError, Verification, VerificationOutcome, VerificationType, DEFAULT_MAX_ATTEMPTS,
    MAX_CODE_LENGTH, MIN_CODE_LENGTH,
};

const SALT_BYTES: usize = 16;
const SECRET_SEPARATOR: char = '$';

impl Verification {
    pub fn new(
        user_id: Uuid,
        verif_type: VerificationType,
        target: impl Into<String>,
        max_attempts: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            verif_type,
            target: target.into(),
            otp_hash: None,
            created_at: now,
            expires_at: None,
            attempts: 0,
            max_attempts,
            used: false,
        }
    }

    /// Issue a fresh numeric code of `length` digits and store its salted
    /// digest. Returns the plaintext for out-of-band delivery.
    pub fn generate_otp(
        &mut self,
        ttl_minutes: i64,
        length: usize,
        now: DateTime<Utc>,
    ) -> Result<String, OtpError> {
        if !(MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&length) {
            return Err(OtpError::validation(
                "length",
                format!("code length must be between {} and {} digits", MIN_CODE_LENGTH, MAX_CODE_LENGTH),
            ));
        }
        if ttl_minutes <= 0 {
            return Err(OtpError::validation("ttl_minutes", "ttl must be positive"));
        }

        let upper = 10u64.pow(length as u32);
        let code = format!("{:0width$}", OsRng.gen_range(0..upper), width = length);

        let salt = generate_salt();
        self.otp_hash = Some(format!("{}{}{}", salt, SECRET_SEPARATOR, digest(&salt, &code)));
        self.expires_at = Some(now + Duration::minutes(ttl_minutes));
        self.attempts = 0;
        self.used = false;

        debug!("Issued {} code for verification {}", self.verif_type, self.id);
        Ok(code)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now > expires_at,
            None => false,
        }
    }

    pub fn effective_max_attempts(&self) -> i32 {
        if self.max_attempts > 0 {
            self.max_attempts
        } else {
            DEFAULT_MAX_ATTEMPTS
        }
    }

    /// Check `candidate` against the stored digest.
    ///
    /// Guards run in a fixed order: used, expired, attempt ceiling. The
    /// attempt counter is bumped before the comparison so a wrong guess
    /// still consumes budget; callers persist `attempts` (and `used`) when
    /// the counter moved.
    pub fn verify_otp(&mut self, candidate: &str, now: DateTime<Utc>) -> VerificationOutcome {
        if self.used {
            return VerificationOutcome::AlreadyUsed;
        }
        if self.is_expired(now) {
            return VerificationOutcome::Expired;
        }
        if self.attempts >= self.effective_max_attempts() {
            return VerificationOutcome::TooManyAttempts;
        }

        let Some((salt, stored_digest)) = self
            .otp_hash
            .as_deref()
            .and_then(|secret| secret.split_once(SECRET_SEPARATOR))
        else {
            return VerificationOutcome::Invalid;
        };

        let computed = digest(salt, candidate);
        self.attempts += 1;

        if constant_time_eq(computed.as_bytes(), stored_digest.as_bytes()) {
            self.used = true;
            VerificationOutcome::Verified
        } else {
            VerificationOutcome::Invalid
        }
    }
}

fn generate_salt() -> String {
    let mut salt = [0u8; SALT_BYTES];
    OsRng.fill_bytes(&mut salt);
    hex::encode(salt)
}

fn digest(salt: &str, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

#[allow(deprecated)]
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    ring::constant_time::verify_slices_are_equal(a, b).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(now: DateTime<Utc>) -> Verification {
        Verification::new(Uuid::new_v4(), VerificationType::Email, "a@example.com", 5, now)
    }

    #[test]
    fn test_generated_code_is_zero_padded_digits() {
        let now = Utc::now();
        for length in [4, 6, 12] {
            let mut verification = fresh(now);
            let code = verification.generate_otp(10, length, now).unwrap();
            assert_eq!(code.len(), length);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_secret_never_contains_plaintext_layout() {
        let now = Utc::now();
        let mut verification = fresh(now);
        let code = verification.generate_otp(10, 6, now).unwrap();

        let secret = verification.otp_hash.clone().unwrap();
        let (salt, hash) = secret.split_once('$').unwrap();
        assert_eq!(salt.len(), SALT_BYTES * 2);
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, digest(salt, &code));
        assert_eq!(verification.expires_at, Some(now + Duration::minutes(10)));
    }

    #[test]
    fn test_fresh_salt_per_issue() {
        let now = Utc::now();
        let mut a = fresh(now);
        let mut b = fresh(now);
        a.generate_otp(10, 6, now).unwrap();
        b.generate_otp(10, 6, now).unwrap();
        assert_ne!(a.otp_hash, b.otp_hash);
    }

    #[test]
    fn test_length_out_of_range_rejected() {
        let now = Utc::now();
        let mut verification = fresh(now);
        assert!(matches!(
            verification.generate_otp(10, 3, now),
            Err(OtpError::Validation { .. })
        ));
        assert!(verification.otp_hash.is_none());
    }

    #[test]
    fn test_malformed_secret_fails_closed_without_counting() {
        let now = Utc::now();
        let mut verification = fresh(now);
        verification.otp_hash = Some("no-separator-here".to_string());

        assert_eq!(verification.verify_otp("123456", now), VerificationOutcome::Invalid);
        assert_eq!(verification.attempts, 0);

        verification.otp_hash = None;
        assert_eq!(verification.verify_otp("123456", now), VerificationOutcome::Invalid);
    }

    #[test]
    fn test_missing_expiry_never_expires() {
        let now = Utc::now();
        let verification = fresh(now);
        assert!(!verification.is_expired(now + Duration::days(365)));
    }

    #[test]
    fn test_zero_ceiling_falls_back_to_default() {
        let now = Utc::now();
        let mut verification = fresh(now);
        verification.max_attempts = 0;
        assert_eq!(verification.effective_max_attempts(), DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
