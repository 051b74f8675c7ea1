// libs/otp-cell/src/services/store.rs
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::{is_conflict_error, SupabaseClient};

use crate::models::{OtpError, Verification, VerificationType};

/// Persistence for verification records.
#[async_trait]
pub trait VerificationStore: Send + Sync {
    async fn insert(&self, verification: &Verification) -> Result<(), OtpError>;

    /// Most recent record for the pair, by `created_at`.
    async fn latest_for(
        &self,
        verif_type: VerificationType,
        target: &str,
    ) -> Result<Option<Verification>, OtpError>;

    /// Write `attempts` (and `used` when set) only if the stored record is
    /// still unused and its counter equals `expected_attempts`. Returns
    /// `false` when another writer got there first.
    async fn record_attempt(
        &self,
        id: Uuid,
        expected_attempts: i32,
        attempts: i32,
        used: bool,
    ) -> Result<bool, OtpError>;
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

#[derive(Default)]
pub struct InMemoryVerificationStore {
    records: RwLock<Vec<Verification>>,
}

impl InMemoryVerificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: Uuid) -> Option<Verification> {
        self.records.read().await.iter().find(|v| v.id == id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl VerificationStore for InMemoryVerificationStore {
    async fn insert(&self, verification: &Verification) -> Result<(), OtpError> {
        self.records.write().await.push(verification.clone());
        Ok(())
    }

    async fn latest_for(
        &self,
        verif_type: VerificationType,
        target: &str,
    ) -> Result<Option<Verification>, OtpError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|v| v.verif_type == verif_type && v.target == target)
            .max_by_key(|v| v.created_at)
            .cloned())
    }

    async fn record_attempt(
        &self,
        id: Uuid,
        expected_attempts: i32,
        attempts: i32,
        used: bool,
    ) -> Result<bool, OtpError> {
        let mut records = self.records.write().await;
        let Some(record) = records.iter_mut().find(|v| v.id == id) else {
            return Err(OtpError::VerificationNotFound);
        };

        if record.used || record.attempts != expected_attempts {
            return Ok(false);
        }

        record.attempts = attempts;
        if used {
            record.used = true;
        }
        Ok(true)
    }
}

// ==============================================================================
// SUPABASE STORE
// ==============================================================================

pub struct SupabaseVerificationStore {
    supabase: Arc<SupabaseClient>,
    token: String,
}

impl SupabaseVerificationStore {
    pub fn new(supabase: Arc<SupabaseClient>, token: impl Into<String>) -> Self {
        Self {
            supabase,
            token: token.into(),
        }
    }
}

#[async_trait]
impl VerificationStore for SupabaseVerificationStore {
    async fn insert(&self, verification: &Verification) -> Result<(), OtpError> {
        let body = serde_json::to_value(verification)
            .map_err(|e| OtpError::DatabaseError(format!("Failed to encode verification: {}", e)))?;

        let _: Vec<Value> = self
            .supabase
            .request_returning(Method::POST, "/rest/v1/verifications", Some(&self.token), Some(body))
            .await
            .map_err(|e| {
                // user_id is a foreign key to the user table
                if is_conflict_error(&e) {
                    OtpError::UserNotFound
                } else {
                    OtpError::DatabaseError(e.to_string())
                }
            })?;

        Ok(())
    }

    async fn latest_for(
        &self,
        verif_type: VerificationType,
        target: &str,
    ) -> Result<Option<Verification>, OtpError> {
        let path = format!(
            "/rest/v1/verifications?verif_type=eq.{}&target=eq.{}&order=created_at.desc&limit=1",
            verif_type,
            urlencoding::encode(target)
        );

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(&self.token), None)
            .await
            .map_err(|e| OtpError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .next()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| OtpError::DatabaseError(format!("Failed to parse verification: {}", e)))
    }

    async fn record_attempt(
        &self,
        id: Uuid,
        expected_attempts: i32,
        attempts: i32,
        used: bool,
    ) -> Result<bool, OtpError> {
        let path = format!(
            "/rest/v1/verifications?id=eq.{}&attempts=eq.{}&used=eq.false",
            id, expected_attempts
        );

        let mut fields = Map::new();
        fields.insert("attempts".to_string(), json!(attempts));
        if used {
            fields.insert("used".to_string(), json!(true));
        }

        let rows: Vec<Value> = self
            .supabase
            .request_returning(Method::PATCH, &path, Some(&self.token), Some(Value::Object(fields)))
            .await
            .map_err(|e| OtpError::DatabaseError(e.to_string()))?;

        debug!("Attempt update for verification {} touched {} rows", id, rows.len());
        Ok(!rows.is_empty())
    }
}
