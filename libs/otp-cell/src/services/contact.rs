// libs/otp-cell/src/services/contact.rs
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{OtpError, VerificationType};

/// Records that a user's contact channel passed verification.
#[async_trait]
pub trait ContactVerificationSink: Send + Sync {
    async fn mark_verified(&self, user_id: Uuid, verif_type: VerificationType) -> Result<(), OtpError>;
}

/// Flips `email_verified` / `phone_verified` on the user's profile row.
pub struct SupabaseContactSink {
    supabase: Arc<SupabaseClient>,
    token: String,
}

impl SupabaseContactSink {
    pub fn new(supabase: Arc<SupabaseClient>, token: impl Into<String>) -> Self {
        Self {
            supabase,
            token: token.into(),
        }
    }
}

#[async_trait]
impl ContactVerificationSink for SupabaseContactSink {
    async fn mark_verified(&self, user_id: Uuid, verif_type: VerificationType) -> Result<(), OtpError> {
        let path = format!("/rest/v1/profiles?id=eq.{}", user_id);
        let mut body = Map::new();
        body.insert(verif_type.verified_flag().to_string(), Value::Bool(true));

        let _: Vec<Value> = self
            .supabase
            .request_returning(Method::PATCH, &path, Some(&self.token), Some(Value::Object(body)))
            .await
            .map_err(|e| OtpError::DatabaseError(e.to_string()))?;

        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryContactSink {
    verified: RwLock<HashSet<(Uuid, VerificationType)>>,
}

impl InMemoryContactSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_verified(&self, user_id: Uuid, verif_type: VerificationType) -> bool {
        self.verified.read().await.contains(&(user_id, verif_type))
    }
}

#[async_trait]
impl ContactVerificationSink for InMemoryContactSink {
    async fn mark_verified(&self, user_id: Uuid, verif_type: VerificationType) -> Result<(), OtpError> {
        self.verified.write().await.insert((user_id, verif_type));
        Ok(())
    }
}
