// libs/otp-cell/src/services/delivery.rs
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info};

use shared_config::AppConfig;

use crate::models::VerificationType;

const SUBJECT: &str = "Your verification code";
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("{0}")]
    NotConfigured(&'static str),

    #[error("provider rejected message: {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

fn message_body(code: &str) -> String {
    format!("Your verification code is: {}", code)
}

/// Hands a plaintext code to whoever delivers it to the user.
#[async_trait]
pub trait OtpDelivery: Send + Sync {
    async fn deliver(
        &self,
        verif_type: VerificationType,
        target: &str,
        code: &str,
    ) -> Result<(), DeliveryError>;
}

/// Transactional email API client (JSON POST with a bearer key).
pub struct EmailApiSender {
    client: Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl EmailApiSender {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            api_url: config.email_api_url.clone(),
            api_key: config.email_api_key.clone(),
            from: config.email_from.clone(),
        }
    }

    pub async fn send(&self, to_email: &str, code: &str) -> Result<(), DeliveryError> {
        if self.api_url.is_empty() || self.api_key.is_empty() {
            return Err(DeliveryError::NotConfigured("email_not_configured"));
        }

        let payload = json!({
            "from": self.from,
            "to": [to_email],
            "subject": SUBJECT,
            "text": message_body(code),
        });

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .timeout(PROVIDER_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .inspect_err(|e| error!("Failed to send email OTP: {}", e))?;

        check_status(response).await
    }
}

/// Fast2SMS-style bulk SMS client.
pub struct SmsApiSender {
    client: Client,
    api_url: String,
    api_key: String,
}

impl SmsApiSender {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            api_url: config.sms_api_url.clone(),
            api_key: config.sms_api_key.clone(),
        }
    }

    pub async fn send(&self, phone: &str, code: &str) -> Result<(), DeliveryError> {
        if self.api_key.is_empty() {
            return Err(DeliveryError::NotConfigured("sms_not_configured"));
        }

        let payload = json!({
            "message": message_body(code),
            "language": "english",
            "route": "q",
            "numbers": phone,
        });

        let response = self
            .client
            .post(&self.api_url)
            .header("authorization", &self.api_key)
            .timeout(PROVIDER_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .inspect_err(|e| error!("Failed to send SMS OTP: {}", e))?;

        check_status(response).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<(), DeliveryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    error!("Delivery provider returned {}: {}", status, body);
    Err(DeliveryError::Rejected {
        status: status.as_u16(),
        body,
    })
}

/// Routes codes to the email or SMS provider by verification type.
pub struct ProviderDelivery {
    email: EmailApiSender,
    sms: SmsApiSender,
}

impl ProviderDelivery {
    pub fn new(config: &AppConfig) -> Self {
        if !config.is_email_configured() {
            info!("Email provider not configured; email codes will fail to send");
        }
        if !config.is_sms_configured() {
            info!("SMS provider not configured; phone codes will fail to send");
        }

        Self {
            email: EmailApiSender::new(config),
            sms: SmsApiSender::new(config),
        }
    }
}

#[async_trait]
impl OtpDelivery for ProviderDelivery {
    async fn deliver(
        &self,
        verif_type: VerificationType,
        target: &str,
        code: &str,
    ) -> Result<(), DeliveryError> {
        debug!("Delivering {} code", verif_type);
        match verif_type {
            VerificationType::Email => self.email.send(target, code).await,
            VerificationType::Phone => self.sms.send(target, code).await,
        }
    }
}
