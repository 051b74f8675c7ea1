use std::env;
use std::str::FromStr;
use tracing::warn;

pub const DEFAULT_SMS_API_URL: &str = "https://www.fast2sms.com/dev/bulkV2";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_role_key: String,
    pub supabase_jwt_secret: String,
    pub otp_ttl_minutes: i64,
    pub otp_length: usize,
    pub otp_max_attempts: i32,
    pub email_api_url: String,
    pub email_api_key: String,
    pub email_from: String,
    pub sms_api_url: String,
    pub sms_api_key: String,
    pub server_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_service_role_key: String::new(),
            supabase_jwt_secret: String::new(),
            otp_ttl_minutes: 10,
            otp_length: 6,
            otp_max_attempts: 5,
            email_api_url: String::new(),
            email_api_key: String::new(),
            email_from: String::new(),
            sms_api_url: DEFAULT_SMS_API_URL.to_string(),
            sms_api_key: String::new(),
            server_port: 3000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            supabase_url: string_var("SUPABASE_URL"),
            supabase_anon_key: string_var("SUPABASE_ANON_PUBLIC_KEY"),
            supabase_service_role_key: string_var("SUPABASE_SERVICE_ROLE_KEY"),
            supabase_jwt_secret: string_var("SUPABASE_JWT_SECRET"),
            otp_ttl_minutes: parsed_var("OTP_TTL_MINUTES", defaults.otp_ttl_minutes),
            otp_length: parsed_var("OTP_LENGTH", defaults.otp_length),
            otp_max_attempts: parsed_var("OTP_MAX_ATTEMPTS", defaults.otp_max_attempts),
            email_api_url: string_var("EMAIL_API_URL"),
            email_api_key: string_var("EMAIL_API_KEY"),
            email_from: string_var("EMAIL_FROM"),
            sms_api_url: env::var("SMS_API_URL").unwrap_or_else(|_| {
                warn!("SMS_API_URL not set, using default");
                defaults.sms_api_url.clone()
            }),
            sms_api_key: string_var("SMS_API_KEY"),
            server_port: parsed_var("SERVER_PORT", defaults.server_port),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    pub fn is_email_configured(&self) -> bool {
        !self.email_api_url.is_empty() && !self.email_api_key.is_empty()
    }

    pub fn is_sms_configured(&self) -> bool {
        !self.sms_api_url.is_empty() && !self.sms_api_key.is_empty()
    }

    /// Token used for server-side storage calls. Falls back to the anon key
    /// when no service role key is provided.
    pub fn storage_token(&self) -> &str {
        if self.supabase_service_role_key.is_empty() {
            &self.supabase_anon_key
        } else {
            &self.supabase_service_role_key
        }
    }
}

fn string_var(name: &str) -> String {
    env::var(name).unwrap_or_else(|_| {
        warn!("{} not set, using empty value", name);
        String::new()
    })
}

fn parsed_var<T: FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_verification_policy() {
        let config = AppConfig::default();
        assert_eq!(config.otp_ttl_minutes, 10);
        assert_eq!(config.otp_length, 6);
        assert_eq!(config.otp_max_attempts, 5);
        assert!(!config.is_configured());
        assert!(!config.is_sms_configured());
    }

    #[test]
    fn test_storage_token_prefers_service_role_key() {
        let mut config = AppConfig {
            supabase_anon_key: "anon".to_string(),
            ..AppConfig::default()
        };
        assert_eq!(config.storage_token(), "anon");

        config.supabase_service_role_key = "service".to_string();
        assert_eq!(config.storage_token(), "service");
    }
}
