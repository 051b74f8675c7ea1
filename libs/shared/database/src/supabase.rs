use anyhow::Result;
use reqwest::{
    Client,
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use shared_config::AppConfig;

/// Non-success answer from the PostgREST API. Wrapped in `anyhow::Error`
/// by [`SupabaseClient::request`]; callers that care about the status code
/// recover it with `downcast_ref::<SupabaseError>()`.
#[derive(Error, Debug)]
pub enum SupabaseError {
    #[error("Authentication error: {message}")]
    Unauthorized { message: String },

    #[error("Resource not found: {message}")]
    NotFound { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
}

impl SupabaseError {
    fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => SupabaseError::Unauthorized { message },
            404 => SupabaseError::NotFound { message },
            409 => SupabaseError::Conflict { message },
            _ => SupabaseError::Api { status, message },
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, SupabaseError::Conflict { .. })
    }
}

/// True when the error chain carries a PostgREST 409 (unique or exclusion
/// violation raised inside the database).
pub fn is_conflict_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<SupabaseError>()
        .map(SupabaseError::is_conflict)
        .unwrap_or(false)
}

pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn get_headers(&self, auth_token: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        headers.insert("apikey", HeaderValue::from_str(&self.anon_key)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = auth_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }

        Ok(headers)
    }

    pub async fn request<T>(&self, method: Method, path: &str,
                            auth_token: Option<&str>, body: Option<Value>)
                            -> Result<T>
    where T: DeserializeOwned {
        self.request_with_headers(method, path, auth_token, body, &[]).await
    }

    /// Same as [`request`](Self::request) but asks PostgREST to return the
    /// affected rows (`Prefer: return=representation`).
    pub async fn request_returning<T>(&self, method: Method, path: &str,
                                      auth_token: Option<&str>, body: Option<Value>)
                                      -> Result<T>
    where T: DeserializeOwned {
        self.request_with_headers(
            method,
            path,
            auth_token,
            body,
            &[("Prefer", "return=representation")],
        ).await
    }

    /// Call a Postgres function exposed under `/rest/v1/rpc/{function}`.
    pub async fn rpc<T>(&self, function: &str, auth_token: Option<&str>, params: Value) -> Result<T>
    where T: DeserializeOwned {
        let path = format!("/rest/v1/rpc/{}", function);
        self.request(Method::POST, &path, auth_token, Some(params)).await
    }

    pub async fn request_with_headers<T>(&self, method: Method, path: &str,
                                         auth_token: Option<&str>, body: Option<Value>,
                                         extra_headers: &[(&str, &str)])
                                         -> Result<T>
    where T: DeserializeOwned {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut headers = self.get_headers(auth_token)?;
        for (name, value) in extra_headers {
            headers.insert(HeaderName::from_bytes(name.as_bytes())?, HeaderValue::from_str(value)?);
        }

        let mut req = self.client.request(method, &url)
            .headers(headers);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            error!("API error ({}): {}", status, error_text);
            return Err(SupabaseError::from_status(status.as_u16(), error_text).into());
        }

        let data = response.json::<T>().await?;
        Ok(data)
    }
}
