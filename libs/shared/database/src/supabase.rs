use anyhow::Result;
use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method, StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use shared_config::AppConfig;

/// Non-success answer from PostgREST, kept typed so callers can branch on the status.
#[derive(Error, Debug)]
pub enum PostgrestError {
    #[error("Authentication error: {body}")]
    Unauthorized { status: StatusCode, body: String },

    #[error("Resource not found: {body}")]
    NotFound { status: StatusCode, body: String },

    #[error("API error ({status}): {body}")]
    Api { status: StatusCode, body: String },
}

impl PostgrestError {
    fn from_response(status: StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => PostgrestError::Unauthorized { status, body },
            404 => PostgrestError::NotFound { status, body },
            _ => PostgrestError::Api { status, body },
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            PostgrestError::Unauthorized { status, .. }
            | PostgrestError::NotFound { status, .. }
            | PostgrestError::Api { status, .. } => *status,
        }
    }

    pub fn body(&self) -> &str {
        match self {
            PostgrestError::Unauthorized { body, .. }
            | PostgrestError::NotFound { body, .. }
            | PostgrestError::Api { body, .. } => body,
        }
    }
}

/// Thin PostgREST client shared by the directory and the scheduling store.
#[derive(Debug, Clone)]
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

        // Without a user token PostgREST is queried with the anon key as bearer.
        let bearer = auth_token.unwrap_or(&self.anon_key);
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", bearer))?);

        Ok(headers)
    }

    pub async fn request<T>(&self, method: Method, path: &str,
                            auth_token: Option<&str>, body: Option<Value>)
                            -> Result<T>
    where T: DeserializeOwned {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making request to {}", url);

        let headers = self.get_headers(auth_token)?;
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
            return Err(PostgrestError::from_response(status, error_text).into());
        }

        let data = response.json::<T>().await?;
        Ok(data)
    }
}
