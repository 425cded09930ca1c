//! Daktela call-center platform client
//!
//! Covers the three contracts the pipeline needs: authenticated login,
//! recording download by activity name, and the activities listing used by
//! the ingestion sync.
//!
//! Tokens are cached per client instance with an expiry check, never in
//! module-level state; substituting a fake provider in tests only requires
//! constructing a client around a different config.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

/// Platform tokens are valid for a day; refresh a little early
const TOKEN_TTL_HOURS: i64 = 24;
const TOKEN_TTL_MARGIN_MINS: i64 = 5;

/// Platform client errors
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Credentials absent from every configuration tier; non-retryable
    #[error("Missing platform credentials")]
    MissingCredentials,

    #[error("Login failed: {0}")]
    LoginFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl PlatformError {
    /// Configuration errors are fatal; everything else is worth a retry
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PlatformError::MissingCredentials)
    }
}

/// Platform connection settings resolved from config
#[derive(Debug, Clone, Default)]
pub struct PlatformConfig {
    pub base_url: Option<String>,
    pub login: Option<String>,
    pub password: Option<String>,
}

impl PlatformConfig {
    fn base_url(&self) -> Result<&str, PlatformError> {
        self.base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .filter(|url| !url.is_empty())
            .ok_or(PlatformError::MissingCredentials)
    }

    fn credentials(&self) -> Result<(&str, &str), PlatformError> {
        match (self.login.as_deref(), self.password.as_deref()) {
            (Some(login), Some(password)) if !login.is_empty() && !password.is_empty() => {
                Ok((login, password))
            }
            _ => Err(PlatformError::MissingCredentials),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Injected token provider with its own expiry check and refresh.
///
/// Owned by the client instance, scoped to its lifetime.
pub struct TokenProvider {
    http: reqwest::Client,
    config: PlatformConfig,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(http: reqwest::Client, config: PlatformConfig) -> Self {
        Self {
            http,
            config,
            cached: Mutex::new(None),
        }
    }

    /// Return a valid token, refreshing via the login endpoint when the
    /// cached one is absent or expired
    pub async fn token(&self) -> Result<String, PlatformError> {
        let mut cached = self.cached.lock().await;

        if let Some(entry) = cached.as_ref() {
            if Utc::now() < entry.expires_at {
                return Ok(entry.token.clone());
            }
        }

        let token = self.login().await?;
        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at: Utc::now() + Duration::hours(TOKEN_TTL_HOURS)
                - Duration::minutes(TOKEN_TTL_MARGIN_MINS),
        });

        Ok(token)
    }

    /// Drop the cached token (e.g. after a 401)
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn login(&self) -> Result<String, PlatformError> {
        let base_url = self.config.base_url()?;
        let (login, password) = self.config.credentials()?;

        #[derive(Serialize)]
        struct LoginRequest<'a> {
            username: &'a str,
            password: &'a str,
            only_token: u8,
        }

        #[derive(Deserialize)]
        struct LoginResponse {
            result: Option<String>,
            error: Option<serde_json::Value>,
        }

        let response = self
            .http
            .post(format!("{}/api/v6/login.json", base_url))
            .json(&LoginRequest {
                username: login,
                password,
                only_token: 1,
            })
            .send()
            .await
            .map_err(|e| PlatformError::NetworkError(e.to_string()))?;

        let status = response.status();
        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::ParseError(e.to_string()))?;

        if !status.is_success() {
            return Err(PlatformError::LoginFailed(format!(
                "status {}",
                status.as_u16()
            )));
        }

        match body.result {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(PlatformError::LoginFailed(
                body.error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "No token received".to_string()),
            )),
        }
    }
}

/// One platform activity as returned by the activities listing
#[derive(Debug, Clone, Deserialize)]
pub struct Activity {
    pub name: String,
    pub title: String,
    #[serde(rename = "type")]
    pub activity_type: String,
    pub time: String,
    pub duration: Option<i64>,
    #[serde(default)]
    pub statuses: Vec<ActivityStatus>,
    pub item: Option<CallItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActivityStatus {
    pub name: String,
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallItem {
    pub id_call: Option<String>,
    pub direction: Option<String>,
    pub answered: Option<bool>,
    pub id_agent: Option<AgentRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentRef {
    pub name: String,
    pub title: String,
    pub extension: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActivitiesEnvelope {
    result: Option<ActivitiesResult>,
}

#[derive(Debug, Deserialize)]
struct ActivitiesResult {
    #[serde(default)]
    data: Vec<Activity>,
}

/// Daktela REST client
pub struct PlatformClient {
    http: reqwest::Client,
    config: PlatformConfig,
    tokens: TokenProvider,
}

impl PlatformClient {
    pub fn new(config: PlatformConfig) -> Result<Self, PlatformError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| PlatformError::NetworkError(e.to_string()))?;

        Ok(Self {
            http: http.clone(),
            tokens: TokenProvider::new(http, config.clone()),
            config,
        })
    }

    /// Fetch the audio bytes of a call recording
    pub async fn fetch_recording(&self, activity_name: &str) -> Result<Vec<u8>, PlatformError> {
        let base_url = self.config.base_url()?;
        let token = self.tokens.token().await?;

        let url = format!(
            "{}/file/recording/{}?accessToken={}",
            base_url, activity_name, token
        );

        tracing::debug!(activity = %activity_name, "Fetching call recording");

        let response = self
            .http
            .get(&url)
            .header("X-AUTH-TOKEN", &token)
            .send()
            .await
            .map_err(|e| PlatformError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 401 {
            self.tokens.invalidate().await;
        }
        if !status.is_success() {
            return Err(PlatformError::ApiError(
                status.as_u16(),
                format!("Failed to fetch audio for {}", activity_name),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PlatformError::NetworkError(e.to_string()))?;

        Ok(bytes.to_vec())
    }

    /// List CALL activities carrying any of the given status tags, newest
    /// first, capped at 100 per page
    pub async fn fetch_activities(
        &self,
        status_ids: &[String],
    ) -> Result<Vec<Activity>, PlatformError> {
        let base_url = self.config.base_url()?;
        let token = self.tokens.token().await?;

        let mut params: Vec<(String, String)> = vec![
            ("filter[0][field]".to_string(), "type".to_string()),
            ("filter[0][operator]".to_string(), "eq".to_string()),
            ("filter[0][value]".to_string(), "CALL".to_string()),
            ("filter[1][field]".to_string(), "statuses".to_string()),
            ("filter[1][operator]".to_string(), "in".to_string()),
        ];
        for (idx, status_id) in status_ids.iter().enumerate() {
            params.push((format!("filter[1][value][{}]", idx), status_id.clone()));
        }
        params.push(("sort[0][field]".to_string(), "time".to_string()));
        params.push(("sort[0][dir]".to_string(), "desc".to_string()));
        params.push(("take".to_string(), "100".to_string()));

        let response = self
            .http
            .get(format!("{}/api/v6/activities.json", base_url))
            .query(&params)
            .header("X-AUTH-TOKEN", &token)
            .send()
            .await
            .map_err(|e| PlatformError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 401 {
            self.tokens.invalidate().await;
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::ApiError(status.as_u16(), body));
        }

        let envelope: ActivitiesEnvelope = response
            .json()
            .await
            .map_err(|e| PlatformError::ParseError(e.to_string()))?;

        Ok(envelope.result.map(|r| r.data).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_credentials_is_fatal() {
        let client = PlatformClient::new(PlatformConfig::default()).unwrap();
        let err = client.fetch_recording("act-1").await.unwrap_err();
        assert!(matches!(err, PlatformError::MissingCredentials));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let config = PlatformConfig {
            base_url: Some("https://pbx.example.com///".to_string()),
            login: Some("user".to_string()),
            password: Some("pass".to_string()),
        };
        assert_eq!(config.base_url().unwrap(), "https://pbx.example.com");
    }

    #[test]
    fn test_activity_deserializes() {
        let json = r#"{
            "name": "act-1",
            "title": "Call",
            "type": "CALL",
            "time": "2026-07-01 10:00:00",
            "duration": 245,
            "statuses": [{"name": "qa_sales", "title": "QA Sales"}],
            "item": {
                "id_call": "c-123",
                "direction": "in",
                "answered": true,
                "id_agent": {"name": "jkowalski", "title": "Jan Kowalski", "extension": "101"}
            }
        }"#;
        let activity: Activity = serde_json::from_str(json).unwrap();
        assert_eq!(activity.activity_type, "CALL");
        assert_eq!(activity.item.unwrap().id_call.as_deref(), Some("c-123"));
        assert_eq!(activity.statuses[0].name, "qa_sales");
    }
}
