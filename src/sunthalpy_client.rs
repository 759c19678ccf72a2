use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::StatusCode;
use serde_derive::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::snapshot::{DeviceGroup, FieldRef, RawPayload};

pub const DEFAULT_BASE_URL: &str = "https://cliente.sunthalpy.com:12345/api/client";

const USER_AGENT: &str = "Mozilla/5.0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const LOGIN_ATTEMPTS: u32 = 3;

/// The login response carries no expiry, so a cached token is re-used for a
/// fixed window and refreshed transparently afterwards (or earlier, if the
/// service rejects it).
const SESSION_TTL_SECS: i64 = 600;
const SESSION_EXPIRY_GRACE_SECS: i64 = 30;

/// Classified client errors. The coordinator owns retry policy; the client
/// only classifies and, for an expired session, re-authenticates once.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("credentials rejected by the service")]
    AuthRejected,
    #[error("session expired or rejected")]
    AuthExpired,
    #[error("transient transport error: {0}")]
    Transient(String),
    #[error("malformed service response: {0}")]
    Protocol(String),
}

impl ApiError {
    /// Whether the coordinator should keep retrying under backoff. Auth
    /// failures need user action and are not retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Transient(_) | ApiError::Protocol(_))
    }
}

/// Account credentials. The password never appears in Debug output or logs.
#[derive(Clone)]
pub struct Credentials {
    email: String,
    password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
struct Session {
    token: String,
    expires_at: DateTime<Utc>,
}

impl Session {
    fn is_expired(&self) -> bool {
        Utc::now() + TimeDelta::seconds(SESSION_EXPIRY_GRACE_SECS) >= self.expires_at
    }
}

#[derive(Deserialize)]
struct LoginResponse {
    obj: LoginSession,
}

#[derive(Deserialize)]
struct LoginSession {
    token: String,
    #[serde(rename = "expiresIn")]
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct DeviceDataResponse {
    obj: DeviceData,
}

#[derive(Deserialize)]
struct DeviceData {
    #[serde(rename = "lastMeasure", default)]
    last_measure: HashMap<String, Value>,
}

/// Thin wrapper around the Sunthalpy account API: login, per-group status
/// reads and device commands. No persistence, no business logic.
pub struct SunthalpyClient {
    base_url: String,
    credentials: Credentials,
    http: reqwest::Client,
    session: Option<Session>,
}

impl SunthalpyClient {
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            base_url: base_url.into(),
            credentials,
            http: reqwest::Client::new(),
            session: None,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let base_url =
            env::var("SUNTHALPY_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let email = env::var("SUNTHALPY_EMAIL").context("SUNTHALPY_EMAIL is not set")?;
        let password = env::var("SUNTHALPY_PASSWORD").context("SUNTHALPY_PASSWORD is not set")?;
        Ok(Self::new(base_url, Credentials::new(email, password)))
    }

    /// Forces a fresh login, replacing any cached session.
    pub async fn authenticate(&mut self) -> Result<(), ApiError> {
        let session = self.login().await?;
        self.session = Some(session);
        Ok(())
    }

    pub fn invalidate_session(&mut self) {
        self.session = None;
    }

    /// Fetches the latest readings of every remote device group. An expired
    /// session triggers exactly one re-authentication and one retry; a second
    /// rejection is treated as a credential failure.
    pub async fn fetch_status(&mut self) -> Result<RawPayload, ApiError> {
        match self.fetch_status_once().await {
            Err(ApiError::AuthExpired) => {
                debug!("data request rejected, re-authenticating once");
                self.session = None;
                self.fetch_status_once().await.map_err(demote_expired)
            }
            other => other,
        }
    }

    /// Turns a switch point on or off.
    pub async fn set_switch(&mut self, field: FieldRef, on: bool) -> Result<(), ApiError> {
        self.send_command(field, Value::Bool(on)).await
    }

    /// Writes a numeric setpoint. The service expects one decimal.
    pub async fn set_number(&mut self, field: FieldRef, value: f64) -> Result<(), ApiError> {
        let rounded = (value * 10.0).round() / 10.0;
        self.send_command(field, json!(rounded)).await
    }

    async fn fetch_status_once(&mut self) -> Result<RawPayload, ApiError> {
        let token = self.ensure_session().await?;
        let mut payload = RawPayload::new();
        for group in DeviceGroup::REMOTE {
            let readings = self.fetch_group(&token, group).await?;
            payload.insert(group, readings);
        }
        Ok(payload)
    }

    async fn fetch_group(
        &self,
        token: &str,
        group: DeviceGroup,
    ) -> Result<HashMap<String, Value>, ApiError> {
        let uuid = device_uuid(group)?;
        let response = self
            .post_json("/get/device-data/last", Some(token), &json!({ "uuid": uuid }))
            .await?;
        let data: DeviceDataResponse = response
            .json()
            .await
            .map_err(|err| ApiError::Protocol(err.to_string()))?;
        Ok(data.obj.last_measure)
    }

    async fn send_command(&mut self, field: FieldRef, value: Value) -> Result<(), ApiError> {
        match self.send_command_once(field, &value).await {
            Err(ApiError::AuthExpired) => {
                debug!("command rejected, re-authenticating once");
                self.session = None;
                self.send_command_once(field, &value)
                    .await
                    .map_err(demote_expired)
            }
            other => other,
        }
    }

    async fn send_command_once(&mut self, field: FieldRef, value: &Value) -> Result<(), ApiError> {
        let uuid = device_uuid(field.group)?;
        let token = self.ensure_session().await?;
        let body = json!({
            "uuid": uuid,
            "value": value,
            "deviceInternalAddress": field.address,
        });
        self.post_json("/send/device/command", Some(&token), &body)
            .await?;
        Ok(())
    }

    /// Returns a valid session token, logging in if there is none or the
    /// cached one is past its window.
    async fn ensure_session(&mut self) -> Result<String, ApiError> {
        if let Some(session) = &self.session {
            if !session.is_expired() {
                return Ok(session.token.clone());
            }
            debug!("cached session past its window, logging in again");
        }
        let session = self.login().await?;
        let token = session.token.clone();
        self.session = Some(session);
        Ok(token)
    }

    /// Exchanges credentials for a session. Network-level failures are
    /// retried a few times with exponential backoff; an explicit rejection
    /// is fatal until the credentials change.
    async fn login(&self) -> Result<Session, ApiError> {
        let mut attempt = 1;
        loop {
            match self.login_once().await {
                Ok(session) => return Ok(session),
                Err(ApiError::Transient(reason)) if attempt < LOGIN_ATTEMPTS => {
                    warn!(attempt, "login failed: {reason}; retrying");
                    sleep(Duration::from_millis(250 * (1 << (attempt - 1)))).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn login_once(&self) -> Result<Session, ApiError> {
        let body = json!({
            "email": self.credentials.email,
            "pass": self.credentials.password,
        });
        let response = self
            .post_json("/login", None, &body)
            .await
            .map_err(|err| match err {
                // 401/403 on the login endpoint means the credentials
                // themselves are bad, not a stale session
                ApiError::AuthExpired => ApiError::AuthRejected,
                other => other,
            })?;
        let login: LoginResponse = response
            .json()
            .await
            .map_err(|err| ApiError::Protocol(err.to_string()))?;
        let ttl = login.obj.expires_in.unwrap_or(SESSION_TTL_SECS);
        Ok(Session {
            token: login.obj.token,
            expires_at: Utc::now() + TimeDelta::seconds(ttl),
        })
    }

    async fn post_json(
        &self,
        path: &str,
        token: Option<&str>,
        body: &Value,
    ) -> Result<reqwest::Response, ApiError> {
        let mut request = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .timeout(REQUEST_TIMEOUT)
            .header("User-Agent", USER_AGENT)
            .json(body);
        if let Some(token) = token {
            request = request.header("auth", token);
        }
        let response = request.send().await.map_err(transport_error)?;
        classify_status(response.status())?;
        Ok(response)
    }
}

fn device_uuid(group: DeviceGroup) -> Result<&'static str, ApiError> {
    group.uuid().ok_or_else(|| {
        ApiError::Protocol(format!("group `{}` has no device uuid", group.key()))
    })
}

fn demote_expired(err: ApiError) -> ApiError {
    match err {
        ApiError::AuthExpired => ApiError::AuthRejected,
        other => other,
    }
}

fn classify_status(status: StatusCode) -> Result<(), ApiError> {
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ApiError::AuthExpired);
    }
    if status.is_server_error() {
        return Err(ApiError::Transient(format!("server returned {status}")));
    }
    Err(ApiError::Protocol(format!("unexpected status {status}")))
}

fn transport_error(err: reqwest::Error) -> ApiError {
    if err.is_decode() {
        ApiError::Protocol(err.to_string())
    } else {
        ApiError::Transient(err.to_string())
    }
}
