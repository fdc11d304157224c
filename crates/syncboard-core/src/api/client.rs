//! Authenticated request client for the SyncBoard API.
//!
//! Every outbound call goes through `ApiClient`, which attaches the current
//! credential as a bearer token and clears the session when the server
//! rejects it.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::auth::{Credential, SessionStore};
use crate::config::Config;

use super::ApiError;

/// Outcome of a call that reached the server and was not rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum Response<T> {
    Data(T),
    /// The server answered 401; the session has already been cleared
    SessionExpired,
}

impl<T> Response<T> {
    /// Collapse to the silent-logout contract: expiry yields `None`
    pub fn into_data(self) -> Option<T> {
        match self {
            Response::Data(data) => Some(data),
            Response::SessionExpired => None,
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, Response::SessionExpired)
    }
}

/// How a 401 is reported. The session is cleared either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expiry {
    /// As `Response::SessionExpired`
    Intercept,
    /// As `ApiError::ServerRejected` carrying the server's detail; the
    /// credential-issuing routes answer 401 for bad passwords
    Reject,
}

/// API client for SyncBoard.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    session: Arc<SessionStore>,
}

impl ApiClient {
    /// Create a client with no request timeout
    pub fn new(base_url: impl Into<String>, session: Arc<SessionStore>) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, session, None)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        session: Arc<SessionStore>,
        timeout: Option<Duration>,
    ) -> Result<Self, ApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: base_url.into(),
            session,
        })
    }

    /// An unset `api_url` leaves the base empty; calls then fail as
    /// transport errors instead of at construction.
    pub fn from_config(config: &Config, session: Arc<SessionStore>) -> Result<Self, ApiError> {
        let base_url = config.api_url().unwrap_or_default();
        if base_url.is_empty() {
            warn!("No API URL configured, requests will fail");
        }
        Self::with_timeout(base_url, session, config.request_timeout())
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(credential: Option<&Credential>) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        if let Some(credential) = credential {
            let mut value = header::HeaderValue::from_str(&format!("Bearer {}", credential.as_str()))
                .map_err(|_| ApiError::InvalidCredential)?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Issue a request and report session expiry as a distinct outcome.
    pub async fn send<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.dispatch(method, path, body, Expiry::Intercept).await
    }

    /// Issue a request. A 401 clears the session and yields `Ok(None)`.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Option<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(method, path, body).await.map(Response::into_data)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ApiError> {
        self.request::<T, ()>(Method::GET, path, None).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<Option<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<Option<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::PATCH, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ApiError> {
        self.request::<T, ()>(Method::DELETE, path, None).await
    }

    pub(crate) async fn dispatch<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        expiry: Expiry,
    ) -> Result<Response<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        // Read once: later session changes never alter this request
        let credential = self.session.credential();
        self.dispatch_as(credential, method, path, body, expiry).await
    }

    /// Like `dispatch`, with an explicit credential instead of the session's
    pub(crate) async fn dispatch_as<T, B>(
        &self,
        credential: Option<Credential>,
        method: Method,
        path: &str,
        body: Option<&B>,
        expiry: Expiry,
    ) -> Result<Response<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, url = %url, authenticated = credential.is_some(), "Sending request");

        let mut builder = self
            .client
            .request(method.clone(), &url)
            .headers(Self::headers(credential.as_ref())?);
        if let Some(body) = body {
            builder = builder.body(serde_json::to_vec(body).map_err(ApiError::Encode)?);
        }

        let response = builder.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            warn!(%method, path = path, "Credential rejected, clearing session");
            self.session.clear_session();
            if expiry == Expiry::Intercept {
                return Ok(Response::SessionExpired);
            }
        }

        let text = response.text().await?;
        if !status.is_success() {
            debug!(%status, path = path, "Request failed");
            return Err(ApiError::from_status(status, &text));
        }

        // Bodiless successes (e.g. 204) decode as JSON null
        let raw = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(raw)
            .map(Response::Data)
            .map_err(|e| {
                ApiError::MalformedResponse(format!("{} {}: {}", method, path, e))
            })
    }
}
