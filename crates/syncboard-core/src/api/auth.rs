//! Typed wrappers for the server's `/api/auth` routes.
//!
//! Credentials are issued by the server; these helpers only carry the
//! result into the `SessionStore`.

use reqwest::{Method, StatusCode};
use tracing::info;

use crate::auth::{Credential, Identity};
use crate::models::{LoginRequest, RegisterRequest, TokenResponse, UserProfile};

use super::client::Expiry;
use super::{ApiClient, ApiError, Response};

const REGISTER_PATH: &str = "/api/auth/register";
const LOGIN_PATH: &str = "/api/auth/login";
const ME_PATH: &str = "/api/auth/me";

/// Unwrap a call made without expiry interception
fn data<T>(response: Response<T>) -> Result<T, ApiError> {
    match response {
        Response::Data(data) => Ok(data),
        Response::SessionExpired => Err(ApiError::ServerRejected {
            status: StatusCode::UNAUTHORIZED,
            message: "Session expired".to_string(),
        }),
    }
}

impl ApiClient {
    /// Create an account. The server answers with a token right away.
    pub async fn register(&self, request: &RegisterRequest) -> Result<TokenResponse, ApiError> {
        self.dispatch(Method::POST, REGISTER_PATH, Some(request), Expiry::Reject)
            .await
            .and_then(data)
    }

    /// Exchange email and password for a token. A wrong password is a
    /// `ServerRejected`; like every 401, it also ends any current session.
    pub async fn authenticate(&self, request: &LoginRequest) -> Result<TokenResponse, ApiError> {
        self.dispatch(Method::POST, LOGIN_PATH, Some(request), Expiry::Reject)
            .await
            .and_then(data)
    }

    /// Profile of the current session's user
    pub async fn me(&self) -> Result<Response<UserProfile>, ApiError> {
        self.send::<UserProfile, ()>(Method::GET, ME_PATH, None).await
    }

    /// Authenticate, fetch the profile, and start the session
    pub async fn login_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<UserProfile, ApiError> {
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let token = self.authenticate(&request).await?;
        self.establish_session(token).await
    }

    /// Register, then sign in with the issued token
    pub async fn register_and_login(
        &self,
        request: &RegisterRequest,
    ) -> Result<UserProfile, ApiError> {
        let token = self.register(request).await?;
        self.establish_session(token).await
    }

    /// Re-fetch the profile and store it as the session identity.
    /// Returns `None` when there is no session, it expired, or it was
    /// replaced or ended while the profile was in flight.
    pub async fn refresh_identity(&self) -> Result<Option<UserProfile>, ApiError> {
        let Some(credential) = self.session().credential() else {
            return Ok(None);
        };
        let response = self
            .dispatch_as::<UserProfile, ()>(
                Some(credential.clone()),
                Method::GET,
                ME_PATH,
                None,
                Expiry::Intercept,
            )
            .await?;
        let Some(profile) = response.into_data() else {
            return Ok(None);
        };

        if self
            .session()
            .update_identity(&credential, Some(Self::identity_of(&profile)?))
        {
            Ok(Some(profile))
        } else {
            Ok(None)
        }
    }

    pub fn logout(&self) {
        self.session().logout();
        info!("Logged out");
    }

    async fn establish_session(&self, token: TokenResponse) -> Result<UserProfile, ApiError> {
        let credential = Credential::new(token.access_token).ok_or_else(|| {
            ApiError::MalformedResponse("server issued an empty access token".to_string())
        })?;

        // The session is only set once the profile is known
        let profile: UserProfile = self
            .dispatch_as::<UserProfile, ()>(
                Some(credential.clone()),
                Method::GET,
                ME_PATH,
                None,
                Expiry::Reject,
            )
            .await
            .and_then(data)?;

        self.session()
            .login(credential.as_str(), Some(Self::identity_of(&profile)?));
        info!(email = %profile.email, "Login successful");
        Ok(profile)
    }

    fn identity_of(profile: &UserProfile) -> Result<Identity, ApiError> {
        Identity::from_record(profile).map_err(|e| ApiError::MalformedResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::auth::SessionStore;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn profile_json() -> serde_json::Value {
        json!({
            "id": "6f1c2a7e-8d8b-4c3e-9a51-2f0d5b7c9e11",
            "email": "a@example.com",
            "display_name": "A",
            "created_at": "2024-05-01T12:30:00.000000"
        })
    }

    async fn mount_me(server: &MockServer, token: &str) {
        Mock::given(method("GET"))
            .and(path(ME_PATH))
            .and(header("authorization", format!("Bearer {}", token).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(profile_json()))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_login_with_password_sets_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .and(body_json(json!({"email": "a@example.com", "password": "pw"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "jwt-1", "token_type": "bearer"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        mount_me(&server, "jwt-1").await;

        let session = Arc::new(SessionStore::ephemeral());
        let client = ApiClient::new(server.uri(), session.clone()).unwrap();

        let profile = client.login_with_password("a@example.com", "pw").await.unwrap();
        assert_eq!(profile.display_name, "A");
        assert!(session.is_authenticated());
        assert_eq!(session.credential().unwrap().as_str(), "jwt-1");
        let stored: UserProfile = session.identity().unwrap().decode().unwrap();
        assert_eq!(stored, profile);
    }

    #[tokio::test]
    async fn test_wrong_password_reports_detail_and_ends_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"detail": "Invalid email or password"})),
            )
            .mount(&server)
            .await;

        let session = Arc::new(SessionStore::ephemeral());
        session.login("old-tok", Some(Identity::new(json!({"id": 1}))));
        let client = ApiClient::new(server.uri(), session.clone()).unwrap();

        let err = client
            .login_with_password("a@example.com", "wrong")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid email or password");
        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
        assert!(!session.is_authenticated());
        assert!(session.credential().is_none());
        assert!(session.identity().is_none());
    }

    #[tokio::test]
    async fn test_register_and_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(REGISTER_PATH))
            .and(body_json(json!({
                "email": "a@example.com",
                "display_name": "A",
                "password": "pw"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"access_token": "jwt-2"})))
            .mount(&server)
            .await;
        mount_me(&server, "jwt-2").await;

        let session = Arc::new(SessionStore::ephemeral());
        let client = ApiClient::new(server.uri(), session.clone()).unwrap();
        let request = RegisterRequest {
            email: "a@example.com".to_string(),
            display_name: "A".to_string(),
            password: "pw".to_string(),
        };

        client.register_and_login(&request).await.unwrap();
        assert_eq!(session.credential().unwrap().as_str(), "jwt-2");
    }

    #[tokio::test]
    async fn test_duplicate_registration_surfaces_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(REGISTER_PATH))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({"detail": "Email already registered"})))
            .mount(&server)
            .await;

        let session = Arc::new(SessionStore::ephemeral());
        let client = ApiClient::new(server.uri(), session.clone()).unwrap();
        let request = RegisterRequest {
            email: "a@example.com".to_string(),
            display_name: "A".to_string(),
            password: "pw".to_string(),
        };

        let err = client.register_and_login(&request).await.unwrap_err();
        assert_eq!(err.to_string(), "Email already registered");
        assert!(session.session().is_none());
    }

    #[tokio::test]
    async fn test_failed_profile_fetch_leaves_session_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "jwt-3"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(ME_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "User not found"})))
            .mount(&server)
            .await;

        let session = Arc::new(SessionStore::ephemeral());
        let client = ApiClient::new(server.uri(), session.clone()).unwrap();

        let err = client
            .login_with_password("a@example.com", "pw")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "User not found");
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_me_with_expired_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ME_PATH))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let session = Arc::new(SessionStore::ephemeral());
        session.login("tok123", Some(Identity::new(json!({"id": 1, "name": "A"}))));
        let client = ApiClient::new(server.uri(), session.clone()).unwrap();

        assert!(client.me().await.unwrap().is_session_expired());
        assert!(!session.is_authenticated());
        assert_eq!(client.refresh_identity().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_refresh_identity_updates_profile() {
        let server = MockServer::start().await;
        mount_me(&server, "tok123").await;

        let session = Arc::new(SessionStore::ephemeral());
        session.login("tok123", None);
        let client = ApiClient::new(server.uri(), session.clone()).unwrap();

        let profile = client.refresh_identity().await.unwrap().unwrap();
        assert_eq!(profile.email, "a@example.com");
        assert_eq!(session.credential().unwrap().as_str(), "tok123");
        assert!(session.identity().is_some());

        client.logout();
        assert!(session.session().is_none());
    }

    #[tokio::test]
    async fn test_logout_during_profile_refresh_stays_logged_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ME_PATH))
            .and(header("authorization", "Bearer tok123"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(profile_json())
                    .set_delay(Duration::from_millis(300)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let session = Arc::new(SessionStore::ephemeral());
        session.login("tok123", None);
        let client = ApiClient::new(server.uri(), session.clone()).unwrap();

        let (refreshed, ()) = futures::join!(client.refresh_identity(), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            session.logout();
        });

        assert_eq!(refreshed.unwrap(), None);
        assert!(!session.is_authenticated());
        assert!(session.session().is_none());
    }

    #[tokio::test]
    async fn test_relogin_during_profile_refresh_keeps_new_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ME_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(profile_json())
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;

        let session = Arc::new(SessionStore::ephemeral());
        session.login("tok123", None);
        let client = ApiClient::new(server.uri(), session.clone()).unwrap();
        let other = Identity::new(json!({"id": 2}));

        let (refreshed, ()) = futures::join!(client.refresh_identity(), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            session.login("tok456", Some(other.clone()));
        });

        assert_eq!(refreshed.unwrap(), None);
        assert_eq!(session.credential().unwrap().as_str(), "tok456");
        assert_eq!(session.identity(), Some(other));
    }
}
