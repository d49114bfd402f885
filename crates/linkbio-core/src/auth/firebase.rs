//! Firebase Identity Toolkit REST client.

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use super::{
    validate_credentials, AuthError, AuthRejection, AuthResult, AuthSession, Identity,
    SessionPersistence,
};
use crate::util::{compact_text, is_http_url, unix_timestamp_now};

const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";
const SECURE_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1";

/// Base URLs of the two Google APIs the client talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEndpoints {
    pub identity_toolkit: String,
    pub secure_token: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            identity_toolkit: IDENTITY_TOOLKIT_URL.to_string(),
            secure_token: SECURE_TOKEN_URL.to_string(),
        }
    }
}

impl AuthEndpoints {
    /// Point both APIs at a local emulator, e.g. `http://127.0.0.1:9099`.
    pub fn emulator(host: &str) -> AuthResult<Self> {
        let host = host.trim().trim_end_matches('/');
        if !is_http_url(host) {
            return Err(AuthError::InvalidConfiguration(
                "Emulator host must include http:// or https://",
            ));
        }
        Ok(Self {
            identity_toolkit: format!("{host}/identitytoolkit.googleapis.com/v1"),
            secure_token: format!("{host}/securetoken.googleapis.com/v1"),
        })
    }
}

#[derive(Clone)]
pub struct FirebaseAuthClient<S: SessionPersistence> {
    api_key: String,
    endpoints: AuthEndpoints,
    client: Client,
    store: S,
}

impl<S: SessionPersistence> FirebaseAuthClient<S> {
    pub fn new(api_key: impl Into<String>, store: S) -> AuthResult<Self> {
        Self::with_endpoints(api_key, AuthEndpoints::default(), store)
    }

    pub fn with_endpoints(
        api_key: impl Into<String>,
        endpoints: AuthEndpoints,
        store: S,
    ) -> AuthResult<Self> {
        let api_key = api_key.into().trim().to_string();
        if api_key.is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Firebase API key must not be empty",
            ));
        }

        Ok(Self {
            api_key,
            endpoints,
            client: Client::builder().build()?,
            store,
        })
    }

    /// The persisted session, without refreshing it.
    pub fn stored_session(&self) -> AuthResult<Option<AuthSession>> {
        self.store.load_session()
    }

    pub async fn restore_session(&self) -> AuthResult<Option<AuthSession>> {
        let Some(stored_session) = self.store.load_session()? else {
            return Ok(None);
        };

        if !stored_session.is_expired() {
            return Ok(Some(stored_session));
        }

        match self.refresh_session(&stored_session.refresh_token).await {
            Ok(refreshed) => Ok(Some(refreshed)),
            Err(error) => {
                tracing::warn!("Failed to refresh persisted session: {}", error);
                self.store.clear_session()?;
                Ok(None)
            }
        }
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        validate_credentials(email, password)?;
        let session = self.password_request("accounts:signUp", email, password).await?;
        self.store.save_session(&session)?;
        Ok(session)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        validate_credentials(email, password)?;
        let session = self
            .password_request("accounts:signInWithPassword", email, password)
            .await?;
        self.store.save_session(&session)?;
        Ok(session)
    }

    pub async fn refresh_session(&self, refresh_token: &str) -> AuthResult<AuthSession> {
        if refresh_token.trim().is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Refresh token must not be empty",
            ));
        }

        let request = self
            .client
            .post(format!("{}/token", self.endpoints.secure_token))
            .query(&[("key", self.api_key.as_str())])
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ]);
        let response = send_json::<SecureTokenResponse>(request).await?;
        let mut session = response.into_session()?;

        // The token endpoint does not echo the email
        if let Some(stored) = self.store.load_session()? {
            if stored.user.uid == session.user.uid {
                session.user.email = session.user.email.or(stored.user.email);
            }
        }

        self.store.save_session(&session)?;
        Ok(session)
    }

    /// Firebase has no server-side logout; dropping the tokens is the sign-out.
    pub fn sign_out(&self) -> AuthResult<()> {
        self.store.clear_session()
    }

    async fn password_request(
        &self,
        method: &str,
        email: &str,
        password: &str,
    ) -> AuthResult<AuthSession> {
        let payload = serde_json::json!({
            "email": email.trim(),
            "password": password,
            "returnSecureToken": true,
        });
        let request = self
            .client
            .post(format!("{}/{method}", self.endpoints.identity_toolkit))
            .query(&[("key", self.api_key.as_str())])
            .json(&payload);
        send_json::<IdentityToolkitResponse>(request)
            .await?
            .into_session()
    }
}

async fn send_json<T: serde::de::DeserializeOwned>(request: RequestBuilder) -> AuthResult<T> {
    let response = request.send().await?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::Rejected(parse_api_error(status, &body)));
    }
    Ok(response.json::<T>().await?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityToolkitResponse {
    id_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<Value>,
    local_id: Option<String>,
    email: Option<String>,
}

impl IdentityToolkitResponse {
    fn into_session(self) -> AuthResult<AuthSession> {
        match (self.id_token, self.refresh_token, self.local_id) {
            (Some(id_token), Some(refresh_token), Some(uid)) => Ok(AuthSession {
                id_token,
                refresh_token,
                expires_at: expires_at_from(self.expires_in.as_ref()),
                user: Identity {
                    uid,
                    email: self.email,
                },
            }),
            _ => Err(AuthError::Rejected(AuthRejection::Other(
                "Auth response did not include enough session fields".to_string(),
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SecureTokenResponse {
    id_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<Value>,
    user_id: Option<String>,
}

impl SecureTokenResponse {
    fn into_session(self) -> AuthResult<AuthSession> {
        match (self.id_token, self.refresh_token, self.user_id) {
            (Some(id_token), Some(refresh_token), Some(uid)) => Ok(AuthSession {
                id_token,
                refresh_token,
                expires_at: expires_at_from(self.expires_in.as_ref()),
                user: Identity { uid, email: None },
            }),
            _ => Err(AuthError::Rejected(AuthRejection::Other(
                "Refresh response did not include enough session fields".to_string(),
            ))),
        }
    }
}

/// `expiresIn` arrives as a string of seconds; tolerate a number too.
fn expires_at_from(expires_in: Option<&Value>) -> i64 {
    const DEFAULT_LIFETIME_SECONDS: i64 = 3600;

    let seconds = expires_in
        .and_then(|value| {
            value
                .as_i64()
                .or_else(|| value.as_str().and_then(|raw| raw.trim().parse().ok()))
        })
        .unwrap_or(DEFAULT_LIFETIME_SECONDS);
    unix_timestamp_now().saturating_add(seconds)
}

#[derive(Debug, Deserialize)]
struct FirebaseErrorResponse {
    error: Option<FirebaseErrorBody>,
}

#[derive(Debug, Deserialize)]
struct FirebaseErrorBody {
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> AuthRejection {
    if let Ok(payload) = serde_json::from_str::<FirebaseErrorResponse>(body) {
        if let Some(message) = payload.error.and_then(|error| error.message) {
            return AuthRejection::from_code(&message);
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        AuthRejection::Other(format!("HTTP {}", status.as_u16()))
    } else {
        AuthRejection::Other(format!("{} ({})", trimmed, status.as_u16()))
    }
}
