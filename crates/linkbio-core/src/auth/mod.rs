//! Firebase authentication: sessions, the identity provider seam, and
//! credential checks shared by every client.

mod firebase;
mod provider;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::subscription::Subscription;
use crate::util::unix_timestamp_now;

pub use firebase::{AuthEndpoints, FirebaseAuthClient};
pub use provider::SessionIdentityProvider;

const EXPIRY_SKEW_SECONDS: i64 = 60;
const MIN_PASSWORD_LENGTH: usize = 6;

/// The signed-in user as seen by the rest of the app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    pub email: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub id_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    pub user: Identity,
}

impl AuthSession {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= unix_timestamp_now() + EXPIRY_SKEW_SECONDS
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthSession")
            .field("id_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

/// A request the auth service refused, keyed by its error code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRejection {
    EmailExists,
    InvalidEmail,
    WeakPassword,
    InvalidCredentials,
    TooManyAttempts,
    UserDisabled,
    TokenExpired,
    Other(String),
}

impl AuthRejection {
    /// Map an Identity Toolkit / Secure Token error message.
    ///
    /// Codes may carry detail after a colon, e.g.
    /// `WEAK_PASSWORD : Password should be at least 6 characters`.
    pub fn from_code(raw: &str) -> Self {
        let code = raw.split(':').next().unwrap_or_default().trim();
        match code {
            "EMAIL_EXISTS" => Self::EmailExists,
            "INVALID_EMAIL" | "MISSING_EMAIL" => Self::InvalidEmail,
            "WEAK_PASSWORD" => Self::WeakPassword,
            "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS"
            | "MISSING_PASSWORD" => Self::InvalidCredentials,
            "TOO_MANY_ATTEMPTS_TRY_LATER" => Self::TooManyAttempts,
            "USER_DISABLED" => Self::UserDisabled,
            "TOKEN_EXPIRED" | "INVALID_REFRESH_TOKEN" | "INVALID_ID_TOKEN" | "USER_NOT_FOUND" => {
                Self::TokenExpired
            }
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    /// Text shown when signing in fails.
    #[must_use]
    pub fn login_message(&self) -> String {
        match self {
            Self::InvalidCredentials => "Invalid email or password.".to_string(),
            Self::InvalidEmail => "The email address is not valid.".to_string(),
            Self::TooManyAttempts => {
                "Access temporarily blocked due to too many failed attempts. Try again later."
                    .to_string()
            }
            Self::Other(message) if !message.is_empty() => message.clone(),
            _ => "Login failed. Please check your credentials.".to_string(),
        }
    }

    /// Text shown when creating an account fails.
    #[must_use]
    pub fn signup_message(&self) -> String {
        match self {
            Self::EmailExists => "This email address is already in use.".to_string(),
            Self::InvalidEmail => "The email address is badly formatted.".to_string(),
            Self::WeakPassword => "The password is too weak.".to_string(),
            _ => "An unexpected error occurred. Please try again.".to_string(),
        }
    }
}

impl fmt::Display for AuthRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmailExists => f.write_str("EMAIL_EXISTS"),
            Self::InvalidEmail => f.write_str("INVALID_EMAIL"),
            Self::WeakPassword => f.write_str("WEAK_PASSWORD"),
            Self::InvalidCredentials => f.write_str("INVALID_LOGIN_CREDENTIALS"),
            Self::TooManyAttempts => f.write_str("TOO_MANY_ATTEMPTS_TRY_LATER"),
            Self::UserDisabled => f.write_str("USER_DISABLED"),
            Self::TokenExpired => f.write_str("TOKEN_EXPIRED"),
            Self::Other(message) => f.write_str(message),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Firebase auth is not configured for this profile.")]
    NotConfigured,
    #[error("Invalid auth configuration: {0}")]
    InvalidConfiguration(&'static str),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to parse JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Auth API error: {0}")]
    Rejected(AuthRejection),
    #[error("{0}")]
    InvalidCredentials(String),
    #[error("Secure storage error: {0}")]
    SecureStorage(String),
}

impl AuthError {
    /// User-facing text for a failed sign-in.
    #[must_use]
    pub fn login_message(&self) -> String {
        match self {
            Self::Rejected(rejection) => rejection.login_message(),
            Self::InvalidCredentials(message) => message.clone(),
            _ => "An unexpected error occurred during login.".to_string(),
        }
    }

    /// User-facing text for a failed sign-up.
    #[must_use]
    pub fn signup_message(&self) -> String {
        match self {
            Self::Rejected(rejection) => rejection.signup_message(),
            Self::InvalidCredentials(message) => message.clone(),
            _ => "An unexpected error occurred. Please try again.".to_string(),
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

pub trait SessionPersistence: Clone + Send + Sync + 'static {
    fn load_session(&self) -> AuthResult<Option<AuthSession>>;
    fn save_session(&self, session: &AuthSession) -> AuthResult<()>;
    fn clear_session(&self) -> AuthResult<()>;
}

/// Receives the current identity, or `None` once signed out.
pub type IdentityCallback = Arc<dyn Fn(Option<Identity>) + Send + Sync>;

/// Source of the authenticated identity.
///
/// Subscribers get the current identity right away and every change after.
pub trait IdentityProvider: Send + Sync + 'static {
    fn subscribe_to_auth_changes(&self, on_change: IdentityCallback) -> Subscription;

    fn sign_out(&self) -> impl Future<Output = AuthResult<()>> + Send;
}

/// Session persistence that lives only as long as the value.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    session: Arc<std::sync::Mutex<Option<AuthSession>>>,
}

impl SessionPersistence for MemorySessionStore {
    fn load_session(&self) -> AuthResult<Option<AuthSession>> {
        let guard = self
            .session
            .lock()
            .map_err(|error| AuthError::SecureStorage(error.to_string()))?;
        Ok(guard.clone())
    }

    fn save_session(&self, session: &AuthSession) -> AuthResult<()> {
        let mut guard = self
            .session
            .lock()
            .map_err(|error| AuthError::SecureStorage(error.to_string()))?;
        *guard = Some(session.clone());
        Ok(())
    }

    fn clear_session(&self) -> AuthResult<()> {
        let mut guard = self
            .session
            .lock()
            .map_err(|error| AuthError::SecureStorage(error.to_string()))?;
        *guard = None;
        Ok(())
    }
}

/// Email and password must both be present.
pub fn validate_credentials(email: &str, password: &str) -> AuthResult<()> {
    if email.trim().is_empty() {
        return Err(AuthError::InvalidCredentials(
            "Email is required.".to_string(),
        ));
    }
    if password.is_empty() {
        return Err(AuthError::InvalidCredentials(
            "Password is required.".to_string(),
        ));
    }
    Ok(())
}

/// Sign-up form checks, run before any network call.
pub fn validate_signup(email: &str, password: &str, confirm_password: &str) -> AuthResult<()> {
    validate_credentials(email, password)?;
    if password != confirm_password {
        return Err(AuthError::InvalidCredentials(
            "Passwords do not match!".to_string(),
        ));
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::InvalidCredentials(
            "Password must be at least 6 characters long.".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_codes_map_to_variants() {
        assert_eq!(
            AuthRejection::from_code("EMAIL_EXISTS"),
            AuthRejection::EmailExists
        );
        assert_eq!(
            AuthRejection::from_code("WEAK_PASSWORD : Password should be at least 6 characters"),
            AuthRejection::WeakPassword
        );
        assert_eq!(
            AuthRejection::from_code("INVALID_LOGIN_CREDENTIALS"),
            AuthRejection::InvalidCredentials
        );
        assert_eq!(
            AuthRejection::from_code("EMAIL_NOT_FOUND"),
            AuthRejection::InvalidCredentials
        );
        assert_eq!(
            AuthRejection::from_code("OPERATION_NOT_ALLOWED"),
            AuthRejection::Other("OPERATION_NOT_ALLOWED".to_string())
        );
    }

    #[test]
    fn login_and_signup_word_invalid_email_differently() {
        let rejection = AuthRejection::InvalidEmail;
        assert_eq!(rejection.login_message(), "The email address is not valid.");
        assert_eq!(
            rejection.signup_message(),
            "The email address is badly formatted."
        );
    }

    #[test]
    fn login_messages_cover_lockout() {
        assert_eq!(
            AuthRejection::TooManyAttempts.login_message(),
            "Access temporarily blocked due to too many failed attempts. Try again later."
        );
        assert_eq!(
            AuthRejection::InvalidCredentials.login_message(),
            "Invalid email or password."
        );
    }

    #[test]
    fn signup_messages_fall_back_to_generic_text() {
        assert_eq!(
            AuthRejection::EmailExists.signup_message(),
            "This email address is already in use."
        );
        assert_eq!(
            AuthRejection::TooManyAttempts.signup_message(),
            "An unexpected error occurred. Please try again."
        );
    }

    #[test]
    fn validate_signup_checks_confirmation_then_length() {
        let mismatch = validate_signup("a@b.com", "secret1", "secret2").unwrap_err();
        assert_eq!(mismatch.signup_message(), "Passwords do not match!");

        let short = validate_signup("a@b.com", "abc", "abc").unwrap_err();
        assert_eq!(
            short.signup_message(),
            "Password must be at least 6 characters long."
        );

        assert!(validate_signup("a@b.com", "secret1", "secret1").is_ok());
    }

    #[test]
    fn validate_credentials_requires_both_fields() {
        assert!(validate_credentials(" ", "pw").is_err());
        assert!(validate_credentials("a@b.com", "").is_err());
        assert!(validate_credentials("a@b.com", "pw").is_ok());
    }

    #[test]
    fn session_debug_redacts_tokens() {
        let session = AuthSession {
            id_token: "secret-id-token".to_string(),
            refresh_token: "secret-refresh-token".to_string(),
            expires_at: 1_700_000_000,
            user: Identity {
                uid: "user".to_string(),
                email: None,
            },
        };
        let rendered = format!("{session:?}");
        assert!(!rendered.contains("secret-id-token"));
        assert!(!rendered.contains("secret-refresh-token"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn memory_session_store_roundtrip() {
        let store = MemorySessionStore::default();
        assert!(store.load_session().unwrap().is_none());
        let session = AuthSession {
            id_token: "id".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: 1,
            user: Identity {
                uid: "user".to_string(),
                email: Some("a@b.com".to_string()),
            },
        };
        store.save_session(&session).unwrap();
        assert_eq!(store.load_session().unwrap(), Some(session));
        store.clear_session().unwrap();
        assert!(store.load_session().unwrap().is_none());
    }
}
