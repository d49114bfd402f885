//! CLI Firebase session helpers with secure keychain persistence.

#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::{Mutex, OnceLock};

#[cfg(not(test))]
use keyring::Entry;

use linkbio_core::auth::{
    AuthEndpoints, AuthResult, FirebaseAuthClient, SessionIdentityProvider, SessionPersistence,
};
pub use linkbio_core::auth::{AuthError, AuthSession};
use linkbio_core::config::FirebaseConfig;

use crate::config_profiles::normalize_text_option;

/// `host:port` of a local Firebase Auth emulator, as the Firebase tools set it.
pub const AUTH_EMULATOR_ENV: &str = "FIREBASE_AUTH_EMULATOR_HOST";

#[cfg(not(test))]
const KEYRING_SERVICE_NAME: &str = "linkbio-cli";

/// Session provider for one CLI profile.
pub type ProfileIdentityProvider = SessionIdentityProvider<SessionStore>;

#[derive(Clone)]
pub struct SessionStore {
    username: String,
}

impl SessionStore {
    pub fn new(profile_name: &str) -> Self {
        Self {
            username: format!("firebase_session:{profile_name}"),
        }
    }

    #[cfg(test)]
    fn test_store() -> &'static Mutex<HashMap<String, String>> {
        static STORE: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
        STORE.get_or_init(|| Mutex::new(HashMap::new()))
    }

    #[cfg(not(test))]
    fn entry(&self) -> AuthResult<Entry> {
        Entry::new(KEYRING_SERVICE_NAME, &self.username)
            .map_err(|error| AuthError::SecureStorage(error.to_string()))
    }
}

impl SessionPersistence for SessionStore {
    #[cfg(not(test))]
    fn load_session(&self) -> AuthResult<Option<AuthSession>> {
        let entry = self.entry()?;
        match entry.get_password() {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(AuthError::SecureStorage(error.to_string())),
        }
    }

    #[cfg(test)]
    fn load_session(&self) -> AuthResult<Option<AuthSession>> {
        let store = Self::test_store();
        let guard = store
            .lock()
            .map_err(|error| AuthError::SecureStorage(error.to_string()))?;
        if let Some(raw) = guard.get(&self.username) {
            Ok(Some(serde_json::from_str(raw)?))
        } else {
            Ok(None)
        }
    }

    #[cfg(not(test))]
    fn save_session(&self, session: &AuthSession) -> AuthResult<()> {
        let raw = serde_json::to_string(session)?;
        self.entry()?
            .set_password(&raw)
            .map_err(|error| AuthError::SecureStorage(error.to_string()))?;
        Ok(())
    }

    #[cfg(test)]
    fn save_session(&self, session: &AuthSession) -> AuthResult<()> {
        let raw = serde_json::to_string(session)?;
        let store = Self::test_store();
        let mut guard = store
            .lock()
            .map_err(|error| AuthError::SecureStorage(error.to_string()))?;
        guard.insert(self.username.clone(), raw);
        Ok(())
    }

    #[cfg(not(test))]
    fn clear_session(&self) -> AuthResult<()> {
        let entry = self.entry()?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(AuthError::SecureStorage(error.to_string())),
        }
    }

    #[cfg(test)]
    fn clear_session(&self) -> AuthResult<()> {
        let store = Self::test_store();
        let mut guard = store
            .lock()
            .map_err(|error| AuthError::SecureStorage(error.to_string()))?;
        guard.remove(&self.username);
        Ok(())
    }
}

pub fn identity_provider(
    profile_name: &str,
    config: &FirebaseConfig,
) -> AuthResult<ProfileIdentityProvider> {
    let endpoints = auth_endpoints(std::env::var(AUTH_EMULATOR_ENV).ok())?;
    let client = FirebaseAuthClient::with_endpoints(
        config.api_key.clone(),
        endpoints,
        SessionStore::new(profile_name),
    )?;
    Ok(SessionIdentityProvider::new(client))
}

/// Production endpoints, or the emulator when a host is given.
/// A bare `host:port` is treated as plain http.
fn auth_endpoints(emulator_host: Option<String>) -> AuthResult<AuthEndpoints> {
    let Some(host) = normalize_text_option(emulator_host) else {
        return Ok(AuthEndpoints::default());
    };
    tracing::info!("Using Firebase Auth emulator at {}", host);
    if host.contains("://") {
        AuthEndpoints::emulator(&host)
    } else {
        AuthEndpoints::emulator(&format!("http://{host}"))
    }
}

pub fn load_stored_session(profile_name: &str) -> AuthResult<Option<AuthSession>> {
    SessionStore::new(profile_name).load_session()
}

pub fn clear_stored_session(profile_name: &str) -> AuthResult<()> {
    SessionStore::new(profile_name).clear_session()
}
