//! Firebase project configuration.
//!
//! The API key and database URL are public values shipped with every web
//! client; no secrets belong here.

use serde::{Deserialize, Serialize};

use crate::auth::{AuthError, AuthResult};
use crate::util::{is_http_url, normalize_text_option};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FirebaseConfig {
    pub api_key: String,
    pub database_url: String,
    #[serde(default)]
    pub auth_domain: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl FirebaseConfig {
    pub fn new(api_key: impl Into<String>, database_url: impl Into<String>) -> AuthResult<Self> {
        Self {
            api_key: api_key.into(),
            database_url: database_url.into(),
            auth_domain: None,
            project_id: None,
        }
        .normalized()
    }

    /// Trim every field, strip trailing `/`, and check required values.
    pub fn normalized(self) -> AuthResult<Self> {
        let api_key = normalize_text_option(Some(self.api_key)).ok_or(
            AuthError::InvalidConfiguration("Firebase API key must not be empty"),
        )?;
        let database_url = normalize_text_option(Some(self.database_url)).ok_or(
            AuthError::InvalidConfiguration("Firebase database URL must not be empty"),
        )?;
        if !is_http_url(&database_url) {
            return Err(AuthError::InvalidConfiguration(
                "Firebase database URL must include http:// or https://",
            ));
        }

        Ok(Self {
            api_key,
            database_url: database_url.trim_end_matches('/').to_string(),
            auth_domain: normalize_text_option(self.auth_domain),
            project_id: normalize_text_option(self.project_id),
        })
    }
}

/// Both values → config, neither → `None`, only one → `NotConfigured`.
pub fn resolve_optional_firebase_config(
    api_key: Option<String>,
    database_url: Option<String>,
) -> AuthResult<Option<FirebaseConfig>> {
    let api_key = normalize_text_option(api_key);
    let database_url = normalize_text_option(database_url);

    match (api_key, database_url) {
        (None, None) => Ok(None),
        (Some(api_key), Some(database_url)) => {
            Ok(Some(FirebaseConfig::new(api_key, database_url)?))
        }
        _ => Err(AuthError::NotConfigured),
    }
}

/// Parse the `firebaseConfig` object from the Firebase console web snippet.
pub fn parse_web_config(payload: &str) -> Result<FirebaseConfig, String> {
    let snippet: WebConfigSnippet = serde_json::from_str(payload)
        .map_err(|error| format!("invalid Firebase web config JSON: {error}"))?;

    let api_key = snippet
        .api_key
        .ok_or_else(|| "Firebase web config is missing 'apiKey'".to_string())?;
    let database_url = snippet
        .database_url
        .ok_or_else(|| "Firebase web config is missing 'databaseURL'".to_string())?;

    FirebaseConfig {
        api_key,
        database_url,
        auth_domain: snippet.auth_domain,
        project_id: snippet.project_id,
    }
    .normalized()
    .map_err(|error| error.to_string())
}

// Unknown keys (storageBucket, appId, measurementId, ...) are ignored
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebConfigSnippet {
    api_key: Option<String>,
    auth_domain: Option<String>,
    #[serde(rename = "databaseURL")]
    database_url: Option<String>,
    project_id: Option<String>,
}
