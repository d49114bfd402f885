//! Firebase Realtime Database REST client.
//!
//! Appends and deletes use plain REST calls. Subscriptions use the REST
//! streaming protocol (`Accept: text/event-stream`) on a spawned task.

use std::future::Future;
use std::sync::{Arc, RwLock};

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use super::stream::{apply_stream_event, SseParser, StreamUpdate};
use super::{
    CollectionPath, CollectionStore, SnapshotCallback, StoreError, StoreResult, COLLECTION_ROOT,
};
use crate::models::{LinkFields, LinkId};
use crate::subscription::{ReleaseFlag, Subscription};
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// Shared slot holding the ID token sent as `?auth=`.
///
/// The caller swaps it when the session refreshes; requests read it at send
/// time.
#[derive(Clone, Default)]
pub struct AccessToken(Arc<RwLock<Option<String>>>);

impl AccessToken {
    pub fn set(&self, token: Option<String>) {
        let mut slot = self
            .0
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *slot = normalize_text_option(token);
    }

    pub fn get(&self) -> Option<String> {
        self.0
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_tuple("AccessToken")
            .field(&self.get().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Clone)]
pub struct RealtimeDatabaseStore {
    database_url: String,
    client: Client,
    token: AccessToken,
}

impl RealtimeDatabaseStore {
    pub fn new(database_url: impl AsRef<str>, token: AccessToken) -> StoreResult<Self> {
        let database_url = normalize_database_url(database_url.as_ref())?;
        Ok(Self {
            database_url,
            client: Client::builder().build()?,
            token,
        })
    }

    #[must_use]
    pub fn access_token(&self) -> &AccessToken {
        &self.token
    }

    /// REST URL of the collection, or of one child when `child` is given.
    /// Every segment is percent-encoded.
    fn location_url(&self, path: &CollectionPath, child: Option<&LinkId>) -> String {
        let mut url = format!(
            "{}/{COLLECTION_ROOT}/{}",
            self.database_url,
            urlencoding::encode(path.uid())
        );
        if let Some(id) = child {
            url.push('/');
            url.push_str(&urlencoding::encode(id.as_str()));
        }
        url.push_str(".json");
        url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token.get() {
            Some(token) => request.query(&[("auth", token)]),
            None => request,
        }
    }
}

impl CollectionStore for RealtimeDatabaseStore {
    fn subscribe(&self, path: &CollectionPath, on_change: SnapshotCallback) -> Subscription {
        let request = self
            .authorized(self.client.get(self.location_url(path, None)))
            .header(reqwest::header::ACCEPT, "text/event-stream");
        let location = path.to_string();

        let released = ReleaseFlag::default();
        let task = tokio::spawn(run_stream(
            request,
            location.clone(),
            on_change,
            released.clone(),
        ));
        let abort = task.abort_handle();

        tracing::debug!("Opened realtime stream on {}", location);
        Subscription::with_flag(released, move || abort.abort())
    }

    fn append(
        &self,
        path: &CollectionPath,
        fields: LinkFields,
    ) -> impl Future<Output = StoreResult<LinkId>> + Send {
        let request = self
            .authorized(self.client.post(self.location_url(path, None)))
            .json(&fields);
        async move {
            let response = send_checked(request).await?;
            let payload = response.json::<PushResponse>().await?;
            LinkId::from_key(&payload.name).ok_or_else(|| {
                StoreError::InvalidPayload("push response did not include a key".to_string())
            })
        }
    }

    fn delete_by_key(
        &self,
        path: &CollectionPath,
        id: &LinkId,
    ) -> impl Future<Output = StoreResult<()>> + Send {
        let request = self.authorized(self.client.delete(self.location_url(path, Some(id))));
        async move {
            send_checked(request).await?;
            Ok(())
        }
    }
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct DatabaseErrorBody {
    error: Option<String>,
}

async fn send_checked(request: RequestBuilder) -> StoreResult<reqwest::Response> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = parse_api_error(status, &body);
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(StoreError::PermissionDenied(message))
    } else {
        Err(StoreError::Api(message))
    }
}

/// Drive one streaming subscription until it fails, ends, or is aborted.
async fn run_stream(
    request: RequestBuilder,
    location: String,
    on_change: SnapshotCallback,
    released: ReleaseFlag,
) {
    let emit = |result: StoreResult<_>| {
        if !released.is_released() {
            on_change(result);
        }
    };

    let mut response = match send_checked(request).await {
        Ok(response) => response,
        Err(error) => {
            tracing::warn!("Realtime stream on {} failed to open: {}", location, error);
            emit(Err(error));
            return;
        }
    };

    let mut parser = SseParser::default();
    let mut mirror = Value::Null;
    loop {
        let chunk = match response.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                tracing::warn!("Realtime stream on {} ended", location);
                emit(Err(StoreError::Closed));
                return;
            }
            Err(error) => {
                tracing::warn!("Realtime stream on {} failed: {}", location, error);
                emit(Err(StoreError::Http(error)));
                return;
            }
        };

        for event in parser.feed(&chunk) {
            match apply_stream_event(&mut mirror, &event) {
                Ok(StreamUpdate::Changed(collection)) => emit(Ok(collection)),
                Ok(StreamUpdate::Unchanged) => {}
                Err(error) => {
                    tracing::warn!("Realtime stream on {} stopped: {}", location, error);
                    emit(Err(error));
                    return;
                }
            }
        }
    }
}

fn normalize_database_url(raw: &str) -> StoreResult<String> {
    let url = normalize_text_option(Some(raw.to_string())).ok_or_else(|| {
        StoreError::InvalidConfiguration("database URL must not be empty".to_string())
    })?;
    if !is_http_url(&url) {
        return Err(StoreError::InvalidConfiguration(
            "database URL must include http:// or https://".to_string(),
        ));
    }
    Ok(url.trim_end_matches('/').to_string())
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<DatabaseErrorBody>(body) {
        if let Some(message) = payload.error {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}
