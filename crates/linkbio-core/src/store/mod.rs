//! Remote collection store abstraction.
//!
//! Each user's links live at `links/{uid}`. Stores push the whole collection
//! to subscribers on every change; there is no diff channel.

mod memory;
mod realtime;
mod stream;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use crate::error::ValidationError;
use crate::models::{LinkFields, LinkId, RawCollection};
use crate::subscription::Subscription;

pub use memory::{MemoryCollectionStore, StoreCalls};
pub use realtime::{AccessToken, RealtimeDatabaseStore};
pub use stream::{apply_stream_event, SseEvent, SseParser, StreamUpdate};

const COLLECTION_ROOT: &str = "links";
const FORBIDDEN_KEY_CHARS: [char; 6] = ['/', '.', '#', '$', '[', ']'];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid store configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Store HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Store API error: {0}")]
    Api(String),
    #[error("Invalid store payload: {0}")]
    InvalidPayload(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Subscription stream closed")]
    Closed,
    #[error("{0}")]
    Injected(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Receives every full-collection notification for one subscription.
pub type SnapshotCallback = Arc<dyn Fn(StoreResult<RawCollection>) + Send + Sync>;

/// Location of one user's link collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath {
    uid: String,
}

impl CollectionPath {
    /// Path for a user's links. The uid must be a valid database key.
    pub fn for_user(uid: &str) -> Result<Self, ValidationError> {
        let uid = uid.trim();
        if uid.is_empty() {
            return Err(ValidationError::InvalidPath(
                "user id must not be empty".to_string(),
            ));
        }
        if let Some(forbidden) = uid.chars().find(|c| FORBIDDEN_KEY_CHARS.contains(c)) {
            return Err(ValidationError::InvalidPath(format!(
                "user id must not contain '{forbidden}'"
            )));
        }
        Ok(Self {
            uid: uid.to_string(),
        })
    }

    #[must_use]
    pub fn uid(&self) -> &str {
        &self.uid
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{COLLECTION_ROOT}/{}", self.uid)
    }
}

/// A keyed document store scoped per user.
///
/// `subscribe` delivers the current collection and then a full collection
/// after every change. Callbacks never run after the returned handle is
/// released.
pub trait CollectionStore: Send + Sync + 'static {
    fn subscribe(&self, path: &CollectionPath, on_change: SnapshotCallback) -> Subscription;

    /// Append a child. The store assigns and returns its key.
    fn append(
        &self,
        path: &CollectionPath,
        fields: LinkFields,
    ) -> impl Future<Output = StoreResult<LinkId>> + Send;

    fn delete_by_key(
        &self,
        path: &CollectionPath,
        id: &LinkId,
    ) -> impl Future<Output = StoreResult<()>> + Send;
}
