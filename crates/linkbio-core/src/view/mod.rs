//! Synchronized link-list view model.
//!
//! Holds a cached, ordered copy of one user's links and forwards add/delete
//! intents to the collection store. The store is the source of truth: an
//! intent never edits the cache, only the next pushed collection does.
//!
//! Collaborators never touch the view model directly. Their callbacks post
//! [`ViewEvent`]s into an internal channel, and the owner feeds them back
//! through [`LinkListViewModel::apply`] on its own task. Every event produced
//! by a collection binding carries that binding's generation, and events from
//! a released binding are dropped.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::auth::{AuthError, Identity, IdentityProvider};
use crate::error::ValidationError;
use crate::models::{LinkEntry, LinkFields, LinkId, RawCollection, StatusMessage};
use crate::store::{CollectionPath, CollectionStore, StoreError};
use crate::subscription::Subscription;
use crate::util::unix_millis_now;

const ADD_SUCCESS: &str = "Link added successfully!";
const ADD_FAILURE: &str = "Failed to add link. Try again.";
const DELETE_SUCCESS: &str = "Link deleted.";
const DELETE_FAILURE: &str = "Failed to delete link.";
const SIGN_OUT_SUCCESS: &str = "You have been logged out successfully.";
const SIGN_OUT_FAILURE: &str = "Logout failed. Please try again.";

/// Handle for one submitted add or delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

/// Notifications flowing from collaborators back into the view model.
#[derive(Debug)]
pub enum ViewEvent {
    /// `watch` is the identity watch that produced the event.
    IdentityChanged {
        watch: u64,
        identity: Option<Identity>,
    },
    Collection {
        generation: u64,
        result: Result<RawCollection, StoreError>,
    },
    AddAcknowledged {
        generation: u64,
        request: RequestId,
        result: Result<LinkId, StoreError>,
    },
    DeleteAcknowledged {
        generation: u64,
        request: RequestId,
        result: Result<(), StoreError>,
    },
    SignOutCompleted(Result<(), AuthError>),
}

impl ViewEvent {
    /// The request this event acknowledges, if any.
    pub const fn request(&self) -> Option<RequestId> {
        match self {
            Self::AddAcknowledged { request, .. } | Self::DeleteAcknowledged { request, .. } => {
                Some(*request)
            }
            _ => None,
        }
    }
}

/// Instructions for the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewEffect {
    /// The add succeeded; its form inputs can be cleared.
    ClearForm(RequestId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unauthenticated,
    Authenticated,
}

struct Binding {
    generation: u64,
    path: CollectionPath,
    // Held for its Drop
    _subscription: Subscription,
}

pub struct LinkListViewModel<S: CollectionStore> {
    store: Arc<S>,
    identity: Option<Identity>,
    links: Vec<LinkEntry>,
    status: Option<StatusMessage>,
    loaded: bool,
    binding: Option<Binding>,
    generation: u64,
    next_request: u64,
    events_tx: mpsc::UnboundedSender<ViewEvent>,
    events_rx: mpsc::UnboundedReceiver<ViewEvent>,
    auth_subscription: Option<Subscription>,
    watch_generation: u64,
}

impl<S: CollectionStore> LinkListViewModel<S> {
    pub fn new(store: Arc<S>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            store,
            identity: None,
            links: Vec::new(),
            status: None,
            loaded: false,
            binding: None,
            generation: 0,
            next_request: 0,
            events_tx,
            events_rx,
            auth_subscription: None,
            watch_generation: 0,
        }
    }

    /// Current links, newest first.
    pub fn links(&self) -> &[LinkEntry] {
        &self.links
    }

    pub const fn status(&self) -> Option<&StatusMessage> {
        self.status.as_ref()
    }

    pub const fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub const fn is_signed_in(&self) -> bool {
        self.identity.is_some()
    }

    pub const fn phase(&self) -> SessionPhase {
        if self.identity.is_some() {
            SessionPhase::Authenticated
        } else {
            SessionPhase::Unauthenticated
        }
    }

    /// Whether a collection has arrived for the current binding.
    pub const fn has_loaded(&self) -> bool {
        self.loaded
    }

    /// Follow an identity provider. Replaces any previous provider subscription.
    ///
    /// Identity events still queued from a replaced provider are discarded.
    pub fn watch_identity<P: IdentityProvider>(&mut self, provider: &P) {
        self.release_watch();
        let watch = self.watch_generation;
        let events = self.events_tx.clone();
        self.auth_subscription = Some(provider.subscribe_to_auth_changes(Arc::new(
            move |identity| {
                let _ = events.send(ViewEvent::IdentityChanged { watch, identity });
            },
        )));
    }

    /// Point the view model at an identity, or at nobody.
    ///
    /// A new uid releases the old subscription before opening the next one.
    /// The same uid keeps the current subscription.
    pub fn bind_identity(&mut self, identity: Option<Identity>) {
        let Some(identity) = identity else {
            self.release_binding();
            self.identity = None;
            self.links.clear();
            self.loaded = false;
            return;
        };

        let same_user = self
            .identity
            .as_ref()
            .is_some_and(|current| current.uid == identity.uid);
        if same_user && self.binding.is_some() {
            self.identity = Some(identity);
            return;
        }

        self.release_binding();
        self.links.clear();
        self.loaded = false;

        match CollectionPath::for_user(&identity.uid) {
            Ok(path) => self.open_binding(path),
            Err(error) => {
                tracing::warn!("Cannot subscribe for user {}: {}", identity.uid, error);
                self.status = Some(StatusMessage::error(format!(
                    "Failed to load links: {error}"
                )));
            }
        }
        self.identity = Some(identity);
    }

    /// Replace the cached links with a full collection.
    ///
    /// Applying the same collection again yields the same links.
    pub fn on_snapshot(&mut self, raw: &RawCollection) {
        if self.identity.is_none() {
            tracing::debug!("Ignoring collection with no bound identity");
            return;
        }
        self.links = raw.to_entries();
        self.loaded = true;
    }

    /// Record a subscription failure. Cached links stay as they were.
    pub fn on_subscription_error(&mut self, error: &StoreError) {
        tracing::warn!("Link subscription failed: {}", error);
        self.status = Some(StatusMessage::error(format!(
            "Failed to load links: {error}"
        )));
    }

    /// Validate and submit a new link. Returns before the store answers.
    pub fn request_add(&mut self, title: &str, url: &str) -> Result<RequestId, ValidationError> {
        self.status = None;
        let (path, generation) = self.require_binding("add links")?;
        let fields = LinkFields::from_input(title, url, unix_millis_now())
            .map_err(|error| self.reject(error))?;

        let request = self.next_request_id();
        let store = Arc::clone(&self.store);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = store.append(&path, fields).await;
            let _ = events.send(ViewEvent::AddAcknowledged {
                generation,
                request,
                result,
            });
        });
        Ok(request)
    }

    /// Submit a delete. The link stays visible until the store confirms.
    pub fn request_delete(&mut self, id: &str) -> Result<RequestId, ValidationError> {
        self.status = None;
        let (path, generation) = self.require_binding("delete links")?;
        let id = id.parse::<LinkId>().map_err(|error| self.reject(error))?;

        let request = self.next_request_id();
        let store = Arc::clone(&self.store);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = store.delete_by_key(&path, &id).await;
            let _ = events.send(ViewEvent::DeleteAcknowledged {
                generation,
                request,
                result,
            });
        });
        Ok(request)
    }

    /// Ask the provider to sign out. The identity change itself arrives
    /// through [`Self::watch_identity`].
    pub fn request_sign_out<P: IdentityProvider>(&mut self, provider: &Arc<P>) {
        self.status = None;
        let provider = Arc::clone(provider);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = provider.sign_out().await;
            let _ = events.send(ViewEvent::SignOutCompleted(result));
        });
    }

    /// Wait for the next collaborator notification.
    pub async fn next_event(&mut self) -> Option<ViewEvent> {
        self.events_rx.recv().await
    }

    /// Apply every notification already queued.
    pub fn drain(&mut self) -> Vec<ViewEffect> {
        let mut effects = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            effects.extend(self.apply(event));
        }
        effects
    }

    /// Apply one notification.
    pub fn apply(&mut self, event: ViewEvent) -> Option<ViewEffect> {
        match event {
            ViewEvent::IdentityChanged { watch, identity } => {
                if watch != self.watch_generation {
                    tracing::debug!("Discarding identity change from stale watch {}", watch);
                    return None;
                }
                self.bind_identity(identity);
                None
            }
            ViewEvent::Collection { generation, result } => {
                if !self.is_current(generation) {
                    tracing::debug!("Discarding collection from stale binding {}", generation);
                    return None;
                }
                match result {
                    Ok(raw) => self.on_snapshot(&raw),
                    Err(error) => self.on_subscription_error(&error),
                }
                None
            }
            ViewEvent::AddAcknowledged {
                generation,
                request,
                result,
            } => {
                if !self.is_current(generation) {
                    tracing::debug!("Discarding add acknowledgment from stale binding");
                    return None;
                }
                match result {
                    Ok(id) => {
                        tracing::debug!("Link {} appended", id);
                        self.status = Some(StatusMessage::success(ADD_SUCCESS));
                        Some(ViewEffect::ClearForm(request))
                    }
                    Err(error) => {
                        tracing::warn!("Failed to add link: {}", error);
                        self.status = Some(StatusMessage::error(ADD_FAILURE));
                        None
                    }
                }
            }
            ViewEvent::DeleteAcknowledged {
                generation, result, ..
            } => {
                if !self.is_current(generation) {
                    tracing::debug!("Discarding delete acknowledgment from stale binding");
                    return None;
                }
                self.status = Some(match result {
                    Ok(()) => StatusMessage::info(DELETE_SUCCESS),
                    Err(error) => {
                        tracing::warn!("Failed to delete link: {}", error);
                        StatusMessage::error(DELETE_FAILURE)
                    }
                });
                None
            }
            ViewEvent::SignOutCompleted(result) => {
                self.status = Some(match result {
                    Ok(()) => StatusMessage::info(SIGN_OUT_SUCCESS),
                    Err(error) => {
                        tracing::warn!("Logout failed: {}", error);
                        StatusMessage::error(SIGN_OUT_FAILURE)
                    }
                });
                None
            }
        }
    }

    /// Release the identity watch and the collection subscription.
    pub fn shutdown(&mut self) {
        self.release_watch();
        self.release_binding();
    }

    fn release_watch(&mut self) {
        self.auth_subscription = None;
        self.watch_generation += 1;
    }

    fn open_binding(&mut self, path: CollectionPath) {
        self.generation += 1;
        let generation = self.generation;
        let events = self.events_tx.clone();
        tracing::debug!("Subscribing to {} (binding {})", path, generation);
        let subscription = self.store.subscribe(
            &path,
            Arc::new(move |result| {
                let _ = events.send(ViewEvent::Collection { generation, result });
            }),
        );
        self.binding = Some(Binding {
            generation,
            path,
            _subscription: subscription,
        });
    }

    fn release_binding(&mut self) {
        if let Some(binding) = self.binding.take() {
            tracing::debug!(
                "Releasing subscription on {} (binding {})",
                binding.path,
                binding.generation
            );
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.binding
            .as_ref()
            .is_some_and(|binding| binding.generation == generation)
    }

    fn require_binding(
        &mut self,
        action: &'static str,
    ) -> Result<(CollectionPath, u64), ValidationError> {
        let Some(identity) = self.identity.as_ref() else {
            return Err(self.reject(ValidationError::NotSignedIn(action)));
        };
        let path = match CollectionPath::for_user(&identity.uid) {
            Ok(path) => path,
            Err(error) => return Err(self.reject(error)),
        };
        let generation = self.binding.as_ref().map_or(0, |binding| binding.generation);
        Ok((path, generation))
    }

    fn reject(&mut self, error: ValidationError) -> ValidationError {
        self.status = Some(StatusMessage::error(error.to_string()));
        error
    }

    fn next_request_id(&mut self) -> RequestId {
        self.next_request += 1;
        RequestId(self.next_request)
    }
}

#[cfg(test)]
mod tests;
