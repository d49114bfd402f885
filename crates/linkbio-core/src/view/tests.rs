use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;
use crate::auth::{AuthResult, IdentityCallback};
use crate::models::StatusKind;
use crate::store::MemoryCollectionStore;
use crate::subscription::ReleaseFlag;

fn user(uid: &str) -> Identity {
    Identity {
        uid: uid.to_string(),
        email: Some(format!("{uid}@example.com")),
    }
}

fn path(uid: &str) -> CollectionPath {
    CollectionPath::for_user(uid).unwrap()
}

fn view_model() -> (
    Arc<MemoryCollectionStore>,
    LinkListViewModel<MemoryCollectionStore>,
) {
    let store = Arc::new(MemoryCollectionStore::new());
    let view = LinkListViewModel::new(Arc::clone(&store));
    (store, view)
}

fn ids(view: &LinkListViewModel<MemoryCollectionStore>) -> Vec<&str> {
    view.links().iter().map(|link| link.id.as_str()).collect()
}

fn status_text(view: &LinkListViewModel<MemoryCollectionStore>) -> Option<&str> {
    view.status().map(|status| status.text.as_str())
}

/// Apply events until the acknowledgment for `request` has been applied.
async fn settle(
    view: &mut LinkListViewModel<MemoryCollectionStore>,
    request: RequestId,
) -> Vec<ViewEffect> {
    let mut effects = Vec::new();
    while let Some(event) = view.next_event().await {
        let done = event.request() == Some(request);
        effects.extend(view.apply(event));
        if done {
            break;
        }
    }
    effects
}

fn two_links() -> serde_json::Value {
    json!({
        "k1": {"title": "A", "url": "https://a.com", "timestamp": 100},
        "k2": {"title": "B", "url": "https://b.com", "timestamp": 200},
    })
}

/// Identity provider whose state tests flip by hand.
#[derive(Clone, Default)]
struct ManualIdentity {
    inner: Arc<Mutex<ManualState>>,
}

#[derive(Default)]
struct ManualState {
    current: Option<Identity>,
    listeners: Vec<(ReleaseFlag, IdentityCallback)>,
    fail_sign_out: bool,
}

impl ManualIdentity {
    fn set(&self, identity: Option<Identity>) {
        let listeners = {
            let mut state = self.inner.lock().unwrap();
            state.current.clone_from(&identity);
            state.listeners.clone()
        };
        for (released, callback) in listeners {
            if !released.is_released() {
                callback(identity.clone());
            }
        }
    }

    fn fail_sign_out(&self) {
        self.inner.lock().unwrap().fail_sign_out = true;
    }
}

impl IdentityProvider for ManualIdentity {
    fn subscribe_to_auth_changes(&self, on_change: IdentityCallback) -> Subscription {
        let (subscription, released) = Subscription::new(|| {});
        let current = {
            let mut state = self.inner.lock().unwrap();
            state.listeners.push((released, Arc::clone(&on_change)));
            state.current.clone()
        };
        on_change(current);
        subscription
    }

    fn sign_out(&self) -> impl std::future::Future<Output = AuthResult<()>> + Send {
        let provider = self.clone();
        async move {
            if provider.inner.lock().unwrap().fail_sign_out {
                return Err(AuthError::SecureStorage("keychain locked".to_string()));
            }
            provider.set(None);
            Ok(())
        }
    }
}

#[tokio::test]
async fn snapshot_orders_newest_first() {
    let (store, mut view) = view_model();
    store.replace(&path("u1"), two_links());
    view.bind_identity(Some(user("u1")));
    view.drain();

    assert_eq!(ids(&view), vec!["k2", "k1"]);
    assert_eq!(view.links()[0].title, "B");
    assert!(view.has_loaded());
}

#[tokio::test]
async fn applying_the_same_snapshot_twice_is_idempotent() {
    let (_store, mut view) = view_model();
    view.bind_identity(Some(user("u1")));
    let raw = RawCollection::from_value(two_links());

    view.on_snapshot(&raw);
    let first = view.links().to_vec();
    view.on_snapshot(&raw);

    assert_eq!(view.links(), first.as_slice());
}

#[tokio::test]
async fn equal_timestamps_order_deterministically() {
    let (_store, mut view) = view_model();
    view.bind_identity(Some(user("u1")));
    let raw = RawCollection::from_value(json!({
        "a": {"title": "A", "url": "https://a.com", "timestamp": 5},
        "c": {"title": "C", "url": "https://c.com", "timestamp": 5},
        "b": {"title": "B", "url": "https://b.com", "timestamp": 5},
    }));

    view.on_snapshot(&raw);
    assert_eq!(ids(&view), vec!["c", "b", "a"]);
    view.on_snapshot(&raw);
    assert_eq!(ids(&view), vec!["c", "b", "a"]);
}

#[tokio::test]
async fn empty_fields_are_rejected_without_contacting_the_store() {
    let (store, mut view) = view_model();
    view.bind_identity(Some(user("u1")));

    assert_eq!(
        view.request_add("", "https://a.com"),
        Err(ValidationError::MissingFields)
    );
    assert_eq!(
        view.request_add("Title", "   "),
        Err(ValidationError::MissingFields)
    );
    assert_eq!(status_text(&view), Some("Both Title and URL are required."));
    assert_eq!(view.status().unwrap().kind, StatusKind::Error);
    assert_eq!(store.calls().append, 0);
}

#[tokio::test]
async fn add_normalizes_the_url_before_storing() {
    let (store, mut view) = view_model();
    view.bind_identity(Some(user("u1")));
    view.drain();

    let request = view.request_add("My Site", "example.com").unwrap();
    let effects = settle(&mut view, request).await;

    assert_eq!(effects, vec![ViewEffect::ClearForm(request)]);
    assert_eq!(status_text(&view), Some("Link added successfully!"));
    assert_eq!(view.status().unwrap().kind, StatusKind::Success);
    assert_eq!(view.links().len(), 1);
    assert_eq!(view.links()[0].title, "My Site");
    assert_eq!(view.links()[0].url, "https://example.com");

    let stored = store.snapshot(&path("u1")).to_entries();
    assert_eq!(stored[0].url, "https://example.com");
}

#[tokio::test]
async fn url_with_scheme_is_kept() {
    let (store, mut view) = view_model();
    view.bind_identity(Some(user("u1")));

    let request = view.request_add("Local", "http://localhost:8080").unwrap();
    settle(&mut view, request).await;

    let stored = store.snapshot(&path("u1")).to_entries();
    assert_eq!(stored[0].url, "http://localhost:8080");
}

#[tokio::test]
async fn intents_without_identity_are_rejected() {
    let (store, mut view) = view_model();

    assert_eq!(
        view.request_add("A", "https://a.com"),
        Err(ValidationError::NotSignedIn("add links"))
    );
    assert_eq!(status_text(&view), Some("You must be logged in to add links."));

    assert_eq!(
        view.request_delete("k1"),
        Err(ValidationError::NotSignedIn("delete links"))
    );
    assert_eq!(store.calls(), crate::store::StoreCalls::default());
}

#[tokio::test]
async fn delete_requires_an_id() {
    let (store, mut view) = view_model();
    view.bind_identity(Some(user("u1")));

    assert_eq!(view.request_delete("  "), Err(ValidationError::MissingLinkId));
    assert_eq!(store.calls().delete, 0);
}

#[tokio::test]
async fn notification_after_unbind_is_ignored() {
    let (store, mut view) = view_model();
    store.replace(&path("u1"), two_links());
    // The initial collection is queued but not yet applied
    view.bind_identity(Some(user("u1")));
    view.bind_identity(None);
    view.drain();

    assert!(view.links().is_empty());
    assert!(!view.has_loaded());
    assert_eq!(view.phase(), SessionPhase::Unauthenticated);
}

#[tokio::test]
async fn snapshot_without_identity_is_ignored() {
    let (_store, mut view) = view_model();
    view.on_snapshot(&RawCollection::from_value(two_links()));
    assert!(view.links().is_empty());
}

#[tokio::test]
async fn switching_identity_drops_the_previous_users_links() {
    let (store, mut view) = view_model();
    store.replace(&path("alice"), two_links());
    store.replace(
        &path("bob"),
        json!({"b1": {"title": "Bob", "url": "https://bob.dev", "timestamp": 1}}),
    );

    view.bind_identity(Some(user("alice")));
    view.bind_identity(Some(user("bob")));
    view.drain();

    assert_eq!(ids(&view), vec!["b1"]);
    assert_eq!(store.active_subscriptions(), 1);
    assert_eq!(store.calls().subscribe, 2);
}

#[tokio::test]
async fn rebinding_the_same_user_keeps_one_subscription() {
    let (store, mut view) = view_model();
    view.bind_identity(Some(user("u1")));
    view.bind_identity(Some(user("u1")));

    assert_eq!(store.calls().subscribe, 1);
    assert_eq!(store.active_subscriptions(), 1);
}

#[tokio::test]
async fn unbinding_releases_the_subscription() {
    let (store, mut view) = view_model();
    view.bind_identity(Some(user("u1")));
    assert_eq!(store.active_subscriptions(), 1);

    view.bind_identity(None);
    assert_eq!(store.active_subscriptions(), 0);
}

#[tokio::test]
async fn delete_converges_on_the_next_snapshot() {
    let (store, mut view) = view_model();
    store.replace(&path("u1"), two_links());
    view.bind_identity(Some(user("u1")));
    view.drain();

    let request = view.request_delete("k2").unwrap();
    let effects = settle(&mut view, request).await;

    assert!(effects.is_empty());
    assert_eq!(ids(&view), vec!["k1"]);
    assert_eq!(status_text(&view), Some("Link deleted."));
    assert_eq!(view.status().unwrap().kind, StatusKind::Info);
}

#[tokio::test]
async fn delete_targets_the_exact_padded_key() {
    let (store, mut view) = view_model();
    store.replace(
        &path("u1"),
        json!({
            "k1": {"title": "A", "url": "https://a.com", "timestamp": 1},
            " k1": {"title": "B", "url": "https://b.com", "timestamp": 2},
        }),
    );
    view.bind_identity(Some(user("u1")));
    view.drain();
    assert_eq!(ids(&view), vec![" k1", "k1"]);

    let padded = view.links()[0].id.to_string();
    let request = view.request_delete(&padded).unwrap();
    settle(&mut view, request).await;

    assert_eq!(ids(&view), vec!["k1"]);
    let remaining = store.snapshot(&path("u1"));
    assert!(remaining.contains(&LinkId::from_key("k1").unwrap()));
    assert!(!remaining.contains(&LinkId::from_key(" k1").unwrap()));
}

#[tokio::test]
async fn add_acknowledgment_before_snapshot_does_not_touch_links() {
    let (store, mut view) = view_model();
    view.bind_identity(Some(user("u1")));
    view.drain();
    store.pause_notifications();

    let request = view.request_add("A", "https://a.com").unwrap();
    let effects = settle(&mut view, request).await;

    assert_eq!(effects, vec![ViewEffect::ClearForm(request)]);
    assert_eq!(status_text(&view), Some("Link added successfully!"));
    assert!(view.links().is_empty());

    store.resume_notifications();
    view.drain();
    assert_eq!(view.links().len(), 1);
    assert_eq!(view.links()[0].title, "A");
}

#[tokio::test]
async fn delete_acknowledgment_before_snapshot_keeps_the_link_visible() {
    let (store, mut view) = view_model();
    store.replace(&path("u1"), two_links());
    view.bind_identity(Some(user("u1")));
    view.drain();
    store.pause_notifications();

    let request = view.request_delete("k2").unwrap();
    settle(&mut view, request).await;
    assert_eq!(ids(&view), vec!["k2", "k1"]);

    store.resume_notifications();
    view.drain();
    assert_eq!(ids(&view), vec!["k1"]);
}

#[tokio::test]
async fn failed_add_reports_and_keeps_state() {
    let (store, mut view) = view_model();
    store.replace(&path("u1"), two_links());
    view.bind_identity(Some(user("u1")));
    view.drain();
    store.fail_next_append("offline");

    let request = view.request_add("C", "https://c.com").unwrap();
    let effects = settle(&mut view, request).await;

    assert!(effects.is_empty());
    assert_eq!(status_text(&view), Some("Failed to add link. Try again."));
    assert_eq!(ids(&view), vec!["k2", "k1"]);
}

#[tokio::test]
async fn failed_delete_reports_and_keeps_state() {
    let (store, mut view) = view_model();
    store.replace(&path("u1"), two_links());
    view.bind_identity(Some(user("u1")));
    view.drain();
    store.fail_next_delete("offline");

    let request = view.request_delete("k1").unwrap();
    settle(&mut view, request).await;

    assert_eq!(status_text(&view), Some("Failed to delete link."));
    assert_eq!(ids(&view), vec!["k2", "k1"]);
}

#[tokio::test]
async fn subscription_error_keeps_cached_links() {
    let (store, mut view) = view_model();
    store.replace(&path("u1"), two_links());
    view.bind_identity(Some(user("u1")));
    view.drain();

    store.emit_error(&path("u1"), "rules rejected read");
    view.drain();

    assert_eq!(
        status_text(&view),
        Some("Failed to load links: Permission denied: rules rejected read")
    );
    assert_eq!(ids(&view), vec!["k2", "k1"]);
}

#[tokio::test]
async fn new_intent_clears_the_previous_status() {
    let (_store, mut view) = view_model();
    view.bind_identity(Some(user("u1")));
    let _ = view.request_add("", "");
    assert!(view.status().unwrap().is_error());

    view.request_add("A", "https://a.com").unwrap();
    assert!(view.status().is_none());
}

#[tokio::test]
async fn acknowledgment_from_a_previous_identity_is_discarded() {
    let (store, mut view) = view_model();
    view.bind_identity(Some(user("u1")));
    view.drain();

    let request = view.request_add("A", "https://a.com").unwrap();
    view.bind_identity(None);
    let effects = settle(&mut view, request).await;

    assert!(effects.is_empty());
    assert!(view.status().is_none());
    assert_eq!(store.snapshot(&path("u1")).len(), 1);
}

#[tokio::test]
async fn watch_identity_follows_the_provider() {
    let (store, mut view) = view_model();
    store.replace(&path("u1"), two_links());
    let provider = ManualIdentity::default();

    view.watch_identity(&provider);
    view.drain();
    assert_eq!(view.phase(), SessionPhase::Unauthenticated);

    provider.set(Some(user("u1")));
    view.drain();
    assert_eq!(view.phase(), SessionPhase::Authenticated);
    assert_eq!(view.identity().unwrap().uid, "u1");
    assert_eq!(ids(&view), vec!["k2", "k1"]);

    provider.set(None);
    view.drain();
    assert!(!view.is_signed_in());
    assert!(view.links().is_empty());
    assert_eq!(store.active_subscriptions(), 0);
}

#[tokio::test]
async fn replaced_provider_events_are_discarded() {
    let (store, mut view) = view_model();
    store.replace(&path("u1"), two_links());
    let first = ManualIdentity::default();
    let second = ManualIdentity::default();

    view.watch_identity(&first);
    // Queued but not yet applied when the provider is replaced
    first.set(Some(user("u1")));
    view.watch_identity(&second);
    view.drain();

    assert!(!view.is_signed_in());
    assert!(view.links().is_empty());
    assert_eq!(store.calls().subscribe, 0);

    second.set(Some(user("u1")));
    view.drain();
    assert_eq!(view.identity().unwrap().uid, "u1");
    assert_eq!(store.active_subscriptions(), 1);
}

#[tokio::test]
async fn sign_out_reports_success_and_unbinds() {
    let (store, mut view) = view_model();
    let provider = Arc::new(ManualIdentity::default());
    provider.set(Some(user("u1")));
    view.watch_identity(provider.as_ref());
    view.drain();
    assert!(view.is_signed_in());

    view.request_sign_out(&provider);
    while let Some(event) = view.next_event().await {
        let done = matches!(event, ViewEvent::SignOutCompleted(_));
        view.apply(event);
        if done {
            break;
        }
    }

    assert_eq!(
        status_text(&view),
        Some("You have been logged out successfully.")
    );
    assert!(!view.is_signed_in());
    assert_eq!(store.active_subscriptions(), 0);
}

#[tokio::test]
async fn failed_sign_out_keeps_the_session() {
    let (_store, mut view) = view_model();
    let provider = Arc::new(ManualIdentity::default());
    provider.set(Some(user("u1")));
    provider.fail_sign_out();
    view.watch_identity(provider.as_ref());
    view.drain();

    view.request_sign_out(&provider);
    let event = view.next_event().await.unwrap();
    view.apply(event);

    assert_eq!(status_text(&view), Some("Logout failed. Please try again."));
    assert!(view.is_signed_in());
}

#[tokio::test]
async fn shutdown_releases_everything() {
    let (store, mut view) = view_model();
    let provider = ManualIdentity::default();
    provider.set(Some(user("u1")));
    view.watch_identity(&provider);
    view.drain();
    assert_eq!(store.active_subscriptions(), 1);

    view.shutdown();
    assert_eq!(store.active_subscriptions(), 0);

    provider.set(Some(user("u2")));
    view.drain();
    assert_eq!(view.identity().unwrap().uid, "u1");
}
