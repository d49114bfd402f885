use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use linkbio_core::auth::{
    AuthSession, FirebaseAuthClient, Identity, MemorySessionStore, SessionIdentityProvider,
    SessionPersistence,
};
use linkbio_core::config::FirebaseConfig;
use linkbio_core::error::ValidationError;
use linkbio_core::store::{CollectionPath, MemoryCollectionStore};
use linkbio_core::util::unix_timestamp_now;
use linkbio_core::{LinkEntry, LinkId, LinkListViewModel};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::cli::CompletionShell;
use crate::commands::common::{format_relative_time, link_to_list_item, truncate};
use crate::commands::completions::run_completions;
use crate::commands::config::{mask_key, merge_profile, missing_fields};
use crate::commands::links::{add_link, delete_link, sign_out, wait_until_loaded};
use crate::config_profiles::CliProfile;
use crate::error::CliError;

const TIMEOUT: Duration = Duration::from_secs(2);

fn temp_path(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    std::env::temp_dir().join(format!("{prefix}-{nanos}"))
}

fn identity(uid: &str) -> Identity {
    Identity {
        uid: uid.to_string(),
        email: Some("me@example.com".to_string()),
    }
}

fn bound_view(
    uid: &str,
) -> (
    Arc<MemoryCollectionStore>,
    LinkListViewModel<MemoryCollectionStore>,
) {
    let store = Arc::new(MemoryCollectionStore::new());
    store.replace(
        &CollectionPath::for_user(uid).unwrap(),
        json!({
            "k1": {"title": "Blog", "url": "https://blog.example.com", "timestamp": 100},
            "k2": {"title": "Shop", "url": "https://shop.example.com", "timestamp": 200},
        }),
    );
    let mut view = LinkListViewModel::new(Arc::clone(&store));
    view.bind_identity(Some(identity(uid)));
    (store, view)
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
    assert_eq!(format_relative_time(now - 3 * 24 * 60 * 60_000, now), "3d ago");
}

#[test]
fn truncate_collapses_whitespace_and_adds_ellipsis() {
    assert_eq!(truncate("  My   Site ", 40), "My Site");
    assert_eq!(truncate("abcdefghij", 6), "abc...");
}

#[test]
fn list_item_carries_iso_timestamp() {
    let link = LinkEntry {
        id: LinkId::from_key("k1").unwrap(),
        title: "Blog".to_string(),
        url: "https://blog.example.com".to_string(),
        created_at: 0,
    };
    let item = link_to_list_item(&link, 120_000);
    assert_eq!(item.id, "k1");
    assert_eq!(item.created_at_iso, "1970-01-01 00:00:00 UTC");
    assert_eq!(item.relative_time, "2m ago");
}

#[test]
fn mask_key_hides_the_tail() {
    assert_eq!(mask_key("AIzaSyExample"), "AIzaSy...");
    assert_eq!(mask_key("abc"), "***");
}

#[test]
fn merge_profile_prefers_explicit_values() {
    let existing = CliProfile {
        api_key: Some("old-key".to_string()),
        database_url: Some("https://old.firebaseio.com".to_string()),
        ..CliProfile::default()
    };
    let merged = merge_profile(
        existing,
        None,
        Some("new-key".to_string()),
        None,
        Some("env-key".to_string()),
        Some("https://env.firebaseio.com".to_string()),
    );
    assert_eq!(merged.api_key.as_deref(), Some("new-key"));
    assert_eq!(
        merged.database_url.as_deref(),
        Some("https://env.firebaseio.com")
    );
}

#[test]
fn merge_profile_uses_web_config_over_environment() {
    let web_config = FirebaseConfig {
        api_key: "web-key".to_string(),
        database_url: "https://web.firebaseio.com".to_string(),
        auth_domain: Some("web.firebaseapp.com".to_string()),
        project_id: Some("web".to_string()),
    };
    let merged = merge_profile(
        CliProfile::default(),
        Some(web_config),
        None,
        None,
        Some("env-key".to_string()),
        None,
    );
    assert_eq!(merged.api_key.as_deref(), Some("web-key"));
    assert_eq!(merged.project_id.as_deref(), Some("web"));
    assert!(missing_fields(&merged).is_empty());
}

#[test]
fn missing_fields_lists_required_values() {
    assert_eq!(
        missing_fields(&CliProfile::default()),
        vec!["api_key", "database_url"]
    );
}

#[test]
fn completions_are_written_to_file() {
    let path = temp_path("linkbio-completions");
    run_completions(CompletionShell::Bash, Some(&path)).unwrap();
    let script = std::fs::read_to_string(&path).unwrap();
    assert!(script.contains("linkbio"));
    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn wait_until_loaded_applies_the_first_collection() {
    let (_store, mut view) = bound_view("u1");
    wait_until_loaded(&mut view, TIMEOUT).await.unwrap();

    let titles = view
        .links()
        .iter()
        .map(|link| link.title.as_str())
        .collect::<Vec<_>>();
    assert_eq!(titles, vec!["Shop", "Blog"]);
}

#[tokio::test]
async fn wait_until_loaded_reports_subscription_failure() {
    let store = Arc::new(MemoryCollectionStore::new());
    store.pause_notifications();
    let mut view = LinkListViewModel::new(Arc::clone(&store));
    view.bind_identity(Some(identity("u1")));
    store.emit_error(&CollectionPath::for_user("u1").unwrap(), "denied");

    let error = wait_until_loaded(&mut view, TIMEOUT).await.unwrap_err();
    assert_eq!(
        error.to_string(),
        "Failed to load links: Permission denied: denied"
    );
}

#[tokio::test]
async fn wait_until_loaded_times_out_without_identity() {
    let store = Arc::new(MemoryCollectionStore::new());
    let mut view = LinkListViewModel::new(store);
    let error = wait_until_loaded(&mut view, Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(error, CliError::Timeout));
}

#[tokio::test]
async fn add_link_returns_the_new_id() {
    let (store, mut view) = bound_view("u1");
    wait_until_loaded(&mut view, TIMEOUT).await.unwrap();

    let (status, id) = add_link(&mut view, "Portfolio", "me.dev", TIMEOUT)
        .await
        .unwrap();
    assert_eq!(status.text, "Link added successfully!");

    let stored = store.snapshot(&CollectionPath::for_user("u1").unwrap());
    assert!(stored.contains(&id));
    assert!(view
        .links()
        .iter()
        .any(|link| link.id == id && link.url == "https://me.dev"));
}

#[tokio::test]
async fn add_link_surfaces_validation_errors() {
    let (store, mut view) = bound_view("u1");
    wait_until_loaded(&mut view, TIMEOUT).await.unwrap();

    let error = add_link(&mut view, "", "https://x.com", TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        CliError::Validation(ValidationError::MissingFields)
    ));
    assert_eq!(store.calls().append, 0);
}

#[tokio::test]
async fn add_link_surfaces_store_failure() {
    let (store, mut view) = bound_view("u1");
    wait_until_loaded(&mut view, TIMEOUT).await.unwrap();
    store.fail_next_append("offline");

    let error = add_link(&mut view, "Portfolio", "https://me.dev", TIMEOUT)
        .await
        .unwrap_err();
    assert_eq!(error.to_string(), "Failed to add link. Try again.");
}

#[tokio::test]
async fn delete_link_removes_the_entry() {
    let (_store, mut view) = bound_view("u1");
    wait_until_loaded(&mut view, TIMEOUT).await.unwrap();

    let status = delete_link(&mut view, "k2", TIMEOUT).await.unwrap();
    assert_eq!(status.text, "Link deleted.");

    let ids = view
        .links()
        .iter()
        .map(|link| link.id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["k1"]);
}

#[tokio::test]
async fn sign_out_clears_the_persisted_session() {
    let sessions = MemorySessionStore::default();
    sessions
        .save_session(&AuthSession {
            id_token: "id".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: unix_timestamp_now() + 3600,
            user: identity("u1"),
        })
        .unwrap();
    let provider = Arc::new(SessionIdentityProvider::new(
        FirebaseAuthClient::new("key", sessions.clone()).unwrap(),
    ));
    provider.restore().await.unwrap();

    let store = Arc::new(MemoryCollectionStore::new());
    let mut view = LinkListViewModel::new(Arc::clone(&store));
    view.watch_identity(provider.as_ref());
    wait_until_loaded(&mut view, TIMEOUT).await.unwrap();
    assert!(view.is_signed_in());

    let status = sign_out(&mut view, &provider, TIMEOUT).await.unwrap();
    assert_eq!(status.text, "You have been logged out successfully.");
    assert!(sessions.load_session().unwrap().is_none());
}
