use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use linkbio_core::auth::IdentityProvider;
use linkbio_core::models::StatusMessage;
use linkbio_core::store::{AccessToken, CollectionStore, RealtimeDatabaseStore};
use linkbio_core::{LinkId, LinkListViewModel, ViewEvent};

use crate::auth::{identity_provider, ProfileIdentityProvider};
use crate::cli::LinksCommands;
use crate::commands::common::{
    link_to_list_item, load_profile_context, print_links, print_status, ProfileContext,
};
use crate::error::CliError;

pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(15);

pub async fn run_links(command: LinksCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    let context = load_profile_context(global_profile)?;
    let (mut view, _provider) = connect(&context).await?;

    let result = match command {
        LinksCommands::List { json } => run_list(&mut view, json).await,
        LinksCommands::Add { title, url } => {
            wait_until_loaded(&mut view, OPERATION_TIMEOUT).await?;
            let (status, id) = add_link(&mut view, &title, &url, OPERATION_TIMEOUT).await?;
            print_status(&status);
            println!("{id}");
            Ok(())
        }
        LinksCommands::Delete { id } => {
            wait_until_loaded(&mut view, OPERATION_TIMEOUT).await?;
            let status = delete_link(&mut view, &id, OPERATION_TIMEOUT).await?;
            print_status(&status);
            Ok(())
        }
        LinksCommands::Watch => watch_links(&mut view).await,
    };

    view.shutdown();
    result
}

/// Restore the profile session and bind a view model to its collection.
async fn connect(
    context: &ProfileContext,
) -> Result<
    (
        LinkListViewModel<RealtimeDatabaseStore>,
        ProfileIdentityProvider,
    ),
    CliError,
> {
    let provider = identity_provider(&context.name, &context.firebase)
        .map_err(|error| CliError::Auth(error.to_string()))?;
    let session = provider
        .restore()
        .await
        .map_err(|error| CliError::Auth(error.to_string()))?
        .ok_or(CliError::NotSignedIn)?;

    let token = AccessToken::default();
    token.set(Some(session.id_token));
    let store = RealtimeDatabaseStore::new(&context.firebase.database_url, token)
        .map_err(linkbio_core::Error::from)?;

    let mut view = LinkListViewModel::new(Arc::new(store));
    view.watch_identity(&provider);
    Ok((view, provider))
}

async fn run_list<S: CollectionStore>(
    view: &mut LinkListViewModel<S>,
    json: bool,
) -> Result<(), CliError> {
    wait_until_loaded(view, OPERATION_TIMEOUT).await?;

    if json {
        let now_ms = Utc::now().timestamp_millis();
        let items = view
            .links()
            .iter()
            .map(|link| link_to_list_item(link, now_ms))
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        print_links(view.links());
    }
    Ok(())
}

async fn watch_links<S: CollectionStore>(view: &mut LinkListViewModel<S>) -> Result<(), CliError> {
    wait_until_loaded(view, OPERATION_TIMEOUT).await?;
    print_links(view.links());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            event = view.next_event() => {
                let Some(event) = event else { break };
                let is_collection = matches!(event, ViewEvent::Collection { .. });
                view.apply(event);
                if let Some(status) = view.status().filter(|status| status.is_error()) {
                    return Err(CliError::Operation(status.text.clone()));
                }
                if is_collection && view.has_loaded() {
                    println!();
                    print_links(view.links());
                }
            }
        }
    }
    Ok(())
}

async fn next_event<S: CollectionStore>(
    view: &mut LinkListViewModel<S>,
    timeout: Duration,
) -> Result<ViewEvent, CliError> {
    match tokio::time::timeout(timeout, view.next_event()).await {
        Ok(Some(event)) => Ok(event),
        Ok(None) => Err(CliError::Operation("Link store connection closed".to_string())),
        Err(_) => Err(CliError::Timeout),
    }
}

fn failed_status<S: CollectionStore>(view: &LinkListViewModel<S>) -> Option<CliError> {
    view.status()
        .filter(|status| status.is_error())
        .map(|status| CliError::Operation(status.text.clone()))
}

/// Apply events until the first collection for the bound identity arrives.
pub async fn wait_until_loaded<S: CollectionStore>(
    view: &mut LinkListViewModel<S>,
    timeout: Duration,
) -> Result<(), CliError> {
    while !view.has_loaded() {
        let event = next_event(view, timeout).await?;
        view.apply(event);
        if let Some(error) = failed_status(view) {
            return Err(error);
        }
    }
    Ok(())
}

/// Submit an add and wait for the store to acknowledge it.
pub async fn add_link<S: CollectionStore>(
    view: &mut LinkListViewModel<S>,
    title: &str,
    url: &str,
    timeout: Duration,
) -> Result<(StatusMessage, LinkId), CliError> {
    let request = view.request_add(title, url)?;
    let mut added = None;
    loop {
        let event = next_event(view, timeout).await?;
        if event.request() != Some(request) {
            view.apply(event);
            continue;
        }
        if let ViewEvent::AddAcknowledged { result: Ok(id), .. } = &event {
            added = Some(id.clone());
        }
        view.apply(event);
        break;
    }

    if let Some(error) = failed_status(view) {
        return Err(error);
    }
    match (view.status().cloned(), added) {
        (Some(status), Some(id)) => Ok((status, id)),
        _ => Err(CliError::Operation(
            "Signed-in user changed before the link was saved".to_string(),
        )),
    }
}

/// Submit a delete and wait for the store to acknowledge it.
///
/// `id` is typed by the user, so surrounding whitespace is dropped.
pub async fn delete_link<S: CollectionStore>(
    view: &mut LinkListViewModel<S>,
    id: &str,
    timeout: Duration,
) -> Result<StatusMessage, CliError> {
    let request = view.request_delete(id.trim())?;
    loop {
        let event = next_event(view, timeout).await?;
        let done = event.request() == Some(request);
        view.apply(event);
        if done {
            break;
        }
    }

    if let Some(error) = failed_status(view) {
        return Err(error);
    }
    view.status().cloned().ok_or_else(|| {
        CliError::Operation("Signed-in user changed before the link was deleted".to_string())
    })
}

/// Ask the provider to sign out and wait for the outcome.
pub async fn sign_out<S: CollectionStore, P: IdentityProvider>(
    view: &mut LinkListViewModel<S>,
    provider: &Arc<P>,
    timeout: Duration,
) -> Result<StatusMessage, CliError> {
    view.request_sign_out(provider);
    loop {
        let event = next_event(view, timeout).await?;
        let done = matches!(event, ViewEvent::SignOutCompleted(_));
        view.apply(event);
        if done {
            break;
        }
    }
    view.status()
        .cloned()
        .ok_or_else(|| CliError::Operation("Sign-out finished without a status".to_string()))
}
