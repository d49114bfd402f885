//! Identity provider backed by a persisted Firebase session.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use super::{
    AuthResult, AuthSession, FirebaseAuthClient, Identity, IdentityCallback, IdentityProvider,
    SessionPersistence,
};
use crate::subscription::{ReleaseFlag, Subscription};

/// Publishes the current session on a watch channel so any number of
/// subscribers see sign-in and sign-out.
#[derive(Clone)]
pub struct SessionIdentityProvider<S: SessionPersistence> {
    client: FirebaseAuthClient<S>,
    session: Arc<watch::Sender<Option<AuthSession>>>,
}

impl<S: SessionPersistence> SessionIdentityProvider<S> {
    pub fn new(client: FirebaseAuthClient<S>) -> Self {
        let (session, _) = watch::channel(None);
        Self {
            client,
            session: Arc::new(session),
        }
    }

    pub const fn client(&self) -> &FirebaseAuthClient<S> {
        &self.client
    }

    pub fn current_session(&self) -> Option<AuthSession> {
        self.session.borrow().clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.session
            .borrow()
            .as_ref()
            .map(|session| session.user.clone())
    }

    /// Load the persisted session (refreshing it if needed) and publish it.
    pub async fn restore(&self) -> AuthResult<Option<AuthSession>> {
        let session = self.client.restore_session().await?;
        self.publish(session.clone());
        Ok(session)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        let session = self.client.sign_in(email, password).await?;
        self.publish(Some(session.clone()));
        Ok(session)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        let session = self.client.sign_up(email, password).await?;
        self.publish(Some(session.clone()));
        Ok(session)
    }

    fn publish(&self, session: Option<AuthSession>) {
        let uid = session.as_ref().map(|session| session.user.uid.clone());
        tracing::debug!("Publishing auth state: {:?}", uid);
        self.session.send_replace(session);
    }
}

impl<S: SessionPersistence> IdentityProvider for SessionIdentityProvider<S> {
    fn subscribe_to_auth_changes(&self, on_change: IdentityCallback) -> Subscription {
        let mut receiver = self.session.subscribe();
        let released = ReleaseFlag::default();
        let flag = released.clone();

        let task = tokio::spawn(async move {
            loop {
                let identity = receiver
                    .borrow_and_update()
                    .as_ref()
                    .map(|session| session.user.clone());
                if flag.is_released() {
                    break;
                }
                on_change(identity);
                if receiver.changed().await.is_err() {
                    break;
                }
            }
        });

        Subscription::with_flag(released, move || task.abort())
    }

    fn sign_out(&self) -> impl Future<Output = AuthResult<()>> + Send {
        let provider = self.clone();
        async move {
            provider.client.sign_out()?;
            provider.publish(None);
            Ok(())
        }
    }
}
