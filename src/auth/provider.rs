use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::{AuthService, AuthSubscription};
use crate::error::{AppError, AppResult};
use crate::models::Session;

/// Immutable snapshot of the auth state handed to every dependent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub session: Option<Arc<Session>>,
    pub loading: bool,
}

impl SessionContext {
    pub fn loading() -> Self {
        Self {
            session: None,
            loading: true,
        }
    }

    pub fn signed_in(session: Session) -> Self {
        Self {
            session: Some(Arc::new(session)),
            loading: false,
        }
    }

    pub fn signed_out() -> Self {
        Self {
            session: None,
            loading: false,
        }
    }

    pub fn viewer_id(&self) -> Option<&str> {
        self.session.as_deref().map(Session::user_id)
    }

    /// Gate for actions that need a signed-in viewer.
    pub fn require_user(&self) -> AppResult<&Session> {
        self.session.as_deref().ok_or(AppError::Unauthorized)
    }
}

/// Single owner of the auth subscription. Publishes a new [`SessionContext`] on every change.
pub struct SessionProvider {
    state: watch::Receiver<SessionContext>,
    task: JoinHandle<()>,
}

impl SessionProvider {
    pub fn start(auth: Arc<dyn AuthService>) -> Self {
        let (tx, rx) = watch::channel(SessionContext::loading());
        // Register before the initial fetch so no event slips between the two
        let subscription = auth.subscribe();
        let task = tokio::spawn(run(auth, subscription, tx));
        Self { state: rx, task }
    }

    pub fn context(&self) -> SessionContext {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionContext> {
        self.state.clone()
    }

    /// Wait for the next published snapshot. `None` once the provider has stopped.
    pub async fn changed(&mut self) -> Option<SessionContext> {
        self.state.changed().await.ok()?;
        Some(self.context())
    }

    /// Wait until the initial session lookup has resolved.
    pub async fn ready(&mut self) -> SessionContext {
        let ready = self
            .state
            .wait_for(|ctx| !ctx.loading)
            .await
            .map(|ctx| (*ctx).clone());
        ready.unwrap_or_else(|_| self.context())
    }

    pub fn shutdown(self) {}
}

impl Drop for SessionProvider {
    fn drop(&mut self) {
        // Aborting drops the subscription, which unsubscribes from the auth service
        self.task.abort();
    }
}

async fn run(
    auth: Arc<dyn AuthService>,
    mut subscription: AuthSubscription,
    tx: watch::Sender<SessionContext>,
) {
    let mut initial = auth.current_session();
    let mut resolved = false;
    let mut event_seen = false;

    loop {
        tokio::select! {
            result = &mut initial, if !resolved => {
                resolved = true;
                let session = match result {
                    Ok(session) => session,
                    Err(e) => {
                        tracing::error!("Failed to restore session: {}", e);
                        None
                    }
                };
                tx.send_modify(|ctx| {
                    // A newer auth event already replaced the session
                    if !event_seen {
                        ctx.session = session.map(Arc::new);
                    }
                    ctx.loading = false;
                });
            }
            event = subscription.recv() => match event {
                Some(event) => {
                    tracing::info!("Auth state changed: {}", event.name());
                    event_seen = true;
                    let session = event.session().cloned().map(Arc::new);
                    tx.send_modify(|ctx| ctx.session = session);
                }
                None => break,
            }
        }
    }

    if !resolved {
        let session = initial.await.unwrap_or_else(|e| {
            tracing::error!("Failed to restore session: {}", e);
            None
        });
        tx.send_modify(|ctx| {
            if !event_seen {
                ctx.session = session.map(Arc::new);
            }
            ctx.loading = false;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AuthEvent, AuthEvents, BackendError, BackendResult};
    use crate::models::User;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    fn session(id: &str) -> Session {
        Session {
            user: User {
                id: id.into(),
                email: None,
            },
            access_token: format!("token-{}", id),
            refresh_token: None,
            expires_at: Utc::now() + chrono::Duration::hours(1),
        }
    }

    struct FakeAuth {
        events: AuthEvents,
        initial: Mutex<Option<BackendResult<Option<Session>>>>,
        gate: Notify,
        gated: bool,
    }

    impl FakeAuth {
        fn new(initial: BackendResult<Option<Session>>, gated: bool) -> Arc<Self> {
            Arc::new(Self {
                events: AuthEvents::new(),
                initial: Mutex::new(Some(initial)),
                gate: Notify::new(),
                gated,
            })
        }
    }

    #[async_trait]
    impl AuthService for FakeAuth {
        async fn sign_in(&self, _: &str, _: &str) -> BackendResult<Session> {
            Err(BackendError::InvalidCredentials)
        }

        async fn sign_up(&self, _: &str, _: &str) -> BackendResult<Option<Session>> {
            Ok(None)
        }

        async fn sign_out(&self) -> BackendResult<()> {
            Ok(())
        }

        async fn current_session(&self) -> BackendResult<Option<Session>> {
            if self.gated {
                self.gate.notified().await;
            }
            self.initial.lock().unwrap().take().unwrap_or(Ok(None))
        }

        fn subscribe(&self) -> AuthSubscription {
            self.events.subscribe()
        }
    }

    #[tokio::test]
    async fn starts_loading_then_resolves_existing_session() {
        let auth = FakeAuth::new(Ok(Some(session("u1"))), false);
        let mut provider = SessionProvider::start(auth.clone());

        let ctx = provider.ready().await;
        assert!(!ctx.loading);
        assert_eq!(ctx.viewer_id(), Some("u1"));
    }

    #[tokio::test]
    async fn failed_initial_fetch_leaves_session_empty() {
        let auth = FakeAuth::new(Err(BackendError::Unauthorized), false);
        let mut provider = SessionProvider::start(auth.clone());

        let ctx = provider.ready().await;
        assert_eq!(ctx, SessionContext::signed_out());
        assert!(ctx.require_user().is_err());
    }

    #[tokio::test]
    async fn events_replace_session() {
        let auth = FakeAuth::new(Ok(None), false);
        let mut provider = SessionProvider::start(auth.clone());
        provider.ready().await;

        auth.events.emit(AuthEvent::SignedIn(session("u2")));
        let ctx = provider.changed().await.unwrap();
        assert_eq!(ctx.viewer_id(), Some("u2"));

        auth.events.emit(AuthEvent::SignedOut);
        let ctx = provider.changed().await.unwrap();
        assert_eq!(ctx.viewer_id(), None);
        assert!(!ctx.loading);
    }

    #[tokio::test]
    async fn event_before_initial_resolution_wins() {
        let auth = FakeAuth::new(Ok(None), true);
        let mut provider = SessionProvider::start(auth.clone());

        auth.events.emit(AuthEvent::SignedIn(session("u3")));
        let ctx = provider.changed().await.unwrap();
        assert_eq!(ctx.viewer_id(), Some("u3"));
        assert!(ctx.loading);

        auth.gate.notify_one();
        let ctx = provider.ready().await;
        assert!(!ctx.loading);
        assert_eq!(ctx.viewer_id(), Some("u3"));
    }

    #[tokio::test]
    async fn shutdown_unsubscribes() {
        let auth = FakeAuth::new(Ok(None), false);
        let mut provider = SessionProvider::start(auth.clone());
        provider.ready().await;
        let mut watch = provider.watch();

        provider.shutdown();
        // The task owned the sender; once it is gone the watch closes
        assert!(watch.changed().await.is_err());
    }
}
