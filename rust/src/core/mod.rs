mod backend;
mod config;
mod connection;
mod http;
mod listings;
mod messages;
mod optimistic;
mod profile_cache;
mod profile_pics;
mod push;
mod router;
mod session;
mod social;

#[cfg(test)]
pub(crate) mod test_support;

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use flume::Sender;

use crate::actions::AppAction;
use crate::error::{BackendError, BackendResult, ErrorContext};
use crate::state::{ActionOutcome, AuthState, Refresh};
use crate::updates::{AppUpdate, CoreMsg, Emitter, InternalEvent};
use crate::TokenStore;

pub use backend::Backend;
pub use config::{load_app_config, AppConfig};
pub use http::HttpBackend;
pub use push::{OfflineTransport, PushTransport, WebSocketTransport};
pub use session::Session;

/// The live session as seen by synchronous snapshot readers.
pub(crate) type SharedSession = Arc<RwLock<Option<Arc<Session>>>>;

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(g) => g,
        Err(poison) => poison.into_inner(),
    }
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(g) => g,
        Err(poison) => poison.into_inner(),
    }
}

pub(crate) fn lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    match lock.lock() {
        Ok(g) => g,
        Err(poison) => poison.into_inner(),
    }
}

/// What every store of a session shares: the backend, the update stream and the way back into
/// the actor for session expiry.
#[derive(Clone)]
pub(crate) struct StoreCtx {
    pub backend: Arc<dyn Backend>,
    pub emitter: Emitter,
    core_sender: Sender<CoreMsg>,
}

impl StoreCtx {
    pub fn new(backend: Arc<dyn Backend>, emitter: Emitter, core_sender: Sender<CoreMsg>) -> Self {
        Self {
            backend,
            emitter,
            core_sender,
        }
    }

    /// Log a failed request. A 401 additionally asks the actor to end the session.
    pub fn note_failure(&self, what: &'static str, e: &BackendError) {
        if e.is_unauthorized() {
            tracing::warn!(what, "request unauthorized; expiring session");
            let _ = self
                .core_sender
                .send(CoreMsg::Internal(Box::new(InternalEvent::SessionExpired)));
        } else {
            tracing::warn!(what, %e, "request failed");
        }
    }

    /// Unwrap a fetch result, or turn the failure into the matching `Refresh`.
    pub fn settle<T>(&self, what: &'static str, res: BackendResult<T>) -> Result<T, Refresh> {
        res.map_err(|e| {
            self.note_failure(what, &e);
            if e.is_unauthorized() {
                Refresh::Unauthorized
            } else {
                Refresh::Failed
            }
        })
    }
}

const SESSION_EXPIRED_TOAST: &str = "Your session has expired. Please sign in again.";
const SIGN_IN_REJECTED_TOAST: &str = "Sign-in failed. Please sign in again.";
const SIGN_IN_OFFLINE_TOAST: &str = "Couldn't reach the server. Please try again.";

pub struct AppCore {
    emitter: Emitter,
    core_sender: Sender<CoreMsg>,
    config: AppConfig,
    runtime: tokio::runtime::Runtime,

    backend: Arc<dyn Backend>,
    transport: Arc<dyn PushTransport>,
    tokens: Arc<dyn TokenStore>,

    auth: AuthState,
    session: Option<Arc<Session>>,
    shared_session: SharedSession,

    // Bumped on every sign-in and on logout; results of older attempts are dropped.
    sign_in_attempt: u64,
    search_token: u64,
}

impl AppCore {
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        tokens: Arc<dyn TokenStore>,
        shared_session: SharedSession,
    ) -> Self {
        let config = load_app_config(&data_dir);
        let backend: Arc<dyn Backend> = match HttpBackend::new(&config.api_url(), tokens.clone())
        {
            Ok(b) => Arc::new(b),
            Err(e) => {
                tracing::error!(%e, "invalid api url; using default");
                Arc::new(
                    HttpBackend::new(config::DEFAULT_API_URL, tokens.clone())
                        .expect("default api url"),
                )
            }
        };
        let transport: Arc<dyn PushTransport> = if config.network_enabled() {
            Arc::new(WebSocketTransport::new(config.push_url()))
        } else {
            tracing::warn!("network disabled by config; push channel will not connect");
            Arc::new(OfflineTransport)
        };
        Self::with_collaborators(
            update_sender,
            core_sender,
            config,
            backend,
            transport,
            tokens,
            shared_session,
        )
    }

    pub(crate) fn with_collaborators(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        config: AppConfig,
        backend: Arc<dyn Backend>,
        transport: Arc<dyn PushTransport>,
        tokens: Arc<dyn TokenStore>,
        shared_session: SharedSession,
    ) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .enable_io()
            .build()
            .expect("tokio runtime");

        Self {
            emitter: Emitter::new(update_sender),
            core_sender,
            config,
            runtime,
            backend,
            transport,
            tokens,
            auth: AuthState::LoggedOut,
            session: None,
            shared_session,
            sign_in_attempt: 0,
            search_token: 0,
        }
    }

    pub fn auth(&self) -> &AuthState {
        &self.auth
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    fn set_auth(&mut self, auth: AuthState) {
        if self.auth == auth {
            return;
        }
        self.auth = auth.clone();
        self.emitter.emit(|rev| AppUpdate::AuthChanged { rev, auth });
    }

    fn toast(&self, message: impl Into<String>) {
        let message = message.into();
        self.emitter.emit(|rev| AppUpdate::Toast { rev, message });
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(action) => {
                // Never log `?action` directly: it carries the bearer token and message text.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action);
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::SignedIn { attempt, profile } => {
                if attempt != self.sign_in_attempt {
                    tracing::debug!(attempt, "dropping superseded sign-in");
                    return;
                }
                self.open_session(profile);
            }
            InternalEvent::SignInFailed {
                attempt,
                unauthorized,
            } => {
                if attempt != self.sign_in_attempt {
                    return;
                }
                if unauthorized {
                    self.tokens.clear_token();
                    self.toast(SIGN_IN_REJECTED_TOAST);
                } else {
                    self.toast(SIGN_IN_OFFLINE_TOAST);
                }
            }
            InternalEvent::SessionExpired => {
                if self.session.is_none() {
                    return;
                }
                tracing::info!("session expired");
                self.tokens.clear_token();
                self.close_session();
                self.toast(SESSION_EXPIRED_TOAST);
            }
            InternalEvent::AccountDeleted => {
                tracing::info!("account deleted");
                self.tokens.clear_token();
                self.close_session();
            }
            InternalEvent::SearchDebounceElapsed { token, query } => {
                if token != self.search_token {
                    return;
                }
                let tx = self.core_sender.clone();
                self.spawn_with_session(move |session| async move {
                    // A failed search yields an empty result list.
                    let users = session.social.search_users(&query).await.unwrap_or_default();
                    let _ = tx.send(CoreMsg::Internal(Box::new(
                        InternalEvent::SearchFinished {
                            token,
                            query,
                            users,
                        },
                    )));
                });
            }
            InternalEvent::SearchFinished {
                token,
                query,
                users,
            } => {
                if token != self.search_token {
                    return;
                }
                self.emitter
                    .emit(|rev| AppUpdate::SearchResults { rev, query, users });
            }
            InternalEvent::Toast(ref msg) => {
                tracing::info!(msg, "toast");
                self.toast(msg.clone());
            }
        }
    }

    fn start_sign_in(&mut self) {
        self.sign_in_attempt = self.sign_in_attempt.saturating_add(1);
        let attempt = self.sign_in_attempt;
        let backend = self.backend.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let event = match backend.fetch_self().await {
                Ok(profile) => InternalEvent::SignedIn { attempt, profile },
                Err(e) => {
                    tracing::warn!(%e, "sign-in failed");
                    InternalEvent::SignInFailed {
                        attempt,
                        unauthorized: e.is_unauthorized(),
                    }
                }
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(event)));
        });
    }

    fn open_session(&mut self, me: crate::state::Profile) {
        let ctx = StoreCtx::new(
            self.backend.clone(),
            self.emitter.clone(),
            self.core_sender.clone(),
        );
        let (session, push_rx) = Session::new(
            session::SessionParts {
                ctx,
                transport: self.transport.clone(),
                tokens: self.tokens.clone(),
                max_concurrent_pfp_fetches: self.config.max_concurrent_pfp_fetches(),
            },
            me,
        );
        tracing::info!(username = %session.username, "session opened");

        *write(&self.shared_session) = Some(session.clone());
        self.session = Some(session.clone());
        self.set_auth(AuthState::LoggedIn {
            username: session.username.clone(),
        });

        self.runtime
            .spawn(session::run_push_consumer(session.clone(), push_rx));
        self.runtime.spawn(async move {
            session.initial_sync().await;
        });
    }

    /// Drop the session and everything it cached. The token is left to the caller.
    fn close_session(&mut self) {
        self.sign_in_attempt = self.sign_in_attempt.saturating_add(1);
        self.search_token = self.search_token.saturating_add(1);
        *write(&self.shared_session) = None;
        if let Some(session) = self.session.take() {
            self.runtime.spawn(async move {
                session.shutdown().await;
            });
        }
        self.set_auth(AuthState::LoggedOut);
    }

    fn spawn_with_session<F, Fut>(&self, work: F)
    where
        F: FnOnce(Arc<Session>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(session) = self.session.clone() else {
            tracing::debug!("no session; action dropped");
            return;
        };
        self.runtime.spawn(work(session));
    }

    /// Like `spawn_with_session`, toasting a failed outcome. Unauthorized outcomes stay quiet:
    /// the session-expired flow already tells the user.
    fn spawn_outcome<F, Fut>(&self, work: F)
    where
        F: FnOnce(Arc<Session>) -> Fut,
        Fut: Future<Output = ActionOutcome> + Send + 'static,
    {
        let tx = self.core_sender.clone();
        self.spawn_with_session(move |session| {
            let fut = work(session);
            async move {
                let outcome = fut.await;
                if outcome.unauthorized {
                    return;
                }
                if let Some(message) = outcome.message {
                    let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::Toast(message))));
                }
            }
        });
    }

    fn schedule_search(&mut self, query: String) {
        self.search_token = self.search_token.saturating_add(1);
        let query = query.trim().to_string();
        if query.chars().count() < self.config.min_search_len() {
            self.emitter.emit(|rev| AppUpdate::SearchResults {
                rev,
                query,
                users: vec![],
            });
            return;
        }
        if self.session.is_none() {
            return;
        }
        let token = self.search_token;
        let delay = self.config.search_debounce();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::SearchDebounceElapsed { token, query },
            )));
        });
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            // Auth
            AppAction::SignIn { token } => {
                let token = token.trim();
                if token.is_empty() {
                    self.toast("Missing sign-in token.");
                    return;
                }
                if self.session.is_some() {
                    self.close_session();
                }
                self.tokens.set_token(token.to_string());
                self.start_sign_in();
            }
            AppAction::RestoreSession => {
                if self.session.is_some() {
                    return;
                }
                if self.tokens.get_token().is_none() {
                    tracing::info!("no stored token; staying logged out");
                    return;
                }
                self.start_sign_in();
            }
            AppAction::Logout => {
                self.tokens.clear_token();
                self.close_session();
            }
            AppAction::DeleteAccount => {
                let backend = self.backend.clone();
                let tx = self.core_sender.clone();
                self.spawn_with_session(move |_session| async move {
                    let event = match backend.delete_account().await {
                        Ok(()) => InternalEvent::AccountDeleted,
                        Err(e) if e.is_unauthorized() => InternalEvent::SessionExpired,
                        Err(e) => {
                            tracing::warn!(%e, "delete account failed");
                            let outcome = e.into_outcome(ErrorContext::General);
                            InternalEvent::Toast(outcome.message.unwrap_or_default())
                        }
                    };
                    let _ = tx.send(CoreMsg::Internal(Box::new(event)));
                });
            }

            // Profiles
            AppAction::FetchUser { username } => {
                self.spawn_with_session(move |s| async move {
                    s.profiles.get_user(&username).await;
                });
            }
            AppAction::FetchPicture { username } => {
                self.spawn_with_session(move |s| async move {
                    s.profiles.fetch_pfp(&username).await;
                });
            }
            AppAction::PrefetchPictures { usernames } => {
                if let Some(s) = &self.session {
                    // Spawns onto the runtime; enter it so `tokio::spawn` finds a handle.
                    let _guard = self.runtime.enter();
                    s.profiles.prefetch_pfps(usernames);
                }
            }
            AppAction::FetchAttendees { exit_id } => {
                self.spawn_with_session(move |s| async move {
                    s.profiles.fetch_attendees(&exit_id).await;
                });
            }
            AppAction::UploadProfilePicture { bytes } => {
                self.spawn_outcome(move |s| async move { s.profiles.upload_picture(bytes).await });
            }

            // Chat
            AppAction::OpenUserChat { peer } => {
                self.spawn_with_session(move |s| async move {
                    s.messages.open_user_thread(&peer).await;
                });
            }
            AppAction::OpenGroupChat { group_id } => {
                self.spawn_with_session(move |s| async move {
                    s.messages.open_group_thread(&group_id).await;
                });
            }
            AppAction::LoadOlderUserMessages { peer } => {
                self.spawn_with_session(move |s| async move {
                    s.messages.load_older_user_messages(&peer).await;
                });
            }
            AppAction::LoadOlderGroupMessages { group_id } => {
                self.spawn_with_session(move |s| async move {
                    s.messages.load_older_group_messages(&group_id).await;
                });
            }
            AppAction::SendMessage { peer, content } => {
                if content.trim().is_empty() {
                    return;
                }
                self.spawn_outcome(
                    move |s| async move { s.messages.send_message(&peer, &content).await },
                );
            }
            AppAction::SendGroupMessage { group_id, content } => {
                if content.trim().is_empty() {
                    return;
                }
                self.spawn_outcome(move |s| async move {
                    s.messages.send_group_message(&group_id, &content).await
                });
            }
            AppAction::RetryMessage { peer, local_id } => {
                self.spawn_outcome(
                    move |s| async move { s.messages.retry_message(&peer, &local_id).await },
                );
            }
            AppAction::RetryGroupMessage { group_id, local_id } => {
                self.spawn_outcome(move |s| async move {
                    s.messages.retry_group_message(&group_id, &local_id).await
                });
            }
            AppAction::MarkRead { peer } => {
                self.spawn_with_session(move |s| async move { s.messages.mark_read(&peer).await });
            }
            AppAction::MarkGroupRead { group_id } => {
                self.spawn_with_session(move |s| async move {
                    s.messages.mark_group_message_read(&group_id).await
                });
            }
            AppAction::RefreshInbox => {
                self.spawn_with_session(|s| async move {
                    if s.messages.refresh_summaries().await.is_unauthorized() {
                        return;
                    }
                    s.messages.refresh_group_summaries().await;
                });
            }

            // Social graph
            AppAction::RefreshFriends => {
                self.spawn_with_session(|s| async move {
                    s.social.get_friends().await;
                });
            }
            AppAction::RefreshSolicitations => {
                self.spawn_with_session(|s| async move {
                    if s.social.get_incoming_solicitations().await.is_unauthorized() {
                        return;
                    }
                    s.social.get_outgoing_solicitations().await;
                });
            }
            AppAction::FollowUser { username } => {
                self.spawn_outcome(move |s| async move {
                    let outcome = s.social.follow_user(&username).await;
                    if !outcome.unauthorized {
                        s.social.get_outgoing_solicitations().await;
                    }
                    outcome
                });
            }
            AppAction::UnfollowUser { username } => {
                self.spawn_outcome(move |s| async move {
                    let outcome = s.social.unfollow_user(&username).await;
                    if !outcome.unauthorized {
                        s.social.get_friends().await;
                        s.social.get_outgoing_solicitations().await;
                    }
                    outcome
                });
            }
            AppAction::AcceptSolicitation { username } => {
                self.spawn_outcome(
                    move |s| async move { s.social.accept_solicitation(&username).await },
                );
            }
            AppAction::RejectSolicitation { username } => {
                self.spawn_outcome(
                    move |s| async move { s.social.reject_solicitation(&username).await },
                );
            }
            AppAction::SearchUsers { query } => self.schedule_search(query),

            // Exits
            AppAction::RefreshListings => {
                self.spawn_with_session(|s| async move {
                    s.listings.refresh_all().await;
                });
            }
            AppAction::ToggleAttendance { exit_id } => {
                self.spawn_outcome(
                    move |s| async move { s.listings.toggle_attendance(&exit_id).await },
                );
            }
            AppAction::ToggleLike { exit_id } => {
                self.spawn_outcome(move |s| async move { s.listings.toggle_like(&exit_id).await });
            }
            AppAction::AcceptInvitation { exit_id } => {
                self.spawn_outcome(
                    move |s| async move { s.listings.accept_invitation(&exit_id).await },
                );
            }
            AppAction::RedeemOffer { token } => {
                self.spawn_outcome(move |s| async move { s.listings.redeem_offer(&token).await });
            }

            // Lifecycle
            // The desired lifecycle is recorded here, in dispatch order; the spawned task
            // only acts if it is still current when it runs.
            AppAction::Foregrounded => {
                self.spawn_with_session(|s| {
                    s.set_foreground(true);
                    async move {
                        s.foreground().await;
                    }
                });
            }
            AppAction::Backgrounded => {
                self.spawn_with_session(|s| {
                    s.set_foreground(false);
                    async move { s.background().await }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::state::{ConnectionState, Relation};
    use crate::MemoryTokenStore;
    use flume::Receiver;
    use std::time::{Duration, Instant};

    struct Harness {
        core: AppCore,
        backend: Arc<FakeBackend>,
        transport: Arc<FakeTransport>,
        tokens: Arc<MemoryTokenStore>,
        shared: SharedSession,
        updates: Receiver<AppUpdate>,
        core_rx: Receiver<CoreMsg>,
    }

    fn make_core() -> Harness {
        let (update_tx, updates) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded();
        let backend = FakeBackend::new();
        let transport = FakeTransport::new();
        let tokens = Arc::new(MemoryTokenStore::default());
        let shared: SharedSession = Arc::new(RwLock::new(None));
        let config = AppConfig {
            search_debounce_ms: Some(20),
            ..AppConfig::default()
        };
        let core = AppCore::with_collaborators(
            update_tx,
            core_tx,
            config,
            backend.clone(),
            transport.clone(),
            tokens.clone(),
            shared.clone(),
        );
        Harness {
            core,
            backend,
            transport,
            tokens,
            shared,
            updates,
            core_rx,
        }
    }

    impl Harness {
        fn dispatch(&mut self, action: AppAction) {
            self.core.handle_message(CoreMsg::Action(action));
        }

        /// Feed internal events back into the actor until `done` holds or time runs out.
        fn pump_until(&mut self, mut done: impl FnMut(&Harness) -> bool) -> bool {
            let deadline = Instant::now() + Duration::from_secs(3);
            loop {
                while let Ok(msg) = self.core_rx.try_recv() {
                    self.core.handle_message(msg);
                }
                if done(self) {
                    return true;
                }
                if Instant::now() > deadline {
                    return false;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        }

        fn pump_for(&mut self, dur: Duration) {
            let deadline = Instant::now() + dur;
            while Instant::now() < deadline {
                while let Ok(msg) = self.core_rx.try_recv() {
                    self.core.handle_message(msg);
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        }

        fn sign_in(&mut self) -> Arc<Session> {
            self.dispatch(AppAction::SignIn {
                token: "tok-1".into(),
            });
            assert!(self.pump_until(|h| h.core.session().is_some()));
            let session = self.core.session().cloned().unwrap();
            let s = session.clone();
            assert!(self.pump_until(move |_| s.connection.state() == ConnectionState::Connected));
            session
        }

        fn toasts(&self) -> Vec<String> {
            self.updates
                .try_iter()
                .filter_map(|u| match u {
                    AppUpdate::Toast { message, .. } => Some(message),
                    _ => None,
                })
                .collect()
        }
    }

    #[test]
    fn sign_in_stores_token_and_opens_session() {
        let mut h = make_core();
        let session = h.sign_in();
        assert_eq!(h.tokens.get_token().as_deref(), Some("tok-1"));
        assert_eq!(
            h.core.auth(),
            &AuthState::LoggedIn {
                username: "me".into()
            }
        );
        assert!(read(&h.shared).is_some());
        assert!(session.profiles.get_user_cached("me").is_some());
        assert_eq!(h.transport.live_channels(), 1);

        let auth_updates: Vec<AuthState> = h
            .updates
            .try_iter()
            .filter_map(|u| match u {
                AppUpdate::AuthChanged { auth, .. } => Some(auth),
                _ => None,
            })
            .collect();
        assert_eq!(
            auth_updates,
            vec![AuthState::LoggedIn {
                username: "me".into()
            }]
        );
    }

    #[test]
    fn restore_without_token_stays_logged_out() {
        let mut h = make_core();
        h.dispatch(AppAction::RestoreSession);
        h.pump_for(Duration::from_millis(50));
        assert_eq!(h.backend.calls("fetch_self"), 0);
        assert_eq!(h.core.auth(), &AuthState::LoggedOut);
    }

    #[test]
    fn restore_uses_stored_token() {
        let mut h = make_core();
        h.tokens.set_token("stored".into());
        h.dispatch(AppAction::RestoreSession);
        assert!(h.pump_until(|h| h.core.session().is_some()));
        assert_eq!(h.backend.calls("fetch_self"), 1);
    }

    #[test]
    fn rejected_sign_in_clears_token() {
        let mut h = make_core();
        h.backend.fail("fetch_self", FailMode::Unauthorized);
        h.dispatch(AppAction::SignIn {
            token: "bad".into(),
        });
        assert!(h.pump_until(|h| h.tokens.get_token().is_none()));
        assert!(h.core.session().is_none());
        assert_eq!(h.toasts(), vec![SIGN_IN_REJECTED_TOAST.to_string()]);
    }

    #[test]
    fn unreachable_server_keeps_token_for_retry() {
        let mut h = make_core();
        h.backend.fail("fetch_self", FailMode::Network);
        h.dispatch(AppAction::SignIn {
            token: "tok".into(),
        });
        assert!(h.pump_until(|h| !h.toasts().is_empty()));
        assert_eq!(h.tokens.get_token().as_deref(), Some("tok"));
        assert_eq!(h.core.auth(), &AuthState::LoggedOut);
    }

    #[test]
    fn unauthorized_response_anywhere_logs_out() {
        let mut h = make_core();
        let session = h.sign_in();
        h.backend.fail("fetch_friends", FailMode::Unauthorized);
        h.dispatch(AppAction::RefreshFriends);

        assert!(h.pump_until(|h| h.core.auth() == &AuthState::LoggedOut));
        assert!(h.tokens.get_token().is_none());
        assert!(read(&h.shared).is_none());
        assert!(h.pump_until(move |_| !session.is_alive()));
        assert!(h.pump_until(|h| h.transport.live_channels() == 0));
    }

    #[test]
    fn logout_drops_every_cache() {
        let mut h = make_core();
        h.backend.with(|d| d.friends = vec!["ana".into()]);
        let session = h.sign_in();
        let s = session.clone();
        assert!(h.pump_until(move |_| s.social.relation_of("ana") == Relation::Friend));

        h.dispatch(AppAction::Logout);
        assert_eq!(h.core.auth(), &AuthState::LoggedOut);
        assert!(h.tokens.get_token().is_none());
        let s = session.clone();
        assert!(h.pump_until(move |_| !s.is_alive()
            && s.social.relation_of("ana") == Relation::Unrelated
            && s.profiles.get_user_cached("me").is_none()));

        // Actions without a session are dropped.
        let before = h.backend.calls("fetch_user_messages");
        h.dispatch(AppAction::OpenUserChat { peer: "bob".into() });
        h.pump_for(Duration::from_millis(30));
        assert_eq!(h.backend.calls("fetch_user_messages"), before);
    }

    #[test]
    fn delete_account_then_logs_out() {
        let mut h = make_core();
        h.sign_in();
        h.dispatch(AppAction::DeleteAccount);
        assert!(h.pump_until(|h| h.core.auth() == &AuthState::LoggedOut));
        assert_eq!(h.backend.calls("delete_account"), 1);
        assert!(h.tokens.get_token().is_none());
    }

    #[test]
    fn superseded_sign_in_result_is_dropped() {
        let mut h = make_core();
        let gate = h.backend.gate("fetch_self");
        h.dispatch(AppAction::SignIn {
            token: "tok".into(),
        });
        assert!(h.pump_until(|h| h.backend.calls("fetch_self") == 1));
        h.dispatch(AppAction::Logout);
        gate.add_permits(1);
        h.pump_for(Duration::from_millis(50));
        assert!(h.core.session().is_none());
        assert_eq!(h.core.auth(), &AuthState::LoggedOut);
    }

    #[test]
    fn search_is_debounced_and_length_gated() {
        let mut h = make_core();
        h.backend
            .with(|d| d.search = vec![light("marta"), light("martin"), light("mario")]);
        h.sign_in();
        let _ = h.updates.try_iter().count();

        h.dispatch(AppAction::SearchUsers { query: "ma".into() });
        h.dispatch(AppAction::SearchUsers {
            query: "mar".into(),
        });
        h.dispatch(AppAction::SearchUsers {
            query: "mart".into(),
        });

        let mut results: Vec<(String, usize)> = Vec::new();
        assert!(h.pump_until(|h| {
            for u in h.updates.try_iter() {
                if let AppUpdate::SearchResults { query, users, .. } = u {
                    results.push((query, users.len()));
                }
            }
            results.iter().any(|(q, _)| q == "mart")
        }));

        // The short query answers immediately with nothing; only the last long one hits the
        // backend.
        assert_eq!(results[0], ("ma".to_string(), 0));
        assert!(results.contains(&("mart".to_string(), 2)));
        assert!(!results.iter().any(|(q, _)| q == "mar"));
        assert_eq!(h.backend.calls("search_users"), 1);
    }

    #[test]
    fn failed_optimistic_action_toasts_and_restores() {
        let mut h = make_core();
        h.backend.with(|d| d.feed = vec![exit("e1", false, 4)]);
        let session = h.sign_in();
        let s = session.clone();
        assert!(h.pump_until(move |_| s.listings.exit("e1").is_some()));
        let _ = h.toasts();

        h.backend.fail("set_like", FailMode::Network);
        h.dispatch(AppAction::ToggleLike {
            exit_id: "e1".into(),
        });
        assert!(h.pump_until(|h| h.backend.calls("set_like") == 1));
        let mut toasts = Vec::new();
        assert!(h.pump_until(|h| {
            toasts.extend(h.toasts());
            !toasts.is_empty()
        }));
        let e1 = session.listings.exit("e1").unwrap();
        assert!(!e1.liked);
        assert_eq!(e1.like_count, 4);
    }

    #[test]
    fn background_right_after_foreground_ends_disconnected() {
        let mut h = make_core();
        let session = h.sign_in();
        let s = session.clone();
        assert!(h.pump_until(move |_| s.connection.state() == ConnectionState::Connected));

        for _ in 0..20 {
            h.dispatch(AppAction::Foregrounded);
            h.dispatch(AppAction::Backgrounded);
            h.pump_for(Duration::from_millis(30));
            assert_eq!(session.connection.state(), ConnectionState::Disconnected);
            assert_eq!(h.transport.live_channels(), 0);
        }
    }

    #[test]
    fn send_and_background_round_trip() {
        let mut h = make_core();
        let session = h.sign_in();
        h.dispatch(AppAction::OpenUserChat { peer: "bob".into() });
        let s = session.clone();
        assert!(h.pump_until(move |_| s.messages.user_thread_exists("bob")));

        h.dispatch(AppAction::SendMessage {
            peer: "bob".into(),
            content: "   ".into(),
        });
        h.dispatch(AppAction::SendMessage {
            peer: "bob".into(),
            content: "hola".into(),
        });
        assert!(h.pump_until(|h| h.backend.calls("send_message") == 1));

        h.dispatch(AppAction::Backgrounded);
        let s = session.clone();
        assert!(h.pump_until(move |_| s.connection.state() == ConnectionState::Disconnected));

        h.dispatch(AppAction::Foregrounded);
        let s = session.clone();
        assert!(h.pump_until(move |_| {
            s.connection.state() == ConnectionState::Connected
                && s.messages
                    .user_thread("bob")
                    .is_some_and(|t| t.messages.len() == 1 && t.messages[0].id.is_some())
        }));
        assert_eq!(h.transport.live_channels(), 1);
    }
}
