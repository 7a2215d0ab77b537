mod actions;
mod core;
mod error;
mod logging;
mod state;
mod updates;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;

use flume::{Receiver, Sender};

pub use actions::AppAction;
pub use error::{BackendError, ErrorContext};
pub use state::*;
pub use updates::*;

use crate::core::{Session, SharedSession};

uniffi::setup_scaffolding!();

#[uniffi::export(callback_interface)]
pub trait AppReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: AppUpdate);
}

/// Secure storage for the bearer token, implemented by the host (Keychain / Keystore).
#[uniffi::export(callback_interface)]
pub trait TokenStore: Send + Sync + 'static {
    fn get_token(&self) -> Option<String>;
    fn set_token(&self, token: String);
    fn clear_token(&self);
}

/// Process-local token store for host tools and tests.
#[derive(Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl TokenStore for MemoryTokenStore {
    fn get_token(&self) -> Option<String> {
        match self.token.lock() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    fn set_token(&self, token: String) {
        match self.token.lock() {
            Ok(mut g) => *g = Some(token),
            Err(poison) => *poison.into_inner() = Some(token),
        }
    }

    fn clear_token(&self) {
        match self.token.lock() {
            Ok(mut g) => *g = None,
            Err(poison) => *poison.into_inner() = None,
        }
    }
}

#[derive(uniffi::Object)]
pub struct FfiApp {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<AppUpdate>,
    listening: AtomicBool,
    shared_session: SharedSession,
}

#[uniffi::export]
impl FfiApp {
    #[uniffi::constructor]
    pub fn new(data_dir: String, token_store: Box<dyn TokenStore>) -> Arc<Self> {
        logging::init_logging(&data_dir);
        tracing::info!(data_dir = %data_dir, "FfiApp::new() starting");

        let tokens: Arc<dyn TokenStore> = Arc::from(token_store);
        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_session: SharedSession = Arc::new(RwLock::new(None));

        // Actor loop thread (single threaded "app actor").
        let core_tx_for_core = core_tx.clone();
        let shared_for_core = shared_session.clone();
        thread::spawn(move || {
            let mut core = crate::core::AppCore::new(
                update_tx,
                core_tx_for_core,
                data_dir,
                tokens,
                shared_for_core,
            );
            while let Ok(msg) = core_rx.recv() {
                core.handle_message(msg);
            }
        });

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_session,
        })
    }

    pub fn dispatch(&self, action: AppAction) {
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn AppReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }

    pub fn auth_state(&self) -> AuthState {
        match self.session() {
            Some(s) => AuthState::LoggedIn {
                username: s.username.clone(),
            },
            None => AuthState::LoggedOut,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session()
            .map(|s| s.connection.state())
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn me(&self) -> Option<Profile> {
        let s = self.session()?;
        s.profiles.get_user_cached(&s.username).map(|p| (*p).clone())
    }

    /// Whatever is cached for `username`; never fetches.
    pub fn cached_user(&self, username: String) -> Option<CachedUser> {
        self.session()?.profiles.get_user_unstable(&username)
    }

    pub fn picture(&self, username: String) -> Option<PictureRef> {
        self.session()?.profiles.picture_cached(&username)
    }

    pub fn user_thread(&self, peer: String) -> Option<UserThreadView> {
        self.session()?.messages.user_thread(&peer)
    }

    pub fn group_thread(&self, group_id: String) -> Option<GroupThreadView> {
        self.session()?.messages.group_thread(&group_id)
    }

    pub fn summaries(&self) -> Vec<MessageSummary> {
        self.session()
            .map(|s| s.messages.summaries())
            .unwrap_or_default()
    }

    pub fn group_summaries(&self) -> Vec<GroupMessageSummary> {
        self.session()
            .map(|s| s.messages.group_summaries())
            .unwrap_or_default()
    }

    pub fn social_graph(&self) -> SocialGraphView {
        self.session()
            .map(|s| s.social.view())
            .unwrap_or_default()
    }

    pub fn relation(&self, username: String) -> Relation {
        self.session()
            .map(|s| s.social.relation_of(&username))
            .unwrap_or(Relation::Unrelated)
    }

    pub fn listings(&self) -> ListingsView {
        self.session()
            .map(|s| s.listings.view())
            .unwrap_or_default()
    }
}

impl FfiApp {
    fn session(&self) -> Option<Arc<Session>> {
        match self.shared_session.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }
}
