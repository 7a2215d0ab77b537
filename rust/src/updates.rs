use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use flume::Sender;

use crate::state::{AuthState, ConnectionState, ExitUserQuery, Listing, Profile, ThreadKey};
use crate::AppAction;

/// Change notifications for UI subscribers. Each carries the revision at which it was emitted;
/// subscribers read the new state through the snapshot accessors.
#[derive(uniffi::Enum, Clone, Debug)]
pub enum AppUpdate {
    AuthChanged {
        rev: u64,
        auth: AuthState,
    },
    ConnectionChanged {
        rev: u64,
        state: ConnectionState,
    },
    ProfileChanged {
        rev: u64,
        username: String,
    },
    PictureChanged {
        rev: u64,
        username: String,
    },
    ThreadChanged {
        rev: u64,
        key: ThreadKey,
    },
    SummariesChanged {
        rev: u64,
    },
    SocialGraphChanged {
        rev: u64,
    },
    ListingChanged {
        rev: u64,
        listing: Listing,
    },
    /// Transient search results; never merged into any cache.
    SearchResults {
        rev: u64,
        query: String,
        users: Vec<ExitUserQuery>,
    },
    Toast {
        rev: u64,
        message: String,
    },
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::AuthChanged { rev, .. }
            | AppUpdate::ConnectionChanged { rev, .. }
            | AppUpdate::ProfileChanged { rev, .. }
            | AppUpdate::PictureChanged { rev, .. }
            | AppUpdate::ThreadChanged { rev, .. }
            | AppUpdate::SummariesChanged { rev }
            | AppUpdate::SocialGraphChanged { rev }
            | AppUpdate::ListingChanged { rev, .. }
            | AppUpdate::SearchResults { rev, .. }
            | AppUpdate::Toast { rev, .. } => *rev,
        }
    }
}

/// Publishing half of the update stream, shared by every store of a session.
#[derive(Clone)]
pub struct Emitter {
    tx: Sender<AppUpdate>,
    rev: Arc<AtomicU64>,
}

impl Emitter {
    pub fn new(tx: Sender<AppUpdate>) -> Self {
        Self {
            tx,
            rev: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn emit(&self, build: impl FnOnce(u64) -> AppUpdate) {
        let rev = self.rev.fetch_add(1, Ordering::SeqCst) + 1;
        // Receivers going away is not an error for the core.
        let _ = self.tx.send(build(rev));
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
}

#[derive(Debug)]
pub enum InternalEvent {
    // Session lifecycle results. `attempt` lets the actor drop results of superseded sign-ins.
    SignedIn {
        attempt: u64,
        profile: Profile,
    },
    SignInFailed {
        attempt: u64,
        unauthorized: bool,
    },
    /// Any store saw a 401; drives the logout flow.
    SessionExpired,
    AccountDeleted,

    SearchDebounceElapsed {
        token: u64,
        query: String,
    },
    SearchFinished {
        token: u64,
        query: String,
        users: Vec<ExitUserQuery>,
    },
    Toast(String),
}
