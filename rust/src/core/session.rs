// Per-authentication bundle of stores plus the single push consumer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flume::Receiver;

use super::connection::ConnectionManager;
use super::listings::ListingStore;
use super::messages::MessageStore;
use super::profile_cache::ProfileCache;
use super::push::{PushEnvelope, PushEvent, PushTransport};
use super::router::{self, RefetchTarget};
use super::social::SocialGraphStore;
use super::StoreCtx;
use crate::state::{ConnectionState, Direction, Listing, Profile, Refresh};
use crate::TokenStore;

pub struct Session {
    pub username: String,
    pub profiles: Arc<ProfileCache>,
    pub connection: Arc<ConnectionManager>,
    pub messages: Arc<MessageStore>,
    pub social: Arc<SocialGraphStore>,
    pub listings: Arc<ListingStore>,
    alive: AtomicBool,
    /// Last lifecycle the host reported, recorded in dispatch order.
    in_foreground: AtomicBool,
    /// Held across each connect or stop so lifecycle transitions never interleave.
    lifecycle: tokio::sync::Mutex<()>,
}

pub(crate) struct SessionParts {
    pub ctx: StoreCtx,
    pub transport: Arc<dyn PushTransport>,
    pub tokens: Arc<dyn TokenStore>,
    pub max_concurrent_pfp_fetches: usize,
}

impl Session {
    /// Build every store for `me`. The returned receiver is the inbound side of the push
    /// channel; exactly one consumer should drain it.
    pub(crate) fn new(parts: SessionParts, me: Profile) -> (Arc<Self>, Receiver<PushEnvelope>) {
        let SessionParts {
            ctx,
            transport,
            tokens,
            max_concurrent_pfp_fetches,
        } = parts;
        let (push_tx, push_rx) = flume::unbounded();
        let username = me.username.clone();

        let profiles = Arc::new(ProfileCache::new(
            ctx.clone(),
            username.clone(),
            max_concurrent_pfp_fetches,
        ));
        profiles.insert(me);

        let session = Arc::new(Self {
            connection: Arc::new(ConnectionManager::new(
                transport,
                tokens,
                push_tx,
                ctx.emitter.clone(),
            )),
            messages: Arc::new(MessageStore::new(ctx.clone(), username.clone())),
            social: Arc::new(SocialGraphStore::new(ctx.clone())),
            listings: Arc::new(ListingStore::new(ctx)),
            profiles,
            username,
            alive: AtomicBool::new(true),
            in_foreground: AtomicBool::new(true),
            lifecycle: tokio::sync::Mutex::new(()),
        });
        (session, push_rx)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Record the lifecycle the host just reported. Must be called in dispatch order, before
    /// the matching `foreground` or `background` is spawned.
    pub fn set_foreground(&self, foreground: bool) {
        self.in_foreground.store(foreground, Ordering::SeqCst);
    }

    pub fn is_foreground(&self) -> bool {
        self.in_foreground.load(Ordering::SeqCst)
    }

    /// First population after sign-in.
    pub async fn initial_sync(&self) {
        {
            let _transition = self.lifecycle.lock().await;
            if self.is_foreground() {
                self.connection.check_and_initialize_messaging().await;
            }
        }
        if self.messages.refresh_summaries().await.is_unauthorized() {
            return;
        }
        self.messages.refresh_group_summaries().await;
        self.social.get_friends().await;
        self.social.get_incoming_solicitations().await;
        self.social.get_outgoing_solicitations().await;
        self.listings.refresh_all().await;
        self.profiles.fetch_user_pfp().await;
    }

    /// Resume barrier: drop whatever channel we believe is live, reconnect, then refetch what
    /// may have changed while suspended. Nothing is replayed by the server. A no-op once a
    /// later background has been reported.
    pub async fn foreground(&self) -> ConnectionState {
        let state = {
            let _transition = self.lifecycle.lock().await;
            if !self.is_foreground() {
                tracing::debug!("foreground superseded by background");
                return self.connection.state();
            }
            self.connection.reset_messages().await;
            self.connection.check_and_initialize_messaging().await
        };
        self.resync().await;
        state
    }

    /// Stop the channel unless a later foreground has been reported.
    pub async fn background(&self) {
        let _transition = self.lifecycle.lock().await;
        if self.is_foreground() {
            tracing::debug!("background superseded by foreground");
            return;
        }
        self.connection.stop_messaging_connection().await;
    }

    pub async fn resync(&self) {
        if self.messages.refresh_summaries().await.is_unauthorized() {
            return;
        }
        self.messages.refresh_group_summaries().await;
        self.listings.refresh(Listing::Notifications).await;
        self.messages.refresh_open_threads().await;
    }

    pub async fn handle_push(&self, envelope: PushEnvelope) {
        let PushEnvelope { channel_id, event } = envelope;
        if let PushEvent::Closed = event {
            self.connection.on_transport_closed(channel_id).await;
            return;
        }
        if !self.connection.accepts(channel_id) {
            tracing::debug!(channel_id, "push: dropping event from inactive channel");
            return;
        }
        match event {
            PushEvent::Message { peer, message } => {
                let incoming = message.direction == Direction::Incoming;
                self.messages.apply_live_user_message(&peer, message);
                if incoming {
                    self.messages.refresh_summaries().await;
                }
            }
            PushEvent::GroupMessage { group_id, message } => {
                let incoming = message.sender != self.username;
                self.messages.apply_live_group_message(&group_id, message);
                if incoming {
                    self.messages.refresh_group_summaries().await;
                }
            }
            PushEvent::Notification {
                notification_type, ..
            } => {
                self.route_notification(&notification_type).await;
            }
            PushEvent::Closed => {}
        }
    }

    pub async fn route_notification(&self, notification_type: &str) -> Option<RefetchTarget> {
        let Some(target) = router::route(notification_type) else {
            tracing::debug!(notification_type, "push: unknown notification type");
            return None;
        };
        tracing::debug!(notification_type, ?target, "push: routing notification");
        self.refetch(target).await;
        Some(target)
    }

    pub async fn refetch(&self, target: RefetchTarget) -> Refresh {
        match target {
            RefetchTarget::IncomingSolicitations => self.social.get_incoming_solicitations().await,
            RefetchTarget::Friends => self.social.get_friends().await,
            RefetchTarget::Invitations => self.listings.refresh(Listing::Invitations).await,
            RefetchTarget::OwnedExits => self.listings.refresh(Listing::OwnedExits).await,
            RefetchTarget::Offers => self.listings.refresh(Listing::Offers).await,
            RefetchTarget::Notifications => self.listings.refresh(Listing::Notifications).await,
        }
    }

    /// Stop the channel and drop every cached entity. The session is unusable afterwards.
    pub async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.connection.stop_messaging_connection().await;
        self.profiles.clear();
        self.messages.clear();
        self.social.clear();
        self.listings.clear();
        tracing::info!(username = %self.username, "session closed");
    }
}

/// The one consumer of the inbound channel. Events are handled strictly in arrival order.
pub(crate) async fn run_push_consumer(session: Arc<Session>, rx: Receiver<PushEnvelope>) {
    while let Ok(envelope) = rx.recv_async().await {
        if !session.is_alive() {
            break;
        }
        session.handle_push(envelope).await;
    }
    tracing::debug!("push consumer stopped");
}
