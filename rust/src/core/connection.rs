// Push channel lifecycle: Disconnected -> Connecting -> Connected, one live handle at most.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use flume::Sender;

use super::push::{ChannelHandle, PushEnvelope, PushTransport};
use super::{read, write};
use crate::state::ConnectionState;
use crate::updates::{AppUpdate, Emitter};
use crate::TokenStore;

pub struct ConnectionManager {
    transport: Arc<dyn PushTransport>,
    tokens: Arc<dyn TokenStore>,
    sink: Sender<PushEnvelope>,
    emitter: Emitter,
    // Held across connect so concurrent callers serialize; never Connecting twice.
    handle: tokio::sync::Mutex<Option<ChannelHandle>>,
    state: RwLock<ConnectionState>,
    current_channel: AtomicU64,
    next_channel: AtomicU64,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn PushTransport>,
        tokens: Arc<dyn TokenStore>,
        sink: Sender<PushEnvelope>,
        emitter: Emitter,
    ) -> Self {
        Self {
            transport,
            tokens,
            sink,
            emitter,
            handle: tokio::sync::Mutex::new(None),
            state: RwLock::new(ConnectionState::Disconnected),
            current_channel: AtomicU64::new(0),
            next_channel: AtomicU64::new(1),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *read(&self.state)
    }

    fn set_state(&self, next: ConnectionState) {
        {
            let mut state = write(&self.state);
            if *state == next {
                return;
            }
            tracing::info!(from = ?*state, to = ?next, "connection state");
            *state = next;
        }
        self.emitter
            .emit(|rev| AppUpdate::ConnectionChanged { rev, state: next });
    }

    /// Whether an inbound event from `channel_id` may be applied.
    pub fn accepts(&self, channel_id: u64) -> bool {
        self.state() == ConnectionState::Connected
            && self.current_channel.load(Ordering::SeqCst) == channel_id
    }

    /// Connect unless already connected. Returns the resulting state.
    pub async fn check_and_initialize_messaging(&self) -> ConnectionState {
        let mut handle = self.handle.lock().await;
        if handle.is_some() && self.state() == ConnectionState::Connected {
            return ConnectionState::Connected;
        }
        if let Some(stale) = handle.take() {
            stale.close();
        }

        self.set_state(ConnectionState::Connecting);
        let channel_id = self.next_channel.fetch_add(1, Ordering::SeqCst);
        let token = self.tokens.get_token();
        match self
            .transport
            .connect(channel_id, token, self.sink.clone())
            .await
        {
            Ok(h) => {
                self.current_channel.store(h.id, Ordering::SeqCst);
                *handle = Some(h);
                self.set_state(ConnectionState::Connected);
            }
            Err(e) => {
                tracing::warn!(%e, channel_id, "push channel connect failed");
                self.set_state(ConnectionState::Disconnected);
            }
        }
        self.state()
    }

    /// Tear the channel down. Always ends Disconnected.
    pub async fn stop_messaging_connection(&self) {
        let mut handle = self.handle.lock().await;
        self.teardown(&mut handle);
    }

    /// Forget the believed-live channel so the next check reconnects. Used on resume, when the
    /// OS may have killed the socket without telling us.
    pub async fn reset_messages(&self) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            tracing::info!("resetting push channel");
        }
        self.teardown(&mut handle);
    }

    /// Transport for `channel_id` died on its own. Ignored unless it is the current channel.
    pub async fn on_transport_closed(&self, channel_id: u64) {
        let mut handle = self.handle.lock().await;
        if self.current_channel.load(Ordering::SeqCst) != channel_id {
            tracing::debug!(channel_id, "close from stale channel ignored");
            return;
        }
        self.teardown(&mut handle);
    }

    fn teardown(&self, handle: &mut Option<ChannelHandle>) {
        if let Some(h) = handle.take() {
            h.close();
        }
        self.current_channel.store(0, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
    }
}
