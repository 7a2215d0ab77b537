// In-memory backend and push transport for store tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flume::{Receiver, Sender};
use tokio::sync::{oneshot, Semaphore};

use super::backend::Backend;
use super::push::{ChannelHandle, PushEnvelope, PushEvent, PushTransport};
use super::StoreCtx;
use crate::error::{BackendError, BackendResult};
use crate::state::*;
use crate::updates::{AppUpdate, CoreMsg, Emitter};

#[derive(Debug, Clone)]
pub(crate) enum FailMode {
    Unauthorized,
    Network,
    Code(u16, &'static str),
}

impl FailMode {
    fn to_error(&self) -> BackendError {
        match self {
            FailMode::Unauthorized => BackendError::Unauthorized,
            FailMode::Network => BackendError::Network("connection refused".into()),
            FailMode::Code(status, code) => BackendError::Api {
                status: *status,
                code: code.to_string(),
            },
        }
    }
}

pub(crate) struct FakeData {
    pub me: Profile,
    pub profiles: HashMap<String, Profile>,
    pub attendees: HashMap<String, Vec<ExitUserQuery>>,
    pub pictures: HashMap<String, String>,
    pub own_picture: String,
    pub user_messages: HashMap<String, Vec<Message>>,
    pub group_messages: HashMap<String, Vec<GroupMessage>>,
    pub page_size: usize,
    pub summaries: Vec<MessageSummary>,
    pub group_summaries: Vec<GroupMessageSummary>,
    pub friends: Vec<String>,
    pub incoming: Vec<String>,
    pub outgoing: Vec<String>,
    pub search: Vec<ExitUserQuery>,
    pub feed: Vec<Exit>,
    pub owned: Vec<Exit>,
    pub invitations: Vec<Invitation>,
    pub offers: Vec<Offer>,
    pub notifications: Vec<Notification>,
    pub sent: Vec<(String, String)>,
    pub uploads: Vec<Vec<u8>>,
}

impl Default for FakeData {
    fn default() -> Self {
        Self {
            me: profile("me"),
            profiles: HashMap::new(),
            attendees: HashMap::new(),
            pictures: HashMap::new(),
            own_picture: "https://cdn.test/me-1.jpg".into(),
            user_messages: HashMap::new(),
            group_messages: HashMap::new(),
            page_size: 20,
            summaries: vec![],
            group_summaries: vec![],
            friends: vec![],
            incoming: vec![],
            outgoing: vec![],
            search: vec![],
            feed: vec![],
            owned: vec![],
            invitations: vec![],
            offers: vec![],
            notifications: vec![],
            sent: vec![],
            uploads: vec![],
        }
    }
}

#[derive(Default)]
pub(crate) struct FakeBackend {
    data: Mutex<FakeData>,
    calls: Mutex<HashMap<&'static str, usize>>,
    failures: Mutex<HashMap<&'static str, FailMode>>,
    gates: Mutex<HashMap<&'static str, Arc<Semaphore>>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeData) -> R) -> R {
        f(&mut self.data.lock().unwrap())
    }

    pub fn fail(&self, endpoint: &'static str, mode: FailMode) {
        self.failures.lock().unwrap().insert(endpoint, mode);
    }

    pub fn heal(&self, endpoint: &'static str) {
        self.failures.lock().unwrap().remove(endpoint);
    }

    pub fn calls(&self, endpoint: &'static str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(endpoint)
            .copied()
            .unwrap_or(0)
    }

    /// Park every call to `endpoint` until a permit is added to the returned semaphore.
    pub fn gate(&self, endpoint: &'static str) -> Arc<Semaphore> {
        let sem = Arc::new(Semaphore::new(0));
        self.gates.lock().unwrap().insert(endpoint, sem.clone());
        sem
    }

    async fn enter(&self, endpoint: &'static str) -> BackendResult<()> {
        *self.calls.lock().unwrap().entry(endpoint).or_insert(0) += 1;
        let gate = self.gates.lock().unwrap().get(endpoint).cloned();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        match self.failures.lock().unwrap().get(endpoint) {
            Some(mode) => Err(mode.to_error()),
            None => Ok(()),
        }
    }

    fn page<M: Clone>(all: &[M], id: impl Fn(&M) -> Option<i64>, before: Option<i64>, n: usize) -> Vec<M> {
        let mut v: Vec<M> = all
            .iter()
            .filter(|m| match (id(m), before) {
                (Some(i), Some(b)) => i < b,
                (Some(_), None) => true,
                (None, _) => false,
            })
            .cloned()
            .collect();
        v.sort_by_key(|m| std::cmp::Reverse(id(m)));
        v.truncate(n);
        v
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn fetch_self(&self) -> BackendResult<Profile> {
        self.enter("fetch_self").await?;
        Ok(self.with(|d| d.me.clone()))
    }

    async fn delete_account(&self) -> BackendResult<()> {
        self.enter("delete_account").await
    }

    async fn fetch_user(&self, username: &str) -> BackendResult<Profile> {
        self.enter("fetch_user").await?;
        self.with(|d| d.profiles.get(username).cloned())
            .ok_or(BackendError::NotFound)
    }

    async fn fetch_attendees(&self, exit_id: &str) -> BackendResult<Vec<ExitUserQuery>> {
        self.enter("fetch_attendees").await?;
        Ok(self.with(|d| d.attendees.get(exit_id).cloned().unwrap_or_default()))
    }

    async fn fetch_picture(&self, username: &str) -> BackendResult<PictureRef> {
        self.enter("fetch_picture").await?;
        let url = self
            .with(|d| d.pictures.get(username).cloned())
            .ok_or(BackendError::NotFound)?;
        Ok(PictureRef {
            username: username.to_string(),
            url,
        })
    }

    async fn fetch_own_picture(&self) -> BackendResult<String> {
        self.enter("fetch_own_picture").await?;
        Ok(self.with(|d| d.own_picture.clone()))
    }

    async fn upload_picture(&self, bytes: Vec<u8>) -> BackendResult<()> {
        self.enter("upload_picture").await?;
        self.with(|d| {
            d.uploads.push(bytes);
            d.own_picture = format!("https://cdn.test/me-{}.jpg", d.uploads.len() + 1);
        });
        Ok(())
    }

    async fn fetch_user_messages(
        &self,
        peer: &str,
        before_id: Option<i64>,
    ) -> BackendResult<Vec<Message>> {
        self.enter("fetch_user_messages").await?;
        Ok(self.with(|d| {
            let all = d.user_messages.get(peer).cloned().unwrap_or_default();
            Self::page(&all, |m| m.id, before_id, d.page_size)
        }))
    }

    async fn fetch_group_messages(
        &self,
        group_id: &str,
        before_id: Option<i64>,
    ) -> BackendResult<Vec<GroupMessage>> {
        self.enter("fetch_group_messages").await?;
        Ok(self.with(|d| {
            let all = d.group_messages.get(group_id).cloned().unwrap_or_default();
            Self::page(&all, |m| m.id, before_id, d.page_size)
        }))
    }

    async fn send_message(&self, peer: &str, content: &str) -> BackendResult<()> {
        self.enter("send_message").await?;
        self.with(|d| {
            d.sent.push((peer.to_string(), content.to_string()));
            let record = msg(next_server_id(), content, Direction::Outgoing);
            d.user_messages.entry(peer.to_string()).or_default().push(record);
        });
        Ok(())
    }

    async fn send_group_message(&self, group_id: &str, content: &str) -> BackendResult<()> {
        self.enter("send_group_message").await?;
        self.with(|d| {
            d.sent.push((group_id.to_string(), content.to_string()));
            let record = group_msg(next_server_id(), &d.me.username, content);
            d.group_messages
                .entry(group_id.to_string())
                .or_default()
                .push(record);
        });
        Ok(())
    }

    async fn mark_read(&self, _peer: &str) -> BackendResult<()> {
        self.enter("mark_read").await
    }

    async fn mark_group_read(&self, _group_id: &str) -> BackendResult<()> {
        self.enter("mark_group_read").await
    }

    async fn fetch_message_summaries(&self) -> BackendResult<Vec<MessageSummary>> {
        self.enter("fetch_message_summaries").await?;
        Ok(self.with(|d| d.summaries.clone()))
    }

    async fn fetch_group_summaries(&self) -> BackendResult<Vec<GroupMessageSummary>> {
        self.enter("fetch_group_summaries").await?;
        Ok(self.with(|d| d.group_summaries.clone()))
    }

    async fn fetch_friends(&self) -> BackendResult<Vec<String>> {
        self.enter("fetch_friends").await?;
        Ok(self.with(|d| d.friends.clone()))
    }

    async fn fetch_incoming_solicitations(&self) -> BackendResult<Vec<String>> {
        self.enter("fetch_incoming_solicitations").await?;
        Ok(self.with(|d| d.incoming.clone()))
    }

    async fn fetch_outgoing_solicitations(&self) -> BackendResult<Vec<String>> {
        self.enter("fetch_outgoing_solicitations").await?;
        Ok(self.with(|d| d.outgoing.clone()))
    }

    async fn follow(&self, username: &str) -> BackendResult<()> {
        self.enter("follow").await?;
        self.with(|d| d.outgoing.push(username.to_string()));
        Ok(())
    }

    async fn unfollow(&self, username: &str) -> BackendResult<()> {
        self.enter("unfollow").await?;
        self.with(|d| {
            d.outgoing.retain(|u| u != username);
            d.friends.retain(|u| u != username);
        });
        Ok(())
    }

    async fn accept_solicitation(&self, username: &str) -> BackendResult<()> {
        self.enter("accept_solicitation").await?;
        self.with(|d| {
            d.incoming.retain(|u| u != username);
            d.friends.push(username.to_string());
        });
        Ok(())
    }

    async fn reject_solicitation(&self, username: &str) -> BackendResult<()> {
        self.enter("reject_solicitation").await?;
        self.with(|d| d.incoming.retain(|u| u != username));
        Ok(())
    }

    async fn search_users(&self, query: &str) -> BackendResult<Vec<ExitUserQuery>> {
        self.enter("search_users").await?;
        Ok(self.with(|d| {
            d.search
                .iter()
                .filter(|u| u.username.contains(query))
                .cloned()
                .collect()
        }))
    }

    async fn fetch_feed(&self) -> BackendResult<Vec<Exit>> {
        self.enter("fetch_feed").await?;
        Ok(self.with(|d| d.feed.clone()))
    }

    async fn fetch_owned_exits(&self) -> BackendResult<Vec<Exit>> {
        self.enter("fetch_owned_exits").await?;
        Ok(self.with(|d| d.owned.clone()))
    }

    async fn fetch_invitations(&self) -> BackendResult<Vec<Invitation>> {
        self.enter("fetch_invitations").await?;
        Ok(self.with(|d| d.invitations.clone()))
    }

    async fn fetch_offers(&self) -> BackendResult<Vec<Offer>> {
        self.enter("fetch_offers").await?;
        Ok(self.with(|d| d.offers.clone()))
    }

    async fn fetch_notifications(&self) -> BackendResult<Vec<Notification>> {
        self.enter("fetch_notifications").await?;
        Ok(self.with(|d| d.notifications.clone()))
    }

    async fn set_attendance(&self, _exit_id: &str, _attending: bool) -> BackendResult<()> {
        self.enter("set_attendance").await
    }

    async fn set_like(&self, _exit_id: &str, _liked: bool) -> BackendResult<()> {
        self.enter("set_like").await
    }

    async fn accept_invitation(&self, exit_id: &str) -> BackendResult<()> {
        self.enter("accept_invitation").await?;
        self.with(|d| d.invitations.retain(|i| i.exit_id != exit_id));
        Ok(())
    }

    async fn redeem_offer(&self, _token: &str) -> BackendResult<()> {
        self.enter("redeem_offer").await
    }
}

/// Push transport whose channels are driven by the test.
#[derive(Default)]
pub(crate) struct FakeTransport {
    connects: AtomicUsize,
    fail_connect: AtomicBool,
    channels: Mutex<Vec<(u64, Sender<PushEnvelope>, oneshot::Receiver<()>)>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn gate(&self) -> Arc<Semaphore> {
        let sem = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(sem.clone());
        sem
    }

    /// Channels whose handle has been neither closed nor dropped.
    pub fn live_channels(&self) -> usize {
        let mut channels = self.channels.lock().unwrap();
        channels
            .iter_mut()
            .map(|(_, _, rx)| rx.try_recv())
            .filter(|r| matches!(r, Err(oneshot::error::TryRecvError::Empty)))
            .count()
    }

    pub fn latest_channel(&self) -> Option<u64> {
        self.channels.lock().unwrap().last().map(|(id, _, _)| *id)
    }

    /// Deliver an event on the most recently opened channel.
    pub fn inject(&self, event: PushEvent) -> Option<PushEnvelope> {
        let channels = self.channels.lock().unwrap();
        let (channel_id, sink, _) = channels.last()?;
        let envelope = PushEnvelope {
            channel_id: *channel_id,
            event,
        };
        sink.send(envelope.clone()).ok()?;
        Some(envelope)
    }
}

#[async_trait]
impl PushTransport for FakeTransport {
    async fn connect(
        &self,
        channel_id: u64,
        _token: Option<String>,
        sink: Sender<PushEnvelope>,
    ) -> anyhow::Result<ChannelHandle> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            anyhow::bail!("connection refused");
        }
        let (tx, rx) = oneshot::channel();
        self.channels.lock().unwrap().push((channel_id, sink, rx));
        Ok(ChannelHandle::new(channel_id, tx))
    }
}

static LOCAL_IDS: AtomicU64 = AtomicU64::new(0);
static SERVER_IDS: AtomicI64 = AtomicI64::new(10_000);

pub(crate) fn next_server_id() -> i64 {
    SERVER_IDS.fetch_add(1, Ordering::SeqCst)
}

pub(crate) fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", LOCAL_IDS.fetch_add(1, Ordering::SeqCst))
}

pub(crate) struct TestCtx {
    pub ctx: StoreCtx,
    pub updates: Receiver<AppUpdate>,
    pub core_rx: Receiver<CoreMsg>,
}

pub(crate) fn test_ctx(backend: Arc<FakeBackend>) -> TestCtx {
    let (update_tx, updates) = flume::unbounded();
    let (core_tx, core_rx) = flume::unbounded();
    TestCtx {
        ctx: StoreCtx::new(backend, Emitter::new(update_tx), core_tx),
        updates,
        core_rx,
    }
}

impl TestCtx {
    pub fn drain_updates(&self) -> Vec<AppUpdate> {
        self.updates.try_iter().collect()
    }

    pub fn session_expired(&self) -> bool {
        self.core_rx.try_iter().any(|m| {
            matches!(
                m,
                CoreMsg::Internal(ref ev) if matches!(**ev, crate::updates::InternalEvent::SessionExpired)
            )
        })
    }
}

pub(crate) fn profile(username: &str) -> Profile {
    Profile {
        username: username.to_string(),
        gender: "f".into(),
        name: Some(format!("{username} name")),
        description: None,
        instagram: None,
        note: None,
        age: Some(27),
        event_status: None,
    }
}

pub(crate) fn light(username: &str) -> ExitUserQuery {
    ExitUserQuery {
        username: username.to_string(),
        gender: "m".into(),
        name: None,
        age: Some(30),
    }
}

pub(crate) fn msg(id: i64, content: &str, direction: Direction) -> Message {
    Message {
        id: Some(id),
        local_id: None,
        timestamp: 1_700_000_000 + id,
        content: content.to_string(),
        direction,
        read: false,
        waiting_for_ack: false,
    }
}

pub(crate) fn group_msg(id: i64, sender: &str, content: &str) -> GroupMessage {
    GroupMessage {
        id: Some(id),
        local_id: None,
        sender: sender.to_string(),
        timestamp: 1_700_000_000 + id,
        content: content.to_string(),
        read_by: vec![],
        waiting_for_ack: false,
    }
}

pub(crate) fn exit(id: &str, liked: bool, like_count: u32) -> Exit {
    Exit {
        id: id.to_string(),
        title: format!("exit {id}"),
        owner: "ana".into(),
        starts_at: 1_700_100_000,
        location_id: None,
        attendee_count: 3,
        attending: false,
        like_count,
        liked,
    }
}
