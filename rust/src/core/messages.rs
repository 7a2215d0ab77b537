// Conversation threads: backward pagination, optimistic sends, live-record reconciliation,
// read marking and inbox summaries.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, RwLock};

use super::{lock, read, write, StoreCtx};
use crate::error::{ErrorContext, GENERIC_ERROR};
use crate::state::{
    now_seconds, ActionOutcome, Direction, GroupMessage, GroupMessageSummary, GroupThreadView,
    Message, MessageSummary, Refresh, ThreadKey, UserThreadView,
};
use crate::updates::AppUpdate;

pub(crate) trait ThreadItem: Clone {
    fn id(&self) -> Option<i64>;
    fn local_id(&self) -> Option<&str>;
    fn content(&self) -> &str;
    fn is_own(&self, me: &str) -> bool;
    fn set_waiting(&mut self, waiting: bool);
    fn normalize(&mut self) {}
}

impl ThreadItem for Message {
    fn id(&self) -> Option<i64> {
        self.id
    }

    fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    fn content(&self) -> &str {
        &self.content
    }

    fn is_own(&self, _me: &str) -> bool {
        self.direction == Direction::Outgoing
    }

    fn set_waiting(&mut self, waiting: bool) {
        self.waiting_for_ack = waiting;
    }
}

impl ThreadItem for GroupMessage {
    fn id(&self) -> Option<i64> {
        self.id
    }

    fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    fn content(&self) -> &str {
        &self.content
    }

    fn is_own(&self, me: &str) -> bool {
        self.sender == me
    }

    fn set_waiting(&mut self, waiting: bool) {
        self.waiting_for_ack = waiting;
    }

    fn normalize(&mut self) {
        self.read_by.sort();
        self.read_by.dedup();
    }
}

/// Unacknowledged sends first (newest first), then server records by descending id.
fn thread_order<M: ThreadItem>(a: &M, b: &M) -> Ordering {
    match (a.id(), b.id()) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => y.cmp(&x),
    }
}

/// Where a fetched page sits relative to what is already loaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PageKind {
    /// Strictly older than the loaded tail.
    Older,
    /// Newest page, or a page filling the gap below it. `head` is the newest server id loaded
    /// before the fetch started.
    Newer { head: Option<i64> },
}

struct Thread<M> {
    messages: Vec<M>,
    loading_more: bool,
    exhausted: bool,
    /// Local ids of sends awaiting their live record, in send order.
    pending: VecDeque<String>,
}

impl<M> Default for Thread<M> {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            loading_more: false,
            exhausted: false,
            pending: VecDeque::new(),
        }
    }
}

impl<M: ThreadItem> Thread<M> {
    fn contains_id(&self, id: i64) -> bool {
        self.messages.iter().any(|m| m.id() == Some(id))
    }

    /// Newest loaded server id.
    fn head(&self) -> Option<i64> {
        self.messages.iter().filter_map(|m| m.id()).max()
    }

    /// Merge a fetched page. Our own records newer than the previous head settle pending
    /// placeholders with the same content, oldest first, so an ack missed while the channel
    /// was down does not leave a duplicate behind.
    fn merge(&mut self, mut page: Vec<M>, me: &str, kind: PageKind) {
        page.sort_by_key(|m| m.id());
        for mut m in page {
            let Some(id) = m.id() else { continue };
            if self.contains_id(id) {
                continue;
            }
            m.normalize();
            m.set_waiting(false);
            let fresh_own = match kind {
                PageKind::Newer { head } => m.is_own(me) && head.map_or(true, |h| id > h),
                PageKind::Older => false,
            };
            if fresh_own {
                if let Some(idx) = self.take_pending_matching(m.content()) {
                    self.messages[idx] = m;
                    continue;
                }
            }
            self.messages.push(m);
        }
        self.messages.sort_by(thread_order);
    }

    fn take_pending_matching(&mut self, content: &str) -> Option<usize> {
        let pos = self.pending.iter().position(|local| {
            self.find_local(local)
                .is_some_and(|idx| self.messages[idx].content() == content)
        })?;
        let local = self.pending.remove(pos)?;
        self.find_local(&local)
    }

    /// Oldest loaded server id; the next older page is requested strictly before it.
    fn cursor(&self) -> Option<i64> {
        self.messages.iter().filter_map(|m| m.id()).min()
    }

    fn push_placeholder(&mut self, m: M) {
        if let Some(local) = m.local_id() {
            self.pending.push_back(local.to_string());
        }
        self.messages.insert(0, m);
    }

    fn find_local(&self, local_id: &str) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.id().is_none() && m.local_id() == Some(local_id))
    }

    /// Apply an authoritative live record. Our own records replace the oldest pending
    /// placeholder; everything else is a de-duplicated insert.
    fn apply_live(&mut self, mut record: M, me: &str) -> bool {
        let Some(id) = record.id() else { return false };
        if self.contains_id(id) {
            return false;
        }
        record.normalize();
        record.set_waiting(false);
        if record.is_own(me) {
            while let Some(local) = self.pending.pop_front() {
                if let Some(idx) = self.find_local(&local) {
                    self.messages[idx] = record;
                    self.messages.sort_by(thread_order);
                    return true;
                }
            }
        }
        self.messages.push(record);
        self.messages.sort_by(thread_order);
        true
    }

    fn mark_failed(&mut self, local_id: &str) {
        self.pending.retain(|l| l != local_id);
        if let Some(idx) = self.find_local(local_id) {
            self.messages[idx].set_waiting(false);
        }
    }

    /// Re-arm a failed placeholder. Returns its index, or `None` if it is not a failed send.
    fn requeue(&mut self, local_id: &str) -> Option<usize> {
        if self.pending.iter().any(|l| l == local_id) {
            return None;
        }
        let idx = self.find_local(local_id)?;
        self.messages[idx].set_waiting(true);
        self.pending.push_back(local_id.to_string());
        Some(idx)
    }
}

/// Threads of one kind keyed by peer username or group id.
struct ThreadBook<M> {
    threads: RwLock<HashMap<String, Thread<M>>>,
    // Tracked apart from the threads so marking an unopened thread does not create it.
    marking_read: Mutex<HashSet<String>>,
    key: fn(&str) -> ThreadKey,
}

impl<M: ThreadItem> ThreadBook<M> {
    fn new(key: fn(&str) -> ThreadKey) -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
            marking_read: Mutex::new(HashSet::new()),
            key,
        }
    }

    fn exists(&self, id: &str) -> bool {
        read(&self.threads).contains_key(id)
    }

    fn ensure(&self, id: &str) {
        write(&self.threads).entry(id.to_string()).or_default();
    }

    fn with<R>(&self, id: &str, f: impl FnOnce(&mut Thread<M>) -> R) -> Option<R> {
        write(&self.threads).get_mut(id).map(f)
    }

    fn head(&self, id: &str) -> Option<i64> {
        read(&self.threads).get(id).and_then(Thread::head)
    }

    /// Merge `page` into the thread. Returns the cursor of the next page to fetch when a newer
    /// page does not reach down to the previous head, i.e. there is still a hole below it.
    fn merge_page(&self, id: &str, page: Vec<M>, me: &str, kind: PageKind) -> Option<i64> {
        let oldest = page.iter().filter_map(|m| m.id()).min();
        let mut threads = write(&self.threads);
        let thread = threads.entry(id.to_string()).or_default();
        if kind == PageKind::Older && oldest.is_none() {
            thread.exhausted = true;
        }
        thread.merge(page, me, kind);
        match (kind, oldest) {
            (PageKind::Newer { head: Some(head) }, Some(oldest)) if oldest > head => Some(oldest),
            _ => None,
        }
    }

    fn ids(&self) -> Vec<String> {
        read(&self.threads).keys().cloned().collect()
    }

    fn cursor(&self, id: &str) -> Option<i64> {
        read(&self.threads).get(id).and_then(Thread::cursor)
    }

    fn begin_load_more(&self, id: &str) -> Option<FlightGuard<'_, M>> {
        let mut threads = write(&self.threads);
        let thread = threads.get_mut(id)?;
        if thread.loading_more || thread.exhausted {
            return None;
        }
        thread.loading_more = true;
        Some(FlightGuard {
            book: self,
            id: id.to_string(),
            flag: Flight::LoadingMore,
        })
    }

    fn begin_mark_read(&self, id: &str) -> Option<FlightGuard<'_, M>> {
        if !lock(&self.marking_read).insert(id.to_string()) {
            return None;
        }
        Some(FlightGuard {
            book: self,
            id: id.to_string(),
            flag: Flight::MarkingRead,
        })
    }

    fn snapshot(&self, id: &str) -> Option<(Vec<M>, bool, bool)> {
        read(&self.threads)
            .get(id)
            .map(|t| (t.messages.clone(), t.loading_more, !t.exhausted))
    }

    fn clear(&self) {
        write(&self.threads).clear();
        lock(&self.marking_read).clear();
    }
}

enum Flight {
    LoadingMore,
    MarkingRead,
}

/// Clears the thread's in-flight flag when the request settles, whichever way it goes.
struct FlightGuard<'a, M: ThreadItem> {
    book: &'a ThreadBook<M>,
    id: String,
    flag: Flight,
}

impl<M: ThreadItem> Drop for FlightGuard<'_, M> {
    fn drop(&mut self) {
        match self.flag {
            Flight::LoadingMore => {
                self.book.with(&self.id, |t| t.loading_more = false);
            }
            Flight::MarkingRead => {
                lock(&self.book.marking_read).remove(&self.id);
            }
        }
    }
}

fn peer_key(username: &str) -> ThreadKey {
    ThreadKey::Peer {
        username: username.to_string(),
    }
}

fn group_key(group_id: &str) -> ThreadKey {
    ThreadKey::Group {
        group_id: group_id.to_string(),
    }
}

pub struct MessageStore {
    ctx: StoreCtx,
    me: String,
    users: ThreadBook<Message>,
    groups: ThreadBook<GroupMessage>,
    summaries: RwLock<Vec<MessageSummary>>,
    group_summaries: RwLock<Vec<GroupMessageSummary>>,
}

impl MessageStore {
    pub(crate) fn new(ctx: StoreCtx, me: impl Into<String>) -> Self {
        Self {
            ctx,
            me: me.into(),
            users: ThreadBook::new(peer_key),
            groups: ThreadBook::new(group_key),
            summaries: RwLock::new(Vec::new()),
            group_summaries: RwLock::new(Vec::new()),
        }
    }

    fn emit_thread<M: ThreadItem>(&self, book: &ThreadBook<M>, id: &str) {
        let key = (book.key)(id);
        self.ctx
            .emitter
            .emit(|rev| AppUpdate::ThreadChanged { rev, key });
    }

    // ---- User threads ----

    pub fn user_thread_exists(&self, peer: &str) -> bool {
        self.users.exists(peer)
    }

    /// Create the thread if needed and load its newest page.
    pub async fn open_user_thread(&self, peer: &str) -> Refresh {
        self.users.ensure(peer);
        self.emit_thread(&self.users, peer);
        self.get_user_messages(peer, None).await
    }

    /// Fetch one page (`None` = newest, else strictly older than `before_id`) and merge it.
    /// A newest page that lands above a hole keeps paging down until it meets loaded history.
    pub async fn get_user_messages(&self, peer: &str, before_id: Option<i64>) -> Refresh {
        let kind = match before_id {
            None => PageKind::Newer {
                head: self.users.head(peer),
            },
            Some(_) => PageKind::Older,
        };
        self.fetch_user_pages(peer, before_id, kind).await
    }

    async fn fetch_user_pages(
        &self,
        peer: &str,
        mut before_id: Option<i64>,
        kind: PageKind,
    ) -> Refresh {
        loop {
            let res = self.ctx.backend.fetch_user_messages(peer, before_id).await;
            let page = match self.ctx.settle("fetch_user_messages", res) {
                Ok(page) => page,
                Err(r) => return r,
            };
            let hole = self.users.merge_page(peer, page, &self.me, kind);
            self.emit_thread(&self.users, peer);
            match hole {
                Some(cursor) => before_id = Some(cursor),
                None => return Refresh::Updated,
            }
        }
    }

    pub async fn load_older_user_messages(&self, peer: &str) -> Refresh {
        let Some(flight) = self.users.begin_load_more(peer) else {
            return Refresh::Skipped;
        };
        self.emit_thread(&self.users, peer);
        let cursor = self.users.cursor(peer);
        let result = self.fetch_user_pages(peer, cursor, PageKind::Older).await;
        drop(flight);
        self.emit_thread(&self.users, peer);
        result
    }

    pub async fn send_message(&self, peer: &str, content: &str) -> ActionOutcome {
        let local_id = uuid::Uuid::new_v4().to_string();
        let placeholder = Message {
            id: None,
            local_id: Some(local_id.clone()),
            timestamp: now_seconds(),
            content: content.to_string(),
            direction: Direction::Outgoing,
            read: false,
            waiting_for_ack: true,
        };
        self.users.ensure(peer);
        self.users.with(peer, |t| t.push_placeholder(placeholder));
        self.emit_thread(&self.users, peer);
        self.deliver_user(peer, &local_id, content).await
    }

    /// Re-send a placeholder whose earlier send failed.
    pub async fn retry_message(&self, peer: &str, local_id: &str) -> ActionOutcome {
        let content = self.users.with(peer, |t| {
            t.requeue(local_id).map(|idx| t.messages[idx].content.clone())
        });
        let Some(content) = content.flatten() else {
            return ActionOutcome::failed(GENERIC_ERROR);
        };
        self.emit_thread(&self.users, peer);
        self.deliver_user(peer, local_id, &content).await
    }

    async fn deliver_user(&self, peer: &str, local_id: &str, content: &str) -> ActionOutcome {
        // The thread is not refetched: the live record replaces the placeholder.
        match self.ctx.backend.send_message(peer, content).await {
            Ok(()) => {
                self.refresh_summaries().await;
                ActionOutcome::ok()
            }
            Err(e) => {
                self.users.with(peer, |t| t.mark_failed(local_id));
                self.emit_thread(&self.users, peer);
                self.ctx.note_failure("send_message", &e);
                e.into_outcome(ErrorContext::General)
            }
        }
    }

    /// Ingest a record from the push channel. Threads that were never opened are left alone.
    pub fn apply_live_user_message(&self, peer: &str, message: Message) -> bool {
        let changed = self
            .users
            .with(peer, |t| t.apply_live(message, &self.me))
            .unwrap_or(false);
        if changed {
            self.emit_thread(&self.users, peer);
        }
        changed
    }

    /// Fire-and-forget; failures are only logged. Summaries are refreshed afterwards.
    pub async fn mark_read(&self, peer: &str) {
        let Some(flight) = self.users.begin_mark_read(peer) else {
            return;
        };
        if let Err(e) = self.ctx.backend.mark_read(peer).await {
            self.ctx.note_failure("mark_read", &e);
        }
        drop(flight);
        self.refresh_summaries().await;
    }

    pub fn user_thread(&self, peer: &str) -> Option<UserThreadView> {
        self.users
            .snapshot(peer)
            .map(|(messages, loading_more, can_load_older)| UserThreadView {
                peer: peer.to_string(),
                messages,
                loading_more,
                can_load_older,
            })
    }

    // ---- Group threads ----

    pub fn group_thread_exists(&self, group_id: &str) -> bool {
        self.groups.exists(group_id)
    }

    pub async fn open_group_thread(&self, group_id: &str) -> Refresh {
        self.groups.ensure(group_id);
        self.emit_thread(&self.groups, group_id);
        self.get_group_messages(group_id, None).await
    }

    pub async fn get_group_messages(&self, group_id: &str, before_id: Option<i64>) -> Refresh {
        let kind = match before_id {
            None => PageKind::Newer {
                head: self.groups.head(group_id),
            },
            Some(_) => PageKind::Older,
        };
        self.fetch_group_pages(group_id, before_id, kind).await
    }

    async fn fetch_group_pages(
        &self,
        group_id: &str,
        mut before_id: Option<i64>,
        kind: PageKind,
    ) -> Refresh {
        loop {
            let res = self
                .ctx
                .backend
                .fetch_group_messages(group_id, before_id)
                .await;
            let page = match self.ctx.settle("fetch_group_messages", res) {
                Ok(page) => page,
                Err(r) => return r,
            };
            let hole = self.groups.merge_page(group_id, page, &self.me, kind);
            self.emit_thread(&self.groups, group_id);
            match hole {
                Some(cursor) => before_id = Some(cursor),
                None => return Refresh::Updated,
            }
        }
    }

    pub async fn load_older_group_messages(&self, group_id: &str) -> Refresh {
        let Some(flight) = self.groups.begin_load_more(group_id) else {
            return Refresh::Skipped;
        };
        self.emit_thread(&self.groups, group_id);
        let cursor = self.groups.cursor(group_id);
        let result = self.fetch_group_pages(group_id, cursor, PageKind::Older).await;
        drop(flight);
        self.emit_thread(&self.groups, group_id);
        result
    }

    pub async fn send_group_message(&self, group_id: &str, content: &str) -> ActionOutcome {
        let local_id = uuid::Uuid::new_v4().to_string();
        let placeholder = GroupMessage {
            id: None,
            local_id: Some(local_id.clone()),
            sender: self.me.clone(),
            timestamp: now_seconds(),
            content: content.to_string(),
            read_by: vec![],
            waiting_for_ack: true,
        };
        self.groups.ensure(group_id);
        self.groups.with(group_id, |t| t.push_placeholder(placeholder));
        self.emit_thread(&self.groups, group_id);
        self.deliver_group(group_id, &local_id, content).await
    }

    pub async fn retry_group_message(&self, group_id: &str, local_id: &str) -> ActionOutcome {
        let content = self.groups.with(group_id, |t| {
            t.requeue(local_id).map(|idx| t.messages[idx].content.clone())
        });
        let Some(content) = content.flatten() else {
            return ActionOutcome::failed(GENERIC_ERROR);
        };
        self.emit_thread(&self.groups, group_id);
        self.deliver_group(group_id, local_id, &content).await
    }

    async fn deliver_group(&self, group_id: &str, local_id: &str, content: &str) -> ActionOutcome {
        match self.ctx.backend.send_group_message(group_id, content).await {
            Ok(()) => {
                self.refresh_group_summaries().await;
                ActionOutcome::ok()
            }
            Err(e) => {
                self.groups.with(group_id, |t| t.mark_failed(local_id));
                self.emit_thread(&self.groups, group_id);
                self.ctx.note_failure("send_group_message", &e);
                e.into_outcome(ErrorContext::General)
            }
        }
    }

    pub fn apply_live_group_message(&self, group_id: &str, message: GroupMessage) -> bool {
        let changed = self
            .groups
            .with(group_id, |t| t.apply_live(message, &self.me))
            .unwrap_or(false);
        if changed {
            self.emit_thread(&self.groups, group_id);
        }
        changed
    }

    pub async fn mark_group_message_read(&self, group_id: &str) {
        let Some(flight) = self.groups.begin_mark_read(group_id) else {
            return;
        };
        if let Err(e) = self.ctx.backend.mark_group_read(group_id).await {
            self.ctx.note_failure("mark_group_read", &e);
        }
        drop(flight);
        self.refresh_group_summaries().await;
    }

    pub fn group_thread(&self, group_id: &str) -> Option<GroupThreadView> {
        self.groups
            .snapshot(group_id)
            .map(|(messages, loading_more, can_load_older)| GroupThreadView {
                group_id: group_id.to_string(),
                messages,
                loading_more,
                can_load_older,
            })
    }

    /// Every thread opened this session.
    pub fn open_threads(&self) -> Vec<ThreadKey> {
        let mut keys: Vec<ThreadKey> = self.users.ids().iter().map(|p| peer_key(p)).collect();
        keys.extend(self.groups.ids().iter().map(|g| group_key(g)));
        keys
    }

    /// Refetch the newest page of every open thread.
    pub async fn refresh_open_threads(&self) {
        for key in self.open_threads() {
            let result = match &key {
                ThreadKey::Peer { username } => self.get_user_messages(username, None).await,
                ThreadKey::Group { group_id } => self.get_group_messages(group_id, None).await,
            };
            if result.is_unauthorized() {
                return;
            }
        }
    }

    // ---- Inbox summaries (always server-derived) ----

    pub async fn refresh_summaries(&self) -> Refresh {
        let res = self.ctx.backend.fetch_message_summaries().await;
        match self.ctx.settle("fetch_message_summaries", res) {
            Ok(list) => {
                *write(&self.summaries) = list;
                self.ctx
                    .emitter
                    .emit(|rev| AppUpdate::SummariesChanged { rev });
                Refresh::Updated
            }
            Err(r) => r,
        }
    }

    pub async fn refresh_group_summaries(&self) -> Refresh {
        let res = self.ctx.backend.fetch_group_summaries().await;
        match self.ctx.settle("fetch_group_summaries", res) {
            Ok(list) => {
                *write(&self.group_summaries) = list;
                self.ctx
                    .emitter
                    .emit(|rev| AppUpdate::SummariesChanged { rev });
                Refresh::Updated
            }
            Err(r) => r,
        }
    }

    pub fn summaries(&self) -> Vec<MessageSummary> {
        read(&self.summaries).clone()
    }

    pub fn group_summaries(&self) -> Vec<GroupMessageSummary> {
        read(&self.group_summaries).clone()
    }

    pub fn clear(&self) {
        self.users.clear();
        self.groups.clear();
        write(&self.summaries).clear();
        write(&self.group_summaries).clear();
    }
}
