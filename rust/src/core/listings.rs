// Exit feed, owned exits, invitations, offers and the notification list.

use std::future::Future;
use std::sync::RwLock;

use super::optimistic::OptimisticCoordinator;
use super::{read, write, StoreCtx};
use crate::error::{BackendResult, ErrorContext};
use crate::state::{
    ActionOutcome, Exit, Invitation, Listing, ListingsView, Notification, Offer, Refresh,
};
use crate::updates::AppUpdate;

pub const ALL_LISTINGS: [Listing; 5] = [
    Listing::Feed,
    Listing::OwnedExits,
    Listing::Invitations,
    Listing::Offers,
    Listing::Notifications,
];

/// Pre-toggle copies of an exit as it appears in each list.
#[derive(Clone)]
struct ExitSnapshot {
    feed: Option<Exit>,
    owned: Option<Exit>,
}

impl ExitSnapshot {
    fn current(&self) -> Option<&Exit> {
        self.feed.as_ref().or(self.owned.as_ref())
    }
}

fn set_attending(e: &mut Exit, on: bool) {
    if e.attending == on {
        return;
    }
    e.attending = on;
    e.attendee_count = if on {
        e.attendee_count.saturating_add(1)
    } else {
        e.attendee_count.saturating_sub(1)
    };
}

fn set_liked(e: &mut Exit, on: bool) {
    if e.liked == on {
        return;
    }
    e.liked = on;
    e.like_count = if on {
        e.like_count.saturating_add(1)
    } else {
        e.like_count.saturating_sub(1)
    };
}

pub struct ListingStore {
    ctx: StoreCtx,
    feed: RwLock<Vec<Exit>>,
    owned: RwLock<Vec<Exit>>,
    invitations: RwLock<Vec<Invitation>>,
    offers: RwLock<Vec<Offer>>,
    notifications: RwLock<Vec<Notification>>,
    coordinator: OptimisticCoordinator,
}

impl ListingStore {
    pub(crate) fn new(ctx: StoreCtx) -> Self {
        Self {
            ctx,
            feed: RwLock::new(Vec::new()),
            owned: RwLock::new(Vec::new()),
            invitations: RwLock::new(Vec::new()),
            offers: RwLock::new(Vec::new()),
            notifications: RwLock::new(Vec::new()),
            coordinator: OptimisticCoordinator::new(),
        }
    }

    fn emit(&self, listing: Listing) {
        self.ctx
            .emitter
            .emit(|rev| AppUpdate::ListingChanged { rev, listing });
    }

    fn store<T>(
        &self,
        listing: Listing,
        slot: &RwLock<Vec<T>>,
        what: &'static str,
        res: BackendResult<Vec<T>>,
    ) -> Refresh {
        match self.ctx.settle(what, res) {
            Ok(items) => {
                *write(slot) = items;
                self.emit(listing);
                Refresh::Updated
            }
            Err(r) => r,
        }
    }

    pub async fn refresh(&self, listing: Listing) -> Refresh {
        let backend = &self.ctx.backend;
        match listing {
            Listing::Feed => {
                let res = backend.fetch_feed().await;
                self.store(listing, &self.feed, "fetch_feed", res)
            }
            Listing::OwnedExits => {
                let res = backend.fetch_owned_exits().await;
                self.store(listing, &self.owned, "fetch_owned_exits", res)
            }
            Listing::Invitations => {
                let res = backend.fetch_invitations().await;
                self.store(listing, &self.invitations, "fetch_invitations", res)
            }
            Listing::Offers => {
                let res = backend.fetch_offers().await;
                self.store(listing, &self.offers, "fetch_offers", res)
            }
            Listing::Notifications => {
                let res = backend.fetch_notifications().await;
                self.store(listing, &self.notifications, "fetch_notifications", res)
            }
        }
    }

    /// Refresh every listing, stopping early if the session turned out to be expired.
    pub async fn refresh_all(&self) -> Refresh {
        let mut result = Refresh::Updated;
        for listing in ALL_LISTINGS {
            match self.refresh(listing).await {
                Refresh::Unauthorized => return Refresh::Unauthorized,
                Refresh::Failed => result = Refresh::Failed,
                _ => {}
            }
        }
        result
    }

    fn snapshot_exit(&self, exit_id: &str) -> ExitSnapshot {
        ExitSnapshot {
            feed: read(&self.feed).iter().find(|e| e.id == exit_id).cloned(),
            owned: read(&self.owned).iter().find(|e| e.id == exit_id).cloned(),
        }
    }

    fn update_exit(&self, exit_id: &str, f: impl Fn(&mut Exit)) {
        for slot in [&self.feed, &self.owned] {
            if let Some(e) = write(slot).iter_mut().find(|e| e.id == exit_id) {
                f(e);
            }
        }
        self.emit(Listing::Feed);
        self.emit(Listing::OwnedExits);
    }

    fn restore_exit(&self, snapshot: ExitSnapshot) {
        for (slot, saved) in [(&self.feed, snapshot.feed), (&self.owned, snapshot.owned)] {
            let Some(saved) = saved else { continue };
            if let Some(e) = write(slot).iter_mut().find(|e| e.id == saved.id) {
                *e = saved;
            }
        }
        self.emit(Listing::Feed);
        self.emit(Listing::OwnedExits);
    }

    async fn toggle_exit<Fut>(
        &self,
        exit_id: &str,
        what: &'static str,
        current: fn(&Exit) -> bool,
        set: fn(&mut Exit, bool),
        send: impl FnOnce(bool) -> Fut,
    ) -> ActionOutcome
    where
        Fut: Future<Output = BackendResult<()>>,
    {
        let action = self
            .coordinator
            .begin(exit_id, || self.snapshot_exit(exit_id))
            .await;
        let target = action
            .snapshot()
            .and_then(ExitSnapshot::current)
            .map(|e| !current(e));
        let Some(target) = target else {
            action.confirm();
            return ActionOutcome::failed("Not found.");
        };

        self.update_exit(exit_id, |e| set(e, target));
        match send(target).await {
            Ok(()) => {
                action.confirm();
                ActionOutcome::ok()
            }
            Err(e) => {
                tracing::warn!(exit_id, %e, what, "toggle failed; reverting");
                if let Some(before) = action.revert() {
                    self.restore_exit(before);
                }
                self.ctx.note_failure(what, &e);
                e.into_outcome(ErrorContext::General)
            }
        }
    }

    pub async fn toggle_attendance(&self, exit_id: &str) -> ActionOutcome {
        let backend = self.ctx.backend.clone();
        self.toggle_exit(
            exit_id,
            "set_attendance",
            |e| e.attending,
            set_attending,
            |on| async move { backend.set_attendance(exit_id, on).await },
        )
        .await
    }

    pub async fn toggle_like(&self, exit_id: &str) -> ActionOutcome {
        let backend = self.ctx.backend.clone();
        self.toggle_exit(
            exit_id,
            "set_like",
            |e| e.liked,
            set_liked,
            |on| async move { backend.set_like(exit_id, on).await },
        )
        .await
    }

    pub async fn accept_invitation(&self, exit_id: &str) -> ActionOutcome {
        match self.ctx.backend.accept_invitation(exit_id).await {
            Ok(()) => {
                self.refresh(Listing::Invitations).await;
                self.refresh(Listing::Feed).await;
                ActionOutcome::ok()
            }
            Err(e) => {
                self.ctx.note_failure("accept_invitation", &e);
                e.into_outcome(ErrorContext::Invite)
            }
        }
    }

    pub async fn redeem_offer(&self, token: &str) -> ActionOutcome {
        match self.ctx.backend.redeem_offer(token).await {
            Ok(()) => {
                self.refresh(Listing::Offers).await;
                ActionOutcome::ok()
            }
            Err(e) => {
                self.ctx.note_failure("redeem_offer", &e);
                e.into_outcome(ErrorContext::Redeem)
            }
        }
    }

    pub fn exit(&self, exit_id: &str) -> Option<Exit> {
        self.snapshot_exit(exit_id).current().cloned()
    }

    pub fn view(&self) -> ListingsView {
        let notifications = read(&self.notifications).clone();
        let unread = notifications.iter().filter(|n| !n.read).count();
        ListingsView {
            feed: read(&self.feed).clone(),
            owned_exits: read(&self.owned).clone(),
            invitations: read(&self.invitations).clone(),
            offers: read(&self.offers).clone(),
            unread_notifications: u32::try_from(unread).unwrap_or(u32::MAX),
            notifications,
        }
    }

    pub fn clear(&self) {
        write(&self.feed).clear();
        write(&self.owned).clear();
        write(&self.invitations).clear();
        write(&self.offers).clear();
        write(&self.notifications).clear();
    }
}
