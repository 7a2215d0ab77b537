// Memoized profiles (detailed + light projections) and picture references.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use super::profile_pics::PictureMemo;
use super::{read, write, StoreCtx};
use crate::error::{BackendResult, ErrorContext};
use crate::state::{ActionOutcome, CachedUser, ExitUserQuery, PictureRef, Profile};
use crate::updates::AppUpdate;

pub struct ProfileCache {
    ctx: StoreCtx,
    me: String,
    detailed: RwLock<HashMap<String, Arc<Profile>>>,
    light: RwLock<HashMap<String, ExitUserQuery>>,
    pictures: PictureMemo,
}

impl ProfileCache {
    pub(crate) fn new(ctx: StoreCtx, me: impl Into<String>, max_concurrent_pfp_fetches: usize) -> Self {
        Self {
            ctx,
            me: me.into(),
            detailed: RwLock::new(HashMap::new()),
            light: RwLock::new(HashMap::new()),
            pictures: PictureMemo::new(max_concurrent_pfp_fetches),
        }
    }

    /// Detailed profile, fetched on a miss. A cached entry is returned as the same shared value.
    /// Failures yield `None`.
    pub async fn get_user(&self, username: &str) -> Option<Arc<Profile>> {
        if let Some(p) = self.get_user_cached(username) {
            return Some(p);
        }
        match self.ctx.backend.fetch_user(username).await {
            Ok(profile) => Some(self.insert(profile)),
            Err(e) => {
                self.ctx.note_failure("fetch_user", &e);
                None
            }
        }
    }

    pub fn get_user_cached(&self, username: &str) -> Option<Arc<Profile>> {
        read(&self.detailed).get(username).cloned()
    }

    /// Whichever projection is cached, detailed first. Never fetches.
    pub fn get_user_unstable(&self, username: &str) -> Option<CachedUser> {
        if let Some(p) = self.get_user_cached(username) {
            return Some(CachedUser::Detailed((*p).clone()));
        }
        read(&self.light)
            .get(username)
            .cloned()
            .map(CachedUser::Light)
    }

    pub fn has_user(&self, username: &str) -> bool {
        read(&self.detailed).contains_key(username) || read(&self.light).contains_key(username)
    }

    pub(crate) fn insert(&self, profile: Profile) -> Arc<Profile> {
        let username = profile.username.clone();
        let profile = Arc::new(profile);
        write(&self.detailed).insert(username.clone(), profile.clone());
        self.ctx
            .emitter
            .emit(|rev| AppUpdate::ProfileChanged { rev, username });
        profile
    }

    /// Own profile including its event status.
    pub async fn fetch_self(&self) -> BackendResult<Arc<Profile>> {
        match self.ctx.backend.fetch_self().await {
            Ok(profile) => Ok(self.insert(profile)),
            Err(e) => {
                self.ctx.note_failure("fetch_self", &e);
                Err(e)
            }
        }
    }

    /// Bulk insert of light projections from visitor / attendee listings.
    pub fn warm(&self, users: &[ExitUserQuery]) {
        {
            let mut light = write(&self.light);
            for u in users {
                light.insert(u.username.clone(), u.clone());
            }
        }
        for u in users {
            let username = u.username.clone();
            self.ctx
                .emitter
                .emit(|rev| AppUpdate::ProfileChanged { rev, username });
        }
    }

    pub async fn fetch_attendees(&self, exit_id: &str) -> Option<Vec<ExitUserQuery>> {
        match self.ctx.backend.fetch_attendees(exit_id).await {
            Ok(users) => {
                self.warm(&users);
                Some(users)
            }
            Err(e) => {
                self.ctx.note_failure("fetch_attendees", &e);
                None
            }
        }
    }

    pub fn picture_cached(&self, username: &str) -> Option<PictureRef> {
        self.pictures.get(username)
    }

    pub async fn fetch_pfp(&self, username: &str) -> Option<PictureRef> {
        if let Some(p) = self.pictures.get(username) {
            return Some(p);
        }
        let res = {
            let _permit = self.pictures.permit().await?;
            self.ctx.backend.fetch_picture(username).await
        };
        self.settle_picture(username, res)
    }

    /// Own picture; same memo, keyed by the signed-in username.
    pub async fn fetch_user_pfp(&self) -> Option<PictureRef> {
        if let Some(p) = self.pictures.get(&self.me) {
            return Some(p);
        }
        let res = {
            let _permit = self.pictures.permit().await?;
            self.ctx.backend.fetch_own_picture().await
        };
        let res = res.map(|url| PictureRef {
            username: self.me.clone(),
            url,
        });
        self.settle_picture(&self.me, res)
    }

    /// Drop the memoized reference and fetch it again.
    pub async fn refresh_pfp(&self, username: &str) -> Option<PictureRef> {
        self.pictures.remove(username);
        if username == self.me {
            self.fetch_user_pfp().await
        } else {
            self.fetch_pfp(username).await
        }
    }

    fn settle_picture(&self, username: &str, res: BackendResult<PictureRef>) -> Option<PictureRef> {
        match res {
            Ok(picture) => {
                self.pictures.insert(picture.clone());
                let username = username.to_string();
                self.ctx
                    .emitter
                    .emit(|rev| AppUpdate::PictureChanged { rev, username });
                Some(picture)
            }
            Err(e) => {
                self.pictures.remove(username);
                self.ctx.note_failure("fetch_picture", &e);
                None
            }
        }
    }

    /// Fire-and-forget fetch of every uncached picture; concurrency is bounded by the memo's
    /// semaphore.
    pub fn prefetch_pfps(self: &Arc<Self>, usernames: Vec<String>) {
        let mut seen = HashSet::new();
        for username in usernames {
            if self.pictures.contains(&username) || !seen.insert(username.clone()) {
                continue;
            }
            let cache = self.clone();
            tokio::spawn(async move {
                cache.fetch_pfp(&username).await;
            });
        }
    }

    /// Upload a new own picture, then refetch its reference. This is the only path that
    /// invalidates a cached picture.
    pub async fn upload_picture(&self, bytes: Vec<u8>) -> ActionOutcome {
        match self.ctx.backend.upload_picture(bytes).await {
            Ok(()) => {
                if self.refresh_pfp(&self.me.clone()).await.is_none() {
                    tracing::warn!("picture uploaded but reference refetch failed");
                }
                ActionOutcome::ok()
            }
            Err(e) => {
                self.ctx.note_failure("upload_picture", &e);
                e.into_outcome(ErrorContext::General)
            }
        }
    }

    pub fn clear(&self) {
        write(&self.detailed).clear();
        write(&self.light).clear();
        self.pictures.clear();
    }
}
