use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::{Semaphore, SemaphorePermit};

use super::{read, write};
use crate::state::PictureRef;

pub fn new_fetch_semaphore(max_concurrent: usize) -> Arc<Semaphore> {
    Arc::new(Semaphore::new(max_concurrent.max(1)))
}

/// Session-lifetime memo of signed picture references, keyed by username. No TTL: an entry only
/// changes through an explicit refetch.
pub(crate) struct PictureMemo {
    refs: RwLock<HashMap<String, PictureRef>>,
    semaphore: Arc<Semaphore>,
}

impl PictureMemo {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            refs: RwLock::new(HashMap::new()),
            semaphore: new_fetch_semaphore(max_concurrent),
        }
    }

    pub fn get(&self, username: &str) -> Option<PictureRef> {
        read(&self.refs).get(username).cloned()
    }

    pub fn contains(&self, username: &str) -> bool {
        read(&self.refs).contains_key(username)
    }

    pub fn insert(&self, picture: PictureRef) {
        write(&self.refs).insert(picture.username.clone(), picture);
    }

    pub fn remove(&self, username: &str) -> Option<PictureRef> {
        write(&self.refs).remove(username)
    }

    pub fn clear(&self) {
        write(&self.refs).clear();
    }

    /// `None` only if the semaphore was closed, which never happens for a live session.
    pub async fn permit(&self) -> Option<SemaphorePermit<'_>> {
        self.semaphore.acquire().await.ok()
    }
}
