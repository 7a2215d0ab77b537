// Friends and follow requests, with optimistic relation changes.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Mutex, RwLock};

use super::optimistic::OptimisticCoordinator;
use super::{lock, read, write, StoreCtx};
use crate::error::{BackendResult, ErrorContext};
use crate::state::{ActionOutcome, ExitUserQuery, Refresh, Relation, SocialGraphView};
use crate::updates::AppUpdate;

/// Three disjoint username sets. Kept ordered so a restored snapshot is indistinguishable from
/// the original.
#[derive(Default)]
struct Graph {
    friends: BTreeSet<String>,
    incoming: BTreeSet<String>,
    outgoing: BTreeSet<String>,
}

impl Graph {
    fn relation_of(&self, username: &str) -> Relation {
        if self.friends.contains(username) {
            Relation::Friend
        } else if self.incoming.contains(username) {
            Relation::Incoming
        } else if self.outgoing.contains(username) {
            Relation::Outgoing
        } else {
            Relation::Unrelated
        }
    }

    fn set_relation(&mut self, username: &str, relation: Relation) {
        self.friends.remove(username);
        self.incoming.remove(username);
        self.outgoing.remove(username);
        let set = match relation {
            Relation::Unrelated => return,
            Relation::Friend => &mut self.friends,
            Relation::Incoming => &mut self.incoming,
            Relation::Outgoing => &mut self.outgoing,
        };
        set.insert(username.to_string());
    }

    /// Replace one set wholesale; names it now holds leave the other two.
    fn replace(&mut self, which: Relation, names: Vec<String>) {
        let names: BTreeSet<String> = names.into_iter().collect();
        let (target, a, b) = match which {
            Relation::Friend => (&mut self.friends, &mut self.incoming, &mut self.outgoing),
            Relation::Incoming => (&mut self.incoming, &mut self.friends, &mut self.outgoing),
            Relation::Outgoing => (&mut self.outgoing, &mut self.friends, &mut self.incoming),
            Relation::Unrelated => return,
        };
        a.retain(|n| !names.contains(n));
        b.retain(|n| !names.contains(n));
        *target = names;
    }
}

pub struct SocialGraphStore {
    ctx: StoreCtx,
    graph: RwLock<Graph>,
    loading: Mutex<HashSet<String>>,
    coordinator: OptimisticCoordinator,
}

impl SocialGraphStore {
    pub(crate) fn new(ctx: StoreCtx) -> Self {
        Self {
            ctx,
            graph: RwLock::new(Graph::default()),
            loading: Mutex::new(HashSet::new()),
            coordinator: OptimisticCoordinator::new(),
        }
    }

    fn emit(&self) {
        self.ctx
            .emitter
            .emit(|rev| AppUpdate::SocialGraphChanged { rev });
    }

    fn replace_set(
        &self,
        which: Relation,
        what: &'static str,
        res: BackendResult<Vec<String>>,
    ) -> Refresh {
        match self.ctx.settle(what, res) {
            Ok(names) => {
                write(&self.graph).replace(which, names);
                self.emit();
                Refresh::Updated
            }
            Err(r) => r,
        }
    }

    pub async fn get_friends(&self) -> Refresh {
        let res = self.ctx.backend.fetch_friends().await;
        self.replace_set(Relation::Friend, "fetch_friends", res)
    }

    pub async fn get_incoming_solicitations(&self) -> Refresh {
        let res = self.ctx.backend.fetch_incoming_solicitations().await;
        self.replace_set(Relation::Incoming, "fetch_incoming_solicitations", res)
    }

    pub async fn get_outgoing_solicitations(&self) -> Refresh {
        let res = self.ctx.backend.fetch_outgoing_solicitations().await;
        self.replace_set(Relation::Outgoing, "fetch_outgoing_solicitations", res)
    }

    pub fn relation_of(&self, username: &str) -> Relation {
        read(&self.graph).relation_of(username)
    }

    pub fn is_loading(&self, username: &str) -> bool {
        lock(&self.loading).contains(username)
    }

    /// Optimistically move `username` to `next`, restoring its previous relation on failure.
    async fn change_relation(
        &self,
        username: &str,
        next: Relation,
        what: &'static str,
        request: impl std::future::Future<Output = BackendResult<()>>,
    ) -> ActionOutcome {
        let res = self
            .coordinator
            .run(
                username,
                || self.relation_of(username),
                |_| {
                    write(&self.graph).set_relation(username, next);
                    self.emit();
                },
                |before| {
                    write(&self.graph).set_relation(username, before);
                    self.emit();
                },
                || request,
            )
            .await;
        match res {
            Ok(()) => ActionOutcome::ok(),
            Err(e) => {
                self.ctx.note_failure(what, &e);
                e.into_outcome(ErrorContext::General)
            }
        }
    }

    /// The caller refetches outgoing requests afterwards.
    pub async fn follow_user(&self, username: &str) -> ActionOutcome {
        let request = self.ctx.backend.follow(username);
        self.change_relation(username, Relation::Outgoing, "follow", request)
            .await
    }

    /// The caller refetches friends and outgoing requests afterwards.
    pub async fn unfollow_user(&self, username: &str) -> ActionOutcome {
        let request = self.ctx.backend.unfollow(username);
        self.change_relation(username, Relation::Unrelated, "unfollow", request)
            .await
    }

    pub async fn accept_solicitation(&self, username: &str) -> ActionOutcome {
        self.answer_solicitation(username, true).await
    }

    pub async fn reject_solicitation(&self, username: &str) -> ActionOutcome {
        self.answer_solicitation(username, false).await
    }

    async fn answer_solicitation(&self, username: &str, accept: bool) -> ActionOutcome {
        if !lock(&self.loading).insert(username.to_string()) {
            return ActionOutcome::failed("Already in progress.");
        }
        self.emit();

        let outcome = if accept {
            let request = self.ctx.backend.accept_solicitation(username);
            self.change_relation(username, Relation::Friend, "accept_solicitation", request)
                .await
        } else {
            let request = self.ctx.backend.reject_solicitation(username);
            self.change_relation(username, Relation::Unrelated, "reject_solicitation", request)
                .await
        };

        lock(&self.loading).remove(username);
        self.emit();
        if !outcome.unauthorized {
            self.get_friends().await;
            self.get_incoming_solicitations().await;
        }
        outcome
    }

    /// Transient result; never merged into any cache.
    pub async fn search_users(&self, query: &str) -> Option<Vec<ExitUserQuery>> {
        match self.ctx.backend.search_users(query).await {
            Ok(users) => Some(users),
            Err(e) => {
                self.ctx.note_failure("search_users", &e);
                None
            }
        }
    }

    pub fn view(&self) -> SocialGraphView {
        let graph = read(&self.graph);
        let mut loading: Vec<String> = lock(&self.loading).iter().cloned().collect();
        loading.sort();
        SocialGraphView {
            friends: graph.friends.iter().cloned().collect(),
            incoming: graph.incoming.iter().cloned().collect(),
            outgoing: graph.outgoing.iter().cloned().collect(),
            loading,
        }
    }

    pub fn clear(&self) {
        *write(&self.graph) = Graph::default();
        lock(&self.loading).clear();
    }
}
