// Request/response boundary consumed by every store.

use async_trait::async_trait;

use crate::error::BackendResult;
use crate::state::{
    Exit, ExitUserQuery, GroupMessage, GroupMessageSummary, Invitation, Message, MessageSummary,
    Notification, Offer, PictureRef, Profile,
};

/// One method per backend endpoint. List endpoints taking `before_id` return newest-first pages
/// strictly older than that id (`None` = newest page).
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    // Session
    async fn fetch_self(&self) -> BackendResult<Profile>;
    async fn delete_account(&self) -> BackendResult<()>;

    // Profiles and pictures
    async fn fetch_user(&self, username: &str) -> BackendResult<Profile>;
    async fn fetch_attendees(&self, exit_id: &str) -> BackendResult<Vec<ExitUserQuery>>;
    async fn fetch_picture(&self, username: &str) -> BackendResult<PictureRef>;
    /// Signed URL of the signed-in user's picture.
    async fn fetch_own_picture(&self) -> BackendResult<String>;
    async fn upload_picture(&self, bytes: Vec<u8>) -> BackendResult<()>;

    // Messages
    async fn fetch_user_messages(
        &self,
        peer: &str,
        before_id: Option<i64>,
    ) -> BackendResult<Vec<Message>>;
    async fn fetch_group_messages(
        &self,
        group_id: &str,
        before_id: Option<i64>,
    ) -> BackendResult<Vec<GroupMessage>>;
    async fn send_message(&self, peer: &str, content: &str) -> BackendResult<()>;
    async fn send_group_message(&self, group_id: &str, content: &str) -> BackendResult<()>;
    async fn mark_read(&self, peer: &str) -> BackendResult<()>;
    async fn mark_group_read(&self, group_id: &str) -> BackendResult<()>;
    async fn fetch_message_summaries(&self) -> BackendResult<Vec<MessageSummary>>;
    async fn fetch_group_summaries(&self) -> BackendResult<Vec<GroupMessageSummary>>;

    // Social graph
    async fn fetch_friends(&self) -> BackendResult<Vec<String>>;
    async fn fetch_incoming_solicitations(&self) -> BackendResult<Vec<String>>;
    async fn fetch_outgoing_solicitations(&self) -> BackendResult<Vec<String>>;
    async fn follow(&self, username: &str) -> BackendResult<()>;
    async fn unfollow(&self, username: &str) -> BackendResult<()>;
    async fn accept_solicitation(&self, username: &str) -> BackendResult<()>;
    async fn reject_solicitation(&self, username: &str) -> BackendResult<()>;
    async fn search_users(&self, query: &str) -> BackendResult<Vec<ExitUserQuery>>;

    // Exits, offers, notifications
    async fn fetch_feed(&self) -> BackendResult<Vec<Exit>>;
    async fn fetch_owned_exits(&self) -> BackendResult<Vec<Exit>>;
    async fn fetch_invitations(&self) -> BackendResult<Vec<Invitation>>;
    async fn fetch_offers(&self) -> BackendResult<Vec<Offer>>;
    async fn fetch_notifications(&self) -> BackendResult<Vec<Notification>>;
    async fn set_attendance(&self, exit_id: &str, attending: bool) -> BackendResult<()>;
    async fn set_like(&self, exit_id: &str, liked: bool) -> BackendResult<()>;
    async fn accept_invitation(&self, exit_id: &str) -> BackendResult<()>;
    async fn redeem_offer(&self, token: &str) -> BackendResult<()>;
}
