use serde::{Deserialize, Serialize};

pub fn now_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq)]
pub enum AuthState {
    LoggedOut,
    LoggedIn { username: String },
}

#[derive(uniffi::Enum, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Live-event status attached to the signed-in user's profile and to detailed visitor lookups.
#[derive(uniffi::Record, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EventStatus {
    pub active: bool,
    #[serde(default)]
    pub event_time: Option<i64>,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub attendees: Vec<String>,
}

#[derive(uniffi::Record, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Profile {
    pub username: String,
    pub gender: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub instagram: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub event_status: Option<EventStatus>,
}

/// Light projection returned by paginated visitor / attendee listings.
#[derive(uniffi::Record, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ExitUserQuery {
    pub username: String,
    pub gender: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
}

/// Whatever the profile cache holds for a username.
#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq)]
pub enum CachedUser {
    Detailed(Profile),
    Light(ExitUserQuery),
}

#[derive(uniffi::Record, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PictureRef {
    pub username: String,
    /// Signed URL; opaque to the core.
    pub url: String,
}

#[derive(uniffi::Enum, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(uniffi::Record, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Server id; `None` until the send is acknowledged.
    #[serde(default)]
    pub id: Option<i64>,
    /// Client-side id of an unacknowledged send.
    #[serde(default, skip_serializing)]
    pub local_id: Option<String>,
    pub timestamp: i64,
    pub content: String,
    pub direction: Direction,
    #[serde(default)]
    pub read: bool,
    #[serde(default, skip_serializing)]
    pub waiting_for_ack: bool,
}

#[derive(uniffi::Record, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct GroupMessage {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default, skip_serializing)]
    pub local_id: Option<String>,
    pub sender: String,
    pub timestamp: i64,
    pub content: String,
    /// Sorted and de-duplicated by the message store.
    #[serde(default)]
    pub read_by: Vec<String>,
    #[serde(default, skip_serializing)]
    pub waiting_for_ack: bool,
}

#[derive(uniffi::Record, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MessageSummary {
    pub peer: String,
    pub last_message: String,
    pub timestamp: i64,
    #[serde(default)]
    pub unread: bool,
    #[serde(default)]
    pub outgoing: bool,
}

#[derive(uniffi::Record, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct GroupMessageSummary {
    pub group_id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub last_sender: String,
    pub last_message: String,
    pub timestamp: i64,
    #[serde(default)]
    pub unread: bool,
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ThreadKey {
    Peer { username: String },
    Group { group_id: String },
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct UserThreadView {
    pub peer: String,
    pub messages: Vec<Message>,
    pub loading_more: bool,
    pub can_load_older: bool,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct GroupThreadView {
    pub group_id: String,
    pub messages: Vec<GroupMessage>,
    pub loading_more: bool,
    pub can_load_older: bool,
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relation {
    Unrelated,
    Friend,
    Incoming,
    Outgoing,
}

#[derive(uniffi::Record, Clone, Debug, Default, PartialEq, Eq)]
pub struct SocialGraphView {
    pub friends: Vec<String>,
    pub incoming: Vec<String>,
    pub outgoing: Vec<String>,
    /// Usernames with an accept/reject in flight.
    pub loading: Vec<String>,
}

#[derive(uniffi::Record, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(uniffi::Record, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Exit {
    pub id: String,
    pub title: String,
    pub owner: String,
    pub starts_at: i64,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub attendee_count: u32,
    #[serde(default)]
    pub attending: bool,
    #[serde(default)]
    pub like_count: u32,
    #[serde(default)]
    pub liked: bool,
}

#[derive(uniffi::Record, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Invitation {
    pub exit_id: String,
    pub from: String,
    pub title: String,
    pub starts_at: i64,
}

#[derive(uniffi::Record, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Offer {
    pub id: String,
    pub title: String,
    pub business: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Listing {
    Feed,
    OwnedExits,
    Invitations,
    Offers,
    Notifications,
}

#[derive(uniffi::Record, Clone, Debug, Default, PartialEq, Eq)]
pub struct ListingsView {
    pub feed: Vec<Exit>,
    pub owned_exits: Vec<Exit>,
    pub invitations: Vec<Invitation>,
    pub offers: Vec<Offer>,
    pub notifications: Vec<Notification>,
    pub unread_notifications: u32,
}

/// Result of a fetch that replaces local state.
#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Refresh {
    Updated,
    /// An identical request was already in flight.
    Skipped,
    Unauthorized,
    Failed,
}

impl Refresh {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Refresh::Unauthorized)
    }
}

/// Success flag plus the user-facing message for mutating actions.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct ActionOutcome {
    pub ok: bool,
    pub message: Option<String>,
    pub unauthorized: bool,
}

impl ActionOutcome {
    pub fn ok() -> Self {
        Self {
            ok: true,
            message: None,
            unauthorized: false,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
            unauthorized: false,
        }
    }

    pub fn unauthorized() -> Self {
        Self {
            ok: false,
            message: None,
            unauthorized: true,
        }
    }
}
