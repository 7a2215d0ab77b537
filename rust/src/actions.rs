#[derive(uniffi::Enum, Debug, Clone)]
pub enum AppAction {
    // Auth
    SignIn {
        token: String,
    },
    RestoreSession,
    Logout,
    DeleteAccount,

    // Profiles
    FetchUser {
        username: String,
    },
    FetchPicture {
        username: String,
    },
    PrefetchPictures {
        usernames: Vec<String>,
    },
    FetchAttendees {
        exit_id: String,
    },
    UploadProfilePicture {
        bytes: Vec<u8>,
    },

    // Chat
    OpenUserChat {
        peer: String,
    },
    OpenGroupChat {
        group_id: String,
    },
    LoadOlderUserMessages {
        peer: String,
    },
    LoadOlderGroupMessages {
        group_id: String,
    },
    SendMessage {
        peer: String,
        content: String,
    },
    SendGroupMessage {
        group_id: String,
        content: String,
    },
    RetryMessage {
        peer: String,
        local_id: String,
    },
    RetryGroupMessage {
        group_id: String,
        local_id: String,
    },
    MarkRead {
        peer: String,
    },
    MarkGroupRead {
        group_id: String,
    },
    RefreshInbox,

    // Social graph
    RefreshFriends,
    RefreshSolicitations,
    FollowUser {
        username: String,
    },
    UnfollowUser {
        username: String,
    },
    AcceptSolicitation {
        username: String,
    },
    RejectSolicitation {
        username: String,
    },
    SearchUsers {
        query: String,
    },

    // Exits
    RefreshListings,
    ToggleAttendance {
        exit_id: String,
    },
    ToggleLike {
        exit_id: String,
    },
    AcceptInvitation {
        exit_id: String,
    },
    RedeemOffer {
        token: String,
    },

    // Lifecycle
    Foregrounded,
    Backgrounded,
}

impl AppAction {
    /// Log-safe action tag (never includes the bearer token or message text).
    pub fn tag(&self) -> &'static str {
        match self {
            // Auth
            AppAction::SignIn { .. } => "SignIn",
            AppAction::RestoreSession => "RestoreSession",
            AppAction::Logout => "Logout",
            AppAction::DeleteAccount => "DeleteAccount",

            // Profiles
            AppAction::FetchUser { .. } => "FetchUser",
            AppAction::FetchPicture { .. } => "FetchPicture",
            AppAction::PrefetchPictures { .. } => "PrefetchPictures",
            AppAction::FetchAttendees { .. } => "FetchAttendees",
            AppAction::UploadProfilePicture { .. } => "UploadProfilePicture",

            // Chat
            AppAction::OpenUserChat { .. } => "OpenUserChat",
            AppAction::OpenGroupChat { .. } => "OpenGroupChat",
            AppAction::LoadOlderUserMessages { .. } => "LoadOlderUserMessages",
            AppAction::LoadOlderGroupMessages { .. } => "LoadOlderGroupMessages",
            AppAction::SendMessage { .. } => "SendMessage",
            AppAction::SendGroupMessage { .. } => "SendGroupMessage",
            AppAction::RetryMessage { .. } => "RetryMessage",
            AppAction::RetryGroupMessage { .. } => "RetryGroupMessage",
            AppAction::MarkRead { .. } => "MarkRead",
            AppAction::MarkGroupRead { .. } => "MarkGroupRead",
            AppAction::RefreshInbox => "RefreshInbox",

            // Social graph
            AppAction::RefreshFriends => "RefreshFriends",
            AppAction::RefreshSolicitations => "RefreshSolicitations",
            AppAction::FollowUser { .. } => "FollowUser",
            AppAction::UnfollowUser { .. } => "UnfollowUser",
            AppAction::AcceptSolicitation { .. } => "AcceptSolicitation",
            AppAction::RejectSolicitation { .. } => "RejectSolicitation",
            AppAction::SearchUsers { .. } => "SearchUsers",

            // Exits
            AppAction::RefreshListings => "RefreshListings",
            AppAction::ToggleAttendance { .. } => "ToggleAttendance",
            AppAction::ToggleLike { .. } => "ToggleLike",
            AppAction::AcceptInvitation { .. } => "AcceptInvitation",
            AppAction::RedeemOffer { .. } => "RedeemOffer",

            // Lifecycle
            AppAction::Foregrounded => "Foregrounded",
            AppAction::Backgrounded => "Backgrounded",
        }
    }
}
