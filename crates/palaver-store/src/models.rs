//! Domain model structs persisted in the local SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to an API layer without re-mapping.
//!
//! All primary keys are `i64` rowids assigned by SQLite in insertion order,
//! so id order is a safe total order even when timestamps collide at
//! millisecond resolution.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A user is considered online if seen within this window.
pub const ONLINE_WINDOW_MINUTES: i64 = 5;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered user account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Store-assigned id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Email address, unique case-insensitively.
    pub email: String,
    /// Password credential, opaque to this core.
    pub password_hash: String,
    /// Optional avatar reference.
    pub avatar: Option<String>,
    /// When the email was verified; set exactly once.
    pub email_verified_at: Option<DateTime<Utc>>,
    /// Last authenticated activity.
    pub last_seen_at: Option<DateTime<Utc>>,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Whether the user's email has been verified.
    pub fn is_verified(&self) -> bool {
        self.email_verified_at.is_some()
    }

    /// Online status derived from `last_seen_at`: seen within the last
    /// five minutes relative to `now`.
    pub fn is_online(&self, now: DateTime<Utc>) -> bool {
        match self.last_seen_at {
            Some(seen) => now - seen <= Duration::minutes(ONLINE_WINDOW_MINUTES),
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Friendship
// ---------------------------------------------------------------------------

/// Lifecycle status of a friendship row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FriendshipStatus {
    Pending,
    Accepted,
    Declined,
}

impl FriendshipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FriendshipStatus::Pending => "pending",
            FriendshipStatus::Accepted => "accepted",
            FriendshipStatus::Declined => "declined",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FriendshipStatus::Pending),
            "accepted" => Some(FriendshipStatus::Accepted),
            "declined" => Some(FriendshipStatus::Declined),
            _ => None,
        }
    }
}

/// A directional friend request and its current status.
///
/// At most one row exists per unordered user pair; the store enforces this
/// with a unique index over the canonicalized `(pair_lo, pair_hi)` key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Friendship {
    /// Store-assigned id.
    pub id: i64,
    /// The user who sent the request.
    pub requester_id: i64,
    /// The user who received the request.
    pub addressee_id: i64,
    /// Current lifecycle status.
    pub status: FriendshipStatus,
    /// When the request was created.
    pub created_at: DateTime<Utc>,
    /// When the row last changed (status transitions).
    pub updated_at: DateTime<Utc>,
}

impl Friendship {
    pub fn is_pending(&self) -> bool {
        self.status == FriendshipStatus::Pending
    }

    pub fn is_accepted(&self) -> bool {
        self.status == FriendshipStatus::Accepted
    }

    pub fn is_declined(&self) -> bool {
        self.status == FriendshipStatus::Declined
    }

    /// Whether `user_id` is the requester or the addressee.
    pub fn involves(&self, user_id: i64) -> bool {
        self.requester_id == user_id || self.addressee_id == user_id
    }

    /// The counterpart of `user_id` in this row, if they are involved.
    pub fn other_user(&self, user_id: i64) -> Option<i64> {
        if self.requester_id == user_id {
            Some(self.addressee_id)
        } else if self.addressee_id == user_id {
            Some(self.requester_id)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// Kind of a chat room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    /// Exactly two members, no display name, immutable once created.
    Private,
    /// One or more members with an optional display name.
    Group,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "private" => Some(ChatKind::Private),
            "group" => Some(ChatKind::Group),
            _ => None,
        }
    }
}

/// A conversation (private 2-party or group N-party).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    /// Store-assigned id.
    pub id: i64,
    /// Private or group.
    pub kind: ChatKind,
    /// Display name; always `None` for private chats.
    pub name: Option<String>,
    /// Denormalized timestamp of the latest message, kept in the same unit
    /// of work as message insertion.
    pub last_message_at: Option<DateTime<Utc>>,
    /// When the chat was created.
    pub created_at: DateTime<Utc>,
}

impl Chat {
    pub fn is_private(&self) -> bool {
        self.kind == ChatKind::Private
    }

    pub fn is_group(&self) -> bool {
        self.kind == ChatKind::Group
    }
}

/// Membership edge between a user and a chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMember {
    pub chat_id: i64,
    pub user_id: i64,
    pub joined_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Payload type of a message; immutable after creation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageKind::Text),
            "image" => Some(MessageKind::Image),
            "file" => Some(MessageKind::File),
            _ => None,
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Store-assigned id; monotonic within the store, used as the ordering
    /// tie-break and the lazy-loading cursor.
    pub id: i64,
    /// The chat this message belongs to.
    pub chat_id: i64,
    /// The user who sent it.
    pub sender_id: i64,
    /// Sanitized content.
    pub content: String,
    /// text, image or file.
    pub message_type: MessageKind,
    /// When a participant other than the sender read it; `None` = unread.
    pub read_at: Option<DateTime<Utc>>,
    /// When the message was sent.
    pub created_at: DateTime<Utc>,
    /// When the content was last edited.
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

/// Canonicalize an unordered user pair to `(min, max)`.
///
/// Every pair-keyed lookup and insert goes through this, so a request and
/// its mirror always hit the same key.
pub fn pair_key(a: i64, b: i64) -> (i64, i64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
