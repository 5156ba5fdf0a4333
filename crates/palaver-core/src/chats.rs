//! Chat membership: room creation, the membership gate, unread tracking.
//!
//! Private chats are deduplicated per unordered participant pair: creation
//! is idempotent, and a racing duplicate insert loses at the store's
//! partial unique index and falls back to the winner's row.

use serde::Serialize;
use tracing::info;

use palaver_store::{Chat, Database, Message, StoreError, User};

use crate::clock::{Clock, SystemClock};
use crate::error::{CoreError, Result};
use crate::identity::UserProfile;

/// One entry of a user's chat index: the chat plus everything the caller
/// needs to render it without further lookups.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChatSummary {
    pub chat: Chat,
    pub participants: Vec<UserProfile>,
    pub unread_count: i64,
    pub last_message: Option<Message>,
    /// The counterpart in a private chat; `None` for groups.
    pub other_participant: Option<UserProfile>,
}

/// Chat membership service.
pub struct ChatRoster<C = SystemClock> {
    clock: C,
}

impl Default for ChatRoster<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatRoster<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<C: Clock> ChatRoster<C> {
    pub fn with_clock(clock: C) -> Self {
        Self { clock }
    }

    /// Create (or return) the private chat between two users.
    ///
    /// Idempotent per unordered pair: a second call in either order
    /// returns the existing chat rather than failing.
    pub fn create_private(&self, db: &mut Database, user_a: i64, user_b: i64) -> Result<Chat> {
        if user_a == user_b {
            return Err(CoreError::SelfReference);
        }

        if let Some(existing) = db.find_private_chat(user_a, user_b)? {
            return Ok(existing);
        }

        match db.insert_private_chat(user_a, user_b, self.clock.now()) {
            Ok(chat) => {
                info!(chat_id = chat.id, user_a, user_b, "private chat created");
                Ok(chat)
            }
            // Lost the creation race; the winner's chat is the result.
            Err(StoreError::Duplicate) => db
                .find_private_chat(user_a, user_b)?
                .ok_or(CoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Create a group chat with the creator and the given members attached.
    pub fn create_group(
        &self,
        db: &mut Database,
        creator_id: i64,
        name: Option<&str>,
        member_ids: &[i64],
    ) -> Result<Chat> {
        let chat = db.insert_group_chat(name, creator_id, member_ids, self.clock.now())?;
        info!(chat_id = chat.id, creator_id, members = member_ids.len(), "group chat created");
        Ok(chat)
    }

    /// Membership predicate gating every chat and message operation.
    pub fn is_member(&self, db: &Database, chat_id: i64, user_id: i64) -> Result<bool> {
        Ok(db.is_chat_member(chat_id, user_id)?)
    }

    /// Fail with `Forbidden` unless `user_id` is a member of `chat_id`.
    pub(crate) fn ensure_member(&self, db: &Database, chat_id: i64, user_id: i64) -> Result<()> {
        if self.is_member(db, chat_id, user_id)? {
            Ok(())
        } else {
            Err(CoreError::Forbidden)
        }
    }

    /// The member that is not `user_id` in a private chat; `None` when the
    /// chat is a group.
    pub fn other_participant(
        &self,
        db: &Database,
        chat_id: i64,
        user_id: i64,
    ) -> Result<Option<UserProfile>> {
        let chat = db.get_chat(chat_id)?;
        if !chat.is_private() {
            return Ok(None);
        }
        let now = self.clock.now();
        Ok(db
            .chat_participants(chat_id)?
            .iter()
            .find(|u| u.id != user_id)
            .map(|u| UserProfile::from_user(u, now)))
    }

    /// Count of messages in the chat sent by others and still unread.
    pub fn unread_count_for(&self, db: &Database, chat_id: i64, user_id: i64) -> Result<i64> {
        self.ensure_member(db, chat_id, user_id)?;
        Ok(db.unread_count(chat_id, user_id)?)
    }

    /// Mark every unread message from other senders as read.  Returns the
    /// number of messages affected; repeating after all-read yields 0.
    pub fn mark_chat_read(&self, db: &Database, chat_id: i64, user_id: i64) -> Result<usize> {
        self.ensure_member(db, chat_id, user_id)?;
        let updated = db.mark_chat_read(chat_id, user_id, self.clock.now())?;
        if updated > 0 {
            info!(chat_id, user_id, messages = updated, "chat marked as read");
        }
        Ok(updated)
    }

    /// Delete a group chat the actor belongs to.  Private chats are
    /// immutable once created and always fail with `Forbidden`.
    pub fn delete_group(&self, db: &Database, chat_id: i64, actor_id: i64) -> Result<()> {
        let chat = db.get_chat(chat_id)?;
        self.ensure_member(db, chat_id, actor_id)?;
        if chat.is_private() {
            return Err(CoreError::Forbidden);
        }

        if !db.delete_chat(chat_id)? {
            return Err(CoreError::NotFound);
        }
        info!(chat_id, actor_id, "group chat deleted");
        Ok(())
    }

    /// A single chat with the caller-facing denormalizations.
    pub fn summary(&self, db: &Database, chat_id: i64, user_id: i64) -> Result<ChatSummary> {
        self.ensure_member(db, chat_id, user_id)?;
        let chat = db.get_chat(chat_id)?;
        self.summarize(db, chat, user_id)
    }

    /// The user's chat index, most recently active first.
    pub fn list_chats(&self, db: &Database, user_id: i64) -> Result<Vec<ChatSummary>> {
        let chats = db.list_chats_for_user(user_id)?;
        let mut out = Vec::with_capacity(chats.len());
        for chat in chats {
            out.push(self.summarize(db, chat, user_id)?);
        }
        Ok(out)
    }

    fn summarize(&self, db: &Database, chat: Chat, user_id: i64) -> Result<ChatSummary> {
        let now = self.clock.now();
        let participants: Vec<User> = db.chat_participants(chat.id)?;
        let other_participant = if chat.is_private() {
            participants
                .iter()
                .find(|u| u.id != user_id)
                .map(|u| UserProfile::from_user(u, now))
        } else {
            None
        };

        Ok(ChatSummary {
            unread_count: db.unread_count(chat.id, user_id)?,
            last_message: db.last_message(chat.id)?,
            participants: participants
                .iter()
                .map(|u| UserProfile::from_user(u, now))
                .collect(),
            other_participant,
            chat,
        })
    }
}
