//! Message ledger: the append-mostly log of messages per chat, with
//! read-tracking and pagination.
//!
//! Every operation checks chat membership first and fails with `Forbidden`
//! for outsiders.  Appending a message updates the owning chat's
//! `last_message_at` inside the same store transaction, so the denormalized
//! ordering key never drifts from the ledger.

use serde::Serialize;
use tracing::info;

use palaver_store::{Database, Message, MessageKind};

use crate::chats::ChatRoster;
use crate::clock::{Clock, SystemClock};
use crate::error::{CoreError, Result};
use crate::policy;

/// Hard upper bound on page size and cursor limits.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Default page size when the caller does not specify one.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Page metadata mirrored from the pagination contract: 1-based pages,
/// newest page first.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Pagination {
    pub current_page: u32,
    pub last_page: u32,
    pub per_page: u32,
    pub total: i64,
    pub has_more_pages: bool,
}

/// One page of messages in display order (oldest to newest).
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub pagination: Pagination,
}

/// A cursor batch of older messages, oldest to newest.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OlderMessages {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

/// Per-chat message statistics.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChatStats {
    pub total_messages: i64,
    pub unread_messages: i64,
    pub last_message_at: Option<chrono::DateTime<chrono::Utc>>,
    pub participants_count: usize,
}

/// Message ledger service.
pub struct MessageLedger<C = SystemClock>
where
    C: Clock + Copy,
{
    clock: C,
    roster: ChatRoster<C>,
}

impl Default for MessageLedger<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageLedger<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<C: Clock + Copy> MessageLedger<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            roster: ChatRoster::with_clock(clock),
        }
    }

    /// Append a message to a chat.
    ///
    /// The payload is validated and sanitized by the content policy before
    /// anything is stored; the stored message is always unread and the
    /// type defaults to text.
    pub fn send(
        &self,
        db: &mut Database,
        chat_id: i64,
        sender_id: i64,
        content: &str,
        kind: Option<MessageKind>,
    ) -> Result<Message> {
        self.roster.ensure_member(db, chat_id, sender_id)?;

        let kind = kind.unwrap_or(MessageKind::Text);
        policy::validate(content, kind)?;
        let sanitized = policy::sanitize(content, kind);

        let message = db.insert_message(chat_id, sender_id, &sanitized, kind, self.clock.now())?;
        info!(
            message_id = message.id,
            chat_id,
            sender_id,
            message_type = kind.as_str(),
            content_length = sanitized.len(),
            "message created"
        );
        Ok(message)
    }

    /// Edit a message's content.  Only the sender may edit; the content
    /// policy re-runs with the message's original, immutable type.  The
    /// creation timestamp and read-state are untouched.
    pub fn edit(
        &self,
        db: &Database,
        chat_id: i64,
        message_id: i64,
        actor_id: i64,
        new_content: &str,
    ) -> Result<Message> {
        self.roster.ensure_member(db, chat_id, actor_id)?;
        let message = self.message_in_chat(db, chat_id, message_id)?;
        if message.sender_id != actor_id {
            return Err(CoreError::Forbidden);
        }

        policy::validate(new_content, message.message_type)?;
        let sanitized = policy::sanitize(new_content, message.message_type);

        if !db.update_message_content(message_id, &sanitized, self.clock.now())? {
            return Err(CoreError::NotFound);
        }
        info!(message_id, chat_id, actor_id, content_length = sanitized.len(), "message updated");
        db.get_message(message_id).map_err(Into::into)
    }

    /// Hard-delete a message; sender only, no tombstone.
    pub fn delete(&self, db: &Database, chat_id: i64, message_id: i64, actor_id: i64) -> Result<()> {
        self.roster.ensure_member(db, chat_id, actor_id)?;
        let message = self.message_in_chat(db, chat_id, message_id)?;
        if message.sender_id != actor_id {
            return Err(CoreError::Forbidden);
        }

        if !db.delete_message(message_id)? {
            return Err(CoreError::NotFound);
        }
        info!(message_id, chat_id, actor_id, "message deleted");
        Ok(())
    }

    /// Mark a single message read.  The sender may never mark their own
    /// message; re-reading an already-read message is a no-op.
    pub fn mark_read(&self, db: &Database, message_id: i64, actor_id: i64) -> Result<()> {
        let message = db.get_message(message_id)?;
        self.roster.ensure_member(db, message.chat_id, actor_id)?;
        if message.sender_id == actor_id {
            return Err(CoreError::SelfReference);
        }

        if db.mark_message_read(message_id, self.clock.now())? {
            info!(
                message_id,
                reader_id = actor_id,
                sender_id = message.sender_id,
                "message marked as read"
            );
        }
        Ok(())
    }

    /// Fetch a single message, verifying it belongs to the given chat.
    pub fn get(&self, db: &Database, chat_id: i64, message_id: i64, actor_id: i64) -> Result<Message> {
        self.roster.ensure_member(db, chat_id, actor_id)?;
        self.message_in_chat(db, chat_id, message_id)
    }

    /// One page of history.  Page 1 holds the most recent `per_page`
    /// messages; rows within a page run oldest to newest for display.
    pub fn page(
        &self,
        db: &Database,
        chat_id: i64,
        actor_id: i64,
        page: u32,
        per_page: u32,
    ) -> Result<MessagePage> {
        self.roster.ensure_member(db, chat_id, actor_id)?;

        let page = page.max(1);
        let per_page = per_page.clamp(1, MAX_PAGE_SIZE);

        let total = db.count_messages(chat_id)?;
        let last_page = ((total as u64).div_ceil(per_page as u64) as u32).max(1);

        let mut messages = db.page_messages(chat_id, page, per_page)?;
        messages.reverse();

        Ok(MessagePage {
            messages,
            pagination: Pagination {
                current_page: page,
                last_page,
                per_page,
                total,
                has_more_pages: page < last_page,
            },
        })
    }

    /// Lazy-loading cursor: up to `limit` messages with id strictly below
    /// `before_id`, oldest to newest, plus whether older ones remain.
    /// Cursor-based rather than offset-based, so concurrent inserts cannot
    /// shift the window.
    pub fn older_than(
        &self,
        db: &Database,
        chat_id: i64,
        actor_id: i64,
        before_id: i64,
        limit: u32,
    ) -> Result<OlderMessages> {
        self.roster.ensure_member(db, chat_id, actor_id)?;

        // The cursor must name a message in this chat.
        self.message_in_chat(db, chat_id, before_id)?;

        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let mut messages = db.messages_before(chat_id, before_id, limit)?;
        messages.reverse();

        let oldest_returned = messages.first().map(|m| m.id).unwrap_or(before_id);
        let has_more = db.has_messages_before(chat_id, oldest_returned)?;

        Ok(OlderMessages { messages, has_more })
    }

    /// Monitoring counters for a chat.
    pub fn stats(&self, db: &Database, chat_id: i64, actor_id: i64) -> Result<ChatStats> {
        self.roster.ensure_member(db, chat_id, actor_id)?;
        let chat = db.get_chat(chat_id)?;

        Ok(ChatStats {
            total_messages: db.count_messages(chat_id)?,
            unread_messages: db.unread_count(chat_id, actor_id)?,
            last_message_at: chat.last_message_at,
            participants_count: db.chat_participants(chat_id)?.len(),
        })
    }

    fn message_in_chat(&self, db: &Database, chat_id: i64, message_id: i64) -> Result<Message> {
        let message = db.get_message(message_id)?;
        if message.chat_id != chat_id {
            return Err(CoreError::NotFound);
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::error::PolicyViolation;

    use super::*;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn chat_between(db: &mut Database) -> (i64, i64, i64) {
        let now = Utc::now();
        let a = db
            .insert_user("a", "a@example.com", "h", None, now)
            .unwrap()
            .id;
        let b = db
            .insert_user("b", "b@example.com", "h", None, now)
            .unwrap()
            .id;
        let chat = db.insert_private_chat(a, b, now).unwrap();
        (chat.id, a, b)
    }

    #[test]
    fn outsiders_cannot_send() {
        let (_dir, mut db) = open();
        let (chat_id, _a, _b) = chat_between(&mut db);
        let outsider = db
            .insert_user("x", "x@example.com", "h", None, Utc::now())
            .unwrap()
            .id;
        let ledger = MessageLedger::new();

        assert!(matches!(
            ledger.send(&mut db, chat_id, outsider, "hello", None),
            Err(CoreError::Forbidden)
        ));
    }

    #[test]
    fn send_stores_sanitized_content() {
        let (_dir, mut db) = open();
        let (chat_id, a, _b) = chat_between(&mut db);
        let ledger = MessageLedger::new();

        let msg = ledger
            .send(
                &mut db,
                chat_id,
                a,
                "<script>alert(1)</script>Hello   world!",
                None,
            )
            .unwrap();
        assert!(!msg.content.contains("<script>"));
        assert!(msg.content.contains("Hello world!"));
        assert_eq!(msg.message_type, MessageKind::Text);
        assert!(!msg.is_read());

        // The stored row matches what was returned.
        assert_eq!(db.get_message(msg.id).unwrap().content, msg.content);
    }

    #[test]
    fn spammy_content_never_reaches_the_store() {
        let (_dir, mut db) = open();
        let (chat_id, a, _b) = chat_between(&mut db);
        let ledger = MessageLedger::new();

        let err = ledger
            .send(&mut db, chat_id, a, &"a".repeat(25), None)
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(PolicyViolation::SpamSuspected)
        ));
        assert_eq!(db.count_messages(chat_id).unwrap(), 0);
    }

    #[test]
    fn only_the_sender_edits_and_deletes() {
        let (_dir, mut db) = open();
        let (chat_id, a, b) = chat_between(&mut db);
        let ledger = MessageLedger::new();

        let msg = ledger.send(&mut db, chat_id, a, "original", None).unwrap();

        assert!(matches!(
            ledger.edit(&db, chat_id, msg.id, b, "hijack"),
            Err(CoreError::Forbidden)
        ));
        assert!(matches!(
            ledger.delete(&db, chat_id, msg.id, b),
            Err(CoreError::Forbidden)
        ));

        let edited = ledger.edit(&db, chat_id, msg.id, a, "fixed").unwrap();
        assert_eq!(edited.content, "fixed");
        assert_eq!(edited.created_at, msg.created_at);
        assert_eq!(edited.read_at, msg.read_at);

        ledger.delete(&db, chat_id, msg.id, a).unwrap();
        assert!(matches!(
            db.get_message(msg.id),
            Err(palaver_store::StoreError::NotFound)
        ));
    }

    #[test]
    fn edit_reruns_policy_with_the_original_type() {
        let (_dir, mut db) = open();
        let (chat_id, a, _b) = chat_between(&mut db);
        let ledger = MessageLedger::new();

        let msg = ledger
            .send(
                &mut db,
                chat_id,
                a,
                "https://cdn.example.com/pic.png",
                Some(MessageKind::Image),
            )
            .unwrap();

        // Plain prose is not a valid image reference, whatever the new text.
        let err = ledger.edit(&db, chat_id, msg.id, a, "just words").unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(PolicyViolation::InvalidReference)
        ));

        let ok = ledger
            .edit(&db, chat_id, msg.id, a, "https://cdn.example.com/other.png")
            .unwrap();
        assert_eq!(ok.message_type, MessageKind::Image);
    }

    #[test]
    fn senders_never_read_their_own_messages() {
        let (_dir, mut db) = open();
        let (chat_id, a, b) = chat_between(&mut db);
        let ledger = MessageLedger::new();

        let msg = ledger.send(&mut db, chat_id, a, "hi", None).unwrap();
        assert!(matches!(
            ledger.mark_read(&db, msg.id, a),
            Err(CoreError::SelfReference)
        ));

        ledger.mark_read(&db, msg.id, b).unwrap();
        let read_at = db.get_message(msg.id).unwrap().read_at;
        assert!(read_at.is_some());

        // Re-reading is a no-op, not an error, and keeps the first timestamp.
        ledger.mark_read(&db, msg.id, b).unwrap();
        assert_eq!(db.get_message(msg.id).unwrap().read_at, read_at);
    }

    #[test]
    fn page_one_is_the_newest_slice_in_display_order() {
        let (_dir, mut db) = open();
        let (chat_id, a, _b) = chat_between(&mut db);
        let ledger = MessageLedger::new();

        let ids: Vec<i64> = (0..7)
            .map(|i| {
                ledger
                    .send(&mut db, chat_id, a, &format!("m{i}"), None)
                    .unwrap()
                    .id
            })
            .collect();

        let page1 = ledger.page(&db, chat_id, a, 1, 3).unwrap();
        let got: Vec<i64> = page1.messages.iter().map(|m| m.id).collect();
        assert_eq!(got, vec![ids[4], ids[5], ids[6]]);
        assert_eq!(page1.pagination.total, 7);
        assert_eq!(page1.pagination.last_page, 3);
        assert!(page1.pagination.has_more_pages);

        let page3 = ledger.page(&db, chat_id, a, 3, 3).unwrap();
        let got: Vec<i64> = page3.messages.iter().map(|m| m.id).collect();
        assert_eq!(got, vec![ids[0]]);
        assert!(!page3.pagination.has_more_pages);
    }

    #[test]
    fn cursor_walk_visits_every_message_once() {
        let (_dir, mut db) = open();
        let (chat_id, a, _b) = chat_between(&mut db);
        let ledger = MessageLedger::new();

        let ids: Vec<i64> = (0..7)
            .map(|i| {
                ledger
                    .send(&mut db, chat_id, a, &format!("m{i}"), None)
                    .unwrap()
                    .id
            })
            .collect();

        let mut seen = Vec::new();
        let mut cursor = *ids.last().unwrap();
        seen.push(cursor);
        loop {
            let batch = ledger.older_than(&db, chat_id, a, cursor, 2).unwrap();
            if batch.messages.is_empty() {
                assert!(!batch.has_more);
                break;
            }
            cursor = batch.messages.first().unwrap().id;
            for m in batch.messages.iter().rev() {
                seen.push(m.id);
            }
        }

        let mut expected: Vec<i64> = ids.clone();
        expected.reverse();
        assert_eq!(seen, expected);
    }

    #[test]
    fn stats_reflect_the_ledger() {
        let (_dir, mut db) = open();
        let (chat_id, a, b) = chat_between(&mut db);
        let ledger = MessageLedger::new();

        ledger.send(&mut db, chat_id, a, "one", None).unwrap();
        ledger.send(&mut db, chat_id, a, "two", None).unwrap();

        let stats = ledger.stats(&db, chat_id, b).unwrap();
        assert_eq!(stats.total_messages, 2);
        assert_eq!(stats.unread_messages, 2);
        assert_eq!(stats.participants_count, 2);
        assert!(stats.last_message_at.is_some());
    }
}
