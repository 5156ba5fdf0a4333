//! CRUD operations for [`Message`] records.
//!
//! Within a chat, messages are ordered by creation timestamp with id as the
//! tie-break; ids are store-assigned and monotonic, so id order is a total
//! order even when timestamps collide.  Inserting a message updates the
//! owning chat's `last_message_at` in the same transaction.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Message, MessageKind};
use crate::sql;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new (unread) message and touch the owning chat's
    /// `last_message_at`, atomically.
    pub fn insert_message(
        &mut self,
        chat_id: i64,
        sender_id: i64,
        content: &str,
        kind: MessageKind,
        now: DateTime<Utc>,
    ) -> Result<Message> {
        let ts = now.to_rfc3339();

        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO messages (chat_id, sender_id, content, message_type,
                                   read_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?5)",
            params![chat_id, sender_id, content, kind.as_str(), ts],
        )?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE chats SET last_message_at = ?2 WHERE id = ?1",
            params![chat_id, ts],
        )?;
        tx.commit()?;

        Ok(Message {
            id,
            chat_id,
            sender_id,
            content: content.to_string(),
            message_type: kind,
            read_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single message by id.
    pub fn get_message(&self, id: i64) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = ?1"),
                params![id],
                row_to_message,
            )
            .map_err(StoreError::from_sqlite)
    }

    /// The most recent message in a chat, if any.
    pub fn last_message(&self, chat_id: i64) -> Result<Option<Message>> {
        match self.conn().query_row(
            &format!(
                "SELECT {MESSAGE_COLS} FROM messages
                 WHERE chat_id = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT 1"
            ),
            params![chat_id],
            row_to_message,
        ) {
            Ok(msg) => Ok(Some(msg)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// Total number of messages in a chat.
    pub fn count_messages(&self, chat_id: i64) -> Result<i64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE chat_id = ?1",
            params![chat_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// One page of messages, newest first.  `page` is 1-based; callers
    /// reverse the rows for oldest-to-newest display order.
    pub fn page_messages(&self, chat_id: i64, page: u32, per_page: u32) -> Result<Vec<Message>> {
        let offset = (page.saturating_sub(1) as i64) * per_page as i64;
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLS} FROM messages
             WHERE chat_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2 OFFSET ?3"
        ))?;

        let rows = stmt.query_map(params![chat_id, per_page, offset], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Up to `limit` messages with id strictly below `before_id`, newest
    /// first.  The id cursor avoids the shifting-offset problem under
    /// concurrent inserts.
    pub fn messages_before(&self, chat_id: i64, before_id: i64, limit: u32) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLS} FROM messages
             WHERE chat_id = ?1 AND id < ?2
             ORDER BY created_at DESC, id DESC
             LIMIT ?3"
        ))?;

        let rows = stmt.query_map(params![chat_id, before_id, limit], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Whether any message in the chat has an id strictly below `before_id`.
    pub fn has_messages_before(&self, chat_id: i64, before_id: i64) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM messages WHERE chat_id = ?1 AND id < ?2)",
            params![chat_id, before_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // ------------------------------------------------------------------
    // Update / delete
    // ------------------------------------------------------------------

    /// Replace the content and bump `updated_at`; creation timestamp and
    /// read-state are untouched.
    pub fn update_message_content(&self, id: i64, content: &str, now: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET content = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, content, now.to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    /// Set `read_at` if the message is still unread.  Returns `true` on the
    /// transition, `false` if it was already read.
    pub fn mark_message_read(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET read_at = ?2 WHERE id = ?1 AND read_at IS NULL",
            params![id, now.to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    /// Hard-delete a message.  Returns `true` if a row was deleted.
    pub fn delete_message(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM messages WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

const MESSAGE_COLS: &str =
    "id, chat_id, sender_id, content, message_type, read_at, created_at, updated_at";

/// Map a `rusqlite::Row` to a [`Message`].
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let kind_str: String = row.get(4)?;
    let read_str: Option<String> = row.get(5)?;
    let created_str: String = row.get(6)?;
    let updated_str: String = row.get(7)?;

    Ok(Message {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        message_type: sql::enum_col(4, &kind_str, MessageKind::parse)?,
        read_at: sql::opt_ts(5, read_str)?,
        created_at: sql::ts(6, &created_str)?,
        updated_at: sql::ts(7, &updated_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn seed_chat(db: &mut Database) -> (i64, i64, i64) {
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
    fn insert_touches_chat_last_message() {
        let (_dir, mut db) = open();
        let (chat_id, a, _b) = seed_chat(&mut db);
        let later = Utc::now() + chrono::Duration::seconds(10);

        db.insert_message(chat_id, a, "hello", MessageKind::Text, later)
            .unwrap();

        let chat = db.get_chat(chat_id).unwrap();
        assert_eq!(chat.last_message_at, Some(later));
    }

    #[test]
    fn mark_read_is_a_one_way_latch() {
        let (_dir, mut db) = open();
        let (chat_id, a, _b) = seed_chat(&mut db);
        let now = Utc::now();

        let msg = db
            .insert_message(chat_id, a, "hi", MessageKind::Text, now)
            .unwrap();
        assert!(db.mark_message_read(msg.id, now).unwrap());
        assert!(!db.mark_message_read(msg.id, now).unwrap());
        assert!(db.get_message(msg.id).unwrap().is_read());
    }

    #[test]
    fn cursor_query_excludes_the_cursor_row() {
        let (_dir, mut db) = open();
        let (chat_id, a, _b) = seed_chat(&mut db);
        let now = Utc::now();

        let ids: Vec<i64> = (0..5)
            .map(|i| {
                db.insert_message(chat_id, a, &format!("m{i}"), MessageKind::Text, now)
                    .unwrap()
                    .id
            })
            .collect();

        let older = db.messages_before(chat_id, ids[2], 10).unwrap();
        let got: Vec<i64> = older.iter().map(|m| m.id).collect();
        assert_eq!(got, vec![ids[1], ids[0]]);
        assert!(db.has_messages_before(chat_id, ids[1]).unwrap());
        assert!(!db.has_messages_before(chat_id, ids[0]).unwrap());
    }
}
