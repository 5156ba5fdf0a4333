//! CRUD operations for [`Chat`] rooms and their membership edges.
//!
//! Chat creation and member attachment happen in one transaction, so no
//! observer ever sees a chat without its members.  Private-chat uniqueness
//! rides on the partial unique index over the canonical pair key: the
//! second of two racing `createPrivate` calls loses at the constraint and
//! the caller falls back to fetching the winner's row.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{pair_key, Chat, ChatKind, User};
use crate::sql;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Atomically create a private chat between two users and attach both
    /// members.  A concurrent duplicate surfaces as [`StoreError::Duplicate`].
    pub fn insert_private_chat(
        &mut self,
        user_a: i64,
        user_b: i64,
        now: DateTime<Utc>,
    ) -> Result<Chat> {
        let (lo, hi) = pair_key(user_a, user_b);
        let ts = now.to_rfc3339();

        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO chats (kind, name, pair_lo, pair_hi, last_message_at, created_at)
             VALUES ('private', NULL, ?1, ?2, ?3, ?3)",
            params![lo, hi, ts],
        )
        .map_err(StoreError::from_sqlite)?;
        let chat_id = tx.last_insert_rowid();

        for user_id in [user_a, user_b] {
            tx.execute(
                "INSERT INTO chat_members (chat_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                params![chat_id, user_id, ts],
            )?;
        }
        tx.commit()?;

        Ok(Chat {
            id: chat_id,
            kind: ChatKind::Private,
            name: None,
            last_message_at: Some(now),
            created_at: now,
        })
    }

    /// Atomically create a group chat and attach the creator plus every
    /// member id (duplicates are attached once).
    pub fn insert_group_chat(
        &mut self,
        name: Option<&str>,
        creator_id: i64,
        member_ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<Chat> {
        let ts = now.to_rfc3339();

        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO chats (kind, name, pair_lo, pair_hi, last_message_at, created_at)
             VALUES ('group', ?1, NULL, NULL, ?2, ?2)",
            params![name, ts],
        )?;
        let chat_id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO chat_members (chat_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
            params![chat_id, creator_id, ts],
        )?;
        for &user_id in member_ids {
            tx.execute(
                "INSERT OR IGNORE INTO chat_members (chat_id, user_id, joined_at)
                 VALUES (?1, ?2, ?3)",
                params![chat_id, user_id, ts],
            )?;
        }
        tx.commit()?;

        Ok(Chat {
            id: chat_id,
            kind: ChatKind::Group,
            name: name.map(str::to_string),
            last_message_at: Some(now),
            created_at: now,
        })
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single chat by id.
    pub fn get_chat(&self, id: i64) -> Result<Chat> {
        self.conn()
            .query_row(
                &format!("SELECT {CHAT_COLS} FROM chats WHERE id = ?1"),
                params![id],
                row_to_chat,
            )
            .map_err(StoreError::from_sqlite)
    }

    /// The private chat for an unordered user pair, if one exists.
    pub fn find_private_chat(&self, user_a: i64, user_b: i64) -> Result<Option<Chat>> {
        let (lo, hi) = pair_key(user_a, user_b);
        match self.conn().query_row(
            &format!(
                "SELECT {CHAT_COLS} FROM chats
                 WHERE kind = 'private' AND pair_lo = ?1 AND pair_hi = ?2"
            ),
            params![lo, hi],
            row_to_chat,
        ) {
            Ok(chat) => Ok(Some(chat)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// Membership predicate gating every chat and message operation.
    pub fn is_chat_member(&self, chat_id: i64, user_id: i64) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id, user_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// All members of a chat, resolved to user records, in join order.
    pub fn chat_participants(&self, chat_id: i64) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(
            "SELECT u.id, u.name, u.email, u.password_hash, u.avatar,
                    u.email_verified_at, u.last_seen_at, u.created_at
             FROM chat_members cm
             JOIN users u ON u.id = cm.user_id
             WHERE cm.chat_id = ?1
             ORDER BY cm.joined_at ASC, u.id ASC",
        )?;

        let rows = stmt.query_map(params![chat_id], |row| {
            let verified_str: Option<String> = row.get(5)?;
            let seen_str: Option<String> = row.get(6)?;
            let created_str: String = row.get(7)?;
            Ok(User {
                id: row.get(0)?,
                name: row.get(1)?,
                email: row.get(2)?,
                password_hash: row.get(3)?,
                avatar: row.get(4)?,
                email_verified_at: sql::opt_ts(5, verified_str)?,
                last_seen_at: sql::opt_ts(6, seen_str)?,
                created_at: sql::ts(7, &created_str)?,
            })
        })?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// All chats `user_id` belongs to, most recently active first.
    pub fn list_chats_for_user(&self, user_id: i64) -> Result<Vec<Chat>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CHAT_COLS_QUALIFIED} FROM chats c
             JOIN chat_members cm ON cm.chat_id = c.id
             WHERE cm.user_id = ?1
             ORDER BY c.last_message_at DESC, c.id DESC"
        ))?;

        let rows = stmt.query_map(params![user_id], row_to_chat)?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }
        Ok(chats)
    }

    /// Count of messages in `chat_id` not sent by `user_id` and still unread.
    pub fn unread_count(&self, chat_id: i64, user_id: i64) -> Result<i64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages
             WHERE chat_id = ?1 AND sender_id <> ?2 AND read_at IS NULL",
            params![chat_id, user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Update / delete
    // ------------------------------------------------------------------

    /// Bulk-mark unread messages from other senders as read.  Returns the
    /// number of rows affected; the predicate is evaluated at statement
    /// time, so a message appended concurrently stays unread.
    pub fn mark_chat_read(&self, chat_id: i64, user_id: i64, now: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE messages SET read_at = ?3
             WHERE chat_id = ?1 AND sender_id <> ?2 AND read_at IS NULL",
            params![chat_id, user_id, now.to_rfc3339()],
        )?;
        Ok(affected)
    }

    /// Delete a chat; membership edges and messages cascade.
    pub fn delete_chat(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM chats WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

const CHAT_COLS: &str = "id, kind, name, last_message_at, created_at";
const CHAT_COLS_QUALIFIED: &str = "c.id, c.kind, c.name, c.last_message_at, c.created_at";

/// Map a `rusqlite::Row` to a [`Chat`].
fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    let kind_str: String = row.get(1)?;
    let last_str: Option<String> = row.get(3)?;
    let created_str: String = row.get(4)?;

    Ok(Chat {
        id: row.get(0)?,
        kind: sql::enum_col(1, &kind_str, ChatKind::parse)?,
        name: row.get(2)?,
        last_message_at: sql::opt_ts(3, last_str)?,
        created_at: sql::ts(4, &created_str)?,
    })
}
