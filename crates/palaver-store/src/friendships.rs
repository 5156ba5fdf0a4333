//! CRUD operations for [`Friendship`] rows.
//!
//! Every pair-keyed statement goes through [`pair_key`] so both orderings of
//! a user pair hit the same canonical `(pair_lo, pair_hi)` key.  Status
//! transitions and owned deletions are single conditional statements: the
//! precondition lives in the WHERE clause, so a racing loser simply affects
//! zero rows instead of corrupting the row.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{pair_key, Friendship, FriendshipStatus};
use crate::sql;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a `pending` request.  The unique pair index makes the
    /// existence check and insert atomic: a simultaneous mirror request
    /// loses with [`StoreError::Duplicate`].
    pub fn insert_friendship(
        &self,
        requester_id: i64,
        addressee_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Friendship> {
        let (lo, hi) = pair_key(requester_id, addressee_id);
        self.conn()
            .execute(
                "INSERT INTO friendships
                     (requester_id, addressee_id, status, pair_lo, pair_hi, created_at, updated_at)
                 VALUES (?1, ?2, 'pending', ?3, ?4, ?5, ?5)",
                params![requester_id, addressee_id, lo, hi, now.to_rfc3339()],
            )
            .map_err(StoreError::from_sqlite)?;

        Ok(Friendship {
            id: self.conn().last_insert_rowid(),
            requester_id,
            addressee_id,
            status: FriendshipStatus::Pending,
            created_at: now,
            updated_at: now,
        })
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single friendship by id.
    pub fn get_friendship(&self, id: i64) -> Result<Friendship> {
        self.conn()
            .query_row(
                &format!("SELECT {FRIENDSHIP_COLS} FROM friendships WHERE id = ?1"),
                params![id],
                row_to_friendship,
            )
            .map_err(StoreError::from_sqlite)
    }

    /// Order-independent lookup of the row between two users, if any.
    pub fn friendship_between(&self, user_a: i64, user_b: i64) -> Result<Option<Friendship>> {
        let (lo, hi) = pair_key(user_a, user_b);
        match self.conn().query_row(
            &format!(
                "SELECT {FRIENDSHIP_COLS} FROM friendships
                 WHERE pair_lo = ?1 AND pair_hi = ?2"
            ),
            params![lo, hi],
            row_to_friendship,
        ) {
            Ok(f) => Ok(Some(f)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// All `accepted` rows involving `user_id`.
    pub fn list_accepted_friendships(&self, user_id: i64) -> Result<Vec<Friendship>> {
        self.query_friendships(
            &format!(
                "SELECT {FRIENDSHIP_COLS} FROM friendships
                 WHERE status = 'accepted' AND (requester_id = ?1 OR addressee_id = ?1)
                 ORDER BY created_at DESC, id DESC"
            ),
            user_id,
        )
    }

    /// Pending requests sent by `user_id`, newest first.
    pub fn list_pending_sent(&self, user_id: i64) -> Result<Vec<Friendship>> {
        self.query_friendships(
            &format!(
                "SELECT {FRIENDSHIP_COLS} FROM friendships
                 WHERE status = 'pending' AND requester_id = ?1
                 ORDER BY created_at DESC, id DESC"
            ),
            user_id,
        )
    }

    /// Pending requests received by `user_id`, newest first.
    pub fn list_pending_received(&self, user_id: i64) -> Result<Vec<Friendship>> {
        self.query_friendships(
            &format!(
                "SELECT {FRIENDSHIP_COLS} FROM friendships
                 WHERE status = 'pending' AND addressee_id = ?1
                 ORDER BY created_at DESC, id DESC"
            ),
            user_id,
        )
    }

    // ------------------------------------------------------------------
    // Update / delete
    // ------------------------------------------------------------------

    /// Transition a `pending` row to `accepted` or `declined`, but only if
    /// `actor_id` is the addressee.  Returns `true` when a row changed.
    pub fn transition_pending_friendship(
        &self,
        id: i64,
        actor_id: i64,
        status: FriendshipStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        debug_assert!(status != FriendshipStatus::Pending);
        let affected = self.conn().execute(
            "UPDATE friendships SET status = ?3, updated_at = ?4
             WHERE id = ?1 AND addressee_id = ?2 AND status = 'pending'",
            params![id, actor_id, status.as_str(), now.to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    /// Delete a `pending` row owned by its requester (cancellation).
    pub fn delete_pending_friendship(&self, id: i64, requester_id: i64) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM friendships
             WHERE id = ?1 AND requester_id = ?2 AND status = 'pending'",
            params![id, requester_id],
        )?;
        Ok(affected > 0)
    }

    /// Delete an `accepted` row by id (unfriend).
    pub fn delete_accepted_friendship(&self, id: i64) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM friendships WHERE id = ?1 AND status = 'accepted'",
            params![id],
        )?;
        Ok(affected > 0)
    }

    fn query_friendships(&self, sql: &str, user_id: i64) -> Result<Vec<Friendship>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(params![user_id], row_to_friendship)?;

        let mut friendships = Vec::new();
        for row in rows {
            friendships.push(row?);
        }
        Ok(friendships)
    }
}

const FRIENDSHIP_COLS: &str =
    "id, requester_id, addressee_id, status, created_at, updated_at";

/// Map a `rusqlite::Row` to a [`Friendship`].
fn row_to_friendship(row: &rusqlite::Row<'_>) -> rusqlite::Result<Friendship> {
    let status_str: String = row.get(3)?;
    let created_str: String = row.get(4)?;
    let updated_str: String = row.get(5)?;

    Ok(Friendship {
        id: row.get(0)?,
        requester_id: row.get(1)?,
        addressee_id: row.get(2)?,
        status: sql::enum_col(3, &status_str, FriendshipStatus::parse)?,
        created_at: sql::ts(4, &created_str)?,
        updated_at: sql::ts(5, &updated_str)?,
    })
}
