//! CRUD operations for [`User`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;
use crate::sql;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new user.  The email is unique case-insensitively; a
    /// collision surfaces as [`StoreError::Duplicate`].
    pub fn insert_user(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
        avatar: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<User> {
        self.conn()
            .execute(
                "INSERT INTO users (name, email, password_hash, avatar, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![name, email, password_hash, avatar, now.to_rfc3339()],
            )
            .map_err(StoreError::from_sqlite)?;

        Ok(User {
            id: self.conn().last_insert_rowid(),
            name: name.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            avatar: avatar.map(str::to_string),
            email_verified_at: None,
            last_seen_at: None,
            created_at: now,
        })
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single user by id.
    pub fn get_user(&self, id: i64) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLS} FROM users WHERE id = ?1"),
                params![id],
                row_to_user,
            )
            .map_err(StoreError::from_sqlite)
    }

    /// Fetch a user by email; the lookup is case-insensitive.
    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        match self.conn().query_row(
            &format!("SELECT {USER_COLS} FROM users WHERE email = ?1 COLLATE NOCASE"),
            params![email],
            row_to_user,
        ) {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// Verified users whose name or email contains `query`, excluding
    /// `exclude_id`, ordered by name.
    pub fn search_users(&self, query: &str, exclude_id: i64, limit: u32) -> Result<Vec<User>> {
        let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLS} FROM users
             WHERE id <> ?1
               AND email_verified_at IS NOT NULL
               AND (name LIKE ?2 ESCAPE '\\' OR email LIKE ?2 ESCAPE '\\')
             ORDER BY name ASC
             LIMIT ?3"
        ))?;

        let rows = stmt.query_map(params![exclude_id, pattern, limit], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Set `email_verified_at` if it is still unset.  Returns `true` on the
    /// one transition that takes effect; the flag is never changed again.
    pub fn mark_email_verified(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET email_verified_at = ?2
             WHERE id = ?1 AND email_verified_at IS NULL",
            params![id, now.to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    /// Record authenticated activity.
    pub fn touch_last_seen(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET last_seen_at = ?2 WHERE id = ?1",
            params![id, now.to_rfc3339()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

const USER_COLS: &str =
    "id, name, email, password_hash, avatar, email_verified_at, last_seen_at, created_at";

/// Map a `rusqlite::Row` to a [`User`].
fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
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
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn email_is_unique_case_insensitively() {
        let (_dir, db) = open();
        let now = Utc::now();

        db.insert_user("Alice", "alice@example.com", "h", None, now)
            .unwrap();
        let err = db
            .insert_user("Other", "ALICE@Example.Com", "h", None, now)
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate));

        let found = db.find_user_by_email("Alice@EXAMPLE.com").unwrap();
        assert_eq!(found.unwrap().name, "Alice");
    }

    #[test]
    fn verification_is_set_once() {
        let (_dir, db) = open();
        let now = Utc::now();

        let user = db
            .insert_user("Bob", "bob@example.com", "h", None, now)
            .unwrap();
        assert!(db.mark_email_verified(user.id, now).unwrap());
        assert!(!db.mark_email_verified(user.id, now).unwrap());
        assert!(db.get_user(user.id).unwrap().is_verified());
    }
}
