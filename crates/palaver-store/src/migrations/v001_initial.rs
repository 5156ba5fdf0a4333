//! v001 -- Initial schema creation.
//!
//! Creates the five core relations: `users`, `friendships`, `chats`,
//! `chat_members`, and `messages`.
//!
//! The two pair invariants live here rather than in application code:
//! `friendships` carries a canonicalized `(pair_lo, pair_hi)` key with a
//! unique index so a request and its mirror collide, and private chats
//! carry the same key under a partial unique index so at most one private
//! chat exists per unordered participant pair.  Racing inserts lose at the
//! constraint, never by read-then-write.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    name              TEXT NOT NULL,
    email             TEXT NOT NULL COLLATE NOCASE,
    password_hash     TEXT NOT NULL,               -- opaque to this core
    avatar            TEXT,                        -- avatar reference, nullable
    email_verified_at TEXT,                        -- ISO-8601, set exactly once
    last_seen_at      TEXT,                        -- ISO-8601, nullable
    created_at        TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email ON users(email COLLATE NOCASE);

-- ----------------------------------------------------------------
-- Friendships
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS friendships (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    requester_id INTEGER NOT NULL,                 -- FK -> users(id)
    addressee_id INTEGER NOT NULL,                 -- FK -> users(id)
    status       TEXT NOT NULL DEFAULT 'pending'
                 CHECK (status IN ('pending', 'accepted', 'declined')),
    pair_lo      INTEGER NOT NULL,                 -- min(requester, addressee)
    pair_hi      INTEGER NOT NULL,                 -- max(requester, addressee)
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,

    CHECK (requester_id <> addressee_id),
    CHECK (pair_lo < pair_hi),

    FOREIGN KEY (requester_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (addressee_id) REFERENCES users(id) ON DELETE CASCADE
);

-- At most one row per unordered user pair, regardless of direction.
CREATE UNIQUE INDEX IF NOT EXISTS idx_friendships_pair
    ON friendships(pair_lo, pair_hi);

CREATE INDEX IF NOT EXISTS idx_friendships_requester
    ON friendships(requester_id, status);
CREATE INDEX IF NOT EXISTS idx_friendships_addressee
    ON friendships(addressee_id, status);

-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    kind            TEXT NOT NULL CHECK (kind IN ('private', 'group')),
    name            TEXT,                          -- NULL for private chats
    pair_lo         INTEGER,                       -- private chats only
    pair_hi         INTEGER,                       -- private chats only
    last_message_at TEXT,                          -- ISO-8601, nullable
    created_at      TEXT NOT NULL,

    CHECK (kind <> 'private' OR (pair_lo IS NOT NULL AND pair_hi IS NOT NULL))
);

-- At most one private chat per unordered participant pair.
CREATE UNIQUE INDEX IF NOT EXISTS idx_chats_private_pair
    ON chats(pair_lo, pair_hi) WHERE kind = 'private';

CREATE INDEX IF NOT EXISTS idx_chats_last_message ON chats(last_message_at DESC);

-- ----------------------------------------------------------------
-- Chat members
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_members (
    chat_id   INTEGER NOT NULL,                    -- FK -> chats(id)
    user_id   INTEGER NOT NULL,                    -- FK -> users(id)
    joined_at TEXT NOT NULL,

    PRIMARY KEY (chat_id, user_id),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chat_members_user ON chat_members(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id      INTEGER NOT NULL,                 -- FK -> chats(id)
    sender_id    INTEGER NOT NULL,                 -- FK -> users(id)
    content      TEXT NOT NULL,
    message_type TEXT NOT NULL DEFAULT 'text'
                 CHECK (message_type IN ('text', 'image', 'file')),
    read_at      TEXT,                             -- NULL means unread
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,

    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,
    FOREIGN KEY (sender_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_created
    ON messages(chat_id, created_at DESC);

-- Unread lookups: sender exclusion + NULL read_at.
CREATE INDEX IF NOT EXISTS idx_messages_chat_unread
    ON messages(chat_id, sender_id) WHERE read_at IS NULL;
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
