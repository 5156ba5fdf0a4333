//! Identity store operations: registration, verification state, presence.
//!
//! Password hashing, token issuance and email delivery live outside this
//! core; this module only records their outcomes (an opaque credential, the
//! one-shot verified flag).

use serde::Serialize;
use tracing::info;

use palaver_store::{Database, Friendship, FriendshipStatus, User};

use crate::clock::{Clock, SystemClock};
use crate::error::{CoreError, Result};

/// Denormalized identity fields callers need to render a user without a
/// second round trip.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub avatar: Option<String>,
    pub is_online: bool,
}

impl UserProfile {
    pub fn from_user(user: &User, now: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            avatar: user.avatar.clone(),
            is_online: user.is_online(now),
        }
    }
}

/// A user search hit with the viewer's relationship annotated.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SearchHit {
    #[serde(flatten)]
    pub profile: UserProfile,
    /// Status of the friendship row between the viewer and this user.
    pub friendship_status: Option<FriendshipStatus>,
    pub friendship_id: Option<i64>,
    /// True when no row exists in any status for the pair.
    pub can_send_request: bool,
    /// True when the viewer is the addressee of a pending request.
    pub can_respond: bool,
}

/// Identity bookkeeping service.
pub struct IdentityService<C = SystemClock> {
    clock: C,
}

impl Default for IdentityService<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityService<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<C: Clock> IdentityService<C> {
    pub fn with_clock(clock: C) -> Self {
        Self { clock }
    }

    /// Register a new account.  The email is unique case-insensitively; a
    /// duplicate registration fails with [`CoreError::Conflict`].
    pub fn register(
        &self,
        db: &Database,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User> {
        let user = db
            .insert_user(name, email, password_hash, None, self.clock.now())
            .map_err(|e| match e {
                palaver_store::StoreError::Duplicate => CoreError::Conflict,
                other => other.into(),
            })?;

        info!(user_id = user.id, "user registered");
        Ok(user)
    }

    /// Case-insensitive email lookup.
    pub fn find_by_email(&self, db: &Database, email: &str) -> Result<Option<User>> {
        Ok(db.find_user_by_email(email)?)
    }

    /// Mark the account verified.  The flag is set exactly once; repeated
    /// calls return `false` and change nothing.
    pub fn verify_email(&self, db: &Database, user_id: i64) -> Result<bool> {
        // Distinguish "unknown user" from "already verified".
        db.get_user(user_id)?;
        let transitioned = db.mark_email_verified(user_id, self.clock.now())?;
        if transitioned {
            info!(user_id, "email verified");
        }
        Ok(transitioned)
    }

    /// Record authenticated activity, refreshing the online window.
    pub fn touch_last_seen(&self, db: &Database, user_id: i64) -> Result<()> {
        Ok(db.touch_last_seen(user_id, self.clock.now())?)
    }

    /// Search verified users by name or email substring, excluding the
    /// actor, with the actor's relationship to each hit annotated.
    pub fn search(&self, db: &Database, actor_id: i64, query: &str, limit: u32) -> Result<Vec<SearchHit>> {
        let now = self.clock.now();
        let users = db.search_users(query, actor_id, limit)?;

        let mut hits = Vec::with_capacity(users.len());
        for user in users {
            let friendship: Option<Friendship> = db.friendship_between(actor_id, user.id)?;
            let can_respond = friendship
                .as_ref()
                .map(|f| f.is_pending() && f.addressee_id == actor_id)
                .unwrap_or(false);
            hits.push(SearchHit {
                profile: UserProfile::from_user(&user, now),
                friendship_status: friendship.as_ref().map(|f| f.status),
                friendship_id: friendship.as_ref().map(|f| f.id),
                can_send_request: friendship.is_none(),
                can_respond,
            });
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::clock::testing::ManualClock;
    use crate::friends::FriendGraph;

    use super::*;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn duplicate_registration_conflicts() {
        let (_dir, db) = open();
        let service = IdentityService::new();

        service.register(&db, "Alice", "alice@example.com", "h").unwrap();
        assert!(matches!(
            service.register(&db, "Imposter", "ALICE@example.com", "h"),
            Err(CoreError::Conflict)
        ));
    }

    #[test]
    fn verification_transitions_once() {
        let (_dir, db) = open();
        let service = IdentityService::new();

        let user = service.register(&db, "Bob", "bob@example.com", "h").unwrap();
        assert!(service.verify_email(&db, user.id).unwrap());
        assert!(!service.verify_email(&db, user.id).unwrap());
        assert!(matches!(
            service.verify_email(&db, user.id + 1000),
            Err(CoreError::NotFound)
        ));
    }

    #[test]
    fn presence_follows_last_seen() {
        let (_dir, db) = open();
        let clock = ManualClock::at(Utc::now());
        let service = IdentityService::with_clock(&clock);

        let user = service.register(&db, "Cara", "cara@example.com", "h").unwrap();
        service.touch_last_seen(&db, user.id).unwrap();

        let fetched = db.get_user(user.id).unwrap();
        assert!(fetched.is_online(clock.now()));

        clock.advance(Duration::minutes(6));
        assert!(!fetched.is_online(clock.now()));
    }

    #[test]
    fn search_annotates_relationship_state() {
        let (_dir, db) = open();
        let service = IdentityService::new();
        let graph = FriendGraph::new();

        let me = service.register(&db, "Me", "me@example.com", "h").unwrap();
        let pal = service.register(&db, "Pal", "pal@example.com", "h").unwrap();
        let stranger = service
            .register(&db, "Palindrome", "palindrome@example.com", "h")
            .unwrap();
        for id in [me.id, pal.id, stranger.id] {
            service.verify_email(&db, id).unwrap();
        }

        let f = graph.send_request(&db, pal.id, me.id).unwrap();

        let hits = service.search(&db, me.id, "pal", 10).unwrap();
        assert_eq!(hits.len(), 2);

        let pal_hit = hits.iter().find(|h| h.profile.id == pal.id).unwrap();
        assert_eq!(pal_hit.friendship_status, Some(FriendshipStatus::Pending));
        assert_eq!(pal_hit.friendship_id, Some(f.id));
        assert!(!pal_hit.can_send_request);
        assert!(pal_hit.can_respond);

        let stranger_hit = hits.iter().find(|h| h.profile.id == stranger.id).unwrap();
        assert_eq!(stranger_hit.friendship_status, None);
        assert!(stranger_hit.can_send_request);
        assert!(!stranger_hit.can_respond);
    }

    #[test]
    fn search_excludes_self_and_unverified() {
        let (_dir, db) = open();
        let service = IdentityService::new();

        let me = service.register(&db, "Pat", "pat@example.com", "h").unwrap();
        service.verify_email(&db, me.id).unwrap();
        service
            .register(&db, "Patricia", "patricia@example.com", "h")
            .unwrap(); // never verified

        let hits = service.search(&db, me.id, "pat", 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn search_hit_serializes_flat() {
        let hit = SearchHit {
            profile: UserProfile {
                id: 7,
                name: "Pal".into(),
                email: "pal@example.com".into(),
                avatar: None,
                is_online: true,
            },
            friendship_status: Some(FriendshipStatus::Pending),
            friendship_id: Some(3),
            can_send_request: false,
            can_respond: true,
        };

        let json = serde_json::to_value(&hit).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["friendship_status"], "pending");
        assert_eq!(json["is_online"], true);
    }
}
