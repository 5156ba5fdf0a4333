//! Friendship graph: the request/accept/decline/cancel/remove lifecycle.
//!
//! Invariants:
//! - at most one row per unordered user pair, in any status (the store's
//!   canonical pair index makes the check-and-insert atomic);
//! - `pending -> accepted` and `pending -> declined` are one-way and
//!   terminal; accepted rows leave only by deletion (unfriend), pending
//!   rows by requester cancellation;
//! - declined rows stay in place, so a declined requester cannot re-request.
//!
//! Every relationship lookup in the crate routes through
//! [`FriendGraph::relationship_between`]; no call site re-derives the
//! two-direction query.

use serde::Serialize;
use tracing::info;

use palaver_store::{Database, Friendship, FriendshipStatus, StoreError};

use crate::clock::{Clock, SystemClock};
use crate::error::{CoreError, Result};
use crate::identity::UserProfile;

/// A pending request resolved to the counterpart's profile.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PendingRequest {
    pub friendship_id: i64,
    pub user: UserProfile,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Pending requests split by direction, each newest-first.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PendingRequests {
    pub sent: Vec<PendingRequest>,
    pub received: Vec<PendingRequest>,
}

/// Friendship lifecycle service.
pub struct FriendGraph<C = SystemClock> {
    clock: C,
}

impl Default for FriendGraph<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl FriendGraph<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<C: Clock> FriendGraph<C> {
    pub fn with_clock(clock: C) -> Self {
        Self { clock }
    }

    /// Send a friend request from `from` to `to`.
    ///
    /// Fails with `SelfReference` for self-requests, `NotFound` when the
    /// target is absent or unverified, and `RelationshipExists` when any
    /// row already exists for the pair -- including one created by a
    /// simultaneous mirror request, which loses at the pair index.
    pub fn send_request(&self, db: &Database, from: i64, to: i64) -> Result<Friendship> {
        if from == to {
            return Err(CoreError::SelfReference);
        }

        let target = db.get_user(to)?;
        if !target.is_verified() {
            return Err(CoreError::NotFound);
        }

        if self.relationship_between(db, from, to)?.is_some() {
            return Err(CoreError::RelationshipExists);
        }

        let friendship = db
            .insert_friendship(from, to, self.clock.now())
            .map_err(|e| match e {
                StoreError::Duplicate => CoreError::RelationshipExists,
                other => other.into(),
            })?;

        info!(
            friendship_id = friendship.id,
            requester_id = from,
            addressee_id = to,
            "friend request sent"
        );
        Ok(friendship)
    }

    /// Accept a pending request.  Only the addressee may accept; anyone
    /// else, or any non-pending row, observes `NotFound`.
    pub fn accept(&self, db: &Database, friendship_id: i64, actor_id: i64) -> Result<Friendship> {
        self.respond(db, friendship_id, actor_id, FriendshipStatus::Accepted)
    }

    /// Decline a pending request.  Same preconditions as [`Self::accept`];
    /// the row remains in place, terminally declined.
    pub fn decline(&self, db: &Database, friendship_id: i64, actor_id: i64) -> Result<Friendship> {
        self.respond(db, friendship_id, actor_id, FriendshipStatus::Declined)
    }

    fn respond(
        &self,
        db: &Database,
        friendship_id: i64,
        actor_id: i64,
        status: FriendshipStatus,
    ) -> Result<Friendship> {
        // Conditional update: the precondition (pending + actor is the
        // addressee) sits in the statement itself, so a racing cancel
        // leaves us with zero affected rows, never a corrupted row.
        let changed =
            db.transition_pending_friendship(friendship_id, actor_id, status, self.clock.now())?;
        if !changed {
            return Err(CoreError::NotFound);
        }

        info!(friendship_id, actor_id, status = status.as_str(), "friend request resolved");
        db.get_friendship(friendship_id).map_err(Into::into)
    }

    /// Cancel a pending request the actor sent.  Deletes the row.
    pub fn cancel(&self, db: &Database, friendship_id: i64, actor_id: i64) -> Result<()> {
        let deleted = db.delete_pending_friendship(friendship_id, actor_id)?;
        if !deleted {
            return Err(CoreError::NotFound);
        }
        info!(friendship_id, actor_id, "friend request cancelled");
        Ok(())
    }

    /// Unfriend: delete the accepted row between the actor and another
    /// user, regardless of who requested originally.
    pub fn remove(&self, db: &Database, actor_id: i64, other_user_id: i64) -> Result<()> {
        let friendship = self
            .relationship_between(db, actor_id, other_user_id)?
            .ok_or(CoreError::NotFound)?;
        if !friendship.is_accepted() {
            return Err(CoreError::NotFound);
        }

        let deleted = db.delete_accepted_friendship(friendship.id)?;
        if !deleted {
            // Lost a race with a concurrent removal.
            return Err(CoreError::NotFound);
        }
        info!(friendship_id = friendship.id, actor_id, other_user_id, "friend removed");
        Ok(())
    }

    /// Order-independent lookup of the single row between two users.
    ///
    /// This is the one canonical implementation; every other component
    /// that needs friendship status calls it.
    pub fn relationship_between(
        &self,
        db: &Database,
        user_a: i64,
        user_b: i64,
    ) -> Result<Option<Friendship>> {
        Ok(db.friendship_between(user_a, user_b)?)
    }

    /// All accepted friendships of `user_id`, resolved to the other
    /// party's profile.
    pub fn list_friends(&self, db: &Database, user_id: i64) -> Result<Vec<UserProfile>> {
        let now = self.clock.now();
        let rows = db.list_accepted_friendships(user_id)?;

        let mut friends = Vec::with_capacity(rows.len());
        for row in rows {
            let other_id = row.other_user(user_id).ok_or(CoreError::NotFound)?;
            let other = db.get_user(other_id)?;
            friends.push(UserProfile::from_user(&other, now));
        }
        Ok(friends)
    }

    /// Pending requests involving `user_id`, split into sent and received,
    /// each newest-first.
    pub fn list_pending(&self, db: &Database, user_id: i64) -> Result<PendingRequests> {
        let now = self.clock.now();

        let resolve = |rows: Vec<Friendship>, db: &Database| -> Result<Vec<PendingRequest>> {
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                let other_id = row.other_user(user_id).ok_or(CoreError::NotFound)?;
                let other = db.get_user(other_id)?;
                out.push(PendingRequest {
                    friendship_id: row.id,
                    user: UserProfile::from_user(&other, now),
                    created_at: row.created_at,
                });
            }
            Ok(out)
        };

        Ok(PendingRequests {
            sent: resolve(db.list_pending_sent(user_id)?, db)?,
            received: resolve(db.list_pending_received(user_id)?, db)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::clock::testing::ManualClock;

    use super::*;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn verified_user(db: &Database, name: &str) -> i64 {
        let now = Utc::now();
        let user = db
            .insert_user(name, &format!("{name}@example.com"), "h", None, now)
            .unwrap();
        db.mark_email_verified(user.id, now).unwrap();
        user.id
    }

    #[test]
    fn self_request_is_rejected() {
        let (_dir, db) = open();
        let a = verified_user(&db, "a");
        let graph = FriendGraph::new();

        assert!(matches!(
            graph.send_request(&db, a, a),
            Err(CoreError::SelfReference)
        ));
    }

    #[test]
    fn unverified_target_is_not_found() {
        let (_dir, db) = open();
        let a = verified_user(&db, "a");
        let b = db
            .insert_user("b", "b@example.com", "h", None, Utc::now())
            .unwrap()
            .id;
        let graph = FriendGraph::new();

        assert!(matches!(
            graph.send_request(&db, a, b),
            Err(CoreError::NotFound)
        ));
        assert!(matches!(
            graph.send_request(&db, a, b + 1000),
            Err(CoreError::NotFound)
        ));
    }

    #[test]
    fn any_existing_row_blocks_a_new_request() {
        let (_dir, db) = open();
        let a = verified_user(&db, "a");
        let b = verified_user(&db, "b");
        let graph = FriendGraph::new();

        let f = graph.send_request(&db, a, b).unwrap();
        assert!(f.is_pending());

        // Same direction, mirror direction, and after a decline.
        assert!(matches!(
            graph.send_request(&db, a, b),
            Err(CoreError::RelationshipExists)
        ));
        assert!(matches!(
            graph.send_request(&db, b, a),
            Err(CoreError::RelationshipExists)
        ));

        graph.decline(&db, f.id, b).unwrap();
        assert!(matches!(
            graph.send_request(&db, a, b),
            Err(CoreError::RelationshipExists)
        ));
    }

    #[test]
    fn only_the_addressee_accepts() {
        let (_dir, db) = open();
        let a = verified_user(&db, "a");
        let b = verified_user(&db, "b");
        let graph = FriendGraph::new();

        let f = graph.send_request(&db, a, b).unwrap();
        assert!(matches!(
            graph.accept(&db, f.id, a),
            Err(CoreError::NotFound)
        ));

        let accepted = graph.accept(&db, f.id, b).unwrap();
        assert!(accepted.is_accepted());
    }

    #[test]
    fn cancel_after_accept_is_not_found() {
        let (_dir, db) = open();
        let a = verified_user(&db, "a");
        let b = verified_user(&db, "b");
        let graph = FriendGraph::new();

        let f = graph.send_request(&db, a, b).unwrap();
        graph.accept(&db, f.id, b).unwrap();

        // The row is no longer pending, so the requester's cancel loses.
        assert!(matches!(
            graph.cancel(&db, f.id, a),
            Err(CoreError::NotFound)
        ));
        assert!(graph
            .relationship_between(&db, a, b)
            .unwrap()
            .unwrap()
            .is_accepted());
    }

    #[test]
    fn accepted_rows_leave_only_by_removal() {
        let (_dir, db) = open();
        let a = verified_user(&db, "a");
        let b = verified_user(&db, "b");
        let graph = FriendGraph::new();

        let f = graph.send_request(&db, a, b).unwrap();
        graph.accept(&db, f.id, b).unwrap();

        assert!(matches!(
            graph.decline(&db, f.id, b),
            Err(CoreError::NotFound)
        ));

        graph.remove(&db, b, a).unwrap();
        assert!(graph.relationship_between(&db, a, b).unwrap().is_none());
        assert!(graph.relationship_between(&db, b, a).unwrap().is_none());
    }

    #[test]
    fn relationship_lookup_is_symmetric() {
        let (_dir, db) = open();
        let a = verified_user(&db, "a");
        let b = verified_user(&db, "b");
        let graph = FriendGraph::new();

        assert_eq!(
            graph.relationship_between(&db, a, b).unwrap(),
            graph.relationship_between(&db, b, a).unwrap()
        );

        graph.send_request(&db, a, b).unwrap();
        assert_eq!(
            graph.relationship_between(&db, a, b).unwrap(),
            graph.relationship_between(&db, b, a).unwrap()
        );
    }

    #[test]
    fn pending_lists_split_by_direction_newest_first() {
        let (_dir, db) = open();
        let clock = ManualClock::at(Utc::now());
        let graph = FriendGraph::with_clock(&clock);

        let me = verified_user(&db, "me");
        let x = verified_user(&db, "x");
        let y = verified_user(&db, "y");
        let z = verified_user(&db, "z");

        let first = graph.send_request(&db, me, x).unwrap();
        clock.advance(Duration::seconds(5));
        let second = graph.send_request(&db, me, y).unwrap();
        clock.advance(Duration::seconds(5));
        graph.send_request(&db, z, me).unwrap();

        let pending = graph.list_pending(&db, me).unwrap();
        assert_eq!(pending.sent.len(), 2);
        assert_eq!(pending.sent[0].friendship_id, second.id);
        assert_eq!(pending.sent[1].friendship_id, first.id);
        assert_eq!(pending.received.len(), 1);
        assert_eq!(pending.received[0].user.id, z);
    }

    #[test]
    fn friends_resolve_to_the_other_party() {
        let (_dir, db) = open();
        let a = verified_user(&db, "a");
        let b = verified_user(&db, "b");
        let graph = FriendGraph::new();

        let f = graph.send_request(&db, a, b).unwrap();
        graph.accept(&db, f.id, b).unwrap();

        let of_a = graph.list_friends(&db, a).unwrap();
        let of_b = graph.list_friends(&db, b).unwrap();
        assert_eq!(of_a.len(), 1);
        assert_eq!(of_a[0].id, b);
        assert_eq!(of_b[0].id, a);
    }
}
