//! # Share Session Management
//!
//! A share session is the server-held record of one pending transfer: the
//! advisory file metadata the publisher registered, the short code naming it,
//! the two peer slots, and the signaling queues that carry negotiation
//! messages between them. The [`SessionStore`] owns every record and is the
//! only component that mutates one.
//!
//! ## Lifecycle
//!
//! ```text
//! publish          subscribe           complete
//!    │                 │                  │
//!    ▼                 ▼                  ▼
//! Pending ────────► Paired ──────────► Completed (removed immediately)
//!    │                 │
//!    └───── TTL / cancel ─────► Expired (purged by the reaper)
//! ```
//!
//! Status only moves forward. A terminal session accepts no further
//! negotiation messages; an expired record lingers briefly so a dead code
//! answers `410` before decaying to `404`.
//!
//! ## Concurrency
//!
//! Records live in a `DashMap` keyed by share code. Every mutation goes
//! through [`SessionStore::update`], which runs the caller's closure while
//! the map entry is exclusively held - the per-code serialization point that
//! makes each status transition an atomic compare-and-swap. Racing callers
//! (a `cancel` against an in-flight `subscribe`, the reaper against a relay)
//! are ordered by that lock; the loser observes the new status.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::signal::SignalChannels;

/// How long a terminal record stays visible before the reaper purges it.
///
/// A code that was cancelled or timed out keeps answering `410 Gone` for this
/// window; afterwards it reads as `404`, indistinguishable from a code that
/// never existed.
const ENDED_LINGER_SECS: i64 = 600;

/// Which side of the transfer a peer is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Publisher,
    Subscriber,
}

impl Role {
    /// Parses a wire-level role string. Anything but the two known roles is
    /// a client bug, reported as [`ShareError::UnknownSender`].
    pub fn parse(raw: &str) -> Result<Role, ShareError> {
        match raw {
            "publisher" => Ok(Role::Publisher),
            "subscriber" => Ok(Role::Subscriber),
            other => Err(ShareError::UnknownSender(other.to_string())),
        }
    }

    /// The peer on the other end of the session.
    pub fn opposite(self) -> Role {
        match self {
            Role::Publisher => Role::Subscriber,
            Role::Subscriber => Role::Publisher,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Publisher => write!(f, "publisher"),
            Role::Subscriber => write!(f, "subscriber"),
        }
    }
}

/// Lifecycle states of a share session. See the module docs for the
/// transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Paired,
    Completed,
    Expired,
}

impl SessionStatus {
    /// Terminal states accept no further negotiation messages and make the
    /// record eligible for removal.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Expired)
    }
}

/// Advisory file metadata carried with a share.
///
/// The broker stores and relays these fields verbatim; it never opens the
/// file, recomputes the hash, or checks the size. The recipient uses the
/// hash to verify integrity after the direct transfer finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareMeta {
    pub filename: String,
    pub size: u64,
    pub file_hash: String,
}

/// An attached peer connection, identified only for routing and diagnostics.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    pub id: Uuid,
    pub role: Role,
    pub attached_at: DateTime<Utc>,
}

impl PeerHandle {
    fn new(role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            attached_at: Utc::now(),
        }
    }
}

/// Everything that can go wrong against the share table.
///
/// `CodeCollision` and `GenerationExhausted` are internal - publish retries
/// collisions transparently and only surfaces the exhausted case. The rest
/// map directly onto HTTP responses in the server module.
#[derive(Debug, thiserror::Error)]
pub enum ShareError {
    #[error("unknown or removed share code")]
    NotFound,

    #[error("share code has expired")]
    Expired,

    #[error("share already has a subscriber")]
    AlreadyPaired,

    #[error("share is not paired")]
    NotPaired,

    #[error("share cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("share code already in use")]
    CodeCollision,

    #[error("could not generate an unused share code")]
    GenerationExhausted,

    #[error("unrecognized sender role: {0}")]
    UnknownSender(String),
}

/// The canonical record for one pending transfer.
///
/// Cloning is cheap: the signal queues are behind `Arc`, so a clone taken
/// out of the store still feeds the same channels.
#[derive(Clone)]
pub struct ShareSession {
    pub code: String,
    pub meta: ShareMeta,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub publisher: PeerHandle,
    pub subscriber: Option<PeerHandle>,
    pub channels: SignalChannels,
}

impl ShareSession {
    pub fn new(code: String, meta: ShareMeta, queue_capacity: usize) -> Self {
        Self {
            code,
            meta,
            created_at: Utc::now(),
            ended_at: None,
            status: SessionStatus::Pending,
            publisher: PeerHandle::new(Role::Publisher),
            subscriber: None,
            channels: SignalChannels::new(queue_capacity),
        }
    }

    /// Attaches the subscriber and pairs the session. Only valid while
    /// Pending; the publisher slot is filled at creation, so participants
    /// can never exceed two.
    pub fn attach_subscriber(&mut self) -> Result<ShareMeta, ShareError> {
        match self.status {
            SessionStatus::Pending => {
                self.subscriber = Some(PeerHandle::new(Role::Subscriber));
                self.status = SessionStatus::Paired;
                Ok(self.meta.clone())
            }
            SessionStatus::Paired => Err(ShareError::AlreadyPaired),
            // A terminal record is on its way out; reading it as expired
            // avoids leaking lifecycle detail the caller cannot use.
            SessionStatus::Completed | SessionStatus::Expired => Err(ShareError::Expired),
        }
    }

    /// Number of attached peers (1 while Pending, 2 once Paired).
    pub fn participants(&self) -> usize {
        1 + usize::from(self.subscriber.is_some())
    }
}

/// Authoritative in-memory table mapping share codes to session records.
///
/// Cloning the store clones a handle to the same table, so it can be shared
/// between HTTP handlers, the reaper, and the router.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, ShareSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a freshly created session, failing if the code is already
    /// taken by a live record. The caller retries with a new code.
    pub fn insert(&self, session: ShareSession) -> Result<(), ShareError> {
        match self.sessions.entry(session.code.clone()) {
            Entry::Occupied(_) => Err(ShareError::CodeCollision),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    /// Snapshot of one record.
    pub fn get(&self, code: &str) -> Option<ShareSession> {
        self.sessions.get(code).map(|entry| entry.clone())
    }

    /// Runs `mutate` with the record exclusively held.
    ///
    /// This is the per-code serialization point: the entry stays locked for
    /// the duration of the closure, so no two callers can interleave a
    /// status check with a transition. Closures must not block or call back
    /// into the store.
    pub fn update<T>(
        &self,
        code: &str,
        mutate: impl FnOnce(&mut ShareSession) -> Result<T, ShareError>,
    ) -> Result<T, ShareError> {
        match self.sessions.get_mut(code) {
            Some(mut entry) => mutate(entry.value_mut()),
            None => Err(ShareError::NotFound),
        }
    }

    pub fn remove(&self, code: &str) -> Option<ShareSession> {
        self.sessions.remove(code).map(|(_, session)| session)
    }

    /// Snapshot of every record, for the diagnostics listing.
    pub fn list_active(&self) -> Vec<ShareSession> {
        self.sessions.iter().map(|entry| entry.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Moves a non-terminal session to Expired. Idempotent: expiring a
    /// session that is already over (or was never there) is a no-op, not an
    /// error, so cancellation can race completion or the reaper safely.
    pub fn expire(&self, code: &str, now: DateTime<Utc>) {
        if let Some(mut entry) = self.sessions.get_mut(code) {
            let session = entry.value_mut();
            if !session.status.is_terminal() {
                session.status = SessionStatus::Expired;
                session.ended_at = Some(now);
                info!(code = %session.code, "share expired");
            }
        }
    }

    /// One reaper pass: expire everything older than `ttl`, then purge
    /// terminal records that have lingered past the grace window.
    ///
    /// Takes the clock as a parameter so tests can drive simulated time.
    /// Each entry is visited under the same lock as every other mutator, so
    /// the sweep never catches a session mid-transition.
    pub fn sweep(&self, now: DateTime<Utc>, ttl: Duration) {
        for mut entry in self.sessions.iter_mut() {
            let session = entry.value_mut();
            if !session.status.is_terminal() && now.signed_duration_since(session.created_at) > ttl
            {
                session.status = SessionStatus::Expired;
                session.ended_at = Some(now);
                info!(code = %session.code, "share expired after TTL");
            }
        }

        let linger = Duration::seconds(ENDED_LINGER_SECS);
        self.sessions.retain(|code, session| {
            let purge = matches!(
                session.ended_at,
                Some(ended) if now.signed_duration_since(ended) > linger
            );
            if purge {
                debug!(%code, "purging ended share");
            }
            !purge
        });
    }
}

/// Periodic expiry sweep. Spawned once by the server; runs until the
/// process exits.
pub async fn run_reaper(store: SessionStore, ttl: Duration, interval: std::time::Duration) {
    loop {
        tokio::time::sleep(interval).await;
        store.sweep(Utc::now(), ttl);
        debug!(sessions = store.len(), "reaper tick");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> ShareMeta {
        ShareMeta {
            filename: "a.txt".to_string(),
            size: 100,
            file_hash: "deadbeef".to_string(),
        }
    }

    fn session(code: &str) -> ShareSession {
        ShareSession::new(code.to_string(), meta(), 8)
    }

    #[test]
    fn insert_rejects_duplicate_code() {
        let store = SessionStore::new();
        store.insert(session("abc")).unwrap();
        assert!(matches!(
            store.insert(session("abc")),
            Err(ShareError::CodeCollision)
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn update_on_missing_code_is_not_found() {
        let store = SessionStore::new();
        let result = store.update("nope", |_| Ok(()));
        assert!(matches!(result, Err(ShareError::NotFound)));
    }

    #[test]
    fn pairing_attaches_exactly_one_subscriber() {
        let mut s = session("abc");
        assert_eq!(s.participants(), 1);

        let echoed = s.attach_subscriber().unwrap();
        assert_eq!(echoed, meta());
        assert_eq!(s.status, SessionStatus::Paired);
        assert_eq!(s.participants(), 2);

        assert!(matches!(
            s.attach_subscriber(),
            Err(ShareError::AlreadyPaired)
        ));
        assert_eq!(s.participants(), 2);
    }

    #[test]
    fn pairing_a_terminal_session_reads_as_expired() {
        let mut s = session("abc");
        s.status = SessionStatus::Expired;
        assert!(matches!(s.attach_subscriber(), Err(ShareError::Expired)));

        let mut s = session("def");
        s.status = SessionStatus::Completed;
        assert!(matches!(s.attach_subscriber(), Err(ShareError::Expired)));
    }

    #[test]
    fn expire_is_idempotent() {
        let store = SessionStore::new();
        store.insert(session("abc")).unwrap();

        let t = Utc::now();
        store.expire("abc", t);
        assert_eq!(store.get("abc").unwrap().status, SessionStatus::Expired);
        assert_eq!(store.get("abc").unwrap().ended_at, Some(t));

        // Second expiry changes nothing, including the end timestamp.
        store.expire("abc", t + Duration::minutes(5));
        assert_eq!(store.get("abc").unwrap().ended_at, Some(t));

        // Expiring an unknown code is also a no-op.
        store.expire("nope", t);
    }

    #[test]
    fn sweep_expires_sessions_past_ttl() {
        let store = SessionStore::new();
        let t0 = Utc::now();
        let mut s = session("abc");
        s.created_at = t0;
        store.insert(s).unwrap();

        let ttl = Duration::hours(1);
        store.sweep(t0 + Duration::minutes(59), ttl);
        assert_eq!(store.get("abc").unwrap().status, SessionStatus::Pending);

        store.sweep(t0 + Duration::minutes(61), ttl);
        assert_eq!(store.get("abc").unwrap().status, SessionStatus::Expired);
    }

    #[test]
    fn sweep_purges_records_that_lingered_past_grace() {
        let store = SessionStore::new();
        let t0 = Utc::now();
        let mut s = session("abc");
        s.created_at = t0;
        store.insert(s).unwrap();

        let ttl = Duration::hours(1);
        store.sweep(t0 + Duration::minutes(61), ttl);
        assert!(store.get("abc").is_some());

        // Still visible inside the linger window, gone after it.
        store.sweep(t0 + Duration::minutes(65), ttl);
        assert!(store.get("abc").is_some());
        store.sweep(t0 + Duration::minutes(61 + 11), ttl);
        assert!(store.get("abc").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn role_parsing_rejects_unknown_strings() {
        assert_eq!(Role::parse("publisher").unwrap(), Role::Publisher);
        assert_eq!(Role::parse("subscriber").unwrap(), Role::Subscriber);
        assert!(matches!(
            Role::parse("observer"),
            Err(ShareError::UnknownSender(s)) if s == "observer"
        ));
    }

    #[test]
    fn list_active_snapshots_every_record() {
        let store = SessionStore::new();
        store.insert(session("one")).unwrap();
        store.insert(session("two")).unwrap();

        let mut codes: Vec<String> = store
            .list_active()
            .into_iter()
            .map(|s| s.code)
            .collect();
        codes.sort();
        assert_eq!(codes, vec!["one", "two"]);
    }
}
