//! # Share Lifecycle Coordination
//!
//! [`ShareCoordinator`] is the public face of the broker: every operation a
//! caller can perform on a share goes through it. It owns the session store
//! and the signaling router and confines side effects to them - no I/O
//! happens here beyond what the caller supplies.
//!
//! The coordinator is an explicitly constructed value, not a process-wide
//! singleton. Tests build a fresh one per case; the HTTP server builds one
//! at startup and hands clones to its handlers.

use chrono::Utc;
use serde_json::Value;
use std::time::Duration;
use tracing::info;

use crate::code;
use crate::session::{Role, SessionStatus, SessionStore, ShareError, ShareMeta, ShareSession};
use crate::signal::{SignalBatch, SignalKind, SignalRouter};

/// How many fresh codes publish draws before reporting
/// [`ShareError::GenerationExhausted`].
const CODE_ATTEMPTS: usize = 5;

/// Top-level orchestrator for the publish/subscribe/relay/complete flow.
///
/// Cloning is cheap and every clone operates on the same session table.
#[derive(Clone)]
pub struct ShareCoordinator {
    store: SessionStore,
    router: SignalRouter,
    queue_capacity: usize,
}

impl ShareCoordinator {
    /// `queue_capacity` bounds each direction's signal queue; see the signal
    /// module for the eviction policy.
    pub fn new(store: SessionStore, queue_capacity: usize) -> Self {
        Self {
            router: SignalRouter::new(store.clone()),
            store,
            queue_capacity,
        }
    }

    /// Registers a file for sharing and returns its share code. The session
    /// starts Pending with the publisher attached.
    pub fn publish(&self, meta: ShareMeta) -> Result<String, ShareError> {
        self.publish_with(meta, code::generate)
    }

    fn publish_with(
        &self,
        meta: ShareMeta,
        mut next_code: impl FnMut() -> String,
    ) -> Result<String, ShareError> {
        for _ in 0..CODE_ATTEMPTS {
            let code = next_code();
            let session = ShareSession::new(code.clone(), meta.clone(), self.queue_capacity);
            match self.store.insert(session) {
                Ok(()) => {
                    info!(%code, filename = %meta.filename, size = meta.size, "share published");
                    return Ok(code);
                }
                Err(ShareError::CodeCollision) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(ShareError::GenerationExhausted)
    }

    /// Redeems a code: pairs the session and returns the file metadata the
    /// subscriber needs for display and post-transfer verification. Exactly
    /// one concurrent caller wins; the rest observe
    /// [`ShareError::AlreadyPaired`].
    pub fn subscribe(&self, code: &str) -> Result<ShareMeta, ShareError> {
        let meta = self.store.update(code, |session| session.attach_subscriber())?;
        info!(code, "share paired");
        Ok(meta)
    }

    /// Metadata read without side effects. A Pending share stays Pending.
    pub fn lookup(&self, code: &str) -> Result<ShareSession, ShareError> {
        let session = self.store.get(code).ok_or(ShareError::NotFound)?;
        if session.status == SessionStatus::Expired {
            return Err(ShareError::Expired);
        }
        Ok(session)
    }

    /// Queues one negotiation message from `from` for the opposite peer.
    pub fn relay(
        &self,
        code: &str,
        from: Role,
        kind: SignalKind,
        payload: Value,
    ) -> Result<u64, ShareError> {
        self.router.send(code, from, kind, payload)
    }

    /// Drains `role`'s inbox past the `since` cursor, long-waiting up to
    /// `wait` when it is empty.
    pub async fn poll(
        &self,
        code: &str,
        role: Role,
        since: u64,
        wait: Duration,
    ) -> Result<SignalBatch, ShareError> {
        self.router.poll(code, role, since, wait).await
    }

    /// Records that the transport layer delivered the file. The session
    /// moves to Completed and the record is removed at once; the code has no
    /// further meaning.
    pub fn complete(&self, code: &str) -> Result<(), ShareError> {
        self.store.update(code, |session| match session.status {
            SessionStatus::Paired => {
                session.status = SessionStatus::Completed;
                session.ended_at = Some(Utc::now());
                Ok(())
            }
            from => Err(ShareError::InvalidTransition {
                from,
                to: SessionStatus::Completed,
            }),
        })?;
        self.store.remove(code);
        info!(code, "share completed");
        Ok(())
    }

    /// Explicit teardown. Idempotent: cancelling a share that is already
    /// over, or was never there, is a no-op.
    pub fn cancel(&self, code: &str) {
        self.store.expire(code, Utc::now());
    }

    /// Diagnostics snapshot of every record still in the table.
    pub fn list(&self) -> Vec<ShareSession> {
        self.store.list_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn meta() -> ShareMeta {
        ShareMeta {
            filename: "a.txt".to_string(),
            size: 100,
            file_hash: "deadbeef".to_string(),
        }
    }

    fn coordinator() -> ShareCoordinator {
        ShareCoordinator::new(SessionStore::new(), 8)
    }

    #[tokio::test]
    async fn full_share_round_trip() {
        let coordinator = coordinator();
        let code = coordinator.publish(meta()).unwrap();

        let echoed = coordinator.subscribe(&code).unwrap();
        assert_eq!(echoed, meta());
        assert_eq!(
            coordinator.lookup(&code).unwrap().status,
            SessionStatus::Paired
        );

        let offer = json!({ "sdp": "v=0", "type": "offer" });
        coordinator
            .relay(&code, Role::Publisher, SignalKind::Offer, offer.clone())
            .unwrap();
        let inbox = coordinator
            .poll(&code, Role::Subscriber, 0, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(inbox.messages.len(), 1);
        assert_eq!(inbox.messages[0].payload, offer);

        coordinator.complete(&code).unwrap();
        assert!(matches!(
            coordinator.lookup(&code),
            Err(ShareError::NotFound)
        ));
    }

    #[test]
    fn publish_retries_collisions_up_to_the_bound() {
        let coordinator = coordinator();

        let first = coordinator
            .publish_with(meta(), || "taken".to_string())
            .unwrap();
        assert_eq!(first, "taken");

        // Every draw collides: the retry budget runs out.
        assert!(matches!(
            coordinator.publish_with(meta(), || "taken".to_string()),
            Err(ShareError::GenerationExhausted)
        ));

        // One collision followed by a fresh draw succeeds.
        let mut draws = 0;
        let second = coordinator
            .publish_with(meta(), move || {
                draws += 1;
                if draws == 1 { "taken" } else { "fresh" }.to_string()
            })
            .unwrap();
        assert_eq!(second, "fresh");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_publishes_get_distinct_codes() {
        let coordinator = coordinator();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move {
                coordinator.publish(meta()).unwrap()
            }));
        }

        let mut codes = HashSet::new();
        for handle in handles {
            codes.insert(handle.await.unwrap());
        }
        assert_eq!(codes.len(), 32);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn exactly_one_concurrent_join_wins() {
        let coordinator = coordinator();
        let code = coordinator.publish(meta()).unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let coordinator = coordinator.clone();
            let code = code.clone();
            handles.push(tokio::spawn(async move { coordinator.subscribe(&code) }));
        }

        let mut won = 0;
        let mut lost = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(echoed) => {
                    assert_eq!(echoed, meta());
                    won += 1;
                }
                Err(ShareError::AlreadyPaired) => lost += 1,
                Err(other) => panic!("unexpected join failure: {other}"),
            }
        }
        assert_eq!(won, 1);
        assert_eq!(lost, 15);
    }

    #[tokio::test]
    async fn cancel_is_terminal_and_idempotent() {
        let coordinator = coordinator();
        let code = coordinator.publish(meta()).unwrap();

        coordinator.cancel(&code);
        assert!(matches!(
            coordinator.lookup(&code),
            Err(ShareError::Expired)
        ));
        assert!(matches!(
            coordinator.subscribe(&code),
            Err(ShareError::Expired)
        ));
        assert!(matches!(
            coordinator.relay(&code, Role::Publisher, SignalKind::Offer, json!({})),
            Err(ShareError::Expired)
        ));

        // Second cancel, and cancelling a code that never existed, are no-ops.
        coordinator.cancel(&code);
        coordinator.cancel("never-there");
        assert!(matches!(
            coordinator.lookup(&code),
            Err(ShareError::Expired)
        ));
    }

    #[test]
    fn complete_requires_a_paired_session() {
        let coordinator = coordinator();
        let code = coordinator.publish(meta()).unwrap();

        assert!(matches!(
            coordinator.complete(&code),
            Err(ShareError::InvalidTransition {
                from: SessionStatus::Pending,
                ..
            })
        ));
        assert!(matches!(
            coordinator.complete("nope"),
            Err(ShareError::NotFound)
        ));

        coordinator.subscribe(&code).unwrap();
        coordinator.complete(&code).unwrap();

        // The record is gone, so a second completion reads as NotFound.
        assert!(matches!(
            coordinator.complete(&code),
            Err(ShareError::NotFound)
        ));
    }

    #[test]
    fn list_reports_live_sessions() {
        let coordinator = coordinator();
        let one = coordinator.publish(meta()).unwrap();
        let two = coordinator.publish(meta()).unwrap();
        coordinator.subscribe(&two).unwrap();

        let listed: Vec<(String, SessionStatus)> = coordinator
            .list()
            .into_iter()
            .map(|s| (s.code, s.status))
            .collect();
        assert_eq!(listed.len(), 2);
        assert!(listed.contains(&(one, SessionStatus::Pending)));
        assert!(listed.contains(&(two, SessionStatus::Paired)));
    }
}
