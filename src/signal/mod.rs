//! # Signaling Relay
//!
//! Carries connection-negotiation messages (offers, answers, ICE candidates)
//! between the two peers of a share session. Payloads are opaque JSON: the
//! broker never inspects them, it only promises that each direction of a
//! session delivers messages in the order they were sent.
//!
//! ## Delivery model
//!
//! ```text
//! publisher ──send──► [to_subscriber queue] ──poll──► subscriber
//! publisher ◄──poll── [to_publisher queue]  ◄──send── subscriber
//! ```
//!
//! Delivery is pull-based. A sender appends to its direction's queue and
//! returns immediately; the recipient polls its inbox with a `since` cursor
//! and long-waits until something arrives or the wait bound elapses. Sending
//! never blocks on the remote peer.
//!
//! Messages stay queued until eviction, so a client that reconnects re-reads
//! from its last cursor instead of losing the tail. Queues are bounded with
//! drop-oldest eviction: negotiation messages are worthless once a peer has
//! restarted its handshake, so when a recipient falls behind the oldest
//! messages go first and a per-queue counter records how many were discarded.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::session::{Role, SessionStatus, SessionStore, ShareError};

/// The three kinds of negotiation message. Wire names match what browser
/// signaling code conventionally posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    #[serde(rename = "offer")]
    Offer,
    #[serde(rename = "answer")]
    Answer,
    #[serde(rename = "ice-candidate")]
    IceCandidate,
}

/// One queued negotiation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalMessage {
    pub seq: u64,
    pub kind: SignalKind,
    pub payload: Value,
}

/// What a poll returns: in-order messages past the cursor, the cursor to use
/// next time, and how many messages this direction has dropped so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalBatch {
    pub messages: Vec<SignalMessage>,
    pub next: u64,
    pub dropped: u64,
}

struct QueueState {
    messages: VecDeque<SignalMessage>,
    next_seq: u64,
    dropped: u64,
}

/// Bounded FIFO for one direction of one session.
///
/// Sequence numbers start at 1 and never repeat within a queue, so `seq`
/// doubles as the resumption cursor: a reader that has seen up to `n` asks
/// for everything after `n`.
pub struct SignalQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl SignalQueue {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(QueueState {
                messages: VecDeque::new(),
                next_seq: 1,
                dropped: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Appends a message and assigns it the next sequence number. A full
    /// queue evicts its oldest message first.
    pub fn push(&self, kind: SignalKind, payload: Value) -> u64 {
        let seq;
        {
            let mut state = self.state.lock().unwrap();
            seq = state.next_seq;
            state.next_seq += 1;
            state.messages.push_back(SignalMessage { seq, kind, payload });
            if state.messages.len() > self.capacity {
                state.messages.pop_front();
                state.dropped += 1;
                warn!(
                    dropped = state.dropped,
                    "signal queue full, evicted oldest message"
                );
            }
        }
        self.notify.notify_waiters();
        seq
    }

    /// Everything queued after `cursor`, in send order. Messages are not
    /// consumed; eviction is the only removal, so a reconnecting client can
    /// re-read from its last cursor.
    pub fn since(&self, cursor: u64) -> SignalBatch {
        let state = self.state.lock().unwrap();
        let messages: Vec<SignalMessage> = state
            .messages
            .iter()
            .filter(|m| m.seq > cursor)
            .cloned()
            .collect();
        let next = messages.last().map_or(cursor, |m| m.seq);
        SignalBatch {
            messages,
            next,
            dropped: state.dropped,
        }
    }

    /// Total messages this queue has evicted.
    pub fn dropped(&self) -> u64 {
        self.state.lock().unwrap().dropped
    }

    /// Long-poll: resolves as soon as something past `cursor` is queued, or
    /// with an empty batch once `wait` elapses.
    pub async fn wait_since(&self, cursor: u64, wait: Duration) -> SignalBatch {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking, so a push between the check and the
            // await still wakes us.
            notified.as_mut().enable();

            let batch = self.since(cursor);
            if !batch.messages.is_empty() {
                return batch;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.since(cursor);
            }
        }
    }
}

/// The two direction queues of one session. Cloning shares the queues, so a
/// record cloned out of the store still feeds the same inboxes.
#[derive(Clone)]
pub struct SignalChannels {
    to_subscriber: Arc<SignalQueue>,
    to_publisher: Arc<SignalQueue>,
}

impl SignalChannels {
    pub fn new(capacity: usize) -> Self {
        Self {
            to_subscriber: Arc::new(SignalQueue::new(capacity)),
            to_publisher: Arc::new(SignalQueue::new(capacity)),
        }
    }

    /// The queue a message sent by `from` lands in.
    pub fn outbound(&self, from: Role) -> &SignalQueue {
        match from {
            Role::Publisher => &self.to_subscriber,
            Role::Subscriber => &self.to_publisher,
        }
    }

    /// The inbox `role` polls: messages sent by the opposite peer.
    pub fn inbound(&self, role: Role) -> &SignalQueue {
        self.outbound(role.opposite())
    }
}

/// Relays negotiation messages between the two peers of a session.
///
/// Sending validates the session state under the store's per-code lock, so a
/// racing cancel or expiry is ordered deterministically: the loser of the
/// race observes the terminal status instead of enqueueing into a dead
/// session.
#[derive(Clone)]
pub struct SignalRouter {
    store: SessionStore,
}

impl SignalRouter {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    /// Queues one message from `from` for the opposite peer and returns the
    /// assigned sequence number. Only a Paired session relays.
    pub fn send(
        &self,
        code: &str,
        from: Role,
        kind: SignalKind,
        payload: Value,
    ) -> Result<u64, ShareError> {
        self.store.update(code, |session| match session.status {
            SessionStatus::Paired => {
                let seq = session.channels.outbound(from).push(kind, payload);
                debug!(code = %session.code, %from, ?kind, seq, "relayed signal");
                Ok(seq)
            }
            SessionStatus::Expired => Err(ShareError::Expired),
            SessionStatus::Pending | SessionStatus::Completed => Err(ShareError::NotPaired),
        })
    }

    /// Delivers `role`'s queued messages after `since`, long-waiting up to
    /// `wait` when the inbox is empty.
    ///
    /// Polling is allowed while the session is still Pending: the publisher
    /// starts listening for an answer before anyone has redeemed the code.
    pub async fn poll(
        &self,
        code: &str,
        role: Role,
        since: u64,
        wait: Duration,
    ) -> Result<SignalBatch, ShareError> {
        let session = self.store.get(code).ok_or(ShareError::NotFound)?;
        if session.status == SessionStatus::Expired {
            return Err(ShareError::Expired);
        }
        Ok(session.channels.inbound(role).wait_since(since, wait).await)
    }
}
