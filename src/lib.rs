//! # Droplink - Peer-to-Peer File Share Broker
//!
//! Droplink coordinates direct file transfers between two browsers. The
//! sender registers a share and gets a short code; the recipient redeems the
//! code, and the two peers negotiate a WebRTC data channel by relaying
//! offers, answers, and ICE candidates through the broker. The file itself
//! travels peer to peer - the broker never sees a byte of it, only advisory
//! metadata (name, size, hash) and the opaque negotiation payloads.
//!
//! ## Quick Start
//!
//! ```bash
//! # Start the share server
//! droplink --host 0.0.0.0 --port 8390
//! ```
//!
//! ## Library Usage
//!
//! The coordinator works in-process without the HTTP layer:
//!
//! ```rust
//! use droplink::coordinator::ShareCoordinator;
//! use droplink::session::{SessionStore, ShareError, ShareMeta};
//!
//! # fn example() -> Result<(), ShareError> {
//! let coordinator = ShareCoordinator::new(SessionStore::new(), 32);
//! let code = coordinator.publish(ShareMeta {
//!     filename: "photo.jpg".to_string(),
//!     size: 4_194_304,
//!     file_hash: "9f86d081884c7d65".to_string(),
//! })?;
//! println!("share this code: {code}");
//! # Ok(())
//! # }
//! ```
//!
//! Or run the full server and drive it over HTTP:
//!
//! ```rust,no_run
//! use droplink::server::{Args, run_server};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let args = Args {
//!     host: "0.0.0.0".to_string(),
//!     port: 8390,
//!     ttl_secs: 3600,
//!     sweep_secs: 60,
//!     queue_capacity: 32,
//!     poll_wait_ms: 25_000,
//! };
//! run_server(args).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **[code]**: collision-resistant, URL-safe share codes
//! - **[session]**: the share record, its state machine, the store, and the
//!   expiry reaper
//! - **[signal]**: bounded per-direction FIFO queues and the relay router
//! - **[coordinator](coordinator)**: the public publish/subscribe/relay/complete
//!   operations
//! - **[server]**: the axum HTTP surface
//! - **[client]**: a typed API client for embedders and tests
//!
//! ## Lifecycle Guarantees
//!
//! - A share code names at most two peers: one publisher, one subscriber
//! - Session status only moves forward; expired and completed shares accept
//!   no further messages
//! - Each direction of a session delivers signals in send order
//! - Unconsumed shares expire after a configurable TTL (one hour by default)

pub mod client;
pub mod code;
pub mod coordinator;
pub mod server;
pub mod session;
pub mod signal;
