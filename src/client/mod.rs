//! # Droplink API Client
//!
//! A typed client for the share server's HTTP API. This is what an embedding
//! application (or the integration test suite) uses to drive a transfer: the
//! browser-side JavaScript speaks the same endpoints.
//!
//! The client carries no session state of its own - the server holds the
//! truth about every share. A typical publisher flow:
//!
//! 1. [`ShareClient::publish`] the file metadata, hand the code to the peer
//! 2. [`ShareClient::poll`] the publisher inbox for the answer and candidates
//! 3. [`ShareClient::signal`] the offer and ICE candidates as they appear
//! 4. [`ShareClient::complete`] once the data channel has delivered the file
//!
//! The subscriber mirrors it: [`ShareClient::subscribe`] to redeem the code,
//! then signal and poll with the subscriber role.

use anyhow::{Result, ensure};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::{Role, SessionStatus, ShareMeta};
use crate::signal::{SignalBatch, SignalKind};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PublishRequest<'a> {
    filename: &'a str,
    size: u64,
    file_hash: &'a str,
}

#[derive(Deserialize)]
struct PublishResponse {
    code: String,
}

/// Share metadata and lifecycle state as reported by `GET /share/{code}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareStatus {
    pub filename: String,
    pub size: u64,
    pub file_hash: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct SignalRequest<'a> {
    role: Role,
    kind: SignalKind,
    payload: &'a Value,
}

/// Typed handle on one share server.
pub struct ShareClient {
    http: Client,
    base_url: String,
}

impl ShareClient {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:8390`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: Client::new(),
            base_url,
        }
    }

    /// Registers a file for sharing and returns the code to hand to the
    /// other peer.
    pub async fn publish(&self, filename: &str, size: u64, file_hash: &str) -> Result<String> {
        let response = self
            .http
            .post(format!("{}/share", self.base_url))
            .json(&PublishRequest {
                filename,
                size,
                file_hash,
            })
            .send()
            .await?;
        ensure!(
            response.status().is_success(),
            "failed to publish share: {}",
            response.status()
        );
        let body: PublishResponse = response.json().await?;
        Ok(body.code)
    }

    /// Reads a share's metadata and status without joining it.
    pub async fn fetch(&self, code: &str) -> Result<ShareStatus> {
        let response = self
            .http
            .get(format!("{}/share/{code}", self.base_url))
            .send()
            .await?;
        ensure!(
            response.status().is_success(),
            "failed to fetch share {code}: {}",
            response.status()
        );
        Ok(response.json().await?)
    }

    /// Redeems a share code, pairing the session. Returns the file metadata
    /// for display and post-transfer hash verification.
    pub async fn subscribe(&self, code: &str) -> Result<ShareMeta> {
        let response = self
            .http
            .post(format!("{}/share/{code}/subscribe", self.base_url))
            .send()
            .await?;
        ensure!(
            response.status().is_success(),
            "failed to subscribe to share {code}: {}",
            response.status()
        );
        Ok(response.json().await?)
    }

    /// Queues one negotiation message for the opposite peer.
    pub async fn signal(
        &self,
        code: &str,
        role: Role,
        kind: SignalKind,
        payload: &Value,
    ) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/share/{code}/signal", self.base_url))
            .json(&SignalRequest {
                role,
                kind,
                payload,
            })
            .send()
            .await?;
        ensure!(
            response.status().is_success(),
            "failed to signal share {code}: {}",
            response.status()
        );
        Ok(())
    }

    /// Long-polls `role`'s inbox for messages past the `since` cursor. Pass
    /// the returned batch's `next` as the following poll's cursor.
    pub async fn poll(&self, code: &str, role: Role, since: u64) -> Result<SignalBatch> {
        let response = self
            .http
            .get(format!("{}/share/{code}/signal", self.base_url))
            .query(&[("role", role.to_string()), ("since", since.to_string())])
            .send()
            .await?;
        ensure!(
            response.status().is_success(),
            "failed to poll share {code}: {}",
            response.status()
        );
        Ok(response.json().await?)
    }

    /// Reports that the data channel delivered the file.
    pub async fn complete(&self, code: &str) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/share/{code}/complete", self.base_url))
            .send()
            .await?;
        ensure!(
            response.status().is_success(),
            "failed to complete share {code}: {}",
            response.status()
        );
        Ok(())
    }

    /// Abandons a share. Safe to call on a share that is already over.
    pub async fn cancel(&self, code: &str) -> Result<()> {
        let response = self
            .http
            .delete(format!("{}/share/{code}", self.base_url))
            .send()
            .await?;
        ensure!(
            response.status().is_success(),
            "failed to cancel share {code}: {}",
            response.status()
        );
        Ok(())
    }
}
