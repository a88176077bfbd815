//! HTTP-backed `LeaderForwarder`: the follower side of the forwarded-write
//! protocol in spec.md §4.1 — relay the exact method, path, and body to the
//! leader and hand back its response verbatim.
//!
//! Grounded on the proxy pattern in `jizhuozhi-hermes`'s gateway (itself a
//! forward-to-upstream HTTP relay) for the choice of `reqwest`; run as a
//! blocking client on the "forward-to-leader pool" spec.md §5 describes,
//! since no async runtime is required by this system.

use std::time::Duration;

use meridian_engine::replication::{LeaderForwarder, ReplicationError};
use meridian_indexer::{HandlerRequest, HandlerResponse};
use reqwest::blocking::Client;

/// Forwards writes to the leader over plain HTTP, matching spec.md's
/// `https?://<leader>/...` contract (this implementation always uses
/// `http://`; a deployment terminating TLS in front would adjust the
/// scheme here).
pub struct HttpLeaderForwarder {
    client: Client,
}

impl HttpLeaderForwarder {
    /// Build a forwarder with the given per-request timeout.
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client config is static and always valid");
        HttpLeaderForwarder { client }
    }
}

impl Default for HttpLeaderForwarder {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl LeaderForwarder for HttpLeaderForwarder {
    fn forward(&self, leader: &str, req: &HandlerRequest) -> Result<HandlerResponse, ReplicationError> {
        let url = format!("http://{leader}{}", req.path);
        let method = reqwest::Method::from_bytes(req.method.as_bytes())
            .map_err(|e| ReplicationError::Forward(format!("invalid method {}: {e}", req.method)))?;

        let response = self
            .client
            .request(method, &url)
            .body(req.body.clone())
            .send()
            .map_err(|e| ReplicationError::Forward(e.to_string()))?;

        let status_code = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let body = response.bytes().map_err(|e| ReplicationError::Forward(e.to_string()))?.to_vec();

        Ok(HandlerResponse {
            status_code,
            body,
            content_type,
            is_alive: true,
            is_final: true,
        })
    }
}
