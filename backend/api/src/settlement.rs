//! HTTP settlement client — drives the external collaborator that
//! custodies funds and reports pool yield.
//!
//! ## Resilience
//!
//! * Exponential back-off is applied when the collaborator returns a
//!   rate-limit response or a transient transport error, up to
//!   [`MAX_BACKOFF_SECS`] seconds.
//! * The core wraps every call in its own settlement timeout, so the
//!   retry loop is always bounded from the outside and an expired call
//!   surfaces as `SettlementTimeout` with the intent left re-drivable.

use std::time::Duration;

use escrow_protocol::errors::Result as CoreResult;
use escrow_protocol::{AccountId, EscrowError, ProjectId, SettlementGateway};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

const MAX_BACKOFF_SECS: u64 = 8;
const INITIAL_BACKOFF_SECS: u64 = 1;

// ─────────────────────────────────────────────────────────
// JSON-RPC response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct TransferResult {
    /// Opaque reference issued by the collaborator for reconciliation.
    #[serde(rename = "ref")]
    reference: String,
    #[serde(rename = "confirmedAt")]
    confirmed_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YieldResult {
    #[serde(rename = "yieldBps")]
    yield_bps: u32,
}

// ─────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────

/// JSON-RPC client for the settlement collaborator.
#[derive(Clone)]
pub struct HttpSettlementGateway {
    client: Client,
    url: String,
}

impl HttpSettlementGateway {
    pub fn new(client: Client, url: String) -> Self {
        Self { client, url }
    }

    /// Issue one RPC call, retrying transient failures with back-off.
    /// Hard errors from the collaborator are surfaced as
    /// [`EscrowError::SettlementRejected`].
    async fn call(&self, method: &str, params: Value) -> CoreResult<Value> {
        let mut backoff = INITIAL_BACKOFF_SECS;

        loop {
            let response = self
                .client
                .post(&self.url)
                .json(&json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "method": method,
                    "params": params,
                }))
                .send()
                .await;

            match response {
                Err(e) => {
                    warn!("settlement request failed (will retry in {backoff}s): {e}");
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
                    continue;
                }
                Ok(resp) => {
                    if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        warn!("rate-limited by settlement (will retry in {backoff}s)");
                        tokio::time::sleep(Duration::from_secs(backoff)).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
                        continue;
                    }

                    let body: RpcResponse = resp
                        .json()
                        .await
                        .map_err(|e| EscrowError::SettlementRejected(e.to_string()))?;

                    if let Some(err) = body.error {
                        return Err(EscrowError::SettlementRejected(format!(
                            "{}: {}",
                            err.code, err.message
                        )));
                    }

                    return body.result.ok_or_else(|| {
                        EscrowError::SettlementRejected(format!("empty result from {method}"))
                    });
                }
            }
        }
    }

    async fn transfer_call(&self, method: &str, params: Value) -> CoreResult<String> {
        let value = self.call(method, params).await?;
        let result: TransferResult = serde_json::from_value(value)
            .map_err(|e| EscrowError::SettlementRejected(e.to_string()))?;
        if let Some(ts) = result.confirmed_at.as_deref().and_then(parse_iso_to_unix) {
            debug!(reference = %result.reference, confirmed_at = ts, "settlement confirmed");
        }
        Ok(result.reference)
    }
}

impl SettlementGateway for HttpSettlementGateway {
    async fn deposit_funds(
        &self,
        project: ProjectId,
        funder: &AccountId,
        amount: i128,
    ) -> CoreResult<String> {
        self.transfer_call(
            "depositFunds",
            json!({
                "projectId": project.0,
                "funder": funder.0,
                "amount": amount.to_string(),
            }),
        )
        .await
    }

    async fn transfer_to_worker(
        &self,
        project: ProjectId,
        worker: &AccountId,
        amount: i128,
    ) -> CoreResult<String> {
        self.transfer_call(
            "transferToWorker",
            json!({
                "projectId": project.0,
                "worker": worker.0,
                "amount": amount.to_string(),
            }),
        )
        .await
    }

    async fn refund_to_funder(
        &self,
        project: ProjectId,
        funder: &AccountId,
        amount: i128,
    ) -> CoreResult<String> {
        self.transfer_call(
            "refundToFunder",
            json!({
                "projectId": project.0,
                "funder": funder.0,
                "amount": amount.to_string(),
            }),
        )
        .await
    }

    async fn query_pool_yield_bps(&self, project: ProjectId) -> CoreResult<u32> {
        let value = self.call("getPoolYield", json!({ "projectId": project.0 })).await?;
        let result: YieldResult = serde_json::from_value(value)
            .map_err(|e| EscrowError::SettlementRejected(e.to_string()))?;
        Ok(result.yield_bps)
    }
}

/// Parse an ISO-8601 timestamp string into a Unix epoch (seconds).
fn parse_iso_to_unix(s: &str) -> Option<i64> {
    use chrono::DateTime;
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.timestamp())
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
