//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use escrow_protocol::{
    AccountId, ApprovalPolicy, EscrowProtocol, MilestoneSpec, ProjectId, SystemClock,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::db::{self, JournalRow};
use crate::errors::Result;
use crate::settlement::HttpSettlementGateway;

pub type Protocol = EscrowProtocol<HttpSettlementGateway, SystemClock>;

pub struct ApiState {
    pub protocol: Protocol,
    pub pool: SqlitePool,
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub funder: AccountId,
    pub policy: ApprovalPolicy,
    pub platform_fee_bps: u32,
    pub milestones: Vec<MilestoneSpec>,
}

#[derive(Serialize)]
pub struct CreateProjectResponse {
    pub project_id: ProjectId,
}

#[derive(Deserialize)]
pub struct DepositRequest {
    pub funder: AccountId,
    pub amount: i128,
}

#[derive(Deserialize)]
pub struct AssignWorkerRequest {
    pub caller: AccountId,
    pub worker: AccountId,
}

#[derive(Deserialize)]
pub struct SubmitRequest {
    pub worker: AccountId,
    pub evidence: String,
}

#[derive(Deserialize)]
pub struct ApproveRequest {
    pub caller: AccountId,
}

#[derive(Deserialize)]
pub struct RejectRequest {
    pub caller: AccountId,
    pub reason: String,
}

#[derive(Deserialize)]
pub struct ReleaseRequest {
    pub caller: AccountId,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub caller: AccountId,
    pub reason: String,
}

#[derive(Serialize)]
pub struct JournalResponse {
    pub count: usize,
    pub events: Vec<JournalRow>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /projects`
pub async fn create_project(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse> {
    let project_id = state
        .protocol
        .create_project(req.funder, req.policy, req.platform_fee_bps, req.milestones)
        .await?;
    Ok(Json(CreateProjectResponse { project_id }))
}

/// `GET /projects/:id`
pub async fn get_project(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse> {
    let project = state.protocol.project(ProjectId(id)).await?;
    Ok(Json(project))
}

/// `POST /projects/:id/deposits`
pub async fn deposit(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
    Json(req): Json<DepositRequest>,
) -> Result<impl IntoResponse> {
    let receipt = state
        .protocol
        .deposit(ProjectId(id), &req.funder, req.amount)
        .await?;
    Ok(Json(receipt))
}

/// `POST /projects/:id/worker`
pub async fn assign_worker(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
    Json(req): Json<AssignWorkerRequest>,
) -> Result<impl IntoResponse> {
    state
        .protocol
        .assign_worker(ProjectId(id), &req.caller, req.worker)
        .await?;
    Ok(Json(serde_json::json!({ "status": "assigned" })))
}

/// `POST /projects/:id/milestones/:index/submit`
pub async fn submit_milestone(
    State(state): State<Arc<ApiState>>,
    Path((id, index)): Path<(u64, u32)>,
    Json(req): Json<SubmitRequest>,
) -> Result<impl IntoResponse> {
    state
        .protocol
        .submit(ProjectId(id), &req.worker, index, req.evidence)
        .await?;
    Ok(Json(serde_json::json!({ "status": "submitted" })))
}

/// `POST /projects/:id/milestones/:index/approve`
pub async fn approve_milestone(
    State(state): State<Arc<ApiState>>,
    Path((id, index)): Path<(u64, u32)>,
    Json(req): Json<ApproveRequest>,
) -> Result<impl IntoResponse> {
    state.protocol.approve(ProjectId(id), &req.caller, index).await?;
    Ok(Json(serde_json::json!({ "status": "approved" })))
}

/// `POST /projects/:id/milestones/:index/reject`
pub async fn reject_milestone(
    State(state): State<Arc<ApiState>>,
    Path((id, index)): Path<(u64, u32)>,
    Json(req): Json<RejectRequest>,
) -> Result<impl IntoResponse> {
    state
        .protocol
        .reject(ProjectId(id), &req.caller, index, req.reason)
        .await?;
    Ok(Json(serde_json::json!({ "status": "rejected" })))
}

/// `POST /projects/:id/milestones/:index/release`
///
/// Drives the two-phase release; a `504` response means the settlement
/// collaborator did not confirm in time and the same call can simply be
/// retried.
pub async fn release_milestone(
    State(state): State<Arc<ApiState>>,
    Path((id, index)): Path<(u64, u32)>,
    Json(req): Json<ReleaseRequest>,
) -> Result<impl IntoResponse> {
    let payout = state.protocol.release(ProjectId(id), &req.caller, index).await?;
    Ok(Json(payout))
}

/// `POST /projects/:id/cancel`
pub async fn cancel_project(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
    Json(req): Json<CancelRequest>,
) -> Result<impl IntoResponse> {
    state.protocol.cancel(ProjectId(id), &req.caller, req.reason).await?;
    Ok(Json(serde_json::json!({ "status": "cancelled" })))
}

/// `GET /accounts/:id/withdrawable`
pub async fn get_withdrawable(
    State(state): State<Arc<ApiState>>,
    Path(account): Path<String>,
) -> Result<impl IntoResponse> {
    let balance = state
        .protocol
        .withdrawable_balance(&AccountId::new(account))
        .await;
    Ok(Json(balance))
}

/// `GET /projects/:id/events`
///
/// Returns the persisted journal for the given project.
pub async fn get_project_events(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let events = db::get_journal_for_project(&state.pool, id).await?;
    let count = events.len();
    Ok(Json(JournalResponse { count, events }))
}

/// `GET /events`
///
/// Returns the persisted journal across all projects.
pub async fn get_all_events(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse> {
    let events = db::get_all_journal(&state.pool).await?;
    let count = events.len();
    Ok(Json(JournalResponse { count, events }))
}
