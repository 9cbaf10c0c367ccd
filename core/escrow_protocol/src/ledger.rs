//! # Ledger Store
//!
//! Sole owner of every [`Project`] record. All other components receive
//! references and route mutations through here so consistency is checked
//! centrally instead of being duplicated.
//!
//! ## Locking model
//!
//! Each project lives behind its own `tokio::sync::Mutex`; operations on
//! different projects proceed independently, while two callers racing on
//! the same project are serialized. The outer map lock is held only long
//! enough to look up or insert a cell — never across an `.await` into the
//! settlement collaborator.
//!
//! ## Journal
//!
//! Every mutation appends one [`JournalEvent`] to the in-memory history
//! (projects are never physically deleted) and forwards a copy to an
//! optional mpsc subscriber, which the backend drains into SQLite.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::debug;

use crate::errors::{EscrowError, Result};
use crate::events::{JournalEvent, JournalKind};
use crate::types::{AccountId, IntentId, Project, ProjectId, WithdrawableBalance};

pub struct LedgerStore {
    /// Account credited with forfeits, penalties, and platform fees.
    platform: AccountId,
    projects: RwLock<HashMap<ProjectId, Arc<Mutex<Project>>>>,
    /// Withdrawable projections per account, derived purely from
    /// committed ledger mutations.
    accounts: Mutex<HashMap<AccountId, WithdrawableBalance>>,
    journal: Mutex<Vec<JournalEvent>>,
    journal_tx: Mutex<Option<mpsc::UnboundedSender<JournalEvent>>>,
    next_project_id: AtomicU64,
    next_intent_id: AtomicU64,
    next_seq: AtomicU64,
}

impl LedgerStore {
    pub fn new(platform: AccountId) -> Self {
        Self {
            platform,
            projects: RwLock::new(HashMap::new()),
            accounts: Mutex::new(HashMap::new()),
            journal: Mutex::new(Vec::new()),
            journal_tx: Mutex::new(None),
            next_project_id: AtomicU64::new(0),
            next_intent_id: AtomicU64::new(0),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn platform_account(&self) -> &AccountId {
        &self.platform
    }

    /// Allocate the next project identifier.
    pub fn next_project_id(&self) -> ProjectId {
        ProjectId(self.next_project_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Allocate the next settlement-intent identifier.
    pub fn next_intent_id(&self) -> IntentId {
        IntentId(self.next_intent_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Insert a freshly created project.
    pub async fn insert(&self, project: Project) {
        let id = project.id;
        self.projects
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(project)));
    }

    /// Look up the lock cell for `id`. The returned `Arc` is the mutual
    /// exclusion boundary for every mutation of that project.
    pub async fn cell(&self, id: ProjectId) -> Result<Arc<Mutex<Project>>> {
        self.projects
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(EscrowError::ProjectNotFound(id))
    }

    /// Snapshot a project for read-only consumers.
    pub async fn project(&self, id: ProjectId) -> Result<Project> {
        let cell = self.cell(id).await?;
        let guard = cell.lock().await;
        Ok(guard.clone())
    }

    // ── Journal ──────────────────────────────────────────────────────

    /// Append an audit record and fan it out to the subscriber, if any.
    pub async fn record(
        &self,
        project_id: ProjectId,
        kind: JournalKind,
        actor: Option<AccountId>,
        milestone: Option<u32>,
        amount: Option<i128>,
        note: Option<String>,
        at: u64,
    ) {
        let event = JournalEvent {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            project_id,
            kind,
            actor,
            milestone,
            amount,
            note,
            at,
        };
        debug!(
            project = %project_id,
            kind = kind.as_str(),
            seq = event.seq,
            "journal"
        );
        if let Some(tx) = self.journal_tx.lock().await.as_ref() {
            // A closed receiver only means the subscriber went away.
            let _ = tx.send(event.clone());
        }
        self.journal.lock().await.push(event);
    }

    /// Attach the single journal subscriber, replacing any previous one.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<JournalEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.journal_tx.lock().await = Some(tx);
        rx
    }

    /// Full audit history for one project, oldest first.
    pub async fn journal_for(&self, id: ProjectId) -> Vec<JournalEvent> {
        self.journal
            .lock()
            .await
            .iter()
            .filter(|e| e.project_id == id)
            .cloned()
            .collect()
    }

    // ── Withdrawable projections ─────────────────────────────────────

    /// Credit escrow money (released payouts, refunds, forfeits, fees).
    pub async fn credit_escrow(&self, account: &AccountId, amount: i128) {
        if amount == 0 {
            return;
        }
        let mut accounts = self.accounts.lock().await;
        let balance = accounts.entry(account.clone()).or_default();
        balance.escrow_amount += amount;
        balance.total += amount;
    }

    /// Credit realized yield.
    pub async fn credit_yield(&self, account: &AccountId, amount: i128) {
        if amount == 0 {
            return;
        }
        let mut accounts = self.accounts.lock().await;
        let balance = accounts.entry(account.clone()).or_default();
        balance.yield_amount += amount;
        balance.total += amount;
    }

    /// What `account` could withdraw right now.
    pub async fn withdrawable(&self, account: &AccountId) -> WithdrawableBalance {
        self.accounts
            .lock()
            .await
            .get(account)
            .copied()
            .unwrap_or_default()
    }
}

/// The conservation equation every project must satisfy at all times:
/// live balances plus everything ever paid out, withheld, refunded, or
/// forfeited equals everything ever deposited.
pub fn conservation_holds(project: &Project) -> bool {
    project.vault_balance
        + project.pool_balance
        + project.totals.released_to_worker
        + project.totals.platform_retained
        + project.totals.refunded_to_funder
        + project.totals.forfeited_to_platform
        == project.total_deposited
}
