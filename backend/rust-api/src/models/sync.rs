use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Result of one registry reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub created: usize,
    pub updated: usize,
    /// Submissions that resolved to no user and contributed nothing
    pub unmatched: usize,
    /// Credential entries dropped as stale or superseded
    pub expired_credentials: usize,
    pub failed_writes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuizIngestReport {
    pub quiz_name: String,
    pub quiz_id: String,
    pub stored: Option<usize>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub quizzes: Vec<QuizIngestReport>,
    pub ids_repaired: usize,
    pub reconcile: Option<ReconcileSummary>,
    pub reconcile_error: Option<String>,
    /// The cross-process lease lapsed; remaining steps were not run
    pub lease_lost: bool,
}

impl CycleReport {
    pub fn failed_quizzes(&self) -> usize {
        self.quizzes.iter().filter(|q| q.error.is_some()).count()
    }

    pub fn is_clean(&self) -> bool {
        self.failed_quizzes() == 0 && self.reconcile_error.is_none() && !self.lease_lost
    }

    /// One-line account of everything that kept the cycle from being clean.
    pub fn failure_summary(&self) -> String {
        let mut problems = Vec::new();
        let failed = self.failed_quizzes();
        if failed > 0 {
            problems.push(format!("{} failed quizzes", failed));
        }
        if let Some(err) = &self.reconcile_error {
            problems.push(format!("reconciliation failed: {}", err));
        }
        if self.lease_lost {
            problems.push("sync lease lost before reconciliation".to_string());
        }
        format!("Sync cycle finished with {}", problems.join("; "))
    }
}

/// Scheduler-owned sync state, shared with the status endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStatus {
    pub busy: bool,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub cycles_completed: u64,
    pub cycles_skipped: u64,
    pub last_report: Option<CycleReport>,
}

pub type SharedSyncStatus = Arc<RwLock<SyncStatus>>;

pub fn new_shared_status() -> SharedSyncStatus {
    Arc::new(RwLock::new(SyncStatus::default()))
}
