#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use make_api::{
    config::QuizSettings,
    error::IngestionError,
    models::{quiz::QuizSubmission, sync::new_shared_status, sync::SharedSyncStatus},
    services::{
        cycle_lease::CycleLock,
        ingestion_service::IngestionService,
        quiz_source::QuizSource,
        reconciliation_service::ReconciliationService,
        identity_matcher::MatchPolicy,
        store::{MemorySubmissionStore, MemoryUserStore},
        sync_worker::QuizSyncWorker,
    },
    utils::time::FixedClock,
};

pub const HEADER: &str = "Timestamp,Score,Name,Student ID,Email\n";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// A moment inside the 2025-2026 credential cycle (window opens 2025-08-01).
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 1, 12, 0, 0).unwrap()
}

pub fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock(now()))
}

pub fn settings() -> QuizSettings {
    let mut quizzes = BTreeMap::new();
    quizzes.insert("General".to_string(), "q-general".to_string());
    quizzes.insert("Laser3D".to_string(), "q-laser".to_string());

    QuizSettings {
        quizzes,
        ..QuizSettings::default()
    }
}

pub fn sheet(rows: &[&str]) -> String {
    let mut csv = HEADER.to_string();
    for row in rows {
        csv.push_str(row);
        csv.push('\n');
    }
    csv
}

/// Serves fixed CSV text per quiz id. Unknown quizzes answer HTTP 404.
#[derive(Default)]
pub struct StaticQuizSource {
    sheets: Mutex<HashMap<String, Result<String, u16>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StaticQuizSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn set_sheet(&self, quiz_id: &str, csv: String) {
        self.sheets
            .lock()
            .unwrap()
            .insert(quiz_id.to_string(), Ok(csv));
    }

    pub fn fail_with(&self, quiz_id: &str, status: u16) {
        self.sheets
            .lock()
            .unwrap()
            .insert(quiz_id.to_string(), Err(status));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuizSource for StaticQuizSource {
    async fn fetch_csv(&self, quiz_id: &str) -> Result<String, IngestionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let entry = self.sheets.lock().unwrap().get(quiz_id).cloned();
        match entry {
            Some(Ok(csv)) => Ok(csv),
            Some(Err(status)) => Err(IngestionError::Status {
                quiz_id: quiz_id.to_string(),
                status,
            }),
            None => Err(IngestionError::Status {
                quiz_id: quiz_id.to_string(),
                status: 404,
            }),
        }
    }
}

/// In-process lease. `holder` is the token currently owning it; an
/// outside holder is set with `held_by`, and `lapse_after_renewals` makes
/// the lease vanish once that many renewals have succeeded.
#[derive(Default)]
pub struct MemoryLock {
    holder: Mutex<Option<String>>,
    lapse_after_renewals: Option<usize>,
    renewals: AtomicUsize,
    releases: AtomicUsize,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn held_by(token: &str) -> Self {
        Self {
            holder: Mutex::new(Some(token.to_string())),
            ..Self::default()
        }
    }

    pub fn lapsing_after(renewals: usize) -> Self {
        Self {
            lapse_after_renewals: Some(renewals),
            ..Self::default()
        }
    }

    pub fn holder(&self) -> Option<String> {
        self.holder.lock().unwrap().clone()
    }

    pub fn renewals(&self) -> usize {
        self.renewals.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CycleLock for MemoryLock {
    async fn try_acquire(&self) -> anyhow::Result<Option<String>> {
        let mut holder = self.holder.lock().unwrap();
        if holder.is_some() {
            return Ok(None);
        }
        let token = uuid::Uuid::new_v4().to_string();
        *holder = Some(token.clone());
        Ok(Some(token))
    }

    async fn renew(&self, token: &str) -> anyhow::Result<bool> {
        let mut holder = self.holder.lock().unwrap();
        if holder.as_deref() != Some(token) {
            return Ok(false);
        }
        if self.lapse_after_renewals == Some(self.renewals.load(Ordering::SeqCst)) {
            *holder = Some("someone-else".to_string());
            return Ok(false);
        }
        self.renewals.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn release(&self, token: &str) -> anyhow::Result<bool> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        let mut holder = self.holder.lock().unwrap();
        if holder.as_deref() == Some(token) {
            *holder = None;
            return Ok(true);
        }
        Ok(false)
    }
}

pub struct Harness {
    pub source: Arc<StaticQuizSource>,
    pub submissions: Arc<MemorySubmissionStore>,
    pub users: Arc<MemoryUserStore>,
    pub status: SharedSyncStatus,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_source(StaticQuizSource::new())
    }

    pub fn with_source(source: StaticQuizSource) -> Self {
        init_tracing();
        Self {
            source: Arc::new(source),
            submissions: Arc::new(MemorySubmissionStore::new()),
            users: Arc::new(MemoryUserStore::new()),
            status: new_shared_status(),
        }
    }

    pub fn ingestion(&self) -> IngestionService {
        IngestionService::new(
            self.source.clone(),
            self.submissions.clone(),
            &settings(),
            clock(),
        )
    }

    pub fn reconciliation(&self) -> ReconciliationService {
        ReconciliationService::new(
            self.users.clone(),
            self.submissions.clone(),
            MatchPolicy::default(),
            settings().reset_day_of_year,
            clock(),
        )
    }

    pub fn worker(&self) -> QuizSyncWorker {
        QuizSyncWorker::new(
            self.source.clone(),
            self.submissions.clone(),
            self.users.clone(),
            &settings(),
            clock(),
            self.status.clone(),
        )
    }

    pub async fn stored_for(&self, quiz_id: &str) -> Vec<QuizSubmission> {
        let mut stored: Vec<_> = self
            .submissions
            .snapshot()
            .await
            .into_iter()
            .filter(|s| s.quiz_id == quiz_id)
            .collect();
        stored.sort_by(|a, b| a.id.cmp(&b.id));
        stored
    }
}
