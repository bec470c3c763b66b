use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{sync::Mutex, time::MissedTickBehavior};
use tracing::{info, warn};

use crate::{
    config::QuizSettings,
    metrics::{QUIZ_INGESTIONS_TOTAL, QUIZ_SYNC_CYCLES_TOTAL, QUIZ_SYNC_CYCLE_DURATION_SECONDS},
    models::sync::{CycleReport, QuizIngestReport, SharedSyncStatus},
    services::{
        cycle_lease::{CycleLease, CycleLock, DEFAULT_LEASE_KEY},
        id_repair::{apply_student_id_repairs, plan_student_id_repairs},
        identity_matcher::MatchPolicy,
        ingestion_service::IngestionService,
        quiz_source::{HttpQuizSource, QuizSource},
        reconciliation_service::ReconciliationService,
        store::{MongoSubmissionStore, MongoUserStore, SubmissionStore, UserStore},
        AppState,
    },
    utils::time::{Clock, SystemClock},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A cycle is already running in this process
    Busy,
    /// Another process holds the Redis lease
    LeaseHeld,
    LeaseUnavailable,
}

impl SkipReason {
    fn as_str(self) -> &'static str {
        match self {
            SkipReason::Busy => "skipped_busy",
            SkipReason::LeaseHeld => "skipped_lease_held",
            SkipReason::LeaseUnavailable => "skipped_lease_error",
        }
    }
}

#[derive(Debug)]
pub enum CycleOutcome {
    Completed(CycleReport),
    Skipped(SkipReason),
}

/// Runs ingest, repair and reconcile as one non-overlapping cycle.
pub struct QuizSyncWorker {
    ingestion: IngestionService,
    reconciliation: ReconciliationService,
    submissions: Arc<dyn SubmissionStore>,
    quizzes: Vec<(String, String)>,
    repair_exempt_domains: Vec<String>,
    interval: Duration,
    lease: Option<Arc<dyn CycleLock>>,
    status: SharedSyncStatus,
    clock: Arc<dyn Clock>,
    busy: Mutex<()>,
}

impl QuizSyncWorker {
    pub fn new(
        source: Arc<dyn QuizSource>,
        submissions: Arc<dyn SubmissionStore>,
        users: Arc<dyn UserStore>,
        settings: &QuizSettings,
        clock: Arc<dyn Clock>,
        status: SharedSyncStatus,
    ) -> Self {
        let policy = MatchPolicy {
            email_similarity_threshold: settings.email_similarity_threshold,
        };

        Self {
            ingestion: IngestionService::new(source, submissions.clone(), settings, clock.clone()),
            reconciliation: ReconciliationService::new(
                users,
                submissions.clone(),
                policy,
                settings.reset_day_of_year,
                clock.clone(),
            ),
            submissions,
            quizzes: settings
                .quizzes
                .iter()
                .map(|(name, id)| (name.clone(), id.clone()))
                .collect(),
            repair_exempt_domains: settings.repair_exempt_domains.clone(),
            interval: settings.sync_interval(),
            lease: None,
            status,
            clock,
            busy: Mutex::new(()),
        }
    }

    pub fn with_lease(mut self, lease: Arc<dyn CycleLock>) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Production wiring: MongoDB stores, the published sheet source, and a
    /// Redis lease when Redis is configured.
    pub fn from_state(state: &AppState) -> Result<Self> {
        let settings = &state.config.quiz;
        let source = HttpQuizSource::new(settings).context("Failed to build quiz source")?;

        let worker = Self::new(
            Arc::new(source),
            Arc::new(MongoSubmissionStore::new(&state.mongo)),
            Arc::new(MongoUserStore::new(&state.mongo)),
            settings,
            Arc::new(SystemClock),
            state.sync_status.clone(),
        );

        Ok(match &state.redis {
            Some(redis) => worker.with_lease(Arc::new(CycleLease::new(
                redis.clone(),
                DEFAULT_LEASE_KEY,
                settings.lease_ttl(),
            ))),
            None => worker,
        })
    }

    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting quiz sync worker loop (interval {}s, {} quizzes)",
            self.interval.as_secs(),
            self.quizzes.len()
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            match self.run_cycle().await {
                CycleOutcome::Completed(report) => info!(
                    failed_quizzes = report.failed_quizzes(),
                    ids_repaired = report.ids_repaired,
                    clean = report.is_clean(),
                    "Quiz sync cycle completed"
                ),
                CycleOutcome::Skipped(reason) => {
                    info!(reason = reason.as_str(), "Quiz sync cycle skipped")
                }
            }
        }
    }

    /// Runs one cycle unless one is already running here or elsewhere.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let Ok(_guard) = self.busy.try_lock() else {
            return self.skip(SkipReason::Busy).await;
        };

        let token = match &self.lease {
            None => None,
            Some(lease) => match lease.try_acquire().await {
                Ok(Some(token)) => Some(token),
                Ok(None) => return self.skip(SkipReason::LeaseHeld).await,
                Err(err) => {
                    warn!(error = %err, "Sync lease unavailable, skipping cycle");
                    return self.skip(SkipReason::LeaseUnavailable).await;
                }
            },
        };

        let report = self.execute_cycle(token.as_deref()).await;

        if let (Some(lease), Some(token)) = (&self.lease, token) {
            if let Err(err) = lease.release(&token).await {
                warn!(error = %err, "Failed to release sync lease");
            }
        }

        CycleOutcome::Completed(report)
    }

    async fn skip(&self, reason: SkipReason) -> CycleOutcome {
        QUIZ_SYNC_CYCLES_TOTAL
            .with_label_values(&[reason.as_str()])
            .inc();
        self.status.write().await.cycles_skipped += 1;
        CycleOutcome::Skipped(reason)
    }

    /// Extends the lease before the next step. Without a lease there is
    /// nothing to lose.
    async fn lease_still_held(&self, token: Option<&str>) -> bool {
        let (Some(lease), Some(token)) = (&self.lease, token) else {
            return true;
        };
        match lease.renew(token).await {
            Ok(true) => true,
            Ok(false) => {
                warn!("Sync lease lost mid-cycle, aborting");
                false
            }
            Err(err) => {
                warn!(error = %err, "Failed to renew sync lease, aborting cycle");
                false
            }
        }
    }

    async fn execute_cycle(&self, token: Option<&str>) -> CycleReport {
        let started_at = self.clock.now();
        {
            let mut status = self.status.write().await;
            status.busy = true;
            status.last_started_at = Some(started_at);
        }
        let timer = QUIZ_SYNC_CYCLE_DURATION_SECONDS.start_timer();

        let mut quizzes = Vec::with_capacity(self.quizzes.len());
        let mut lease_lost = false;
        for (quiz_name, quiz_id) in &self.quizzes {
            quizzes.push(self.ingest_one(quiz_name, quiz_id).await);
            if !self.lease_still_held(token).await {
                lease_lost = true;
                break;
            }
        }

        let mut ids_repaired = 0;
        if !lease_lost {
            ids_repaired = self.repair_student_ids().await;
            lease_lost = !self.lease_still_held(token).await;
        }

        let (reconcile, reconcile_error) = if lease_lost {
            (None, None)
        } else {
            match self.reconciliation.reconcile_all().await {
                Ok(summary) => (Some(summary), None),
                Err(err) => {
                    warn!(error = %err, "Registry reconciliation failed");
                    (None, Some(err.to_string()))
                }
            }
        };

        timer.observe_duration();

        let report = CycleReport {
            started_at,
            finished_at: self.clock.now(),
            quizzes,
            ids_repaired,
            reconcile,
            reconcile_error,
            lease_lost,
        };

        let outcome = if lease_lost {
            "aborted"
        } else if report.is_clean() {
            "completed"
        } else {
            "degraded"
        };
        QUIZ_SYNC_CYCLES_TOTAL.with_label_values(&[outcome]).inc();

        let mut status = self.status.write().await;
        status.busy = false;
        status.last_completed_at = Some(report.finished_at);
        status.cycles_completed += 1;
        status.last_report = Some(report.clone());

        report
    }

    async fn ingest_one(&self, quiz_name: &str, quiz_id: &str) -> QuizIngestReport {
        match self.ingestion.ingest_quiz(quiz_id).await {
            Ok(stored) => {
                QUIZ_INGESTIONS_TOTAL
                    .with_label_values(&[quiz_name, "success"])
                    .inc();
                QuizIngestReport {
                    quiz_name: quiz_name.to_string(),
                    quiz_id: quiz_id.to_string(),
                    stored: Some(stored),
                    error: None,
                }
            }
            Err(err) => {
                QUIZ_INGESTIONS_TOTAL
                    .with_label_values(&[quiz_name, err.kind()])
                    .inc();
                warn!(error = %err, quiz = quiz_name, quiz_id, "Quiz ingestion failed");
                QuizIngestReport {
                    quiz_name: quiz_name.to_string(),
                    quiz_id: quiz_id.to_string(),
                    stored: None,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    async fn repair_student_ids(&self) -> usize {
        let submissions = match self.submissions.find_all().await {
            Ok(submissions) => submissions,
            Err(err) => {
                warn!(error = %err, "Failed to load submissions for student id repair");
                return 0;
            }
        };

        let repairs = plan_student_id_repairs(&submissions, &self.repair_exempt_domains);
        if repairs.is_empty() {
            return 0;
        }
        apply_student_id_repairs(self.submissions.as_ref(), &repairs).await
    }
}
