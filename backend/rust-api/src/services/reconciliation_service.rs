use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    error::StoreError,
    metrics::{USERS_CREATED_TOTAL, USER_WRITES_TOTAL},
    models::{
        sync::ReconcileSummary,
        user::{parse_credential_key, Credentials, User},
    },
    services::{
        identity_matcher::{
            match_submission, HistoryCounts, MatchBasis, MatchOutcome, MatchPolicy, Registry,
        },
        store::{SubmissionStore, UserStore},
    },
    utils::time::{validity_window_start, Clock},
};

/// Keeps credentials dated inside the window, one per quiz (the most recent).
/// Returns the kept set and how many entries were dropped.
pub fn revalidate_credentials(
    credentials: &Credentials,
    window_start: DateTime<Utc>,
) -> (Credentials, usize) {
    let mut dropped = 0;
    let mut dated: Vec<(DateTime<Utc>, &String, &String)> = Vec::with_capacity(credentials.len());

    for (key, quiz_id) in credentials {
        match parse_credential_key(key) {
            Some(ts) if ts >= window_start => dated.push((ts, key, quiz_id)),
            _ => dropped += 1,
        }
    }

    dated.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(a.1)));

    let mut seen_quizzes = HashSet::new();
    let mut kept = Credentials::new();
    for (_, key, quiz_id) in dated {
        if seen_quizzes.insert(quiz_id.as_str()) {
            kept.insert(key.clone(), quiz_id.clone());
        } else {
            dropped += 1;
        }
    }

    (kept, dropped)
}

pub struct ReconciliationService {
    users: Arc<dyn UserStore>,
    submissions: Arc<dyn SubmissionStore>,
    policy: MatchPolicy,
    reset_day_of_year: u32,
    clock: Arc<dyn Clock>,
}

impl ReconciliationService {
    pub fn new(
        users: Arc<dyn UserStore>,
        submissions: Arc<dyn SubmissionStore>,
        policy: MatchPolicy,
        reset_day_of_year: u32,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            submissions,
            policy,
            reset_day_of_year,
            clock,
        }
    }

    /// Folds every stored submission into the user registry.
    ///
    /// Only a failure to load submissions or users is returned as an error.
    /// Individual user writes that fail are logged and counted in
    /// `failed_writes`.
    pub async fn reconcile_all(&self) -> Result<ReconcileSummary, StoreError> {
        let submissions = self.submissions.find_all().await?;
        let stored_users = self.users.find_all().await?;

        let now = self.clock.now();
        let window_start = validity_window_start(now, self.reset_day_of_year);
        let history = HistoryCounts::from_submissions(&submissions);

        let existing = stored_users.len();
        let mut registry = Registry::new(stored_users.clone());
        let mut pending: HashMap<usize, Credentials> = HashMap::new();
        let mut summary = ReconcileSummary::default();

        for submission in &submissions {
            match match_submission(submission, &registry, &history, &self.policy) {
                MatchOutcome::CreateNew => {
                    let mut user = User::new_member(
                        &submission.email,
                        submission.student_id,
                        &submission.name,
                        now,
                    );
                    if submission.passed {
                        user.credentials
                            .insert(submission.credential_key(), submission.quiz_id.clone());
                    }
                    debug!(submission_id = %submission.id, user_id = %user.id, "New user from submission");
                    registry.insert(user);
                }
                MatchOutcome::UseUser { user_id, basis } => {
                    let Some(index) = registry.position(&user_id) else {
                        continue;
                    };
                    if basis == MatchBasis::EmailOnly {
                        registry.backfill_identity(index, submission.student_id, &submission.name);
                    }
                    if submission.passed {
                        pending
                            .entry(index)
                            .or_default()
                            .insert(submission.credential_key(), submission.quiz_id.clone());
                    }
                }
                MatchOutcome::NoMatch => summary.unmatched += 1,
            }
        }

        for (index, user) in registry.users_mut().iter_mut().enumerate() {
            let mut merged = std::mem::take(&mut user.credentials);
            if let Some(extra) = pending.remove(&index) {
                merged.extend(extra);
            }
            let (kept, dropped) = revalidate_credentials(&merged, window_start);
            summary.expired_credentials += dropped;
            user.credentials = kept;
        }

        for (index, mut user) in registry.into_users().into_iter().enumerate() {
            if index >= existing {
                self.write_user(WriteOp::Insert, &user, &mut summary).await;
            } else if stored_users.get(index) != Some(&user) {
                user.updated_at = now;
                self.write_user(WriteOp::Update, &user, &mut summary).await;
            }
        }

        info!(
            submissions = submissions.len(),
            created = summary.created,
            updated = summary.updated,
            unmatched = summary.unmatched,
            expired_credentials = summary.expired_credentials,
            failed_writes = summary.failed_writes,
            window_start = %window_start,
            "Reconciled user registry"
        );

        Ok(summary)
    }

    async fn write_user(&self, op: WriteOp, user: &User, summary: &mut ReconcileSummary) {
        let result = match op {
            WriteOp::Insert => self.users.insert(user).await,
            WriteOp::Update => self.users.update(user).await,
        };

        match result {
            Ok(()) => {
                USER_WRITES_TOTAL
                    .with_label_values(&[op.as_str(), "success"])
                    .inc();
                match op {
                    WriteOp::Insert => {
                        USERS_CREATED_TOTAL.inc();
                        summary.created += 1;
                    }
                    WriteOp::Update => summary.updated += 1,
                }
            }
            Err(err) => {
                USER_WRITES_TOTAL
                    .with_label_values(&[op.as_str(), "error"])
                    .inc();
                summary.failed_writes += 1;
                warn!(error = %err, user_id = %user.id, operation = op.as_str(), "User write failed");
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum WriteOp {
    Insert,
    Update,
}

impl WriteOp {
    fn as_str(self) -> &'static str {
        match self {
            WriteOp::Insert => "insert",
            WriteOp::Update => "update",
        }
    }
}
