use std::collections::HashMap;

use tracing::{info, warn};

use crate::{
    metrics::STUDENT_ID_REPAIRS_TOTAL, models::quiz::QuizSubmission, services::store::SubmissionStore,
};

const MIN_VALID_ID: i64 = 10_000_000;
const MAX_VALID_ID: i64 = 100_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentIdRepair {
    pub submission_id: String,
    pub from: i64,
    pub to: i64,
}

fn is_eight_digit(id: i64) -> bool {
    (MIN_VALID_ID..MAX_VALID_ID).contains(&id)
}

fn is_broken(submission: &QuizSubmission, exempt_domains: &[String]) -> bool {
    let out_of_range = submission.student_id < MIN_VALID_ID || submission.student_id > MAX_VALID_ID;
    out_of_range
        && !exempt_domains
            .iter()
            .any(|domain| submission.email.contains(domain.as_str()))
}

/// Chooses a replacement id for every broken submission that can be fixed.
///
/// A sibling submission with the same e-mail and a plausible 8-digit id wins.
/// Failing that, a 9-digit id ending in `1` is taken to be a card number typed
/// without its dash and loses the trailing digit.
pub fn plan_student_id_repairs(
    submissions: &[QuizSubmission],
    exempt_domains: &[String],
) -> Vec<StudentIdRepair> {
    let mut known_ids: HashMap<&str, i64> = HashMap::new();
    for submission in submissions {
        if !submission.email.is_empty() && is_eight_digit(submission.student_id) {
            known_ids
                .entry(submission.email.as_str())
                .or_insert(submission.student_id);
        }
    }

    submissions
        .iter()
        .filter(|s| !s.email.is_empty() && is_broken(s, exempt_domains))
        .filter_map(|s| {
            let to = known_ids.get(s.email.as_str()).copied().or_else(|| {
                let nine_digit = (MAX_VALID_ID..1_000_000_000).contains(&s.student_id);
                (nine_digit && s.student_id % 10 == 1).then_some(s.student_id / 10)
            })?;
            Some(StudentIdRepair {
                submission_id: s.id.clone(),
                from: s.student_id,
                to,
            })
        })
        .collect()
}

/// Writes each repair independently. Returns how many were applied.
pub async fn apply_student_id_repairs(
    store: &dyn SubmissionStore,
    repairs: &[StudentIdRepair],
) -> usize {
    let mut applied = 0;
    for repair in repairs {
        match store.set_student_id(&repair.submission_id, repair.to).await {
            Ok(()) => {
                applied += 1;
                STUDENT_ID_REPAIRS_TOTAL.inc();
                info!(
                    submission_id = %repair.submission_id,
                    from = repair.from,
                    to = repair.to,
                    "Repaired student id"
                );
            }
            Err(err) => warn!(
                error = %err,
                submission_id = %repair.submission_id,
                "Failed to repair student id"
            ),
        }
    }
    applied
}
