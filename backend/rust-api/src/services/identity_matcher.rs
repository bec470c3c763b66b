use std::collections::HashMap;

use tracing::debug;

use crate::models::{quiz::QuizSubmission, user::User};

/// Which identity key won a contested match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preferred {
    Email,
    StudentId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchBasis {
    EmailOnly,
    StudentIdOnly,
    Both,
    /// E-mail and student id point at different users
    Contested { preferred: Preferred },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    CreateNew,
    UseUser { user_id: String, basis: MatchBasis },
    /// The student id belongs to someone with another e-mail, or the
    /// submission carries neither key
    NoMatch,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MatchPolicy {
    /// Minimum normalized Levenshtein similarity (exclusive) for treating two
    /// e-mails as the same on a student-id-only match. `None` means exact.
    pub email_similarity_threshold: Option<f64>,
}

impl MatchPolicy {
    fn emails_agree(&self, stored: &str, submitted: &str) -> bool {
        if stored == submitted {
            return true;
        }
        match self.email_similarity_threshold {
            Some(threshold) => strsim::normalized_levenshtein(stored, submitted) > threshold,
            None => false,
        }
    }
}

/// Working copy of the user registry for one reconciliation pass, indexed by
/// e-mail and by student id. The index keeps the first user seen for each
/// key, so the oldest record wins when the registry already holds duplicates.
#[derive(Debug, Default)]
pub struct Registry {
    users: Vec<User>,
    by_user_id: HashMap<String, usize>,
    by_email: HashMap<String, usize>,
    by_student_id: HashMap<i64, usize>,
}

impl Registry {
    pub fn new(users: Vec<User>) -> Self {
        let mut registry = Self::default();
        for user in users {
            registry.insert(user);
        }
        registry
    }

    /// Adds a user and returns its position.
    pub fn insert(&mut self, user: User) -> usize {
        let index = self.users.len();
        self.by_user_id.insert(user.id.clone(), index);
        self.index_email(&user.email, index);
        self.index_student_id(user.student_id, index);
        self.users.push(user);
        index
    }

    fn index_email(&mut self, email: &str, index: usize) {
        if !email.is_empty() {
            self.by_email.entry(email.to_string()).or_insert(index);
        }
    }

    fn index_student_id(&mut self, student_id: i64, index: usize) {
        if student_id != 0 {
            self.by_student_id.entry(student_id).or_insert(index);
        }
    }

    pub fn find_by_email(&self, email: &str) -> Option<usize> {
        if email.is_empty() {
            return None;
        }
        self.by_email.get(email).copied()
    }

    pub fn find_by_student_id(&self, student_id: i64) -> Option<usize> {
        if student_id == 0 {
            return None;
        }
        self.by_student_id.get(&student_id).copied()
    }

    pub fn position(&self, user_id: &str) -> Option<usize> {
        self.by_user_id.get(user_id).copied()
    }

    pub fn get(&self, index: usize) -> Option<&User> {
        self.users.get(index)
    }

    /// Fills a missing student id or name from a submission. Returns whether
    /// anything changed.
    pub fn backfill_identity(&mut self, index: usize, student_id: i64, name: &str) -> bool {
        let Some(user) = self.users.get_mut(index) else {
            return false;
        };

        let id_adopted = user.student_id == 0 && student_id != 0;
        if id_adopted {
            user.student_id = student_id;
        }
        let name_adopted = user.name.is_empty() && !name.is_empty();
        if name_adopted {
            user.name = name.to_string();
        }

        if id_adopted {
            self.index_student_id(student_id, index);
        }
        id_adopted || name_adopted
    }

    pub fn users_mut(&mut self) -> &mut [User] {
        &mut self.users
    }

    pub fn into_users(self) -> Vec<User> {
        self.users
    }
}

/// How often each e-mail and student id appears across all stored submissions.
#[derive(Debug, Default)]
pub struct HistoryCounts {
    by_email: HashMap<String, usize>,
    by_student_id: HashMap<i64, usize>,
}

impl HistoryCounts {
    pub fn from_submissions(submissions: &[QuizSubmission]) -> Self {
        let mut counts = Self::default();
        for submission in submissions {
            *counts
                .by_email
                .entry(submission.email.clone())
                .or_default() += 1;
            *counts
                .by_student_id
                .entry(submission.student_id)
                .or_default() += 1;
        }
        counts
    }

    pub fn email(&self, email: &str) -> usize {
        self.by_email.get(email).copied().unwrap_or(0)
    }

    pub fn student_id(&self, student_id: i64) -> usize {
        self.by_student_id.get(&student_id).copied().unwrap_or(0)
    }
}

pub fn match_submission(
    submission: &QuizSubmission,
    registry: &Registry,
    history: &HistoryCounts,
    policy: &MatchPolicy,
) -> MatchOutcome {
    let by_email = registry.find_by_email(&submission.email);
    let by_id = registry.find_by_student_id(submission.student_id);

    let (index, basis) = match (by_email, by_id) {
        // Nothing to key a new user on; creating one would repeat every pass
        (None, None) if submission.email.is_empty() && submission.student_id == 0 => {
            return MatchOutcome::NoMatch
        }
        (None, None) => return MatchOutcome::CreateNew,
        (Some(email_idx), None) => (email_idx, MatchBasis::EmailOnly),
        (None, Some(id_idx)) => {
            let agrees = registry
                .get(id_idx)
                .is_some_and(|user| policy.emails_agree(&user.email, &submission.email));
            if !agrees {
                debug!(
                    submission_id = %submission.id,
                    student_id = submission.student_id,
                    "Student id belongs to a user with another e-mail"
                );
                return MatchOutcome::NoMatch;
            }
            (id_idx, MatchBasis::StudentIdOnly)
        }
        (Some(email_idx), Some(id_idx)) if email_idx == id_idx => (email_idx, MatchBasis::Both),
        (Some(email_idx), Some(id_idx)) => {
            let email_count = history.email(&submission.email);
            let id_count = history.student_id(submission.student_id);
            let preferred = if id_count > email_count {
                Preferred::StudentId
            } else {
                Preferred::Email
            };
            debug!(
                submission_id = %submission.id,
                email_count,
                id_count,
                ?preferred,
                "Contested identity match"
            );
            let index = match preferred {
                Preferred::Email => email_idx,
                Preferred::StudentId => id_idx,
            };
            (index, MatchBasis::Contested { preferred })
        }
    };

    match registry.get(index) {
        Some(user) => MatchOutcome::UseUser {
            user_id: user.id.clone(),
            basis,
        },
        None => MatchOutcome::CreateNew,
    }
}
