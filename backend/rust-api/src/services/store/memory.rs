use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{SubmissionStore, UserStore};
use crate::error::StoreError;
use crate::models::{quiz::QuizSubmission, user::User};

/// Process-local submission store. Orders like the Mongo store.
#[derive(Default)]
pub struct MemorySubmissionStore {
    submissions: Mutex<Vec<QuizSubmission>>,
}

impl MemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Vec<QuizSubmission> {
        self.submissions.lock().await.clone()
    }
}

#[async_trait]
impl SubmissionStore for MemorySubmissionStore {
    async fn replace_for_quiz(
        &self,
        quiz_id: &str,
        submissions: &[QuizSubmission],
    ) -> Result<usize, StoreError> {
        let mut stored = self.submissions.lock().await;
        stored.retain(|s| s.quiz_id != quiz_id);
        stored.extend_from_slice(submissions);
        Ok(submissions.len())
    }

    async fn find_all(&self) -> Result<Vec<QuizSubmission>, StoreError> {
        let mut all = self.submissions.lock().await.clone();
        all.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(all)
    }

    async fn set_student_id(
        &self,
        submission_id: &str,
        student_id: i64,
    ) -> Result<(), StoreError> {
        let mut stored = self.submissions.lock().await;
        let submission = stored
            .iter_mut()
            .find(|s| s.id == submission_id)
            .ok_or_else(|| StoreError::NotFound(format!("submission {submission_id}")))?;
        submission.student_id = student_id;
        Ok(())
    }
}

/// Process-local user registry. Writes for ids passed to
/// [`MemoryUserStore::reject_writes_for`] fail with `Unavailable`.
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<Vec<User>>,
    rejected: Mutex<HashSet<String>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: Vec<User>) -> Self {
        Self {
            users: Mutex::new(users),
            rejected: Mutex::default(),
        }
    }

    pub async fn snapshot(&self) -> Vec<User> {
        self.users.lock().await.clone()
    }

    pub async fn reject_writes_for(&self, user_id: &str) {
        self.rejected.lock().await.insert(user_id.to_string());
    }

    async fn check_writable(&self, user_id: &str) -> Result<(), StoreError> {
        if self.rejected.lock().await.contains(user_id) {
            return Err(StoreError::Unavailable(format!("writes to user {user_id} rejected")));
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_all(&self) -> Result<Vec<User>, StoreError> {
        let mut all = self.users.lock().await.clone();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }

    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        self.check_writable(&user.id).await?;
        self.users.lock().await.push(user.clone());
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        self.check_writable(&user.id).await?;
        let mut users = self.users.lock().await;
        let stored = users
            .iter_mut()
            .find(|u| u.id == user.id)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", user.id)))?;

        stored.email = user.email.clone();
        stored.student_id = user.student_id;
        stored.name = user.name.clone();
        stored.credentials = user.credentials.clone();
        stored.updated_at = user.updated_at;
        Ok(())
    }
}
