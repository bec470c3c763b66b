use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{quiz::QuizSubmission, user::User};

pub mod memory;
pub mod mongo;

pub use memory::{MemorySubmissionStore, MemoryUserStore};
pub use mongo::{MongoSubmissionStore, MongoUserStore};

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Deletes every stored submission of `quiz_id`, then inserts `submissions`.
    async fn replace_for_quiz(
        &self,
        quiz_id: &str,
        submissions: &[QuizSubmission],
    ) -> Result<usize, StoreError>;

    /// All stored submissions across quizzes, in a stable order.
    async fn find_all(&self) -> Result<Vec<QuizSubmission>, StoreError>;

    async fn set_student_id(&self, submission_id: &str, student_id: i64)
        -> Result<(), StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_all(&self) -> Result<Vec<User>, StoreError>;

    async fn insert(&self, user: &User) -> Result<(), StoreError>;

    /// Writes identity fields and credentials of an existing user by id.
    /// Role and creation time are left untouched.
    async fn update(&self, user: &User) -> Result<(), StoreError>;
}
