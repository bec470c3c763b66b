use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{self, doc, to_bson},
    Collection, Database,
};

use super::{SubmissionStore, UserStore};
use crate::error::StoreError;
use crate::models::{quiz::QuizSubmission, user::User};

pub const SUBMISSIONS_COLLECTION: &str = "quiz_submissions";
pub const USERS_COLLECTION: &str = "users";

#[derive(Clone)]
pub struct MongoSubmissionStore {
    collection: Collection<QuizSubmission>,
}

impl MongoSubmissionStore {
    pub fn new(mongo: &Database) -> Self {
        Self {
            collection: mongo.collection(SUBMISSIONS_COLLECTION),
        }
    }
}

#[async_trait]
impl SubmissionStore for MongoSubmissionStore {
    async fn replace_for_quiz(
        &self,
        quiz_id: &str,
        submissions: &[QuizSubmission],
    ) -> Result<usize, StoreError> {
        self.collection
            .delete_many(doc! { "quiz_id": quiz_id })
            .await?;

        // insert_many rejects an empty batch
        if submissions.is_empty() {
            return Ok(0);
        }

        let result = self.collection.insert_many(submissions).await?;
        Ok(result.inserted_ids.len())
    }

    async fn find_all(&self) -> Result<Vec<QuizSubmission>, StoreError> {
        let cursor = self
            .collection
            .find(doc! {})
            .sort(doc! { "submitted_at": 1, "_id": 1 })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn set_student_id(
        &self,
        submission_id: &str,
        student_id: i64,
    ) -> Result<(), StoreError> {
        let result = self
            .collection
            .update_one(
                doc! { "_id": submission_id },
                doc! { "$set": { "student_id": student_id } },
            )
            .await?;

        if result.matched_count == 0 {
            return Err(StoreError::NotFound(format!("submission {submission_id}")));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct MongoUserStore {
    collection: Collection<User>,
}

impl MongoUserStore {
    pub fn new(mongo: &Database) -> Self {
        Self {
            collection: mongo.collection(USERS_COLLECTION),
        }
    }
}

#[async_trait]
impl UserStore for MongoUserStore {
    async fn find_all(&self) -> Result<Vec<User>, StoreError> {
        let cursor = self
            .collection
            .find(doc! {})
            .sort(doc! { "createdAt": 1, "_id": 1 })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        self.collection.insert_one(user).await?;
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        let credentials = to_bson(&user.credentials)?;
        let updated_at = bson::DateTime::from_millis(user.updated_at.timestamp_millis());

        let result = self
            .collection
            .update_one(
                doc! { "_id": &user.id },
                doc! {
                    "$set": {
                        "email": &user.email,
                        "student_id": user.student_id,
                        "name": &user.name,
                        "credentials": credentials,
                        "updatedAt": updated_at,
                    }
                },
            )
            .await?;

        if result.matched_count == 0 {
            return Err(StoreError::NotFound(format!("user {}", user.id)));
        }
        Ok(())
    }
}
