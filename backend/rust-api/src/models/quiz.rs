use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bson_datetime_as_chrono;
use super::user::credential_key;

/// One spreadsheet row of one quiz, stored in the "quiz_submissions" collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizSubmission {
    /// `<quiz_id>:<row>`, stable across re-ingestion of the same sheet
    #[serde(rename = "_id")]
    pub id: String,
    pub quiz_id: String,
    pub email: String,
    pub student_id: i64,
    pub name: String,
    #[serde(with = "bson_datetime_as_chrono")]
    pub submitted_at: DateTime<Utc>,
    pub score_text: String,
    pub passed: bool,
}

impl QuizSubmission {
    pub fn document_id(quiz_id: &str, row: usize) -> String {
        format!("{quiz_id}:{row}")
    }

    /// Key under which this submission is recorded in a user's credentials.
    pub fn credential_key(&self) -> String {
        credential_key(self.submitted_at)
    }
}
