use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::bson_datetime_as_chrono;

/// Submission timestamp key -> quiz id.
pub type Credentials = BTreeMap<String, String>;

/// User model stored in MongoDB "users" collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Generated once at creation, never reassigned
    #[serde(rename = "_id")]
    pub id: String,
    pub email: String,
    pub student_id: i64,
    pub name: String,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// A fresh member identity with no credentials.
    pub fn new_member(email: &str, student_id: i64, name: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            email: email.to_string(),
            student_id,
            name: name.to_string(),
            role: UserRole::Member,
            credentials: Credentials::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    #[default]
    Member,
    Steward,
    LeadSteward,
    Admin,
}

pub fn credential_key(timestamp: DateTime<Utc>) -> String {
    timestamp.timestamp().to_string()
}

/// Reads a credential key back into a timestamp. Older records carry
/// fractional seconds ("1696118400.0").
pub fn parse_credential_key(key: &str) -> Option<DateTime<Utc>> {
    let seconds: f64 = key.trim().parse().ok()?;
    if !seconds.is_finite() {
        return None;
    }
    DateTime::from_timestamp(seconds.floor() as i64, 0)
}
