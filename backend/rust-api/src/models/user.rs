use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Name-based identity. Lookup is exact and case-sensitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct FindOrCreateUserRequest {
    #[validate(length(
        min = 2,
        max = 64,
        message = "Name must be between 2 and 64 characters"
    ))]
    pub name: String,
}
