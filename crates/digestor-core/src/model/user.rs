use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The owning account for every other entity. A single-tenant deployment
/// creates exactly one row; the schema does not special-case that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
        }
    }
}
