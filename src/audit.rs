use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of decision an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Redemption,
    Scan,
    Availability,
}

/// One append-only decision record.
///
/// Every redemption and scan call, success or failure, writes exactly one
/// of these tagged with its outcome reason, so a token's or subject's
/// decision history can be reconstructed without the application logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub category: AuditCategory,
    /// Token id, person id, or flag name the decision was about.
    pub subject: String,
    /// Outcome reason code, e.g. `ALREADY_REDEEMED` or `already_marked`.
    pub outcome: String,
    pub detail: Option<String>,
}

impl AuditEntry {
    pub fn new(category: AuditCategory, subject: impl Into<String>, outcome: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            at: Utc::now(),
            category,
            subject: subject.into(),
            outcome: outcome.into(),
            detail: None,
        }
    }

    pub fn redemption(token_id: Uuid, outcome: impl Into<String>) -> Self {
        Self::new(AuditCategory::Redemption, token_id.to_string(), outcome)
    }

    pub fn scan(subject_id: Uuid, outcome: impl Into<String>) -> Self {
        Self::new(AuditCategory::Scan, subject_id.to_string(), outcome)
    }

    pub fn availability(outcome: impl Into<String>) -> Self {
        Self::new(AuditCategory::Availability, "tokens_enabled", outcome)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
