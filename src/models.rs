use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single-use, signed, time-bounded reward code.
///
/// Rows are created by the external batch subsystem; this service only
/// verifies and consumes them. `redeemed_at` moves from `None` to `Some`
/// at most once, and `disabled` is one-way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: Uuid,
    pub prize_id: Uuid,
    pub batch_id: Uuid,
    pub signature: String,
    pub signature_version: u32,
    pub expires_at: DateTime<Utc>,
    pub valid_from: Option<DateTime<Utc>>,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub disabled: bool,
}

/// The prize a token redeems for. Owned by the external prize subsystem;
/// the coordinator only reads `active` and returns the summary on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prize {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
}

/// A staff member identified either by a signed payload or a bare code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub active: bool,
}

/// Check-in direction for an attendance scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScanDirection {
    In,
    Out,
}

impl std::fmt::Display for ScanDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanDirection::In => write!(f, "IN"),
            ScanDirection::Out => write!(f, "OUT"),
        }
    }
}

/// Append-only attendance record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub scanned_at: DateTime<Utc>,
    pub direction: ScanDirection,
    pub device_id: Option<String>,
}

/// Identity payload carried over QR, URL parameter or manual copy.
/// Built for transport, verified once, then discarded; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPayload {
    pub subject_id: Uuid,
    /// Issuance time as whole Unix seconds. Sub-second precision is
    /// deliberately discarded before signing.
    pub issued_at: i64,
    pub version: u32,
    pub signature: String,
}

impl SignedPayload {
    /// Compact dot-separated encoding for QR codes and URL parameters:
    /// `version.subject_id.issued_at.signature`.
    pub fn encode(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.version, self.subject_id, self.issued_at, self.signature
        )
    }

    /// Parse the compact encoding. Returns `None` for anything that does
    /// not have exactly four well-formed fields.
    pub fn decode(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(4, '.');
        let version = parts.next()?.parse().ok()?;
        let subject_id = parts.next()?.parse().ok()?;
        let issued_at = parts.next()?.parse().ok()?;
        let signature = parts.next()?;
        if signature.is_empty() {
            return None;
        }
        Some(Self {
            subject_id,
            issued_at,
            version,
            signature: signature.to_string(),
        })
    }
}

/// Singleton shared configuration row. `tokens_enabled` gates the whole
/// redemption subsystem and must stay strongly consistent across
/// instances, so it lives in the store rather than process memory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SystemConfig {
    pub tokens_enabled: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            tokens_enabled: true,
        }
    }
}
