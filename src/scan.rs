use crate::audit::{AuditCategory, AuditEntry};
use crate::error::Result;
use crate::models::{Person, Scan, ScanDirection, SignedPayload};
use crate::signature::SignatureService;
use crate::store::Store;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Maximum tolerated clock skew into the future for signed payloads,
/// in seconds.
pub const FUTURE_SKEW_SECS: i64 = 60;

/// Authenticated caller role for the bare-code path. The HTTP layer
/// resolves credentials to a role before the gate is reached; holding a
/// value of this type is proof of authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Staff,
    Admin,
}

/// Subject summary returned with successful scans.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectSummary {
    pub id: Uuid,
    pub name: String,
}

/// Informational notices attached to accepted scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanAlert {
    AlreadyMarked,
}

/// Why a scan was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanRejection {
    /// Signed payloads must carry exactly the currently accepted version;
    /// identity scanning does not honor rotated-out versions.
    VersionMismatch,
    BadSignature,
    /// Payload older than the configured skew allowance.
    Stale,
    /// Payload timestamped too far in the future.
    FutureTimestamp,
    PersonNotFound,
    PersonInactive,
    /// A scan for this subject, any direction, landed within the
    /// anti-replay window.
    Duplicate,
}

impl ScanRejection {
    pub fn code(&self) -> &'static str {
        match self {
            ScanRejection::VersionMismatch => "VERSION_MISMATCH",
            ScanRejection::BadSignature => "BAD_SIGNATURE",
            ScanRejection::Stale => "STALE",
            ScanRejection::FutureTimestamp => "FUTURE_TS",
            ScanRejection::PersonNotFound => "PERSON_NOT_FOUND",
            ScanRejection::PersonInactive => "PERSON_INACTIVE",
            ScanRejection::Duplicate => "DUPLICATE",
        }
    }
}

/// Result of a scan attempt, either path.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Accepted {
        subject: SubjectSummary,
        direction: ScanDirection,
        alerts: Vec<ScanAlert>,
    },
    Rejected(ScanRejection),
}

impl ScanOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ScanOutcome::Accepted { .. })
    }
}

/// Validates identity scans with anti-replay and per-day dedup.
///
/// Two input paths converge on one guard: signed payloads (cryptographic
/// trust) and bare human-readable codes (role trust, deliberately weaker,
/// for manual and kiosk entry). The guard order is load-bearing: the
/// same-day dedup check runs before the anti-replay check because a
/// same-day duplicate is an idempotent no-op while a sub-window duplicate
/// is a rejection.
pub struct ScanGate {
    store: Arc<dyn Store>,
    signatures: Arc<SignatureService>,
    timezone: Tz,
    replay_window_secs: i64,
    max_skew_secs: i64,
}

impl ScanGate {
    pub fn new(
        store: Arc<dyn Store>,
        signatures: Arc<SignatureService>,
        timezone: Tz,
        replay_window_secs: i64,
        max_skew_secs: i64,
    ) -> Self {
        Self {
            store,
            signatures,
            timezone,
            replay_window_secs,
            max_skew_secs,
        }
    }

    /// Signed path: verify the payload cryptographically, enforce
    /// freshness, then run the shared guard.
    pub async fn scan_signed(
        &self,
        payload: &SignedPayload,
        direction: ScanDirection,
        device_id: Option<String>,
    ) -> Result<ScanOutcome> {
        let now = Utc::now();
        let subject = payload.subject_id.to_string();

        if payload.version != self.signatures.current_version() {
            return self.reject(&subject, ScanRejection::VersionMismatch).await;
        }

        if self
            .signatures
            .verify_identity(
                payload.version,
                payload.subject_id,
                payload.issued_at,
                &payload.signature,
            )
            .is_err()
        {
            return self.reject(&subject, ScanRejection::BadSignature).await;
        }

        let age_secs = now.timestamp() - payload.issued_at;
        if age_secs > self.max_skew_secs {
            return self.reject(&subject, ScanRejection::Stale).await;
        }
        if -age_secs > FUTURE_SKEW_SECS {
            return self.reject(&subject, ScanRejection::FutureTimestamp).await;
        }

        let person = match self.store.person(payload.subject_id).await? {
            Some(person) => person,
            None => return self.reject(&subject, ScanRejection::PersonNotFound).await,
        };

        self.guard(person, direction, device_id, now).await
    }

    /// Bare-code path: case-insensitive lookup under an authenticated
    /// operator role instead of a signature.
    pub async fn scan_code(
        &self,
        code: &str,
        direction: ScanDirection,
        device_id: Option<String>,
        operator: Role,
    ) -> Result<ScanOutcome> {
        tracing::debug!(
            target: "prizegate::scan",
            code = %code,
            operator = ?operator,
            "bare-code scan"
        );

        let person = match self.store.person_by_code(code).await? {
            Some(person) => person,
            None => return self.reject(code, ScanRejection::PersonNotFound).await,
        };

        self.guard(person, direction, device_id, Utc::now()).await
    }

    /// Shared post-validation guard for both paths.
    async fn guard(
        &self,
        person: Person,
        direction: ScanDirection,
        device_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ScanOutcome> {
        let subject = person.id.to_string();

        if !person.active {
            return self.reject(&subject, ScanRejection::PersonInactive).await;
        }

        // Coarse dedup first: a same-direction scan already recorded on
        // the venue-local calendar day is acknowledged idempotently with
        // no new row.
        let (day_start, day_end) = self.local_day_bounds(now);
        if self
            .store
            .has_scan_in_range(person.id, direction, day_start, day_end)
            .await?
        {
            self.store
                .append_audit(AuditEntry::scan(person.id, "already_marked"))
                .await?;
            tracing::info!(
                target: "prizegate::scan",
                subject_id = %person.id,
                direction = %direction,
                "scan already marked today"
            );
            return Ok(ScanOutcome::Accepted {
                subject: SubjectSummary {
                    id: person.id,
                    name: person.name,
                },
                direction,
                alerts: vec![ScanAlert::AlreadyMarked],
            });
        }

        // Fine anti-replay second: any scan within the window, regardless
        // of direction, rejects the attempt.
        if let Some(last) = self.store.last_scan_at(person.id).await? {
            if now.signed_duration_since(last).num_seconds() < self.replay_window_secs {
                return self.reject(&subject, ScanRejection::Duplicate).await;
            }
        }

        self.store
            .insert_scan(Scan {
                id: Uuid::new_v4(),
                subject_id: person.id,
                scanned_at: now,
                direction,
                device_id,
            })
            .await?;
        self.store
            .append_audit(AuditEntry::scan(person.id, "ACCEPTED"))
            .await?;
        tracing::info!(
            target: "prizegate::scan",
            subject_id = %person.id,
            direction = %direction,
            "scan recorded"
        );

        Ok(ScanOutcome::Accepted {
            subject: SubjectSummary {
                id: person.id,
                name: person.name,
            },
            direction,
            alerts: Vec::new(),
        })
    }

    async fn reject(&self, subject: &str, rejection: ScanRejection) -> Result<ScanOutcome> {
        self.store
            .append_audit(AuditEntry::new(AuditCategory::Scan, subject, rejection.code()))
            .await?;
        tracing::info!(
            target: "prizegate::scan",
            subject = %subject,
            outcome = rejection.code(),
            "scan rejected"
        );
        Ok(ScanOutcome::Rejected(rejection))
    }

    /// UTC bounds of the venue-local calendar day containing `now`.
    fn local_day_bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let date = now.with_timezone(&self.timezone).date_naive();
        let start = local_midnight(&self.timezone, date);
        (start, start + chrono::Duration::days(1))
    }
}

fn local_midnight(tz: &Tz, date: chrono::NaiveDate) -> DateTime<Utc> {
    match tz.from_local_datetime(&date.and_time(NaiveTime::MIN)) {
        chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => {
            dt.with_timezone(&Utc)
        }
        // Midnight fell inside a DST gap; treat the naive instant as UTC.
        chrono::LocalResult::None => Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)),
    }
}
