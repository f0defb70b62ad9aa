use crate::audit::AuditEntry;
use crate::error::Result;
use crate::store::Store;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;

/// Scheduled (non-authoritative) availability for display and
/// observability. The flag in the store is the only authority; this is
/// never used to gate a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleState {
    pub should_be_open: bool,
    pub next_boundary: DateTime<Utc>,
}

/// Pure computation of the scheduled window state at `now`.
pub fn scheduled_state(
    now: DateTime<Utc>,
    timezone: Tz,
    open_time: NaiveTime,
    close_time: NaiveTime,
) -> ScheduleState {
    let local = now.with_timezone(&timezone);
    let date = local.date_naive();
    let time = local.time();

    if time < open_time {
        ScheduleState {
            should_be_open: false,
            next_boundary: local_instant(&timezone, date, open_time),
        }
    } else if time < close_time {
        ScheduleState {
            should_be_open: true,
            next_boundary: local_instant(&timezone, date, close_time),
        }
    } else {
        ScheduleState {
            should_be_open: false,
            next_boundary: local_instant(&timezone, date + chrono::Duration::days(1), open_time),
        }
    }
}

/// Governs the shared `tokens_enabled` flag the coordinator consults.
///
/// Runs as a periodic tick with boundary-crossing detection: when a tick
/// interval contains the local open (resp. close) time, the flag is
/// forced true (resp. false) with a blind overwrite. Between boundaries
/// an admin may toggle the flag freely and the override persists until
/// the next boundary fires; a scheduled-vs-actual mismatch is an
/// expected, informational condition, not an error.
pub struct AvailabilityScheduler {
    store: Arc<dyn Store>,
    timezone: Tz,
    open_time: NaiveTime,
    close_time: NaiveTime,
    tick: std::time::Duration,
}

impl AvailabilityScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        timezone: Tz,
        open_time: NaiveTime,
        close_time: NaiveTime,
        tick_secs: u64,
    ) -> Self {
        Self {
            store,
            timezone,
            open_time,
            close_time,
            tick: std::time::Duration::from_secs(tick_secs.max(1)),
        }
    }

    /// Run forever; spawned as a background task at startup.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // The first tick fires immediately; use it to establish the
        // baseline instant without enforcing anything.
        interval.tick().await;
        let mut prev = Utc::now();

        loop {
            interval.tick().await;
            let now = Utc::now();

            if let Err(error) = self.enforce_boundaries(prev, now).await {
                tracing::warn!(
                    target: "prizegate::scheduler",
                    error = %error,
                    "boundary enforcement failed; will retry next tick"
                );
                // Keep prev so a transient store failure does not lose a
                // boundary crossing.
                continue;
            }

            prev = now;
        }
    }

    /// Force the flag for every boundary that fell within `(prev, now]`,
    /// in chronological order, then log scheduled-vs-actual mismatches.
    pub async fn enforce_boundaries(
        &self,
        prev: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut crossings: Vec<(DateTime<Utc>, bool)> = Vec::new();
        for boundary in boundaries_between(prev, now, &self.timezone, self.open_time) {
            crossings.push((boundary, true));
        }
        for boundary in boundaries_between(prev, now, &self.timezone, self.close_time) {
            crossings.push((boundary, false));
        }
        crossings.sort_by_key(|(at, _)| *at);

        for (at, enabled) in crossings {
            self.force(enabled, at).await?;
        }

        let state = scheduled_state(now, self.timezone, self.open_time, self.close_time);
        let actual = self.store.system_config().await?.tokens_enabled;
        if state.should_be_open != actual {
            tracing::info!(
                target: "prizegate::scheduler",
                should_be_open = state.should_be_open,
                tokens_enabled = actual,
                next_boundary = %state.next_boundary,
                "availability differs from schedule (manual override in effect)"
            );
        }

        Ok(())
    }

    /// Blind overwrite; never a read-modify-write of the current value.
    async fn force(&self, enabled: bool, boundary_at: DateTime<Utc>) -> Result<()> {
        self.store.set_tokens_enabled(enabled).await?;
        let outcome = if enabled { "FORCED_OPEN" } else { "FORCED_CLOSED" };
        self.store
            .append_audit(AuditEntry::availability(outcome).with_detail(boundary_at.to_rfc3339()))
            .await?;
        tracing::info!(
            target: "prizegate::scheduler",
            tokens_enabled = enabled,
            boundary = %boundary_at,
            "boundary job forced availability flag"
        );
        Ok(())
    }
}

/// Instants in `(prev, now]` at which the local wall-clock `time` occurs.
fn boundaries_between(
    prev: DateTime<Utc>,
    now: DateTime<Utc>,
    timezone: &Tz,
    time: NaiveTime,
) -> Vec<DateTime<Utc>> {
    let mut result = Vec::new();
    let mut date = prev.with_timezone(timezone).date_naive();
    let last = now.with_timezone(timezone).date_naive();

    while date <= last {
        let boundary = local_instant(timezone, date, time);
        if boundary > prev && boundary <= now {
            result.push(boundary);
        }
        date = date + chrono::Duration::days(1);
    }

    result
}

/// Resolve a local wall-clock time on a date to a UTC instant. DST
/// ambiguity takes the earlier reading; a nonexistent local time (spring
/// gap) falls back to interpreting the naive value as UTC.
fn local_instant(tz: &Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&date.and_time(time)) {
        chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => {
            dt.with_timezone(&Utc)
        }
        chrono::LocalResult::None => Utc.from_utc_datetime(&date.and_time(time)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono_tz::America::New_York;

    fn open() -> NaiveTime {
        NaiveTime::from_hms_opt(10, 0, 0).unwrap()
    }

    fn close() -> NaiveTime {
        NaiveTime::from_hms_opt(22, 0, 0).unwrap()
    }

    fn local(h: u32, m: u32) -> DateTime<Utc> {
        New_York
            .with_ymd_and_hms(2026, 6, 15, h, m, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_minute_before_open_is_closed_with_open_next() {
        let state = scheduled_state(local(9, 59), New_York, open(), close());
        assert!(!state.should_be_open);
        assert_eq!(state.next_boundary, local(10, 0));
    }

    #[test]
    fn test_minute_after_open_is_open_with_close_next() {
        let state = scheduled_state(local(10, 1), New_York, open(), close());
        assert!(state.should_be_open);
        assert_eq!(state.next_boundary, local(22, 0));
    }

    #[test]
    fn test_after_close_next_boundary_is_tomorrow_open() {
        let state = scheduled_state(local(23, 30), New_York, open(), close());
        assert!(!state.should_be_open);
        assert_eq!(
            state.next_boundary,
            New_York
                .with_ymd_and_hms(2026, 6, 16, 10, 0, 0)
                .unwrap()
                .with_timezone(&Utc)
        );
    }

    #[test]
    fn test_boundaries_between_detects_crossing() {
        let crossed = boundaries_between(local(9, 59), local(10, 1), &New_York, open());
        assert_eq!(crossed, vec![local(10, 0)]);

        assert!(boundaries_between(local(10, 1), local(10, 2), &New_York, open()).is_empty());
        assert!(boundaries_between(local(9, 57), local(9, 58), &New_York, open()).is_empty());
    }

    #[tokio::test]
    async fn test_open_boundary_forces_flag_true() {
        let store = Arc::new(MemoryStore::new());
        store.set_tokens_enabled(false).await.unwrap();

        let scheduler =
            AvailabilityScheduler::new(store.clone(), New_York, open(), close(), 30);
        scheduler
            .enforce_boundaries(local(9, 59), local(10, 1))
            .await
            .unwrap();

        assert!(store.system_config().await.unwrap().tokens_enabled);
    }

    #[tokio::test]
    async fn test_close_boundary_overrides_manual_on() {
        let store = Arc::new(MemoryStore::new());
        // Admin manually turned the system on after hours.
        store.set_tokens_enabled(true).await.unwrap();

        let scheduler =
            AvailabilityScheduler::new(store.clone(), New_York, open(), close(), 30);
        scheduler
            .enforce_boundaries(local(21, 59), local(22, 1))
            .await
            .unwrap();

        assert!(!store.system_config().await.unwrap().tokens_enabled);
    }

    #[tokio::test]
    async fn test_no_boundary_leaves_manual_override_alone() {
        let store = Arc::new(MemoryStore::new());
        // Manually off during scheduled-open hours.
        store.set_tokens_enabled(false).await.unwrap();

        let scheduler =
            AvailabilityScheduler::new(store.clone(), New_York, open(), close(), 30);
        scheduler
            .enforce_boundaries(local(14, 0), local(14, 1))
            .await
            .unwrap();

        // Mismatch is logged, not corrected.
        assert!(!store.system_config().await.unwrap().tokens_enabled);
    }

    #[tokio::test]
    async fn test_long_gap_applies_boundaries_in_order() {
        let store = Arc::new(MemoryStore::new());
        store.set_tokens_enabled(false).await.unwrap();

        let scheduler =
            AvailabilityScheduler::new(store.clone(), New_York, open(), close(), 30);
        // Gap spanning both boundaries: close fires last, flag ends false.
        scheduler
            .enforce_boundaries(local(9, 0), local(23, 0))
            .await
            .unwrap();

        assert!(!store.system_config().await.unwrap().tokens_enabled);
    }
}
