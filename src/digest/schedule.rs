//! Digest scheduling — quiet hours and the periodic check driver
//!
//! Quiet hours are a daily `HH:MM–HH:MM` window evaluated in a named IANA
//! time zone. Boundary semantics: start inclusive, end exclusive. A window
//! whose start equals its end is disabled; a window whose start is after
//! its end wraps around midnight.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Timelike, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Parse `"HH:MM"` into a minute-of-day.
pub fn parse_minute_of_day(value: &str) -> Option<u32> {
    let (hours, minutes) = value.split_once(':')?;
    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// A daily quiet window in a named time zone.
#[derive(Debug, Clone)]
pub struct QuietHours {
    start_minute: u32,
    end_minute: u32,
    /// `None` means the zone name was unrecognized; fall back to the
    /// system's local zone.
    zone: Option<chrono_tz::Tz>,
}

impl QuietHours {
    /// Build from validated `HH:MM` strings and an IANA zone name.
    /// An unrecognized zone falls back to the local zone without raising.
    pub fn new(start_minute: u32, end_minute: u32, timezone: &str) -> Self {
        let zone = match chrono_tz::Tz::from_str(timezone) {
            Ok(zone) => Some(zone),
            Err(_) => {
                warn!(timezone, "Unrecognized time zone — falling back to system local");
                None
            }
        };
        Self {
            start_minute,
            end_minute,
            zone,
        }
    }

    /// Minute-of-day of `at_ms` in the configured zone.
    pub fn minute_of_day(&self, at_ms: u64) -> u32 {
        let utc = Utc
            .timestamp_millis_opt(at_ms as i64)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        match self.zone {
            Some(zone) => {
                let local = utc.with_timezone(&zone);
                local.hour() * 60 + local.minute()
            }
            None => {
                let local = utc.with_timezone(&chrono::Local);
                local.hour() * 60 + local.minute()
            }
        }
    }

    /// Is the given wall-clock minute inside the quiet window?
    pub fn contains_minute(&self, minute: u32) -> bool {
        let (start, end) = (self.start_minute, self.end_minute);
        if start == end {
            // Window disabled.
            return false;
        }
        if start < end {
            start <= minute && minute < end
        } else {
            // Wrap-around window (e.g. 22:00–08:00).
            minute >= start || minute < end
        }
    }

    pub fn is_quiet_at(&self, at_ms: u64) -> bool {
        self.contains_minute(self.minute_of_day(at_ms))
    }

    /// Milliseconds until the quiet window ends; 0 when outside it.
    pub fn ms_until_quiet_end(&self, at_ms: u64) -> u64 {
        let minute = self.minute_of_day(at_ms);
        if !self.contains_minute(minute) {
            return 0;
        }
        let remaining =
            (self.end_minute + MINUTES_PER_DAY - minute) % MINUTES_PER_DAY;
        u64::from(remaining) * 60_000
    }
}

/// Handle for a running periodic check. Stopping is idempotent.
pub struct CheckHandle {
    token: CancellationToken,
}

impl CheckHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }
}

/// Run `callback` every `interval_ms` until the returned handle is stopped.
/// Callback errors are logged and never stop the schedule.
pub fn schedule_check<F, Fut>(interval_ms: u64, callback: F) -> CheckHandle
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let token = CancellationToken::new();
    let task_token = token.clone();
    tokio::spawn(async move {
        let interval = Duration::from_millis(interval_ms);
        loop {
            tokio::select! {
                () = task_token.cancelled() => break,
                () = tokio::time::sleep(interval) => {
                    if let Err(error) = callback().await {
                        warn!(error = %error, "Scheduled check failed — continuing");
                    }
                }
            }
        }
        debug!("Periodic check stopped");
    });
    CheckHandle { token }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn window(start: &str, end: &str) -> QuietHours {
        QuietHours::new(
            parse_minute_of_day(start).unwrap(),
            parse_minute_of_day(end).unwrap(),
            "UTC",
        )
    }

    fn at_utc_minute(minute: u32) -> u64 {
        // 2026-03-02T00:00:00Z, a date without DST transitions in UTC.
        let midnight: u64 = 1_772_409_600_000;
        midnight + u64::from(minute) * 60_000
    }

    #[test]
    fn parses_hh_mm() {
        assert_eq!(parse_minute_of_day("00:00"), Some(0));
        assert_eq!(parse_minute_of_day("22:00"), Some(1_320));
        assert_eq!(parse_minute_of_day("23:59"), Some(1_439));
        assert_eq!(parse_minute_of_day("24:00"), None);
        assert_eq!(parse_minute_of_day("12:60"), None);
        assert_eq!(parse_minute_of_day("noon"), None);
    }

    #[test]
    fn wrap_around_window() {
        let quiet = window("22:00", "08:00");
        for minute in [22 * 60, 23 * 60 + 59, 0, 5 * 60] {
            assert!(quiet.contains_minute(minute), "minute {minute} should be quiet");
        }
        for minute in [8 * 60, 12 * 60, 21 * 60 + 59] {
            assert!(!quiet.contains_minute(minute), "minute {minute} should not be quiet");
        }
    }

    #[test]
    fn non_wrap_window() {
        let quiet = window("09:00", "17:00");
        for minute in [9 * 60, 12 * 60] {
            assert!(quiet.contains_minute(minute));
        }
        for minute in [8 * 60 + 59, 17 * 60, 18 * 60] {
            assert!(!quiet.contains_minute(minute));
        }
    }

    #[test]
    fn equal_bounds_disable_the_window() {
        let quiet = window("09:00", "09:00");
        assert!(!quiet.contains_minute(9 * 60));
        assert!(!quiet.contains_minute(0));
    }

    #[test]
    fn ms_until_quiet_end() {
        let quiet = window("22:00", "08:00");
        // Outside: 0.
        assert_eq!(quiet.ms_until_quiet_end(at_utc_minute(12 * 60)), 0);
        // 23:00 → 9 hours to 08:00.
        assert_eq!(
            quiet.ms_until_quiet_end(at_utc_minute(23 * 60)),
            9 * 60 * 60_000
        );
        // 05:00 → 3 hours.
        assert_eq!(
            quiet.ms_until_quiet_end(at_utc_minute(5 * 60)),
            3 * 60 * 60_000
        );
    }

    #[test]
    fn named_zone_shifts_the_window() {
        // 22:00 UTC == 17:00 in America/New_York (EST, winter).
        let quiet = QuietHours::new(
            parse_minute_of_day("17:00").unwrap(),
            parse_minute_of_day("18:00").unwrap(),
            "America/New_York",
        );
        // 2026-01-15T22:30:00Z → 17:30 EST, inside the window.
        let at = 1_768_516_200_000;
        assert!(quiet.is_quiet_at(at));
        // One hour later → 18:30 EST, outside.
        assert!(!quiet.is_quiet_at(at + 3_600_000));
    }

    #[test]
    fn unknown_zone_falls_back_without_raising() {
        let quiet = QuietHours::new(0, 60, "Not/AZone");
        // Whatever the host zone is, evaluation must not panic.
        let _ = quiet.is_quiet_at(1_768_516_200_000);
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_runs_and_survives_errors() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let handle = schedule_check(1_000, move || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    anyhow::bail!("first tick fails");
                }
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        handle.stop();
        handle.stop(); // idempotent
        tokio::time::sleep(Duration::from_millis(3_000)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3, "no ticks after stop");
    }
}
