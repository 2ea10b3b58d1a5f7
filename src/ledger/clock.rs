use chrono::{DateTime, Datelike, FixedOffset, Months, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use serde::Serialize;

/// key: voice-period-bounds -> monthly window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeriodBounds {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// key: voice-period-clock -> rollover keys in the reference zone
///
/// Every daily and monthly rollover decision goes through one `PeriodClock`, so the
/// whole process agrees on where calendar days and months begin.
#[derive(Debug, Clone, Copy)]
pub struct PeriodClock {
    zone: FixedOffset,
}

impl PeriodClock {
    pub fn new(zone: FixedOffset) -> Self {
        Self { zone }
    }

    pub fn utc() -> Self {
        Self::new(Utc.fix())
    }

    /// Offsets outside +/-24h are rejected by chrono; those fall back to UTC.
    pub fn from_offset_minutes(minutes: i32) -> Self {
        match FixedOffset::east_opt(minutes.saturating_mul(60)) {
            Some(zone) => Self::new(zone),
            None => {
                tracing::warn!(minutes, "reference offset out of range; using UTC");
                Self::utc()
            }
        }
    }

    pub fn zone(&self) -> FixedOffset {
        self.zone
    }

    pub fn daily_key(&self, now: DateTime<Utc>) -> String {
        now.with_timezone(&self.zone)
            .date_naive()
            .format("%Y-%m-%d")
            .to_string()
    }

    pub fn monthly_boundary(&self, now: DateTime<Utc>) -> PeriodBounds {
        let local = now.with_timezone(&self.zone).date_naive();
        let first = NaiveDate::from_ymd_opt(local.year(), local.month(), 1).unwrap_or(local);
        let next = first.checked_add_months(Months::new(1)).unwrap_or(first);
        PeriodBounds {
            start: self.start_of_day(first),
            end: self.start_of_day(next),
        }
    }

    fn start_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        let midnight = date.and_time(NaiveTime::MIN);
        // Fixed offsets have no gaps or folds, so the mapping is always unique.
        Utc.from_utc_datetime(&(midnight - self.zone))
    }
}

impl Default for PeriodClock {
    fn default() -> Self {
        Self::utc()
    }
}
