use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::clock::PeriodClock;
use super::errors::{QuotaExceeded, QuotaScope};
use super::models::{AdmissionResult, BillingEvent, DenyReason};
use super::plans::Plan;

/// key: voice-entitlement -> per-user quota head
///
/// The single aggregate holding a user's voice counters. Every change goes through one
/// of the transitions below and is persisted with a compare-and-swap on `version`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entitlement {
    pub user_id: Uuid,
    pub plan: Plan,
    pub voice_enabled: bool,
    pub voice_seconds_total: i64,
    pub voice_seconds_used: i64,
    pub voice_period_start: Option<DateTime<Utc>>,
    pub voice_period_end: Option<DateTime<Utc>>,
    pub daily_limit_enabled: bool,
    pub daily_limit_seconds: i64,
    pub daily_seconds_used: i64,
    pub daily_used_at_date: String,
    /// Last instant the monthly counter was zeroed; ledger entries from here on make
    /// up `voice_seconds_used`.
    pub usage_reset_at: DateTime<Utc>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rollover {
    pub monthly: bool,
    pub daily: bool,
}

impl Rollover {
    pub fn changed(&self) -> bool {
        self.monthly || self.daily
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingEffect {
    Disabled,
    NewPeriod { usage_reset: bool },
    SamePeriod,
    Stale,
}

impl Entitlement {
    /// Row created on first contact: free tier, capability enabled, period not yet
    /// initialised so the next rollover check fills it in.
    pub fn seed(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            plan: Plan::Free,
            voice_enabled: true,
            voice_seconds_total: 0,
            voice_seconds_used: 0,
            voice_period_start: None,
            voice_period_end: None,
            daily_limit_enabled: false,
            daily_limit_seconds: Plan::Free.policy().daily_seconds_default,
            daily_seconds_used: 0,
            daily_used_at_date: String::new(),
            usage_reset_at: now,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_plus(&self) -> bool {
        self.plan.is_plus()
    }

    pub fn is_pro(&self) -> bool {
        self.plan.is_pro()
    }

    pub fn seconds_left(&self) -> i64 {
        (self.voice_seconds_total - self.voice_seconds_used).max(0)
    }

    pub fn daily_left(&self) -> Option<i64> {
        self.daily_limit_enabled
            .then(|| (self.daily_limit_seconds - self.daily_seconds_used).max(0))
    }

    /// Lazy monthly and daily rollover. Idempotent: once applied for a period, running
    /// it again with any `now` inside the same period and day changes nothing.
    pub fn roll_over(&mut self, now: DateTime<Utc>, clock: &PeriodClock) -> Rollover {
        let mut outcome = Rollover::default();
        let today = clock.daily_key(now);

        let expired = self.voice_period_end.map_or(true, |end| now >= end);
        if expired {
            let bounds = clock.monthly_boundary(now);
            self.voice_seconds_total = if self.voice_enabled {
                self.plan.policy().monthly_seconds
            } else {
                0
            };
            self.voice_seconds_used = 0;
            self.voice_period_start = Some(bounds.start);
            self.voice_period_end = Some(bounds.end);
            self.usage_reset_at = now;
            self.daily_seconds_used = 0;
            self.daily_used_at_date = today.clone();
            outcome.monthly = true;
            outcome.daily = true;
        }

        if self.daily_used_at_date != today {
            self.daily_seconds_used = 0;
            self.daily_used_at_date = today;
            outcome.daily = true;
        }

        if outcome.changed() {
            self.updated_at = now;
        }
        outcome
    }

    pub fn admit(&self, want_seconds: i64) -> AdmissionResult {
        let want = want_seconds.max(0);
        let seconds_left = self.seconds_left();
        let daily_left = self.daily_left();

        if !self.voice_enabled {
            return AdmissionResult::deny(DenyReason::TtsDisabled, seconds_left, daily_left);
        }
        if seconds_left <= 0 {
            return AdmissionResult::deny(DenyReason::MonthlyExhausted, seconds_left, daily_left);
        }
        if want > seconds_left {
            return AdmissionResult::deny(DenyReason::InsufficientLeft, seconds_left, daily_left);
        }
        if daily_left.map_or(false, |left| want > left) {
            return AdmissionResult::deny(DenyReason::DailyLimit, seconds_left, daily_left);
        }
        AdmissionResult::allow(seconds_left, daily_left)
    }

    /// Validates and applies a debit against the current counters.
    pub fn charge(&mut self, seconds: i64, now: DateTime<Utc>) -> Result<(), QuotaExceeded> {
        if !self.voice_enabled {
            return Err(QuotaExceeded {
                scope: QuotaScope::Disabled,
                requested: seconds,
                remaining: 0,
            });
        }
        // Checked against the remainder; `used + seconds` may overflow for huge requests.
        let seconds_left = self.seconds_left();
        if seconds > seconds_left {
            return Err(QuotaExceeded {
                scope: QuotaScope::Monthly,
                requested: seconds,
                remaining: seconds_left,
            });
        }
        if let Some(daily_left) = self.daily_left() {
            if seconds > daily_left {
                return Err(QuotaExceeded {
                    scope: QuotaScope::Daily,
                    requested: seconds,
                    remaining: daily_left,
                });
            }
        }

        self.voice_seconds_used += seconds;
        self.daily_seconds_used += seconds;
        self.updated_at = now;
        Ok(())
    }

    /// Applies a verified billing event. Usage is only zeroed when the event opens a
    /// billing period the counters have not already been reset for.
    pub fn apply_billing(
        &mut self,
        event: &BillingEvent,
        plan: Plan,
        now: DateTime<Utc>,
    ) -> BillingEffect {
        // An active event for a period that has already ended was delivered out of order.
        if event.is_active() && event.period_end <= now {
            return BillingEffect::Stale;
        }

        let previous_default = self.plan.policy().daily_seconds_default;
        self.plan = plan;
        self.updated_at = now;
        let policy = plan.policy();

        if !event.is_active() || policy.monthly_seconds <= 0 {
            self.voice_enabled = false;
            self.voice_seconds_total = 0;
            self.voice_seconds_used = 0;
            self.daily_seconds_used = 0;
            self.usage_reset_at = now;
            return BillingEffect::Disabled;
        }

        self.voice_enabled = true;
        self.voice_seconds_total = policy.monthly_seconds;
        // A cap the user chose survives plan changes; only the plan default follows the plan.
        if self.daily_limit_seconds == previous_default {
            self.daily_limit_seconds = policy.daily_seconds_default;
        }

        let effect = if self.voice_period_end != Some(event.period_end) {
            self.voice_period_start = Some(event.period_start);
            self.voice_period_end = Some(event.period_end);
            let usage_reset = self.usage_reset_at < event.period_start;
            if usage_reset {
                self.voice_seconds_used = 0;
                self.daily_seconds_used = 0;
                self.usage_reset_at = now;
            }
            BillingEffect::NewPeriod { usage_reset }
        } else {
            BillingEffect::SamePeriod
        };

        // A mid-period downgrade can leave usage above the new allotment.
        self.voice_seconds_used = self.voice_seconds_used.min(self.voice_seconds_total);
        effect
    }

    pub fn set_daily_limit(&mut self, enabled: bool, seconds: Option<i64>, now: DateTime<Utc>) {
        self.daily_limit_enabled = enabled;
        self.daily_limit_seconds =
            seconds.unwrap_or_else(|| self.plan.policy().daily_seconds_default);
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn rolled(now: DateTime<Utc>) -> Entitlement {
        let mut entitlement = Entitlement::seed(Uuid::new_v4(), now);
        entitlement.roll_over(now, &PeriodClock::utc());
        entitlement
    }

    fn event(plan: &str, status: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> BillingEvent {
        BillingEvent {
            user_id: Uuid::new_v4(),
            external_event_id: "evt_test".to_string(),
            plan: plan.to_string(),
            status: status.to_string(),
            period_start: start,
            period_end: end,
        }
    }

    #[test]
    fn seed_initialises_on_first_rollover() {
        let now = at("2026-10-18T09:00:00Z");
        let mut entitlement = Entitlement::seed(Uuid::new_v4(), now);
        let outcome = entitlement.roll_over(now, &PeriodClock::utc());
        assert!(outcome.monthly);
        assert_eq!(entitlement.voice_seconds_total, 180);
        assert_eq!(entitlement.voice_period_end, Some(at("2026-11-01T00:00:00Z")));
        assert_eq!(entitlement.daily_used_at_date, "2026-10-18");
    }

    #[test]
    fn rollover_is_idempotent_within_period() {
        let now = at("2026-10-18T09:00:00Z");
        let mut entitlement = rolled(now);
        entitlement.charge(30, now).unwrap();
        let later = now + Duration::hours(2);
        assert!(!entitlement.roll_over(later, &PeriodClock::utc()).changed());
        assert_eq!(entitlement.voice_seconds_used, 30);
    }

    #[test]
    fn daily_rollover_keeps_monthly_usage() {
        let now = at("2026-10-18T23:00:00Z");
        let mut entitlement = rolled(now);
        entitlement.charge(40, now).unwrap();
        let outcome = entitlement.roll_over(now + Duration::hours(2), &PeriodClock::utc());
        assert_eq!(
            outcome,
            Rollover {
                monthly: false,
                daily: true
            }
        );
        assert_eq!(entitlement.daily_seconds_used, 0);
        assert_eq!(entitlement.voice_seconds_used, 40);
    }

    #[test]
    fn admit_reports_reasons_in_order() {
        let now = at("2026-10-18T09:00:00Z");
        let mut entitlement = rolled(now);
        assert!(entitlement.admit(180).ok);
        assert_eq!(
            entitlement.admit(181).reason,
            Some(DenyReason::InsufficientLeft)
        );

        entitlement.daily_limit_enabled = true;
        entitlement.daily_limit_seconds = 60;
        let daily = entitlement.admit(90);
        assert_eq!(daily.reason, Some(DenyReason::DailyLimit));
        assert_eq!(daily.daily_left, Some(60));
        assert_eq!(daily.seconds_left, 180);

        entitlement.voice_seconds_used = 180;
        assert_eq!(
            entitlement.admit(1).reason,
            Some(DenyReason::MonthlyExhausted)
        );

        entitlement.voice_enabled = false;
        assert_eq!(entitlement.admit(1).reason, Some(DenyReason::TtsDisabled));
    }

    #[test]
    fn charge_rejects_overdraw_without_mutating() {
        let now = at("2026-10-18T09:00:00Z");
        let mut entitlement = rolled(now);
        let before = entitlement.clone();
        let err = entitlement.charge(181, now).unwrap_err();
        assert_eq!(err.scope, QuotaScope::Monthly);
        assert_eq!(err.remaining, 180);
        assert_eq!(entitlement, before);
    }

    #[test]
    fn charge_enforces_daily_cap() {
        let now = at("2026-10-18T09:00:00Z");
        let mut entitlement = rolled(now);
        entitlement.set_daily_limit(true, None, now);
        entitlement.charge(50, now).unwrap();
        let err = entitlement.charge(11, now).unwrap_err();
        assert_eq!(err.scope, QuotaScope::Daily);
        assert_eq!(err.remaining, 10);
    }

    #[test]
    fn billing_same_period_preserves_usage() {
        let now = at("2026-10-18T09:00:00Z");
        let mut entitlement = rolled(now);
        let start = now + Duration::hours(1);
        let end = start + Duration::days(30);
        let upgrade = event("plus", "active", start, end);
        assert_eq!(
            entitlement.apply_billing(&upgrade, Plan::Plus, start),
            BillingEffect::NewPeriod { usage_reset: true }
        );
        entitlement.charge(500, start).unwrap();

        let metadata_only = event("plus", "active", start, end);
        assert_eq!(
            entitlement.apply_billing(&metadata_only, Plan::Plus, start + Duration::hours(1)),
            BillingEffect::SamePeriod
        );
        assert_eq!(entitlement.voice_seconds_used, 500);
    }

    #[test]
    fn oversized_charge_is_rejected_without_overflow() {
        let now = at("2026-10-18T09:00:00Z");
        let mut entitlement = rolled(now);
        entitlement.set_daily_limit(true, Some(120), now);
        entitlement.charge(90, now).unwrap();
        let before = entitlement.clone();

        let err = entitlement.charge(i64::MAX, now).unwrap_err();
        assert_eq!(err.scope, QuotaScope::Monthly);
        assert_eq!(err.remaining, 90);
        assert_eq!(entitlement, before);

        entitlement.daily_limit_seconds = 30;
        assert!(!entitlement.admit(i64::MAX).ok);
        entitlement.voice_seconds_total = i64::MAX;
        let err = entitlement.charge(i64::MAX - 100, now).unwrap_err();
        assert_eq!(err.scope, QuotaScope::Daily);
        assert_eq!(entitlement.admit(i64::MAX - 100).reason, Some(DenyReason::DailyLimit));
    }

    #[test]
    fn billing_keeps_custom_daily_limit() {
        let now = at("2026-10-18T09:00:00Z");
        let mut entitlement = rolled(now);
        let start = now + Duration::hours(1);
        let end = start + Duration::days(30);
        entitlement.apply_billing(&event("plus", "active", start, end), Plan::Plus, start);
        assert_eq!(entitlement.daily_limit_seconds, 600);

        entitlement.set_daily_limit(true, Some(90), start);
        let later = start + Duration::hours(2);
        entitlement.apply_billing(&event("plus", "active", start, end), Plan::Plus, later);
        assert_eq!(entitlement.daily_limit_seconds, 90);
        entitlement.apply_billing(&event("pro", "active", start, end), Plan::Pro, later);
        assert_eq!(entitlement.daily_limit_seconds, 90);
        assert!(entitlement.daily_limit_enabled);
    }

    #[test]
    fn billing_downgrade_clamps_usage() {
        let now = at("2026-10-18T09:00:00Z");
        let mut entitlement = rolled(now);
        let start = now + Duration::hours(1);
        let end = start + Duration::days(30);
        entitlement.apply_billing(&event("pro", "active", start, end), Plan::Pro, start);
        entitlement.charge(4_000, start).unwrap();
        entitlement.apply_billing(&event("plus", "active", start, end), Plan::Plus, start);
        assert_eq!(entitlement.voice_seconds_total, 3_600);
        assert_eq!(entitlement.voice_seconds_used, 3_600);
    }

    #[test]
    fn billing_cancellation_disables() {
        let now = at("2026-10-18T09:00:00Z");
        let mut entitlement = rolled(now);
        entitlement.charge(20, now).unwrap();
        let end = at("2026-11-01T00:00:00Z");
        let effect =
            entitlement.apply_billing(&event("plus", "canceled", now, end), Plan::Plus, now);
        assert_eq!(effect, BillingEffect::Disabled);
        assert!(!entitlement.voice_enabled);
        assert_eq!(entitlement.voice_seconds_total, 0);
        assert_eq!(entitlement.voice_seconds_used, 0);
    }

    #[test]
    fn billing_older_period_is_stale() {
        let now = at("2026-10-18T09:00:00Z");
        let mut entitlement = rolled(now);
        let before = entitlement.clone();
        let old = event(
            "pro",
            "active",
            at("2026-09-01T00:00:00Z"),
            at("2026-10-01T00:00:00Z"),
        );
        assert_eq!(
            entitlement.apply_billing(&old, Plan::Pro, now),
            BillingEffect::Stale
        );
        assert_eq!(entitlement, before);
    }

    #[test]
    fn billing_period_already_reset_lazily_keeps_usage() {
        let period_start = at("2026-11-01T00:00:00Z");
        let rolled_at = period_start + Duration::minutes(2);
        let mut entitlement = rolled(rolled_at);
        entitlement.charge(30, rolled_at).unwrap();
        let renewal = event(
            "free",
            "active",
            period_start,
            period_start + Duration::days(31),
        );
        let effect = entitlement.apply_billing(&renewal, Plan::Free, rolled_at + Duration::minutes(3));
        assert_eq!(effect, BillingEffect::NewPeriod { usage_reset: false });
        assert_eq!(entitlement.voice_seconds_used, 30);
    }
}
