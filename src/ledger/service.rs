use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config;

use super::clock::PeriodClock;
use super::entitlement::Entitlement;
use super::errors::{LedgerError, LedgerResult};
use super::models::{AdmissionResult, DebitReceipt, UsageAudit, UsageKind, UsageLedgerEntry};
use super::store::{EntitlementStore, PgEntitlementStore};

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub clock: PeriodClock,
    pub max_commit_attempts: u32,
}

impl LedgerConfig {
    pub fn from_env() -> Self {
        Self {
            clock: PeriodClock::from_offset_minutes(*config::QUOTA_REFERENCE_UTC_OFFSET_MINUTES),
            max_commit_attempts: *config::QUOTA_MAX_COMMIT_ATTEMPTS,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            clock: PeriodClock::utc(),
            max_commit_attempts: 8,
        }
    }
}

/// key: voice-ledger-service -> admission, debit, billing sync
///
/// Stateless over the store: any number of clones may serve requests concurrently.
/// Nothing here holds a lock while the caller performs the metered work; the gate is
/// advisory and the debit re-validates from a fresh read every time.
#[derive(Clone)]
pub struct LedgerService {
    pub(super) store: Arc<dyn EntitlementStore>,
    pub(super) config: LedgerConfig,
}

impl LedgerService {
    pub fn new(store: Arc<dyn EntitlementStore>, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    pub fn postgres(pool: PgPool, config: LedgerConfig) -> Self {
        Self::new(Arc::new(PgEntitlementStore::new(pool)), config)
    }

    pub(super) fn attempts(&self) -> u32 {
        self.config.max_commit_attempts.max(1)
    }

    /// Loads the user's row (creating it on first contact) and persists any pending
    /// monthly or daily rollover. Losing the write to a concurrent update just means
    /// re-reading; the rollover condition is false once someone has applied it.
    pub(super) async fn rolled_over(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> LedgerResult<Entitlement> {
        let seed = Entitlement::seed(user_id, now);
        for _ in 0..self.attempts() {
            let mut entitlement = self.store.load_or_create(&seed).await?;
            let expected = entitlement.version;
            let rollover = entitlement.roll_over(now, &self.config.clock);
            if !rollover.changed() {
                return Ok(entitlement);
            }
            if self.store.compare_and_swap(&entitlement, expected).await? {
                debug!(
                    %user_id,
                    monthly = rollover.monthly,
                    daily = rollover.daily,
                    period_end = ?entitlement.voice_period_end,
                    "voice entitlement rolled over"
                );
                entitlement.version = expected + 1;
                return Ok(entitlement);
            }
        }
        Err(self.contention(user_id))
    }

    pub(super) fn contention(&self, user_id: Uuid) -> LedgerError {
        let attempts = self.attempts();
        warn!(%user_id, attempts, "voice entitlement write contention; failing closed");
        LedgerError::Contention { user_id, attempts }
    }

    pub async fn can_consume(
        &self,
        user_id: Uuid,
        want_seconds: i64,
    ) -> LedgerResult<AdmissionResult> {
        self.can_consume_at(user_id, want_seconds, Utc::now()).await
    }

    pub async fn can_consume_at(
        &self,
        user_id: Uuid,
        want_seconds: i64,
        now: DateTime<Utc>,
    ) -> LedgerResult<AdmissionResult> {
        let entitlement = self.rolled_over(user_id, now).await?;
        let result = entitlement.admit(want_seconds);
        if let Some(reason) = result.reason {
            info!(
                %user_id,
                want_seconds,
                reason = reason.as_str(),
                seconds_left = result.seconds_left,
                daily_left = ?result.daily_left,
                "voice admission denied"
            );
        }
        Ok(result)
    }

    /// Charges measured usage against the live clock, re-reading it on every commit
    /// attempt so a retry never lands behind a rollover another handler already made.
    pub async fn debit(
        &self,
        user_id: Uuid,
        actual_seconds: f64,
        usage_type: UsageKind,
        session_id: Option<String>,
        metadata: Value,
    ) -> LedgerResult<DebitReceipt> {
        self.debit_with(
            user_id,
            actual_seconds,
            usage_type,
            session_id,
            metadata,
            Utc::now,
        )
        .await
    }

    pub async fn debit_at(
        &self,
        user_id: Uuid,
        actual_seconds: f64,
        usage_type: UsageKind,
        session_id: Option<String>,
        metadata: Value,
        now: DateTime<Utc>,
    ) -> LedgerResult<DebitReceipt> {
        self.debit_with(
            user_id,
            actual_seconds,
            usage_type,
            session_id,
            metadata,
            move || now,
        )
        .await
    }

    /// Rollover, validation, counter increment and the ledger append are computed from
    /// one read and committed with one compare-and-swap, so a concurrent debit either
    /// sees this one's effect or forces a retry.
    async fn debit_with<F>(
        &self,
        user_id: Uuid,
        actual_seconds: f64,
        usage_type: UsageKind,
        session_id: Option<String>,
        metadata: Value,
        clock: F,
    ) -> LedgerResult<DebitReceipt>
    where
        F: Fn() -> DateTime<Utc> + Send + Sync,
    {
        let seconds = round_up_seconds(actual_seconds)?;
        if seconds == 0 {
            let entitlement = self.rolled_over(user_id, clock()).await?;
            return Ok(DebitReceipt {
                debited: 0,
                seconds_left: entitlement.seconds_left(),
                entry_id: None,
            });
        }

        for attempt in 1..=self.attempts() {
            let now = clock();
            let mut entitlement = self
                .store
                .load_or_create(&Entitlement::seed(user_id, now))
                .await?;
            let expected = entitlement.version;
            entitlement.roll_over(now, &self.config.clock);

            if let Err(exceeded) = entitlement.charge(seconds, now) {
                info!(
                    %user_id,
                    seconds,
                    scope = exceeded.scope.as_str(),
                    remaining = exceeded.remaining,
                    "voice debit rejected"
                );
                return Err(exceeded.into());
            }

            // The entry belongs to the period it was charged to, even when another
            // handler's clock opened that period slightly ahead of ours.
            let entry = UsageLedgerEntry {
                id: Uuid::new_v4(),
                user_id,
                usage_type,
                seconds,
                session_id: session_id.clone(),
                metadata: metadata.clone(),
                created_at: now.max(entitlement.usage_reset_at),
            };

            if self.store.commit_debit(&entitlement, expected, &entry).await? {
                info!(
                    %user_id,
                    seconds,
                    usage_type = usage_type.as_str(),
                    used = entitlement.voice_seconds_used,
                    total = entitlement.voice_seconds_total,
                    "voice usage debited"
                );
                return Ok(DebitReceipt {
                    debited: seconds,
                    seconds_left: entitlement.seconds_left(),
                    entry_id: Some(entry.id),
                });
            }
            debug!(%user_id, attempt, "voice debit lost a concurrent update; retrying");
        }
        Err(self.contention(user_id))
    }

    pub async fn entitlement(&self, user_id: Uuid) -> LedgerResult<Entitlement> {
        self.rolled_over(user_id, Utc::now()).await
    }

    pub async fn set_daily_limit(
        &self,
        user_id: Uuid,
        enabled: bool,
        seconds: Option<i64>,
    ) -> LedgerResult<Entitlement> {
        self.set_daily_limit_at(user_id, enabled, seconds, Utc::now())
            .await
    }

    pub async fn set_daily_limit_at(
        &self,
        user_id: Uuid,
        enabled: bool,
        seconds: Option<i64>,
        now: DateTime<Utc>,
    ) -> LedgerResult<Entitlement> {
        if let Some(value) = seconds {
            if value < 0 {
                return Err(LedgerError::InvalidAmount(format!(
                    "daily limit must be non-negative, got {value}"
                )));
            }
        }

        for _ in 0..self.attempts() {
            let mut entitlement = self.rolled_over(user_id, now).await?;
            let expected = entitlement.version;
            entitlement.set_daily_limit(enabled, seconds, now);
            if self.store.compare_and_swap(&entitlement, expected).await? {
                info!(
                    %user_id,
                    enabled,
                    seconds = entitlement.daily_limit_seconds,
                    "voice daily limit updated"
                );
                entitlement.version = expected + 1;
                return Ok(entitlement);
            }
        }
        Err(self.contention(user_id))
    }

    pub async fn audit_usage(&self, user_id: Uuid) -> LedgerResult<UsageAudit> {
        self.audit_usage_at(user_id, Utc::now()).await
    }

    /// Recomputes usage for the current period from the ledger and compares it with
    /// the counter.
    pub async fn audit_usage_at(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> LedgerResult<UsageAudit> {
        let entitlement = self.rolled_over(user_id, now).await?;
        let entries = self
            .store
            .ledger_entries(user_id, entitlement.usage_reset_at)
            .await?;
        let ledger_sum: i64 = entries.iter().map(|entry| entry.seconds).sum();
        let consistent = ledger_sum == entitlement.voice_seconds_used;
        if !consistent {
            warn!(
                %user_id,
                counter = entitlement.voice_seconds_used,
                ledger_sum,
                "voice usage counter diverges from ledger"
            );
        }
        Ok(UsageAudit {
            user_id,
            since: entitlement.usage_reset_at,
            counter: entitlement.voice_seconds_used,
            ledger_sum,
            entries: entries.len(),
            consistent,
        })
    }
}

/// Partial seconds always bill as a whole second.
pub fn round_up_seconds(actual_seconds: f64) -> LedgerResult<i64> {
    if !actual_seconds.is_finite() || actual_seconds < 0.0 {
        return Err(LedgerError::InvalidAmount(format!(
            "usage must be a non-negative number of seconds, got {actual_seconds}"
        )));
    }
    Ok(actual_seconds.ceil() as i64)
}
