use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres};
use uuid::Uuid;

use super::entitlement::Entitlement;
use super::errors::StoreResult;
use super::models::{BillingSyncEvent, UsageKind, UsageLedgerEntry};
use super::plans::Plan;

/// key: voice-billing-commit -> outcome of the atomic sync write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingCommit {
    Applied,
    /// The external event id was recorded by someone else first.
    Duplicate,
    /// The entitlement moved past `expected_version`; re-read and retry.
    Conflict,
}

/// key: voice-entitlement-store -> persistence seam
///
/// All counter writes are compare-and-swap on `Entitlement::version`: a write only lands
/// if the stored version still equals the one the caller read, and it bumps the version
/// by one.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Returns the stored row, inserting `seed` first when the user has none.
    async fn load_or_create(&self, seed: &Entitlement) -> StoreResult<Entitlement>;

    async fn compare_and_swap(&self, next: &Entitlement, expected_version: i64)
        -> StoreResult<bool>;

    /// Counter update and ledger append as one unit. `false` means nothing was written.
    async fn commit_debit(
        &self,
        next: &Entitlement,
        expected_version: i64,
        entry: &UsageLedgerEntry,
    ) -> StoreResult<bool>;

    /// Read-only check against the idempotency ledger; never locks the entitlement.
    async fn billing_event_exists(&self, external_event_id: &str) -> StoreResult<bool>;

    async fn commit_billing(
        &self,
        next: &Entitlement,
        expected_version: i64,
        event: &BillingSyncEvent,
    ) -> StoreResult<BillingCommit>;

    async fn ledger_entries(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<UsageLedgerEntry>>;
}

/// key: voice-entitlement-store-postgres
#[derive(Clone)]
pub struct PgEntitlementStore {
    pool: PgPool,
}

impl PgEntitlementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct EntitlementRow {
    user_id: Uuid,
    plan: String,
    voice_enabled: bool,
    voice_seconds_total: i64,
    voice_seconds_used: i64,
    voice_period_start: Option<DateTime<Utc>>,
    voice_period_end: Option<DateTime<Utc>>,
    daily_limit_enabled: bool,
    daily_limit_seconds: i64,
    daily_seconds_used: i64,
    daily_used_at_date: String,
    usage_reset_at: DateTime<Utc>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<EntitlementRow> for Entitlement {
    fn from(row: EntitlementRow) -> Self {
        Self {
            user_id: row.user_id,
            plan: Plan::resolve(&row.plan),
            voice_enabled: row.voice_enabled,
            voice_seconds_total: row.voice_seconds_total,
            voice_seconds_used: row.voice_seconds_used,
            voice_period_start: row.voice_period_start,
            voice_period_end: row.voice_period_end,
            daily_limit_enabled: row.daily_limit_enabled,
            daily_limit_seconds: row.daily_limit_seconds,
            daily_seconds_used: row.daily_seconds_used,
            daily_used_at_date: row.daily_used_at_date,
            usage_reset_at: row.usage_reset_at,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct UsageLedgerRow {
    id: Uuid,
    user_id: Uuid,
    usage_type: String,
    seconds: i64,
    session_id: Option<String>,
    metadata: Value,
    created_at: DateTime<Utc>,
}

impl From<UsageLedgerRow> for UsageLedgerEntry {
    fn from(row: UsageLedgerRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            usage_type: UsageKind::from_str(&row.usage_type).unwrap_or(UsageKind::ChatVoice),
            seconds: row.seconds,
            session_id: row.session_id,
            metadata: row.metadata,
            created_at: row.created_at,
        }
    }
}

async fn update_versioned<'c, E>(
    executor: E,
    next: &Entitlement,
    expected_version: i64,
) -> Result<bool, sqlx::Error>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE voice_entitlements SET
            plan = $2,
            is_plus = $3,
            is_pro = $4,
            voice_enabled = $5,
            voice_seconds_total = $6,
            voice_seconds_used = $7,
            voice_period_start = $8,
            voice_period_end = $9,
            daily_limit_enabled = $10,
            daily_limit_seconds = $11,
            daily_seconds_used = $12,
            daily_used_at_date = $13,
            usage_reset_at = $14,
            updated_at = $15,
            version = version + 1
        WHERE user_id = $1 AND version = $16
        "#,
    )
    .bind(next.user_id)
    .bind(next.plan.as_str())
    .bind(next.is_plus())
    .bind(next.is_pro())
    .bind(next.voice_enabled)
    .bind(next.voice_seconds_total)
    .bind(next.voice_seconds_used)
    .bind(next.voice_period_start)
    .bind(next.voice_period_end)
    .bind(next.daily_limit_enabled)
    .bind(next.daily_limit_seconds)
    .bind(next.daily_seconds_used)
    .bind(&next.daily_used_at_date)
    .bind(next.usage_reset_at)
    .bind(next.updated_at)
    .bind(expected_version)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

#[async_trait]
impl EntitlementStore for PgEntitlementStore {
    async fn load_or_create(&self, seed: &Entitlement) -> StoreResult<Entitlement> {
        sqlx::query(
            r#"
            INSERT INTO voice_entitlements (
                user_id,
                plan,
                is_plus,
                is_pro,
                voice_enabled,
                voice_seconds_total,
                voice_seconds_used,
                voice_period_start,
                voice_period_end,
                daily_limit_enabled,
                daily_limit_seconds,
                daily_seconds_used,
                daily_used_at_date,
                usage_reset_at,
                version,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(seed.user_id)
        .bind(seed.plan.as_str())
        .bind(seed.is_plus())
        .bind(seed.is_pro())
        .bind(seed.voice_enabled)
        .bind(seed.voice_seconds_total)
        .bind(seed.voice_seconds_used)
        .bind(seed.voice_period_start)
        .bind(seed.voice_period_end)
        .bind(seed.daily_limit_enabled)
        .bind(seed.daily_limit_seconds)
        .bind(seed.daily_seconds_used)
        .bind(&seed.daily_used_at_date)
        .bind(seed.usage_reset_at)
        .bind(seed.version)
        .bind(seed.created_at)
        .bind(seed.updated_at)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, EntitlementRow>(
            r#"
            SELECT
                user_id,
                plan,
                voice_enabled,
                voice_seconds_total,
                voice_seconds_used,
                voice_period_start,
                voice_period_end,
                daily_limit_enabled,
                daily_limit_seconds,
                daily_seconds_used,
                daily_used_at_date,
                usage_reset_at,
                version,
                created_at,
                updated_at
            FROM voice_entitlements
            WHERE user_id = $1
            "#,
        )
        .bind(seed.user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn compare_and_swap(
        &self,
        next: &Entitlement,
        expected_version: i64,
    ) -> StoreResult<bool> {
        Ok(update_versioned(&self.pool, next, expected_version).await?)
    }

    async fn commit_debit(
        &self,
        next: &Entitlement,
        expected_version: i64,
        entry: &UsageLedgerEntry,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        if !update_versioned(&mut *tx, next, expected_version).await? {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO voice_usage_ledger (id, user_id, usage_type, seconds, session_id, metadata, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(entry.usage_type.as_str())
        .bind(entry.seconds)
        .bind(&entry.session_id)
        .bind(&entry.metadata)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn billing_event_exists(&self, external_event_id: &str) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM billing_sync_events WHERE external_event_id = $1)",
        )
        .bind(external_event_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn commit_billing(
        &self,
        next: &Entitlement,
        expected_version: i64,
        event: &BillingSyncEvent,
    ) -> StoreResult<BillingCommit> {
        let mut tx = self.pool.begin().await?;

        // The unique key on the event id is the idempotency guard; a concurrent duplicate
        // blocks here until the first writer commits, then sees the conflict.
        let inserted = sqlx::query(
            r#"
            INSERT INTO billing_sync_events (
                external_event_id,
                user_id,
                plan,
                status,
                seconds_granted,
                period_start,
                period_end,
                applied,
                created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (external_event_id) DO NOTHING
            "#,
        )
        .bind(&event.external_event_id)
        .bind(event.user_id)
        .bind(event.plan.as_str())
        .bind(&event.status)
        .bind(event.seconds_granted)
        .bind(event.period_start)
        .bind(event.period_end)
        .bind(event.applied)
        .bind(event.created_at)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(BillingCommit::Duplicate);
        }

        if !update_versioned(&mut *tx, next, expected_version).await? {
            tx.rollback().await?;
            return Ok(BillingCommit::Conflict);
        }

        tx.commit().await?;
        Ok(BillingCommit::Applied)
    }

    async fn ledger_entries(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<UsageLedgerEntry>> {
        let rows = sqlx::query_as::<_, UsageLedgerRow>(
            r#"
            SELECT id, user_id, usage_type, seconds, session_id, metadata, created_at
            FROM voice_usage_ledger
            WHERE user_id = $1 AND created_at >= $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(UsageLedgerEntry::from).collect())
    }
}
