use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::entitlement::Entitlement;
use super::errors::{StoreError, StoreResult};
use super::models::{BillingSyncEvent, UsageLedgerEntry};
use super::store::{BillingCommit, EntitlementStore};

/// key: voice-entitlement-store-memory
///
/// Process-local store with the same compare-and-swap contract as the Postgres store.
/// Lock order is always entitlement row, then ledger or event map.
#[derive(Default)]
pub struct MemoryEntitlementStore {
    rows: DashMap<Uuid, Entitlement>,
    ledger: Mutex<Vec<UsageLedgerEntry>>,
    billing_events: DashMap<String, BillingSyncEvent>,
    unavailable: AtomicBool,
}

impl MemoryEntitlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing the backing store; every call fails until restored.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Overwrites a row directly, bypassing version checks.
    pub fn put(&self, entitlement: Entitlement) {
        self.rows.insert(entitlement.user_id, entitlement);
    }

    pub fn get(&self, user_id: Uuid) -> Option<Entitlement> {
        self.rows.get(&user_id).map(|row| row.clone())
    }

    pub fn billing_event(&self, external_event_id: &str) -> Option<BillingSyncEvent> {
        self.billing_events
            .get(external_event_id)
            .map(|event| event.clone())
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl EntitlementStore for MemoryEntitlementStore {
    async fn load_or_create(&self, seed: &Entitlement) -> StoreResult<Entitlement> {
        self.ensure_available()?;
        let row = self
            .rows
            .entry(seed.user_id)
            .or_insert_with(|| seed.clone());
        Ok(row.clone())
    }

    async fn compare_and_swap(
        &self,
        next: &Entitlement,
        expected_version: i64,
    ) -> StoreResult<bool> {
        self.ensure_available()?;
        let Some(mut row) = self.rows.get_mut(&next.user_id) else {
            return Ok(false);
        };
        if row.version != expected_version {
            return Ok(false);
        }
        *row = Entitlement {
            version: expected_version + 1,
            ..next.clone()
        };
        Ok(true)
    }

    async fn commit_debit(
        &self,
        next: &Entitlement,
        expected_version: i64,
        entry: &UsageLedgerEntry,
    ) -> StoreResult<bool> {
        self.ensure_available()?;
        let Some(mut row) = self.rows.get_mut(&next.user_id) else {
            return Ok(false);
        };
        if row.version != expected_version {
            return Ok(false);
        }
        let mut ledger = self
            .ledger
            .lock()
            .map_err(|_| StoreError::Unavailable("usage ledger lock poisoned".to_string()))?;
        ledger.push(entry.clone());
        *row = Entitlement {
            version: expected_version + 1,
            ..next.clone()
        };
        Ok(true)
    }

    async fn billing_event_exists(&self, external_event_id: &str) -> StoreResult<bool> {
        self.ensure_available()?;
        Ok(self.billing_events.contains_key(external_event_id))
    }

    async fn commit_billing(
        &self,
        next: &Entitlement,
        expected_version: i64,
        event: &BillingSyncEvent,
    ) -> StoreResult<BillingCommit> {
        self.ensure_available()?;
        let Some(mut row) = self.rows.get_mut(&next.user_id) else {
            return Ok(BillingCommit::Conflict);
        };
        match self.billing_events.entry(event.external_event_id.clone()) {
            Entry::Occupied(_) => return Ok(BillingCommit::Duplicate),
            Entry::Vacant(slot) => {
                if row.version != expected_version {
                    return Ok(BillingCommit::Conflict);
                }
                slot.insert(event.clone());
            }
        }
        *row = Entitlement {
            version: expected_version + 1,
            ..next.clone()
        };
        Ok(BillingCommit::Applied)
    }

    async fn ledger_entries(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<UsageLedgerEntry>> {
        self.ensure_available()?;
        let ledger = self
            .ledger
            .lock()
            .map_err(|_| StoreError::Unavailable("usage ledger lock poisoned".to_string()))?;
        Ok(ledger
            .iter()
            .filter(|entry| entry.user_id == user_id && entry.created_at >= since)
            .cloned()
            .collect())
    }
}
