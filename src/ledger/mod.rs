//! Voice usage entitlements: plan allotments, lazy period rollover, atomic debits and
//! idempotent billing sync.

pub mod adapters;
pub mod api;
pub mod clock;
pub mod entitlement;
pub mod errors;
pub mod memory;
pub mod models;
pub mod plans;
pub mod reconciliation;
pub mod service;
pub mod store;
mod sync;

pub use adapters::{BillingProviderAdapter, StripeLikeAdapter};
pub use clock::{PeriodBounds, PeriodClock};
pub use entitlement::{BillingEffect, Entitlement, Rollover};
pub use errors::{LedgerError, LedgerResult, QuotaExceeded, QuotaScope, StoreError, StoreResult};
pub use memory::MemoryEntitlementStore;
pub use models::{
    AdmissionResult, BillingEvent, BillingSyncEvent, BillingSyncOutcome, DebitReceipt,
    DenyReason, UsageAudit, UsageKind, UsageLedgerEntry,
};
pub use plans::{Plan, PlanPolicy};
pub use reconciliation::{start_billing_sync_worker, BillingSyncHandle, BillingSyncJob};
pub use service::{round_up_seconds, LedgerConfig, LedgerService};
pub use store::{BillingCommit, EntitlementStore, PgEntitlementStore};
