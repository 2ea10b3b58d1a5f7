pub mod config;
pub mod error;
pub mod ledger;
pub mod routes;
pub mod telemetry;

pub use ledger::{
    AdmissionResult, BillingEvent, BillingSyncOutcome, DebitReceipt, DenyReason, Entitlement,
    LedgerConfig, LedgerError, LedgerService, MemoryEntitlementStore, PgEntitlementStore, Plan,
    UsageKind,
};
