use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// key: voice-store-error -> backing store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("entitlement store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuotaScope {
    Monthly,
    Daily,
    Disabled,
}

impl QuotaScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaScope::Monthly => "monthly",
            QuotaScope::Daily => "daily",
            QuotaScope::Disabled => "disabled",
        }
    }
}

/// key: voice-quota-exceeded -> business outcome, not an operational fault
#[derive(Clone, Debug, Error, Serialize, PartialEq, Eq)]
#[error("{} voice quota exceeded: requested {requested}s with {remaining}s remaining", .scope.as_str())]
pub struct QuotaExceeded {
    pub scope: QuotaScope,
    pub requested: i64,
    pub remaining: i64,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceeded),
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),
    #[error("entitlement for {user_id} kept changing underneath {attempts} commit attempts")]
    Contention { user_id: Uuid, attempts: u32 },
    #[error("invalid usage amount: {0}")]
    InvalidAmount(String),
}

impl LedgerError {
    /// Errors for which the caller should deny the premium path and fall back to the
    /// free-tier behaviour rather than report a server fault.
    pub fn is_fail_closed(&self) -> bool {
        matches!(
            self,
            LedgerError::StoreUnavailable(_) | LedgerError::Contention { .. }
        )
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
