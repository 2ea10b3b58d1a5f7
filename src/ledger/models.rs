use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::plans::Plan;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    TtsDisabled,
    MonthlyExhausted,
    InsufficientLeft,
    DailyLimit,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::TtsDisabled => "tts_disabled",
            DenyReason::MonthlyExhausted => "monthly_exhausted",
            DenyReason::InsufficientLeft => "insufficient_left",
            DenyReason::DailyLimit => "daily_limit",
        }
    }
}

/// key: voice-admission-result -> advisory gate answer
///
/// `seconds_left` reflects the entitlement at the moment of the check. It is not a
/// reservation: a concurrent debit may consume it before the caller does.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdmissionResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenyReason>,
    pub seconds_left: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_left: Option<i64>,
}

impl AdmissionResult {
    pub fn allow(seconds_left: i64, daily_left: Option<i64>) -> Self {
        Self {
            ok: true,
            reason: None,
            seconds_left,
            daily_left,
        }
    }

    pub fn deny(reason: DenyReason, seconds_left: i64, daily_left: Option<i64>) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
            seconds_left,
            daily_left,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    ChatVoice,
    LiveCall,
}

impl UsageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageKind::ChatVoice => "chat_voice",
            UsageKind::LiveCall => "live_call",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "chat_voice" => Some(UsageKind::ChatVoice),
            "live_call" => Some(UsageKind::LiveCall),
            _ => None,
        }
    }
}

/// key: voice-usage-ledger-entry -> append-only audit row
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UsageLedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub usage_type: UsageKind,
    pub seconds: i64,
    pub session_id: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DebitReceipt {
    pub debited: i64,
    pub seconds_left: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<Uuid>,
}

/// key: billing-event -> verified provider event, already authenticated upstream
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BillingEvent {
    pub user_id: Uuid,
    pub external_event_id: String,
    pub plan: String,
    pub status: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

impl BillingEvent {
    pub fn is_active(&self) -> bool {
        matches!(
            self.status.trim().to_ascii_lowercase().as_str(),
            "active" | "trialing"
        )
    }
}

/// key: billing-sync-event -> idempotency ledger row
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BillingSyncEvent {
    pub external_event_id: String,
    pub user_id: Uuid,
    pub plan: Plan,
    pub status: String,
    pub seconds_granted: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub applied: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BillingSyncOutcome {
    pub applied: bool,
}

/// key: voice-usage-audit -> counter vs ledger reconciliation
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct UsageAudit {
    pub user_id: Uuid,
    pub since: DateTime<Utc>,
    pub counter: i64,
    pub ledger_sum: i64,
    pub entries: usize,
    pub consistent: bool,
}
