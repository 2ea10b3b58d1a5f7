use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

use super::{
    AdmissionResult, BillingEvent, BillingSyncHandle, BillingSyncJob, BillingSyncOutcome,
    DebitReceipt, Entitlement, LedgerService, UsageAudit, UsageKind,
};

/// key: voice-ledger-api -> rest endpoints
pub async fn get_entitlement(
    Extension(service): Extension<LedgerService>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<EntitlementView>> {
    let entitlement = service.entitlement(user_id).await?;
    Ok(Json(EntitlementView::from(entitlement)))
}

pub async fn check_admission(
    Extension(service): Extension<LedgerService>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<AdmissionRequest>,
) -> AppResult<Json<AdmissionResult>> {
    let result = service.can_consume(user_id, payload.want_seconds).await?;
    Ok(Json(result))
}

pub async fn debit_usage(
    Extension(service): Extension<LedgerService>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<DebitRequest>,
) -> AppResult<Json<DebitReceipt>> {
    let receipt = service
        .debit(
            user_id,
            payload.actual_seconds,
            payload.usage_type,
            payload.session_id,
            payload.metadata.unwrap_or_else(|| Value::Object(Default::default())),
        )
        .await?;
    Ok(Json(receipt))
}

pub async fn update_daily_limit(
    Extension(service): Extension<LedgerService>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<DailyLimitRequest>,
) -> AppResult<Json<EntitlementView>> {
    let entitlement = service
        .set_daily_limit(user_id, payload.enabled, payload.seconds)
        .await?;
    Ok(Json(EntitlementView::from(entitlement)))
}

pub async fn audit_usage(
    Extension(service): Extension<LedgerService>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<UsageAudit>> {
    Ok(Json(service.audit_usage(user_id).await?))
}

/// Applies an already-verified billing event synchronously.
pub async fn apply_billing_event(
    Extension(service): Extension<LedgerService>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<BillingEventRequest>,
) -> AppResult<Json<BillingSyncOutcome>> {
    if payload.period_end <= payload.period_start {
        return Err(AppError::BadRequest(
            "period_end must be after period_start".to_string(),
        ));
    }
    let outcome = service
        .apply_billing_event(BillingEvent {
            user_id,
            external_event_id: payload.external_event_id,
            plan: payload.plan,
            status: payload.status,
            period_start: payload.period_start,
            period_end: payload.period_end,
        })
        .await?;
    Ok(Json(outcome))
}

/// Queues a verified provider payload for the billing sync worker.
pub async fn enqueue_provider_event(
    Extension(handle): Extension<BillingSyncHandle>,
    Json(payload): Json<Value>,
) -> AppResult<StatusCode> {
    handle
        .dispatch(BillingSyncJob::ProviderPayload { payload })
        .await
        .map_err(|err| AppError::Unavailable(err.to_string()))?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
pub struct AdmissionRequest {
    pub want_seconds: i64,
}

#[derive(Debug, Deserialize)]
pub struct DebitRequest {
    pub actual_seconds: f64,
    pub usage_type: UsageKind,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct DailyLimitRequest {
    pub enabled: bool,
    #[serde(default)]
    pub seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BillingEventRequest {
    pub external_event_id: String,
    pub plan: String,
    pub status: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct EntitlementView {
    pub user_id: Uuid,
    pub plan: String,
    pub is_plus: bool,
    pub is_pro: bool,
    pub voice_enabled: bool,
    pub voice_seconds_total: i64,
    pub voice_seconds_used: i64,
    pub seconds_left: i64,
    pub voice_period_start: Option<DateTime<Utc>>,
    pub voice_period_end: Option<DateTime<Utc>>,
    pub daily_limit_enabled: bool,
    pub daily_limit_seconds: i64,
    pub daily_seconds_used: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_left: Option<i64>,
}

impl From<Entitlement> for EntitlementView {
    fn from(entitlement: Entitlement) -> Self {
        Self {
            user_id: entitlement.user_id,
            plan: entitlement.plan.as_str().to_string(),
            is_plus: entitlement.is_plus(),
            is_pro: entitlement.is_pro(),
            voice_enabled: entitlement.voice_enabled,
            voice_seconds_total: entitlement.voice_seconds_total,
            voice_seconds_used: entitlement.voice_seconds_used,
            seconds_left: entitlement.seconds_left(),
            voice_period_start: entitlement.voice_period_start,
            voice_period_end: entitlement.voice_period_end,
            daily_limit_enabled: entitlement.daily_limit_enabled,
            daily_limit_seconds: entitlement.daily_limit_seconds,
            daily_seconds_used: entitlement.daily_seconds_used,
            daily_left: entitlement.daily_left(),
        }
    }
}
