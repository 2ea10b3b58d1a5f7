use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::models::BillingEvent;

/// key: billing-adapter -> provider payload normalisation
///
/// Signature verification happens before a payload reaches an adapter.
pub trait BillingProviderAdapter: Send + Sync {
    fn normalize_event(&self, payload: &Value) -> Result<BillingEvent>;
}

/// key: billing-adapter-stripe -> subscription-shaped payloads
///
/// Accepts either a flat object or one wrapped as `{ "id": ..., "data": { "object": ... } }`.
/// Timestamps may be unix seconds or RFC 3339 strings.
pub struct StripeLikeAdapter;

impl BillingProviderAdapter for StripeLikeAdapter {
    fn normalize_event(&self, payload: &Value) -> Result<BillingEvent> {
        let external_event_id = payload
            .get("id")
            .and_then(|v| v.as_str())
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("event id missing"))?
            .to_string();
        let object = payload
            .get("data")
            .and_then(|data| data.get("object"))
            .unwrap_or(payload);

        let user_ref = object
            .get("user_id")
            .or_else(|| object.get("customer_ref"))
            .or_else(|| object.pointer("/metadata/user_id"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("user reference missing"))?;
        let user_id = Uuid::parse_str(user_ref).context("user reference is not a uuid")?;

        let plan = object
            .get("plan")
            .and_then(|plan| plan.as_str().or_else(|| plan.get("id").and_then(|v| v.as_str())))
            .unwrap_or("free")
            .to_string();
        let status = object
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("active")
            .to_string();

        let period_start = timestamp(object, "current_period_start")?;
        let period_end = timestamp(object, "current_period_end")?;
        if period_end <= period_start {
            return Err(anyhow!(
                "billing period ends at {period_end} before it starts at {period_start}"
            ));
        }

        Ok(BillingEvent {
            user_id,
            external_event_id,
            plan,
            status,
            period_start,
            period_end,
        })
    }
}

fn timestamp(object: &Value, field: &str) -> Result<DateTime<Utc>> {
    let value = object
        .get(field)
        .ok_or_else(|| anyhow!("{field} missing"))?;
    if let Some(seconds) = value.as_i64() {
        return Utc
            .timestamp_opt(seconds, 0)
            .single()
            .ok_or_else(|| anyhow!("{field} out of range"));
    }
    let raw = value
        .as_str()
        .ok_or_else(|| anyhow!("{field} must be unix seconds or RFC 3339"))?;
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("{field} is not RFC 3339"))?
        .with_timezone(&Utc))
}
