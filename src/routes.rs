use axum::{
    routing::{get, post, put},
    Router,
};

use crate::ledger::api;

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/voice/:user_id/entitlement", get(api::get_entitlement))
        .route("/api/voice/:user_id/admission", post(api::check_admission))
        .route("/api/voice/:user_id/debit", post(api::debit_usage))
        .route("/api/voice/:user_id/daily-limit", put(api::update_daily_limit))
        .route("/api/voice/:user_id/audit", get(api::audit_usage))
        .route("/api/billing/:user_id/events", post(api::apply_billing_event))
        .route("/api/billing/provider-events", post(api::enqueue_provider_event))
}
