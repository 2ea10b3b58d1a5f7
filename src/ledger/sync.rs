use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::entitlement::{BillingEffect, Entitlement};
use super::errors::LedgerResult;
use super::models::{BillingEvent, BillingSyncEvent, BillingSyncOutcome};
use super::plans::Plan;
use super::service::LedgerService;
use super::store::BillingCommit;

impl LedgerService {
    pub async fn apply_billing_event(
        &self,
        event: BillingEvent,
    ) -> LedgerResult<BillingSyncOutcome> {
        self.apply_billing_event_at(event, Utc::now()).await
    }

    /// key: billing-sync -> idempotent plan/renewal application
    ///
    /// Safe under at-least-once delivery: the idempotency row and the entitlement update
    /// commit together, and a replay of a recorded event id is a no-op.
    pub async fn apply_billing_event_at(
        &self,
        event: BillingEvent,
        now: DateTime<Utc>,
    ) -> LedgerResult<BillingSyncOutcome> {
        let user_id = event.user_id;
        if self
            .store
            .billing_event_exists(&event.external_event_id)
            .await?
        {
            debug!(
                %user_id,
                event_id = %event.external_event_id,
                "billing event already applied"
            );
            return Ok(BillingSyncOutcome { applied: false });
        }

        let plan = Plan::resolve(&event.plan);
        let seed = Entitlement::seed(user_id, now);
        for attempt in 1..=self.attempts() {
            let mut entitlement = self.store.load_or_create(&seed).await?;
            let expected = entitlement.version;
            let effect = entitlement.apply_billing(&event, plan, now);
            let applied = effect != BillingEffect::Stale;

            let record = BillingSyncEvent {
                external_event_id: event.external_event_id.clone(),
                user_id,
                plan,
                status: event.status.clone(),
                seconds_granted: if applied {
                    entitlement.voice_seconds_total
                } else {
                    0
                },
                period_start: event.period_start,
                period_end: event.period_end,
                applied,
                created_at: now,
            };

            match self
                .store
                .commit_billing(&entitlement, expected, &record)
                .await?
            {
                BillingCommit::Applied => {
                    if applied {
                        info!(
                            %user_id,
                            event_id = %event.external_event_id,
                            plan = plan.as_str(),
                            status = %event.status,
                            effect = ?effect,
                            total = entitlement.voice_seconds_total,
                            used = entitlement.voice_seconds_used,
                            "billing event applied to voice entitlement"
                        );
                    } else {
                        warn!(
                            %user_id,
                            event_id = %event.external_event_id,
                            period_end = %event.period_end,
                            "billing event describes an elapsed period; recorded without applying"
                        );
                    }
                    return Ok(BillingSyncOutcome { applied });
                }
                BillingCommit::Duplicate => {
                    debug!(
                        %user_id,
                        event_id = %event.external_event_id,
                        "billing event applied concurrently by another worker"
                    );
                    return Ok(BillingSyncOutcome { applied: false });
                }
                BillingCommit::Conflict => {
                    debug!(%user_id, attempt, "billing sync lost a concurrent update; retrying");
                }
            }
        }
        Err(self.contention(user_id))
    }
}
