use anyhow::{anyhow, Result};
use serde_json::Value;
use tokio::sync::mpsc::{channel, Sender};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::adapters::{BillingProviderAdapter, StripeLikeAdapter};
use super::models::BillingEvent;
use super::service::LedgerService;

/// key: billing-sync-worker -> background application of provider events
#[derive(Debug)]
pub enum BillingSyncJob {
    ProviderPayload { payload: Value },
    Event(BillingEvent),
}

/// key: billing-sync-handle -> enqueue interface
#[derive(Clone)]
pub struct BillingSyncHandle {
    sender: Sender<BillingSyncJob>,
}

impl BillingSyncHandle {
    pub async fn dispatch(&self, job: BillingSyncJob) -> Result<()> {
        self.sender
            .send(job)
            .await
            .map_err(|err| anyhow!("failed to enqueue billing sync job: {err}"))
    }
}

/// Spawns the worker; it exits once every handle has been dropped and the queue drained.
pub fn start_billing_sync_worker(
    service: LedgerService,
    queue_depth: usize,
) -> (BillingSyncHandle, JoinHandle<()>) {
    let (tx, mut rx) = channel(queue_depth.max(1));
    let worker = tokio::spawn(async move {
        let adapter = StripeLikeAdapter;
        while let Some(job) = rx.recv().await {
            let event = match job {
                BillingSyncJob::Event(event) => event,
                BillingSyncJob::ProviderPayload { payload } => {
                    match adapter.normalize_event(&payload) {
                        Ok(event) => event,
                        Err(err) => {
                            warn!(?err, "discarding billing payload that failed to normalize");
                            continue;
                        }
                    }
                }
            };

            let user_id = event.user_id;
            let event_id = event.external_event_id.clone();
            match service.apply_billing_event(event).await {
                Ok(outcome) => info!(
                    %user_id,
                    %event_id,
                    applied = outcome.applied,
                    "billing sync job processed"
                ),
                // Left unrecorded, so the provider's redelivery can apply it later.
                Err(err) => error!(
                    ?err,
                    %user_id,
                    %event_id,
                    "failed to apply billing event to voice entitlement"
                ),
            }
        }
    });

    (BillingSyncHandle { sender: tx }, worker)
}
