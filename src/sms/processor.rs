use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::sms::lock::{LockRepo, QUEUE_LOCK};
use crate::sms::model::SmsStatus;
use crate::sms::provider::{SendOutcome, SmsProvider};
use crate::sms::repo::SmsRepo;

/// Result of one processing pass. `lock_acquired: false` is the normal
/// "someone else is already working" signal, not an error.
#[derive(Debug, Serialize)]
pub struct PassSummary {
    pub success: bool,
    pub processed_count: u64,
    pub lock_acquired: bool,
    pub error: Option<String>,
}

pub struct QueueProcessor {
    sms: SmsRepo,
    locks: LockRepo,
    provider: Arc<dyn SmsProvider>,
    worker_id: String,
    lock_lease_secs: i64,
    sending_stale_secs: i64,
}

impl QueueProcessor {
    pub fn new(
        sms: SmsRepo,
        locks: LockRepo,
        provider: Arc<dyn SmsProvider>,
        worker_id: String,
        lock_lease_secs: i64,
        sending_stale_secs: i64,
    ) -> Self {
        Self {
            sms,
            locks,
            provider,
            worker_id,
            lock_lease_secs,
            sending_stale_secs,
        }
    }

    /// One full pass: lease, recover stale rows, send everything due,
    /// release the lease. Per-message provider failures are isolated;
    /// only lock/store faults abort the pass.
    pub async fn process_queue(&self) -> PassSummary {
        // Fresh holder token per pass so release can never delete a lease
        // that was stolen and re-acquired under the same worker id.
        let holder = format!("{}:{}", self.worker_id, Uuid::new_v4());

        match self
            .locks
            .acquire(QUEUE_LOCK, &holder, self.lock_lease_secs)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(worker = %self.worker_id, "queue lock held elsewhere, skipping pass");
                return PassSummary {
                    success: true,
                    processed_count: 0,
                    lock_acquired: false,
                    error: None,
                };
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to acquire queue lock");
                return PassSummary {
                    success: false,
                    processed_count: 0,
                    lock_acquired: false,
                    error: Some("could not acquire processing lock".to_string()),
                };
            }
        }

        let pass = self.run_pass().await;

        // Release happens regardless of how the pass went. A failed
        // release leaves the lease to expire on its own, which the next
        // acquire will steal.
        let released = self.locks.release(QUEUE_LOCK, &holder).await;

        match (pass, released) {
            (Ok(processed_count), Ok(_)) => PassSummary {
                success: true,
                processed_count,
                lock_acquired: true,
                error: None,
            },
            (Ok(processed_count), Err(e)) => {
                tracing::error!(error = %e, "failed to release queue lock");
                PassSummary {
                    success: false,
                    processed_count,
                    lock_acquired: true,
                    error: Some("could not release processing lock".to_string()),
                }
            }
            (Err(e), _) => {
                tracing::error!(error = %e, worker = %self.worker_id, "queue pass aborted");
                PassSummary {
                    success: false,
                    processed_count: 0,
                    lock_acquired: true,
                    error: Some("queue processing failed".to_string()),
                }
            }
        }
    }

    async fn run_pass(&self) -> anyhow::Result<u64> {
        let recovered = self
            .sms
            .recover_stale_sending(self.sending_stale_secs)
            .await?;
        if recovered > 0 {
            tracing::warn!(recovered, "returned stale sending rows to retrying");
        }

        let batch = self.sms.due_batch().await?;
        if batch.is_empty() {
            return Ok(0);
        }

        tracing::info!(batch = batch.len(), worker = %self.worker_id, "processing queue");

        let mut processed = 0u64;
        for msg in batch {
            // Lost the row to a concurrent writer (operator cancel, or a
            // stolen pass after lease expiry): skip, don't count.
            if !self.sms.mark_sending(msg.id).await? {
                tracing::debug!(id = %msg.id, "message moved before send, skipping");
                continue;
            }

            match self.provider.send(&msg.to_number, &msg.body).await {
                Ok(SendOutcome::Accepted {
                    provider_message_id,
                }) => {
                    if self.sms.mark_sent(msg.id, &provider_message_id).await? {
                        tracing::info!(id = %msg.id, provider_message_id = %provider_message_id, "sent");
                    } else {
                        tracing::warn!(id = %msg.id, "sent but row left 'sending' concurrently");
                    }
                    processed += 1;
                }
                Ok(SendOutcome::Rejected { reason }) => {
                    let next = self.sms.record_failure(msg.id, &reason).await?;
                    tracing::warn!(id = %msg.id, reason = %reason, next = ?next.map(|s| s.as_str()), "provider rejected send");
                    processed += 1;
                }
                Err(e) => {
                    // Transient transport failure: charge the attempt and
                    // let the next pass retry. The pass itself moves on.
                    let err = e.to_string();
                    let next = self.sms.record_failure(msg.id, &err).await?;
                    if next == Some(SmsStatus::Failed) {
                        tracing::error!(id = %msg.id, error = %err, "send failed, retries exhausted");
                    } else {
                        tracing::warn!(id = %msg.id, error = %err, "send failed, will retry next pass");
                    }
                    processed += 1;
                }
            }
        }

        Ok(processed)
    }
}
