//! Periodic sale finalization
//!
//! Every tick scans claimed-but-unsold items and finalizes the ones whose
//! claim window has passed. Finalization is idempotent, so several
//! finalizers (or a manual call through the api) can race safely.
use super::{ClaimEngine, LoopService, ServiceControl};
use crate::config::FinalizerConfig;
use anyhow::Result;
use async_trait::async_trait;
use futures::{stream, StreamExt};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

pub const FINALIZER_SERVICE_ID: &str = "finalizer";

/// What one pass over pending items did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FinalizeReport {
    pub pending: usize,
    pub finalized: usize,
    pub failed: usize,
}

pub struct Finalizer {
    engine: Arc<ClaimEngine>,
    poll_interval: Duration,
    concurrency: usize,
}

impl Finalizer {
    pub fn new(engine: Arc<ClaimEngine>, config: &FinalizerConfig) -> Self {
        Self {
            engine,
            poll_interval: config.poll_interval(),
            concurrency: config.concurrency.max(1),
        }
    }

    /// Finalize every due item once
    pub async fn tick(&self) -> Result<FinalizeReport> {
        let pending = self.engine.pending_finalization().await?;
        let due: Vec<_> = pending
            .iter()
            .filter(|item| self.engine.is_due(item))
            .map(|item| item.id.clone())
            .collect();

        let mut report = FinalizeReport {
            pending: pending.len(),
            ..Default::default()
        };

        let results: Vec<_> = stream::iter(due)
            .map(|id| async move {
                let res = self.engine.finalize_sale(&id).await;
                (id, res)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (id, res) in results {
            match res {
                Ok(true) => report.finalized += 1,
                Ok(false) => debug!(item = %id, "item no longer due"),
                Err(e) => {
                    warn!(item = %id, error = %e, "failed to finalize, will retry next tick");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

#[async_trait]
impl LoopService for Finalizer {
    fn name(&self) -> &'static str {
        FINALIZER_SERVICE_ID
    }

    async fn run_iteration(&mut self, svc_ctl: &ServiceControl) -> Result<()> {
        match self.tick().await {
            Ok(report) if report.finalized > 0 || report.failed > 0 => {
                info!(?report, "finalizer tick")
            }
            Ok(report) => debug!(?report, "finalizer tick"),
            // the scheduler only polls; a failed scan is retried next tick
            Err(e) => warn!(error = %e, "finalizer scan failed"),
        }

        tokio::select! {
            _ = tokio::time::sleep(self.poll_interval) => {}
            _ = svc_ctl.stopped() => {}
        }
        Ok(())
    }
}
