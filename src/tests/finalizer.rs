use super::{alice, bob, Harness, HOUR, MINUTE};
use crate::{
    auction::ItemStatus,
    config::FinalizerConfig,
    service::{FinalizeReport, Finalizer, ServiceControl},
};
use anyhow::Result;
use std::time::Duration;

#[tokio::test]
async fn tick_finalizes_only_due_items() -> Result<()> {
    let h = Harness::new();
    let early = h.listing(100).await?;
    let late = h.listing(100).await?;
    let unclaimed = h.listing(100).await?;

    h.engine.claim_mine(&early, &alice()).await?;
    h.clock.advance(12 * HOUR);
    h.engine.claim_grab(&late, &bob()).await?;
    h.clock.advance(12 * HOUR + MINUTE);

    let finalizer = Finalizer::new(h.engine.clone(), &FinalizerConfig::default());
    assert_eq!(
        finalizer.tick().await?,
        FinalizeReport {
            pending: 2,
            finalized: 1,
            failed: 0,
        }
    );
    assert_eq!(h.engine.get_item(&early).await?.status, ItemStatus::Sold);
    assert_eq!(h.engine.get_item(&late).await?.status, ItemStatus::Grab);
    assert_eq!(h.engine.get_item(&unclaimed).await?.status, ItemStatus::Available);

    h.clock.advance(12 * HOUR);
    assert_eq!(
        finalizer.tick().await?,
        FinalizeReport {
            pending: 1,
            finalized: 1,
            failed: 0,
        }
    );
    assert_eq!(finalizer.tick().await?, FinalizeReport::default());
    Ok(())
}

#[tokio::test]
async fn finalizer_loop_stops_on_request() -> Result<()> {
    let h = Harness::new();
    let id = h.listing(100).await?;
    h.engine.claim_mine(&id, &alice()).await?;
    h.clock.advance(24 * HOUR);

    let svc_ctl = ServiceControl::new();
    let handle = svc_ctl.spawn_loop(Finalizer::new(
        h.engine.clone(),
        &FinalizerConfig {
            poll_interval_secs: 3600,
            ..Default::default()
        },
    ));

    // the first iteration runs right away
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.engine.get_item(&id).await?.status != ItemStatus::Sold {
            tokio::task::yield_now().await;
        }
        anyhow::Ok(())
    })
    .await??;

    svc_ctl.stop_all();
    tokio::time::timeout(Duration::from_secs(5), handle.join()).await??;
    Ok(())
}
