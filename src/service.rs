pub mod api;
pub mod claim_engine;
pub mod finalizer;

pub use self::{api::*, claim_engine::*, finalizer::*};
use anyhow::{format_err, Result};
use async_trait::async_trait;
use std::{future::Future, sync::Arc};
use tokio::sync::watch;
use tracing::{error, info};

/// A service that is a loop that does something
#[async_trait]
pub trait LoopService: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run_iteration(&mut self, svc_ctl: &ServiceControl) -> Result<()>;
}

/// Service execution control instance
///
/// All services are basically a loop, and we would like to be able to
/// gracefully terminate them, and handle a top-level error of any
/// of them by gracefully stopping everything else.
#[derive(Clone)]
pub struct ServiceControl {
    stop_all: Arc<watch::Sender<bool>>,
}

impl Default for ServiceControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceControl {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            stop_all: Arc::new(tx),
        }
    }

    pub fn stop_all(&self) {
        self.stop_all.send_replace(true);
    }

    pub fn is_stopping(&self) -> bool {
        *self.stop_all.borrow()
    }

    /// Resolves once `stop_all` has been called
    pub async fn stopped(&self) {
        let mut rx = self.stop_all.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn spawn_loop(&self, mut service: impl LoopService + 'static) -> JoinHandle {
        let name = service.name();
        let svc_ctl = self.clone();
        self.spawn_task(name, async move {
            while !svc_ctl.is_stopping() {
                service.run_iteration(&svc_ctl).await?;
            }
            Ok(())
        })
    }

    /// Run a future as a service. Its failure stops all other services.
    pub fn spawn_task<F>(&self, name: &'static str, f: F) -> JoinHandle
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let svc_ctl = self.clone();
        JoinHandle {
            name,
            handle: tokio::spawn(async move {
                info!(service = name, "service started");
                let res = f.await;
                if let Err(e) = &res {
                    error!(service = name, error = %e, "service failed");
                    svc_ctl.stop_all();
                }
                res
            }),
            svc_ctl: self.clone(),
        }
    }
}

pub struct JoinHandle {
    name: &'static str,
    handle: tokio::task::JoinHandle<Result<()>>,
    svc_ctl: ServiceControl,
}

impl JoinHandle {
    pub async fn join(self) -> Result<()> {
        match self.handle.await {
            Ok(res) => res,
            Err(e) => {
                self.svc_ctl.stop_all();
                Err(format_err!("service {} panicked: {e}", self.name))
            }
        }
    }
}
