mod auction;
mod clock;
mod config;
mod identity;
mod persistence;
mod service;

use anyhow::{Context, Result};
use clap::Parser;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};

#[derive(clap::Parser, Debug)]
#[command(name = "claims", about = "Claim and bid engine for listed items")]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides `listen_addr` from the configuration
    #[arg(long)]
    listen_addr: Option<String>,
}

fn init_tracing(log: &config::LogConfig) {
    match log.format {
        config::LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(&log.level)
            .init(),
        config::LogFormat::Pretty => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(&log.level)
            .init(),
    }
}

async fn open_store(store: &config::StoreConfig) -> Result<persistence::SharedItemStore> {
    Ok(match store.backend {
        config::StoreBackend::Memory => {
            tracing::warn!("using the in-memory store, nothing will be persisted");
            persistence::InMemoryItemStore::new_shared()
        }
        config::StoreBackend::Postgres => {
            let url = store
                .postgres_url
                .clone()
                .context("store.postgres_url is required for the postgres backend")?;
            let pool_size = store.pool_size;
            let pg = tokio::task::spawn_blocking(move || -> Result<_> {
                let pg = persistence::PostgresItemStore::connect(&url, pool_size)?;
                pg.migrate()?;
                Ok(pg)
            })
            .await??;
            Arc::new(pg)
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config =
        config::Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(listen_addr) = cli.listen_addr {
        config.listen_addr = listen_addr;
    }
    init_tracing(&config.log);

    let listen_addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen_addr: {}", config.listen_addr))?;

    let store = open_store(&config.store).await?;
    let engine = Arc::new(service::ClaimEngine::new(
        store,
        clock::SystemClock::new_shared(),
        &config.engine,
    ));
    let identities = identity::StaticIdentityProvider::new_shared(config.identities.clone());

    let svc_ctl = service::ServiceControl::new();

    ctrlc::set_handler({
        let svc_ctl = svc_ctl.clone();
        move || {
            eprintln!("Stopping all services...");
            svc_ctl.stop_all();
        }
    })?;

    let mut handles = vec![svc_ctl.spawn_task(
        service::API_SERVICE_ID,
        service::serve(
            listen_addr,
            service::ApiState {
                engine: engine.clone(),
                identities,
            },
            svc_ctl.clone(),
        ),
    )];
    if config.finalizer.enabled {
        handles.push(svc_ctl.spawn_loop(service::Finalizer::new(engine, &config.finalizer)));
    }

    for handle in handles {
        handle.join().await?
    }

    Ok(())
}

#[cfg(test)]
mod tests;
