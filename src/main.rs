// src/main.rs
// Calendar server bootstrap: config, store, background loops, HTTP surface.

use anyhow::Result;
use clap::Parser;
use log::{error, info};
use stampd::chain::RpcChainClient;
use stampd::config::{validate_config, Config};
use stampd::{api, AppContext};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "stampd", about = "Timestamping calendar server")]
struct Args {
    /// Calendar data directory (overrides STAMPD_DATA_PATH)
    #[arg(long)]
    data_path: Option<String>,

    /// Listen address for the HTTP API (overrides STAMPD_LISTEN_ADDR)
    #[arg(long)]
    listen: Option<std::net::SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(path) = args.data_path {
        config.data_path = path;
    }
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }

    let validation = validate_config(&config);
    validation.print_summary();
    if !validation.valid {
        anyhow::bail!("configuration invalid; refusing to start");
    }

    let chain = Arc::new(RpcChainClient::new(
        &config.chain_rpc_url,
        config.chain_rpc_timeout,
    )?);

    let ctx = AppContext::build(config, chain)?;

    let resumed = ctx.store.list_unconfirmed()?;
    if !resumed.is_empty() {
        info!(
            "resuming {} unconfirmed commitment(s) from previous run",
            resumed.len()
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let aggregator_task = tokio::spawn(
        ctx.aggregator
            .clone()
            .run(ctx.config.flush_interval, shutdown_rx.clone()),
    );
    let stamper_task = tokio::spawn(
        ctx.stamper
            .clone()
            .run(ctx.config.stamper_tick, shutdown_rx.clone()),
    );

    let app = api::router(ctx.aggregator.clone(), ctx.resolver.clone());
    let listen_addr = ctx.config.listen_addr;
    info!("calendar API listening on {}", listen_addr);

    let server = axum::Server::bind(&listen_addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for shutdown signal: {}", e);
            }
            info!("shutdown signal received");
        });

    if let Err(e) = server.await {
        error!("HTTP server error: {}", e);
    }

    // stop both loops; in-flight store writes finish before the tasks exit
    let _ = shutdown_tx.send(true);
    let _ = aggregator_task.await;
    let _ = stamper_task.await;

    info!("calendar server stopped");
    Ok(())
}
