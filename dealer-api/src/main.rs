//! Serve the dealer endpoint, letting an orchestrator read and reassign the partitions
//! this process consumes.
use std::sync::Arc;

use axum::Router;
use envconfig::Envconfig;
use eyre::Result;
use tokio::signal;

use config::Config;
use dealer_common::memory::MemoryTrigger;
use dealer_common::metrics::setup_metrics_recorder;
use dealer_common::processor::LocalProcessor;
use dealer_common::trigger::Trigger;
use handlers::dealer::{Dealer, FunctionIdentity};

mod config;
mod error;
mod handlers;

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("Shutting down gracefully...");
}

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown())
        .await?;

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");
    let layout = config.triggers.0.clone();

    let triggers = layout
        .triggers
        .keys()
        .map(|trigger_id| -> Arc<dyn Trigger> {
            Arc::new(MemoryTrigger::new(trigger_id.clone(), config.max_workers))
        })
        .collect();
    let processor = LocalProcessor::new(triggers, layout)
        .await
        .expect("failed to assign initial partitions");

    let dealer = Dealer::new(
        Arc::new(processor),
        FunctionIdentity {
            name: config.function_name.clone(),
            namespace: config.function_namespace.clone(),
            version: config.function_version.clone(),
            alias: config.function_alias.clone(),
        },
        config.hostname.clone(),
        config.port,
    );

    let recorder_handle = if config.export_prometheus {
        Some(setup_metrics_recorder().expect("failed to install prometheus recorder"))
    } else {
        None
    };
    let app = handlers::app(dealer, recorder_handle);

    tracing::info!("listening on {}", config.bind());

    match listen(app, config.bind()).await {
        Ok(_) => {}
        Err(e) => tracing::error!("failed to start dealer http server, {}", e),
    }
}
