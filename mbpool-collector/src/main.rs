// mbpool collector - field telemetry collector service
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # mbpool collector
//!
//! Samples holding registers from a Modbus TCP device, keeps a snapshot of
//! recent readings behind a small HTTP server and forwards points to a
//! remote write endpoint.
//!
//! ## Usage
//!
//! ```bash
//! # Print one reading of the built-in inverter table and exit
//! mbpool-collector --device 192.168.1.20:502 --once
//!
//! # Sample every 30s and forward
//! mbpool-collector --rfile registers.txt --interval 30 \
//!     --influxdb 'https://db:8086/write?db=db0&u=user&p=pass'
//! ```

mod config;
mod metrics;
mod modbus;
mod server;

use clap::Parser;
use config::Args;
use mbpool::{
    Collector, ConfigError, Forwarder, HttpTransport, RegisterBank, Sink, SnapshotSink, StdoutSink,
};
use metrics::MetricsSink;
use modbus::ModbusTcpSource;
use server::AppState;
use std::future::IntoFuture;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Errors that stop the collector
#[derive(Error, Debug)]
enum CollectorError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("sampling task: {0}")]
    Task(String),
}

fn version() -> String {
    format!(
        "mbpool-collector={} mbpool={}",
        env!("CARGO_PKG_VERSION"),
        mbpool::VERSION
    )
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), CollectorError> {
    args.validate()?;
    let specs = args.register_specs()?;

    info!("starting mbpool collector, {}", version());
    info!("DEVICE={} UNIT={}", args.device, args.unit_id);
    info!("HTTP={}", args.listen);
    info!("TAGS={}", args.influx_tags);
    info!("INTERVAL={}s", args.interval);
    info!(
        "NIGHTMODE={}, from={}, to={}",
        args.nightmode, args.nightmode_start, args.nightmode_end
    );
    info!("REGISTERS={}", specs.len());

    let bank = Arc::new(RegisterBank::from_specs(specs));
    let shutdown = Arc::new(AtomicBool::new(false));

    if args.once {
        let status: Arc<dyn Sink> = Arc::new(StdoutSink::new());
        return tokio::task::spawn_blocking(move || sample(args, bank, status, shutdown))
            .await
            .map_err(|e| CollectorError::Task(e.to_string()))?;
    }

    let snapshot = Arc::new(SnapshotSink::new());
    let listener = TcpListener::bind(args.listen).await?;
    let app = server::router(Arc::new(AppState::new(Arc::clone(&snapshot), version())));
    info!("snapshot on http://{}/ (metrics on /metrics)", args.listen);

    let flag = Arc::clone(&shutdown);
    let status: Arc<dyn Sink> = snapshot;
    let mut sampler = tokio::task::spawn_blocking(move || sample(args, bank, status, flag));

    let serve = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&shutdown)))
        .into_future();

    tokio::select! {
        res = serve => {
            shutdown.store(true, Ordering::SeqCst);
            res?;
        }
        res = &mut sampler => {
            // Sampling ended on its own; stop serving
            shutdown.store(true, Ordering::SeqCst);
            return res.map_err(|e| CollectorError::Task(e.to_string()))?;
        }
    }

    sampler
        .await
        .map_err(|e| CollectorError::Task(e.to_string()))?
}

/// Sampling loop; runs on a blocking thread until `shutdown` is set
fn sample(
    args: Args,
    bank: Arc<RegisterBank>,
    status: Arc<dyn Sink>,
    shutdown: Arc<AtomicBool>,
) -> Result<(), CollectorError> {
    let mut sinks: Vec<Arc<dyn Sink>> = vec![Arc::clone(&status)];

    let forwarder = match args.influxdb {
        Some(ref endpoint) => {
            let transport = HttpTransport::new(endpoint.clone(), args.http_config())?;
            let forwarder = Arc::new(Forwarder::new(
                args.forwarder_config(),
                Box::new(transport),
                Arc::clone(&status),
            ));
            info!(
                "forwarding enabled (backlog {}, {} requests per cycle{})",
                args.max_backlog,
                args.max_flush,
                if args.influx_dry { ", dry run" } else { "" }
            );
            Some(forwarder)
        }
        None => {
            if args.influx_dry {
                warn!("--influx-dry has no effect without --influxdb");
            }
            None
        }
    };

    if let Some(ref forwarder) = forwarder {
        let sink: Arc<dyn Sink> = forwarder.clone();
        sinks.push(sink);
    }
    if !args.once {
        sinks.push(Arc::new(MetricsSink::new(forwarder)));
    }

    let source = ModbusTcpSource::new(args.device.clone(), args.unit_id, args.read_timeout());
    let mut collector = Collector::new(source, bank, sinks, args.collector_config());
    collector.run(&shutdown);
    Ok(())
}

/// Resolve on SIGINT/SIGTERM and raise the shutdown flag
async fn shutdown_signal(flag: Arc<AtomicBool>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("unable to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("unable to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("stopping mbpool collector ...");
    flag.store(true, Ordering::SeqCst);
}
