// Ecowitt Bridge - Weather station relay and metrics exporter for Prometheus
//
// Copyright 2024 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use ecowitt_bridge::forward::{ForwardConfig, ForwardMode, RelayForwarder};
use ecowitt_bridge::http::{http_route, RequestContext};
use ecowitt_bridge::listener::{Ingest, IngestListener};
use ecowitt_bridge::metrics::BridgeMetrics;
use ecowitt_bridge::registry::GaugeRegistry;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{io, process};
use tokio::signal::unix::{self, SignalKind};
use tokio::task;
use tracing::{Instrument, Level};

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_LISTEN_PORT: u16 = 8082;
const DEFAULT_PROM_PORT: u16 = 9110;
const DEFAULT_RESEND_PORT: u16 = 8080;
const DEFAULT_RESEND_PATH: &str = "/data";
const DEFAULT_RESEND_MODE: ForwardMode = ForwardMode::Raw;
const DEFAULT_RESEND_TIMEOUT_SECS: u64 = 10;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 10;
const BIND_ADDR: [u8; 4] = [0, 0, 0, 0];

/// Relay Ecowitt weather station uploads and export readings as Prometheus metrics
///
/// Accept uploads from an Ecowitt weather station over TCP, export each reading
/// as a Prometheus gauge, and optionally relay each upload to another collector
/// either unmodified or rebuilt as an HTTP POST.
///
/// Every option may also be set using the environment variable listed with it.
#[derive(Debug, Parser)]
#[clap(name = "ecowitt_bridge", version = clap::crate_version!())]
struct EcowittBridgeApplication {
    /// Host to relay uploads to
    #[arg(long, env = "RESEND_DEST", default_value = "")]
    resend_dest: String,

    /// Port to relay uploads to
    #[arg(long, env = "RESEND_PORT", default_value_t = DEFAULT_RESEND_PORT)]
    resend_port: u16,

    /// Path to send rebuilt uploads to when using the 'http' resend mode
    #[arg(long, env = "RESEND_PATH", default_value = DEFAULT_RESEND_PATH)]
    resend_path: String,

    /// Relay uploads to another collector
    #[arg(long, env = "RESENDING", default_value_t = true, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    resending: bool,

    /// How to relay uploads. Allowed values are 'raw' (send the upload unmodified)
    /// and 'http' (rebuild the upload as an HTTP POST to the resend path)
    #[arg(long, env = "RESEND_MODE", default_value_t = DEFAULT_RESEND_MODE)]
    resend_mode: ForwardMode,

    /// Give up relaying an upload after this many seconds
    #[arg(long, env = "RESEND_TIMEOUT_SECS", default_value_t = DEFAULT_RESEND_TIMEOUT_SECS)]
    resend_timeout_secs: u64,

    /// Port to expose Prometheus metrics on
    #[arg(long, env = "PROM_PORT", default_value_t = DEFAULT_PROM_PORT)]
    prom_port: u16,

    /// Port to accept weather station uploads on
    #[arg(long, env = "LISTEN_PORT", default_value_t = DEFAULT_LISTEN_PORT)]
    listen_port: u16,

    /// Close connections that haven't sent an upload after this many seconds
    #[arg(long, env = "READ_TIMEOUT_SECS", default_value_t = DEFAULT_READ_TIMEOUT_SECS)]
    read_timeout_secs: u64,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[arg(long, env = "LOGLEVEL", default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let opts = EcowittBridgeApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let startup = Instant::now();
    tracing::info!(message = "starting ecowitt bridge", version = clap::crate_version!());

    let registry = prometheus::default_registry().clone();
    let metrics = BridgeMetrics::new(&registry).unwrap_or_else(|e| {
        tracing::error!(message = "failed to register bridge metrics", error = %e);
        process::exit(1)
    });
    let gauges = Arc::new(GaugeRegistry::new(registry.clone()));

    let forwarder = if !opts.resending {
        tracing::info!(message = "relaying disabled");
        None
    } else if opts.resend_dest.is_empty() {
        tracing::warn!(message = "relaying enabled without a destination, relaying disabled");
        None
    } else {
        let forwarder = RelayForwarder::new(ForwardConfig {
            host: opts.resend_dest.clone(),
            port: opts.resend_port,
            path: opts.resend_path.clone(),
            mode: opts.resend_mode,
            timeout: Duration::from_secs(opts.resend_timeout_secs),
        });

        tracing::info!(
            message = "relaying uploads",
            dest = %forwarder.destination(),
            mode = %opts.resend_mode,
            path = %opts.resend_path,
        );
        Some(forwarder)
    };

    // The metrics server failing to start doesn't prevent uploads from being relayed.
    let metrics_addr: SocketAddr = (BIND_ADDR, opts.prom_port).into();
    let context = Arc::new(RequestContext::new(registry, clap::crate_version!()));
    let service = make_service_fn(move |_| {
        let context = context.clone();

        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                http_route(req, context.clone()).instrument(tracing::span!(Level::DEBUG, "ecowitt_request"))
            }))
        }
    });

    match Server::try_bind(&metrics_addr) {
        Ok(builder) => {
            let server = builder.serve(service);
            task::spawn(async move {
                if let Err(e) = server.await {
                    tracing::error!(message = "metrics server failed", error = %e);
                }
            });

            tracing::info!(message = "exporting prometheus metrics", address = %metrics_addr);
        }
        Err(e) => {
            tracing::warn!(
                message = "unable to start metrics server, metrics will not be exported",
                address = %metrics_addr,
                error = %e,
            );
        }
    }

    let listen_addr: SocketAddr = (BIND_ADDR, opts.listen_port).into();
    let ingest = Ingest::new(
        gauges,
        metrics,
        forwarder,
        Duration::from_secs(opts.read_timeout_secs),
    );
    let listener = IngestListener::bind(listen_addr, ingest).unwrap_or_else(|e| {
        tracing::error!(message = "error starting listener", address = %listen_addr, error = %e);
        process::exit(1)
    });

    tracing::info!(message = "listening for uploads", address = %listen_addr);

    // Wait for either SIGTERM or SIGINT to shutdown
    tokio::select! {
        _ = listener.run() => {}
        _ = sigterm() => {}
        _ = sigint() => {}
    }

    tracing::info!(message = "server shutdown", runtime_secs = %startup.elapsed().as_secs());
    Ok(())
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}
