// tempest_exporter - Prometheus metrics from WeatherFlow Tempest weather stations
//
// Copyright 2023 Nick Pillitteri
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

use clap::{Args, Parser, Subcommand};
use reqwest::Client;
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tempest_exporter::batch::{self, Backfill, Pusher};
use tempest_exporter::client::TempestClient;
use tempest_exporter::derive::Deriver;
use tempest_exporter::export::FileSink;
use tempest_exporter::push::PushClient;
use tempest_exporter::udp::{self, ReportHandler, ReportListener};
use tokio::signal::unix::{self, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Level};

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], udp::DEFAULT_PORT);
const DEFAULT_TIMEOUT_MILLIS: u64 = 5000;
const DEFAULT_JOB_NAME: &str = "tempest";
const DEFAULT_API_URL: &str = "https://swd.weatherflow.com/swd/rest/";

#[derive(Debug, Parser)]
#[clap(name = "tempest_exporter", version = clap::crate_version!())]
struct TempestExporterApplication {
    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, global = true, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    #[clap(subcommand)]
    mode: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Listen for reports from a Tempest hub and push them to a Prometheus push gateway
    Listen(ListenArgs),

    /// Export historical observations from the WeatherFlow API to gzipped Prometheus text files
    Export(ExportArgs),
}

#[derive(Debug, Args)]
struct ListenArgs {
    /// Base URL of the Prometheus push gateway
    #[clap(long, env = "PUSH_URL")]
    push_url: String,

    /// Job name to push metrics under
    #[clap(long, env = "JOB_NAME", default_value_t = DEFAULT_JOB_NAME.into())]
    job_name: String,

    /// Address to receive UDP reports on. Tempest hubs broadcast reports on port 50222.
    #[clap(long, default_value_t = DEFAULT_BIND_ADDR.into())]
    bind: SocketAddr,

    /// Timeout for pushing metrics to the push gateway, in milliseconds.
    #[clap(long, default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    timeout_millis: u64,

    /// Emit wet-bulb temperatures computed from each observation
    #[clap(long)]
    wet_bulb: bool,
}

#[derive(Debug, Args)]
struct ExportArgs {
    /// Personal access token for the WeatherFlow API
    #[clap(long, env = "TOKEN", hide_env_values = true)]
    token: String,

    /// Base URL for the WeatherFlow API
    #[clap(long, default_value_t = DEFAULT_API_URL.into())]
    api_url: String,

    /// Directory to write exported metrics to
    #[clap(long, default_value = ".")]
    output_dir: PathBuf,

    /// Timeout for fetching observations from the WeatherFlow API, in milliseconds.
    #[clap(long, default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    timeout_millis: u64,

    /// Emit wet-bulb temperatures computed from each observation
    #[clap(long)]
    wet_bulb: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = TempestExporterApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        // Wait for either SIGTERM or SIGINT to shutdown
        tokio::select! {
            _ = sigterm() => {}
            _ = sigint() => {}
        }

        signal_token.cancel();
    });

    match opts.mode {
        Mode::Listen(args) => listen(args, token).await,
        Mode::Export(args) => export(args, token).await,
    }
}

async fn listen(args: ListenArgs, token: CancellationToken) -> Result<(), Box<dyn Error + Send + Sync>> {
    let timeout = Duration::from_millis(args.timeout_millis);
    let http_client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize HTTP client", error = %e);
        process::exit(1)
    });

    let push_client = PushClient::new(http_client, &args.push_url, &args.job_name).unwrap_or_else(|e| {
        tracing::error!(message = "invalid push gateway configuration", error = %e);
        process::exit(1)
    });

    let listener = ReportListener::bind(args.bind).await.unwrap_or_else(|e| {
        tracing::error!(message = "error binding to address", address = %args.bind, error = %e);
        process::exit(1)
    });

    let (outbox, reader) = batch::outbox(batch::DEFAULT_OUTBOX_CAPACITY);
    let (trigger, wakeup) = batch::trigger();
    let deriver = Deriver::new().with_wet_bulb(args.wet_bulb);
    let handler = ReportHandler::new(deriver, outbox, trigger);

    tracing::info!(message = "pushing metrics", url = %push_client.url(), job = %args.job_name);
    let pusher = Pusher::new(push_client, reader, wakeup);
    let pusher_task = tokio::spawn(
        pusher
            .run(token.clone())
            .instrument(tracing::span!(Level::DEBUG, "tempest_push")),
    );

    tracing::info!(message = "listening for reports", address = %listener.local_addr()?);
    let res = listener.run(&handler, token.clone()).await;

    // Stop the pusher even if we stopped listening because of an error
    token.cancel();
    pusher_task.await?;

    match res {
        Ok(_) => {
            tracing::info!("listener shutdown");
            Ok(())
        }
        Err(e) => {
            tracing::error!(message = "error receiving reports", error = %e);
            Err(e.into())
        }
    }
}

async fn export(args: ExportArgs, token: CancellationToken) -> Result<(), Box<dyn Error + Send + Sync>> {
    let timeout = Duration::from_millis(args.timeout_millis);
    let http_client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize HTTP client", error = %e);
        process::exit(1)
    });

    let client = TempestClient::new(http_client, &args.api_url, args.token).unwrap_or_else(|e| {
        tracing::error!(message = "invalid API configuration", error = %e);
        process::exit(1)
    });

    let stations = client.stations().await.unwrap_or_else(|e| {
        tracing::error!(message = "error listing stations", error = %e);
        process::exit(1)
    });

    if stations.is_empty() {
        tracing::error!("no stations with Tempest devices found");
        process::exit(1)
    }

    for station in stations.iter() {
        tracing::info!(
            message = "found station",
            name = %station.name,
            station_id = station.station_id,
            serial_number = %station.serial_number,
            created_at = %station.created_at.to_rfc3339(),
        );
    }

    let deriver = Deriver::new().with_wet_bulb(args.wet_bulb);
    let mut backfill = Backfill::new(client, FileSink::new(args.output_dir), deriver);

    tokio::select! {
        res = backfill.run(&stations, chrono::Utc::now).instrument(tracing::span!(Level::DEBUG, "tempest_export")) => {
            match res {
                Ok(written) => {
                    tracing::info!(message = "export finished", num_files = written);
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(message = "export failed", error = %e);
                    process::exit(1)
                }
            }
        }
        _ = token.cancelled() => {
            tracing::warn!("export cancelled");
            Ok(())
        }
    }
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    unix::signal(SignalKind::interrupt())?.recv().await;
    Ok(())
}
