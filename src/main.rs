//! ruuvi-forwarder: collect RuuviTag readings and POST them to a local API
//!
//! Listens for Bluetooth LE advertisements from the requested sensors, then
//! sends the latest reading of each one as a single JSON object.
//!
//! ```text
//! ruuvi-forwarder --macs "AA:BB:CC:DD:EE:FF,11:22:33:44:55:66"
//! ```

use clap::Parser;
use tracing_subscriber::fmt::{format::Writer, time::FormatTime};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// === Modules ===

mod app;
mod config;
mod forward;
mod sensors;
mod shared;

use sensors::bluetooth::BleSource;

const TIMESTAMP_FORMAT: &str = "%d/%m/%Y, %H:%M:%S";

// === CLI ===

#[derive(Parser)]
#[command(name = "ruuvi-forwarder", version)]
#[command(about = "Get data from RuuviTag sensors and POST it to an API as JSON")]
struct Cli {
    /// Comma-separated list of MAC addresses
    #[arg(long)]
    macs: Option<String>,
}

impl Cli {
    fn mac_list(&self) -> Vec<String> {
        self.macs.as_deref().map(shared::parse_macs).unwrap_or_default()
    }
}

/// Local wall-clock timestamps in front of every log line
struct LocalTime;

impl FormatTime for LocalTime {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{} -", chrono::Local::now().format(TIMESTAMP_FORMAT))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_collector(&cli).await
}

/// Collect once, forward once. Failures are logged and the process still exits 0.
async fn run_collector(cli: &Cli) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(LocalTime)
                .with_target(false)
                .with_writer(std::io::stdout),
        )
        .init();

    let config = config::Config::load();

    let macs = cli.mac_list();
    app::announce_macs(&macs);

    let forwarder = match forward::Forwarder::new(config.endpoint.as_str(), config.http_timeout()) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!("Error in script: {}", e);
            return Ok(());
        }
    };
    tracing::debug!("Forwarding to {}", forwarder.endpoint());

    let outcome = app::execute(&BleSource, &forwarder, &macs, config.scan_timeout()).await;
    tracing::debug!("Finished: {:?}", outcome);

    Ok(())
}
