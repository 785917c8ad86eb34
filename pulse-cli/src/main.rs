//! Pulse CLI
//!
//! Signal aggregation and decay scoring for health-index dashboards.

mod config;
mod server;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use pulse_collect::SourceCollector;
use pulse_core::HistoryFilter;

use crate::config::PulseConfig;
use crate::server::Services;

#[derive(Parser)]
#[command(name = "pulse")]
#[command(author, version, about = "Pulse: signal aggregation and decay scoring", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (0-3)
    #[arg(short, long, default_value = "1")]
    verbose: u8,

    /// TOML configuration file
    #[arg(short, long, env = "PULSE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the storage directory
    #[arg(long, env = "PULSE_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP surface with the review consumer and risk monitor
    Serve {
        /// Listen address (defaults to the configured one)
        #[arg(short, long, env = "PULSE_LISTEN")]
        listen: Option<String>,

        /// Do not consume the review stream
        #[arg(long)]
        no_consumer: bool,

        /// Do not poll dashboards for churn risk
        #[arg(long)]
        no_monitor: bool,
    },

    /// Fetch every configured source once and print the report
    Collect,

    /// Show persisted scores
    Status,

    /// Submit a review to a running server
    Produce {
        /// Review text
        text: String,

        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let mut config = PulseConfig::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    match cli.command {
        Commands::Serve {
            listen,
            no_consumer,
            no_monitor,
        } => {
            if let Some(listen) = listen {
                config.listen = listen;
            }
            serve(config, !no_consumer, !no_monitor).await?;
        }
        Commands::Collect => {
            collect(&config).await?;
        }
        Commands::Status => {
            show_status(&config)?;
        }
        Commands::Produce { text, server } => {
            produce(&text, &server).await?;
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

async fn serve(config: PulseConfig, with_consumer: bool, with_monitor: bool) -> Result<()> {
    println!("📈 Pulse - signal aggregation and decay scoring\n");
    println!("🌐 Listening on: {}", config.listen);
    println!("💾 Storage: {:?} ({})", config.storage, config.data_dir.display());
    println!("📡 Sources: {}\n", config.sources.len());

    let Services {
        state,
        consumer,
        monitor,
    } = Services::build(&config)?;

    let consumer = with_consumer.then(|| consumer.spawn());
    let monitor = with_monitor.then(|| monitor.spawn());

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
        }
        signal.cancel();
    });

    server::serve(&config.listen, state, cancel).await?;

    if let Some(handle) = consumer {
        let consumer = handle.shutdown().await?;
        info!("Review consumer stopped at {}", consumer.cursor());
    }
    if let Some(handle) = monitor {
        handle.shutdown().await?;
    }

    println!("\n✅ Pulse stopped");
    Ok(())
}

async fn collect(config: &PulseConfig) -> Result<()> {
    let collector = SourceCollector::new(&config.collector)?;
    let report = collector.collect(&config.sources).await;

    if report.error_count() > 0 {
        warn!("{} of {} sources failed", report.error_count(), report.len());
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn show_status(config: &PulseConfig) -> Result<()> {
    let Services { state, .. } = Services::build(config)?;

    let ux = state.sessions.status()?;
    let delivery = state.delivery_state.get()?;
    let orders = state.orders.history().aggregate(&HistoryFilter::default())?;

    println!("📊 Pulse status ({})\n", config.data_dir.display());
    println!("🧭 UX score: {:.2} over {} sessions", ux.global_score, ux.total_sessions);
    println!(
        "🚚 Delivery score: {:.2} over {} orders",
        delivery.score, orders.count
    );

    match state.aggregates.load()? {
        Some(aggregate) => println!(
            "🍔 Food quality: {:.2} ({}) over {} reviews",
            aggregate.rolling_mean, aggregate.label, aggregate.window_len
        ),
        None => println!("🍔 Food quality: no reviews scored yet"),
    }

    Ok(())
}

async fn produce(text: &str, server: &str) -> Result<()> {
    let url = format!("{}/reviews", server.trim_end_matches('/'));
    let response = reqwest::Client::new()
        .post(&url)
        .json(&json!({ "review": text }))
        .send()
        .await
        .with_context(|| format!("posting to {}", url))?;

    let status = response.status();
    let body: serde_json::Value = response.json().await.unwrap_or_default();
    if !status.is_success() {
        anyhow::bail!("server answered {}: {}", status, body);
    }

    println!("✅ Review queued as {}", body["id"].as_str().unwrap_or("?"));
    Ok(())
}
