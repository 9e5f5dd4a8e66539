// QuotaGate - Main Entry Point
//
// Command-line front end for the admission gate:
// - `run` sends a burst of requests to a URL through the gate and reports
//   when each one was admitted
// - `config` prints the effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quotagate::config::Config;
use quotagate::metrics_server::start_metrics_server;
use quotagate::RateLimitedClient;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// QuotaGate: quota-aware admission control for HTTP APIs
#[derive(Parser, Debug)]
#[command(name = "quotagate")]
#[command(author = "QuotaGate Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Queue HTTP requests against a server-advertised rate limit", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to the configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send GET requests to a URL through the admission gate
    Run {
        /// Target URL
        url: String,

        /// Number of requests to send
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,

        /// Extra request header, e.g. "Authorization: token"
        #[arg(short = 'H', long = "header", value_name = "NAME: VALUE")]
        headers: Vec<String>,

        /// Per-request timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    init_tracing(&config, args.verbose)?;

    match args.command {
        Some(Commands::Run {
            url,
            count,
            headers,
            timeout_secs,
        }) => {
            run_requests(&config, url, count, &headers, timeout_secs).await?;
        }
        Some(Commands::Config) => {
            print!("{}", config.to_toml()?);
        }
        None => {
            info!("No command specified. Use \"quotagate --help\" for usage.");
        }
    }

    Ok(())
}

/// Install the tracing subscriber
fn init_tracing(config: &Config, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        config.log_level()?
    };

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    if config.logging.format.eq_ignore_ascii_case("pretty") {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .compact()
            .with_env_filter(filter)
            .init();
    }

    Ok(())
}

/// Parse "Name: Value" header arguments
fn parse_headers(raw: &[String]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for entry in raw {
        let (name, value) = entry
            .split_once(':')
            .with_context(|| format!("Header {:?} is not in \"Name: Value\" form", entry))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .with_context(|| format!("Invalid header name in {:?}", entry))?;
        let value = HeaderValue::from_str(value.trim())
            .with_context(|| format!("Invalid header value in {:?}", entry))?;
        headers.append(name, value);
    }
    Ok(headers)
}

/// Fire `count` requests through the gate and report each admission
async fn run_requests(
    config: &Config,
    url: String,
    count: usize,
    headers: &[String],
    timeout_secs: u64,
) -> Result<()> {
    if config.metrics.enabled {
        let port = config.metrics.port;
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(port).await {
                error!("Metrics server stopped: {:#}", e);
            }
        });
    }

    let http = reqwest::Client::builder()
        .default_headers(parse_headers(headers)?)
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;
    let client = RateLimitedClient::new(http, config.limiter.clone());

    info!("Sending {} requests to {}", count, url);
    let started = Instant::now();

    let mut tasks = JoinSet::new();
    for index in 0..count {
        let client = client.clone();
        let url = url.clone();
        tasks.spawn(async move {
            let result = client.send(client.get(&url)).await;
            (index, result)
        });
    }

    let mut succeeded = 0usize;
    let mut failed = 0usize;

    loop {
        tokio::select! {
            joined = tasks.join_next() => {
                let Some(joined) = joined else { break };
                let (index, result) = joined.context("Request task panicked")?;
                let snapshot = client.limiter().snapshot();
                match result {
                    Ok(response) => {
                        succeeded += 1;
                        info!(
                            request = index,
                            status = %response.status(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            limit = snapshot.limit,
                            remaining = snapshot.remaining,
                            queued = snapshot.queued,
                            "Request completed"
                        );
                    }
                    Err(e) => {
                        failed += 1;
                        warn!(request = index, "Request failed: {}", e);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, abandoning {} queued requests", tasks.len());
                tasks.shutdown().await;
                break;
            }
        }
    }

    info!(
        succeeded,
        failed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Done"
    );
    Ok(())
}
