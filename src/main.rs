//! msggrab CLI - main entry point
//!
//! Grabs every link posted in the given Discord channels into a log file.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use msggrab::config::parse_duration;
use msggrab::{
    metrics, Config, DiscordClient, HistoryScraper, LinkSink, Overrides, RunLock, Session,
};

#[derive(Parser)]
#[command(name = "msggrab")]
#[command(about = "Grab a log of links posted in Discord channels", long_about = None)]
#[command(version)]
struct Cli {
    /// Channel IDs to scrape (comma-separated lists are accepted)
    channels: Vec<String>,

    /// Comma-separated channel IDs, alternative to positional arguments
    #[arg(long, value_delimiter = ',')]
    channel_list: Vec<String>,

    /// Bot token to log in with
    #[arg(short = 't', long = "token", env = "DISCORD_BOT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Output file to append the links to [default: msggrab.log]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Messages to request per page (1-100) [default: 20]
    #[arg(short = 'a', long = "amount", value_parser = clap::value_parser!(u32).range(1..=100))]
    amount: Option<u32>,

    /// Delay between page requests, e.g. 1s, 500ms [default: 1s]
    #[arg(short = 'w', long = "wait", value_parser = parse_duration)]
    wait: Option<Duration>,

    /// YAML config file (defaults to ./msggrab.yml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Retries for transient request failures (rate limits, 5xx, network)
    #[arg(long)]
    retries: Option<u32>,

    /// Address to expose Prometheus metrics (e.g., 0.0.0.0:9898)
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,
}

impl Cli {
    fn into_overrides(self) -> Overrides {
        let mut channels = self.channels;
        channels.extend(self.channel_list);
        Overrides {
            config_file: self.config,
            bot_token: self.token,
            channels,
            output_file: self.output,
            page_size: self.amount,
            poll_delay: self.wait,
            retries: self.retries,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env for local development
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("msggrab=info".parse()?))
        .init();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr.as_deref() {
        match addr.parse::<SocketAddr>() {
            Ok(socket) => metrics::spawn_metrics_server(socket),
            Err(err) => warn!(%addr, "Invalid metrics address: {}", err),
        }
    }

    let start = Instant::now();
    let result = run(cli.into_overrides()).await;
    metrics::record_run_result(start.elapsed(), result.is_ok());
    result
}

async fn run(overrides: Overrides) -> anyhow::Result<()> {
    // Everything that can be wrong with the setup fails before any output.
    let config = Config::load(overrides)?;
    let requests = config.scrape_requests()?;
    let _lock = RunLock::acquire(&config.output_file)?;
    let mut sink = LinkSink::open(&config.output_file)?;
    let session = Session::open(DiscordClient::new(config.bot_token.as_str())?).await?;

    info!(
        channels = requests.len(),
        output = %config.output_file.display(),
        page_size = config.page_size,
        delay = ?config.poll_delay,
        "Starting scrape"
    );

    let scraper = HistoryScraper::new(session.client()).with_retries(config.retries);
    let mut total_links = 0;
    for request in requests {
        let summary = scraper.scrape_into(request, &mut sink).await?;
        total_links += summary.links;
    }

    session.close();
    info!(
        links = total_links,
        lines = sink.lines_written(),
        "Done parsing messages. Goodbye"
    );
    Ok(())
}
