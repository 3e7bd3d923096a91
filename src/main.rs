mod api;
mod config;
mod consumer;
mod destination;
mod graph;
mod message;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::destination::Destination;
use crate::graph::{DeliveryResult, GraphClient};
use crate::message::MessageRequest;

/// Relay messages into Microsoft Teams channels and chats.
#[derive(Debug, Parser)]
#[command(name = "teams-relay", version)]
struct Cli {
    /// Optional TOML config file; environment variables take precedence.
    #[arg(long, global = true, env = "TEAMS_RELAY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP API.
    Serve,
    /// Consume the channel and chat topics.
    ///
    /// Needs a binary built with `--features kafka`; other builds only
    /// report whether topics are configured.
    Consume,
    /// Post a single message to a team channel.
    Send(SendArgs),
}

#[derive(Debug, Args)]
struct SendArgs {
    #[arg(long)]
    text: Option<String>,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    image: Option<String>,
    /// Team ID of the target channel
    team_id: String,
    /// Channel ID within the team
    channel_id: String,
}

impl SendArgs {
    fn request(&self) -> MessageRequest {
        MessageRequest::new(self.title.clone(), self.text.clone(), self.image.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,teams_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        info!("Loading configuration from: {}", path.display());
    }
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let config = Arc::new(config);

    match cli.command {
        Command::Serve => api::serve(config).await,
        Command::Consume => consume(config).await,
        Command::Send(args) => send(&config, &args).await,
    }
}

#[cfg(feature = "kafka")]
async fn consume(config: Arc<Config>) -> Result<()> {
    use crate::consumer::kafka::KafkaSource;
    use crate::consumer::StreamIngress;

    if config.kafka.topics().is_empty() {
        println!("No topic provided");
        return Ok(());
    }

    let mut source = KafkaSource::new(&config.kafka)?;
    let ingress = StreamIngress::new(config)?;
    ingress
        .run(&mut source, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

#[cfg(not(feature = "kafka"))]
async fn consume(config: Arc<Config>) -> Result<()> {
    if config.kafka.topics().is_empty() {
        println!("No topic provided");
        return Ok(());
    }
    anyhow::bail!("teams-relay was built without Kafka support; rebuild with `--features kafka`")
}

async fn send(config: &Config, args: &SendArgs) -> Result<()> {
    let Some(token) = config.teams.access_token() else {
        println!("Cannot find access token in environment variable TEAMS_ACCESS_TOKEN");
        return Ok(());
    };

    let request = args.request();
    if !request.has_content() {
        println!("Please specify at least one of --text, --title, --image");
        return Ok(());
    }

    let graph = GraphClient::new(&config.teams)?;
    let destination = Destination::channel(args.team_id.as_str(), args.channel_id.as_str());
    match graph.send(token, &destination, &request).await? {
        DeliveryResult::Posted(posted) => {
            println!("Message posted: {} ({})", posted.id, posted.url)
        }
        DeliveryResult::Rejected(rejection) => {
            println!(
                "Message rejected ({}): {}",
                rejection.status, rejection.message
            )
        }
    }
    Ok(())
}
