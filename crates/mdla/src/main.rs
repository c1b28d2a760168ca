//! MDLA: proxy client core
//!
//! Main entry point. Initializes the global allocator, sets up logging,
//! loads the configuration and dispatches the command line.

mod cli;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use cli::{Cli, ServerCommand, SubCommand, TopCommand};
use mdla_link::{ServerDescriptor, parse_link};
use mdla_network::{HttpClient, HttpClientConfig};
use mdla_vpn::{
    AppConfig, ConfigSynthesizer, ConnectionController, ConnectionObserver, ConnectionStatus,
    ProcessBackend, SubscriptionRegistry, TrafficSnapshot,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let config_path = AppConfig::default_path();
    let config = AppConfig::load_or_default(config_path.as_deref()).await;

    match cli.command {
        TopCommand::Decode { link } => {
            let descriptor = decode_link(&link)?;
            println!("{}", serde_json::to_string_pretty(&descriptor)?);
        }
        TopCommand::Encode { link } => {
            let descriptor = decode_link(&link)?;
            match mdla_link::encode(&descriptor) {
                Some(encoded) => println!("{}", encoded),
                None => bail!("Protocol {} has no share-link form", descriptor.protocol),
            }
        }
        TopCommand::Synth { link } => {
            let descriptor = decode_link(&link)?;
            let core = ConfigSynthesizer::from_config(&config).synthesize(&descriptor);
            println!("{}", core.to_json_pretty());
        }
        TopCommand::Sub { command } => run_sub(&config, command).await?,
        TopCommand::Server { command } => run_server(&config, command).await?,
        TopCommand::Servers => {
            let registry = open_registry(&config).await;
            let servers = registry.list_all_descriptors().await;
            if servers.is_empty() {
                println!("No servers. Add one with `mdla server add <link>` or `mdla sub add`.");
            }
            for (index, server) in servers.iter().enumerate() {
                println!("{:>3}  {}", index, server);
            }
        }
        TopCommand::Ping {
            timeout_ms,
            concurrency,
        } => {
            let registry = open_registry(&config).await;
            let servers = registry.list_all_descriptors().await;
            let latencies =
                mdla_network::probe_all(&servers, Duration::from_millis(timeout_ms), concurrency)
                    .await;
            for (index, (server, latency)) in servers.iter().zip(latencies).enumerate() {
                let latency = match latency {
                    Some(d) => format!("{} ms", d.as_millis()),
                    None => "timeout".to_string(),
                };
                println!("{:>3}  {:>9}  {}", index, latency, server.label());
            }
        }
        TopCommand::Connect { index } => {
            let registry = open_registry(&config).await;
            let servers = registry.list_all_descriptors().await;
            let Some(server) = servers.get(index) else {
                bail!("No server at index {} ({} known)", index, servers.len());
            };
            connect(&config, server).await?;
        }
        TopCommand::Config => {
            if let Some(path) = &config_path {
                println!("# {}", path.display());
            }
            print!("{}", config.to_toml());
        }
    }

    Ok(())
}

fn decode_link(link: &str) -> Result<ServerDescriptor> {
    parse_link(link).with_context(|| format!("Cannot decode {:?}", link))
}

async fn open_registry(config: &AppConfig) -> SubscriptionRegistry {
    let client = HttpClient::new(HttpClientConfig {
        timeout: config.fetch_timeout(),
        ..Default::default()
    });
    SubscriptionRegistry::open(config.store_path(), client).await
}

async fn run_sub(config: &AppConfig, command: SubCommand) -> Result<()> {
    let registry = open_registry(config).await;

    match command {
        SubCommand::Add { name, url } => {
            let subscription = registry.add(&name, &url).await;
            println!("Added {} ({})", subscription.name, subscription.id);
        }
        SubCommand::Remove { id } => {
            if !registry.remove(&id).await {
                bail!("No subscription {}", id);
            }
            println!("Removed {}", id);
        }
        SubCommand::List => {
            for s in registry.subscriptions().await {
                let updated = s
                    .last_update
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{}  {:<20}  {:>3} servers  updated {}  {}",
                    s.id,
                    s.name,
                    s.servers.len(),
                    updated,
                    s.url
                );
            }
        }
        SubCommand::Refresh { id: Some(id), .. } => {
            if !registry.refresh(&id).await {
                bail!("Refresh of {} failed", id);
            }
            let count = registry.get(&id).await.map_or(0, |s| s.servers.len());
            println!("{}: {} servers", id, count);
        }
        SubCommand::Refresh { id: None, due } => {
            let results = if due {
                registry.refresh_due(Utc::now()).await
            } else {
                registry.refresh_all().await
            };
            for s in registry.subscriptions().await {
                if let Some(ok) = results.get(&s.id) {
                    let outcome = if *ok { "ok" } else { "failed" };
                    println!("{}  {:<20}  {}", s.id, s.name, outcome);
                }
            }
        }
    }
    Ok(())
}

async fn run_server(config: &AppConfig, command: ServerCommand) -> Result<()> {
    let registry = open_registry(config).await;

    match command {
        ServerCommand::Add { link } => {
            // Surface the decode error before touching the store
            decode_link(&link)?;
            if let Some(added) = registry.add_server_from_link(&link).await {
                println!("Added {}", added);
            }
        }
        ServerCommand::Remove { index } => {
            if !registry.remove_server(index).await {
                bail!("No hand-added server at index {}", index);
            }
            println!("Removed server {}", index);
        }
    }
    Ok(())
}

/// Prints transitions and traffic to stdout
struct ConsoleObserver;

impl ConnectionObserver for ConsoleObserver {
    fn on_status_change(&self, status: &ConnectionStatus) {
        match &status.error_message {
            Some(message) => println!("[{:?}] {}", status.state, message),
            None => println!("[{:?}]", status.state),
        }
    }

    fn on_traffic(&self, traffic: &TrafficSnapshot) {
        println!("{}", traffic.format());
    }
}

async fn connect(config: &AppConfig, server: &ServerDescriptor) -> Result<()> {
    let backend = Arc::new(ProcessBackend::from_config(config));
    let controller = ConnectionController::from_config(backend, config);
    controller.subscribe(Arc::new(ConsoleObserver));

    if !controller.start(server).await {
        let message = controller.status().error_message.unwrap_or_default();
        bail!("Connection failed: {}", message);
    }

    for endpoint in controller.proxy_endpoints() {
        info!("Proxy listening at {}", endpoint);
    }
    info!("Press Ctrl-C to disconnect");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    if !controller.stop().await {
        bail!("Disconnect failed");
    }
    Ok(())
}
