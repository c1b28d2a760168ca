use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "mdla", about = "Proxy client core", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: TopCommand,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum TopCommand {
    /// Decode a share link and print the server as JSON
    Decode {
        /// Share link (vmess://, vless://, trojan://, ss://, ...)
        link: String,
    },

    /// Re-encode a share link in canonical form
    Encode { link: String },

    /// Print the core config generated for a share link
    Synth { link: String },

    /// Subscription commands
    Sub {
        #[command(subcommand)]
        command: SubCommand,
    },

    /// Hand-added server commands
    Server {
        #[command(subcommand)]
        command: ServerCommand,
    },

    /// List every known server with its index
    Servers,

    /// Measure TCP connect latency to every known server
    Ping {
        /// Per-server timeout in milliseconds
        #[arg(long, default_value_t = 3000)]
        timeout_ms: u64,

        /// Servers probed at once
        #[arg(long, default_value_t = 16)]
        concurrency: usize,
    },

    /// Connect to a server by index (see `servers`) until Ctrl-C
    Connect { index: usize },

    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
pub enum SubCommand {
    /// Add a subscription
    Add { name: String, url: String },

    /// Remove a subscription
    Remove { id: String },

    /// List subscriptions
    List,

    /// Refresh one subscription, or all of them
    Refresh {
        id: Option<String>,

        /// Only refresh auto-update subscriptions that are due
        #[arg(long, conflicts_with = "id")]
        due: bool,
    },
}

#[derive(Subcommand)]
pub enum ServerCommand {
    /// Add a server from a share link
    Add { link: String },

    /// Remove a hand-added server by its position among hand-added servers
    Remove { index: usize },
}
