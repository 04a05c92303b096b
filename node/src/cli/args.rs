use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "tpn-node",
    version,
    about = "TPN federation node",
    long_about = "Coordination core of the TPN decentralized VPN federation: \
                 lease engine, container control plane, federation request \
                 pipeline, and downstream scoring."
)]
pub struct Args {
    /// Configuration file path (environment variables override it)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log format (json, pretty, compact)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the federation node
    Start {
        /// Bind port (overrides SERVER_PUBLIC_PORT for the local listener)
        #[arg(short, long)]
        bind: Option<u16>,

        /// Database url (overrides config and environment)
        #[arg(long)]
        database_url: Option<String>,
    },

    /// Validate configuration and print the effective values
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },

    /// Database maintenance
    Database {
        #[command(subcommand)]
        command: DatabaseCommands,

        /// Database url (overrides config and environment)
        #[arg(long)]
        url: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum DatabaseCommands {
    /// Run pending migrations
    Migrate,
    /// Ping the database
    Status,
}
