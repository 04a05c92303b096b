mod args;
mod commands;

pub use args::{Args, Commands, DatabaseCommands};

use anyhow::Result;
use clap::Parser;

pub async fn run() -> Result<()> {
    let args = Args::parse();
    commands::execute(args).await
}
