//! `run` subcommand and `--token` override, mirroring the teacher's
//! `dbot-cli` parser (spec.md §2.3). Full interactive onboarding stays out
//! of scope.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Bridges a chat surface to agent CLIs", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bridge (config from env; token can override RELAY_BOT_TOKEN).
    Run {
        #[arg(short, long)]
        token: Option<String>,
    },
}
