use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "switchboard", about = "An agent-execution gateway", version)]
pub(crate) struct Args {
    /// Path to the TOML configuration.
    #[arg(short, long, env = "SWITCHBOARD_CONFIG", default_value = "./switchboard.toml")]
    pub config: PathBuf,

    /// Overrides the configured listen address.
    #[arg(short, long, env = "SWITCHBOARD_LISTEN")]
    pub listen_address: Option<SocketAddr>,

    /// Log filter, e.g. "info" or "server=debug,orchestrator=debug".
    #[arg(long, env = "SWITCHBOARD_LOG", default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn log_filter(&self) -> String {
        self.log_level.clone()
    }
}
