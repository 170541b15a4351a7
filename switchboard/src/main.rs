use std::net::SocketAddr;

use args::Args;
use clap::Parser;
use tokio_util::sync::CancellationToken;

mod args;

const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:8420";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    server::init_logger(&args.log_filter());

    let config = config::Config::load(&args.config)?;
    config.validate()?;

    let listen_address: SocketAddr = args
        .listen_address
        .or(config.server.listen_address)
        .unwrap_or_else(|| {
            DEFAULT_LISTEN_ADDRESS
                .parse()
                .expect("default listen address is valid")
        });

    let shutdown_signal = CancellationToken::new();

    {
        let shutdown_signal = shutdown_signal.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Received SIGINT");
                shutdown_signal.cancel();
            }
        });
    }

    server::serve(server::ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        version: env!("CARGO_PKG_VERSION").to_string(),
        bound_addr_sender: None,
    })
    .await
}
