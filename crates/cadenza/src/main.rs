use std::collections::HashSet;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cadenza::{Server, ServerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Multiplayer session server for rhythm-game rooms")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:12346")]
    bind: String,

    /// Base URL of the identity/chart/record web API.
    #[arg(long)]
    api_base: Option<String>,

    /// Enable live spectating.
    #[arg(long)]
    live_mode: bool,

    /// User id allowed to spectate (repeatable).
    #[arg(long = "monitor", value_name = "USER_ID")]
    monitors: Vec<i32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut config = ServerConfig {
        bind: args.bind,
        live_mode: args.live_mode,
        monitors: HashSet::from_iter(args.monitors),
        ..ServerConfig::default()
    };
    if let Some(base) = args.api_base {
        config.api_base = base;
    }

    let server = Server::builder()
        .config(config)
        .build()
        .await
        .context("failed to start server")?;

    server.run().await.context("server loop failed")
}
