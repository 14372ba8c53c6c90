use clap::Parser;
use mau_node::cli::{self, Cli};
use mau_node::{init_tracing, NodeConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = NodeConfig::from_env()?;
    cli::run(cli, config).await
}
