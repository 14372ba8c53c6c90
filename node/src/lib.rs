//! `mau-node`: local-network peer discovery, mutually-authenticated TLS
//! transport, the file-sharing HTTP server, and the sync client — the
//! networked half of mau (spec components E–H). Identity, the account
//! store, and friend/file addressing live in `mau-core`.

pub mod cli;
pub mod client;
pub mod config;
pub mod discovery;
pub mod server;
pub mod state;
pub mod transport;

pub use client::Client;
pub use config::NodeConfig;
pub use discovery::DiscoveryService;
pub use state::NodeState;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
