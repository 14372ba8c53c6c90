//! Thin CLI front end (out of scope per spec.md §1, carried as the ambient
//! entry point the library exists to support). Argument parsing only: every
//! command calls straight into `mau-core`/`mau-node` library functions.

use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::SystemTime;

use clap::{Parser, Subcommand};
use mau_core::{Account, Fingerprint};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::client::Client;
use crate::config::NodeConfig;
use crate::discovery::DiscoveryService;
use crate::state::NodeState;

#[derive(Parser)]
#[command(name = "mau", about = "friend-to-friend file sharing")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a new account at MAU_DIR.
    Init {
        name: String,
        email: String,
        #[arg(env = "MAU_PASSPHRASE")]
        passphrase: String,
    },
    /// Run the server and advertise this account on the local segment.
    Serve,
    /// Import a friend's exported public key file.
    AddFriend {
        passphrase: String,
        key_path: PathBuf,
    },
    /// Start mirroring a friend's files.
    Follow {
        passphrase: String,
        fingerprint: String,
    },
    /// Stop mirroring a friend's files.
    Unfollow {
        passphrase: String,
        fingerprint: String,
    },
    /// One-shot sync with a followed friend.
    Sync {
        passphrase: String,
        fingerprint: String,
        #[arg(long)]
        address: Option<String>,
    },
}

pub async fn run(cli: Cli, config: NodeConfig) -> anyhow::Result<()> {
    match cli.command {
        Command::Init {
            name,
            email,
            passphrase,
        } => {
            let account =
                Account::new_with_bits(&config.dir, &name, &email, &passphrase, config.rsa_bits)?;
            println!("{}", account.fingerprint().to_hex());
            Ok(())
        }
        Command::Serve => {
            let account = Account::open(&config.dir, &prompt_passphrase()?)?;
            let fingerprint = account.fingerprint();
            info!(%fingerprint, "starting mau node");
            let state = NodeState::new(account, config.clone());
            let discovery = Arc::new(DiscoveryService::new()?);
            discovery.advertise(fingerprint, config.port, &config.host)?;
            crate::server::serve(state, config.host.clone(), config.port).await?;
            Ok(())
        }
        Command::AddFriend {
            passphrase,
            key_path,
        } => {
            let account = Account::open(&config.dir, &passphrase)?;
            let key_blob = std::fs::read(key_path)?;
            let friend = account.add_friend(&key_blob)?;
            println!("{}", friend.fingerprint()?.to_hex());
            Ok(())
        }
        Command::Follow {
            passphrase,
            fingerprint,
        } => {
            let account = Account::open(&config.dir, &passphrase)?;
            let friend = find_friend(&account, &fingerprint)?;
            account.follow(&friend)?;
            Ok(())
        }
        Command::Unfollow {
            passphrase,
            fingerprint,
        } => {
            let account = Account::open(&config.dir, &passphrase)?;
            let friend = find_friend(&account, &fingerprint)?;
            account.unfollow(&friend)?;
            Ok(())
        }
        Command::Sync {
            passphrase,
            fingerprint,
            address,
        } => {
            let account = Account::open(&config.dir, &passphrase)?;
            let fingerprint: Fingerprint = fingerprint.parse()?;
            let state = NodeState::new(account, config);
            let discovery = Arc::new(DiscoveryService::new()?);
            let client = Client::new(state, discovery)?;
            client
                .download_friend(
                    CancellationToken::new(),
                    address,
                    fingerprint,
                    SystemTime::UNIX_EPOCH,
                )
                .await?;
            Ok(())
        }
    }
}

fn find_friend(account: &Account, fingerprint: &str) -> anyhow::Result<mau_core::Friend> {
    let target = Fingerprint::from_str(fingerprint)?;
    account
        .friends()?
        .into_iter()
        .find(|f| f.fingerprint().ok() == Some(target))
        .ok_or_else(|| mau_core::Error::NotFound.into())
}

fn prompt_passphrase() -> anyhow::Result<String> {
    if let Ok(passphrase) = std::env::var("MAU_PASSPHRASE") {
        return Ok(passphrase);
    }
    print!("passphrase: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\n', '\r']).to_string())
}
