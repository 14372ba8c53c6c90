//! The sync client (spec component H): downloads a followed friend's files
//! over the mutually-authenticated transport, verifying each one before it
//! replaces anything on disk.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use mau_core::file::hash_reader;
use mau_core::{Error, Fingerprint, Result};
use mau_proto::FileListItem;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::discovery::DiscoveryService;
use crate::state::NodeState;
use crate::transport::{self, TlsIdentity};

async fn resolve_address(
    discovery: &DiscoveryService,
    ctx: CancellationToken,
    fingerprint: Fingerprint,
) -> Result<String> {
    let mut addresses = discovery.find(ctx.clone(), fingerprint);
    tokio::select! {
        _ = ctx.cancelled() => Err(Error::CantFindFriend),
        addr = addresses.recv() => addr.ok_or(Error::CantFindFriend),
    }
}

/// Downloads and verifies a single file, or confirms the local copy already
/// matches the manifest without touching the network.
async fn download_file(
    http: &reqwest::Client,
    address: &str,
    fingerprint: Fingerprint,
    item: &FileListItem,
    friend_dir: &std::path::Path,
) -> Result<()> {
    let local = friend_dir.join(&item.name);

    if let Ok(metadata) = std::fs::metadata(&local) {
        if metadata.len() == item.size {
            if let Ok(existing) = std::fs::File::open(&local).and_then(|f| {
                hash_reader(f).map_err(|_| std::io::Error::other("hash failed"))
            }) {
                if hex::encode(existing) == item.sum {
                    return Ok(());
                }
            }
        }
    }

    let url = format!(
        "{address}/p2p/{}/{}",
        fingerprint.to_hex(),
        urlencode_path_segment(&item.name)
    );
    let response = http
        .get(&url)
        .send()
        .await
        .map_err(|e| Error::Transport(e.to_string()))?;

    if !response.status().is_success() {
        return Err(Error::Transport(format!(
            "file request failed: {}",
            response.status()
        )));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| Error::Transport(e.to_string()))?;

    if body.len() as u64 != item.size {
        return Err(Error::IntegrityError(format!(
            "size mismatch for {}: expected {}, got {}",
            item.name,
            item.size,
            body.len()
        )));
    }
    let digest = hash_reader(body.as_ref())?;
    let sum = hex::encode(digest);
    if sum != item.sum {
        return Err(Error::IntegrityError(format!(
            "checksum mismatch for {}",
            item.name
        )));
    }

    write_downloaded_file(&local, &body)?;
    info!(file = %item.name, bytes = body.len(), "mirrored friend file");
    Ok(())
}

/// Write-and-rename, mode 0600, matching [`mau_core::account`]'s atomic
/// write discipline for the local mirror.
fn write_downloaded_file(path: &std::path::Path, bytes: &[u8]) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path: PathBuf = path.with_extension("tmp");
    #[cfg(unix)]
    let mut tmp = {
        use std::os::unix::fs::OpenOptionsExt;
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&tmp_path)?
    };
    #[cfg(not(unix))]
    let mut tmp = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;

    if let Err(e) = tmp.write_all(bytes).and_then(|_| tmp.sync_all()) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    drop(tmp);

    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn urlencode_path_segment(name: &str) -> String {
    // File names may contain spaces (spec.md's own example, "hello world.txt");
    // percent-encode reserved characters rather than leaving them raw in the URL.
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn build_http_client(tls_config: rustls::ClientConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .use_preconfigured_tls(tls_config)
        .build()
        .map_err(|e| Error::Transport(e.to_string()))
}

/// A handle bundling the pieces a long-running sync loop needs: the local
/// identity, where to find friends, and `TlsIdentity` caching so repeated
/// syncs don't re-derive the TLS key pair from the OpenPGP key each time.
pub struct Client {
    state: Arc<NodeState>,
    discovery: Arc<DiscoveryService>,
    identity: TlsIdentity,
}

impl Client {
    pub fn new(state: Arc<NodeState>, discovery: Arc<DiscoveryService>) -> Result<Self> {
        let identity = transport::build_identity(state.account().keypair())?;
        Ok(Self {
            state,
            discovery,
            identity,
        })
    }

    pub async fn download_friend(
        &self,
        ctx: CancellationToken,
        address: Option<String>,
        fingerprint: Fingerprint,
        since: SystemTime,
    ) -> Result<()> {
        let friend_dir = self.state.account().friend_dir(fingerprint);
        if !friend_dir.is_dir() {
            return Err(Error::FriendNotFollowed);
        }

        let address = match address {
            Some(address) => address,
            None => resolve_address(&self.discovery, ctx.clone(), fingerprint).await?,
        };

        let tls_config = transport::client_tls_config(&self.identity, fingerprint)?;
        let http = build_http_client(tls_config)?;

        let list_url = format!("{address}/p2p/{}", fingerprint.to_hex());
        let response = http
            .get(&list_url)
            .header(
                reqwest::header::IF_MODIFIED_SINCE,
                mau_proto::format_http_date(since),
            )
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "listing request failed: {}",
                response.status()
            )));
        }

        let items: Vec<FileListItem> = response
            .json()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        for item in items {
            if ctx.is_cancelled() {
                break;
            }
            if let Err(e) = download_file(&http, &address, fingerprint, &item, &friend_dir).await
            {
                warn!(file = %item.name, error = %e, "skipping file after download failure");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencode_escapes_spaces() {
        assert_eq!(urlencode_path_segment("hello world.txt.pgp"), "hello%20world.txt.pgp");
    }

    #[test]
    fn urlencode_leaves_safe_characters() {
        assert_eq!(urlencode_path_segment("a-b_c.d~e"), "a-b_c.d~e");
    }

    #[tokio::test]
    async fn download_file_rejects_checksum_mismatch_and_does_not_write() {
        use axum::routing::get;
        use axum::Router;

        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = std_listener.local_addr().unwrap();
        std_listener.set_nonblocking(true).unwrap();
        let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();

        let app = Router::new().route("/p2p/:fpr/*name", get(|| async { "wrong bytes" }));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let http = reqwest::Client::new();
        let friend_dir = tempfile::tempdir().unwrap();
        let fingerprint = Fingerprint::from_bytes(&[0u8; 20]).unwrap();
        let item = FileListItem::new("hello.txt.pgp", "wrong bytes".len() as u64, hex::encode([0u8; 32]));

        let address = format!("http://{addr}");
        let err = download_file(&http, &address, fingerprint, &item, friend_dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IntegrityError(_)));
        assert!(!friend_dir.path().join("hello.txt.pgp").exists());
    }

    #[tokio::test]
    async fn download_file_skips_network_when_local_copy_already_matches() {
        let friend_dir = tempfile::tempdir().unwrap();
        let local = friend_dir.path().join("hello.txt.pgp");
        std::fs::write(&local, b"already here").unwrap();
        let sum = hex::encode(hash_reader(b"already here".as_slice()).unwrap());
        let item = FileListItem::new("hello.txt.pgp", "already here".len() as u64, sum);

        let http = reqwest::Client::new();
        let fingerprint = Fingerprint::from_bytes(&[0u8; 20]).unwrap();
        // Nothing is listening on this port; a network attempt would error.
        let address = "http://127.0.0.1:1";
        download_file(&http, address, fingerprint, &item, friend_dir.path())
            .await
            .unwrap();
        assert_eq!(std::fs::read(&local).unwrap(), b"already here");
    }
}
