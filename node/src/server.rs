//! The file-sharing server (spec component G): exposes an account's own
//! files to authenticated friends under a `p2p` prefix, mirroring the
//! teacher's `routes/` module (one handler module merged into a router) but
//! serving file manifests instead of chat payloads.

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use axum::body::Bytes;
use axum::extract::connect_info::Connected;
use axum::extract::{ConnectInfo, Path as AxumPath, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use mau_core::{Error, Fingerprint, File, Result};
use mau_proto::FileListItem;
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tracing::{debug, info, warn};

use crate::state::NodeState;
use crate::transport::{self, peer_fingerprint_from_der};

/// Binds `host:port`, starts advertising nothing itself (the caller owns
/// discovery), and serves the `p2p` router over mutually-authenticated TLS
/// until the process is killed.
pub async fn serve(state: Arc<NodeState>, host: String, port: u16) -> Result<()> {
    let identity = transport::build_identity(state.account().keypair())?;

    let verifier_state = Arc::clone(&state);
    let tls_config = transport::server_tls_config(&identity, move |fingerprint| {
        verifier_state
            .account()
            .friends()
            .map(|friends| {
                friends
                    .iter()
                    .any(|f| f.fingerprint().ok() == Some(fingerprint))
            })
            .unwrap_or(false)
    })?;

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| Error::Transport(format!("invalid bind address: {e}")))?;

    let rustls_config = axum_server::tls_rustls::RustlsConfig::from_config(Arc::new(tls_config));
    let app = router(Arc::clone(&state));

    info!(%addr, fingerprint = %state.account().fingerprint(), "mau server listening");
    axum_server::bind_rustls(addr, rustls_config)
        .serve(app.into_make_service_with_connect_info::<PeerIdentity>())
        .await
        .map_err(|e| Error::Transport(e.to_string()))
}

/// Connection metadata axum hands to handlers: the authenticated peer
/// fingerprint pulled out of the client's TLS certificate. Constructing one
/// without a verified certificate is impossible outside this module — the
/// only way to get one is [`Connected::connect_info`], which the mTLS
/// handshake has already gated.
#[derive(Clone, Copy, Debug)]
pub struct PeerIdentity(pub Fingerprint);

impl Connected<&TlsStream<TcpStream>> for PeerIdentity {
    fn connect_info(target: &TlsStream<TcpStream>) -> Self {
        let (_, session) = target.get_ref();
        let fingerprint = session
            .peer_certificates()
            .and_then(|certs| certs.first())
            .and_then(|cert| peer_fingerprint_from_der(cert).ok())
            .expect("FriendSetVerifier rejects the handshake before this runs");
        PeerIdentity(fingerprint)
    }
}

pub fn router(state: Arc<NodeState>) -> Router {
    Router::new()
        .route("/p2p/:fingerprint", get(list_files))
        .route("/p2p/:fingerprint/*name", get(get_file))
        .with_state(state)
}

async fn list_files(
    State(state): State<Arc<NodeState>>,
    AxumPath(fingerprint): AxumPath<String>,
    headers: HeaderMap,
    ConnectInfo(PeerIdentity(requester)): ConnectInfo<PeerIdentity>,
) -> Response {
    let Ok(fingerprint) = fingerprint.parse::<Fingerprint>() else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    if fingerprint != state.account().fingerprint() {
        return StatusCode::NOT_FOUND.into_response();
    }
    let dir = state.account().own_dir();

    if !dir.is_dir() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let since = headers
        .get(axum::http::header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| mau_proto::parse_http_date(v).ok());

    let mut entries = match read_listing(&dir, requester, since) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "failed to read file listing");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    entries.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.name.cmp(&b.1.name)));

    if entries.is_empty() && since.is_some() {
        return StatusCode::NOT_MODIFIED.into_response();
    }

    let items: Vec<FileListItem> = entries.into_iter().map(|(_, item)| item).collect();
    Json(items).into_response()
}

/// Reads every entry in `dir`, newer than `since` if given, and keeps only
/// the ones `requester` is an addressed recipient of (or that carry no
/// addressing at all and `requester` is the owner — never true for a
/// remote peer reading a friend's mirror, since mirrors aren't served).
/// This is the "server-side listing filter" in DESIGN.md: driven entirely by
/// reading the PKESK recipient metadata already on each file, not a
/// separate access-control list.
fn read_listing(
    dir: &Path,
    requester: Fingerprint,
    since: Option<SystemTime>,
) -> std::io::Result<Vec<(SystemTime, FileListItem)>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        let file = File::new(&path, name.clone());

        let modified = match file.modified_at() {
            Ok(m) => m,
            Err(_) => continue,
        };
        if let Some(since) = since {
            if modified <= since {
                continue;
            }
        }

        if name.ends_with(".pgp") {
            let ciphertext = std::fs::read(&path)?;
            if !addressed_to(&ciphertext, requester) {
                continue;
            }
        }

        let size = match file.size() {
            Ok(s) => s,
            Err(_) => continue,
        };
        let hash = match file.hash() {
            Ok(h) => h,
            Err(_) => continue,
        };

        out.push((modified, FileListItem::new(name, size, hex::encode(hash))));
    }
    Ok(out)
}

fn addressed_to(ciphertext: &[u8], requester: Fingerprint) -> bool {
    let Ok(ids) = mau_core::addressing::recipient_key_ids(ciphertext) else {
        return false;
    };
    // A key ID is the low 8 bytes of a v4 fingerprint: compare suffixes.
    let requester_hex = requester.to_hex();
    ids.iter()
        .any(|id| requester_hex.ends_with(&id.to_hex().to_lowercase()))
}

async fn get_file(
    State(state): State<Arc<NodeState>>,
    AxumPath((fingerprint, name)): AxumPath<(String, String)>,
) -> Response {
    let Ok(fingerprint) = fingerprint.parse::<Fingerprint>() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if fingerprint != state.account().fingerprint() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let Some(path) = safe_join(&state.account().own_dir(), &name) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    match std::fs::read(&path) {
        Ok(bytes) => {
            debug!(%name, len = bytes.len(), "serving file");
            Bytes::from(bytes).into_response()
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!(error = %e, "failed to read requested file");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Joins `name` onto `base`, rejecting any component that would escape it
/// (`..`, an absolute path, or a root prefix) before the join happens.
fn safe_join(base: &Path, name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    for component in candidate.components() {
        match component {
            Component::Normal(_) => {}
            _ => return None,
        }
    }
    Some(base.join(candidate))
}
