//! End-to-end friend sync: a real mTLS server serving a real account's
//! files, and a real `Client` downloading from it, covering spec.md §8's
//! "friend sync hit" scenario without mocking any layer of the stack.

use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use mau_core::{Account, RsaBits};
use mau_node::{Client, DiscoveryService, NodeConfig, NodeState};
use tokio_util::sync::CancellationToken;

fn small_account(dir: &std::path::Path, name: &str, email: &str) -> Account {
    Account::new_with_bits(dir, name, email, "pw", RsaBits::B1024).unwrap()
}

fn free_port() -> u16 {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn friend_sync_downloads_matching_file() {
    let server_dir = tempfile::tempdir().unwrap();
    let server_account = small_account(server_dir.path(), "Server", "server@example.com");
    let server_fingerprint = server_account.fingerprint();
    let server_export = server_account.export_public().unwrap();

    let client_dir = tempfile::tempdir().unwrap();
    let client_account = small_account(client_dir.path(), "Client", "client@example.com");

    // Cross-trust: the server's mTLS verifier only accepts known friends, and
    // the client only follows an account whose key it has already imported.
    let client_as_friend = server_account
        .add_friend(&client_account.export_public().unwrap())
        .unwrap();
    server_account
        .add_file(
            "Hello world!".as_bytes(),
            "hello world.txt",
            &[client_as_friend],
        )
        .unwrap();

    let server_as_friend = client_account.add_friend(&server_export).unwrap();
    client_account.follow(&server_as_friend).unwrap();

    let port = free_port();
    let server_config = NodeConfig {
        dir: server_dir.path().to_path_buf(),
        host: "127.0.0.1".to_string(),
        port,
        rsa_bits: RsaBits::B1024,
    };
    let server_state = NodeState::new(server_account, server_config);
    tokio::spawn(mau_node::server::serve(
        server_state,
        "127.0.0.1".to_string(),
        port,
    ));
    // Give the listener a moment to come up before dialing it.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let client_config = NodeConfig {
        dir: client_dir.path().to_path_buf(),
        host: "127.0.0.1".to_string(),
        port: 0,
        rsa_bits: RsaBits::B1024,
    };
    let client_state = NodeState::new(client_account, client_config);
    let discovery = Arc::new(DiscoveryService::new().unwrap());
    let client = Client::new(client_state, discovery).unwrap();

    client
        .download_friend(
            CancellationToken::new(),
            Some(format!("https://127.0.0.1:{port}")),
            server_fingerprint,
            SystemTime::UNIX_EPOCH,
        )
        .await
        .unwrap();

    let downloaded = client_dir
        .path()
        .join(server_fingerprint.to_hex())
        .join("hello world.txt.pgp");
    assert!(downloaded.exists());
    assert_eq!(
        std::fs::read(&downloaded).unwrap(),
        std::fs::read(
            server_dir
                .path()
                .join(server_fingerprint.to_hex())
                .join("hello world.txt.pgp")
        )
        .unwrap()
    );
}
