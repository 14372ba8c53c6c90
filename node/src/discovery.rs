//! Local-network peer discovery (spec component E): advertise this account
//! under `<fingerprint>._mau._tcp.local.` and look up a friend's address by
//! fingerprint, via multicast DNS service discovery.
//!
//! Discovery is a hint, never a trust decision: every address it returns
//! still goes through the mutually-authenticated transport in
//! [`crate::transport`] before anything is read from it.

use std::net::IpAddr;
use std::time::Duration;

use mau_core::{Error, Fingerprint, Result};
use mau_proto::{instance_name, SERVICE_NAME};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Wraps the mDNS daemon used for both advertising this account and
/// browsing for friends.
pub struct DiscoveryService {
    daemon: ServiceDaemon,
}

impl DiscoveryService {
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| Error::Transport(format!("mdns daemon failed to start: {e}")))?;
        Ok(Self { daemon })
    }

    /// Advertises this account's server on the local segment. Returns a
    /// guard-free registration; call [`DiscoveryService::unadvertise`] on the
    /// same fingerprint to withdraw it (the daemon itself is dropped on
    /// shutdown, which also withdraws every registration).
    pub fn advertise(&self, fingerprint: Fingerprint, port: u16, host_name: &str) -> Result<()> {
        let instance = instance_name(fingerprint);
        let local_ips = local_ipv4_addresses();

        let info = ServiceInfo::new(
            SERVICE_NAME,
            &fingerprint.to_hex(),
            host_name,
            local_ips.as_slice(),
            port,
            None,
        )
        .map_err(|e| Error::Transport(format!("failed to build mdns service info: {e}")))?;

        debug!(%instance, %port, "advertising mau service");
        self.daemon
            .register(info)
            .map_err(|e| Error::Transport(format!("mdns registration failed: {e}")))?;
        Ok(())
    }

    pub fn unadvertise(&self, fingerprint: Fingerprint) -> Result<()> {
        let instance = instance_name(fingerprint);
        self.daemon
            .unregister(&instance)
            .map(|_| ())
            .map_err(|e| Error::Transport(format!("mdns unregister failed: {e}")))
    }

    /// Browses for `fingerprint` on the local segment, emitting
    /// `"https://<ip>:<port>"` addresses on the returned channel as they
    /// resolve. The producer task stops as soon as `ctx` is cancelled; the
    /// receiver is expected to be drained by the caller rather than closed
    /// out from under the producer (see spec.md §9's discovery race note).
    pub fn find(&self, ctx: CancellationToken, fingerprint: Fingerprint) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(8);
        let browse = self.daemon.browse(SERVICE_NAME);

        tokio::spawn(async move {
            let mut events = match browse {
                Ok(events) => events,
                Err(e) => {
                    warn!(error = %e, "mdns browse failed to start");
                    return;
                }
            };

            loop {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    event = events.recv_async() => {
                        let Ok(event) = event else { break };
                        if let ServiceEvent::ServiceResolved(info) = event {
                            if matching_fingerprint(&info, fingerprint) {
                                for addr in addresses_for(&info) {
                                    if tx.send(addr).await.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        });

        rx
    }
}

fn matching_fingerprint(info: &ServiceInfo, expected: Fingerprint) -> bool {
    mau_proto::fingerprint_from_instance_name(info.get_fullname()) == Some(expected)
}

fn addresses_for(info: &ServiceInfo) -> Vec<String> {
    let port = info.get_port();
    info.get_addresses()
        .iter()
        .map(|ip| mau_proto::format_address(mau_proto::DEFAULT_SCHEME, &ip.to_string(), port))
        .collect()
}

fn local_ipv4_addresses() -> Vec<IpAddr> {
    use std::net::UdpSocket;
    // Best-effort local-address discovery: open a UDP socket and "connect"
    // it to a non-routable address to learn which local interface the OS
    // would pick, without actually sending anything.
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| vec![addr.ip()])
        .unwrap_or_default()
}

/// How long [`find`] callers should wait before giving up locally, matching
/// spec.md §8 scenario S5's "within 10 s" expectation.
pub const DEFAULT_FIND_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn matching_fingerprint_requires_exact_instance() {
        let fpr = Fingerprint::from_str("aabbccddeeff00112233445566778899aabbccdd").unwrap();
        let name = instance_name(fpr);
        assert_eq!(mau_proto::fingerprint_from_instance_name(&name), Some(fpr));
    }
}
