//! Bootstrap peer loading.
//!
//! The bootstrap file lists one multiaddr per line; blank lines and `#`
//! comments are ignored.
//!
//! ```text
//! # community bootstrap nodes
//! /ip4/198.51.100.10/udp/4101/quic-v1/p2p/12D3KooW...
//! /ip4/198.51.100.11/tcp/4101/p2p/12D3KooW...
//! ```

use std::path::Path;

use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use tracing::{info, warn};

/// Load bootstrap multiaddrs; malformed lines are logged and skipped, an
/// unreadable file yields no peers.
pub fn load_bootstrap_peers(path: &Path) -> Vec<Multiaddr> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read bootstrap peers file");
            return Vec::new();
        }
    };

    let addrs = parse_multiaddrs(
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#')),
    );

    info!(count = addrs.len(), path = %path.display(), "Loaded bootstrap peers");
    addrs
}

/// Parse multiaddr strings, e.g. a community's peer list.
pub fn parse_multiaddrs<'a>(raw: impl IntoIterator<Item = &'a str>) -> Vec<Multiaddr> {
    raw.into_iter()
        .filter_map(|s| match s.parse::<Multiaddr>() {
            Ok(addr) => Some(addr),
            Err(e) => {
                warn!(addr = %s, error = %e, "Skipping invalid multiaddr");
                None
            }
        })
        .collect()
}

/// The `/p2p/<peer id>` suffix of a multiaddr, if any.
pub fn extract_peer_id(addr: &Multiaddr) -> Option<PeerId> {
    addr.iter().find_map(|p| match p {
        Protocol::P2p(peer_id) => Some(peer_id),
        _ => None,
    })
}
