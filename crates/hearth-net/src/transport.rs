use std::time::Duration;

use libp2p::gossipsub::{self, MessageAuthenticity, MessageId, ValidationMode};
use libp2p::identity::Keypair;
use libp2p::kad::{self, store::MemoryStore};
use libp2p::{identify, noise, tcp, yamux, SwarmBuilder};
use tracing::info;

use hearth_shared::constants::{GOSSIPSUB_HEARTBEAT_SECS, MAX_MESSAGE_SIZE, PROTOCOL_VERSION};

use crate::behaviour::HearthBehaviour;

const KEYPAIR_CONTEXT: &str = "hearth-libp2p-keypair-v1";

/// Derive the node's libp2p identity from a 32-byte secret.
pub fn keypair_from_seed(secret: &[u8; 32]) -> anyhow::Result<Keypair> {
    let seed = blake3::derive_key(KEYPAIR_CONTEXT, secret);
    Ok(Keypair::ed25519_from_bytes(seed)?)
}

/// Build a swarm listening over QUIC with a TCP (noise + yamux) fallback.
pub fn build_swarm(keypair: Keypair) -> anyhow::Result<libp2p::Swarm<HearthBehaviour>> {
    let swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(
            tcp::Config::default(),
            noise::Config::new,
            yamux::Config::default,
        )?
        .with_quic()
        .with_behaviour(|key| -> Result<HearthBehaviour, Box<dyn std::error::Error + Send + Sync>> {
            let local_peer_id = key.public().to_peer_id();

            // Identical payloads from the same author collapse to one message.
            let message_id_fn = |message: &gossipsub::Message| {
                let mut hasher = blake3::Hasher::new();
                hasher.update(&message.data);
                if let Some(source) = &message.source {
                    hasher.update(&source.to_bytes());
                }
                MessageId::from(hasher.finalize().to_hex().to_string())
            };

            let gossipsub_config = gossipsub::ConfigBuilder::default()
                .heartbeat_interval(Duration::from_secs(GOSSIPSUB_HEARTBEAT_SECS))
                .validation_mode(ValidationMode::Strict)
                .max_transmit_size(MAX_MESSAGE_SIZE)
                .message_id_fn(message_id_fn)
                .build()
                .map_err(|e| format!("GossipSub config: {e}"))?;

            let gossipsub = gossipsub::Behaviour::new(
                MessageAuthenticity::Signed(key.clone()),
                gossipsub_config,
            )
            .map_err(|e| format!("GossipSub init: {e}"))?;

            let mut kademlia = kad::Behaviour::new(local_peer_id, MemoryStore::new(local_peer_id));
            kademlia.set_mode(Some(kad::Mode::Server));

            let identify = identify::Behaviour::new(
                identify::Config::new(PROTOCOL_VERSION.to_string(), key.public())
                    .with_push_listen_addr_updates(true)
                    .with_interval(Duration::from_secs(60)),
            );

            Ok(HearthBehaviour {
                gossipsub,
                kademlia,
                identify,
            })
        })?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(Duration::from_secs(60)))
        .build();

    info!(peer_id = %swarm.local_peer_id(), "Built Hearth swarm");

    Ok(swarm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_is_deterministic() {
        let a = keypair_from_seed(&[7u8; 32]).unwrap();
        let b = keypair_from_seed(&[7u8; 32]).unwrap();
        let c = keypair_from_seed(&[8u8; 32]).unwrap();
        assert_eq!(a.public().to_peer_id(), b.public().to_peer_id());
        assert_ne!(a.public().to_peer_id(), c.public().to_peer_id());
    }
}
