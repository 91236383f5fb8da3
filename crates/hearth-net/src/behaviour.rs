//! Composed libp2p `NetworkBehaviour` for Hearth nodes.
//!
//! GossipSub carries the community and channel topics, Kademlia finds
//! peers, Identify exchanges listen addresses.

use libp2p::{
    gossipsub,
    identify,
    kad::{self, store::MemoryStore},
    swarm::NetworkBehaviour,
};

/// All sub-behaviours are driven by the single swarm event loop.
/// Construction is handled by [`super::transport::build_swarm`].
#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "HearthEvent")]
pub struct HearthBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub kademlia: kad::Behaviour<MemoryStore>,
    pub identify: identify::Behaviour,
}

#[derive(Debug)]
pub enum HearthEvent {
    Gossipsub(gossipsub::Event),
    Kademlia(kad::Event),
    Identify(identify::Event),
}

impl From<gossipsub::Event> for HearthEvent {
    fn from(event: gossipsub::Event) -> Self {
        HearthEvent::Gossipsub(event)
    }
}

impl From<kad::Event> for HearthEvent {
    fn from(event: kad::Event) -> Self {
        HearthEvent::Kademlia(event)
    }
}

impl From<identify::Event> for HearthEvent {
    fn from(event: identify::Event) -> Self {
        HearthEvent::Identify(event)
    }
}
