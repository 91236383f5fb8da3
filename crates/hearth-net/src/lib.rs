// Transport capability for Hearth: a publish/subscribe interface, an
// in-memory hub for tests and a libp2p gossipsub swarm behind it.

pub mod behaviour;
pub mod discovery;
pub mod error;
pub mod memory;
pub mod peers;
pub mod pubsub;
pub mod swarm;
pub mod transport;

pub use behaviour::{HearthBehaviour, HearthEvent};
pub use discovery::load_bootstrap_peers;
pub use error::NetError;
pub use memory::{MemoryHub, MemoryPubSub};
pub use peers::{ConnectionInfo, PeerTracker};
pub use pubsub::{NetworkEvent, PubSub, SwarmPubSub};
pub use swarm::{spawn_swarm, SwarmCommand, SwarmConfig, SwarmNotification};
pub use transport::{build_swarm, keypair_from_seed};
