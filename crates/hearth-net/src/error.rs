use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetError {
    #[error("Swarm command channel closed")]
    ChannelClosed,

    #[error("Peer {0} is not connected to the hub")]
    NotJoined(String),

    #[error("Swarm error: {0}")]
    Swarm(String),
}
