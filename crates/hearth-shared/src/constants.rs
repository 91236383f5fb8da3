/// Protocol version string for libp2p identify
pub const PROTOCOL_VERSION: &str = "/hearth/1.0.0";

/// Application name
pub const APP_NAME: &str = "hearth";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Ed25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Maximum peer protocol envelope size in bytes (1 MiB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Default maximum file size accepted for upload/download (50 MiB)
pub const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

/// GossipSub heartbeat interval in seconds
pub const GOSSIPSUB_HEARTBEAT_SECS: u64 = 1;

/// Default QUIC listen port
pub const DEFAULT_QUIC_PORT: u16 = 4101;

/// Subdirectory of a community root holding the replicated database.
pub const REPLICATED_DB_DIR: &str = "LogDb";

/// Subdirectory of a community root holding the content-addressed blocks.
pub const BLOCK_REPO_DIR: &str = "Blocks";

/// Subdirectory of a community root where completed downloads are written.
pub const DOWNLOADS_DIR: &str = "Downloads";

/// File name of the SQLite database inside [`REPLICATED_DB_DIR`].
pub const DB_FILE_NAME: &str = "log.db";

/// Length of a hex-encoded direct-message public key announced by a DM user.
pub const DM_USER_PUBKEY_HEX_LEN: usize = 66;

/// Length of a hex-encoded Diffie-Hellman half key.
pub const DM_HALF_KEY_HEX_LEN: usize = 64;

/// Length of a hex-encoded conversation public key.
pub const CONVERSATION_PUBKEY_HEX_LEN: usize = 64;

/// Shortest base64 payload accepted as a direct message ciphertext.
pub const MIN_DIRECT_MESSAGE_LEN: usize = 364;

/// Default wait for a reconciliation response, in seconds.
pub const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 30;

/// Default ceiling on download attempts per content id.
pub const DEFAULT_MAX_DOWNLOAD_ATTEMPTS: u32 = 3;

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_CONVERSATION_KEY: &str = "hearth-conversation-key-v1";
pub const KDF_CONTEXT_CHANNEL_ADDRESS: &str = "hearth-channel-address-v1";
