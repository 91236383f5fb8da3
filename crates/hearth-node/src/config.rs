//! Node configuration loaded from environment variables.
//!
//! Every setting has a default so a node starts with no configuration at
//! all for local development.

use std::path::PathBuf;
use std::time::Duration;

use hearth_shared::constants::{
    DEFAULT_MAX_DOWNLOAD_ATTEMPTS, DEFAULT_QUIC_PORT, DEFAULT_RECONCILE_TIMEOUT_SECS,
    MAX_FILE_SIZE,
};
use hearth_shared::types::CommunityId;
use tracing::warn;

const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Root under which every community gets `<data_dir>/<community id>`.
    /// Env: `HEARTH_DATA_DIR`
    /// Default: the platform data directory.
    pub data_dir: PathBuf,

    /// QUIC and TCP listen port.
    /// Env: `HEARTH_LISTEN_PORT`
    /// Default: `4101`
    pub listen_port: u16,

    /// File of bootstrap multiaddrs, one per line.
    /// Env: `HEARTH_BOOTSTRAP_PEERS`
    pub bootstrap_peers_path: Option<PathBuf>,

    /// Env: `HEARTH_RECONCILE_TIMEOUT_SECS`
    /// Default: `30`
    pub reconcile_timeout: Duration,

    /// Env: `HEARTH_DOWNLOAD_TIMEOUT_SECS`
    /// Default: `120`
    pub download_timeout: Duration,

    /// Ceiling on download attempts per content id during missing-file sweeps.
    /// Env: `HEARTH_MAX_DOWNLOAD_ATTEMPTS`
    /// Default: `3`
    pub max_download_attempts: u32,

    /// Only accept messages from holders of a valid certificate.
    /// Env: `HEARTH_ENFORCE_MEMBERSHIP` (true/false)
    /// Default: `true`
    pub enforce_membership: bool,

    /// Fetch announced media without waiting for a request.
    /// Env: `HEARTH_AUTO_DOWNLOAD` (true/false)
    /// Default: `true`
    pub auto_download: bool,

    /// Env: `HEARTH_MAX_FILE_SIZE`
    /// Default: 50 MiB
    pub max_file_size: usize,

    /// Community launched at startup.
    /// Env: `HEARTH_COMMUNITY_ID`
    pub community_id: Option<CommunityId>,

    /// Root CA certificate of the startup community.
    /// Env: `HEARTH_ROOT_CA_PATH`
    pub root_ca_path: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./hearth-data"),
            listen_port: DEFAULT_QUIC_PORT,
            bootstrap_peers_path: None,
            reconcile_timeout: Duration::from_secs(DEFAULT_RECONCILE_TIMEOUT_SECS),
            download_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            max_download_attempts: DEFAULT_MAX_DOWNLOAD_ATTEMPTS,
            enforce_membership: true,
            auto_download: true,
            max_file_size: MAX_FILE_SIZE,
            community_id: None,
            root_ca_path: None,
        }
    }
}

impl NodeConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        match std::env::var("HEARTH_DATA_DIR") {
            Ok(dir) => config.data_dir = PathBuf::from(dir),
            Err(_) => match hearth_store::database::default_data_dir() {
                Ok(dir) => config.data_dir = dir,
                Err(e) => warn!(error = %e, "No platform data dir, using ./hearth-data"),
            },
        }

        if let Some(port) = parse_var::<u16>("HEARTH_LISTEN_PORT") {
            config.listen_port = port;
        }

        if let Ok(path) = std::env::var("HEARTH_BOOTSTRAP_PEERS") {
            config.bootstrap_peers_path = Some(PathBuf::from(path));
        }

        if let Some(secs) = parse_var::<u64>("HEARTH_RECONCILE_TIMEOUT_SECS") {
            config.reconcile_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_var::<u64>("HEARTH_DOWNLOAD_TIMEOUT_SECS") {
            config.download_timeout = Duration::from_secs(secs);
        }

        if let Some(n) = parse_var::<u32>("HEARTH_MAX_DOWNLOAD_ATTEMPTS") {
            config.max_download_attempts = n;
        }

        if let Ok(val) = std::env::var("HEARTH_ENFORCE_MEMBERSHIP") {
            config.enforce_membership = parse_flag(&val);
        }

        if let Ok(val) = std::env::var("HEARTH_AUTO_DOWNLOAD") {
            config.auto_download = parse_flag(&val);
        }

        if let Some(size) = parse_var::<usize>("HEARTH_MAX_FILE_SIZE") {
            config.max_file_size = size;
        }

        if let Ok(id) = std::env::var("HEARTH_COMMUNITY_ID") {
            if !id.trim().is_empty() {
                config.community_id = Some(CommunityId::new(id.trim()));
            }
        }

        if let Ok(path) = std::env::var("HEARTH_ROOT_CA_PATH") {
            config.root_ca_path = Some(PathBuf::from(path));
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }

    /// Options for every community this node launches.
    pub fn storage_options(&self) -> StorageOptions {
        StorageOptions {
            create_paths: true,
            enforce_membership: self.enforce_membership,
            auto_download: self.auto_download,
            reconcile_timeout: self.reconcile_timeout,
            download_timeout: self.download_timeout,
            max_download_attempts: self.max_download_attempts,
            max_file_size: self.max_file_size,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = %raw, "Invalid value, using default");
            None
        }
    }
}

fn parse_flag(val: &str) -> bool {
    val != "false" && val != "0"
}

/// Per-community engine options.
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Create the database and block directories up front. When unset the
    /// backends create them on first use.
    pub create_paths: bool,
    pub enforce_membership: bool,
    pub auto_download: bool,
    pub reconcile_timeout: Duration,
    pub download_timeout: Duration,
    pub max_download_attempts: u32,
    pub max_file_size: usize,
}

impl Default for StorageOptions {
    fn default() -> Self {
        NodeConfig::default().storage_options()
    }
}
