use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::{INBOUND_CAP, OUTBOUND_CAP};
use crate::store::MAX_PATTERNS;

pub const MOCK_PORT_NAME: &str = "mock";
pub const DEFAULT_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_NUM_SHAFTS: u32 = 24;
pub const DEFAULT_THREAD_GROUP_SIZE: u32 = 4;

/// Where the loom is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoomPort {
    Mock,
    /// `host:port` of a serial-over-TCP bridge.
    Tcp(String),
}

impl LoomPort {
    pub fn parse(port: &str) -> Self {
        if port == MOCK_PORT_NAME {
            LoomPort::Mock
        } else {
            LoomPort::Tcp(port.to_string())
        }
    }

    pub fn is_mock(&self) -> bool {
        matches!(self, LoomPort::Mock)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LinkTimings {
    /// Purge stops once the loom has been silent this long.
    pub purge_quiet: Duration,
    /// Purge never runs longer than this, even on a chatty line.
    pub purge_ceiling: Duration,
    pub poll_interval: Duration,
    pub identity_timeout: Duration,
}

impl Default for LinkTimings {
    fn default() -> Self {
        Self {
            purge_quiet: Duration::from_millis(50),
            purge_ceiling: Duration::from_millis(500),
            poll_interval: Duration::from_millis(50),
            identity_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: LoomPort,
    pub loom_name: String,
    pub num_shafts: u32,
    pub db_path: PathBuf,
    pub reset_db: bool,
    pub addr: String,
    pub max_patterns: usize,
    pub default_thread_group_size: u32,
    pub link: LinkTimings,
    pub mock_motion: Duration,
    pub inbound_cap: usize,
    pub outbound_cap: usize,
}

impl ServerConfig {
    pub fn new(port: LoomPort, db_path: PathBuf) -> Self {
        Self {
            port,
            loom_name: "example".to_string(),
            num_shafts: DEFAULT_NUM_SHAFTS,
            db_path,
            reset_db: false,
            addr: DEFAULT_ADDR.to_string(),
            max_patterns: MAX_PATTERNS,
            default_thread_group_size: DEFAULT_THREAD_GROUP_SIZE,
            link: LinkTimings::default(),
            mock_motion: Duration::from_millis(20),
            inbound_cap: INBOUND_CAP,
            outbound_cap: OUTBOUND_CAP,
        }
    }
}

pub fn default_db_path() -> PathBuf {
    std::env::temp_dir().join("loom_server.sqlite")
}
