//! Configuration types for usenet-engine

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for [`crate::UsenetEngine`]
///
/// Fields are organized into logical sub-configs for maintainability:
/// - [`download`](DownloadConfig) — directories, retry policy, decode modes
/// - [`rpc`](RpcConfig) — binary RPC control surface
/// - [`feeds`](FeedConfig) — RSS/Atom feeds and their filters
///
/// All sub-config fields are flattened for backward-compatible serialization,
/// meaning the JSON/TOML format remains unchanged (no nesting).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// NNTP server configurations (at least one required for downloading)
    pub servers: Vec<ServerConfig>,

    /// Download behavior settings
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// Binary RPC server settings
    #[serde(flatten)]
    pub rpc: RpcConfig,

    /// RSS/Atom feed configurations
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,

    /// URL fetch retry settings
    #[serde(default)]
    pub fetch: FetchConfig,
}

impl Config {
    /// Validate the configuration, returning the first problem found.
    pub fn validate(&self) -> crate::error::Result<()> {
        for server in &self.servers {
            if server.host.is_empty() {
                return Err(crate::error::Error::Config {
                    message: "server host must not be empty".to_string(),
                    key: Some("servers.host".to_string()),
                });
            }
            if server.max_connections == 0 {
                return Err(crate::error::Error::Config {
                    message: format!("server '{}' allows zero connections", server.host),
                    key: Some("servers.max_connections".to_string()),
                });
            }
        }
        for feed in &self.feeds {
            if feed.interval_minutes == 0 {
                return Err(crate::error::Error::Config {
                    message: format!("feed '{}' has a zero polling interval", feed.name),
                    key: Some("feeds.interval_minutes".to_string()),
                });
            }
        }
        Ok(())
    }
}

/// NNTP server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Stable server id used in connection statistics
    #[serde(default)]
    pub id: u32,

    /// Server hostname
    pub host: String,

    /// Server port (typically 119 for unencrypted, 563 for TLS)
    pub port: u16,

    /// Use TLS (implicit TLS, not STARTTLS)
    #[serde(default)]
    pub tls: bool,

    /// Username for authentication
    pub username: Option<String>,

    /// Password for authentication
    pub password: Option<String>,

    /// Maximum simultaneous connections to this server
    #[serde(default = "default_connections")]
    pub max_connections: u32,

    /// Failover level: 0 = primary, 1 = first backup, and so on
    #[serde(default)]
    pub level: u32,

    /// Whether the server participates in downloads
    #[serde(default = "default_true")]
    pub active: bool,

    /// Optional wildcard filter restricting which groups this server serves
    /// (e.g. `alt.binaries.*`)
    #[serde(default)]
    pub group_pattern: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            id: 0,
            host: String::new(),
            port: 119,
            tls: false,
            username: None,
            password: None,
            max_connections: default_connections(),
            level: 0,
            active: true,
            group_pattern: None,
        }
    }
}

/// What to do when a job's health drops below the critical threshold
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthAction {
    /// Ignore health entirely
    None,
    /// Pause every remaining file of the job (default)
    #[default]
    Pause,
    /// Mark the job deleted with delete-status `health`
    Delete,
}

/// Download behavior configuration (directories, retry policy, decode modes)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Destination root directory (default: "./downloads")
    #[serde(default = "default_dest_dir")]
    pub dest_dir: PathBuf,

    /// Temporary directory for per-article partials (default: "./temp")
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Append the job category as a subdirectory of `dest_dir`
    #[serde(default = "default_true")]
    pub append_category_dir: bool,

    /// Incoming NZB directory scanned by the RPC Scan command
    #[serde(default = "default_nzb_dir")]
    pub nzb_dir: PathBuf,

    /// Decode article bodies (false = raw mode, bodies stored verbatim)
    #[serde(default = "default_true")]
    pub decode: bool,

    /// Write decoded bytes directly into the final file at the part offset
    /// instead of per-article partials joined afterwards
    #[serde(default = "default_true")]
    pub direct_write: bool,

    /// Skip articles whose result file already exists on disk
    #[serde(default = "default_true")]
    pub continue_partial: bool,

    /// Download attempts per article and level (default: 3)
    #[serde(default = "default_article_retries")]
    pub retries: u32,

    /// Upper bound on connect-class retries per article (default: 10)
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    /// Seconds to sleep between article retries (default: 10)
    #[serde(default = "default_retry_interval", with = "duration_secs")]
    pub retry_interval: Duration,

    /// Re-queue an article whose decoded CRC does not match (default: false)
    #[serde(default)]
    pub retry_on_crc_error: bool,

    /// Idle I/O timeout before the watchdog asks a download to stop (default: 60 s)
    #[serde(default = "default_connection_timeout", with = "duration_secs")]
    pub connection_timeout: Duration,

    /// Grace period before the watchdog hard-terminates a download (default: 120 s)
    #[serde(default = "default_terminate_timeout", with = "duration_secs")]
    pub terminate_timeout: Duration,

    /// Global download rate limit in bytes per second (None = unlimited)
    #[serde(default)]
    pub rate_limit_bps: Option<u64>,

    /// Close pooled connections idle longer than this (default: 600 s)
    #[serde(default = "default_idle_timeout", with = "duration_secs")]
    pub connection_idle_timeout: Duration,

    /// Rename incomplete output files to `<name>_broken`
    #[serde(default)]
    pub rename_broken: bool,

    /// Append a `"<filename> (<ok>/<total>)"` line to `_brokenlog.txt` for
    /// incomplete files
    #[serde(default = "default_true")]
    pub broken_log: bool,

    /// Policy applied when a job drops below critical health
    #[serde(default)]
    pub health_action: HealthAction,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            dest_dir: default_dest_dir(),
            temp_dir: default_temp_dir(),
            append_category_dir: true,
            nzb_dir: default_nzb_dir(),
            decode: true,
            direct_write: true,
            continue_partial: true,
            retries: default_article_retries(),
            connect_retries: default_connect_retries(),
            retry_interval: default_retry_interval(),
            retry_on_crc_error: false,
            connection_timeout: default_connection_timeout(),
            terminate_timeout: default_terminate_timeout(),
            rate_limit_bps: None,
            connection_idle_timeout: default_idle_timeout(),
            rename_broken: false,
            broken_log: true,
            health_action: HealthAction::default(),
        }
    }
}

/// Binary RPC server settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Bind address for the RPC listener (default: 127.0.0.1:6791)
    #[serde(default = "default_rpc_bind")]
    pub rpc_bind: SocketAddr,

    /// Username expected in every request header
    #[serde(default = "default_rpc_username")]
    pub rpc_username: String,

    /// Password expected in every request header
    #[serde(default)]
    pub rpc_password: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            rpc_bind: default_rpc_bind(),
            rpc_username: default_rpc_username(),
            rpc_password: String::new(),
        }
    }
}

/// One RSS/Atom feed to poll
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Display name
    pub name: String,

    /// Feed URL
    pub url: String,

    /// Polling interval in minutes (default: 15)
    #[serde(default = "default_feed_interval")]
    pub interval_minutes: u64,

    /// Filter expression (see the feed filter DSL); empty accepts everything
    #[serde(default)]
    pub filter: String,

    /// Add matched items in paused state
    #[serde(default)]
    pub pause_nzb: bool,

    /// Category assigned to matched items unless the filter overrides it
    #[serde(default)]
    pub category: String,

    /// Priority assigned to matched items unless the filter overrides it
    #[serde(default)]
    pub priority: i32,

    /// Days to remember feed items after they leave the feed (default: 7)
    #[serde(default = "default_feed_history_days")]
    pub history_days: u32,
}

/// URL fetch retry settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Download attempts (default: 3)
    #[serde(default = "default_article_retries")]
    pub retries: u32,

    /// Upper bound on connect-class attempts (default: 10)
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    /// Seconds between attempts (default: 10)
    #[serde(default = "default_retry_interval", with = "duration_secs")]
    pub retry_interval: Duration,

    /// Add random jitter to retry delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            retries: default_article_retries(),
            connect_retries: default_connect_retries(),
            retry_interval: default_retry_interval(),
            jitter: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_connections() -> u32 {
    4
}

fn default_dest_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_nzb_dir() -> PathBuf {
    PathBuf::from("./nzb")
}

fn default_article_retries() -> u32 {
    3
}

fn default_connect_retries() -> u32 {
    10
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_terminate_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_rpc_bind() -> SocketAddr {
    "127.0.0.1:6791".parse().unwrap_or_else(|_| {
        SocketAddr::from(([127, 0, 0, 1], 6791))
    })
}

fn default_rpc_username() -> String {
    "nzbget".to_string()
}

fn default_feed_interval() -> u64 {
    15
}

fn default_feed_history_days() -> u32 {
    7
}

/// Serde helper for serializing Duration as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn one_server() -> ServerConfig {
        ServerConfig {
            host: "news.example.com".to_string(),
            port: 563,
            tls: true,
            ..Default::default()
        }
    }

    #[test]
    fn default_config_validates() {
        let config = Config::default();
        config.validate().expect("empty default config must be valid");
    }

    #[test]
    fn server_with_empty_host_is_rejected() {
        let config = Config {
            servers: vec![ServerConfig::default()],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("host"), "got: {err}");
    }

    #[test]
    fn server_with_zero_connections_is_rejected() {
        let mut server = one_server();
        server.max_connections = 0;
        let config = Config {
            servers: vec![server],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn feed_with_zero_interval_is_rejected() {
        let config = Config {
            feeds: vec![FeedConfig {
                name: "indexer".to_string(),
                url: "https://example.com/rss".to_string(),
                interval_minutes: 0,
                filter: String::new(),
                pause_nzb: false,
                category: String::new(),
                priority: 0,
                history_days: 7,
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn retry_interval_round_trips_through_serde_as_seconds() {
        let config = Config {
            servers: vec![one_server()],
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(
            parsed.download.retry_interval,
            config.download.retry_interval,
            "durations must survive a serialize/deserialize round trip"
        );
    }

    #[test]
    fn defaults_match_documented_values() {
        let dl = DownloadConfig::default();
        assert_eq!(dl.retries, 3);
        assert_eq!(dl.retry_interval, Duration::from_secs(10));
        assert!(dl.direct_write);
        assert!(dl.decode);
        assert!(!dl.retry_on_crc_error);
        assert_eq!(dl.health_action, HealthAction::Pause);
    }
}
