use std::path::PathBuf;

/// Runtime configuration, read from `FERRY_*` environment variables.
///
/// Tests construct this directly instead of going through the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Root directory for per-session staged chunks.
    pub staging_dir: PathBuf,
    /// Directory holding completed artifacts.
    pub download_dir: PathBuf,
    /// Advertised chunk size; also the enforced per-chunk upper bound.
    pub chunk_size: u64,
    /// Maximum number of live upload sessions.
    pub max_sessions: usize,
    /// Idle time after which a session is expired.
    pub session_timeout_secs: u64,
    /// Reaper sweep period.
    pub reap_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("FERRY_HOST").unwrap_or(defaults.host),
            port: env_parsed("FERRY_PORT").unwrap_or(defaults.port),
            staging_dir: std::env::var("FERRY_STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.staging_dir),
            download_dir: std::env::var("FERRY_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.download_dir),
            chunk_size: env_parsed("FERRY_CHUNK_SIZE").unwrap_or(defaults.chunk_size),
            max_sessions: env_parsed("FERRY_MAX_SESSIONS").unwrap_or(defaults.max_sessions),
            session_timeout_secs: env_parsed("FERRY_SESSION_TIMEOUT_SECS")
                .unwrap_or(defaults.session_timeout_secs),
            reap_interval_secs: env_parsed("FERRY_REAP_INTERVAL_SECS")
                .unwrap_or(defaults.reap_interval_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
            staging_dir: "./data/staging".into(),
            download_dir: "./data/downloads".into(),
            chunk_size: 100 * 1024 * 1024,
            max_sessions: 256,
            session_timeout_secs: 3600,
            reap_interval_secs: 300,
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
