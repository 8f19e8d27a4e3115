//! Server configuration

use std::time::Duration;

/// Server configuration options
///
/// Defaults match a bare deployment; `from_env` layers the recognized
/// environment variables on top.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen port for the WebSocket and HTTP surface
    pub port: u16,

    /// Shared state store host
    pub redis_host: String,

    /// Shared state store port
    pub redis_port: u16,

    /// Shared state store password, when required
    pub redis_password: Option<String>,

    /// Durable snapshot store; snapshotting is skipped when unset
    pub mongodb_uri: Option<String>,

    /// Base inactivity timeout before an idle room is evicted
    pub inactive_timeout: Duration,

    /// Floor of the extended timeout applied while a video is playing
    pub min_video_timeout: Duration,

    /// Multiplier on the playing video's duration for the extended timeout
    pub video_duration_multiplier: u32,

    /// Store room passwords as one-way hashes instead of plaintext
    pub encrypted_passwords: bool,

    /// Cap on each room's history queue (unbounded when `None`)
    pub history_limit: Option<usize>,

    /// Idle timeout on a client transport
    pub idle_timeout: Duration,

    /// Ceiling on one catalog call
    pub probe_timeout: Duration,

    /// Interval of the inactivity/orphan sweep
    pub sweep_interval: Duration,

    /// Interval of the durable snapshot job
    pub snapshot_interval: Duration,

    /// Interval of the reverse sync from the durable store
    pub sync_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            redis_host: "127.0.0.1".to_string(),
            redis_port: 6379,
            redis_password: None,
            mongodb_uri: None,
            inactive_timeout: Duration::from_secs(300),
            min_video_timeout: Duration::from_secs(2 * 60 * 60),
            video_duration_multiplier: 5,
            encrypted_passwords: false,
            history_limit: None,
            idle_timeout: Duration::from_secs(960),
            probe_timeout: Duration::from_secs(8),
            sweep_interval: Duration::from_secs(600),
            snapshot_interval: Duration::from_secs(600),
            sync_interval: Duration::from_secs(3600),
        }
    }
}

impl ServerConfig {
    /// Build a config from the environment, falling back to defaults for
    /// anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(port) = env_parse::<u16>("PORT") {
            config.port = port;
        }
        if let Ok(host) = std::env::var("REDIS_HOST") {
            config.redis_host = host;
        }
        if let Some(port) = env_parse::<u16>("REDIS_PORT") {
            config.redis_port = port;
        }
        if let Ok(password) = std::env::var("REDIS_PASSWORD") {
            if !password.is_empty() {
                config.redis_password = Some(password);
            }
        }
        if let Ok(uri) = std::env::var("MONGODB_URI") {
            if !uri.is_empty() {
                config.mongodb_uri = Some(uri);
            }
        }
        if let Some(secs) = env_parse::<u64>("INACTIVE_TIMEOUT") {
            config.inactive_timeout = Duration::from_secs(secs);
        }
        if let Some(hours) = env_parse::<u64>("MIN_VIDEO_TIMEOUT_HOURS") {
            config.min_video_timeout = Duration::from_secs(hours * 60 * 60);
        }
        if let Some(multiplier) = env_parse::<u32>("VIDEO_DURATION_MULTIPLIER") {
            config.video_duration_multiplier = multiplier;
        }
        if let Ok(flag) = std::env::var("IS_ENCRYPTED_PASSWORD") {
            config.encrypted_passwords = matches!(flag.as_str(), "true" | "1");
        }

        config
    }

    /// Set the listen port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the base inactivity timeout
    pub fn inactive_timeout(mut self, timeout: Duration) -> Self {
        self.inactive_timeout = timeout;
        self
    }

    /// Cap the history queue
    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit);
        self
    }

    /// Store passwords hashed
    pub fn encrypted_passwords(mut self) -> Self {
        self.encrypted_passwords = true;
        self
    }

    /// Set the transport idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Eviction deadline for a room in the given playback state.
    ///
    /// A room actively playing a video earns an extended timeout so long
    /// features are not cut off mid-watch.
    pub fn eviction_timeout(&self, playing_duration_secs: Option<f64>) -> Duration {
        match playing_duration_secs {
            Some(duration) if duration > 0.0 => {
                let extended =
                    Duration::from_secs_f64(duration * f64::from(self.video_duration_multiplier));
                extended.max(self.min_video_timeout)
            }
            Some(_) => self.min_video_timeout,
            None => self.inactive_timeout,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|raw| raw.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.port, 8000);
        assert_eq!(config.redis_port, 6379);
        assert_eq!(config.inactive_timeout, Duration::from_secs(300));
        assert_eq!(config.min_video_timeout, Duration::from_secs(7200));
        assert_eq!(config.video_duration_multiplier, 5);
        assert!(!config.encrypted_passwords);
        assert!(config.history_limit.is_none());
        assert!(config.mongodb_uri.is_none());
        assert_eq!(config.idle_timeout, Duration::from_secs(960));
    }

    #[test]
    fn test_builder_chaining() {
        let config = ServerConfig::default()
            .port(9000)
            .inactive_timeout(Duration::from_secs(60))
            .history_limit(50)
            .encrypted_passwords();

        assert_eq!(config.port, 9000);
        assert_eq!(config.inactive_timeout, Duration::from_secs(60));
        assert_eq!(config.history_limit, Some(50));
        assert!(config.encrypted_passwords);
    }

    #[test]
    fn test_eviction_timeout_idle_room() {
        let config = ServerConfig::default();
        assert_eq!(config.eviction_timeout(None), Duration::from_secs(300));
    }

    #[test]
    fn test_eviction_timeout_short_video_hits_floor() {
        let config = ServerConfig::default();
        // 5 x 120 s is far below the 2 h floor.
        assert_eq!(
            config.eviction_timeout(Some(120.0)),
            Duration::from_secs(7200)
        );
    }

    #[test]
    fn test_eviction_timeout_long_video_scales() {
        let config = ServerConfig::default();
        // A 3 h video earns 15 h.
        assert_eq!(
            config.eviction_timeout(Some(10_800.0)),
            Duration::from_secs(54_000)
        );
    }
}
