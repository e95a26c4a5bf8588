use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::CacheConfig;
use crate::matcher::MatcherConfig;
use crate::provider::RetryConfig;
use crate::resolver::ResolverConfig;

const CONFIG_FILE_NAME: &str = "config.toml";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub resolver: ResolverConfig,
    pub cache: CacheConfig,
    pub matcher: MatcherConfig,
    pub providers: ProvidersConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8732".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersConfig {
    pub deezer: DeezerConfig,
    pub spotify: SpotifyConfig,
}

/// Deezer API settings (the public API needs no credentials)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeezerConfig {
    pub api_base: String,
    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
    pub retry: RetryConfig,
}

impl Default for DeezerConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.deezer.com".to_string(),
            timeout_ms: 4000,
            retry: RetryConfig::default(),
        }
    }
}

/// Spotify API settings. Client credentials may come from the environment
/// (`SPOTIFY_CLIENT_ID` / `SPOTIFY_CLIENT_SECRET`) instead of the file so
/// secrets stay out of version-controlled configs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    pub api_base: String,
    pub auth_base: String,
    pub client_id: String,
    pub client_secret: String,
    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
    pub retry: RetryConfig,
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.spotify.com".to_string(),
            auth_base: "https://accounts.spotify.com".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            timeout_ms: 4000,
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Default configuration file path under the platform config directory
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("tracklink");

        Ok(config_dir.join(CONFIG_FILE_NAME))
    }

    /// Load configuration: explicit path if given, otherwise the platform
    /// config directory, otherwise built-in defaults. Spotify credentials
    /// from the environment override whatever the file says.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::config_path() {
                Ok(default_path) if default_path.exists() => Self::from_file(&default_path)?,
                _ => Config::default(),
            },
        };

        if let Ok(client_id) = std::env::var("SPOTIFY_CLIENT_ID") {
            config.providers.spotify.client_id = client_id;
        }
        if let Ok(client_secret) = std::env::var("SPOTIFY_CLIENT_SECRET") {
            config.providers.spotify.client_secret = client_secret;
        }

        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        toml::from_str(&contents).context("Failed to parse config file")
    }

    /// Generate example config content for documentation
    pub fn example_config() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.bind, "127.0.0.1:8732");
        assert_eq!(config.resolver.request_deadline_ms, 8000);
        assert_eq!(config.resolver.max_playlist_tracks, 100);
        assert_eq!(config.cache.capacity, 1024);
        assert_eq!(config.cache.ttl_secs, 24 * 60 * 60);
        assert_eq!(config.matcher.similarity_threshold, 0.7);
        assert_eq!(config.matcher.duration_tolerance_ms, 2000);
        assert_eq!(config.providers.deezer.api_base, "https://api.deezer.com");
        assert_eq!(config.providers.deezer.retry.max_attempts, 3);
        assert!(config.providers.spotify.client_id.is_empty());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial_toml = r#"
[server]
bind = "0.0.0.0:9000"

[providers.spotify]
client_id = "abc"
client_secret = "def"
"#;

        let config: Config = toml::from_str(partial_toml).unwrap();

        // Custom values
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.providers.spotify.client_id, "abc");
        // Default values
        assert_eq!(config.cache.capacity, 1024);
        assert_eq!(config.providers.spotify.timeout_ms, 4000);
        assert_eq!(config.matcher.duration_tolerance_ms, 2000);
    }

    #[test]
    fn test_full_config_parsing() {
        let full_toml = r#"
[server]
bind = "0.0.0.0:8080"

[resolver]
request_deadline_ms = 5000
max_playlist_tracks = 25

[cache]
capacity = 64
ttl_secs = 3600

[matcher]
similarity_threshold = 0.8
duration_tolerance_ms = 1500

[providers.deezer]
api_base = "https://deezer.test"
timeout_ms = 2000

[providers.deezer.retry]
max_attempts = 5
base_delay_ms = 100

[providers.spotify]
api_base = "https://spotify.test"
auth_base = "https://auth.spotify.test"
client_id = "id"
client_secret = "secret"
timeout_ms = 2500
"#;

        let config: Config = toml::from_str(full_toml).unwrap();

        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.resolver.request_deadline_ms, 5000);
        assert_eq!(config.resolver.max_playlist_tracks, 25);
        assert_eq!(config.cache.capacity, 64);
        assert_eq!(config.cache.ttl_secs, 3600);
        assert_eq!(config.matcher.similarity_threshold, 0.8);
        assert_eq!(config.matcher.duration_tolerance_ms, 1500);
        assert_eq!(config.providers.deezer.api_base, "https://deezer.test");
        assert_eq!(config.providers.deezer.retry.max_attempts, 5);
        assert_eq!(config.providers.deezer.retry.base_delay_ms, 100);
        assert_eq!(config.providers.spotify.auth_base, "https://auth.spotify.test");
        assert_eq!(config.providers.spotify.timeout_ms, 2500);
    }

    #[test]
    fn test_example_config_is_valid() {
        let example = Config::example_config();
        let parsed: Result<Config, _> = toml::from_str(&example);
        assert!(parsed.is_ok(), "Example config should be valid TOML");
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let invalid_toml = "this is not valid [[ toml";
        let result: Result<Config, _> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }
}
