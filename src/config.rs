//! Server configuration.
//!
//! One [`ServerConfig`] is built at startup and handed to the server, which
//! owns it for the rest of the run. Values are layered:
//!
//! ```text
//! ServerConfig::default()  ←  scudder.toml (--config / SCUDDER_CONFIG)  ←  CLI flags
//! ```
//!
//! The file is deserialized straight onto the defaults; CLI flags are
//! applied field by field in `main`.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! gallery = "."               # Directory of images to share
//! bind = "0.0.0.0"            # Listen address
//! port = 8080                 # Listen port (0 = pick a free port)
//! # cache_dir = "/tmp/scudder" # Where indices and tallies live
//! allow = []                  # Addresses, hostnames or CIDR networks to admit
//! deny = []                   # Addresses, hostnames or CIDR networks to reject
//! read_timeout_secs = 30      # Drop connections idle for this long
//! # max_connections = 32      # Concurrent connections (omit for auto)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("Gallery path does not exist: {0}")]
    GalleryNotFound(PathBuf),
}

/// Connections handled concurrently per available core when
/// `max_connections` is not set.
const CONNECTIONS_PER_CORE: usize = 4;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Directory of images to share.
    pub gallery: PathBuf,
    /// Listen address.
    pub bind: String,
    /// Listen port. 0 lets the OS pick one.
    pub port: u16,
    /// Cache root for indices and tallies. Defaults to [`default_cache_dir`].
    pub cache_dir: Option<PathBuf>,
    /// Allow rules: IP, hostname, or CIDR network.
    pub allow: Vec<String>,
    /// Deny rules: IP, hostname, or CIDR network. Deny beats allow.
    pub deny: Vec<String>,
    /// Socket read timeout per connection.
    pub read_timeout_secs: u64,
    /// Maximum connections served at once. Omit for auto.
    pub max_connections: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            gallery: PathBuf::from("."),
            bind: "0.0.0.0".to_string(),
            port: 8080,
            cache_dir: None,
            allow: Vec::new(),
            deny: Vec::new(),
            read_timeout_secs: 30,
            max_connections: None,
        }
    }
}

impl ServerConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "read_timeout_secs must be at least 1".into(),
            ));
        }
        if self.max_connections == Some(0) {
            return Err(ConfigError::Validation(
                "max_connections must be at least 1".into(),
            ));
        }
        if self.bind.trim().is_empty() {
            return Err(ConfigError::Validation("bind must not be empty".into()));
        }
        Ok(())
    }

    /// Check that the gallery exists. Separate from [`validate`](Self::validate)
    /// because the gallery is usually supplied on the command line, after the
    /// config file has been read.
    pub fn validate_gallery(&self) -> Result<(), ConfigError> {
        if !self.gallery.is_dir() {
            return Err(ConfigError::GalleryNotFound(self.gallery.clone()));
        }
        Ok(())
    }

    /// Cache root in effect: the configured one or [`default_cache_dir`].
    pub fn cache_root(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }
}

/// Per-user cache root: `<user cache dir>/scudder`, falling back to a
/// per-user directory under the system temp dir.
pub fn default_cache_dir() -> PathBuf {
    match dirs::cache_dir() {
        Some(dir) => dir.join("scudder"),
        None => {
            let user = std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| "default".to_string());
            std::env::temp_dir().join(format!("scudder-{user}"))
        }
    }
}

/// Resolve the effective connection limit from config.
///
/// - `None` → `CONNECTIONS_PER_CORE` per available core
/// - `Some(n)` → `n`
pub fn effective_connections(config: &ServerConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_connections
        .unwrap_or(cores * CONNECTIONS_PER_CORE)
}

// =============================================================================
// Config loading
// =============================================================================

/// Load config from `path`, or stock defaults when no path is given.
///
/// Keys missing from the file keep their [`Default`] values through
/// `#[serde(default)]`. An explicitly named file that does not exist is an
/// error.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let config = match path {
        Some(path) => toml::from_str(&fs::read_to_string(path)?)?,
        None => ServerConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Returns a fully-commented stock `scudder.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Scudder Configuration
# =====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Load with: scudder --config scudder.toml serve
# Command-line flags override values from this file.
# Unknown keys will cause an error.

# Directory of images to share.
gallery = "."

# Address and port to listen on. Port 0 picks a free port.
bind = "0.0.0.0"
port = 8080

# Where directory indices and tallies are cached.
# Omit to use the per-user cache directory (e.g. ~/.cache/scudder).
# A tmpfs path keeps lookups fast; the cache is rebuilt on demand.
# cache_dir = "/tmp/scudder"

# ---------------------------------------------------------------------------
# Access control
# ---------------------------------------------------------------------------
# Each entry is an IP address, a hostname, or a CIDR network ("10.0.0.0/24").
# With any allow entry, only matching clients are admitted.
# A deny entry always wins over an allow entry.
allow = []
deny = []

# ---------------------------------------------------------------------------
# Connections
# ---------------------------------------------------------------------------
# Drop a connection when the client sends nothing for this many seconds.
read_timeout_secs = 30

# Connections served at once; further clients wait their turn.
# Omit or comment out to auto-detect (= 4 per CPU core).
# max_connections = 32
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = ServerConfig::default();
        assert_eq!(config.gallery, PathBuf::from("."));
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.read_timeout_secs, 30);
        assert!(config.allow.is_empty());
        assert!(config.deny.is_empty());
        assert!(config.cache_dir.is_none());
    }

    #[test]
    fn parse_partial_config() {
        let config: ServerConfig = toml::from_str(
            r#"
port = 9000
deny = ["10.0.0.5"]
"#,
        )
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.deny, vec!["10.0.0.5"]);
        assert_eq!(config.bind, "0.0.0.0");
    }

    #[test]
    fn cache_root_prefers_configured_dir() {
        let config = ServerConfig {
            cache_dir: Some(PathBuf::from("/srv/cache")),
            ..ServerConfig::default()
        };
        assert_eq!(config.cache_root(), PathBuf::from("/srv/cache"));
    }

    #[test]
    fn default_cache_dir_is_scudder_specific() {
        let dir = default_cache_dir();
        let name = dir.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("scudder"), "{}", dir.display());
    }

    // =========================================================================
    // load_config tests
    // =========================================================================

    #[test]
    fn load_config_without_file_uses_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn load_config_reads_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("scudder.toml");
        fs::write(
            &path,
            r#"
bind = "127.0.0.1"
allow = ["192.168.0.0/16", "localhost"]
max_connections = 8
"#,
        )
        .unwrap();

        let config = load_config(Some(path.as_path())).unwrap();
        assert_eq!(config.bind, "127.0.0.1");
        assert_eq!(config.allow, vec!["192.168.0.0/16", "localhost"]);
        assert_eq!(config.max_connections, Some(8));
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn load_config_missing_named_file_is_error() {
        let tmp = TempDir::new().unwrap();
        let result = load_config(Some(tmp.path().join("absent.toml").as_path()));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("scudder.toml");
        fs::write(&path, "this is not valid toml [[[").unwrap();
        assert!(matches!(load_config(Some(path.as_path())), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn unknown_key_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("scudder.toml");
        fs::write(&path, "prot = 80\n").unwrap();
        assert!(matches!(load_config(Some(path.as_path())), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn load_config_validates_values() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("scudder.toml");
        fs::write(&path, "max_connections = 0\n").unwrap();
        assert!(matches!(
            load_config(Some(path.as_path())),
            Err(ConfigError::Validation(_))
        ));
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn validate_default_config_passes() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_zero_timeout() {
        let config = ServerConfig {
            read_timeout_secs: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validate_gallery_must_exist() {
        let tmp = TempDir::new().unwrap();
        let mut config = ServerConfig {
            gallery: tmp.path().join("missing"),
            ..ServerConfig::default()
        };
        assert!(matches!(
            config.validate_gallery(),
            Err(ConfigError::GalleryNotFound(_))
        ));
        config.gallery = tmp.path().to_path_buf();
        assert!(config.validate_gallery().is_ok());
    }

    #[test]
    fn effective_connections_auto() {
        let config = ServerConfig::default();
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        assert_eq!(effective_connections(&config), cores * CONNECTIONS_PER_CORE);
    }

    #[test]
    fn effective_connections_explicit() {
        let config = ServerConfig {
            max_connections: Some(3),
            ..ServerConfig::default()
        };
        assert_eq!(effective_connections(&config), 3);
    }

    // =========================================================================
    // stock config
    // =========================================================================

    #[test]
    fn stock_config_toml_roundtrips_to_defaults() {
        let config: ServerConfig = toml::from_str(stock_config_toml()).unwrap();
        let defaults = ServerConfig::default();
        assert_eq!(config.gallery, defaults.gallery);
        assert_eq!(config.bind, defaults.bind);
        assert_eq!(config.port, defaults.port);
        assert_eq!(config.read_timeout_secs, defaults.read_timeout_secs);
        assert_eq!(config.max_connections, defaults.max_connections);
        assert_eq!(config.cache_dir, defaults.cache_dir);
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("scudder.toml");
        fs::write(&path, "").unwrap();
        let config = load_config(Some(path.as_path())).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.read_timeout_secs, 30);
    }
}
