//! Development server configuration
//!
//! Loaded once at startup from a YAML file and never mutated afterwards.
//! The layout mirrors the usual dev server surface:
//!
//! ```yaml
//! server:
//!   host: 0.0.0.0
//!   port: 5173
//!   proxy:
//!     /api:
//!       target: http://be:8000
//!       changeOrigin: true
//!       rewrite: strip_prefix
//! static:
//!   root: ./dist
//! ```
//!
//! Proxy entries keep the order in which they appear in the file, since the
//! first matching prefix wins.

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file used when none is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "devproxy.yaml";

/// Errors raised while loading or compiling configuration.
///
/// Any of these aborts startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid proxy prefix {prefix:?}: {reason}")]
    InvalidPrefix { prefix: String, reason: &'static str },

    #[error("invalid target {target:?} for prefix {prefix:?}: {reason}")]
    InvalidTarget {
        prefix: String,
        target: String,
        reason: String,
    },

    #[error("invalid rewrite pattern for prefix {prefix:?}: {source}")]
    InvalidRewrite {
        prefix: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,

    #[serde(rename = "static")]
    pub static_files: StaticConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Interface address to bind
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Proxy rules keyed by path prefix, in file order
    #[serde(deserialize_with = "deserialize_proxy_table")]
    pub proxy: Vec<(String, ProxyOptions)>,

    pub proxy_timeouts: TimeoutConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5173,
            proxy: Vec::new(),
            proxy_timeouts: TimeoutConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Address string suitable for `TcpListener::bind`.
    ///
    /// Bare IPv6 hosts are bracketed.
    pub fn listen_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Options for a single proxy rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyOptions {
    /// Upstream origin, e.g. `http://be:8000`
    pub target: String,

    /// Replace the Host header with the target's host
    #[serde(default)]
    pub change_origin: bool,

    #[serde(default)]
    pub rewrite: RewriteConfig,
}

impl ProxyOptions {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            change_origin: false,
            rewrite: RewriteConfig::default(),
        }
    }
}

/// Serializable form of a path rewrite.
///
/// Either a keyword (`identity`, `strip_prefix`) or a regex replacement:
///
/// ```yaml
/// rewrite:
///   pattern: "^/api"
///   replacement: ""
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RewriteConfig {
    Keyword(RewriteKeyword),
    Pattern {
        pattern: String,
        #[serde(default)]
        replacement: String,
    },
}

impl Default for RewriteConfig {
    fn default() -> Self {
        RewriteConfig::Keyword(RewriteKeyword::Identity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewriteKeyword {
    Identity,
    StripPrefix,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimeoutConfig {
    pub connect_ms: u64,
    pub request_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 5_000,
            request_ms: 30_000,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }
}

/// Static file serving for requests no proxy rule claims.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StaticConfig {
    pub root: PathBuf,
    pub index: String,
    pub spa_fallback: bool,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            index: "index.html".to_string(),
            spa_fallback: true,
        }
    }
}

impl Config {
    /// Load configuration from `path`.
    ///
    /// With no explicit path the default file is tried, and its absence
    /// yields the built-in defaults. An explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::debug!(path = %path.display(), "Loaded config file");
                Self::from_yaml_str(&contents)
            }
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(
                    path = %path.display(),
                    "No config file found, using defaults"
                );
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io { path, source }),
        }
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        // An empty document is a valid, all-defaults config
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }
}

/// Entry value under `server.proxy`: a bare target URL or full options.
#[derive(Deserialize)]
#[serde(untagged)]
enum ProxyEntry {
    Target(String),
    Options(ProxyOptions),
}

impl From<ProxyEntry> for ProxyOptions {
    fn from(entry: ProxyEntry) -> Self {
        match entry {
            ProxyEntry::Target(target) => ProxyOptions::new(target),
            ProxyEntry::Options(options) => options,
        }
    }
}

fn deserialize_proxy_table<'de, D>(deserializer: D) -> Result<Vec<(String, ProxyOptions)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ProxyTableVisitor;

    impl<'de> Visitor<'de> for ProxyTableVisitor {
        type Value = Vec<(String, ProxyOptions)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of path prefixes to proxy targets")
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut rules = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((prefix, entry)) = map.next_entry::<String, ProxyEntry>()? {
                rules.push((prefix, entry.into()));
            }
            Ok(rules)
        }
    }

    deserializer.deserialize_map(ProxyTableVisitor)
}
