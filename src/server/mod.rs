//! TCP listener and local request handling.

pub mod listener;
pub mod static_files;

use crate::config::{Config, ConfigError};
use crate::proxy::{ProxyHandler, ProxyRuleEngine};
use static_files::StaticFiles;

/// Everything a connection needs, built once at startup and shared by `Arc`.
#[derive(Debug)]
pub struct AppState {
    pub engine: ProxyRuleEngine,
    pub proxy: ProxyHandler,
    pub static_files: StaticFiles,
}

impl AppState {
    /// Compile the configuration, failing fast on invalid proxy rules.
    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        let engine = ProxyRuleEngine::from_config(&cfg.server)?;
        let timeouts = cfg.server.proxy_timeouts;

        Ok(Self {
            engine,
            proxy: ProxyHandler::new(timeouts.connect(), timeouts.request()),
            static_files: StaticFiles::new(cfg.static_files.clone()),
        })
    }
}
