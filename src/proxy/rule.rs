//! Compiled proxy rules
//!
//! A `RoutingRule` is the validated, ready-to-evaluate form of one
//! `server.proxy.<prefix>` entry.

use crate::config::{ConfigError, ProxyOptions, RewriteConfig, RewriteKeyword};
use regex::Regex;
use url::Url;

/// Pure path transform applied before forwarding.
#[derive(Debug, Clone)]
pub enum Rewrite {
    /// Forward the path unchanged
    Identity,
    /// Remove one leading occurrence of the rule prefix
    StripPrefix,
    /// Replace the first match of `pattern` with `replacement`
    Regex { pattern: Regex, replacement: String },
}

impl Rewrite {
    pub fn compile(prefix: &str, config: &RewriteConfig) -> Result<Self, ConfigError> {
        match config {
            RewriteConfig::Keyword(RewriteKeyword::Identity) => Ok(Rewrite::Identity),
            RewriteConfig::Keyword(RewriteKeyword::StripPrefix) => Ok(Rewrite::StripPrefix),
            RewriteConfig::Pattern { pattern, replacement } => {
                let pattern = Regex::new(pattern).map_err(|source| ConfigError::InvalidRewrite {
                    prefix: prefix.to_string(),
                    source,
                })?;
                Ok(Rewrite::Regex {
                    pattern,
                    replacement: replacement.clone(),
                })
            }
        }
    }

    pub fn apply(&self, prefix: &str, path: &str) -> String {
        match self {
            Rewrite::Identity => path.to_string(),
            Rewrite::StripPrefix => path.strip_prefix(prefix).unwrap_or(path).to_string(),
            Rewrite::Regex { pattern, replacement } => {
                pattern.replace(path, replacement.as_str()).into_owned()
            }
        }
    }
}

/// A single prefix → upstream mapping.
#[derive(Debug, Clone)]
pub struct RoutingRule {
    /// Literal string the request path must start with
    pub prefix: String,

    /// Upstream origin
    pub target: Url,

    pub rewrite: Rewrite,

    /// Replace the Host header with the target's host
    pub change_origin: bool,
}

impl RoutingRule {
    /// Validate and compile a configured rule.
    pub fn compile(prefix: &str, options: &ProxyOptions) -> Result<Self, ConfigError> {
        if prefix.is_empty() {
            return Err(ConfigError::InvalidPrefix {
                prefix: prefix.to_string(),
                reason: "prefix must not be empty",
            });
        }
        if !prefix.starts_with('/') {
            return Err(ConfigError::InvalidPrefix {
                prefix: prefix.to_string(),
                reason: "prefix must start with '/'",
            });
        }

        let target = parse_target(prefix, &options.target)?;
        let rewrite = Rewrite::compile(prefix, &options.rewrite)?;

        Ok(Self {
            prefix: prefix.to_string(),
            target,
            rewrite,
            change_origin: options.change_origin,
        })
    }

    /// Literal string-prefix test, not path-segment aware.
    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }

    /// `host[:port]` of the target, as sent in a rewritten Host header.
    pub fn target_authority(&self) -> String {
        target_authority(&self.target)
    }
}

pub(crate) fn target_authority(target: &Url) -> String {
    let host = target.host_str().unwrap_or_default();
    match target.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

fn parse_target(prefix: &str, target: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidTarget {
        prefix: prefix.to_string(),
        target: target.to_string(),
        reason,
    };

    let url = Url::parse(target).map_err(|e| invalid(e.to_string()))?;

    if url.scheme() != "http" {
        return Err(invalid(format!(
            "unsupported scheme '{}', only http upstreams are supported",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_prefix_removes_one_occurrence() {
        let rewrite = Rewrite::StripPrefix;
        assert_eq!(rewrite.apply("/api", "/api/api/x"), "/api/x");
    }

    #[test]
    fn regex_rewrite_replaces_first_match_only() {
        let rewrite = Rewrite::compile(
            "/api",
            &RewriteConfig::Pattern {
                pattern: "^/api".to_string(),
                replacement: String::new(),
            },
        )
        .unwrap();
        assert_eq!(rewrite.apply("/api", "/api/api"), "/api");
    }

    #[test]
    fn target_authority_includes_explicit_port() {
        let rule = RoutingRule::compile("/api", &ProxyOptions::new("http://be:8000")).unwrap();
        assert_eq!(rule.target_authority(), "be:8000");

        let rule = RoutingRule::compile("/api", &ProxyOptions::new("http://be")).unwrap();
        assert_eq!(rule.target_authority(), "be");
    }
}
