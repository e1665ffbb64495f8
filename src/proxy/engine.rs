//! Proxy rule evaluation
//!
//! Maps an inbound request path to either a forward decision or
//! pass-through. Evaluation is pure: the rule set is fixed at construction,
//! so the engine can be shared across connection tasks without locking.

use crate::config::{ConfigError, ServerConfig};
use crate::http::request::Request;
use crate::proxy::rule::RoutingRule;
use url::Url;

/// Where and how to forward a matched request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardDecision {
    pub target: Url,
    pub rewritten_path: String,
    pub change_origin: bool,
}

/// Outcome of evaluating a request against the rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Forward upstream
    Forward(ForwardDecision),
    /// No rule applies, serve locally
    PassThrough,
}

/// Ordered, immutable set of proxy rules. First match wins.
#[derive(Debug, Clone, Default)]
pub struct ProxyRuleEngine {
    rules: Vec<RoutingRule>,
}

impl ProxyRuleEngine {
    pub fn new(rules: Vec<RoutingRule>) -> Self {
        Self { rules }
    }

    /// Compile every `server.proxy` entry, failing on the first invalid one.
    pub fn from_config(config: &ServerConfig) -> Result<Self, ConfigError> {
        let mut rules: Vec<RoutingRule> = Vec::with_capacity(config.proxy.len());

        for (prefix, options) in &config.proxy {
            if rules.iter().any(|r| &r.prefix == prefix) {
                return Err(ConfigError::InvalidPrefix {
                    prefix: prefix.clone(),
                    reason: "duplicate prefix",
                });
            }
            rules.push(RoutingRule::compile(prefix, options)?);
        }

        // A prefix listed after a shorter one it extends can never match
        for (i, rule) in rules.iter().enumerate() {
            if let Some(earlier) = rules[..i].iter().find(|r| rule.prefix.starts_with(&r.prefix)) {
                tracing::warn!(
                    prefix = %rule.prefix,
                    shadowed_by = %earlier.prefix,
                    "Proxy rule is unreachable"
                );
            }
        }

        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First rule whose prefix is a literal prefix of `path`.
    pub fn match_path(&self, path: &str) -> Option<&RoutingRule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }

    /// Apply a matched rule to `path`.
    pub fn apply(rule: &RoutingRule, path: &str) -> ForwardDecision {
        ForwardDecision {
            target: rule.target.clone(),
            rewritten_path: rule.rewrite.apply(&rule.prefix, path),
            change_origin: rule.change_origin,
        }
    }

    pub fn handle_path(&self, path: &str) -> Decision {
        match self.match_path(path) {
            Some(rule) => Decision::Forward(Self::apply(rule, path)),
            None => Decision::PassThrough,
        }
    }

    pub fn handle(&self, request: &Request) -> Decision {
        self.handle_path(&request.path)
    }
}
