//! Reverse proxy functionality
//!
//! This module implements the development proxy: prefix rules compiled from
//! configuration, the engine that evaluates them per request, and the
//! upstream forwarder that carries out a forward decision.

pub mod engine;
pub mod rule;
pub mod upstream;

pub use engine::{Decision, ForwardDecision, ProxyRuleEngine};
pub use rule::{Rewrite, RoutingRule};
pub use upstream::{ProxyError, ProxyHandler};
