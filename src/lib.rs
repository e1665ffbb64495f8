//! devproxy - Development server with prefix-based reverse proxy rules
//!
//! Core library for configuration, HTTP and proxy functionality.

pub mod config;
pub mod http;
pub mod proxy;
pub mod server;
