use devproxy::config::{Config, ConfigError, ProxyOptions, RewriteConfig, RewriteKeyword};
use devproxy::proxy::ProxyRuleEngine;
use std::path::Path;

const DEV_CONFIG: &str = r#"
server:
  host: 0.0.0.0
  port: 5173
  proxy:
    /api:
      target: http://be:8000
      changeOrigin: true
      rewrite:
        pattern: "^/api"
        replacement: ""
"#;

#[test]
fn test_config_defaults() {
    let cfg = Config::default();
    assert_eq!(cfg.server.host, "localhost");
    assert_eq!(cfg.server.port, 5173);
    assert!(cfg.server.proxy.is_empty());
    assert_eq!(cfg.server.proxy_timeouts.connect_ms, 5_000);
    assert_eq!(cfg.server.proxy_timeouts.request_ms, 30_000);
    assert_eq!(cfg.static_files.index, "index.html");
    assert!(cfg.static_files.spa_fallback);
}

#[test]
fn test_config_empty_document_is_default() {
    let cfg = Config::from_yaml_str("").unwrap();
    assert_eq!(cfg.server.listen_addr(), "localhost:5173");
}

#[test]
fn test_config_parses_dev_server_file() {
    let cfg = Config::from_yaml_str(DEV_CONFIG).unwrap();

    assert_eq!(cfg.server.listen_addr(), "0.0.0.0:5173");
    assert_eq!(cfg.server.proxy.len(), 1);

    let (prefix, options) = &cfg.server.proxy[0];
    assert_eq!(prefix, "/api");
    assert_eq!(options.target, "http://be:8000");
    assert!(options.change_origin);
    assert_eq!(
        options.rewrite,
        RewriteConfig::Pattern {
            pattern: "^/api".to_string(),
            replacement: String::new(),
        }
    );
}

#[test]
fn test_config_proxy_order_preserved() {
    let yaml = r#"
server:
  proxy:
    /zeta: http://z:1
    /alpha: http://a:1
    /mid: http://m:1
"#;
    let cfg = Config::from_yaml_str(yaml).unwrap();
    let prefixes: Vec<&str> = cfg.server.proxy.iter().map(|(p, _)| p.as_str()).collect();
    assert_eq!(prefixes, vec!["/zeta", "/alpha", "/mid"]);
}

#[test]
fn test_config_string_shorthand() {
    let yaml = r#"
server:
  proxy:
    /foo: http://localhost:4567
"#;
    let cfg = Config::from_yaml_str(yaml).unwrap();
    assert_eq!(cfg.server.proxy[0].1, ProxyOptions::new("http://localhost:4567"));
}

#[test]
fn test_config_rewrite_keywords() {
    let yaml = r#"
server:
  proxy:
    /a:
      target: http://a:1
      rewrite: strip_prefix
    /b:
      target: http://b:1
      rewrite: identity
    /c:
      target: http://c:1
"#;
    let cfg = Config::from_yaml_str(yaml).unwrap();
    let rewrites: Vec<&RewriteConfig> = cfg.server.proxy.iter().map(|(_, o)| &o.rewrite).collect();

    assert_eq!(rewrites[0], &RewriteConfig::Keyword(RewriteKeyword::StripPrefix));
    assert_eq!(rewrites[1], &RewriteConfig::Keyword(RewriteKeyword::Identity));
    assert_eq!(rewrites[2], &RewriteConfig::Keyword(RewriteKeyword::Identity));
}

#[test]
fn test_config_timeouts_and_static() {
    let yaml = r#"
server:
  proxyTimeouts:
    connectMs: 250
    requestMs: 1000
static:
  root: ./dist
  spaFallback: false
"#;
    let cfg = Config::from_yaml_str(yaml).unwrap();

    assert_eq!(cfg.server.proxy_timeouts.connect().as_millis(), 250);
    assert_eq!(cfg.server.proxy_timeouts.request().as_millis(), 1000);
    assert_eq!(cfg.static_files.root, Path::new("./dist"));
    assert!(!cfg.static_files.spa_fallback);
    assert_eq!(cfg.static_files.index, "index.html");
}

#[test]
fn test_config_ipv6_listen_addr() {
    let cfg = Config::from_yaml_str("server:\n  host: \"::\"\n  port: 3000\n").unwrap();
    assert_eq!(cfg.server.listen_addr(), "[::]:3000");
}

#[test]
fn test_config_malformed_yaml() {
    let result = Config::from_yaml_str("server:\n  port: not-a-port\n");
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[test]
fn test_config_explicit_missing_file_fails() {
    let result = Config::load(Some(Path::new("/nonexistent/devproxy.yaml")));
    assert!(matches!(result, Err(ConfigError::Io { .. })));
}

#[test]
fn test_config_loads_file() {
    let path = std::env::temp_dir().join(format!("devproxy-config-{}.yaml", std::process::id()));
    std::fs::write(&path, DEV_CONFIG).unwrap();

    let cfg = Config::load(Some(&path)).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(cfg.server.port, 5173);
    assert_eq!(cfg.server.proxy[0].0, "/api");
}

fn compile(yaml: &str) -> Result<ProxyRuleEngine, ConfigError> {
    Config::from_yaml_str(yaml).and_then(|cfg| ProxyRuleEngine::from_config(&cfg.server))
}

#[test]
fn test_config_rejects_prefix_without_slash() {
    let result = compile("server:\n  proxy:\n    api: http://be:8000\n");
    assert!(matches!(result, Err(ConfigError::InvalidPrefix { .. })));
}

#[test]
fn test_config_rejects_empty_prefix() {
    let result = compile("server:\n  proxy:\n    \"\": http://be:8000\n");
    assert!(matches!(result, Err(ConfigError::InvalidPrefix { .. })));
}

#[test]
fn test_config_rejects_duplicate_prefix() {
    let result = compile("server:\n  proxy:\n    /api: http://a:1\n    /api: http://b:1\n");
    // Either the YAML layer or rule compilation may reject the repeat
    assert!(matches!(
        result,
        Err(ConfigError::InvalidPrefix { reason: "duplicate prefix", .. }) | Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_config_rejects_unparseable_target() {
    let result = compile("server:\n  proxy:\n    /api: not a url\n");
    assert!(matches!(result, Err(ConfigError::InvalidTarget { .. })));
}

#[test]
fn test_config_rejects_https_target() {
    let result = compile("server:\n  proxy:\n    /api: https://be:8443\n");
    match result {
        Err(ConfigError::InvalidTarget { reason, .. }) => assert!(reason.contains("https")),
        other => panic!("expected InvalidTarget, got {:?}", other),
    }
}

#[test]
fn test_config_rejects_bad_regex() {
    let yaml = r#"
server:
  proxy:
    /api:
      target: http://be:8000
      rewrite:
        pattern: "^/api("
"#;
    let result = compile(yaml);
    assert!(matches!(result, Err(ConfigError::InvalidRewrite { .. })));
}
