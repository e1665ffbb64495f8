//! Tests for the static file responder used for pass-through requests

use devproxy::config::StaticConfig;
use devproxy::http::request::{Method, Request, RequestBuilder};
use devproxy::http::response::StatusCode;
use devproxy::server::static_files::{Resolved, StaticFiles};
use std::path::PathBuf;

/// Creates a throwaway site root with an index, an asset and a nested page.
fn site(name: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!("devproxy-static-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&root);
    std::fs::create_dir_all(root.join("assets")).unwrap();
    std::fs::create_dir_all(root.join("docs")).unwrap();
    std::fs::write(root.join("index.html"), "<h1>app</h1>").unwrap();
    std::fs::write(root.join("assets/logo.png"), [0x89, b'P', b'N', b'G']).unwrap();
    std::fs::write(root.join("docs/index.html"), "<h1>docs</h1>").unwrap();
    std::fs::write(root.join("my file.txt"), "spaced").unwrap();
    root
}

fn files(root: &PathBuf, spa_fallback: bool) -> StaticFiles {
    StaticFiles::new(StaticConfig {
        root: root.clone(),
        index: "index.html".to_string(),
        spa_fallback,
    })
}

fn get(path: &str) -> Request {
    RequestBuilder::new().method(Method::GET).path(path).build().unwrap()
}

#[tokio::test]
async fn test_serves_asset_with_content_type() {
    let root = site("asset");
    let response = files(&root, true).serve(&get("/assets/logo.png")).await;

    assert_eq!(response.status, StatusCode::Ok);
    assert_eq!(response.header("Content-Type"), Some("image/png"));
    assert_eq!(response.body, vec![0x89, b'P', b'N', b'G']);
}

#[tokio::test]
async fn test_root_serves_index() {
    let root = site("index");
    let response = files(&root, false).serve(&get("/?v=1")).await;

    assert_eq!(response.status, StatusCode::Ok);
    assert_eq!(response.body, b"<h1>app</h1>".to_vec());
}

#[tokio::test]
async fn test_directory_serves_nested_index() {
    let root = site("nested");
    let resolved = files(&root, false).resolve("/docs/").await;

    assert_eq!(resolved, Resolved::File(root.join("docs").join("index.html")));
}

#[tokio::test]
async fn test_percent_encoded_path() {
    let root = site("encoded");
    let response = files(&root, false).serve(&get("/my%20file.txt")).await;

    assert_eq!(response.status, StatusCode::Ok);
    assert_eq!(response.body, b"spaced".to_vec());
}

#[tokio::test]
async fn test_spa_fallback_for_client_routes() {
    let root = site("spa");
    let response = files(&root, true).serve(&get("/dashboard/settings")).await;

    assert_eq!(response.status, StatusCode::Ok);
    assert_eq!(response.body, b"<h1>app</h1>".to_vec());
}

#[tokio::test]
async fn test_missing_asset_is_not_found_even_with_fallback() {
    let root = site("missing");
    let response = files(&root, true).serve(&get("/assets/missing.js")).await;

    assert_eq!(response.status, StatusCode::NotFound);
}

#[tokio::test]
async fn test_client_route_without_fallback_is_not_found() {
    let root = site("nofallback");
    let response = files(&root, false).serve(&get("/dashboard")).await;

    assert_eq!(response.status, StatusCode::NotFound);
}

#[tokio::test]
async fn test_traversal_is_forbidden() {
    let root = site("traversal");
    let static_files = files(&root, true);

    assert_eq!(static_files.serve(&get("/../etc/passwd")).await.status, StatusCode::Forbidden);
    assert_eq!(static_files.serve(&get("/assets/%2e%2e/%2e%2e/x")).await.status, StatusCode::Forbidden);
}

#[tokio::test]
async fn test_malformed_escape_is_bad_request() {
    let root = site("badescape");
    let response = files(&root, true).serve(&get("/bad%zzpath")).await;

    assert_eq!(response.status, StatusCode::BadRequest);
}

#[tokio::test]
async fn test_post_is_method_not_allowed() {
    let root = site("post");
    let request = RequestBuilder::new()
        .method(Method::POST)
        .path("/index.html")
        .build()
        .unwrap();
    let response = files(&root, true).serve(&request).await;

    assert_eq!(response.status, StatusCode::MethodNotAllowed);
    assert_eq!(response.header("Allow"), Some("GET, HEAD"));
}
