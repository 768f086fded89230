#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tower::ServiceExt;

use devbench_core::config::AppConfig;
use devbench_core::project::{Framework, Project};
use devbench_core::server::AppContext;

/// Config rooted in a temp dir; dependency install is off so no npm is needed
pub fn test_config(data_dir: &Path) -> AppConfig {
    let mut config = AppConfig::with_data_dir(data_dir);
    config.generator.install_dependencies = false;
    config.logs.persist = true;
    config
}

/// Register a project whose directory already exists on disk
pub async fn seed_project(ctx: &AppContext, id: &str, framework: Framework) -> PathBuf {
    let root = ctx.config.storage.projects_dir().join(id);
    std::fs::create_dir_all(root.join("src")).unwrap();
    std::fs::write(root.join("package.json"), "{\"name\":\"demo\"}").unwrap();
    std::fs::write(root.join("src/main.ts"), "console.log('hi');\n").unwrap();
    ctx.app_state.write().await.add_project(Project::new(
        id.to_string(),
        "demo".to_string(),
        None,
        framework,
        root.clone(),
    ));
    root
}

/// Write an executable shell script into `dir`
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

pub fn dir_is_empty(dir: &Path) -> bool {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

/// `kill -0` 成功且不是僵尸进程
#[cfg(unix)]
pub fn process_alive(pid: &str) -> bool {
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        return !stat
            .rsplit(')')
            .next()
            .map(|rest| rest.trim_start().starts_with('Z'))
            .unwrap_or(false);
    }
    std::process::Command::new("kill")
        .args(["-0", pid])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
