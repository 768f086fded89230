//! State persistence for projects

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Failed to read state: {0}")]
    ReadError(String),
    #[error("Failed to write state: {0}")]
    WriteError(String),
    #[error("Failed to parse state: {0}")]
    ParseError(String),
}

/// 支持的前端框架（闭集）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    Angular,
    React,
}

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::Angular => "angular",
            Framework::React => "react",
        }
    }

    /// Dev server address the framework's `npm start` listens on by default
    pub fn default_dev_url(&self) -> &'static str {
        match self {
            Framework::Angular => "http://localhost:4200",
            Framework::React => "http://localhost:3000",
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Framework {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "angular" => Ok(Framework::Angular),
            "react" => Ok(Framework::React),
            other => Err(format!("Unsupported framework '{}'", other)),
        }
    }
}

/// Project metadata. `id` and `root_path` never change after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub framework: Framework,
    pub root_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(
        id: String,
        name: String,
        description: Option<String>,
        framework: Framework,
        root_path: PathBuf,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            description,
            framework,
            root_path,
            created_at: now,
            updated_at: now,
        }
    }

    /// 任意文件写入后刷新更新时间
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// 跨 handler 共享的项目状态
pub type SharedAppState = Arc<RwLock<AppState>>;

/// Application state - persisted to JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppState {
    pub version: u32,
    pub projects: HashMap<String, Project>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            version: 1,
            projects: HashMap::new(),
            last_updated: Some(Utc::now()),
        }
    }
}

impl AppState {
    /// Load state from disk; a missing file yields an empty state
    pub fn load(path: &Path) -> Result<Self, StateError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content =
            fs::read_to_string(path).map_err(|e| StateError::ReadError(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| StateError::ParseError(e.to_string()))
    }

    /// Save state to disk (write temp file, then rename)
    pub fn save(&mut self, path: &Path) -> Result<(), StateError> {
        self.last_updated = Some(Utc::now());
        write_state(self, path)
    }

    pub fn add_project(&mut self, project: Project) {
        self.projects.insert(project.id.clone(), project);
    }

    pub fn get_project(&self, id: &str) -> Option<&Project> {
        self.projects.get(id)
    }

    pub fn get_project_mut(&mut self, id: &str) -> Option<&mut Project> {
        self.projects.get_mut(id)
    }

    pub fn remove_project(&mut self, id: &str) -> Option<Project> {
        self.projects.remove(id)
    }

    /// 按创建时间排序的项目列表
    pub fn list_projects(&self) -> Vec<&Project> {
        let mut projects: Vec<&Project> = self.projects.values().collect();
        projects.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        projects
    }
}

pub(crate) fn write_state(state: &AppState, path: &Path) -> Result<(), StateError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StateError::WriteError(e.to_string()))?;
    }

    let content =
        serde_json::to_string_pretty(state).map_err(|e| StateError::WriteError(e.to_string()))?;

    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, content).map_err(|e| StateError::WriteError(e.to_string()))?;
    fs::rename(&temp_path, path).map_err(|e| StateError::WriteError(e.to_string()))
}
