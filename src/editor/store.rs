//! FileStore: 编辑器保存目标（项目 id + 路径 → 文本）

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

use crate::server::file_api::{self, FileApiError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid store URL: {0}")]
    InvalidUrl(String),
    #[error("Store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error(transparent)]
    File(#[from] FileApiError),
    #[error("Store task failed: {0}")]
    Task(String),
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn get(&self, project_id: &str, path: &str) -> Result<String, StoreError>;
    async fn put(&self, project_id: &str, path: &str, content: &str) -> Result<(), StoreError>;
    async fn delete(&self, project_id: &str, path: &str) -> Result<(), StoreError>;
}

/// Project directories on local disk: `<projects_dir>/<project_id>/<path>`
pub struct LocalFileStore {
    projects_dir: PathBuf,
}

impl LocalFileStore {
    pub fn new(projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            projects_dir: projects_dir.into(),
        }
    }

    fn project_root(&self, project_id: &str) -> Result<PathBuf, StoreError> {
        if project_id.is_empty()
            || project_id.contains(['/', '\\'])
            || project_id == "."
            || project_id == ".."
        {
            return Err(FileApiError::PathEscape.into());
        }
        Ok(self.projects_dir.join(project_id))
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, FileApiError> + Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn get(&self, project_id: &str, path: &str) -> Result<String, StoreError> {
        let root = self.project_root(project_id)?;
        let path = path.to_string();
        self.blocking(move || file_api::read_file(&root, &path)).await
    }

    async fn put(&self, project_id: &str, path: &str, content: &str) -> Result<(), StoreError> {
        let root = self.project_root(project_id)?;
        let (path, content) = (path.to_string(), content.to_string());
        self.blocking(move || file_api::write_file(&root, &path, &content).map(|_| ()))
            .await
    }

    async fn delete(&self, project_id: &str, path: &str) -> Result<(), StoreError> {
        let root = self.project_root(project_id)?;
        let path = path.to_string();
        self.blocking(move || file_api::delete_file(&root, &path)).await
    }
}

/// The server's `/projects/:id/file` endpoints over HTTP
pub struct RemoteFileStore {
    client: Client,
    base_url: Url,
}

#[derive(Deserialize)]
struct ContentBody {
    content: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl RemoteFileStore {
    pub fn new(base_url: &str) -> Result<Self, StoreError> {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Result<Self, StoreError> {
        let base_url = Url::parse(base_url).map_err(|e| StoreError::InvalidUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self { client, base_url })
    }

    fn file_url(&self, project_id: &str) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["projects", project_id, "file"]);
        Ok(url)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.message)
            .unwrap_or_else(|_| {
                if text.is_empty() {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                } else {
                    text
                }
            });
        Err(StoreError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::Rejected { status, .. } => *status == StatusCode::NOT_FOUND.as_u16(),
            StoreError::File(FileApiError::FileNotFound) => true,
            _ => false,
        }
    }
}

#[async_trait]
impl FileStore for RemoteFileStore {
    async fn get(&self, project_id: &str, path: &str) -> Result<String, StoreError> {
        let response = self
            .client
            .get(self.file_url(project_id)?)
            .query(&[("path", path)])
            .send()
            .await?;
        let body: ContentBody = Self::check(response).await?.json().await?;
        Ok(body.content)
    }

    async fn put(&self, project_id: &str, path: &str, content: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .put(self.file_url(project_id)?)
            .json(&json!({ "path": path, "content": content }))
            .send()
            .await?;
        Self::check(response).await.map(|_| ())
    }

    async fn delete(&self, project_id: &str, path: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(self.file_url(project_id)?)
            .query(&[("path", path)])
            .send()
            .await?;
        Self::check(response).await.map(|_| ())
    }
}
