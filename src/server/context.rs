//! 共享上下文与错误类型

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::project::executor::{CommandExecutor, ExecError};
use crate::project::provision::{ProvisionError, Provisioner};
use crate::project::state::{AppState, SharedAppState};
use crate::project::state_saver::spawn_state_saver;
use crate::project::status::RunBoard;
use crate::server::file_api::FileApiError;
use crate::server::log_channel::{LogChannelRegistry, SharedLogChannels};
use crate::util::file_logger::OutputLogBook;

/// Handler 上下文: 所有路由共享的依赖
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub app_state: SharedAppState,
    pub save_tx: mpsc::Sender<()>,
    pub channels: SharedLogChannels,
    pub log_book: Option<Arc<OutputLogBook>>,
    pub run_board: Arc<RunBoard>,
    pub provisioner: Arc<Provisioner>,
    pub executor: CommandExecutor,
}

impl AppContext {
    /// Load persisted state and start the background savers. Must be called
    /// inside a tokio runtime.
    pub fn new(config: AppConfig) -> Self {
        let state_path = config.storage.state_path();
        let app_state = AppState::load(&state_path).unwrap_or_else(|e| {
            warn!(path = %state_path.display(), error = %e, "Failed to load state, starting empty");
            AppState::default()
        });
        info!(projects = app_state.projects.len(), "State loaded");

        let app_state: SharedAppState = Arc::new(RwLock::new(app_state));
        let save_tx = spawn_state_saver(app_state.clone(), state_path);
        let channels: SharedLogChannels = Arc::new(LogChannelRegistry::new());

        let log_book = if config.logs.persist {
            let book = OutputLogBook::new(config.storage.logs_dir());
            let removed = book.cleanup_old_logs(config.logs.retention_days);
            if removed > 0 {
                info!(removed, "Removed expired project logs");
            }
            Some(Arc::new(book))
        } else {
            None
        };

        let executor = CommandExecutor::new(app_state.clone(), channels.clone(), config.env.clone())
            .with_log_book(log_book.clone())
            .with_shell(config.server.shell.clone());

        Self {
            provisioner: Arc::new(Provisioner::new(&config)),
            config: Arc::new(config),
            app_state,
            save_tx,
            channels,
            log_book,
            run_board: Arc::new(RunBoard::new()),
            executor,
        }
    }

    /// 通知 StateSaver 持久化；队列已满说明已有待保存信号
    pub fn request_save(&self) {
        let _ = self.save_tx.try_send(());
    }

    pub async fn project_root(&self, project_id: &str) -> Result<PathBuf, AppError> {
        let state = self.app_state.read().await;
        state
            .get_project(project_id)
            .map(|p| p.root_path.clone())
            .ok_or_else(|| AppError::ProjectNotFound(project_id.to_string()))
    }
}

/// 统一应用错误类型: 序列化为 `{ "code", "message" }`
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Project '{0}' not found")]
    ProjectNotFound(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Command(ExecError),

    #[error(transparent)]
    File(#[from] FileApiError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &str {
        match self {
            AppError::ProjectNotFound(_) => "project_not_found",
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::Conflict(_) => "conflict",
            AppError::Provision(ProvisionError::InvalidName(_)) => "invalid_name",
            AppError::Provision(_) => "provision_failed",
            AppError::Command(_) => "command_failed",
            AppError::File(FileApiError::PathEscape | FileApiError::PathTooLong) => "invalid_path",
            AppError::File(FileApiError::FileNotFound) => "file_not_found",
            AppError::File(_) => "file_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ProjectNotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Provision(ProvisionError::InvalidName(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Provision(_) | AppError::Command(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::File(e) => match e {
                FileApiError::PathEscape | FileApiError::PathTooLong | FileApiError::IsDirectory => {
                    StatusCode::BAD_REQUEST
                }
                FileApiError::FileNotFound => StatusCode::NOT_FOUND,
                FileApiError::FileTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
                FileApiError::InvalidUtf8 => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                FileApiError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl From<ExecError> for AppError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::ProjectNotFound(id) => AppError::ProjectNotFound(id),
            other => AppError::Command(other),
        }
    }
}

/// 从 tokio JoinError 转换
impl From<tokio::task::JoinError> for AppError {
    fn from(e: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("Task failed: {}", e))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(code = self.code(), error = %self, "Request failed");
        }
        let body = Json(json!({ "code": self.code(), "message": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_and_status() {
        let err = AppError::ProjectNotFound("p1".to_string());
        assert_eq!(err.code(), "project_not_found");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = AppError::from(FileApiError::PathEscape);
        assert_eq!(err.code(), "invalid_path");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = AppError::from(ProvisionError::InvalidName("bad".to_string()));
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let err = AppError::from(ExecError::ProjectNotFound("gone".to_string()));
        assert!(matches!(err, AppError::ProjectNotFound(_)));
    }
}
