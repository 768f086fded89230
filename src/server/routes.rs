//! HTTP routes: 对 Provisioner / CommandExecutor / 文件 API 的薄封装

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::project::executor::{CommandLine, ExecError};
use crate::project::generator::node_tool;
use crate::project::provision::ProvisionRequest;
use crate::project::state::{Framework, Project};
use crate::project::tree::build_tree;
use crate::server::context::{AppContext, AppError};
use crate::server::file_api;
use crate::server::log_channel::ProjectChannel;
use crate::server::ws::logs_handler;

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub framework: String,
    /// 创建期间输出发送到的 LogChannel，默认使用新项目 id
    #[serde(default)]
    pub channel: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct WriteFileRequest {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub command: String,
}

pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/projects", get(list_projects).post(create_project))
        .route("/projects/:id", get(get_project).delete(delete_project))
        .route(
            "/projects/:id/file",
            get(read_file).put(write_file).delete(delete_file),
        )
        .route("/projects/:id/execute", post(execute))
        .route("/projects/:id/build", post(build))
        .route("/projects/:id/serve", post(serve_project))
        .route("/projects/:id/stop", post(stop))
        .route("/projects/:id/status", get(status))
        .route("/projects/:id/history", get(history))
        .route("/projects/:id/logs", get(logs_handler))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// Run the HTTP + WebSocket server until Ctrl-C
pub async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    let ctx = AppContext::new(config);
    serve(listener, ctx.clone()).await?;

    // 退出前同步写一次状态
    let state_path = ctx.config.storage.state_path();
    if let Err(e) = ctx.app_state.write().await.save(&state_path) {
        warn!(error = %e, "Failed to save state on shutdown");
    }
    info!("Server stopped");
    Ok(())
}

/// Serve on an already bound listener
pub async fn serve(listener: TcpListener, ctx: AppContext) -> std::io::Result<()> {
    axum::serve(listener, build_router(ctx))
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
        })
        .await
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true, "version": env!("CARGO_PKG_VERSION") }))
}

async fn list_projects(State(ctx): State<AppContext>) -> impl IntoResponse {
    let state = ctx.app_state.read().await;
    let projects: Vec<Project> = state.list_projects().into_iter().cloned().collect();
    Json(projects)
}

async fn create_project(
    State(ctx): State<AppContext>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, AppError> {
    let framework: Framework = req.framework.parse().map_err(AppError::InvalidRequest)?;
    let project_id = Uuid::new_v4().to_string();
    let channel_id = req.channel.clone().unwrap_or_else(|| project_id.clone());

    let channel = ProjectChannel::new(ctx.channels.clone(), channel_id);
    let channel = match &ctx.log_book {
        Some(book) => channel.with_log_book(project_id.clone(), book.clone()),
        None => channel,
    };

    info!(project = %project_id, name = %req.name, framework = %framework, "Creating project");
    let request = ProvisionRequest {
        project_id: project_id.clone(),
        name: req.name.clone(),
        framework,
    };
    // 独立 task：请求被取消时仍会完成清理
    let provisioner = ctx.provisioner.clone();
    let log_book = ctx.log_book.clone();
    let provisioned = tokio::spawn(async move {
        let result = provisioner.provision(&request, &channel).await;
        // 项目没有登记，日志也不保留
        if result.is_err() {
            if let Some(book) = &log_book {
                book.remove(&request.project_id);
            }
        }
        result
    })
    .await??;

    let project = Project::new(
        project_id,
        req.name,
        req.description,
        framework,
        provisioned.root_path,
    );
    ctx.app_state.write().await.add_project(project.clone());
    ctx.request_save();

    Ok((
        StatusCode::CREATED,
        Json(json!({ "project": project, "files": provisioned.files })),
    ))
}

async fn get_project(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let project = {
        let state = ctx.app_state.read().await;
        state
            .get_project(&id)
            .cloned()
            .ok_or_else(|| AppError::ProjectNotFound(id.clone()))?
    };
    let root = project.root_path.clone();
    let files = tokio::task::spawn_blocking(move || build_tree(&root, false))
        .await?
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(json!({ "project": project, "files": files })))
}

async fn delete_project(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let root = ctx.project_root(&id).await?;

    ctx.run_board.forget(&id);
    ctx.channels.unregister(&id);

    if tokio::fs::metadata(&root).await.is_ok() {
        tokio::fs::remove_dir_all(&root)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to remove project directory: {}", e)))?;
    }
    ctx.app_state.write().await.remove_project(&id);
    ctx.request_save();
    if let Some(book) = &ctx.log_book {
        book.remove(&id);
    }

    info!(project = %id, "Project deleted");
    Ok(Json(json!({ "success": true })))
}

async fn read_file(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Query(query): Query<FileQuery>,
) -> Result<impl IntoResponse, AppError> {
    let root = ctx.project_root(&id).await?;
    let content =
        tokio::task::spawn_blocking(move || file_api::read_file(&root, &query.path)).await??;
    Ok(Json(json!({ "content": content })))
}

async fn write_file(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(req): Json<WriteFileRequest>,
) -> Result<impl IntoResponse, AppError> {
    let root = ctx.project_root(&id).await?;
    let size = tokio::task::spawn_blocking(move || {
        file_api::write_file(&root, &req.path, &req.content)
    })
    .await??;
    touch_project(&ctx, &id).await;
    Ok(Json(json!({ "success": true, "size": size })))
}

async fn delete_file(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Query(query): Query<FileQuery>,
) -> Result<impl IntoResponse, AppError> {
    let root = ctx.project_root(&id).await?;
    tokio::task::spawn_blocking(move || file_api::delete_file(&root, &query.path)).await??;
    touch_project(&ctx, &id).await;
    Ok(Json(json!({ "success": true })))
}

async fn touch_project(ctx: &AppContext, id: &str) {
    if let Some(project) = ctx.app_state.write().await.get_project_mut(id) {
        project.touch();
    }
    ctx.request_save();
}

/// Command failures are reported in the body, not as an HTTP error
fn command_outcome(result: Result<(), ExecError>) -> Result<serde_json::Value, AppError> {
    match result {
        Ok(()) => Ok(json!({ "ok": true, "exit_code": 0 })),
        Err(ExecError::Run(e)) => Ok(json!({
            "ok": false,
            "exit_code": e.exit_code(),
            "error": e.to_string(),
        })),
        Err(e) => Err(e.into()),
    }
}

async fn execute(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(req): Json<ExecuteRequest>,
) -> Result<impl IntoResponse, AppError> {
    let command = req.command.trim().to_string();
    if command.is_empty() {
        return Err(AppError::InvalidRequest("command must not be empty".to_string()));
    }
    ctx.project_root(&id).await?;

    // 放进独立 task，客户端断开不会中止命令
    let executor = ctx.executor.clone();
    let result = tokio::spawn(async move {
        executor.execute(&id, CommandLine::Shell(command), None).await
    })
    .await?;
    Ok(Json(command_outcome(result)?))
}

async fn build(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    ctx.project_root(&id).await?;
    ctx.run_board
        .begin_build(&id)
        .map_err(|_| AppError::Conflict(format!("Project '{}' is already building", id)))?;

    let executor = ctx.executor.clone();
    let board = ctx.run_board.clone();
    let result = tokio::spawn(async move {
        let result = executor
            .execute(&id, CommandLine::argv(node_tool("npm"), &["run", "build"]), None)
            .await;
        board.finish_build(&id, result.as_ref().err().map(|e| (e.to_string(), e.exit_code())));
        result
    })
    .await?;
    Ok(Json(command_outcome(result)?))
}

async fn serve_project(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let framework = {
        let state = ctx.app_state.read().await;
        state
            .get_project(&id)
            .map(|p| p.framework)
            .ok_or_else(|| AppError::ProjectNotFound(id.clone()))?
    };
    let url = framework.default_dev_url();
    let (generation, kill_rx) = ctx
        .run_board
        .begin_serve(&id, url)
        .map_err(|_| AppError::Conflict(format!("Project '{}' is already serving", id)))?;

    let executor = ctx.executor.clone();
    let board = ctx.run_board.clone();
    let project_id = id.clone();
    tokio::spawn(async move {
        let result = executor
            .execute(
                &project_id,
                CommandLine::argv(node_tool("npm"), &["start"]),
                Some(kill_rx),
            )
            .await;
        if let Err(e) = &result {
            warn!(project = %project_id, error = %e, "Serve exited");
        }
        board.finish_serve(
            &project_id,
            generation,
            result.err().map(|e| (e.to_string(), e.exit_code())),
        );
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "serving": true, "url": url })),
    ))
}

async fn stop(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    ctx.project_root(&id).await?;
    let stopped = ctx.run_board.stop_serve(&id);
    Ok(Json(json!({ "stopped": stopped })))
}

async fn status(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    ctx.project_root(&id).await?;
    Ok(Json(ctx.run_board.status(&id)))
}

async fn history(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    ctx.project_root(&id).await?;
    let events = match &ctx.log_book {
        Some(book) => book.read(&id),
        None => Vec::new(),
    };
    Ok(Json(events))
}
