//! Provisioner: 创建项目工作流
//!
//! `Staging → Generating → Promoting → Done`，任意阶段失败进入 `Failed`：
//! scratch 目录总会被删除，进入 Promoting 后失败还会删除不完整的最终目录。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::{AppConfig, EnvSection, GeneratorSection};
use crate::project::generator::{generator_plan, install_step, resolve_program, GeneratorAttempt};
use crate::project::runner::{prepare_env, ProcessRunner, RunError};
use crate::project::state::Framework;
use crate::project::tree::{build_tree, FileNode};
use crate::server::log_channel::ProjectChannel;

/// npm 包名长度上限
const MAX_NAME_LENGTH: usize = 214;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProvisionStage {
    Staging,
    Generating,
    Promoting,
    Done,
    Failed,
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Invalid project name: {0}")]
    InvalidName(String),
    #[error("Failed to prepare scratch directory: {0}")]
    Staging(io::Error),
    #[error("Generator failed: {0}")]
    Generate(RunError),
    #[error("Failed to copy project files: {0}")]
    Copy(io::Error),
    #[error("Failed to read project tree: {0}")]
    Tree(io::Error),
}

impl ProvisionError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProvisionError::Generate(e) => e.exit_code(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub project_id: String,
    pub name: String,
    pub framework: Framework,
}

#[derive(Debug, Clone)]
pub struct Provisioned {
    pub root_path: PathBuf,
    pub files: Vec<FileNode>,
}

/// Reject names that could escape the scratch directory or confuse the generators
pub fn validate_project_name(name: &str) -> Result<(), ProvisionError> {
    let invalid = |reason: &str| Err(ProvisionError::InvalidName(reason.to_string()));
    if name.is_empty() {
        return invalid("name must not be empty");
    }
    if name.len() > MAX_NAME_LENGTH {
        return invalid("name is too long");
    }
    if name.starts_with('.') {
        return invalid("name must not start with '.'");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return invalid("only letters, digits, '-', '_' and '.' are allowed");
    }
    Ok(())
}

pub struct Provisioner {
    projects_dir: PathBuf,
    scratch_dir: PathBuf,
    generator: GeneratorSection,
    env: EnvSection,
}

impl Provisioner {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            projects_dir: config.storage.projects_dir(),
            scratch_dir: config.storage.scratch_dir(),
            generator: config.generator.clone(),
            env: config.env.clone(),
        }
    }

    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.projects_dir.join(project_id)
    }

    /// Run the whole workflow. Progress and tool output go to `channel`; a
    /// failure is reported there once and returned after cleanup.
    pub async fn provision(
        &self,
        request: &ProvisionRequest,
        channel: &ProjectChannel,
    ) -> Result<Provisioned, ProvisionError> {
        validate_project_name(&request.name)?;

        let final_dir = self.project_dir(&request.project_id);
        let scratch = self.scratch_dir.join(format!(
            "{}-{}",
            request.project_id,
            Uuid::new_v4().simple()
        ));

        let mut stage = ProvisionStage::Staging;
        let result = self
            .run_stages(request, channel, &scratch, &final_dir, &mut stage)
            .await;

        // scratch 无论成败都要清理
        remove_dir_logged(&scratch).await;

        match result {
            Ok(files) => {
                channel.info(format!("Project '{}' created", request.name));
                info!(project = %request.project_id, "Provisioning done");
                Ok(Provisioned {
                    root_path: final_dir,
                    files,
                })
            }
            Err(e) => {
                if stage >= ProvisionStage::Promoting {
                    remove_dir_logged(&final_dir).await;
                }
                warn!(
                    project = %request.project_id,
                    stage = ?stage,
                    error = %e,
                    "Provisioning failed"
                );
                channel.error(format!("Project creation failed: {}", e));
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        request: &ProvisionRequest,
        channel: &ProjectChannel,
        scratch: &Path,
        final_dir: &Path,
        stage: &mut ProvisionStage,
    ) -> Result<Vec<FileNode>, ProvisionError> {
        // Staging
        reset_dir(scratch).await.map_err(ProvisionError::Staging)?;
        channel.info(format!(
            "Creating {} project '{}' in {}",
            request.framework,
            request.name,
            scratch.display()
        ));

        // Generating
        *stage = ProvisionStage::Generating;
        let plan = generator_plan(request.framework, &request.name, &self.generator);
        self.generate(&plan, channel, scratch).await?;

        if let Some(install) = install_step(&self.generator) {
            channel.info("Installing dependencies");
            let attempt = GeneratorAttempt {
                label: "install".to_string(),
                program: install.program,
                args: install.args,
            };
            self.run_attempt(&attempt, channel, scratch)
                .await
                .map_err(ProvisionError::Generate)?;
        }

        // Promoting
        *stage = ProvisionStage::Promoting;
        channel.info("Copying project files");
        if tokio::fs::metadata(final_dir).await.is_ok() {
            tokio::fs::remove_dir_all(final_dir)
                .await
                .map_err(ProvisionError::Copy)?;
        }
        let (src, dst) = (scratch.to_path_buf(), final_dir.to_path_buf());
        let copied = tokio::task::spawn_blocking(move || copy_tree(&src, &dst))
            .await
            .map_err(|e| ProvisionError::Copy(io::Error::other(e)))?
            .map_err(ProvisionError::Copy)?;
        info!(project = %request.project_id, files = copied, "Project files promoted");

        let root = final_dir.to_path_buf();
        let files = tokio::task::spawn_blocking(move || build_tree(&root, true))
            .await
            .map_err(|e| ProvisionError::Tree(io::Error::other(e)))?
            .map_err(ProvisionError::Tree)?;

        *stage = ProvisionStage::Done;
        Ok(files)
    }

    /// Try each attempt in order. Before a fallback the scratch directory is
    /// emptied so only the successful attempt's output survives.
    async fn generate(
        &self,
        plan: &[GeneratorAttempt],
        channel: &ProjectChannel,
        scratch: &Path,
    ) -> Result<(), ProvisionError> {
        let mut last_error = None;
        for (i, attempt) in plan.iter().enumerate() {
            if i > 0 {
                reset_dir(scratch).await.map_err(ProvisionError::Staging)?;
                channel.info(format!("Retrying with {} generator", attempt.label));
            }
            match self.run_attempt(attempt, channel, scratch).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt = %attempt.label, error = %e, "Generator attempt failed");
                    channel.error(format!("{} generator failed: {}", attempt.label, e));
                    last_error = Some(e);
                }
            }
        }
        Err(ProvisionError::Generate(last_error.unwrap_or_else(|| {
            RunError::Launch {
                program: "generator".to_string(),
                reason: "no generator configured".to_string(),
            }
        })))
    }

    async fn run_attempt(
        &self,
        attempt: &GeneratorAttempt,
        channel: &ProjectChannel,
        cwd: &Path,
    ) -> Result<(), RunError> {
        let env = prepare_env(&self.env, cwd);
        let program = resolve_program(&attempt.program, env.get("PATH").map(String::as_str))?;
        let runner = ProcessRunner::new(
            program.to_string_lossy().to_string(),
            attempt.args.clone(),
            cwd,
        )
        .env(env);
        channel.info(format!("> {}", runner.command_line()));
        runner.run(|event| channel.emit(event)).await
    }
}

/// 删除后重新创建空目录
async fn reset_dir(dir: &Path) -> io::Result<()> {
    if tokio::fs::metadata(dir).await.is_ok() {
        tokio::fs::remove_dir_all(dir).await?;
    }
    tokio::fs::create_dir_all(dir).await
}

async fn remove_dir_logged(dir: &Path) {
    if tokio::fs::metadata(dir).await.is_err() {
        return;
    }
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        warn!(path = %dir.display(), error = %e, "Failed to remove directory");
    }
}

/// Recursively copy `src` into `dst`, returning the number of files copied.
/// Symlinks are recreated, not followed.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<u64> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;

    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    let link = fs::read_link(src)?;
    std::os::unix::fs::symlink(link, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    if src.is_dir() {
        return Ok(());
    }
    fs::copy(src, dst).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommandSpec;
    use crate::project::event::{OutputEvent, OutputKind};
    use crate::server::log_channel::LogChannelRegistry;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn provisioner_with_plan(data_dir: &Path, plan: Vec<CommandSpec>) -> Provisioner {
        let mut config = AppConfig::with_data_dir(data_dir);
        config.generator.install_dependencies = false;
        config.generator.plans.insert("react".to_string(), plan);
        Provisioner::new(&config)
    }

    fn subscribed_channel(id: &str) -> (ProjectChannel, mpsc::UnboundedReceiver<OutputEvent>) {
        let registry = Arc::new(LogChannelRegistry::new());
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(id, tx);
        (ProjectChannel::new(registry, id), rx)
    }

    fn request(id: &str) -> ProvisionRequest {
        ProvisionRequest {
            project_id: id.to_string(),
            name: "demo".to_string(),
            framework: Framework::React,
        }
    }

    fn is_empty_dir(dir: &Path) -> bool {
        fs::read_dir(dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_staging_event_names_scratch_dir() {
        let temp = TempDir::new().unwrap();
        let provisioner =
            provisioner_with_plan(temp.path(), vec![CommandSpec::new("sh", &["-c", "touch a"])]);
        let (channel, mut rx) = subscribed_channel("p1");

        provisioner.provision(&request("p1"), &channel).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, OutputKind::Info);
        let scratch_root = provisioner.scratch_dir.display().to_string();
        assert!(first.data.contains(&scratch_root), "{}", first.data);
        assert!(first.data.contains("p1-"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_existing_final_dir_is_replaced() {
        let temp = TempDir::new().unwrap();
        let provisioner = provisioner_with_plan(
            temp.path(),
            vec![CommandSpec::new("sh", &["-c", "echo fresh > package.json"])],
        );
        let final_dir = provisioner.project_dir("p1");
        fs::create_dir_all(final_dir.join("old")).unwrap();
        fs::write(final_dir.join("stale.txt"), "stale").unwrap();
        fs::write(final_dir.join("package.json"), "stale").unwrap();
        let (channel, _rx) = subscribed_channel("p1");

        let provisioned = provisioner.provision(&request("p1"), &channel).await.unwrap();

        assert_eq!(provisioned.root_path, final_dir);
        assert!(!final_dir.join("stale.txt").exists());
        assert!(!final_dir.join("old").exists());
        assert_eq!(
            fs::read_to_string(final_dir.join("package.json")).unwrap(),
            "fresh\n"
        );
        assert_eq!(provisioned.files.len(), 1);
        assert!(is_empty_dir(&provisioner.scratch_dir));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_copy_failure_removes_scratch_and_final_dir() {
        use std::os::unix::net::UnixListener;

        let temp = TempDir::new().unwrap();
        // socket 无法被 fs::copy 打开，复制会在中途失败
        let socket = temp.path().join("dev.sock");
        let _listener = UnixListener::bind(&socket).unwrap();
        let script = format!(
            "mkdir src; echo ok > src/index.tsx; echo ok > package.json; ln '{}' zz.sock",
            socket.display()
        );
        let data_dir = temp.path().join("data");
        let provisioner =
            provisioner_with_plan(&data_dir, vec![CommandSpec::new("sh", &["-c", &script])]);
        let (channel, mut rx) = subscribed_channel("p1");

        let err = provisioner
            .provision(&request("p1"), &channel)
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Copy(_)), "{err}");
        assert!(!provisioner.project_dir("p1").exists());
        assert!(is_empty_dir(&provisioner.scratch_dir));
        assert!(is_empty_dir(&provisioner.projects_dir));

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        let last = last.unwrap();
        assert_eq!(last.kind, OutputKind::Error);
        assert!(last.data.contains("Failed to copy project files"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_generator_failure_leaves_no_directories() {
        let temp = TempDir::new().unwrap();
        let provisioner =
            provisioner_with_plan(temp.path(), vec![CommandSpec::new("sh", &["-c", "exit 1"])]);
        let (channel, _rx) = subscribed_channel("p1");

        let err = provisioner
            .provision(&request("p1"), &channel)
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), Some(1));
        assert!(!provisioner.project_dir("p1").exists());
        assert!(is_empty_dir(&provisioner.scratch_dir));
    }

    #[test]
    fn test_validate_project_name() {
        assert!(validate_project_name("demo").is_ok());
        assert!(validate_project_name("my-app_2.0").is_ok());
        for bad in ["", "../escape", "a/b", "has space", ".hidden", "a\\b"] {
            assert!(
                matches!(validate_project_name(bad), Err(ProvisionError::InvalidName(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_copy_tree() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("a/b")).unwrap();
        fs::write(src.join("root.txt"), "root").unwrap();
        fs::write(src.join("a/b/deep.txt"), "deep").unwrap();
        fs::create_dir_all(src.join("empty")).unwrap();

        let dst = temp.path().join("dst");
        assert_eq!(copy_tree(&src, &dst).unwrap(), 2);
        assert_eq!(fs::read_to_string(dst.join("a/b/deep.txt")).unwrap(), "deep");
        assert!(dst.join("empty").is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_tree_keeps_symlinks() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("node_modules/.bin")).unwrap();
        fs::write(src.join("tool.js"), "#!/usr/bin/env node").unwrap();
        std::os::unix::fs::symlink("../../tool.js", src.join("node_modules/.bin/tool")).unwrap();

        let dst = temp.path().join("dst");
        copy_tree(&src, &dst).unwrap();
        let link = dst.join("node_modules/.bin/tool");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("../../tool.js"));
    }
}
