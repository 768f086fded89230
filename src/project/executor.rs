//! CommandExecutor: 在已存在的项目目录中运行命令

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::info;

use crate::config::EnvSection;
use crate::project::generator::resolve_program;
use crate::project::runner::{prepare_env, ProcessRunner, RunError};
use crate::project::state::SharedAppState;
use crate::server::log_channel::{ProjectChannel, SharedLogChannels};
use crate::util::file_logger::OutputLogBook;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Project '{0}' not found")]
    ProjectNotFound(String),
    #[error(transparent)]
    Run(#[from] RunError),
}

impl ExecError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecError::Run(e) => e.exit_code(),
            ExecError::ProjectNotFound(_) => None,
        }
    }
}

/// What to run: a free-form shell line or an explicit argv
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    Shell(String),
    Argv { program: String, args: Vec<String> },
}

impl CommandLine {
    pub fn argv(program: impl Into<String>, args: &[&str]) -> Self {
        CommandLine::Argv {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

#[derive(Clone)]
pub struct CommandExecutor {
    app_state: SharedAppState,
    channels: SharedLogChannels,
    log_book: Option<Arc<OutputLogBook>>,
    env: EnvSection,
    shell: Option<String>,
}

impl CommandExecutor {
    pub fn new(app_state: SharedAppState, channels: SharedLogChannels, env: EnvSection) -> Self {
        Self {
            app_state,
            channels,
            log_book: None,
            env,
            shell: None,
        }
    }

    pub fn with_log_book(mut self, log_book: Option<Arc<OutputLogBook>>) -> Self {
        self.log_book = log_book;
        self
    }

    /// 覆盖 Shell 命令使用的 shell（默认 unix `sh`，Windows `cmd`）
    pub fn with_shell(mut self, shell: Option<String>) -> Self {
        self.shell = shell;
        self
    }

    pub fn channel(&self, project_id: &str) -> ProjectChannel {
        let channel = ProjectChannel::new(self.channels.clone(), project_id);
        match &self.log_book {
            Some(book) => channel.with_log_book(project_id, book.clone()),
            None => channel,
        }
    }

    async fn project_dir(&self, project_id: &str) -> Result<PathBuf, ExecError> {
        let state = self.app_state.read().await;
        let project = state
            .get_project(project_id)
            .ok_or_else(|| ExecError::ProjectNotFound(project_id.to_string()))?;
        if !project.root_path.is_dir() {
            return Err(ExecError::ProjectNotFound(project_id.to_string()));
        }
        Ok(project.root_path.clone())
    }

    /// Run `command` in the project's directory, streaming output to the
    /// project's current subscriber (if any). `kill` terminates the child.
    pub async fn execute(
        &self,
        project_id: &str,
        command: CommandLine,
        kill: Option<oneshot::Receiver<()>>,
    ) -> Result<(), ExecError> {
        let cwd = self.project_dir(project_id).await?;
        let channel = self.channel(project_id);
        let env = prepare_env(&self.env, &cwd);

        let (program, args) = match command {
            CommandLine::Shell(line) => self.shell_invocation(line),
            CommandLine::Argv { program, args } => (program, args),
        };
        let program = resolve_program(&program, env.get("PATH").map(String::as_str))
            .map_err(|e| {
                channel.error(e.to_string());
                e
            })?;

        let mut runner =
            ProcessRunner::new(program.to_string_lossy().to_string(), args, &cwd).env(env);
        if let Some(kill) = kill {
            runner = runner.kill_switch(kill);
        }

        channel.info(format!("> {}", runner.command_line()));
        info!(project = project_id, command = %runner.command_line(), "Executing command");

        match runner.run(|event| channel.emit(event)).await {
            Ok(()) => {
                channel.info("Command completed");
                Ok(())
            }
            Err(e) => {
                channel.error(e.to_string());
                Err(e.into())
            }
        }
    }

    fn shell_invocation(&self, line: String) -> (String, Vec<String>) {
        if let Some(shell) = &self.shell {
            return (shell.clone(), vec!["-c".to_string(), line]);
        }
        if cfg!(windows) {
            ("cmd".to_string(), vec!["/C".to_string(), line])
        } else {
            ("sh".to_string(), vec!["-c".to_string(), line])
        }
    }
}
