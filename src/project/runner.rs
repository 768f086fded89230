//! ProcessRunner: 运行单条外部命令并逐行转发 stdout/stderr
//!
//! 一个 runner 实例只服务一条命令，运行结束即被消耗。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::EnvSection;
use crate::project::event::{OutputEvent, OutputKind};

/// 强制非交互、彩色输出的环境变量；配置中的同名变量优先
///
/// 不设置 `CI`：react-scripts 在 CI 下会把 lint 警告当作构建错误。
const FORCED_ENV: &[(&str, &str)] = &[
    ("FORCE_COLOR", "1"),
    ("NG_CLI_ANALYTICS", "false"),
    ("npm_config_yes", "true"),
    ("BROWSER", "none"),
];

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Failed to launch '{program}': {reason}")]
    Launch { program: String, reason: String },
    #[error("Command '{program}' failed ({})", describe_exit(.exit_code))]
    CommandFailed {
        program: String,
        exit_code: Option<i32>,
    },
    #[error("I/O error while running '{program}': {reason}")]
    Io { program: String, reason: String },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

impl RunError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RunError::CommandFailed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }

    pub fn is_launch(&self) -> bool {
        matches!(self, RunError::Launch { .. })
    }
}

/// Build the child environment: inherited vars (optional), forced
/// non-interactive defaults, configured vars, then PATH adjustments.
pub fn prepare_env(config: &EnvSection, working_dir: &Path) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = if config.inherit {
        std::env::vars().collect()
    } else {
        HashMap::new()
    };

    for (k, v) in FORCED_ENV {
        env.insert(k.to_string(), v.to_string());
    }

    for (k, v) in &config.vars {
        env.insert(k.clone(), v.clone());
    }

    let resolve = |p: &String| {
        if p.starts_with("./") || p.starts_with("../") {
            working_dir.join(p).to_string_lossy().to_string()
        } else {
            p.clone()
        }
    };

    let mut paths: Vec<String> = config.path_prepend.paths.iter().map(resolve).collect();
    if let Some(path) = env.get("PATH").cloned().or_else(|| std::env::var("PATH").ok()) {
        paths.push(path);
    }
    paths.extend(config.path_append.paths.iter().map(resolve));
    if !paths.is_empty() {
        let sep = if cfg!(windows) { ";" } else { ":" };
        env.insert("PATH".to_string(), paths.join(sep));
    }

    env
}

pub struct ProcessRunner {
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
    env: Option<HashMap<String, String>>,
    kill_rx: Option<oneshot::Receiver<()>>,
}

impl ProcessRunner {
    pub fn new(program: impl Into<String>, args: Vec<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: cwd.into(),
            env: None,
            kill_rx: None,
        }
    }

    /// Replace the child's environment with the prepared one (see [`prepare_env`])
    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    /// 触发后终止子进程；结果为 `CommandFailed { exit_code: None }`（unix）
    pub fn kill_switch(mut self, kill_rx: oneshot::Receiver<()>) -> Self {
        self.kill_rx = Some(kill_rx);
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run to completion. Every output line is handed to `on_output` in the
    /// order the runner observed it, stdout and stderr interleaved.
    pub async fn run<F>(self, mut on_output: F) -> Result<(), RunError>
    where
        F: FnMut(OutputEvent),
    {
        let command_line = self.command_line();
        let ProcessRunner {
            program,
            args,
            cwd,
            env,
            mut kill_rx,
        } = self;

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // 独立进程组，kill 时连同 npm 派生的 dev server 一起终止
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(env) = &env {
            cmd.env_clear().envs(env);
        }

        info!(command = %command_line, cwd = %cwd.display(), "Spawning command");

        let mut child = cmd.spawn().map_err(|e| {
            warn!(command = %command_line, error = %e, "Failed to spawn command");
            RunError::Launch {
                program: program.clone(),
                reason: e.to_string(),
            }
        })?;
        let mut group = ProcessGroup::new(child.id());

        // 两个读取 task 汇入同一通道，保持观察到的先后顺序
        let (tx, mut rx) = mpsc::unbounded_channel::<OutputEvent>();
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, OutputKind::Stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, OutputKind::Stderr, tx.clone());
        }
        drop(tx);

        let mut kill_sent = false;
        let mut exited = None;
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => on_output(event),
                    None => break,
                },
                _ = kill_requested(&mut kill_rx), if !kill_sent => {
                    kill_sent = true;
                    info!(command = %command_line, "Kill requested, terminating process group");
                    if let Err(e) = group.kill() {
                        warn!(command = %command_line, error = %e, "Failed to kill process group");
                        if let Err(e) = child.start_kill() {
                            warn!(command = %command_line, error = %e, "Failed to kill child");
                        }
                    }
                }
                // 被 kill 后不再等待仍持有管道的进程
                status = child.wait(), if kill_sent => {
                    exited = Some(status);
                    break;
                }
            }
        }
        while let Ok(event) = rx.try_recv() {
            on_output(event);
        }

        let status = match exited {
            Some(status) => status,
            None => child.wait().await,
        }
        .map_err(|e| RunError::Io {
            program: program.clone(),
            reason: e.to_string(),
        })?;
        group.disarm();

        if status.success() {
            debug!(command = %command_line, "Command completed successfully");
            Ok(())
        } else {
            warn!(command = %command_line, exit_code = ?status.code(), "Command failed");
            Err(RunError::CommandFailed {
                program,
                exit_code: status.code(),
            })
        }
    }
}

/// 子进程所在进程组；runner 被提前丢弃时整组终止
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    #[cfg(unix)]
    fn kill(&self) -> std::io::Result<()> {
        let pgid = match self.pgid.and_then(|pid| i32::try_from(pid).ok()) {
            Some(pgid) => pgid,
            None => return Ok(()),
        };
        // SAFETY: killpg 只接收整数参数，不涉及内存
        if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(())
        } else {
            Err(err)
        }
    }

    #[cfg(not(unix))]
    fn kill(&self) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "process groups are unix-only",
        ))
    }

    /// 子进程已被回收，进程组 id 不再归本 runner 所有
    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if self.pgid.is_some() {
            let _ = self.kill();
        }
    }
}

/// 等待 kill 信号；发送端被丢弃视为永不 kill
async fn kill_requested(slot: &mut Option<oneshot::Receiver<()>>) {
    if let Some(rx) = slot.as_mut() {
        let fired = rx.await.is_ok();
        *slot = None;
        if fired {
            return;
        }
    }
    std::future::pending::<()>().await
}

fn spawn_line_reader<R>(reader: R, kind: OutputKind, tx: mpsc::UnboundedSender<OutputEvent>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    while matches!(buf.last(), Some(b'\n' | b'\r')) {
                        buf.pop();
                    }
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    if tx.send(OutputEvent::new(kind, line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(stream = ?kind, error = %e, "Output read error");
                    break;
                }
            }
        }
    });
}
