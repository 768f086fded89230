//! RunBoard: 每个项目的 build/serve 状态
//!
//! build 与 serve 各自至多一个在运行。serve 持有 kill 开关，stop 触发后
//! 子进程被终止。

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStatus {
    pub building: bool,
    pub serving: bool,
    pub serve_url: Option<String>,
    pub last_error: Option<String>,
    pub last_exit_code: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Busy {
    Building,
    Serving,
}

#[derive(Default)]
struct RunEntry {
    status: RunStatus,
    serve_kill: Option<oneshot::Sender<()>>,
    /// 每次 begin_serve 递增，旧 serve 结束时不覆盖新 serve 的状态
    serve_generation: u64,
}

#[derive(Default)]
pub struct RunBoard {
    entries: Mutex<HashMap<String, RunEntry>>,
}

impl RunBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entry<T>(&self, project_id: &str, f: impl FnOnce(&mut RunEntry) -> T) -> T {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        f(entries.entry(project_id.to_string()).or_default())
    }

    pub fn begin_build(&self, project_id: &str) -> Result<(), Busy> {
        self.with_entry(project_id, |entry| {
            if entry.status.building {
                return Err(Busy::Building);
            }
            entry.status.building = true;
            entry.status.last_error = None;
            entry.status.last_exit_code = None;
            Ok(())
        })
    }

    pub fn finish_build(&self, project_id: &str, error: Option<(String, Option<i32>)>) {
        self.with_entry(project_id, |entry| {
            entry.status.building = false;
            record_result(&mut entry.status, error);
        });
    }

    /// Mark serving and hand back the generation plus the child's kill switch
    pub fn begin_serve(
        &self,
        project_id: &str,
        url: impl Into<String>,
    ) -> Result<(u64, oneshot::Receiver<()>), Busy> {
        self.with_entry(project_id, |entry| {
            if entry.status.serving {
                return Err(Busy::Serving);
            }
            let (tx, rx) = oneshot::channel();
            entry.serve_generation += 1;
            entry.serve_kill = Some(tx);
            entry.status.serving = true;
            entry.status.serve_url = Some(url.into());
            entry.status.last_error = None;
            entry.status.last_exit_code = None;
            Ok((entry.serve_generation, rx))
        })
    }

    /// Called when the serve child exits. Ignored if a newer serve has started.
    pub fn finish_serve(&self, project_id: &str, generation: u64, error: Option<(String, Option<i32>)>) {
        self.with_entry(project_id, |entry| {
            if entry.serve_generation != generation {
                debug!(project = project_id, generation, "Stale serve completion ignored");
                return;
            }
            entry.serve_kill = None;
            entry.status.serving = false;
            entry.status.serve_url = None;
            record_result(&mut entry.status, error);
        });
    }

    /// Kill the serve child. Returns false if nothing was serving.
    pub fn stop_serve(&self, project_id: &str) -> bool {
        self.with_entry(project_id, |entry| {
            let was_serving = entry.status.serving;
            if let Some(kill) = entry.serve_kill.take() {
                let _ = kill.send(());
            }
            entry.status.serving = false;
            entry.status.serve_url = None;
            // 使正在退出的 serve 的完成回调失效
            entry.serve_generation += 1;
            if was_serving {
                info!(project = project_id, "Serve stopped");
            }
            was_serving
        })
    }

    pub fn status(&self, project_id: &str) -> RunStatus {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(project_id)
            .map(|e| e.status.clone())
            .unwrap_or_default()
    }

    /// 项目删除：停止 serve 并移除记录
    pub fn forget(&self, project_id: &str) {
        self.stop_serve(project_id);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(project_id);
    }
}

fn record_result(status: &mut RunStatus, error: Option<(String, Option<i32>)>) {
    match error {
        Some((message, code)) => {
            status.last_error = Some(message);
            status.last_exit_code = code;
        }
        None => {
            status.last_error = None;
            status.last_exit_code = Some(0);
        }
    }
}
