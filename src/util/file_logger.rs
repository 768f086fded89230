use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::project::event::OutputEvent;

/// 项目输出日志簿
///
/// 每个项目一个 `<logs_dir>/<project_id>.log`，每行一条 JSON 序列化的
/// [`OutputEvent`]。写入器按项目缓存，由 Mutex 保护。
pub struct OutputLogBook {
    log_dir: PathBuf,
    writers: Mutex<HashMap<String, BufWriter<File>>>,
}

impl OutputLogBook {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        let log_dir = log_dir.into();
        // 确保日志目录存在
        if let Err(e) = fs::create_dir_all(&log_dir) {
            warn!(path = %log_dir.display(), error = %e, "Failed to create log directory");
        }
        Self {
            log_dir,
            writers: Mutex::new(HashMap::new()),
        }
    }

    pub fn log_path(&self, project_id: &str) -> PathBuf {
        self.log_dir.join(format!("{}.log", project_id))
    }

    /// 追加一条事件；写入失败只记录告警，不影响命令执行
    pub fn append(&self, project_id: &str, event: &OutputEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(_) => return,
        };
        let mut writers = match self.writers.lock() {
            Ok(w) => w,
            Err(_) => return,
        };

        if !writers.contains_key(project_id) {
            match self.open_log_file(project_id) {
                Some(w) => {
                    writers.insert(project_id.to_string(), w);
                }
                None => return,
            }
        }

        if let Some(writer) = writers.get_mut(project_id) {
            if writeln!(writer, "{}", json).and_then(|_| writer.flush()).is_err() {
                // 文件可能已被外部删除，下次重新打开
                writers.remove(project_id);
            }
        }
    }

    /// Read back every event recorded for a project, oldest first
    pub fn read(&self, project_id: &str) -> Vec<OutputEvent> {
        let file = match File::open(self.log_path(project_id)) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };
        BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect()
    }

    /// 删除项目日志（项目被删除时调用）
    pub fn remove(&self, project_id: &str) {
        if let Ok(mut writers) = self.writers.lock() {
            writers.remove(project_id);
        }
        let path = self.log_path(project_id);
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove project log");
            }
        }
    }

    /// 清理超过保留天数未写入的日志文件，返回删除数量
    pub fn cleanup_old_logs(&self, retention_days: i64) -> usize {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let entries = match fs::read_dir(&self.log_dir) {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("log") {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(chrono::DateTime::<Utc>::from);
            if let Ok(modified) = modified {
                if modified < cutoff && self.forget_file(&path) {
                    removed += 1;
                }
            }
        }
        removed
    }

    fn forget_file(&self, path: &Path) -> bool {
        if let Some(project_id) = path.file_stem().and_then(|s| s.to_str()) {
            if let Ok(mut writers) = self.writers.lock() {
                writers.remove(project_id);
            }
        }
        fs::remove_file(path).is_ok()
    }

    fn open_log_file(&self, project_id: &str) -> Option<BufWriter<File>> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(project_id))
            .ok()
            .map(BufWriter::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::event::OutputKind;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_read() {
        let temp = TempDir::new().unwrap();
        let book = OutputLogBook::new(temp.path().join("logs"));

        book.append("p1", &OutputEvent::info("Staging project"));
        book.append("p1", &OutputEvent::new(OutputKind::Stdout, "Compiled successfully"));
        book.append("p2", &OutputEvent::error("other project"));

        let events = book.read("p1");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, OutputKind::Info);
        assert_eq!(events[1].data, "Compiled successfully");
        assert_eq!(book.read("p2").len(), 1);
        assert!(book.read("unknown").is_empty());
    }

    #[test]
    fn test_remove() {
        let temp = TempDir::new().unwrap();
        let book = OutputLogBook::new(temp.path());
        book.append("p1", &OutputEvent::info("hello"));
        assert!(book.log_path("p1").exists());

        book.remove("p1");
        assert!(!book.log_path("p1").exists());
        assert!(book.read("p1").is_empty());

        // 删除后仍可继续写入
        book.append("p1", &OutputEvent::info("again"));
        assert_eq!(book.read("p1").len(), 1);
    }

    #[test]
    fn test_cleanup_keeps_recent_logs() {
        let temp = TempDir::new().unwrap();
        let book = OutputLogBook::new(temp.path());
        book.append("fresh", &OutputEvent::info("recent"));
        assert_eq!(book.cleanup_old_logs(7), 0);
        assert!(book.log_path("fresh").exists());
        // 保留 -1 天：所有文件都过期
        assert_eq!(book.cleanup_old_logs(-1), 1);
        assert!(!book.log_path("fresh").exists());
    }
}
