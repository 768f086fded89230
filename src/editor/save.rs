//! SaveCoordinator: 每个标签页至多一个进行中的保存，始终写入最新缓存
//!
//! 自动保存：每次编辑重启该标签的防抖计时器，计时器触发后保存一次。

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::session::{BeginSave, EditorSession, OpenFile, TabId};
use super::store::{FileStore, StoreError};
use crate::config::EditorSection;

pub type SharedSession = Arc<Mutex<EditorSession>>;

#[derive(Debug, Clone)]
pub struct EditorConfig {
    pub auto_save: bool,
    pub autosave_debounce: Duration,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self::from(&EditorSection::default())
    }
}

impl From<&EditorSection> for EditorConfig {
    fn from(section: &EditorSection) -> Self {
        Self {
            auto_save: section.auto_save,
            autosave_debounce: section.debounce(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// 已有保存在进行中，本次未执行
    AlreadySaving,
    /// 没有未保存的修改
    Clean,
    NotOpen,
}

#[derive(Debug, Error)]
#[error("Failed to save '{path}': {source}")]
pub struct SaveError {
    pub tab_id: TabId,
    pub path: String,
    #[source]
    pub source: StoreError,
}

#[derive(Debug, Default)]
pub struct SaveAllReport {
    pub saved: Vec<TabId>,
    pub skipped: Vec<TabId>,
    pub failed: Vec<SaveError>,
}

impl SaveAllReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

pub struct SaveCoordinator {
    session: SharedSession,
    store: Arc<dyn FileStore>,
    config: EditorConfig,
    timers: Mutex<HashMap<TabId, Timer>>,
    next_generation: AtomicU64,
}

/// 保存 future 被取消时清除 saving 标记，避免标签永久卡在保存中
struct SavingGuard<'a> {
    session: &'a SharedSession,
    tab_id: &'a str,
    armed: bool,
}

impl SavingGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for SavingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock(self.session).fail_save(self.tab_id);
        }
    }
}

fn lock(session: &SharedSession) -> MutexGuard<'_, EditorSession> {
    session.lock().unwrap_or_else(|e| e.into_inner())
}

impl SaveCoordinator {
    pub fn new(session: SharedSession, store: Arc<dyn FileStore>, config: EditorConfig) -> Arc<Self> {
        Arc::new(Self {
            session,
            store,
            config,
            timers: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        })
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<TabId, Timer>> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Save one tab. Returns immediately with `AlreadySaving` if a save for
    /// it is in flight. The cache is read when each write starts; if it moved
    /// on while writing, the newer content is written before returning.
    pub async fn save(&self, tab_id: &str) -> Result<SaveOutcome, SaveError> {
        let (project_id, begin) = {
            let mut session = lock(&self.session);
            (session.project_id().to_string(), session.begin_save(tab_id))
        };
        let (mut path, mut content) = match begin {
            BeginSave::Started { path, content } => (path, content),
            BeginSave::AlreadySaving => return Ok(SaveOutcome::AlreadySaving),
            BeginSave::Clean => return Ok(SaveOutcome::Clean),
            BeginSave::NotOpen => return Ok(SaveOutcome::NotOpen),
        };

        let mut guard = SavingGuard {
            session: &self.session,
            tab_id,
            armed: true,
        };

        loop {
            if let Err(source) = self.store.put(&project_id, &path, &content).await {
                guard.disarm();
                lock(&self.session).fail_save(tab_id);
                warn!(tab = tab_id, path = %path, error = %source, "Save failed");
                return Err(SaveError {
                    tab_id: tab_id.to_string(),
                    path,
                    source,
                });
            }

            let next = {
                let mut session = lock(&self.session);
                if session.complete_write(tab_id, &content) {
                    None
                } else {
                    session.pending_write(tab_id)
                }
            };
            match next {
                None => {
                    guard.disarm();
                    debug!(tab = tab_id, path = %path, "Saved");
                    return Ok(SaveOutcome::Saved);
                }
                Some((next_path, next_content)) => {
                    debug!(tab = tab_id, "Content changed during save, writing again");
                    path = next_path;
                    content = next_content;
                }
            }
        }
    }

    /// Save every dirty tab concurrently. Failures don't stop the others.
    pub async fn save_all(&self) -> SaveAllReport {
        let dirty = lock(&self.session).dirty_tabs();
        let results = join_all(dirty.iter().map(|id| self.save(id))).await;

        let mut report = SaveAllReport::default();
        for (id, result) in dirty.into_iter().zip(results) {
            match result {
                Ok(SaveOutcome::Saved) => report.saved.push(id),
                Ok(_) => report.skipped.push(id),
                Err(e) => report.failed.push(e),
            }
        }
        report
    }

    /// Restart the tab's debounce timer
    pub fn schedule(self: &Arc<Self>, tab_id: &str) {
        if !self.config.auto_save {
            return;
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let delay = self.config.autosave_debounce;
        let weak: Weak<Self> = Arc::downgrade(self);
        let tab = tab_id.to_string();

        // 持锁期间 spawn，保证计时器先登记再可能触发
        let mut timers = self.timers();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(this) = weak.upgrade() else {
                return;
            };
            // 先移除自己的计时器，之后的编辑会启动新计时器而不是取消本次保存
            this.finish_timer(&tab, generation);
            if let Err(e) = this.save(&tab).await {
                debug!(tab = %tab, error = %e, "Auto-save failed");
            }
        });

        if let Some(previous) = timers.insert(tab_id.to_string(), Timer { generation, handle }) {
            previous.handle.abort();
        }
    }

    fn finish_timer(&self, tab_id: &str, generation: u64) {
        let mut timers = self.timers();
        if timers.get(tab_id).is_some_and(|t| t.generation == generation) {
            timers.remove(tab_id);
        }
    }

    /// Cancel a pending debounced save. Returns whether one was pending.
    pub fn cancel(&self, tab_id: &str) -> bool {
        match self.timers().remove(tab_id) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn has_pending(&self, tab_id: &str) -> bool {
        self.timers().contains_key(tab_id)
    }

    /// Record an edit and, with auto-save on, restart the debounce timer
    pub fn edit(self: &Arc<Self>, tab_id: &str, content: impl Into<String>) -> bool {
        let edited = lock(&self.session).edit(tab_id, content);
        if edited {
            self.schedule(tab_id);
        }
        edited
    }

    /// Close a tab, cancelling its pending auto-save
    pub fn close(&self, tab_id: &str) -> Option<OpenFile> {
        self.cancel(tab_id);
        lock(&self.session).close(tab_id)
    }
}

impl Drop for SaveCoordinator {
    fn drop(&mut self) {
        let timers = self.timers.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, timer) in timers.drain() {
            timer.handle.abort();
        }
    }
}
