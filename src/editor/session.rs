//! EditorSession: 打开的标签页、活动标签与内容缓存
//!
//! 缓存（tab id → 最新输入内容）是保存的唯一来源；`OpenFile::content`
//! 是最近一次保存成功的内容。

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

use super::language::language_for_path;

pub type TabId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenFile {
    pub id: TabId,
    pub name: String,
    pub path: String,
    /// 最近一次保存（或打开）时的内容
    pub content: String,
    pub dirty: bool,
    pub saving: bool,
    pub language: &'static str,
}

/// Result of [`EditorSession::begin_save`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginSave {
    /// `saving` is now set; write `content` to `path`
    Started { path: String, content: String },
    AlreadySaving,
    Clean,
    NotOpen,
}

#[derive(Debug, Default)]
pub struct EditorSession {
    project_id: String,
    tabs: Vec<OpenFile>,
    active: Option<TabId>,
    cache: HashMap<TabId, String>,
    last_stamp: i64,
}

fn display_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

/// `path` equals `prefix` or lies inside the directory `prefix`
fn is_under(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

impl EditorSession {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn tabs(&self) -> &[OpenFile] {
        &self.tabs
    }

    pub fn tab(&self, tab_id: &str) -> Option<&OpenFile> {
        self.tabs.iter().find(|t| t.id == tab_id)
    }

    fn tab_mut(&mut self, tab_id: &str) -> Option<&mut OpenFile> {
        self.tabs.iter_mut().find(|t| t.id == tab_id)
    }

    pub fn tab_by_path(&self, path: &str) -> Option<&OpenFile> {
        self.tabs.iter().find(|t| t.path == path)
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active(&self) -> Option<&OpenFile> {
        self.active.as_deref().and_then(|id| self.tab(id))
    }

    pub fn cached_content(&self, tab_id: &str) -> Option<&str> {
        self.cache.get(tab_id).map(String::as_str)
    }

    /// 路径 + 时间戳；同一毫秒内多次打开时时间戳强制递增
    fn next_tab_id(&mut self, path: &str) -> TabId {
        let stamp = Utc::now().timestamp_millis().max(self.last_stamp + 1);
        self.last_stamp = stamp;
        format!("{}-{}", path, stamp)
    }

    /// Open `path`, or activate its tab if already open. Returns the tab id.
    pub fn open(
        &mut self,
        name: impl Into<String>,
        path: impl Into<String>,
        content: impl Into<String>,
    ) -> TabId {
        let path = path.into();
        if let Some(existing) = self.tab_by_path(&path) {
            let id = existing.id.clone();
            self.active = Some(id.clone());
            return id;
        }

        let id = self.next_tab_id(&path);
        let content = content.into();
        self.cache.insert(id.clone(), content.clone());
        self.tabs.push(OpenFile {
            id: id.clone(),
            name: name.into(),
            language: language_for_path(&path),
            path,
            content,
            dirty: false,
            saving: false,
        });
        self.active = Some(id.clone());
        id
    }

    /// Record typed content. Returns false if the tab is not open.
    pub fn edit(&mut self, tab_id: &str, content: impl Into<String>) -> bool {
        let Some(tab) = self.tab_mut(tab_id) else {
            return false;
        };
        tab.dirty = true;
        self.cache.insert(tab_id.to_string(), content.into());
        true
    }

    /// Close a tab and drop its cache. Closing the active tab activates the
    /// tab now at the same index, clamped to the last one.
    pub fn close(&mut self, tab_id: &str) -> Option<OpenFile> {
        let index = self.tabs.iter().position(|t| t.id == tab_id)?;
        let removed = self.tabs.remove(index);
        self.cache.remove(tab_id);

        if self.active.as_deref() == Some(tab_id) {
            self.active = if self.tabs.is_empty() {
                None
            } else {
                let next = index.min(self.tabs.len() - 1);
                Some(self.tabs[next].id.clone())
            };
        }
        Some(removed)
    }

    pub fn activate(&mut self, tab_id: &str) -> bool {
        if self.tab(tab_id).is_none() {
            return false;
        }
        self.active = Some(tab_id.to_string());
        true
    }

    pub fn clear_active(&mut self) {
        self.active = None;
    }

    pub fn begin_save(&mut self, tab_id: &str) -> BeginSave {
        let content = match self.cache.get(tab_id) {
            Some(content) => content.clone(),
            None => return BeginSave::NotOpen,
        };
        let Some(tab) = self.tab_mut(tab_id) else {
            return BeginSave::NotOpen;
        };
        if tab.saving {
            return BeginSave::AlreadySaving;
        }
        if !tab.dirty {
            return BeginSave::Clean;
        }
        tab.saving = true;
        BeginSave::Started {
            path: tab.path.clone(),
            content,
        }
    }

    /// Current path and cached content of an open tab
    pub fn pending_write(&self, tab_id: &str) -> Option<(String, String)> {
        let tab = self.tab(tab_id)?;
        let content = self.cache.get(tab_id)?;
        Some((tab.path.clone(), content.clone()))
    }

    /// A write of `written` succeeded. Returns true when the tab is settled:
    /// the cache still equals what was written (or the tab was closed). False
    /// means an edit landed during the write and another write is needed.
    pub fn complete_write(&mut self, tab_id: &str, written: &str) -> bool {
        let up_to_date = self.cache.get(tab_id).map(|c| c == written);
        let Some(tab) = self.tab_mut(tab_id) else {
            return true;
        };
        tab.content = written.to_string();
        if up_to_date == Some(false) {
            return false;
        }
        tab.dirty = false;
        tab.saving = false;
        true
    }

    /// 保存失败：清除 saving，保留 dirty 与缓存中的编辑
    pub fn fail_save(&mut self, tab_id: &str) {
        if let Some(tab) = self.tab_mut(tab_id) {
            tab.saving = false;
        }
    }

    pub fn dirty_tabs(&self) -> Vec<TabId> {
        self.tabs
            .iter()
            .filter(|t| t.dirty)
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.tabs.iter().any(|t| t.dirty)
    }

    /// File or directory renamed outside the editor. Returns renamed tab ids.
    pub fn rename_path(&mut self, old_path: &str, new_path: &str) -> Vec<TabId> {
        let mut renamed = Vec::new();
        for tab in self.tabs.iter_mut().filter(|t| is_under(&t.path, old_path)) {
            tab.path = format!("{}{}", new_path, &tab.path[old_path.len()..]);
            tab.name = display_name(&tab.path);
            tab.language = language_for_path(&tab.path);
            renamed.push(tab.id.clone());
        }
        renamed
    }

    /// File or directory deleted outside the editor. Returns closed tab ids.
    pub fn close_path(&mut self, path: &str) -> Vec<TabId> {
        let doomed: Vec<TabId> = self
            .tabs
            .iter()
            .filter(|t| is_under(&t.path, path))
            .map(|t| t.id.clone())
            .collect();
        for id in &doomed {
            self.close(id);
        }
        doomed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with(paths: &[&str]) -> (EditorSession, Vec<TabId>) {
        let mut session = EditorSession::new("p1");
        let ids = paths
            .iter()
            .map(|p| session.open(display_name(p), *p, format!("// {}", p)))
            .collect();
        (session, ids)
    }

    #[test]
    fn test_open_existing_path_reuses_tab() {
        let (mut session, ids) = session_with(&["src/a.ts", "src/b.ts"]);
        assert_eq!(session.active_id(), Some(ids[1].as_str()));

        let again = session.open("a.ts", "src/a.ts", "ignored");
        assert_eq!(again, ids[0]);
        assert_eq!(session.tabs().len(), 2);
        assert_eq!(session.active_id(), Some(ids[0].as_str()));
        assert_eq!(session.cached_content(&ids[0]), Some("// src/a.ts"));
    }

    #[test]
    fn test_reopen_after_close_gets_fresh_id() {
        let (mut session, ids) = session_with(&["src/a.ts"]);
        session.close(&ids[0]);
        let reopened = session.open("a.ts", "src/a.ts", "");
        assert_ne!(reopened, ids[0]);
        assert!(reopened.starts_with("src/a.ts-"));
    }

    #[test]
    fn test_close_active_middle_tab_activates_same_index() {
        let (mut session, ids) = session_with(&["a.ts", "b.ts", "c.ts"]);
        session.activate(&ids[1]);
        session.close(&ids[1]);
        assert_eq!(session.active().map(|t| t.path.as_str()), Some("c.ts"));
    }

    #[test]
    fn test_close_active_last_tab_activates_new_last() {
        let (mut session, ids) = session_with(&["a.ts", "b.ts", "c.ts"]);
        session.close(&ids[2]);
        assert_eq!(session.active_id(), Some(ids[1].as_str()));

        session.close(&ids[0]);
        session.close(&ids[1]);
        assert!(session.tabs().is_empty());
        assert_eq!(session.active_id(), None);
    }

    #[test]
    fn test_close_inactive_tab_keeps_active() {
        let (mut session, ids) = session_with(&["a.ts", "b.ts"]);
        let closed = session.close(&ids[0]).unwrap();
        assert_eq!(closed.path, "a.ts");
        assert_eq!(session.active_id(), Some(ids[1].as_str()));
        assert!(session.cached_content(&ids[0]).is_none());
    }

    #[test]
    fn test_activate_unknown_is_noop() {
        let (mut session, ids) = session_with(&["a.ts"]);
        assert!(!session.activate("nope"));
        assert_eq!(session.active_id(), Some(ids[0].as_str()));
        session.clear_active();
        assert!(session.active().is_none());
    }

    #[test]
    fn test_edit_marks_dirty_and_updates_cache_only() {
        let (mut session, ids) = session_with(&["a.ts"]);
        assert!(session.edit(&ids[0], "let x = 2;"));
        let tab = session.tab(&ids[0]).unwrap();
        assert!(tab.dirty);
        assert_eq!(tab.content, "// a.ts");
        assert_eq!(session.cached_content(&ids[0]), Some("let x = 2;"));
        assert!(session.has_unsaved_changes());
        assert!(!session.edit("closed-tab", "x"));
    }

    #[test]
    fn test_save_lifecycle() {
        let (mut session, ids) = session_with(&["a.ts"]);
        let id = &ids[0];
        assert_eq!(session.begin_save(id), BeginSave::Clean);

        session.edit(id, "v1");
        assert_eq!(
            session.begin_save(id),
            BeginSave::Started {
                path: "a.ts".to_string(),
                content: "v1".to_string()
            }
        );
        assert_eq!(session.begin_save(id), BeginSave::AlreadySaving);

        // 保存期间又有编辑
        session.edit(id, "v2");
        assert!(!session.complete_write(id, "v1"));
        assert!(session.tab(id).unwrap().saving);
        assert_eq!(session.pending_write(id), Some(("a.ts".to_string(), "v2".to_string())));

        assert!(session.complete_write(id, "v2"));
        let tab = session.tab(id).unwrap();
        assert!(!tab.dirty && !tab.saving);
        assert_eq!(tab.content, "v2");
    }

    #[test]
    fn test_fail_save_keeps_dirty() {
        let (mut session, ids) = session_with(&["a.ts"]);
        session.edit(&ids[0], "unsaved");
        session.begin_save(&ids[0]);
        session.fail_save(&ids[0]);
        let tab = session.tab(&ids[0]).unwrap();
        assert!(tab.dirty);
        assert!(!tab.saving);
        assert_eq!(session.dirty_tabs(), vec![ids[0].clone()]);
    }

    #[test]
    fn test_rename_and_close_path() {
        let (mut session, ids) = session_with(&["src/app/a.ts", "src/app/b.html", "src/apple.ts"]);
        let renamed = session.rename_path("src/app", "src/core");
        assert_eq!(renamed, vec![ids[0].clone(), ids[1].clone()]);
        assert_eq!(session.tab(&ids[1]).unwrap().path, "src/core/b.html");
        assert_eq!(session.tab(&ids[2]).unwrap().path, "src/apple.ts");

        session.rename_path("src/apple.ts", "src/apple.js");
        let tab = session.tab(&ids[2]).unwrap();
        assert_eq!(tab.name, "apple.js");
        assert_eq!(tab.language, "javascript");

        let closed = session.close_path("src/core");
        assert_eq!(closed.len(), 2);
        assert_eq!(session.tabs().len(), 1);
    }
}
