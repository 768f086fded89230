//! Editing session state: open tabs, content cache and coordinated saves

pub mod language;
pub mod save;
pub mod session;
pub mod store;

pub use language::language_for_path;
pub use save::{EditorConfig, SaveAllReport, SaveCoordinator, SaveError, SaveOutcome, SharedSession};
pub use session::{BeginSave, EditorSession, OpenFile, TabId};
pub use store::{FileStore, LocalFileStore, RemoteFileStore, StoreError};
