//! DevBench core: project provisioning, command output streaming and the
//! editor-side session/save state machine.

pub mod config;
pub mod editor;
pub mod project;
pub mod server;
pub mod util;
