//! Output events pushed over a project's log channel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Stdout,
    Stderr,
    Info,
    Error,
}

/// 单条进程输出（一行）或编排信息，按产生顺序投递给订阅者
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputEvent {
    #[serde(rename = "type")]
    pub kind: OutputKind,
    pub data: String,
    pub timestamp: DateTime<Utc>,
}

impl OutputEvent {
    pub fn new(kind: OutputKind, data: impl Into<String>) -> Self {
        Self {
            kind,
            data: data.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn info(data: impl Into<String>) -> Self {
        Self::new(OutputKind::Info, data)
    }

    pub fn error(data: impl Into<String>) -> Self {
        Self::new(OutputKind::Error, data)
    }
}
