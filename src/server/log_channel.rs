use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::project::event::OutputEvent;
use crate::util::file_logger::OutputLogBook;

/// 订阅者句柄：无界通道，publish 永不阻塞
pub type Subscriber = mpsc::UnboundedSender<OutputEvent>;

/// `register` 返回的订阅标识，用于只释放自己的订阅
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    tx: Subscriber,
}

/// 全局日志通道注册表，生命周期 = Core 进程生命周期
///
/// 每个项目 id 至多一个在线订阅者。新订阅直接替换旧订阅（旧的被丢弃，
/// 不会收到通知），正在运行的命令不受影响。
#[derive(Default)]
pub struct LogChannelRegistry {
    channels: RwLock<HashMap<String, Subscription>>,
    next_id: AtomicU64,
}

pub type SharedLogChannels = Arc<LogChannelRegistry>;

impl LogChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, project_id: &str, tx: Subscriber) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        if channels
            .insert(project_id.to_string(), Subscription { id, tx })
            .is_some()
        {
            info!(project = project_id, "Log channel subscriber replaced");
        } else {
            debug!(project = project_id, "Log channel subscriber registered");
        }
        id
    }

    /// Register a fresh subscriber and hand back its receiving end
    pub fn subscribe(
        &self,
        project_id: &str,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<OutputEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.register(project_id, tx), rx)
    }

    pub fn unregister(&self, project_id: &str) -> bool {
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        channels.remove(project_id).is_some()
    }

    /// 只在当前订阅仍是 `id` 时移除（WS 断开时调用，避免误删重连后的新订阅）
    pub fn release(&self, project_id: &str, id: SubscriptionId) -> bool {
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        match channels.get(project_id) {
            Some(sub) if sub.id == id => {
                channels.remove(project_id);
                true
            }
            _ => false,
        }
    }

    /// Deliver to the current subscriber. Returns whether anyone received it;
    /// no subscriber is not an error.
    pub fn publish(&self, project_id: &str, event: OutputEvent) -> bool {
        let stale = {
            let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
            match channels.get(project_id) {
                Some(sub) => match sub.tx.send(event) {
                    Ok(()) => return true,
                    Err(_) => Some(sub.id),
                },
                None => None,
            }
        };

        // 接收端已关闭：清理失效订阅
        if let Some(id) = stale {
            self.release(project_id, id);
            debug!(project = project_id, "Dropped stale log channel subscriber");
        }
        false
    }

    pub fn is_registered(&self, project_id: &str) -> bool {
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        channels.contains_key(project_id)
    }
}

/// 绑定到单个项目的发布句柄，Provisioner 与 CommandExecutor 通过它输出事件
#[derive(Clone)]
pub struct ProjectChannel {
    registry: SharedLogChannels,
    channel_id: String,
    project_id: Option<String>,
    log_book: Option<Arc<OutputLogBook>>,
}

impl ProjectChannel {
    pub fn new(registry: SharedLogChannels, channel_id: impl Into<String>) -> Self {
        Self {
            registry,
            channel_id: channel_id.into(),
            project_id: None,
            log_book: None,
        }
    }

    /// Also append every emitted event to the project's log file
    pub fn with_log_book(mut self, project_id: impl Into<String>, book: Arc<OutputLogBook>) -> Self {
        self.project_id = Some(project_id.into());
        self.log_book = Some(book);
        self
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn emit(&self, event: OutputEvent) {
        if let (Some(book), Some(project_id)) = (&self.log_book, &self.project_id) {
            book.append(project_id, &event);
        }
        self.registry.publish(&self.channel_id, event);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(OutputEvent::info(message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(OutputEvent::error(message));
    }
}
