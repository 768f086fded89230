//! StateSaver: 后台防抖持久化 actor
//!
//! 通过 channel 接收保存信号，500ms 防抖窗口内合并多次请求为一次磁盘写入。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info};

use super::state::{write_state, AppState};

const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// 启动 StateSaver 后台 actor，返回用于触发保存的 Sender。
///
/// 每次发送 `()` 表示"项目元数据已变更"。channel 关闭时执行最后一次保存。
pub fn spawn_state_saver(app_state: Arc<RwLock<AppState>>, path: PathBuf) -> mpsc::Sender<()> {
    let (tx, mut rx) = mpsc::channel::<()>(32);

    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            // 防抖窗口：窗口内收到新信号则重置计时器
            let closed = loop {
                tokio::select! {
                    _ = tokio::time::sleep(DEBOUNCE_WINDOW) => break false,
                    signal = rx.recv() => {
                        if signal.is_none() {
                            break true;
                        }
                    }
                }
            };

            do_save(&app_state, &path).await;
            if closed {
                info!("StateSaver: channel closed during debounce, final save done");
                return;
            }
        }

        do_save(&app_state, &path).await;
        info!("StateSaver: channel closed, final save done");
    });

    tx
}

/// 短暂持锁 clone 状态，然后在 spawn_blocking 中序列化写入磁盘
async fn do_save(app_state: &Arc<RwLock<AppState>>, path: &PathBuf) {
    let snapshot = {
        let mut state = app_state.write().await;
        state.last_updated = Some(chrono::Utc::now());
        state.clone()
    };

    let path = path.clone();
    let result = tokio::task::spawn_blocking(move || write_state(&snapshot, &path)).await;

    match result {
        Ok(Ok(())) => info!("State saved to disk (debounced)"),
        Ok(Err(e)) => error!("StateSaver: failed to write state: {}", e),
        Err(e) => error!("StateSaver: spawn_blocking panicked: {}", e),
    }
}
