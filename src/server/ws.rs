use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    response::IntoResponse,
};
use tracing::{debug, info, warn};

use crate::project::event::OutputEvent;
use crate::server::context::AppContext;

/// `GET /projects/:id/logs`: LogChannel WebSocket
///
/// 连接后服务端只推送 `{type, data, timestamp}` 文本帧；客户端消息被忽略。
/// 同一项目的新连接会替换旧连接，旧连接随后被关闭。
pub async fn logs_handler(
    ws: WebSocketUpgrade,
    Path(project_id): Path<String>,
    State(ctx): State<AppContext>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, project_id, ctx))
}

async fn handle_socket(mut socket: WebSocket, project_id: String, ctx: AppContext) {
    let (subscription, mut rx) = ctx.channels.subscribe(&project_id);
    info!(project = %project_id, "Log channel connected");

    if send_event(&mut socket, &OutputEvent::info("Log channel connected"))
        .await
        .is_err()
    {
        ctx.channels.release(&project_id, subscription);
        return;
    }

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => {
                    if let Err(e) = send_event(&mut socket, &event).await {
                        debug!(project = %project_id, error = %e, "Log channel send failed");
                        break;
                    }
                }
                // 被新订阅替换或项目被删除
                None => {
                    debug!(project = %project_id, "Log channel subscription ended");
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(project = %project_id, error = %e, "Log channel socket error");
                    break;
                }
            },
        }
    }

    ctx.channels.release(&project_id, subscription);
    info!(project = %project_id, "Log channel disconnected");
}

async fn send_event(socket: &mut WebSocket, event: &OutputEvent) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).map_err(axum::Error::new)?;
    socket.send(Message::Text(text)).await
}
