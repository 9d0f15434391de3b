use application::TransportFrame;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::UserId;
use futures_util::{SinkExt, StreamExt};

use crate::state::AppState;

/// 运行一条已握手的 WebSocket 连接
///
/// 发送任务把中枢投递到这条连接的帧写出去，接收任务把客户端信号交给中枢；
/// 任意一边结束即视为断开，随后注销登记。
pub async fn serve(socket: WebSocket, state: AppState, user_id: UserId) {
    let (handle, mut frames) = state.transport.open();
    let connection = match state.hub.open_connection(user_id, handle.clone()).await {
        Ok(connection) => connection,
        Err(err) => {
            tracing::error!(user_id = %user_id, error = %err, "连接建立失败");
            return;
        }
    };

    let (mut sender, mut incoming) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            match frame {
                TransportFrame::Event(event) => {
                    let text = match event.to_json() {
                        Ok(text) => text,
                        Err(err) => {
                            tracing::warn!(event = %event.name, error = %err, "事件序列化失败");
                            continue;
                        }
                    };
                    if sender.send(WsMessage::Text(text.into())).await.is_err() {
                        tracing::warn!("WebSocket 写入失败");
                        break;
                    }
                }
                TransportFrame::Close => {
                    let _ = sender.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }
    });

    let mut recv_task = {
        let hub = state.hub.clone();
        let connection = connection.clone();
        tokio::spawn(async move {
            while let Some(message) = incoming.next().await {
                match message {
                    Ok(WsMessage::Text(text)) => {
                        hub.handle_text_frame(&connection, text.as_str()).await;
                    }
                    Ok(WsMessage::Close(_)) => return "client close",
                    Ok(WsMessage::Binary(_)) => {
                        tracing::debug!(user_id = %connection.user_id, "忽略二进制帧");
                    }
                    Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {}
                    Err(err) => {
                        tracing::warn!(user_id = %connection.user_id, error = %err, "WebSocket 读取失败");
                        return "transport error";
                    }
                }
            }
            "transport close"
        })
    };

    let reason = tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            "server close"
        }
        result = &mut recv_task => {
            send_task.abort();
            result.unwrap_or("transport error")
        }
    };

    handle.mark_closed();
    state.hub.close_connection(&connection, reason).await;
}
