//! WebSocket 传输
//!
//! 每个连接一个写任务（消费注册表中的出站队列）和一个读任务（解析入站事件
//! 交给中继）。任意一个任务结束即视为断开，断开清理恰好执行一次。

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use domain::{ClientEvent, ConnectionId, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use application::RoomRelay;

use crate::state::AppState;

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.relay))
}

async fn handle_socket(socket: WebSocket, relay: Arc<RoomRelay>) {
    let connection_id = ConnectionId::new();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ServerEvent>();
    // 控制帧（pong）不经过注册表，单独排队
    let (control_tx, mut control_rx) = mpsc::unbounded_channel::<WsMessage>();

    relay.connect(connection_id, event_tx).await;
    info!(%connection_id, "websocket connected");

    let (mut sender, mut incoming) = socket.split();

    let mut send_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                Some(event) = event_rx.recv() => match serde_json::to_string(&event) {
                    Ok(json) => WsMessage::Text(json.into()),
                    Err(err) => {
                        warn!(%connection_id, error = %err, "failed to serialize server event");
                        continue;
                    }
                },
                Some(control) = control_rx.recv() => control,
                else => break,
            };
            if let Err(err) = sender.send(frame).await {
                debug!(%connection_id, error = %err, "websocket send failed");
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn({
        let relay = relay.clone();
        async move {
            while let Some(frame) = incoming.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(err) => {
                        debug!(%connection_id, error = %err, "websocket receive failed");
                        break;
                    }
                };
                match frame {
                    WsMessage::Text(text) => {
                        handle_text(&relay, connection_id, text.as_str()).await;
                    }
                    WsMessage::Binary(_) => {
                        reply(
                            &relay,
                            connection_id,
                            ServerEvent::error(None, "BAD_FRAME", "binary frames are not supported"),
                        )
                        .await;
                    }
                    WsMessage::Ping(data) => {
                        if control_tx.send(WsMessage::Pong(data)).is_err() {
                            break;
                        }
                    }
                    WsMessage::Pong(_) => {}
                    WsMessage::Close(_) => {
                        debug!(%connection_id, "close frame received");
                        break;
                    }
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    relay.disconnect(connection_id).await;
    info!(%connection_id, "websocket disconnected");
}

async fn handle_text(relay: &RoomRelay, connection_id: ConnectionId, text: &str) {
    let response = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => {
            debug!(%connection_id, event = event.name(), room_id = event.room_id(), "event received");
            relay.handle_event(connection_id, event).await
        }
        Err(err) => {
            warn!(%connection_id, error = %err, "unparsable frame");
            ServerEvent::error(None, "BAD_FRAME", err.to_string())
        }
    };
    reply(relay, connection_id, response).await;
}

async fn reply(relay: &RoomRelay, connection_id: ConnectionId, event: ServerEvent) {
    if !relay.registry().send_to(connection_id, event).await {
        debug!(%connection_id, "reply dropped, connection already gone");
    }
}
