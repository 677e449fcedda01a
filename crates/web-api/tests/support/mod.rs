#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{ChatService, ChatServiceDependencies, ConnectionRegistry, RoomRelay, SystemClock};
use futures_util::{SinkExt, StreamExt};
use infrastructure::Storage;
use serde_json::{json, Value};
use tokio::{net::TcpListener, net::TcpStream, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 在随机端口上运行的完整服务，使用进程内存储
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(false).await
    }

    pub async fn start_with(announce_disconnects: bool) -> Self {
        let storage = Storage::in_memory();
        let chat_service = ChatService::new(ChatServiceDependencies {
            room_repository: storage.room_repository.clone(),
            user_repository: storage.user_repository.clone(),
            message_repository: storage.message_repository.clone(),
        });
        let relay = RoomRelay::new(
            Arc::new(ConnectionRegistry::new()),
            storage.user_repository.clone(),
            Arc::new(SystemClock),
        )
        .with_disconnect_announcements(announce_disconnects);

        let state = AppState::new(Arc::new(chat_service), Arc::new(relay));
        let app = router(state, &["*".to_string()]);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// 建立连接并等待服务端完成登记
    pub async fn connect_ws(&self) -> WsClient {
        let (mut socket, _) = connect_async(format!("ws://{}/ws", self.addr))
            .await
            .expect("websocket connect");
        // 离开一个未加入的房间不改变状态，收到确认即说明连接已登记
        send_event(
            &mut socket,
            json!({ "event": "leaveRoom", "data": { "roomId": "handshake" } }),
        )
        .await;
        let ack = next_event(&mut socket).await;
        assert_eq!(ack["event"], "ack", "unexpected first event: {ack}");
        socket
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn send_event(socket: &mut WsClient, event: Value) {
    socket
        .send(TungsteniteMessage::Text(event.to_string().into()))
        .await
        .expect("send frame");
}

/// 读取下一个 JSON 事件，跳过控制帧
pub async fn next_event(socket: &mut WsClient) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for event")
            .expect("socket closed")
            .expect("websocket error");
        if let TungsteniteMessage::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("json event");
        }
    }
}

/// 在短时间内没有收到任何事件
pub async fn assert_silent(socket: &mut WsClient) {
    let next = timeout(Duration::from_millis(200), socket.next()).await;
    assert!(next.is_err(), "unexpected frame: {next:?}");
}
