use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderValue, Method},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use application::{EnterRoomRequest, EnteredRoom, SendMessageRequest};
use domain::{Message, MessageView, Room, User};

use crate::{error::ApiError, state::AppState, websocket::websocket_handler};

/// 成功响应：`{"success": true, "data": ...}`
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    success: bool,
    data: T,
}

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data,
    })
}

type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomPayload {
    room_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnterRoomPayload {
    user_name: String,
    room_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessagePayload {
    room_id: String,
    user_id: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    connections: usize,
}

pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_handler))
        .route("/rooms", get(list_rooms))
        .route("/rooms/createroom", post(create_room))
        .route("/rooms/enterroom", post(enter_room))
        .route("/rooms/sendmessage", post(send_message))
        .route("/rooms/messageshistory/{room_id}", get(message_history))
        .route("/rooms/{user_id}", delete(remove_user))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(cors_origins)),
        )
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        let values: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| {
                let origin = origin.trim_end_matches('/');
                match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!(origin, "ignoring invalid cors origin");
                        None
                    }
                }
            })
            .collect();
        AllowOrigin::list(values)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE])
}

async fn health(State(state): State<AppState>) -> Json<Envelope<Health>> {
    ok(Health {
        status: "ok",
        connections: state.relay.registry().connection_count().await,
    })
}

async fn create_room(
    State(state): State<AppState>,
    payload: Result<Json<CreateRoomPayload>, JsonRejection>,
) -> ApiResult<Room> {
    let Json(payload) = payload?;
    let room = state.chat_service.create_room(payload.room_name).await?;
    Ok(ok(room))
}

async fn list_rooms(State(state): State<AppState>) -> ApiResult<Vec<Room>> {
    Ok(ok(state.chat_service.list_rooms().await?))
}

async fn enter_room(
    State(state): State<AppState>,
    payload: Result<Json<EnterRoomPayload>, JsonRejection>,
) -> ApiResult<EnteredRoom> {
    let Json(payload) = payload?;
    let entered = state
        .chat_service
        .enter_room(EnterRoomRequest {
            user_name: payload.user_name,
            room_id: payload.room_id,
        })
        .await?;
    Ok(ok(entered))
}

async fn send_message(
    State(state): State<AppState>,
    payload: Result<Json<SendMessagePayload>, JsonRejection>,
) -> ApiResult<Option<Message>> {
    let Json(payload) = payload?;
    let stored = state
        .chat_service
        .send_message(SendMessageRequest {
            room_id: payload.room_id,
            user_id: payload.user_id,
            message: payload.message,
        })
        .await?;
    Ok(ok(stored))
}

async fn message_history(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> ApiResult<Vec<MessageView>> {
    Ok(ok(state.chat_service.message_history(&room_id).await?))
}

async fn remove_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Option<User>> {
    Ok(ok(state.chat_service.remove_user(&user_id).await?))
}
