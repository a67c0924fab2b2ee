// SPDX-License-Identifier: MIT OR Apache-2.0
//! The WebSocket progress endpoint.
//!
//! The upgrade authenticates against the job's auth token; the upgraded
//! socket's send half becomes the entity's single peer, and the receive
//! half feeds the ready handshake and disconnect detection back to the
//! entity. The job itself never depends on the socket staying open.

use crate::{AppState, respond_err, validation};
use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use shelf_error::{ErrorCode, ShelfError};
use shelf_jobs::{
    AuthToken, CLOSE_UNAUTHORIZED, JobHandle, ProgressEnvelope, ProgressSink, SinkError,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// `GET /ws/progress?jobId&token`
pub async fn cmd_ws_upgrade(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: axum::http::HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let job_id = match params
        .get("jobId")
        .ok_or_else(|| ShelfError::new(ErrorCode::InvalidRequest, "jobId query parameter required"))
        .and_then(|raw| validation::validate_job_id(raw))
    {
        Ok(id) => id,
        Err(err) => return respond_err(&err),
    };

    // Token arrives as a query parameter or an Authorization bearer.
    let raw_token = params.get("token").cloned().or_else(|| {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string)
    });
    let Some(token) = raw_token.and_then(|raw| raw.trim().parse::<Uuid>().ok()) else {
        return respond_err(&ShelfError::new(
            ErrorCode::Unauthorized,
            "Missing or malformed token",
        ));
    };

    let handle = state.jobs.handle(job_id).await;
    if !token_is_current(&handle, token).await {
        return respond_err(&ShelfError::new(
            ErrorCode::Unauthorized,
            "Invalid or expired token",
        ));
    }

    ws.on_upgrade(move |socket| serve_socket(handle, token, socket))
}

async fn token_is_current(handle: &JobHandle, presented: Uuid) -> bool {
    match handle.get_state_and_auth().await {
        Ok((Some(_), Some(AuthToken { value, expires_at }))) => {
            value == presented && chrono::Utc::now().timestamp_millis() < expires_at
        }
        _ => false,
    }
}

async fn serve_socket(handle: JobHandle, token: Uuid, socket: WebSocket) {
    let (sender, receiver) = socket.split();
    let mut sink = WsSink { sender };

    // The upgrade check raced the entity; re-verify before adopting the
    // socket, closing with the unauthorized code if the token moved.
    if !token_is_current(&handle, token).await {
        let _ = sink.close(CLOSE_UNAUTHORIZED, "Invalid or expired token").await;
        return;
    }

    let generation = match handle.attach_peer(Box::new(sink)).await {
        Ok(generation) => generation,
        Err(_) => return,
    };

    read_loop(&handle, generation, receiver).await;
    handle.detach_peer(generation).await;
}

/// Feed client frames to the entity until the socket closes.
async fn read_loop(
    handle: &JobHandle,
    generation: u64,
    mut receiver: SplitStream<WebSocket>,
) {
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let is_ready = serde_json::from_str::<serde_json::Value>(text.as_str())
                    .ok()
                    .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_string))
                    .is_some_and(|t| t == "ready");
                if is_ready {
                    handle.client_ready(generation).await;
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    debug!(job_id = %handle.job_id(), "websocket peer disconnected");
}

/// The entity-facing wrapper over the socket's send half.
struct WsSink {
    sender: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl ProgressSink for WsSink {
    async fn send(&mut self, envelope: &ProgressEnvelope) -> Result<(), SinkError> {
        let text =
            serde_json::to_string(envelope).map_err(|e| SinkError(e.to_string()))?;
        self.sender
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| SinkError(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), SinkError> {
        self.sender
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.to_string().into(),
            })))
            .await
            .map_err(|e| SinkError(e.to_string()))
    }
}
