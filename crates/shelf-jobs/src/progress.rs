// SPDX-License-Identifier: MIT OR Apache-2.0
//! The versioned progress envelope and the WebSocket seam.

use crate::state::Pipeline;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wire contract version carried in every frame.
pub const PROGRESS_CONTRACT_VERSION: &str = "1.0.0";

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Closed because the upgrade was not authorized.
pub const CLOSE_UNAUTHORIZED: u16 = 4401;
/// Closed because a newer connection took over the job.
pub const CLOSE_SUPERSEDED: u16 = 4409;

/// Frame discriminator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    /// Progress tick.
    JobProgress,
    /// Terminal success with the result payload.
    JobComplete,
    /// Terminal failure (or cancellation) with the error payload.
    Error,
    /// Acknowledges the client's `ready` frame.
    ReadyAck,
}

/// One WebSocket frame, v1.0.0.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEnvelope {
    /// Frame discriminator.
    #[serde(rename = "type")]
    pub frame: FrameType,
    /// Job id.
    pub job_id: Uuid,
    /// Pipeline the job belongs to.
    pub pipeline: Pipeline,
    /// Epoch-ms send time.
    pub timestamp: i64,
    /// Envelope contract version.
    pub version: String,
    /// Pipeline-specific payload.
    pub payload: serde_json::Value,
}

impl ProgressEnvelope {
    /// A frame stamped with the current time and contract version.
    pub fn new(frame: FrameType, job_id: Uuid, pipeline: Pipeline, payload: serde_json::Value) -> Self {
        Self {
            frame,
            job_id,
            pipeline,
            timestamp: Utc::now().timestamp_millis(),
            version: PROGRESS_CONTRACT_VERSION.to_string(),
            payload,
        }
    }
}

/// A send failure on the progress channel. Never fails the job: the
/// entity drops the peer and keeps persisting.
#[derive(Debug, thiserror::Error)]
#[error("progress sink: {0}")]
pub struct SinkError(pub String);

/// The entity's view of its single WebSocket peer.
///
/// The daemon implements this over the upgraded socket's send half; tests
/// implement it over channels.
#[async_trait]
pub trait ProgressSink: Send {
    /// Send one envelope as a text frame.
    async fn send(&mut self, envelope: &ProgressEnvelope) -> Result<(), SinkError>;

    /// Close the peer with a code and reason.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_schema_v1() {
        let envelope = ProgressEnvelope::new(
            FrameType::JobProgress,
            Uuid::new_v4(),
            Pipeline::AiScan,
            serde_json::json!({"progress": 0.5, "status": "scanning"}),
        );
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "job_progress");
        assert_eq!(json["pipeline"], "ai_scan");
        assert_eq!(json["version"], "1.0.0");
        assert!(json["jobId"].is_string());
        assert!(json["timestamp"].is_i64());
        assert_eq!(json["payload"]["progress"], 0.5);
    }

    #[test]
    fn frame_types_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&FrameType::ReadyAck).unwrap(),
            "\"ready_ack\""
        );
        assert_eq!(
            serde_json::to_string(&FrameType::JobComplete).unwrap(),
            "\"job_complete\""
        );
    }
}
