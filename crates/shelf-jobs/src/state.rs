// SPDX-License-Identifier: MIT OR Apache-2.0
//! Job state, status machine, and auth tokens.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The asynchronous job types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pipeline {
    /// AI bookshelf image scan.
    AiScan,
    /// CSV import.
    CsvImport,
    /// Batch enrichment.
    BatchEnrichment,
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AiScan => "ai_scan",
            Self::CsvImport => "csv_import",
            Self::BatchEnrichment => "batch_enrichment",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of one job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, no progress yet.
    Initialized,
    /// At least one progress update applied.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Canceled by request.
    Canceled,
}

impl JobStatus {
    /// True once the job can never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Whether a job in this status may move to `next`.
    ///
    /// Any live status may re-enter `processing` (that self-loop is what
    /// progress ticks are) or finish in any of the three terminal
    /// statuses; a terminal status permits nothing. `initialized` going
    /// straight to a terminal status covers trivially-empty jobs that
    /// finish without a single progress tick.
    pub fn permits(self, next: JobStatus) -> bool {
        if self.is_terminal() || next == Self::Initialized {
            return false;
        }
        true
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initialized => "initialized",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Photos (batch scan)
// ---------------------------------------------------------------------------

/// Per-photo status inside a batch scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoStatus {
    /// Waiting its turn.
    Queued,
    /// Currently being scanned.
    Processing,
    /// Scanned successfully.
    Complete,
    /// Scan failed.
    Failed,
}

/// One slot of the fixed-length `photos` array.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoState {
    /// Position in the batch.
    pub index: u32,
    /// Current status.
    pub status: PhotoStatus,
    /// Books detected in this photo so far.
    pub books_found: u32,
    /// Failure detail, when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PhotoState {
    /// A queued slot.
    pub fn queued(index: u32) -> Self {
        Self {
            index,
            status: PhotoStatus::Queued,
            books_found: 0,
            error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// JobError / AuthToken
// ---------------------------------------------------------------------------

/// The stored failure of a job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobError {
    /// Stable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Whether resubmitting the job may succeed.
    #[serde(default)]
    pub retryable: bool,
}

/// WebSocket auth token bound to exactly one job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthToken {
    /// The token value.
    pub value: Uuid,
    /// Epoch-ms expiry. Enforced at the millisecond boundary.
    pub expires_at: i64,
}

impl AuthToken {
    /// A fresh random token valid for `ttl_ms` from now.
    pub fn generate(ttl_ms: i64) -> Self {
        Self {
            value: Uuid::new_v4(),
            expires_at: Utc::now().timestamp_millis() + ttl_ms,
        }
    }

    /// True when the token is still valid at `now_ms`.
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at
    }
}

// ---------------------------------------------------------------------------
// JobState
// ---------------------------------------------------------------------------

/// The authoritative record of one job, owned by its entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    /// Job id.
    pub job_id: Uuid,
    /// Which pipeline drives this job.
    pub pipeline: Pipeline,
    /// Units of work, when known up front.
    pub total_count: u32,
    /// Units finished so far.
    pub processed_count: u32,
    /// Progress in `[0, 1]`.
    pub progress: f64,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Cancellation flag; sticky once set.
    pub canceled: bool,
    /// Why the job was canceled, when given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    /// Epoch-ms creation time.
    pub start_time: i64,
    /// Epoch-ms time of the last applied update.
    pub last_update_time: i64,
    /// Monotone counter; ticks with every applied mutation.
    pub version: u64,
    /// Pipeline-specific success payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Stored failure, when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    /// Fixed-length per-photo slots for batch image jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photos: Option<Vec<PhotoState>>,
    /// Sum of `photos[*].books_found`, recomputed on photo updates.
    #[serde(default)]
    pub total_books_found: u32,
}

impl JobState {
    /// Apply a status transition if [`JobStatus::permits`] allows it.
    ///
    /// This is the only way job status changes; on rejection the current
    /// (terminal) status comes back as the error so callers can report
    /// what blocked the move.
    pub fn advance(&mut self, next: JobStatus) -> Result<(), JobStatus> {
        if !self.status.permits(next) {
            return Err(self.status);
        }
        self.status = next;
        Ok(())
    }

    /// A fresh job in `initialized` at version 1.
    pub fn new(job_id: Uuid, pipeline: Pipeline, total_count: u32) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            job_id,
            pipeline,
            total_count,
            processed_count: 0,
            progress: 0.0,
            status: JobStatus::Initialized,
            canceled: false,
            cancel_reason: None,
            start_time: now,
            last_update_time: now,
            version: 1,
            result: None,
            error: None,
            photos: None,
            total_books_found: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_permit_nothing() {
        for status in [JobStatus::Completed, JobStatus::Failed, JobStatus::Canceled] {
            assert!(status.is_terminal());
            for next in [
                JobStatus::Initialized,
                JobStatus::Processing,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Canceled,
            ] {
                assert!(!status.permits(next), "{status} -> {next} must be refused");
            }
        }
    }

    #[test]
    fn live_statuses_permit_progress_and_finishing() {
        for status in [JobStatus::Initialized, JobStatus::Processing] {
            assert!(status.permits(JobStatus::Processing));
            assert!(status.permits(JobStatus::Completed));
            assert!(status.permits(JobStatus::Failed));
            assert!(status.permits(JobStatus::Canceled));
            assert!(!status.permits(JobStatus::Initialized));
        }
    }

    #[test]
    fn advance_applies_or_reports_the_blocker() {
        let mut state = JobState::new(Uuid::new_v4(), Pipeline::AiScan, 1);
        state.advance(JobStatus::Processing).unwrap();
        assert_eq!(state.status, JobStatus::Processing);
        state.advance(JobStatus::Completed).unwrap();
        assert_eq!(
            state.advance(JobStatus::Processing),
            Err(JobStatus::Completed)
        );
        assert_eq!(state.status, JobStatus::Completed);
    }

    #[test]
    fn token_validity_is_millisecond_exact() {
        let token = AuthToken {
            value: Uuid::new_v4(),
            expires_at: 10_000,
        };
        assert!(token.is_valid_at(9_999));
        assert!(!token.is_valid_at(10_000));
    }

    #[test]
    fn state_serializes_camel_case() {
        let state = JobState::new(Uuid::new_v4(), Pipeline::CsvImport, 10);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["pipeline"], "csv_import");
        assert_eq!(json["status"], "initialized");
        assert_eq!(json["totalCount"], 10);
        assert_eq!(json["version"], 1);
        assert!(json.get("total_count").is_none());
    }
}
