// SPDX-License-Identifier: MIT OR Apache-2.0
//! The per-job entity: a task owning one job's state, token, and peer.
//!
//! All operations arrive as commands over an mpsc channel and are served
//! one at a time, so callers never lock anything to mutate a job.
//! Operations on different jobs run in parallel on their own entities.

use crate::progress::{
    CLOSE_NORMAL, CLOSE_SUPERSEDED, FrameType, ProgressEnvelope, ProgressSink,
};
use crate::state::{AuthToken, JobError, JobState, JobStatus, PhotoState, PhotoStatus, Pipeline};
use crate::store::{JobStore, PersistedJob, StoreError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Entity tuning knobs, shared by every job the registry spawns.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Persist after this many coalesced updates.
    pub persist_every_n: u32,
    /// Persist after this long without a write.
    pub persist_max_interval: Duration,
    /// Auth token lifetime.
    pub token_ttl: Duration,
    /// Refresh allowed within this long of expiry.
    pub refresh_window: Duration,
    /// Delete state this long after a terminal status.
    pub cleanup_after: Duration,
    /// Default wait for the client's `ready` frame.
    pub ready_timeout: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            persist_every_n: 20,
            persist_max_interval: Duration::from_secs(30),
            token_ttl: Duration::from_secs(7_200),
            refresh_window: Duration::from_secs(1_800),
            cleanup_after: Duration::from_secs(24 * 3600),
            ready_timeout: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors and inputs
// ---------------------------------------------------------------------------

/// Failures surfaced by entity operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobEntityError {
    /// The job has no state yet (or was cleaned up).
    #[error("job is not initialized")]
    NotInitialized,
    /// Re-initialization with different pipeline or count.
    #[error("job re-initialized with conflicting values")]
    ConflictingInit,
    /// Mutation attempted on a terminal job.
    #[error("job is in terminal state {status}")]
    TerminalState {
        /// The terminal status.
        status: JobStatus,
    },
    /// Token missing, mismatched, or expired.
    #[error("auth token is missing, mismatched, or expired")]
    InvalidToken,
    /// Refresh attempted before the window opened.
    #[error("token refresh window is not open")]
    RefreshWindowNotOpen,
    /// Photo index outside the batch array.
    #[error("photo index {index} outside batch of {total}")]
    InvalidPhotoIndex {
        /// Offending index.
        index: u32,
        /// Array length.
        total: u32,
    },
    /// Operation tagged with the wrong pipeline.
    #[error("operation for pipeline {got} on a {expected} job")]
    PipelineMismatch {
        /// The job's pipeline.
        expected: Pipeline,
        /// The pipeline the caller claimed.
        got: Pipeline,
    },
    /// Progress payload failed validation.
    #[error("progress update rejected: {reason}")]
    InvalidUpdate {
        /// What was wrong.
        reason: String,
    },
    /// Durable write failed; in-memory state kept the update.
    #[error("storage write failed: {0}")]
    Storage(String),
    /// The entity's task has exited.
    #[error("job entity is gone")]
    EntityGone,
}

impl From<StoreError> for JobEntityError {
    fn from(err: StoreError) -> Self {
        Self::Storage(err.0)
    }
}

/// One progress tick from a pipeline driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressUpdate {
    /// Progress in `[0, 1]`; recomputed from counts when both are known.
    pub progress: f64,
    /// Driver-facing status line; must be non-empty.
    pub status: String,
    /// Units finished.
    pub processed_count: Option<u32>,
    /// Units total, when the driver learned it late.
    pub total_count: Option<u32>,
    /// Pipeline-specific extras forwarded into the envelope payload.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One photo slot mutation in a batch scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoUpdate {
    /// Slot index.
    pub index: u32,
    /// New status.
    pub status: PhotoStatus,
    /// Books found in this photo.
    #[serde(default)]
    pub books_found: u32,
    /// Failure detail, when failed.
    #[serde(default)]
    pub error: Option<String>,
}

/// How a `wait_for_ready` resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyOutcome {
    /// The peer sent `ready`.
    Ready,
    /// The peer disconnected (or the entity went away).
    Disconnected,
    /// No `ready` frame arrived in time.
    TimedOut,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

enum Command {
    Initialize {
        pipeline: Pipeline,
        total_count: u32,
        reply: oneshot::Sender<Result<(), JobEntityError>>,
    },
    SetAuthToken {
        ttl: Option<Duration>,
        reply: oneshot::Sender<Result<AuthToken, JobEntityError>>,
    },
    RefreshAuthToken {
        old: Uuid,
        reply: oneshot::Sender<Result<AuthToken, JobEntityError>>,
    },
    UpdateProgress {
        pipeline: Pipeline,
        update: ProgressUpdate,
        reply: oneshot::Sender<Result<u64, JobEntityError>>,
    },
    Complete {
        pipeline: Pipeline,
        payload: serde_json::Value,
        reply: oneshot::Sender<Result<(), JobEntityError>>,
    },
    SendError {
        pipeline: Pipeline,
        error: JobError,
        reply: oneshot::Sender<Result<(), JobEntityError>>,
    },
    Cancel {
        reason: Option<String>,
        reply: oneshot::Sender<Result<(), JobEntityError>>,
    },
    IsCanceled {
        reply: oneshot::Sender<bool>,
    },
    InitBatch {
        total_photos: u32,
        reply: oneshot::Sender<Result<(), JobEntityError>>,
    },
    UpdatePhoto {
        update: PhotoUpdate,
        reply: oneshot::Sender<Result<(), JobEntityError>>,
    },
    CompleteBatch {
        payload: serde_json::Value,
        reply: oneshot::Sender<Result<(), JobEntityError>>,
    },
    GetState {
        reply: oneshot::Sender<Option<JobState>>,
    },
    GetStateAndAuth {
        reply: oneshot::Sender<(Option<JobState>, Option<AuthToken>)>,
    },
    AttachPeer {
        sink: Box<dyn ProgressSink>,
        reply: oneshot::Sender<u64>,
    },
    DetachPeer {
        generation: u64,
    },
    ClientReady {
        generation: u64,
    },
    WaitForReady {
        reply: oneshot::Sender<ReadyOutcome>,
    },
    CleanupDue,
}

// ---------------------------------------------------------------------------
// JobHandle
// ---------------------------------------------------------------------------

/// Cloneable address of one job entity.
#[derive(Clone)]
pub struct JobHandle {
    job_id: Uuid,
    config: JobConfig,
    tx: mpsc::Sender<Command>,
}

macro_rules! rpc {
    ($self:ident, $reply:ident => $cmd:expr) => {{
        let ($reply, rx) = oneshot::channel();
        $self
            .tx
            .send($cmd)
            .await
            .map_err(|_| JobEntityError::EntityGone)?;
        rx.await.map_err(|_| JobEntityError::EntityGone)?
    }};
}

impl JobHandle {
    /// The job this handle addresses.
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Create the job state; idempotent for identical values.
    pub async fn initialize(
        &self,
        pipeline: Pipeline,
        total_count: u32,
    ) -> Result<(), JobEntityError> {
        rpc!(self, reply => Command::Initialize { pipeline, total_count, reply })
    }

    /// Issue a fresh auth token, replacing any prior one.
    pub async fn set_auth_token(&self, ttl: Option<Duration>) -> Result<AuthToken, JobEntityError> {
        rpc!(self, reply => Command::SetAuthToken { ttl, reply })
    }

    /// Rotate the token; only valid inside the refresh window.
    pub async fn refresh_auth_token(&self, old: Uuid) -> Result<AuthToken, JobEntityError> {
        rpc!(self, reply => Command::RefreshAuthToken { old, reply })
    }

    /// Apply one progress tick; returns the new state version.
    pub async fn update_progress(
        &self,
        pipeline: Pipeline,
        update: ProgressUpdate,
    ) -> Result<u64, JobEntityError> {
        rpc!(self, reply => Command::UpdateProgress { pipeline, update, reply })
    }

    /// Finish the job successfully.
    pub async fn complete(
        &self,
        pipeline: Pipeline,
        payload: serde_json::Value,
    ) -> Result<(), JobEntityError> {
        rpc!(self, reply => Command::Complete { pipeline, payload, reply })
    }

    /// Finish the job with an error.
    pub async fn send_error(
        &self,
        pipeline: Pipeline,
        error: JobError,
    ) -> Result<(), JobEntityError> {
        rpc!(self, reply => Command::SendError { pipeline, error, reply })
    }

    /// Cancel the job. Idempotent.
    pub async fn cancel(&self, reason: Option<String>) -> Result<(), JobEntityError> {
        rpc!(self, reply => Command::Cancel { reason, reply })
    }

    /// Whether cancellation was requested. Drivers poll this per item.
    pub async fn is_canceled(&self) -> Result<bool, JobEntityError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::IsCanceled { reply })
            .await
            .map_err(|_| JobEntityError::EntityGone)?;
        rx.await.map_err(|_| JobEntityError::EntityGone)
    }

    /// Lay out the fixed-length photo array for a batch scan.
    pub async fn init_batch(&self, total_photos: u32) -> Result<(), JobEntityError> {
        rpc!(self, reply => Command::InitBatch { total_photos, reply })
    }

    /// Mutate one photo slot.
    pub async fn update_photo(&self, update: PhotoUpdate) -> Result<(), JobEntityError> {
        rpc!(self, reply => Command::UpdatePhoto { update, reply })
    }

    /// Finish a batch job; the payload is augmented with photo totals.
    pub async fn complete_batch(&self, payload: serde_json::Value) -> Result<(), JobEntityError> {
        rpc!(self, reply => Command::CompleteBatch { payload, reply })
    }

    /// Read the current state.
    pub async fn get_state(&self) -> Result<Option<JobState>, JobEntityError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::GetState { reply })
            .await
            .map_err(|_| JobEntityError::EntityGone)?;
        rx.await.map_err(|_| JobEntityError::EntityGone)
    }

    /// Read the current state together with the auth token (WebSocket
    /// upgrade path).
    pub async fn get_state_and_auth(
        &self,
    ) -> Result<(Option<JobState>, Option<AuthToken>), JobEntityError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::GetStateAndAuth { reply })
            .await
            .map_err(|_| JobEntityError::EntityGone)?;
        rx.await.map_err(|_| JobEntityError::EntityGone)
    }

    /// Hand the entity its (single) WebSocket peer; a previous peer is
    /// closed with [`CLOSE_SUPERSEDED`]. Returns the peer generation used
    /// by [`Self::detach_peer`] and [`Self::client_ready`].
    pub async fn attach_peer(&self, sink: Box<dyn ProgressSink>) -> Result<u64, JobEntityError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::AttachPeer { sink, reply })
            .await
            .map_err(|_| JobEntityError::EntityGone)?;
        rx.await.map_err(|_| JobEntityError::EntityGone)
    }

    /// Report that peer `generation` disconnected. Stale generations are
    /// ignored.
    pub async fn detach_peer(&self, generation: u64) {
        let _ = self.tx.send(Command::DetachPeer { generation }).await;
    }

    /// Report that peer `generation` sent its `ready` frame.
    pub async fn client_ready(&self, generation: u64) {
        let _ = self.tx.send(Command::ClientReady { generation }).await;
    }

    /// Block until the connected peer is ready, the peer disconnects, or
    /// `timeout` (defaulting to the configured ready timeout) elapses.
    pub async fn wait_for_ready(&self, timeout: Option<Duration>) -> ReadyOutcome {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::WaitForReady { reply }).await.is_err() {
            return ReadyOutcome::Disconnected;
        }
        let limit = timeout.unwrap_or(self.config.ready_timeout);
        match tokio::time::timeout(limit, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => ReadyOutcome::Disconnected,
            Err(_) => ReadyOutcome::TimedOut,
        }
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// Spawn the entity task for `job_id`, optionally hydrated from storage.
pub fn spawn(
    job_id: Uuid,
    store: Arc<dyn JobStore>,
    config: JobConfig,
    preload: Option<PersistedJob>,
) -> JobHandle {
    let (tx, rx) = mpsc::channel(64);
    let handle = JobHandle {
        job_id,
        config: config.clone(),
        tx: tx.clone(),
    };

    let mut entity = JobEntity {
        job_id,
        state: preload.as_ref().map(|p| p.state.clone()),
        token: preload.as_ref().and_then(|p| p.token),
        store,
        config,
        sink: None,
        peer_generation: 0,
        ready: false,
        ready_waiters: Vec::new(),
        updates_since_persist: 0,
        last_persist: Instant::now(),
        cleanup_scheduled: false,
        tx,
    };

    tokio::spawn(async move {
        // A job hydrated in a terminal state still owes its cleanup.
        if entity.state.as_ref().is_some_and(|s| s.status.is_terminal()) {
            entity.schedule_cleanup();
        }
        entity.run(rx).await;
    });

    handle
}

struct JobEntity {
    job_id: Uuid,
    state: Option<JobState>,
    token: Option<AuthToken>,
    store: Arc<dyn JobStore>,
    config: JobConfig,
    sink: Option<Box<dyn ProgressSink>>,
    peer_generation: u64,
    ready: bool,
    ready_waiters: Vec<oneshot::Sender<ReadyOutcome>>,
    updates_since_persist: u32,
    last_persist: Instant,
    cleanup_scheduled: bool,
    tx: mpsc::Sender<Command>,
}

impl JobEntity {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            if self.handle(command).await {
                break;
            }
        }
        debug!(job_id = %self.job_id, "job entity stopped");
    }

    /// Serve one command; returns `true` when the entity should stop.
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Initialize {
                pipeline,
                total_count,
                reply,
            } => {
                let _ = reply.send(self.initialize(pipeline, total_count).await);
            }
            Command::SetAuthToken { ttl, reply } => {
                let _ = reply.send(self.set_auth_token(ttl).await);
            }
            Command::RefreshAuthToken { old, reply } => {
                let _ = reply.send(self.refresh_auth_token(old).await);
            }
            Command::UpdateProgress {
                pipeline,
                update,
                reply,
            } => {
                let _ = reply.send(self.update_progress(pipeline, update).await);
            }
            Command::Complete {
                pipeline,
                payload,
                reply,
            } => {
                let _ = reply.send(self.finish(pipeline, Ok(payload)).await);
            }
            Command::SendError {
                pipeline,
                error,
                reply,
            } => {
                let _ = reply.send(self.finish(pipeline, Err(error)).await);
            }
            Command::Cancel { reason, reply } => {
                let _ = reply.send(self.cancel(reason).await);
            }
            Command::IsCanceled { reply } => {
                let _ = reply.send(self.state.as_ref().is_some_and(|s| s.canceled));
            }
            Command::InitBatch {
                total_photos,
                reply,
            } => {
                let _ = reply.send(self.init_batch(total_photos).await);
            }
            Command::UpdatePhoto { update, reply } => {
                let _ = reply.send(self.update_photo(update).await);
            }
            Command::CompleteBatch { payload, reply } => {
                let _ = reply.send(self.complete_batch(payload).await);
            }
            Command::GetState { reply } => {
                let _ = reply.send(self.state.clone());
            }
            Command::GetStateAndAuth { reply } => {
                let _ = reply.send((self.state.clone(), self.token));
            }
            Command::AttachPeer { sink, reply } => {
                let generation = self.attach_peer(sink).await;
                let _ = reply.send(generation);
            }
            Command::DetachPeer { generation } => {
                if generation == self.peer_generation {
                    self.drop_peer(ReadyOutcome::Disconnected);
                }
            }
            Command::ClientReady { generation } => {
                if generation == self.peer_generation {
                    self.client_ready().await;
                }
            }
            Command::WaitForReady { reply } => {
                if self.ready {
                    let _ = reply.send(ReadyOutcome::Ready);
                } else {
                    self.ready_waiters.push(reply);
                }
            }
            Command::CleanupDue => {
                self.cleanup().await;
                return true;
            }
        }
        false
    }

    // -- operations --------------------------------------------------------

    async fn initialize(
        &mut self,
        pipeline: Pipeline,
        total_count: u32,
    ) -> Result<(), JobEntityError> {
        if let Some(state) = &self.state {
            if !state.status.permits(JobStatus::Processing) {
                return Err(JobEntityError::TerminalState {
                    status: state.status,
                });
            }
            return if state.pipeline == pipeline && state.total_count == total_count {
                Ok(())
            } else {
                Err(JobEntityError::ConflictingInit)
            };
        }

        self.state = Some(JobState::new(self.job_id, pipeline, total_count));
        self.persist_now().await?;
        Ok(())
    }

    async fn set_auth_token(
        &mut self,
        ttl: Option<Duration>,
    ) -> Result<AuthToken, JobEntityError> {
        if self.state.is_none() {
            return Err(JobEntityError::NotInitialized);
        }
        let ttl = ttl.unwrap_or(self.config.token_ttl);
        let token = AuthToken::generate(ttl.as_millis() as i64);
        self.token = Some(token);
        self.persist_now().await?;
        Ok(token)
    }

    async fn refresh_auth_token(&mut self, old: Uuid) -> Result<AuthToken, JobEntityError> {
        let now = Utc::now().timestamp_millis();
        let current = self.token.ok_or(JobEntityError::InvalidToken)?;
        if current.value != old || !current.is_valid_at(now) {
            return Err(JobEntityError::InvalidToken);
        }
        let window_ms = self.config.refresh_window.as_millis() as i64;
        if current.expires_at - now > window_ms {
            return Err(JobEntityError::RefreshWindowNotOpen);
        }

        let token = AuthToken::generate(self.config.token_ttl.as_millis() as i64);
        self.token = Some(token);
        self.persist_now().await?;
        Ok(token)
    }

    async fn update_progress(
        &mut self,
        pipeline: Pipeline,
        update: ProgressUpdate,
    ) -> Result<u64, JobEntityError> {
        self.guard_mutable(pipeline)?;
        if !(0.0..=1.0).contains(&update.progress) || !update.progress.is_finite() {
            return Err(JobEntityError::InvalidUpdate {
                reason: format!("progress {} outside [0, 1]", update.progress),
            });
        }
        if update.status.trim().is_empty() {
            return Err(JobEntityError::InvalidUpdate {
                reason: "status must be non-empty".to_string(),
            });
        }

        let Some(state) = self.state.as_mut() else {
            return Err(JobEntityError::NotInitialized);
        };
        state
            .advance(JobStatus::Processing)
            .map_err(|status| JobEntityError::TerminalState { status })?;
        if let Some(total) = update.total_count {
            state.total_count = total;
        }
        if let Some(processed) = update.processed_count {
            state.processed_count = if state.total_count > 0 {
                processed.min(state.total_count)
            } else {
                processed
            };
        }
        state.progress = if state.total_count > 0 && update.processed_count.is_some() {
            f64::from(state.processed_count) / f64::from(state.total_count)
        } else {
            update.progress
        }
        .clamp(0.0, 1.0);
        state.last_update_time = Utc::now().timestamp_millis();
        state.version += 1;
        let version = state.version;

        let mut payload = json!({
            "progress": state.progress,
            "status": update.status,
            "version": version,
        });
        if let Some(object) = payload.as_object_mut() {
            if state.total_count > 0 {
                object.insert("processedCount".into(), json!(state.processed_count));
                object.insert("totalCount".into(), json!(state.total_count));
            }
            for (key, value) in &update.extra {
                object.insert(key.clone(), value.clone());
            }
        }

        let persisted = self.persist_throttled().await;
        self.push_frame(FrameType::JobProgress, payload).await;
        persisted?;
        Ok(version)
    }

    /// Shared terminal path for `Complete` and `SendError`.
    async fn finish(
        &mut self,
        pipeline: Pipeline,
        outcome: Result<serde_json::Value, JobError>,
    ) -> Result<(), JobEntityError> {
        self.guard_mutable(pipeline)?;

        let Some(state) = self.state.as_mut() else {
            return Err(JobEntityError::NotInitialized);
        };
        let next = if outcome.is_ok() {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        state
            .advance(next)
            .map_err(|status| JobEntityError::TerminalState { status })?;
        state.version += 1;
        state.last_update_time = Utc::now().timestamp_millis();

        let (frame, payload, close_reason) = match outcome {
            Ok(result) => {
                state.progress = 1.0;
                state.result = Some(result.clone());
                (FrameType::JobComplete, result, "Job completed")
            }
            Err(error) => {
                state.error = Some(error.clone());
                let payload = json!({
                    "code": error.code,
                    "message": error.message,
                    "retryable": error.retryable,
                });
                (FrameType::Error, payload, "Job failed")
            }
        };

        let persisted = self.persist_now().await;
        self.push_frame(frame, payload).await;
        self.schedule_cleanup();
        self.close_peer(CLOSE_NORMAL, close_reason).await;
        persisted
    }

    async fn cancel(&mut self, reason: Option<String>) -> Result<(), JobEntityError> {
        let Some(state) = self.state.as_mut() else {
            return Err(JobEntityError::NotInitialized);
        };
        if state.advance(JobStatus::Canceled).is_err() {
            // Idempotent, including cancel-after-complete.
            return Ok(());
        }

        state.canceled = true;
        state.cancel_reason = reason.clone();
        state.version += 1;
        state.last_update_time = Utc::now().timestamp_millis();

        let payload = json!({
            "code": "CANCELED",
            "message": reason.unwrap_or_else(|| "Job canceled".to_string()),
            "retryable": false,
        });

        let persisted = self.persist_now().await;
        self.push_frame(FrameType::Error, payload).await;
        self.schedule_cleanup();
        self.close_peer(CLOSE_NORMAL, "Job canceled").await;
        persisted
    }

    async fn init_batch(&mut self, total_photos: u32) -> Result<(), JobEntityError> {
        let Some(state) = self.state.as_mut() else {
            return Err(JobEntityError::NotInitialized);
        };
        // Non-transitioning mutation, gated on the same table as real
        // transitions: a job that may still process may relayout.
        if !state.status.permits(JobStatus::Processing) {
            return Err(JobEntityError::TerminalState {
                status: state.status,
            });
        }
        state.photos = Some((0..total_photos).map(PhotoState::queued).collect());
        state.total_count = total_photos;
        state.total_books_found = 0;
        state.version += 1;
        self.persist_now().await
    }

    async fn update_photo(&mut self, update: PhotoUpdate) -> Result<(), JobEntityError> {
        let Some(state) = self.state.as_mut() else {
            return Err(JobEntityError::NotInitialized);
        };
        let total = state.photos.as_ref().map(|p| p.len() as u32);
        let Some(total) = total else {
            return Err(JobEntityError::InvalidUpdate {
                reason: "batch was never initialized".to_string(),
            });
        };
        if update.index >= total {
            return Err(JobEntityError::InvalidPhotoIndex {
                index: update.index,
                total,
            });
        }
        state
            .advance(JobStatus::Processing)
            .map_err(|status| JobEntityError::TerminalState { status })?;

        let Some(photos) = state.photos.as_mut() else {
            return Err(JobEntityError::InvalidUpdate {
                reason: "batch was never initialized".to_string(),
            });
        };
        photos[update.index as usize] = PhotoState {
            index: update.index,
            status: update.status,
            books_found: update.books_found,
            error: update.error,
        };
        state.total_books_found = photos.iter().map(|p| p.books_found).sum();
        state.processed_count = photos
            .iter()
            .filter(|p| matches!(p.status, PhotoStatus::Complete | PhotoStatus::Failed))
            .count() as u32;
        state.progress = if total > 0 {
            f64::from(state.processed_count) / f64::from(total)
        } else {
            0.0
        };
        state.last_update_time = Utc::now().timestamp_millis();
        state.version += 1;

        let payload = json!({
            "progress": state.progress,
            "status": "processing",
            "processedCount": state.processed_count,
            "totalCount": total,
            "totalBooksFound": state.total_books_found,
            "photo": photos[update.index as usize],
            "version": state.version,
        });

        let persisted = self.persist_throttled().await;
        self.push_frame(FrameType::JobProgress, payload).await;
        persisted
    }

    async fn complete_batch(&mut self, payload: serde_json::Value) -> Result<(), JobEntityError> {
        let Some(state) = self.state.as_ref() else {
            return Err(JobEntityError::NotInitialized);
        };
        let pipeline = state.pipeline;
        let mut payload = payload;
        if let Some(object) = payload.as_object_mut() {
            object.insert("totalBooksFound".into(), json!(state.total_books_found));
            if let Some(photos) = &state.photos {
                object
                    .entry("photoResults")
                    .or_insert_with(|| json!(photos));
            }
        }
        self.finish(pipeline, Ok(payload)).await
    }

    // -- guards and plumbing -----------------------------------------------

    fn guard_mutable(&self, pipeline: Pipeline) -> Result<(), JobEntityError> {
        let Some(state) = self.state.as_ref() else {
            return Err(JobEntityError::NotInitialized);
        };
        if !state.status.permits(JobStatus::Processing) {
            return Err(JobEntityError::TerminalState {
                status: state.status,
            });
        }
        if state.pipeline != pipeline {
            return Err(JobEntityError::PipelineMismatch {
                expected: state.pipeline,
                got: pipeline,
            });
        }
        Ok(())
    }

    async fn persist_throttled(&mut self) -> Result<(), JobEntityError> {
        self.updates_since_persist += 1;
        if self.updates_since_persist >= self.config.persist_every_n
            || self.last_persist.elapsed() >= self.config.persist_max_interval
        {
            self.persist_now().await
        } else {
            Ok(())
        }
    }

    async fn persist_now(&mut self) -> Result<(), JobEntityError> {
        let Some(state) = self.state.as_ref() else {
            return Ok(());
        };
        let snapshot = PersistedJob {
            state: state.clone(),
            token: self.token,
        };
        self.store.save(&snapshot).await?;
        self.updates_since_persist = 0;
        self.last_persist = Instant::now();
        Ok(())
    }

    async fn push_frame(&mut self, frame: FrameType, payload: serde_json::Value) {
        let Some(state) = self.state.as_ref() else {
            return;
        };
        let envelope = ProgressEnvelope::new(frame, self.job_id, state.pipeline, payload);
        let send_error = match self.sink.as_mut() {
            Some(sink) => sink.send(&envelope).await.err(),
            None => None,
        };
        if let Some(err) = send_error {
            warn!(job_id = %self.job_id, error = %err, "progress push failed, dropping peer");
            self.drop_peer(ReadyOutcome::Disconnected);
        }
    }

    async fn attach_peer(&mut self, sink: Box<dyn ProgressSink>) -> u64 {
        if let Some(old) = self.sink.as_mut() {
            let _ = old.close(CLOSE_SUPERSEDED, "superseded by newer connection").await;
        }
        self.sink = Some(sink);
        self.ready = false;
        self.peer_generation += 1;
        self.peer_generation
    }

    async fn client_ready(&mut self) {
        if self.sink.is_none() {
            return;
        }
        self.ready = true;
        self.push_frame(FrameType::ReadyAck, json!({})).await;
        for waiter in self.ready_waiters.drain(..) {
            let _ = waiter.send(ReadyOutcome::Ready);
        }
    }

    fn drop_peer(&mut self, outcome: ReadyOutcome) {
        self.sink = None;
        self.ready = false;
        for waiter in self.ready_waiters.drain(..) {
            let _ = waiter.send(outcome);
        }
    }

    async fn close_peer(&mut self, code: u16, reason: &str) {
        if let Some(sink) = self.sink.as_mut() {
            let _ = sink.close(code, reason).await;
        }
        self.drop_peer(ReadyOutcome::Disconnected);
    }

    fn schedule_cleanup(&mut self) {
        if self.cleanup_scheduled {
            return;
        }
        self.cleanup_scheduled = true;
        let tx = self.tx.clone();
        let delay = self.config.cleanup_after;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Command::CleanupDue).await;
        });
    }

    /// Delete stored state and token. Idempotent; the entity stops after.
    async fn cleanup(&mut self) {
        if let Err(err) = self.store.delete(self.job_id).await {
            warn!(job_id = %self.job_id, error = %err, "job cleanup delete failed");
        }
        self.state = None;
        self.token = None;
        self.close_peer(CLOSE_NORMAL, "Job expired").await;
    }
}
