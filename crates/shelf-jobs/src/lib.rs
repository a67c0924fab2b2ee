// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-job actor entities.
//!
//! One asynchronous job equals one entity: a task that owns the job's
//! [`state::JobState`], its auth token, and at most one WebSocket peer.
//! Every operation arrives over the entity's command channel, so calls
//! for one job serialize by construction; jobs never share state.
//! Persistence is throttled, progress envelopes are versioned, and a
//! cleanup alarm removes terminal jobs after a configurable delay.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod entity;
pub mod progress;
pub mod registry;
pub mod state;
pub mod store;

pub use entity::{JobConfig, JobEntityError, JobHandle, PhotoUpdate, ProgressUpdate, ReadyOutcome};
pub use progress::{
    CLOSE_NORMAL, CLOSE_SUPERSEDED, CLOSE_UNAUTHORIZED, FrameType, PROGRESS_CONTRACT_VERSION,
    ProgressEnvelope, ProgressSink, SinkError,
};
pub use registry::JobRegistry;
pub use state::{AuthToken, JobError, JobState, JobStatus, PhotoState, PhotoStatus, Pipeline};
pub use store::{FsJobStore, JobStore, MemoryJobStore, PersistedJob, StoreError};
