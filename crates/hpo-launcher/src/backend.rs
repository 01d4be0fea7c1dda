//! Interfaces to the external collaborators: the container toolchain, the
//! single-run execution backend and the tuning backend.
//!
//! The orchestration code depends only on these traits. [`super::local::LocalBackend`]
//! implements all three in-process for tests and dry runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hpo_optimizer::{ImageRef, RunRequest, TuningRequest};
use hpo_types::{HpoResult, SearchResult};
use serde::{Deserialize, Serialize};

use crate::image::ImageSpec;

/// Handle to a submitted training run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunHandle {
    pub job_name: String,
    pub submitted_at: DateTime<Utc>,
}

/// Handle to a submitted search.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchHandle {
    pub job_name: String,
    pub submitted_at: DateTime<Utc>,
}

/// Terminal state of a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunStatus {
    Completed { final_score: Option<f64> },
    Failed { reason: String },
    /// Terminated by the backend after exceeding its max runtime.
    Stopped,
}

/// Terminal state of a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SearchStatus {
    Completed,
    Failed { reason: String },
    /// The backend stopped outstanding trials at the duration limit.
    TimedOut,
}

/// Builds and publishes images. Failures are reported unmodified.
#[async_trait]
pub trait ImageToolchain: Send + Sync {
    async fn build(&self, spec: &ImageSpec, image: &ImageRef) -> HpoResult<()>;

    async fn push(&self, image: &ImageRef) -> HpoResult<()>;
}

/// Executes single training runs.
#[async_trait]
pub trait TrainingBackend: Send + Sync {
    async fn submit_run(&self, request: &RunRequest) -> HpoResult<RunHandle>;

    /// Block until the run reaches a terminal state.
    async fn wait_run(&self, handle: &RunHandle) -> HpoResult<RunStatus>;
}

/// Runs multi-trial searches.
#[async_trait]
pub trait TuningBackend: Send + Sync {
    async fn submit_search(&self, request: &TuningRequest) -> HpoResult<SearchHandle>;

    /// Block until the search reaches a terminal state.
    async fn wait_search(&self, handle: &SearchHandle) -> HpoResult<SearchStatus>;

    /// One record per finished trial. Callable before the search is done.
    async fn fetch_results(&self, handle: &SearchHandle) -> HpoResult<SearchResult>;
}
