//! In-process implementation of the toolchain and both backends.
//!
//! Searches run on a spawned tokio task that samples trials with the
//! optimizer strategies, dispatches them in batches of `max_parallel_jobs`
//! and scores them against a synthetic accuracy surface. Simulated time uses
//! the tokio clock, so tests can run the whole flow under a paused clock.

use async_trait::async_trait;
use chrono::Utc;
use hpo_optimizer::{strategy_for, ImageRef, ObjectiveMetric, RunRequest, TuningRequest};
use hpo_types::{
    trial_job_name, BuildError, HpoError, HpoResult, Hyperparameters, LaunchError,
    ParameterValue, SearchResult, TrialRecord, TrialStatus,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::backend::{
    ImageToolchain, RunHandle, RunStatus, SearchHandle, SearchStatus, TrainingBackend, TuningBackend,
};
use crate::image::ImageSpec;

const SERVICE: &str = "local";

#[derive(Debug, Clone, PartialEq)]
pub struct LocalBackendConfig {
    /// Wall-clock time one batch of trials (or one run) takes.
    pub trial_latency: Duration,
    /// Seed for the trial sampler; `None` draws from the OS.
    pub seed: Option<u64>,
    /// Backend-side limit on a whole search. Trials still running when it
    /// passes are stopped and the search ends `TimedOut`.
    pub search_deadline: Option<Duration>,
}

impl Default for LocalBackendConfig {
    fn default() -> Self {
        Self {
            trial_latency: Duration::from_millis(50),
            seed: None,
            search_deadline: None,
        }
    }
}

/// A failure returned by the next backend call instead of its normal result.
#[derive(Debug, Clone, PartialEq)]
pub enum InjectedFailure {
    Unavailable,
    Throttled { retry_after_ms: u64 },
    ResourceLimit,
    Toolchain { message: String },
}

impl InjectedFailure {
    fn into_error(self, operation: &str) -> HpoError {
        match self {
            InjectedFailure::Unavailable => HpoError::BackendUnavailable {
                service: SERVICE.to_string(),
                message: format!("{operation}: connection refused"),
            },
            InjectedFailure::Throttled { retry_after_ms } => LaunchError::Throttled { retry_after_ms }.into(),
            InjectedFailure::ResourceLimit => LaunchError::ResourceLimit {
                instance_type: "any".to_string(),
                reason: format!("{operation}: instance limit reached"),
            }
            .into(),
            InjectedFailure::Toolchain { message } => BuildError::Toolchain {
                step: operation.to_string(),
                message,
            }
            .into(),
        }
    }
}

struct SearchSlot {
    objective: ObjectiveMetric,
    submitted_at: chrono::DateTime<Utc>,
    trials: Vec<TrialRecord>,
    status: watch::Receiver<Option<SearchStatus>>,
}

#[derive(Default)]
struct State {
    names: HashSet<String>,
    runs: HashMap<String, RunRequest>,
    searches: HashMap<String, SearchSlot>,
    built: HashSet<String>,
    pushed: Vec<ImageRef>,
    failures: VecDeque<InjectedFailure>,
    run_failure: Option<String>,
}

pub struct LocalBackend {
    config: LocalBackendConfig,
    state: Arc<Mutex<State>>,
    calls: AtomicUsize,
}

impl LocalBackend {
    pub fn new(config: LocalBackendConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(State::default())),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of trait calls received, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Queue a failure for the next call.
    pub fn inject_failure(&self, failure: InjectedFailure) {
        self.state.lock().failures.push_back(failure);
    }

    /// Make every single run end `Failed` with `reason`.
    pub fn fail_runs(&self, reason: impl Into<String>) {
        self.state.lock().run_failure = Some(reason.into());
    }

    /// Images pushed so far, in push order.
    pub fn pushed_images(&self) -> Vec<ImageRef> {
        self.state.lock().pushed.clone()
    }

    fn begin_call(&self, operation: &str) -> HpoResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.state.lock().failures.pop_front() {
            Some(failure) => Err(failure.into_error(operation)),
            None => Ok(()),
        }
    }

    fn claim_name(&self, name: &str) -> HpoResult<()> {
        if self.state.lock().names.insert(name.to_string()) {
            Ok(())
        } else {
            Err(LaunchError::NameConflict { name: name.to_string() }.into())
        }
    }
}

/// Accuracy in `(0.5, 0.95]`, peaking around depth 10, many trees and a
/// feature fraction near 0.6.
pub fn synthetic_accuracy(params: &Hyperparameters) -> f64 {
    let value = |name: &str, default: f64| params.get(name).map(ParameterValue::as_f64).unwrap_or(default);
    let depth = value("max_depth", 5.0);
    let trees = value("num_boost_round", value("n_estimators", 10.0));
    let features = value("max_features", 0.25).clamp(0.0, 1.0);

    let depth_term = (-(depth - 10.0).powi(2) / 50.0).exp();
    let tree_term = 1.0 - (-trees.max(1.0) / 150.0).exp();
    let feature_term = 1.0 - (features - 0.6).powi(2);
    0.5 + 0.45 * depth_term * tree_term * feature_term
}

/// Simulated trial runtime in seconds; grows with tree count and depth.
pub fn simulated_duration_seconds(params: &Hyperparameters) -> u64 {
    let value = |name: &str, default: f64| params.get(name).map(ParameterValue::as_f64).unwrap_or(default);
    let depth = value("max_depth", 5.0).max(1.0);
    let trees = value("num_boost_round", value("n_estimators", 10.0)).max(1.0);
    (30.0 + trees * depth / 10.0).round() as u64
}

fn evaluate(trial: &mut TrialRecord, max_runtime_seconds: u64) {
    let duration = simulated_duration_seconds(&trial.hyperparameters);
    if duration > max_runtime_seconds {
        trial.status = TrialStatus::Stopped;
        trial.objective = None;
        trial.duration_seconds = Some(max_runtime_seconds);
        debug!(trial = %trial.job_name, duration, max_runtime_seconds, "trial exceeded max runtime");
    } else {
        let score = synthetic_accuracy(&trial.hyperparameters);
        trial.status = TrialStatus::Completed;
        trial.objective = Some(score);
        trial.duration_seconds = Some(duration);
        debug!(trial = %trial.job_name, "{}", ObjectiveMetric::format_score(score));
    }
}

async fn run_search(
    state: Arc<Mutex<State>>,
    request: TuningRequest,
    config: LocalBackendConfig,
    status: watch::Sender<Option<SearchStatus>>,
) {
    let started = Instant::now();
    let deadline = config.search_deadline.map(|limit| started + limit);
    let mut strategy = strategy_for(
        request.strategy,
        request.ranges.clone(),
        request.objective.direction,
        config.seed,
    );
    let total = request.max_jobs as usize;
    let parallel = request.max_parallel_jobs.max(1) as usize;
    let max_runtime = request.template.max_runtime_seconds;

    let mut next = 1;
    while next <= total {
        let batch_size = parallel.min(total - next + 1);
        let batch: Vec<TrialRecord> = strategy
            .suggest(batch_size)
            .into_iter()
            .enumerate()
            .map(|(offset, sampled)| {
                let mut hyperparameters = request.template.hyperparameters.clone();
                hyperparameters.extend(sampled);
                TrialRecord {
                    trial_number: next + offset,
                    job_name: trial_job_name(&request.job_name, next + offset),
                    status: TrialStatus::InProgress,
                    hyperparameters,
                    objective: None,
                    duration_seconds: None,
                }
            })
            .collect();
        {
            let mut state = state.lock();
            if let Some(slot) = state.searches.get_mut(&request.job_name) {
                slot.trials.extend(batch.iter().cloned());
            }
        }

        let wake = Instant::now() + config.trial_latency;
        let timed_out = match deadline {
            Some(deadline) if deadline < wake => {
                tokio::time::sleep_until(deadline).await;
                true
            }
            _ => {
                tokio::time::sleep_until(wake).await;
                false
            }
        };

        let mut finished = batch;
        for trial in &mut finished {
            if timed_out {
                trial.status = TrialStatus::Stopped;
            } else {
                evaluate(trial, max_runtime);
                if let Some(score) = trial.objective {
                    strategy.report(&trial.hyperparameters, score);
                }
            }
        }
        {
            let mut state = state.lock();
            if let Some(slot) = state.searches.get_mut(&request.job_name) {
                for trial in finished {
                    if let Some(record) = slot
                        .trials
                        .iter_mut()
                        .find(|r| r.trial_number == trial.trial_number)
                    {
                        *record = trial;
                    }
                }
            }
        }

        if timed_out {
            info!(job = %request.job_name, "search reached its deadline, outstanding trials stopped");
            status.send_replace(Some(SearchStatus::TimedOut));
            return;
        }
        next += batch_size;
    }

    info!(job = %request.job_name, trials = total, "search completed");
    status.send_replace(Some(SearchStatus::Completed));
}

#[async_trait]
impl ImageToolchain for LocalBackend {
    async fn build(&self, spec: &ImageSpec, image: &ImageRef) -> HpoResult<()> {
        self.begin_call("build")?;
        debug!(image = %image, build_file = %spec.render_build_file(), "local build");
        self.state.lock().built.insert(image.to_string());
        Ok(())
    }

    async fn push(&self, image: &ImageRef) -> HpoResult<()> {
        self.begin_call("push")?;
        let mut state = self.state.lock();
        if !state.built.contains(&image.to_string()) {
            return Err(BuildError::Toolchain {
                step: "push".to_string(),
                message: format!("no local image named {image}"),
            }
            .into());
        }
        state.pushed.push(image.clone());
        Ok(())
    }
}

#[async_trait]
impl TrainingBackend for LocalBackend {
    async fn submit_run(&self, request: &RunRequest) -> HpoResult<RunHandle> {
        self.begin_call("submit_run")?;
        self.claim_name(&request.job_name)?;
        self.state
            .lock()
            .runs
            .insert(request.job_name.clone(), request.clone());
        Ok(RunHandle {
            job_name: request.job_name.clone(),
            submitted_at: Utc::now(),
        })
    }

    async fn wait_run(&self, handle: &RunHandle) -> HpoResult<RunStatus> {
        self.begin_call("wait_run")?;
        let (request, run_failure) = {
            let state = self.state.lock();
            let request = state.runs.get(&handle.job_name).cloned().ok_or_else(|| {
                HpoError::from(LaunchError::Rejected {
                    reason: format!("unknown run {}", handle.job_name),
                })
            })?;
            (request, state.run_failure.clone())
        };

        tokio::time::sleep(self.config.trial_latency).await;

        if let Some(reason) = run_failure {
            return Ok(RunStatus::Failed { reason });
        }
        let mut record = TrialRecord {
            trial_number: 1,
            job_name: request.job_name.clone(),
            status: TrialStatus::InProgress,
            hyperparameters: request.hyperparameters.clone(),
            objective: None,
            duration_seconds: None,
        };
        evaluate(&mut record, request.max_runtime_seconds);
        Ok(match record.status {
            TrialStatus::Stopped => RunStatus::Stopped,
            _ => RunStatus::Completed {
                final_score: record.objective,
            },
        })
    }
}

#[async_trait]
impl TuningBackend for LocalBackend {
    async fn submit_search(&self, request: &TuningRequest) -> HpoResult<SearchHandle> {
        self.begin_call("submit_search")?;
        self.claim_name(&request.job_name)?;

        let submitted_at = Utc::now();
        let (sender, receiver) = watch::channel(None);
        self.state.lock().searches.insert(
            request.job_name.clone(),
            SearchSlot {
                objective: request.objective.clone(),
                submitted_at,
                trials: Vec::new(),
                status: receiver,
            },
        );
        tokio::spawn(run_search(
            Arc::clone(&self.state),
            request.clone(),
            self.config.clone(),
            sender,
        ));

        Ok(SearchHandle {
            job_name: request.job_name.clone(),
            submitted_at,
        })
    }

    async fn wait_search(&self, handle: &SearchHandle) -> HpoResult<SearchStatus> {
        self.begin_call("wait_search")?;
        let mut receiver = {
            let state = self.state.lock();
            state
                .searches
                .get(&handle.job_name)
                .map(|slot| slot.status.clone())
                .ok_or_else(|| unknown_search(&handle.job_name))?
        };
        let status = {
            let terminal = receiver
                .wait_for(Option::is_some)
                .await
                .map_err(|_| HpoError::BackendUnavailable {
                    service: SERVICE.to_string(),
                    message: format!("search {} worker exited", handle.job_name),
                })?;
            (*terminal).clone()
        };
        status.ok_or_else(|| unknown_search(&handle.job_name))
    }

    async fn fetch_results(&self, handle: &SearchHandle) -> HpoResult<SearchResult> {
        self.begin_call("fetch_results")?;
        let state = self.state.lock();
        let slot = state
            .searches
            .get(&handle.job_name)
            .ok_or_else(|| unknown_search(&handle.job_name))?;
        let finished: Vec<TrialRecord> = slot
            .trials
            .iter()
            .filter(|t| t.status != TrialStatus::InProgress)
            .cloned()
            .collect();
        Ok(SearchResult::new(
            handle.job_name.clone(),
            slot.objective.name.clone(),
            slot.objective.direction,
            slot.submitted_at,
            finished,
        ))
    }
}

fn unknown_search(job: &str) -> HpoError {
    LaunchError::Rejected {
        reason: format!("unknown search {job}"),
    }
    .into()
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new(LocalBackendConfig::default())
    }
}
