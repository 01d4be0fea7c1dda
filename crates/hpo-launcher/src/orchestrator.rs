//! Multi-trial hyperparameter search submission and result collection.

use hpo_optimizer::{ImageRef, ObjectiveMetric, RunRequest, TuningRequest};
use hpo_types::{HpoError, HpoResult, LaunchError, SearchResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::backend::{SearchHandle, SearchStatus, TuningBackend};
use crate::confirm::{require_confirmation, Confirmation};
use crate::resolver::ResolvedExperiment;
use crate::retry::RetryPolicy;

/// Submits a search, waits for it and collects one record per trial.
pub struct SearchOrchestrator<B: TuningBackend + ?Sized> {
    backend: Arc<B>,
    confirm: Arc<dyn Confirmation>,
    retry: RetryPolicy,
    wait_timeout: Option<Duration>,
}

impl<B: TuningBackend + ?Sized> SearchOrchestrator<B> {
    pub fn new(backend: Arc<B>, confirm: Arc<dyn Confirmation>) -> Self {
        Self {
            backend,
            confirm,
            retry: RetryPolicy::default(),
            wait_timeout: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Stop waiting locally after `limit`. The search itself keeps running.
    pub fn with_wait_timeout(mut self, limit: Duration) -> Self {
        self.wait_timeout = Some(limit);
        self
    }

    pub fn search_request(
        experiment: &ResolvedExperiment,
        image: &ImageRef,
        objective: &ObjectiveMetric,
    ) -> TuningRequest {
        let job_name = experiment.job_name().as_str();
        let template = RunRequest::new(
            job_name,
            image.clone(),
            experiment.instance_type().clone(),
            experiment.input_data(),
            experiment.budget().max_duration_seconds(),
        )
        .with_spot_instances(experiment.use_spot_instances());
        TuningRequest::new(
            job_name,
            template,
            experiment.ranges().clone(),
            experiment.config().search_strategy(),
            objective.clone(),
            experiment.budget(),
        )
    }

    pub async fn launch_search(
        &self,
        experiment: &ResolvedExperiment,
        image: &ImageRef,
        objective: &ObjectiveMetric,
    ) -> HpoResult<SearchResult> {
        let request = Self::search_request(experiment, image, objective);
        request.validate()?;

        let prompt = format!(
            "Launch search {} with {} trials ({} at a time) on {}?",
            request.job_name, request.max_jobs, request.max_parallel_jobs, request.template.instance_type
        );
        require_confirmation(self.confirm.as_ref(), "search", &prompt)?;

        let handle = self
            .retry
            .run("submit_search", || self.backend.submit_search(&request))
            .await?;
        info!(
            job = %handle.job_name,
            strategy = %request.strategy,
            max_jobs = request.max_jobs,
            max_parallel_jobs = request.max_parallel_jobs,
            "search submitted"
        );

        let started = Instant::now();
        let wait = self.retry.run("wait_search", || self.backend.wait_search(&handle));
        let status = match self.wait_timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!(job = %handle.job_name, limit_secs = limit.as_secs(), "stopped waiting for search");
                    return Err(self.timed_out(&handle, &request.objective, started).await);
                }
            },
            None => wait.await?,
        };

        match status {
            SearchStatus::Completed => {
                let result = self.fetch(&handle).await?;
                match result.best() {
                    Some(best) => info!(
                        job = %result.job_name,
                        trials = result.len(),
                        best_trial = %best.job_name,
                        best_score = ?best.objective,
                        "search finished"
                    ),
                    None => warn!(job = %result.job_name, trials = result.len(), "search finished without a scored trial"),
                }
                Ok(result)
            }
            SearchStatus::TimedOut => Err(self.timed_out(&handle, &request.objective, started).await),
            SearchStatus::Failed { reason } => Err(LaunchError::RunFailed {
                job: handle.job_name.clone(),
                reason,
            }
            .into()),
        }
    }

    async fn fetch(&self, handle: &SearchHandle) -> HpoResult<SearchResult> {
        self.retry
            .run("fetch_results", || self.backend.fetch_results(handle))
            .await
    }

    /// The timeout error, carrying whatever trials finished in time. A failed
    /// fetch leaves the partial result empty.
    async fn timed_out(&self, handle: &SearchHandle, objective: &ObjectiveMetric, started: Instant) -> HpoError {
        let partial = match self.fetch(handle).await {
            Ok(partial) => {
                warn!(
                    job = %handle.job_name,
                    completed = partial.completed_count(),
                    "search timed out, returning partial results"
                );
                partial
            }
            Err(error) => {
                warn!(job = %handle.job_name, %error, "search timed out and its trials could not be fetched");
                SearchResult::new(
                    handle.job_name.clone(),
                    objective.name.clone(),
                    objective.direction,
                    handle.submitted_at,
                    Vec::new(),
                )
            }
        };
        HpoError::Timeout {
            job: handle.job_name.clone(),
            waited_seconds: started.elapsed().as_secs(),
            partial: Box::new(partial),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::{InjectedFailure, LocalBackend, LocalBackendConfig};
    use crate::resolver::{ConfigResolver, RawChoices};

    fn experiment() -> ResolvedExperiment {
        ConfigResolver::resolve(&RawChoices {
            job_suffix: Some("abcd1234".into()),
            ..RawChoices::default()
        })
        .unwrap()
    }

    fn image() -> ImageRef {
        ImageRef::new(None, "cloud-ml-hpo", "23.08")
    }

    fn backend(config: LocalBackendConfig) -> Arc<LocalBackend> {
        Arc::new(LocalBackend::new(LocalBackendConfig {
            seed: Some(42),
            ..config
        }))
    }

    #[test]
    fn test_search_request_carries_budget_and_metric() {
        let experiment = experiment();
        let request =
            SearchOrchestrator::<LocalBackend>::search_request(&experiment, &image(), experiment.objective());
        assert_eq!(request.job_name, "hpo-sgpu-xgb-3cv-abcd1234");
        assert_eq!(request.max_jobs, 10);
        assert_eq!(request.max_parallel_jobs, 2);
        assert_eq!(request.objective.pattern, "final-score: (.*?);");
        assert!(request.template.hyperparameters.is_empty());
        assert!(request.validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_yields_one_record_per_trial() {
        let backend = backend(LocalBackendConfig::default());
        let orchestrator = SearchOrchestrator::new(backend.clone(), Arc::new(|_: &str| true));
        let experiment = experiment();

        let result = orchestrator
            .launch_search(&experiment, &image(), experiment.objective())
            .await
            .unwrap();
        assert_eq!(result.len(), 10);
        assert_eq!(result.completed_count(), 10);
        let numbers: Vec<usize> = result.trials.iter().map(|t| t.trial_number).collect();
        assert_eq!(numbers, (1..=10).collect::<Vec<_>>());
        assert!(result.best().is_some());
    }

    #[tokio::test]
    async fn test_declined_search_makes_no_calls() {
        let backend = backend(LocalBackendConfig::default());
        let orchestrator = SearchOrchestrator::new(backend.clone(), Arc::new(|_: &str| false));
        let experiment = experiment();

        let result = orchestrator
            .launch_search(&experiment, &image(), experiment.objective())
            .await;
        assert!(matches!(result, Err(HpoError::Declined { .. })));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_returns_partial_trials() {
        let backend = backend(LocalBackendConfig {
            trial_latency: Duration::from_secs(10),
            ..LocalBackendConfig::default()
        });
        let orchestrator = SearchOrchestrator::new(backend, Arc::new(|_: &str| true))
            .with_wait_timeout(Duration::from_secs(25));
        let experiment = experiment();

        let error = orchestrator
            .launch_search(&experiment, &image(), experiment.objective())
            .await
            .unwrap_err();
        let partial = error.partial_result().expect("timeout carries partial results");
        assert_eq!(partial.len(), 4);
        assert_eq!(partial.completed_count(), 4);
        assert!(matches!(error, HpoError::Timeout { waited_seconds: 25, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_timeout_returns_partial_trials() {
        let backend = backend(LocalBackendConfig {
            trial_latency: Duration::from_secs(10),
            search_deadline: Some(Duration::from_secs(35)),
            ..LocalBackendConfig::default()
        });
        let orchestrator = SearchOrchestrator::new(backend, Arc::new(|_: &str| true));
        let experiment = experiment();

        let error = orchestrator
            .launch_search(&experiment, &image(), experiment.objective())
            .await
            .unwrap_err();
        let partial = error.partial_result().expect("timeout carries partial results");
        assert_eq!(partial.completed_count(), 6);
        assert_eq!(partial.len(), 8);
    }

    /// Accepts searches that never finish and whose results cannot be read.
    struct UnreachableTuner;

    #[async_trait::async_trait]
    impl TuningBackend for UnreachableTuner {
        async fn submit_search(&self, request: &TuningRequest) -> HpoResult<SearchHandle> {
            Ok(SearchHandle {
                job_name: request.job_name.clone(),
                submitted_at: chrono::Utc::now(),
            })
        }

        async fn wait_search(&self, _handle: &SearchHandle) -> HpoResult<SearchStatus> {
            std::future::pending().await
        }

        async fn fetch_results(&self, _handle: &SearchHandle) -> HpoResult<SearchResult> {
            Err(HpoError::BackendUnavailable {
                service: "tuner".into(),
                message: "connection reset".into(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_survives_failed_result_fetch() {
        let orchestrator = SearchOrchestrator::new(Arc::new(UnreachableTuner), Arc::new(|_: &str| true))
            .with_wait_timeout(Duration::from_secs(5));
        let experiment = experiment();

        let error = orchestrator
            .launch_search(&experiment, &image(), experiment.objective())
            .await
            .unwrap_err();
        match error {
            HpoError::Timeout { job, partial, .. } => {
                assert_eq!(job, "hpo-sgpu-xgb-3cv-abcd1234");
                assert!(partial.is_empty());
                assert_eq!(partial.job_name, job);
                assert_eq!(partial.objective_metric, "final-score");
            }
            other => panic!("expected a timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_submission_is_retried() {
        let backend = backend(LocalBackendConfig::default());
        backend.inject_failure(InjectedFailure::Throttled { retry_after_ms: 1_000 });
        let orchestrator = SearchOrchestrator::new(backend.clone(), Arc::new(|_: &str| true));
        let experiment = experiment();

        let result = orchestrator
            .launch_search(&experiment, &image(), experiment.objective())
            .await
            .unwrap();
        assert_eq!(result.len(), 10);
        // throttled submit, submit, wait, fetch
        assert_eq!(backend.call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_unavailability_surfaces() {
        let backend = backend(LocalBackendConfig::default());
        for _ in 0..3 {
            backend.inject_failure(InjectedFailure::Unavailable);
        }
        let orchestrator = SearchOrchestrator::new(backend.clone(), Arc::new(|_: &str| true));
        let experiment = experiment();

        let result = orchestrator
            .launch_search(&experiment, &image(), experiment.objective())
            .await;
        assert!(matches!(result, Err(HpoError::BackendUnavailable { .. })));
        assert_eq!(backend.call_count(), 3);
    }
}
