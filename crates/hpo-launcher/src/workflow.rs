//! The full launch sequence: resolve, build and publish the image, smoke
//! test, search.

use hpo_optimizer::ImageRef;
use hpo_types::{HpoResult, SearchResult};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::backend::{ImageToolchain, RunStatus, TrainingBackend, TuningBackend};
use crate::confirm::Confirmation;
use crate::image::{publish, ImageBuilder};
use crate::launcher::JobLauncher;
use crate::orchestrator::SearchOrchestrator;
use crate::resolver::{ConfigResolver, RawChoices, ResolvedExperiment};
use crate::retry::RetryPolicy;

pub const DEFAULT_REPOSITORY: &str = "cloud-ml-hpo";

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub experiment: ResolvedExperiment,
    pub image: ImageRef,
    /// `None` when the smoke test was skipped.
    pub smoke_test: Option<RunStatus>,
    pub result: SearchResult,
}

pub struct Workflow {
    toolchain: Arc<dyn ImageToolchain>,
    training: Arc<dyn TrainingBackend>,
    tuning: Arc<dyn TuningBackend>,
    confirm: Arc<dyn Confirmation>,
    retry: RetryPolicy,
    wait_timeout: Option<Duration>,
    skip_smoke_test: bool,
    registry: Option<String>,
    repository: String,
}

impl Workflow {
    pub fn new(
        toolchain: Arc<dyn ImageToolchain>,
        training: Arc<dyn TrainingBackend>,
        tuning: Arc<dyn TuningBackend>,
        confirm: Arc<dyn Confirmation>,
    ) -> Self {
        Self {
            toolchain,
            training,
            tuning,
            confirm,
            retry: RetryPolicy::default(),
            wait_timeout: None,
            skip_smoke_test: false,
            registry: None,
            repository: DEFAULT_REPOSITORY.to_string(),
        }
    }

    pub fn with_target(mut self, registry: Option<String>, repository: impl Into<String>) -> Self {
        self.registry = registry;
        self.repository = repository.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_wait_timeout(mut self, limit: Option<Duration>) -> Self {
        self.wait_timeout = limit;
        self
    }

    pub fn skip_smoke_test(mut self, skip: bool) -> Self {
        self.skip_smoke_test = skip;
        self
    }

    pub fn launcher(&self) -> JobLauncher<dyn TrainingBackend> {
        JobLauncher::new(Arc::clone(&self.training), Arc::clone(&self.confirm)).with_retry(self.retry)
    }

    pub fn orchestrator(&self) -> SearchOrchestrator<dyn TuningBackend> {
        let orchestrator = SearchOrchestrator::new(Arc::clone(&self.tuning), Arc::clone(&self.confirm))
            .with_retry(self.retry);
        match self.wait_timeout {
            Some(limit) => orchestrator.with_wait_timeout(limit),
            None => orchestrator,
        }
    }

    pub async fn publish_image(&self, builder: ImageBuilder) -> HpoResult<ImageRef> {
        let spec = builder.build()?;
        publish(&spec, self.toolchain.as_ref(), self.registry.clone(), &self.repository).await
    }

    pub async fn run(&self, raw: &RawChoices, builder: ImageBuilder) -> HpoResult<WorkflowReport> {
        let experiment = ConfigResolver::resolve(raw)?;
        let image = self.publish_image(builder).await?;

        let smoke_test = if self.skip_smoke_test {
            info!(job = %experiment.job_name(), "smoke test skipped");
            None
        } else {
            let launcher = self.launcher();
            let handle = launcher.launch_smoke_test(&experiment, &image).await?;
            Some(launcher.wait(&handle).await?)
        };

        let result = self
            .orchestrator()
            .launch_search(&experiment, &image, experiment.objective())
            .await?;

        Ok(WorkflowReport {
            experiment,
            image,
            smoke_test,
            result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{BaseLayer, InjectedFile};
    use crate::local::{InjectedFailure, LocalBackend, LocalBackendConfig};
    use hpo_types::{BuildError, HpoError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn builder() -> ImageBuilder {
        ImageBuilder::new(
            BaseLayer::new("rapidsai/base", "23.08-cuda11.8-py3.10"),
            vec![InjectedFile::new("code/train.py", "/opt/ml/code/")],
        )
    }

    fn workflow(backend: &Arc<LocalBackend>, confirm: Arc<dyn Confirmation>) -> Workflow {
        Workflow::new(backend.clone(), backend.clone(), backend.clone(), confirm)
    }

    fn local() -> Arc<LocalBackend> {
        Arc::new(LocalBackend::new(LocalBackendConfig {
            seed: Some(3),
            ..LocalBackendConfig::default()
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_with_smoke_test() {
        let backend = local();
        let prompts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&prompts);
        let confirm = Arc::new(move |_: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        let report = workflow(&backend, confirm)
            .run(&RawChoices::default(), builder())
            .await
            .unwrap();

        assert_eq!(prompts.load(Ordering::SeqCst), 2);
        assert!(matches!(report.smoke_test, Some(RunStatus::Completed { .. })));
        assert_eq!(report.result.len(), 10);
        assert_eq!(report.image.to_string(), "cloud-ml-hpo:23.08-cuda11.8-py3.10");
        assert_eq!(backend.pushed_images(), vec![report.image.clone()]);
        assert!(report.experiment.instance_type().has_gpu());
    }

    #[tokio::test(start_paused = true)]
    async fn test_skipped_smoke_test() {
        let backend = local();
        let report = workflow(&backend, Arc::new(|_: &str| true))
            .skip_smoke_test(true)
            .run(&RawChoices::default(), builder())
            .await
            .unwrap();
        assert!(report.smoke_test.is_none());
        assert_eq!(report.result.len(), 10);
    }

    #[tokio::test]
    async fn test_invalid_choices_stop_before_any_call() {
        let backend = local();
        let raw = RawChoices {
            dataset_size: "2_year".into(),
            ..RawChoices::default()
        };
        let result = workflow(&backend, Arc::new(|_: &str| true)).run(&raw, builder()).await;
        assert!(matches!(result, Err(HpoError::InvalidConfig { .. })));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_toolchain_failure_is_surfaced_unmodified() {
        let backend = local();
        backend.inject_failure(InjectedFailure::Unavailable);
        let workflow = workflow(&backend, Arc::new(|_: &str| true));
        let first = workflow.publish_image(builder()).await;
        match first {
            Err(HpoError::Build(BuildError::Toolchain { step, message })) => {
                assert_eq!(step, "build");
                assert!(message.contains("connection refused"));
            }
            other => panic!("expected a toolchain error, got {other:?}"),
        }

        backend.inject_failure(InjectedFailure::Toolchain {
            message: "denied: requested access to the resource is denied".into(),
        });
        let result = workflow.run(&RawChoices::default(), builder()).await;
        match result {
            Err(HpoError::Build(BuildError::Toolchain { message, .. })) => {
                assert_eq!(message, "denied: requested access to the resource is denied");
            }
            other => panic!("expected a toolchain error, got {other:?}"),
        }
        assert!(backend.pushed_images().is_empty());
    }
}
