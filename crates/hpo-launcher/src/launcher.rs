//! Single-trial smoke test ahead of a full search.

use hpo_optimizer::{default_hyperparameters, ImageRef, RunRequest};
use hpo_types::{HpoResult, LaunchError};
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::{RunHandle, RunStatus, TrainingBackend};
use crate::confirm::{require_confirmation, Confirmation};
use crate::resolver::ResolvedExperiment;
use crate::retry::RetryPolicy;

/// Launches one training run with the entrypoint's default hyperparameters.
pub struct JobLauncher<B: TrainingBackend + ?Sized> {
    backend: Arc<B>,
    confirm: Arc<dyn Confirmation>,
    retry: RetryPolicy,
}

impl<B: TrainingBackend + ?Sized> JobLauncher<B> {
    pub fn new(backend: Arc<B>, confirm: Arc<dyn Confirmation>) -> Self {
        Self {
            backend,
            confirm,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn smoke_test_request(experiment: &ResolvedExperiment, image: &ImageRef) -> RunRequest {
        RunRequest::new(
            experiment.job_name().smoke_test(),
            image.clone(),
            experiment.instance_type().clone(),
            experiment.input_data(),
            experiment.budget().max_duration_seconds(),
        )
        .with_spot_instances(experiment.use_spot_instances())
        .with_hyperparameters(default_hyperparameters(experiment.config().algorithm()))
    }

    /// Submit the smoke test once the user approves it.
    pub async fn launch_smoke_test(
        &self,
        experiment: &ResolvedExperiment,
        image: &ImageRef,
    ) -> HpoResult<RunHandle> {
        let request = Self::smoke_test_request(experiment, image);
        request.validate()?;

        let prompt = format!(
            "Launch smoke test {} on 1 x {} using {}?",
            request.job_name, request.instance_type, request.image
        );
        require_confirmation(self.confirm.as_ref(), "smoke test", &prompt)?;

        let handle = self
            .retry
            .run("submit_run", || self.backend.submit_run(&request))
            .await?;
        info!(job = %handle.job_name, instance_type = %request.instance_type, "smoke test submitted");
        Ok(handle)
    }

    /// Wait for the run to finish. A failed run is an error naming the job.
    pub async fn wait(&self, handle: &RunHandle) -> HpoResult<RunStatus> {
        let status = self
            .retry
            .run("wait_run", || self.backend.wait_run(handle))
            .await?;
        match &status {
            RunStatus::Completed { final_score } => {
                info!(job = %handle.job_name, final_score = ?final_score, "run completed");
            }
            RunStatus::Stopped => {
                warn!(job = %handle.job_name, "run stopped before finishing");
            }
            RunStatus::Failed { reason } => {
                return Err(LaunchError::RunFailed {
                    job: handle.job_name.clone(),
                    reason: reason.clone(),
                }
                .into());
            }
        }
        Ok(status)
    }
}
