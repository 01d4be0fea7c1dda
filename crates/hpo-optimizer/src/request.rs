//! Request descriptors submitted to execution and tuning backends.

use hpo_types::{HpoError, HpoResult, Hyperparameters, InstanceType, SearchStrategyKind};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::search::SearchSpace;
use crate::trial::{ObjectiveMetric, SearchBudget};

/// An externally addressable container image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    /// Registry host, e.g. "123456789012.dkr.ecr.us-east-1.amazonaws.com".
    pub registry: Option<String>,
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(registry: Option<String>, repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            registry,
            repository: repository.into(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.registry {
            Some(registry) => write!(f, "{registry}/{}:{}", self.repository, self.tag),
            None => write!(f, "{}:{}", self.repository, self.tag),
        }
    }
}

/// A single training run. Built fresh per launch and never mutated after
/// submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub job_name: String,
    pub image: ImageRef,
    pub instance_type: InstanceType,
    pub instance_count: u32,
    /// Object-storage URI of the dataset partitions, read-only to the run.
    pub input_data: String,
    pub use_spot_instances: bool,
    pub max_runtime_seconds: u64,
    /// Time to wait for spot capacity plus runtime; only set for spot runs.
    pub max_wait_seconds: Option<u64>,
    pub hyperparameters: Hyperparameters,
}

impl RunRequest {
    pub fn new(
        job_name: impl Into<String>,
        image: ImageRef,
        instance_type: InstanceType,
        input_data: impl Into<String>,
        max_runtime_seconds: u64,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            image,
            instance_type,
            instance_count: 1,
            input_data: input_data.into(),
            use_spot_instances: false,
            max_runtime_seconds,
            max_wait_seconds: None,
            hyperparameters: Hyperparameters::new(),
        }
    }

    pub fn with_spot_instances(mut self, enabled: bool) -> Self {
        self.use_spot_instances = enabled;
        self.max_wait_seconds = enabled.then_some(self.max_runtime_seconds);
        self
    }

    pub fn with_hyperparameters(mut self, hyperparameters: Hyperparameters) -> Self {
        self.hyperparameters = hyperparameters;
        self
    }

    pub fn validate(&self) -> HpoResult<()> {
        if self.job_name.trim().is_empty() {
            return Err(HpoError::invalid("job_name", &self.job_name, "must not be empty"));
        }
        if !self.input_data.contains("://") {
            return Err(HpoError::invalid(
                "input_data",
                &self.input_data,
                "must be a URI such as s3://bucket/prefix",
            ));
        }
        if self.instance_count == 0 {
            return Err(HpoError::invalid("instance_count", 0, "must be at least 1"));
        }
        if self.max_runtime_seconds == 0 {
            return Err(HpoError::invalid("max_runtime_seconds", 0, "must be positive"));
        }
        if let Some(max_wait) = self.max_wait_seconds {
            if max_wait < self.max_runtime_seconds {
                return Err(HpoError::invalid(
                    "max_wait_seconds",
                    max_wait,
                    "must be at least max_runtime_seconds",
                ));
            }
        }
        Ok(())
    }
}

/// A multi-trial search. The backend samples `ranges` with `strategy` and
/// launches up to `max_jobs` copies of `template`, `max_parallel_jobs` at a
/// time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningRequest {
    pub job_name: String,
    pub template: RunRequest,
    pub ranges: SearchSpace,
    pub strategy: SearchStrategyKind,
    pub objective: ObjectiveMetric,
    pub max_jobs: u32,
    pub max_parallel_jobs: u32,
}

impl TuningRequest {
    /// Static hyperparameters in `template` that are also searched are dropped
    /// so every trial uses the sampled value.
    pub fn new(
        job_name: impl Into<String>,
        mut template: RunRequest,
        ranges: SearchSpace,
        strategy: SearchStrategyKind,
        objective: ObjectiveMetric,
        budget: &SearchBudget,
    ) -> Self {
        template
            .hyperparameters
            .retain(|name, _| ranges.get(name).is_none());
        Self {
            job_name: job_name.into(),
            template,
            ranges,
            strategy,
            objective,
            max_jobs: budget.max_jobs(),
            max_parallel_jobs: budget.max_parallel_jobs(),
        }
    }

    pub fn validate(&self) -> HpoResult<()> {
        self.template.validate()?;
        self.ranges.validate()?;
        self.objective.validate()?;
        if self.max_parallel_jobs == 0 || self.max_parallel_jobs > self.max_jobs {
            return Err(HpoError::invalid(
                "max_parallel_jobs",
                self.max_parallel_jobs,
                format!("must be between 1 and max_jobs ({})", self.max_jobs),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpo_types::ParameterValue;

    fn image() -> ImageRef {
        ImageRef::new(
            Some("registry.example.com".into()),
            "cloud-ml-hpo",
            "23.08-cuda11.8-py3.10",
        )
    }

    fn run() -> RunRequest {
        RunRequest::new(
            "hpo-sgpu-xgb-3cv-abcd1234-smoke",
            image(),
            InstanceType::new("ml.p3.2xlarge").unwrap(),
            "s3://datasets-us-east-1/1_year",
            86_400,
        )
    }

    #[test]
    fn image_reference_display() {
        assert_eq!(
            image().to_string(),
            "registry.example.com/cloud-ml-hpo:23.08-cuda11.8-py3.10"
        );
        assert_eq!(ImageRef::new(None, "local", "v1").to_string(), "local:v1");
    }

    #[test]
    fn spot_runs_get_max_wait() {
        let spot = run().with_spot_instances(true);
        assert_eq!(spot.max_wait_seconds, Some(86_400));
        assert!(spot.validate().is_ok());

        let on_demand = spot.with_spot_instances(false);
        assert_eq!(on_demand.max_wait_seconds, None);
    }

    #[test]
    fn run_validation() {
        assert!(run().validate().is_ok());

        let mut bad = run();
        bad.input_data = "/local/path".into();
        assert!(bad.validate().is_err());

        let mut bad = run().with_spot_instances(true);
        bad.max_wait_seconds = Some(10);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn tuning_request_drops_searched_static_hyperparameters() {
        let mut statics = Hyperparameters::new();
        statics.insert("max_depth".into(), ParameterValue::Int(5));
        statics.insert("seed".into(), ParameterValue::Int(0));

        let ranges = SearchSpace::new().add_integer("max_depth", 5, 15);
        let request = TuningRequest::new(
            "hpo-sgpu-xgb-3cv-abcd1234",
            run().with_hyperparameters(statics),
            ranges,
            SearchStrategyKind::Random,
            ObjectiveMetric::default(),
            &SearchBudget::default(),
        );

        assert!(!request.template.hyperparameters.contains_key("max_depth"));
        assert!(request.template.hyperparameters.contains_key("seed"));
        assert_eq!(request.max_jobs, 10);
        assert_eq!(request.max_parallel_jobs, 2);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn tuning_request_serializes_objective_rule() {
        let request = TuningRequest::new(
            "job",
            run(),
            SearchSpace::new().add_integer("max_depth", 5, 15),
            SearchStrategyKind::Bayesian,
            ObjectiveMetric::default(),
            &SearchBudget::default(),
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["objective"]["pattern"], "final-score: (.*?);");
        assert_eq!(json["objective"]["direction"], "maximize");
        assert_eq!(json["strategy"], "Bayesian");
        assert_eq!(json["template"]["instance_type"], "ml.p3.2xlarge");
    }
}
