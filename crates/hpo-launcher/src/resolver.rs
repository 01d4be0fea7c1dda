//! Turns raw experiment choices into a validated, immutable experiment.

use hpo_optimizer::{HyperparameterRange, ObjectiveMetric, SearchBudget, SearchSpace};
use hpo_types::{
    recommend_instance_type, Algorithm, ComputeMode, DatasetSize, ExperimentConfig, HpoError,
    HpoResult, InstanceType, JobName, ObjectiveDirection, SearchStrategyKind,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Unvalidated user choices, as they arrive from a config file or CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChoices {
    pub dataset_size: String,
    pub algorithm: String,
    pub compute_mode: String,
    pub cv_folds: i64,
    pub search_strategy: String,
    pub max_jobs: i64,
    pub max_parallel_jobs: i64,
    pub max_duration_seconds: i64,
    /// `None` selects the default ranges for the algorithm.
    pub ranges: Option<Vec<RawRange>>,
    pub objective_metric: Option<String>,
    pub objective_pattern: Option<String>,
    pub objective_direction: Option<String>,
    pub instance_type: Option<String>,
    pub use_spot_instances: bool,
    /// Full dataset URI; derived from region and bucket prefix when absent.
    pub input_data: Option<String>,
    pub region: String,
    pub bucket_prefix: String,
    pub job_prefix: String,
    pub job_suffix: Option<String>,
}

impl Default for RawChoices {
    fn default() -> Self {
        Self {
            dataset_size: "small".into(),
            algorithm: "GradientBoostedTrees".into(),
            compute_mode: "singleGPU".into(),
            cv_folds: 3,
            search_strategy: "Random".into(),
            max_jobs: 10,
            max_parallel_jobs: 2,
            max_duration_seconds: 86_400,
            ranges: None,
            objective_metric: None,
            objective_pattern: None,
            objective_direction: None,
            instance_type: None,
            use_spot_instances: false,
            input_data: None,
            region: "us-east-1".into(),
            bucket_prefix: "sagemaker-rapids-hpo".into(),
            job_prefix: "hpo".into(),
            job_suffix: None,
        }
    }
}

/// An unvalidated hyperparameter range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRange {
    pub name: String,
    /// "integer" or "continuous"
    pub kind: String,
    pub lower: f64,
    pub upper: f64,
}

impl RawRange {
    fn resolve(&self) -> HpoResult<HyperparameterRange> {
        let field = format!("ranges.{}", self.name);
        let range = match self.kind.trim().to_ascii_lowercase().as_str() {
            "integer" | "int" => {
                let integral = |v: f64| v.is_finite() && v.fract() == 0.0;
                if !integral(self.lower) || !integral(self.upper) {
                    return Err(HpoError::invalid(
                        field,
                        format!("{}..{}", self.lower, self.upper),
                        "integer range bounds must be whole numbers",
                    ));
                }
                HyperparameterRange::integer(&self.name, self.lower as i64, self.upper as i64)
            }
            "continuous" | "float" => HyperparameterRange::continuous(&self.name, self.lower, self.upper),
            _ => {
                return Err(HpoError::invalid(
                    format!("{field}.kind"),
                    &self.kind,
                    "expected integer or continuous",
                ))
            }
        };
        range.validate()?;
        Ok(range)
    }
}

/// A fully validated experiment. Nothing downstream re-validates it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedExperiment {
    config: ExperimentConfig,
    job_name: JobName,
    instance_type: InstanceType,
    recommended_instance_type: InstanceType,
    ranges: SearchSpace,
    budget: SearchBudget,
    objective: ObjectiveMetric,
    input_data: String,
    use_spot_instances: bool,
}

impl ResolvedExperiment {
    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn job_name(&self) -> &JobName {
        &self.job_name
    }

    /// Instance the runs are placed on: the override if one was given.
    pub fn instance_type(&self) -> &InstanceType {
        &self.instance_type
    }

    pub fn recommended_instance_type(&self) -> &InstanceType {
        &self.recommended_instance_type
    }

    pub fn ranges(&self) -> &SearchSpace {
        &self.ranges
    }

    pub fn budget(&self) -> &SearchBudget {
        &self.budget
    }

    pub fn objective(&self) -> &ObjectiveMetric {
        &self.objective
    }

    pub fn input_data(&self) -> &str {
        &self.input_data
    }

    pub fn use_spot_instances(&self) -> bool {
        self.use_spot_instances
    }
}

/// Object-storage location of the dataset partition for `size`.
pub fn dataset_uri(bucket_prefix: &str, region: &str, size: DatasetSize) -> String {
    format!("s3://{bucket_prefix}-{region}/{}", size.partition_dir())
}

fn parse_direction(raw: &str) -> HpoResult<ObjectiveDirection> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "maximize" | "max" => Ok(ObjectiveDirection::Maximize),
        "minimize" | "min" => Ok(ObjectiveDirection::Minimize),
        _ => Err(HpoError::invalid(
            "objective.direction",
            raw,
            "expected maximize or minimize",
        )),
    }
}

/// Validates raw choices field by field and stops at the first bad one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigResolver;

impl ConfigResolver {
    pub fn resolve(raw: &RawChoices) -> HpoResult<ResolvedExperiment> {
        let dataset_size: DatasetSize = raw.dataset_size.parse()?;
        let algorithm: Algorithm = raw.algorithm.parse()?;
        let compute_mode: ComputeMode = raw.compute_mode.parse()?;
        let config = ExperimentConfig::new(
            dataset_size,
            algorithm,
            compute_mode,
            raw.cv_folds,
            raw.search_strategy.parse::<SearchStrategyKind>()?,
        )?;

        let budget = SearchBudget::new(raw.max_jobs, raw.max_parallel_jobs, raw.max_duration_seconds)?;

        let ranges = match &raw.ranges {
            Some(raw_ranges) => raw_ranges
                .iter()
                .map(RawRange::resolve)
                .collect::<HpoResult<Vec<_>>>()
                .map(|parameters| SearchSpace { parameters })?,
            None => SearchSpace::defaults_for(algorithm),
        }
        .rename_for(algorithm);
        ranges.validate()?;
        for name in ranges.unsupported_by(algorithm) {
            warn!(
                parameter = name,
                algorithm = %algorithm,
                "range is not a recognised argument of the training entrypoint"
            );
        }

        let defaults = ObjectiveMetric::default();
        let direction = match &raw.objective_direction {
            Some(direction) => parse_direction(direction)?,
            None => defaults.direction,
        };
        let objective = ObjectiveMetric::new(
            raw.objective_metric.clone().unwrap_or(defaults.name),
            raw.objective_pattern.clone().unwrap_or(defaults.pattern),
            direction,
        );
        objective.validate()?;

        let recommended_instance_type = recommend_instance_type(compute_mode, dataset_size);
        let instance_type = match &raw.instance_type {
            Some(name) => {
                let chosen = InstanceType::new(name.as_str())?;
                if compute_mode.uses_gpu() && !chosen.has_gpu() {
                    warn!(
                        instance_type = %chosen,
                        compute_mode = %compute_mode,
                        "GPU compute mode on an instance without GPUs"
                    );
                }
                chosen
            }
            None => recommended_instance_type.clone(),
        };

        let input_data = match &raw.input_data {
            Some(uri) if !uri.contains("://") => {
                return Err(HpoError::invalid(
                    "input_data",
                    uri,
                    "must be a URI such as s3://bucket/prefix",
                ))
            }
            Some(uri) => uri.clone(),
            None => {
                if raw.region.trim().is_empty() {
                    return Err(HpoError::invalid("region", &raw.region, "must not be empty"));
                }
                if raw.bucket_prefix.trim().is_empty() {
                    return Err(HpoError::invalid("bucket_prefix", &raw.bucket_prefix, "must not be empty"));
                }
                dataset_uri(raw.bucket_prefix.trim(), raw.region.trim(), dataset_size)
            }
        };

        let job_name = match &raw.job_suffix {
            Some(suffix) => JobName::with_suffix(&raw.job_prefix, &config, suffix)?,
            None => JobName::generate(&raw.job_prefix, &config)?,
        };

        info!(
            job = %job_name,
            dataset = %dataset_size,
            algorithm = %algorithm,
            compute = %compute_mode,
            instance_type = %instance_type,
            max_jobs = budget.max_jobs(),
            "experiment resolved"
        );

        Ok(ResolvedExperiment {
            config,
            job_name,
            instance_type,
            recommended_instance_type,
            ranges,
            budget,
            objective,
            input_data,
            use_spot_instances: raw.use_spot_instances,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(error: HpoError) -> String {
        match error {
            HpoError::InvalidConfig { field, .. } => field,
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn test_defaults_resolve_to_gpu_instance() {
        let resolved = ConfigResolver::resolve(&RawChoices::default()).unwrap();
        assert_eq!(resolved.config().dataset_size(), DatasetSize::Small);
        assert_eq!(resolved.config().cv_folds(), 3);
        assert_eq!(resolved.instance_type().as_str(), "ml.p3.2xlarge");
        assert!(resolved.instance_type().has_gpu());
        assert_eq!(resolved.input_data(), "s3://sagemaker-rapids-hpo-us-east-1/1_year");
        assert_eq!(resolved.budget().max_jobs(), 10);
        assert_eq!(resolved.objective().pattern, "final-score: (.*?);");
        assert!(resolved.ranges().get("num_boost_round").is_some());
        assert!(resolved.job_name().as_str().starts_with("hpo-sgpu-xgb-3cv-"));
    }

    #[test]
    fn test_unknown_dataset_size_rejected() {
        let raw = RawChoices {
            dataset_size: "2_year".into(),
            ..RawChoices::default()
        };
        let error = ConfigResolver::resolve(&raw).unwrap_err();
        assert!(error.to_string().contains("2_year"));
        assert_eq!(field_of(error), "dataset_size");
    }

    #[test]
    fn test_fails_fast_on_first_bad_field() {
        let raw = RawChoices {
            algorithm: "LightGBM".into(),
            compute_mode: "TPU".into(),
            ..RawChoices::default()
        };
        assert_eq!(field_of(ConfigResolver::resolve(&raw).unwrap_err()), "algorithm");
    }

    #[test]
    fn test_cv_folds_boundary() {
        let zero = RawChoices {
            cv_folds: 0,
            ..RawChoices::default()
        };
        assert_eq!(field_of(ConfigResolver::resolve(&zero).unwrap_err()), "cv_folds");

        let one = RawChoices {
            cv_folds: 1,
            ..RawChoices::default()
        };
        assert_eq!(ConfigResolver::resolve(&one).unwrap().config().cv_folds(), 1);
    }

    #[test]
    fn test_parallelism_above_max_jobs_rejected() {
        let raw = RawChoices {
            max_jobs: 2,
            max_parallel_jobs: 3,
            ..RawChoices::default()
        };
        assert_eq!(field_of(ConfigResolver::resolve(&raw).unwrap_err()), "max_parallel_jobs");
    }

    #[test]
    fn test_ranges_renamed_for_random_forest() {
        let raw = RawChoices {
            algorithm: "RandomForest".into(),
            ranges: Some(vec![
                RawRange {
                    name: "num_boost_round".into(),
                    kind: "integer".into(),
                    lower: 100.0,
                    upper: 500.0,
                },
                RawRange {
                    name: "max_features".into(),
                    kind: "continuous".into(),
                    lower: 0.1,
                    upper: 1.0,
                },
            ]),
            ..RawChoices::default()
        };
        let resolved = ConfigResolver::resolve(&raw).unwrap();
        assert!(resolved.ranges().get("n_estimators").is_some());
        assert!(resolved.ranges().get("num_boost_round").is_none());
        assert!(resolved.job_name().as_str().contains("-rf-"));
    }

    #[test]
    fn test_integer_range_requires_whole_bounds() {
        let raw = RawChoices {
            ranges: Some(vec![RawRange {
                name: "max_depth".into(),
                kind: "integer".into(),
                lower: 2.5,
                upper: 10.0,
            }]),
            ..RawChoices::default()
        };
        assert_eq!(field_of(ConfigResolver::resolve(&raw).unwrap_err()), "ranges.max_depth");
    }

    #[test]
    fn test_instance_override_and_storage() {
        let raw = RawChoices {
            dataset_size: "large".into(),
            instance_type: Some("ml.g5.2xlarge".into()),
            input_data: Some("s3://my-bucket/airline".into()),
            job_suffix: Some("abcd1234".into()),
            ..RawChoices::default()
        };
        let resolved = ConfigResolver::resolve(&raw).unwrap();
        assert_eq!(resolved.instance_type().as_str(), "ml.g5.2xlarge");
        assert_eq!(resolved.recommended_instance_type().as_str(), "ml.p3.2xlarge");
        assert_eq!(resolved.input_data(), "s3://my-bucket/airline");
        assert_eq!(resolved.job_name().as_str(), "hpo-sgpu-xgb-3cv-abcd1234");

        let bad = RawChoices {
            input_data: Some("my-bucket/airline".into()),
            ..RawChoices::default()
        };
        assert_eq!(field_of(ConfigResolver::resolve(&bad).unwrap_err()), "input_data");
    }

    #[test]
    fn test_objective_direction_parsed() {
        let raw = RawChoices {
            objective_direction: Some("Minimize".into()),
            ..RawChoices::default()
        };
        let resolved = ConfigResolver::resolve(&raw).unwrap();
        assert_eq!(resolved.objective().direction, ObjectiveDirection::Minimize);

        let bad = RawChoices {
            objective_direction: Some("sideways".into()),
            ..RawChoices::default()
        };
        assert_eq!(field_of(ConfigResolver::resolve(&bad).unwrap_err()), "objective.direction");
    }
}
