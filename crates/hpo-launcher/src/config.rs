//! Experiment definitions loaded from TOML.
//!
//! ```toml
//! [experiment]
//! dataset_size = "small"
//! algorithm = "XGBoost"
//! compute_mode = "singleGPU"
//! cv_folds = 3
//! search_strategy = "Random"
//!
//! [budget]
//! max_jobs = 10
//! max_parallel_jobs = 2
//!
//! [ranges.max_depth]
//! kind = "integer"
//! lower = 5
//! upper = 15
//!
//! [image]
//! base_repository = "rapidsai/base"
//! base_version = "23.08-cuda11.8-py3.10"
//! repository = "cloud-ml-hpo"
//!
//! [[image.files]]
//! source = "code/train.py"
//! destination = "/opt/ml/code/"
//! ```
//!
//! Every section is optional. Missing values fall back to the defaults of
//! [`RawChoices`]; a missing `[ranges]` table selects the algorithm's default
//! ranges.

use hpo_types::{config_error, HpoResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::image::{BaseLayer, ImageBuilder, InjectedFile};
use crate::resolver::{RawChoices, RawRange};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentSection {
    pub dataset_size: String,
    pub algorithm: String,
    pub compute_mode: String,
    pub cv_folds: i64,
    pub search_strategy: String,
    pub job_prefix: String,
    pub job_suffix: Option<String>,
}

impl Default for ExperimentSection {
    fn default() -> Self {
        let raw = RawChoices::default();
        Self {
            dataset_size: raw.dataset_size,
            algorithm: raw.algorithm,
            compute_mode: raw.compute_mode,
            cv_folds: raw.cv_folds,
            search_strategy: raw.search_strategy,
            job_prefix: raw.job_prefix,
            job_suffix: raw.job_suffix,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BudgetSection {
    pub max_jobs: i64,
    pub max_parallel_jobs: i64,
    pub max_duration_seconds: i64,
}

impl Default for BudgetSection {
    fn default() -> Self {
        let raw = RawChoices::default();
        Self {
            max_jobs: raw.max_jobs,
            max_parallel_jobs: raw.max_parallel_jobs,
            max_duration_seconds: raw.max_duration_seconds,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObjectiveSection {
    pub metric: Option<String>,
    pub pattern: Option<String>,
    pub direction: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComputeSection {
    pub instance_type: Option<String>,
    pub use_spot_instances: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    pub region: String,
    pub bucket_prefix: String,
    pub input_data: Option<String>,
}

impl Default for StorageSection {
    fn default() -> Self {
        let raw = RawChoices::default();
        Self {
            region: raw.region,
            bucket_prefix: raw.bucket_prefix,
            input_data: raw.input_data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeSection {
    pub kind: String,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileEntry {
    pub source: PathBuf,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageSection {
    pub base_repository: String,
    pub base_version: String,
    /// Repository the built image is pushed to.
    pub repository: String,
    #[serde(default)]
    pub registry: Option<String>,
    #[serde(default)]
    pub entrypoint: Option<String>,
    /// Build context; relative paths are taken from the config file's directory.
    #[serde(default)]
    pub context_dir: Option<PathBuf>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// A parsed experiment file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentFile {
    pub experiment: ExperimentSection,
    pub budget: BudgetSection,
    pub objective: ObjectiveSection,
    pub compute: ComputeSection,
    pub storage: StorageSection,
    pub ranges: Option<BTreeMap<String, RangeSection>>,
    pub image: Option<ImageSection>,
    /// File this was loaded from.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl ExperimentFile {
    pub fn load(path: &Path) -> HpoResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| config_error!("cannot read {}: {e}", path.display()))?;
        let mut file = Self::from_toml_str(&content)
            .map_err(|e| config_error!("{}: {e}", path.display()))?;
        file.source = Some(path.to_path_buf());
        Ok(file)
    }

    pub fn from_toml_str(content: &str) -> HpoResult<Self> {
        toml::from_str(content).map_err(|e| config_error!("invalid experiment file: {e}"))
    }

    pub fn to_raw_choices(&self) -> RawChoices {
        let ranges = self.ranges.as_ref().map(|ranges| {
            ranges
                .iter()
                .map(|(name, range)| RawRange {
                    name: name.clone(),
                    kind: range.kind.clone(),
                    lower: range.lower,
                    upper: range.upper,
                })
                .collect()
        });

        RawChoices {
            dataset_size: self.experiment.dataset_size.clone(),
            algorithm: self.experiment.algorithm.clone(),
            compute_mode: self.experiment.compute_mode.clone(),
            cv_folds: self.experiment.cv_folds,
            search_strategy: self.experiment.search_strategy.clone(),
            max_jobs: self.budget.max_jobs,
            max_parallel_jobs: self.budget.max_parallel_jobs,
            max_duration_seconds: self.budget.max_duration_seconds,
            ranges,
            objective_metric: self.objective.metric.clone(),
            objective_pattern: self.objective.pattern.clone(),
            objective_direction: self.objective.direction.clone(),
            instance_type: self.compute.instance_type.clone(),
            use_spot_instances: self.compute.use_spot_instances,
            input_data: self.storage.input_data.clone(),
            region: self.storage.region.clone(),
            bucket_prefix: self.storage.bucket_prefix.clone(),
            job_prefix: self.experiment.job_prefix.clone(),
            job_suffix: self.experiment.job_suffix.clone(),
        }
    }

    fn image_section(&self) -> HpoResult<&ImageSection> {
        self.image
            .as_ref()
            .ok_or_else(|| config_error!("the experiment file has no [image] section"))
    }

    pub fn image_builder(&self) -> HpoResult<ImageBuilder> {
        let image = self.image_section()?;
        let files = image
            .files
            .iter()
            .map(|f| InjectedFile::new(f.source.clone(), f.destination.clone()))
            .collect();
        let mut builder = ImageBuilder::new(
            BaseLayer::new(image.base_repository.clone(), image.base_version.clone()),
            files,
        );
        for (key, value) in &image.env {
            builder = builder.with_env(key.clone(), value.clone());
        }
        if let Some(entrypoint) = &image.entrypoint {
            builder = builder.with_entrypoint(entrypoint.clone());
        }
        Ok(builder)
    }

    /// Registry and repository the image is pushed to.
    pub fn image_target(&self) -> HpoResult<(Option<String>, String)> {
        let image = self.image_section()?;
        Ok((image.registry.clone(), image.repository.clone()))
    }

    /// Build context directory, resolved against the config file's location.
    pub fn context_dir(&self) -> PathBuf {
        let base = self
            .source
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default();
        match self.image.as_ref().and_then(|i| i.context_dir.as_ref()) {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => base.join(dir),
            None => base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ConfigResolver;
    use hpo_types::HpoError;
    use std::io::Write;

    const EXAMPLE: &str = r#"
[experiment]
dataset_size = "medium"
algorithm = "RandomForest"
compute_mode = "multi-GPU"
cv_folds = 5
search_strategy = "Bayesian"
job_suffix = "feed0001"

[budget]
max_jobs = 6
max_parallel_jobs = 3

[objective]
direction = "maximize"

[compute]
use_spot_instances = true

[storage]
region = "us-west-2"

[ranges.max_depth]
kind = "integer"
lower = 5
upper = 15

[ranges.num_boost_round]
kind = "integer"
lower = 100
upper = 500

[image]
base_repository = "rapidsai/base"
base_version = "23.08-cuda11.8-py3.10"
repository = "cloud-ml-hpo"
context_dir = "build"

[[image.files]]
source = "code/train.py"
destination = "/opt/ml/code/"

[image.env]
PYTHONUNBUFFERED = "TRUE"
"#;

    #[test]
    fn test_full_file_resolves() {
        let file = ExperimentFile::from_toml_str(EXAMPLE).unwrap();
        let resolved = ConfigResolver::resolve(&file.to_raw_choices()).unwrap();

        assert_eq!(resolved.job_name().as_str(), "hpo-mgpu-rf-5cv-feed0001");
        assert_eq!(resolved.instance_type().as_str(), "ml.p3.8xlarge");
        assert_eq!(resolved.input_data(), "s3://sagemaker-rapids-hpo-us-west-2/3_year");
        assert_eq!(resolved.budget().max_duration_seconds(), 86_400);
        assert!(resolved.use_spot_instances());
        assert!(resolved.ranges().get("n_estimators").is_some());
        assert_eq!(resolved.ranges().len(), 2);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let file = ExperimentFile::from_toml_str("").unwrap();
        assert_eq!(file.to_raw_choices(), RawChoices::default());
        assert!(matches!(file.image_builder(), Err(HpoError::Config(_))));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result = ExperimentFile::from_toml_str("[budget]\nmax_trials = 4\n");
        assert!(matches!(result, Err(HpoError::Config(_))));
    }

    #[test]
    fn test_image_section_builds_spec() {
        let file = ExperimentFile::from_toml_str(EXAMPLE).unwrap();
        let spec = file.image_builder().unwrap().build().unwrap();
        assert_eq!(spec.tag, "23.08-cuda11.8-py3.10");
        assert_eq!(spec.env.get("PYTHONUNBUFFERED").map(String::as_str), Some("TRUE"));
        assert_eq!(
            file.image_target().unwrap(),
            (None, "cloud-ml-hpo".to_string())
        );
    }

    #[test]
    fn test_load_from_disk_resolves_context_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.toml");
        let mut handle = std::fs::File::create(&path).unwrap();
        handle.write_all(EXAMPLE.as_bytes()).unwrap();

        let file = ExperimentFile::load(&path).unwrap();
        assert_eq!(file.source.as_deref(), Some(path.as_path()));
        assert_eq!(file.context_dir(), dir.path().join("build"));

        let missing = ExperimentFile::load(&dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(HpoError::Config(_))));
    }
}
