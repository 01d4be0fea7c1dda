use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{HpoError, HpoResult};

/// Size of the training dataset partition set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetSize {
    Small,
    Medium,
    Large,
}

impl DatasetSize {
    pub const ALL: [DatasetSize; 3] = [DatasetSize::Small, DatasetSize::Medium, DatasetSize::Large];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetSize::Small => "small",
            DatasetSize::Medium => "medium",
            DatasetSize::Large => "large",
        }
    }

    /// Directory holding this size's partitions in the dataset bucket.
    pub fn partition_dir(&self) -> &'static str {
        match self {
            DatasetSize::Small => "1_year",
            DatasetSize::Medium => "3_year",
            DatasetSize::Large => "10_year",
        }
    }
}

impl FromStr for DatasetSize {
    type Err = HpoError;

    fn from_str(s: &str) -> HpoResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "small" => Ok(DatasetSize::Small),
            "medium" => Ok(DatasetSize::Medium),
            "large" => Ok(DatasetSize::Large),
            _ => Err(HpoError::invalid(
                "dataset_size",
                s,
                "expected one of small, medium, large",
            )),
        }
    }
}

impl fmt::Display for DatasetSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tree ensemble trained inside each trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    GradientBoostedTrees,
    RandomForest,
}

impl Algorithm {
    pub const ALL: [Algorithm; 2] = [Algorithm::GradientBoostedTrees, Algorithm::RandomForest];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::GradientBoostedTrees => "GradientBoostedTrees",
            Algorithm::RandomForest => "RandomForest",
        }
    }

    /// Short code used inside job names.
    pub fn code(&self) -> &'static str {
        match self {
            Algorithm::GradientBoostedTrees => "xgb",
            Algorithm::RandomForest => "rf",
        }
    }

    /// Name of the hyperparameter controlling the number of trees.
    pub fn tree_count_param(&self) -> &'static str {
        match self {
            Algorithm::GradientBoostedTrees => "num_boost_round",
            Algorithm::RandomForest => "n_estimators",
        }
    }

    /// Hyperparameter names the training entrypoint accepts for this algorithm.
    pub fn vocabulary(&self) -> &'static [&'static str] {
        match self {
            Algorithm::GradientBoostedTrees => &[
                "max_depth",
                "num_boost_round",
                "subsample",
                "learning_rate",
                "lambda_l2",
                "gamma",
                "alpha",
                "seed",
            ],
            Algorithm::RandomForest => &["max_depth", "n_estimators", "max_features", "seed"],
        }
    }

    pub fn accepts(&self, param: &str) -> bool {
        self.vocabulary().contains(&param)
    }
}

impl FromStr for Algorithm {
    type Err = HpoError;

    fn from_str(s: &str) -> HpoResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gradientboostedtrees" | "xgboost" => Ok(Algorithm::GradientBoostedTrees),
            "randomforest" => Ok(Algorithm::RandomForest),
            _ => Err(HpoError::invalid(
                "algorithm",
                s,
                "expected one of GradientBoostedTrees, RandomForest",
            )),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worker layout within each trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComputeMode {
    #[serde(rename = "singleCPU")]
    SingleCpu,
    #[serde(rename = "multiCPU")]
    MultiCpu,
    #[serde(rename = "singleGPU")]
    SingleGpu,
    #[serde(rename = "multiGPU")]
    MultiGpu,
}

impl ComputeMode {
    pub const ALL: [ComputeMode; 4] = [
        ComputeMode::SingleCpu,
        ComputeMode::MultiCpu,
        ComputeMode::SingleGpu,
        ComputeMode::MultiGpu,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComputeMode::SingleCpu => "singleCPU",
            ComputeMode::MultiCpu => "multiCPU",
            ComputeMode::SingleGpu => "singleGPU",
            ComputeMode::MultiGpu => "multiGPU",
        }
    }

    /// Short code used inside job names.
    pub fn code(&self) -> &'static str {
        match self {
            ComputeMode::SingleCpu => "scpu",
            ComputeMode::MultiCpu => "mcpu",
            ComputeMode::SingleGpu => "sgpu",
            ComputeMode::MultiGpu => "mgpu",
        }
    }

    pub fn uses_gpu(&self) -> bool {
        matches!(self, ComputeMode::SingleGpu | ComputeMode::MultiGpu)
    }

    pub fn is_distributed(&self) -> bool {
        matches!(self, ComputeMode::MultiCpu | ComputeMode::MultiGpu)
    }
}

impl FromStr for ComputeMode {
    type Err = HpoError;

    fn from_str(s: &str) -> HpoResult<Self> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "singlecpu" => Ok(ComputeMode::SingleCpu),
            "multicpu" => Ok(ComputeMode::MultiCpu),
            "singlegpu" => Ok(ComputeMode::SingleGpu),
            "multigpu" => Ok(ComputeMode::MultiGpu),
            _ => Err(HpoError::invalid(
                "compute_mode",
                s,
                "expected one of singleCPU, multiCPU, singleGPU, multiGPU",
            )),
        }
    }
}

impl fmt::Display for ComputeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sampling strategy the tuning backend uses to pick trial hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchStrategyKind {
    Random,
    Bayesian,
}

impl SearchStrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStrategyKind::Random => "Random",
            SearchStrategyKind::Bayesian => "Bayesian",
        }
    }
}

impl FromStr for SearchStrategyKind {
    type Err = HpoError;

    fn from_str(s: &str) -> HpoResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(SearchStrategyKind::Random),
            "bayesian" => Ok(SearchStrategyKind::Bayesian),
            _ => Err(HpoError::invalid(
                "search_strategy",
                s,
                "expected one of Random, Bayesian",
            )),
        }
    }
}

impl fmt::Display for SearchStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated experiment choices. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ConfigFields")]
pub struct ExperimentConfig {
    dataset_size: DatasetSize,
    algorithm: Algorithm,
    compute_mode: ComputeMode,
    cv_folds: u32,
    search_strategy: SearchStrategyKind,
}

impl ExperimentConfig {
    pub fn new(
        dataset_size: DatasetSize,
        algorithm: Algorithm,
        compute_mode: ComputeMode,
        cv_folds: i64,
        search_strategy: SearchStrategyKind,
    ) -> HpoResult<Self> {
        if cv_folds < 1 {
            return Err(HpoError::invalid("cv_folds", cv_folds, "must be at least 1"));
        }
        let cv_folds = u32::try_from(cv_folds)
            .map_err(|_| HpoError::invalid("cv_folds", cv_folds, "too large"))?;
        Ok(Self {
            dataset_size,
            algorithm,
            compute_mode,
            cv_folds,
            search_strategy,
        })
    }

    pub fn dataset_size(&self) -> DatasetSize {
        self.dataset_size
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn compute_mode(&self) -> ComputeMode {
        self.compute_mode
    }

    pub fn cv_folds(&self) -> u32 {
        self.cv_folds
    }

    pub fn search_strategy(&self) -> SearchStrategyKind {
        self.search_strategy
    }
}

#[derive(Deserialize)]
struct ConfigFields {
    dataset_size: DatasetSize,
    algorithm: Algorithm,
    compute_mode: ComputeMode,
    cv_folds: i64,
    search_strategy: SearchStrategyKind,
}

impl TryFrom<ConfigFields> for ExperimentConfig {
    type Error = HpoError;

    fn try_from(fields: ConfigFields) -> HpoResult<Self> {
        Self::new(
            fields.dataset_size,
            fields.algorithm,
            fields.compute_mode,
            fields.cv_folds,
            fields.search_strategy,
        )
    }
}
