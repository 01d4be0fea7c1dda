//! Job names that encode the experiment configuration.
//!
//! The training entrypoint recovers its compute mode, algorithm and fold count
//! from the job name it runs under, so names follow
//! `{prefix}-{compute}-{algorithm}-{folds}cv-{suffix}`, e.g.
//! `hpo-sgpu-xgb-3cv-5f0c2a9e`.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::{HpoError, HpoResult};
use crate::experiment::{Algorithm, ComputeMode, ExperimentConfig};

/// Tuning job names are limited to 32 characters by the tuning service.
/// Trial and smoke-test names derived from a job name are not held to it.
pub const MAX_JOB_NAME_LEN: usize = 32;

const MIN_SUFFIX_LEN: usize = 4;
const MAX_SUFFIX_LEN: usize = 8;

/// Configuration recovered from a job name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobNameParts {
    pub compute_mode: ComputeMode,
    pub algorithm: Algorithm,
    pub cv_folds: u32,
}

/// Name of the `n`th trial of the search job `search_job`.
pub fn trial_job_name(search_job: &str, n: usize) -> String {
    format!("{search_job}-{n:03}")
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobName(String);

impl JobName {
    /// Encode a fresh name with a random suffix.
    pub fn generate(prefix: &str, config: &ExperimentConfig) -> HpoResult<Self> {
        let suffix = Uuid::new_v4().simple().to_string();
        Self::with_suffix(prefix, config, &suffix)
    }

    /// Encode a name with a caller-chosen suffix, truncated to fit the limit.
    pub fn with_suffix(prefix: &str, config: &ExperimentConfig, suffix: &str) -> HpoResult<Self> {
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) {
            return Err(HpoError::invalid(
                "job_prefix",
                prefix,
                "must be non-empty lowercase alphanumeric",
            ));
        }
        if !suffix.chars().all(|c| c.is_ascii_alphanumeric()) || suffix.is_empty() {
            return Err(HpoError::invalid("job_suffix", suffix, "must be non-empty alphanumeric"));
        }

        let stem = format!(
            "{prefix}-{}-{}-{}cv-",
            config.compute_mode().code(),
            config.algorithm().code(),
            config.cv_folds()
        );
        let room = MAX_JOB_NAME_LEN.saturating_sub(stem.len()).min(MAX_SUFFIX_LEN);
        if room < MIN_SUFFIX_LEN.min(suffix.len()) {
            return Err(HpoError::invalid(
                "job_prefix",
                prefix,
                format!("too long to fit a {MAX_JOB_NAME_LEN}-character job name"),
            ));
        }
        let suffix: String = suffix.to_ascii_lowercase().chars().take(room).collect();
        Ok(Self(stem + &suffix))
    }

    /// Decode the configuration embedded in a job name.
    pub fn parse(name: &str) -> HpoResult<JobNameParts> {
        let segments: Vec<&str> = name.split('-').collect();
        if segments.len() < 4 {
            return Err(HpoError::invalid(
                "job_name",
                name,
                "expected {prefix}-{compute}-{algorithm}-{folds}cv[-{suffix}]",
            ));
        }

        let compute_mode = match segments[1].to_ascii_lowercase().as_str() {
            "sgpu" => ComputeMode::SingleGpu,
            "mgpu" => ComputeMode::MultiGpu,
            "scpu" => ComputeMode::SingleCpu,
            "mcpu" => ComputeMode::MultiCpu,
            other => return Err(HpoError::invalid("job_name", name, format!("unknown compute code {other:?}"))),
        };
        let algorithm = match segments[2].to_ascii_lowercase().as_str() {
            "xgb" => Algorithm::GradientBoostedTrees,
            "rf" => Algorithm::RandomForest,
            other => {
                return Err(HpoError::invalid("job_name", name, format!("unknown algorithm code {other:?}")))
            }
        };
        let cv_folds = segments[3]
            .strip_suffix("cv")
            .and_then(|n| n.parse::<u32>().ok())
            .filter(|n| *n >= 1)
            .ok_or_else(|| HpoError::invalid("job_name", name, "fold segment must look like 3cv"))?;

        Ok(JobNameParts {
            compute_mode,
            algorithm,
            cv_folds,
        })
    }

    /// Name of the `n`th trial launched under this job (1-based). Extends the
    /// job name, so it may run past [`MAX_JOB_NAME_LEN`].
    pub fn trial(&self, n: usize) -> String {
        trial_job_name(&self.0, n)
    }

    /// Name for the single smoke-test run of this job. Extends the job name,
    /// so it may run past [`MAX_JOB_NAME_LEN`].
    pub fn smoke_test(&self) -> String {
        format!("{}-smoke", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
