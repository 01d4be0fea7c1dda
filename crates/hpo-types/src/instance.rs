//! Compute instance recommendation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{HpoError, HpoResult};
use crate::experiment::{ComputeMode, DatasetSize};

/// Instance families that carry GPUs.
const GPU_FAMILIES: &[&str] = &["p2", "p3", "p3dn", "p4d", "p4de", "p5", "g4dn", "g5"];

/// A managed-compute instance type such as `ml.p3.2xlarge`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceType(String);

impl InstanceType {
    pub fn new(name: impl Into<String>) -> HpoResult<Self> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(HpoError::invalid(
                "instance_type",
                &name,
                "must be a non-empty name without whitespace",
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Family segment, e.g. `p3` for `ml.p3.2xlarge`.
    pub fn family(&self) -> &str {
        let name = self.0.strip_prefix("ml.").unwrap_or(&self.0);
        name.split('.').next().unwrap_or(name)
    }

    pub fn has_gpu(&self) -> bool {
        GPU_FAMILIES.contains(&self.family())
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Recommended instance type for a compute mode and dataset size.
pub fn recommend_instance_type(compute_mode: ComputeMode, dataset_size: DatasetSize) -> InstanceType {
    use ComputeMode::*;
    use DatasetSize::*;

    let name = match (compute_mode, dataset_size) {
        (SingleCpu, Small) => "ml.m5.4xlarge",
        (SingleCpu, Medium) => "ml.m5.12xlarge",
        (SingleCpu, Large) => "ml.m5.24xlarge",
        (MultiCpu, Small) => "ml.m5.12xlarge",
        (MultiCpu, Medium | Large) => "ml.m5.24xlarge",
        (SingleGpu, _) => "ml.p3.2xlarge",
        (MultiGpu, Small | Medium) => "ml.p3.8xlarge",
        (MultiGpu, Large) => "ml.p3.16xlarge",
    };
    InstanceType(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recommendation_is_deterministic() {
        for mode in ComputeMode::ALL {
            for size in DatasetSize::ALL {
                assert_eq!(
                    recommend_instance_type(mode, size),
                    recommend_instance_type(mode, size)
                );
            }
        }
    }

    #[test]
    fn test_gpu_modes_get_gpu_instances() {
        for mode in ComputeMode::ALL {
            for size in DatasetSize::ALL {
                let instance = recommend_instance_type(mode, size);
                assert_eq!(instance.has_gpu(), mode.uses_gpu(), "{mode} / {size} -> {instance}");
            }
        }
    }

    #[test]
    fn test_single_gpu_small() {
        let instance = recommend_instance_type(ComputeMode::SingleGpu, DatasetSize::Small);
        assert_eq!(instance.as_str(), "ml.p3.2xlarge");
        assert_eq!(instance.family(), "p3");
    }

    #[test]
    fn test_instance_type_validation() {
        assert!(InstanceType::new("").is_err());
        assert!(InstanceType::new("ml.m5 large").is_err());
        assert_eq!(InstanceType::new(" ml.g5.xlarge ").unwrap().as_str(), "ml.g5.xlarge");
    }
}
