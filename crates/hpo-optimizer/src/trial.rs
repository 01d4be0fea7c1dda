//! Search budget and objective definition.

use hpo_types::{HpoError, HpoResult, ObjectiveDirection};
use serde::{Deserialize, Serialize};

/// Metric name the tuning backend ranks trials by.
pub const FINAL_SCORE_METRIC: &str = "final-score";

/// Extraction rule the backend applies to worker output to obtain the score.
pub const FINAL_SCORE_PATTERN: &str = "final-score: (.*?);";

/// Limits on how many trials run, how many at once, and for how long each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BudgetFields")]
pub struct SearchBudget {
    max_jobs: u32,
    max_parallel_jobs: u32,
    /// Bounds each individual trial, not the search as a whole.
    max_duration_seconds: u64,
}

impl SearchBudget {
    pub fn new(max_jobs: i64, max_parallel_jobs: i64, max_duration_seconds: i64) -> HpoResult<Self> {
        if max_jobs < 1 {
            return Err(HpoError::invalid("max_jobs", max_jobs, "must be at least 1"));
        }
        if max_parallel_jobs < 1 {
            return Err(HpoError::invalid(
                "max_parallel_jobs",
                max_parallel_jobs,
                "must be at least 1",
            ));
        }
        if max_parallel_jobs > max_jobs {
            return Err(HpoError::invalid(
                "max_parallel_jobs",
                max_parallel_jobs,
                format!("must not exceed max_jobs ({max_jobs})"),
            ));
        }
        if max_duration_seconds <= 0 {
            return Err(HpoError::invalid(
                "max_duration_seconds",
                max_duration_seconds,
                "must be positive",
            ));
        }

        let max_jobs = u32::try_from(max_jobs)
            .map_err(|_| HpoError::invalid("max_jobs", max_jobs, "too large"))?;
        Ok(Self {
            max_jobs,
            // bounded by max_jobs above
            max_parallel_jobs: max_parallel_jobs as u32,
            max_duration_seconds: max_duration_seconds as u64,
        })
    }

    pub fn max_jobs(&self) -> u32 {
        self.max_jobs
    }

    pub fn max_parallel_jobs(&self) -> u32 {
        self.max_parallel_jobs
    }

    pub fn max_duration_seconds(&self) -> u64 {
        self.max_duration_seconds
    }
}

#[derive(Deserialize)]
struct BudgetFields {
    max_jobs: i64,
    max_parallel_jobs: i64,
    max_duration_seconds: i64,
}

impl TryFrom<BudgetFields> for SearchBudget {
    type Error = HpoError;

    fn try_from(fields: BudgetFields) -> HpoResult<Self> {
        Self::new(fields.max_jobs, fields.max_parallel_jobs, fields.max_duration_seconds)
    }
}

impl Default for SearchBudget {
    fn default() -> Self {
        Self {
            max_jobs: 10,
            max_parallel_jobs: 2,
            max_duration_seconds: 24 * 60 * 60,
        }
    }
}

/// The scalar each trial reports and how the backend extracts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveMetric {
    pub name: String,
    /// Pattern with one capture group matching the score in worker output.
    pub pattern: String,
    pub direction: ObjectiveDirection,
}

impl ObjectiveMetric {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>, direction: ObjectiveDirection) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            direction,
        }
    }

    /// The line a worker must print for the default pattern to match.
    pub fn format_score(score: f64) -> String {
        format!("{FINAL_SCORE_METRIC}: {score};")
    }

    pub fn validate(&self) -> HpoResult<()> {
        if self.name.trim().is_empty() {
            return Err(HpoError::invalid("objective.metric", &self.name, "must not be empty"));
        }
        if !self.pattern.contains('(') {
            return Err(HpoError::invalid(
                "objective.pattern",
                &self.pattern,
                "must contain a capture group for the score",
            ));
        }
        Ok(())
    }
}

impl Default for ObjectiveMetric {
    fn default() -> Self {
        Self::new(FINAL_SCORE_METRIC, FINAL_SCORE_PATTERN, ObjectiveDirection::Maximize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_accepts_valid_limits() {
        let budget = SearchBudget::new(10, 2, 86_400).unwrap();
        assert_eq!(budget.max_jobs(), 10);
        assert_eq!(budget.max_parallel_jobs(), 2);
        assert_eq!(budget.max_duration_seconds(), 86_400);
        assert_eq!(budget, SearchBudget::default());
    }

    #[test]
    fn budget_rejects_parallel_above_total() {
        match SearchBudget::new(4, 5, 60) {
            Err(HpoError::InvalidConfig { field, .. }) => assert_eq!(field, "max_parallel_jobs"),
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
        assert!(SearchBudget::new(5, 5, 60).is_ok());
    }

    #[test]
    fn budget_rejects_non_positive_values() {
        assert!(SearchBudget::new(0, 1, 60).is_err());
        assert!(SearchBudget::new(1, 0, 60).is_err());
        assert!(SearchBudget::new(1, 1, 0).is_err());
    }

    #[test]
    fn budget_deserialize_rejects_invalid_limits() {
        let budget: SearchBudget =
            serde_json::from_str(r#"{"max_jobs":10,"max_parallel_jobs":2,"max_duration_seconds":86400}"#)
                .unwrap();
        assert_eq!(budget, SearchBudget::default());

        let err = serde_json::from_str::<SearchBudget>(
            r#"{"max_jobs":4,"max_parallel_jobs":5,"max_duration_seconds":60}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_parallel_jobs"));
    }

    #[test]
    fn score_line_matches_contract() {
        assert_eq!(ObjectiveMetric::format_score(0.8125), "final-score: 0.8125;");
    }

    #[test]
    fn objective_validation() {
        assert!(ObjectiveMetric::default().validate().is_ok());
        let no_group = ObjectiveMetric::new("acc", "acc: .*;", ObjectiveDirection::Maximize);
        assert!(no_group.validate().is_err());
        let unnamed = ObjectiveMetric::new(" ", FINAL_SCORE_PATTERN, ObjectiveDirection::Maximize);
        assert!(unnamed.validate().is_err());
    }
}
