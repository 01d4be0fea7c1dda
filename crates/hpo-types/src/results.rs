//! Trial records and search results returned by a tuning backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A concrete hyperparameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
}

impl ParameterValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Int(v) => *v as f64,
            Self::Float(v) => *v,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Hyperparameter assignment, ordered by name.
pub type Hyperparameters = BTreeMap<String, ParameterValue>;

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectiveDirection {
    #[default]
    Maximize,
    Minimize,
}

impl ObjectiveDirection {
    /// True when `candidate` beats `incumbent`.
    pub fn improves(&self, candidate: f64, incumbent: f64) -> bool {
        match self {
            ObjectiveDirection::Maximize => candidate > incumbent,
            ObjectiveDirection::Minimize => candidate < incumbent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    InProgress,
    Completed,
    Failed,
    /// Terminated by the backend, usually for exceeding its max runtime.
    Stopped,
}

/// One row of the results table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    /// 1-based trial sequence number.
    pub trial_number: usize,
    pub job_name: String,
    pub status: TrialStatus,
    pub hyperparameters: Hyperparameters,
    pub objective: Option<f64>,
    pub duration_seconds: Option<u64>,
}

/// Trial records for one search job, in trial order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub job_name: String,
    pub objective_metric: String,
    pub direction: ObjectiveDirection,
    pub trials: Vec<TrialRecord>,
    pub submitted_at: DateTime<Utc>,
    pub retrieved_at: DateTime<Utc>,
}

impl SearchResult {
    pub fn new(
        job_name: impl Into<String>,
        objective_metric: impl Into<String>,
        direction: ObjectiveDirection,
        submitted_at: DateTime<Utc>,
        mut trials: Vec<TrialRecord>,
    ) -> Self {
        trials.sort_by_key(|t| t.trial_number);
        Self {
            job_name: job_name.into(),
            objective_metric: objective_metric.into(),
            direction,
            trials,
            submitted_at,
            retrieved_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    pub fn completed_count(&self) -> usize {
        self.trials
            .iter()
            .filter(|t| t.status == TrialStatus::Completed)
            .count()
    }

    /// Best scoring trial according to the objective direction.
    pub fn best(&self) -> Option<&TrialRecord> {
        let mut best: Option<(&TrialRecord, f64)> = None;
        for trial in &self.trials {
            if let Some(score) = trial.objective {
                match best {
                    Some((_, incumbent)) if !self.direction.improves(score, incumbent) => {}
                    _ => best = Some((trial, score)),
                }
            }
        }
        best.map(|(trial, _)| trial)
    }

    /// Scored trials, best first. Unscored trials are left out.
    pub fn ranked(&self) -> Vec<&TrialRecord> {
        let mut scored: Vec<&TrialRecord> =
            self.trials.iter().filter(|t| t.objective.is_some()).collect();
        scored.sort_by(|a, b| {
            let (a, b) = (a.objective.unwrap_or_default(), b.objective.unwrap_or_default());
            let ord = a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal);
            match self.direction {
                ObjectiveDirection::Maximize => ord.reverse(),
                ObjectiveDirection::Minimize => ord,
            }
        });
        scored
    }
}
