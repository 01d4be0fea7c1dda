//! Hyperparameter ranges and the sampling strategies a tuner applies to them.

use hpo_types::{
    Algorithm, HpoError, HpoResult, Hyperparameters, ObjectiveDirection, ParameterValue,
    SearchStrategyKind,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A single searchable hyperparameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperparameterRange {
    /// Argument name understood by the training entrypoint (e.g. "max_depth").
    pub name: String,
    #[serde(flatten)]
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled. Bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ParameterKind {
    Integer { lower: i64, upper: i64 },
    Continuous { lower: f64, upper: f64 },
}

impl HyperparameterRange {
    pub fn integer(name: impl Into<String>, lower: i64, upper: i64) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::Integer { lower, upper },
        }
    }

    pub fn continuous(name: impl Into<String>, lower: f64, upper: f64) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::Continuous { lower, upper },
        }
    }

    pub fn validate(&self) -> HpoResult<()> {
        let field = format!("ranges.{}", self.name);
        if self.name.trim().is_empty() {
            return Err(HpoError::invalid("ranges", "", "parameter name must not be empty"));
        }
        match self.kind {
            ParameterKind::Integer { lower, upper } if lower > upper => Err(HpoError::invalid(
                field,
                format!("{lower}..{upper}"),
                "lower bound exceeds upper bound",
            )),
            ParameterKind::Continuous { lower, upper } if !lower.is_finite() || !upper.is_finite() => {
                Err(HpoError::invalid(field, format!("{lower}..{upper}"), "bounds must be finite"))
            }
            ParameterKind::Continuous { lower, upper } if lower > upper => Err(HpoError::invalid(
                field,
                format!("{lower}..{upper}"),
                "lower bound exceeds upper bound",
            )),
            ParameterKind::Continuous { lower, upper } if !(upper - lower).is_finite() => {
                Err(HpoError::invalid(field, format!("{lower}..{upper}"), "range width is not finite"))
            }
            _ => Ok(()),
        }
    }

    pub fn contains(&self, value: &ParameterValue) -> bool {
        match (self.kind, value) {
            (ParameterKind::Integer { lower, upper }, ParameterValue::Int(v)) => (lower..=upper).contains(v),
            (ParameterKind::Continuous { lower, upper }, v) => (lower..=upper).contains(&v.as_f64()),
            _ => false,
        }
    }

    fn sample(&self, rng: &mut StdRng) -> ParameterValue {
        match self.kind {
            ParameterKind::Integer { lower, upper } => ParameterValue::Int(rng.random_range(lower..=upper)),
            ParameterKind::Continuous { lower, upper } => {
                ParameterValue::Float(rng.random_range(lower..=upper))
            }
        }
    }
}

/// The full search space: an ordered list of ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<HyperparameterRange>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_integer(mut self, name: impl Into<String>, lower: i64, upper: i64) -> Self {
        self.parameters.push(HyperparameterRange::integer(name, lower, upper));
        self
    }

    pub fn add_continuous(mut self, name: impl Into<String>, lower: f64, upper: f64) -> Self {
        self.parameters.push(HyperparameterRange::continuous(name, lower, upper));
        self
    }

    pub fn add(mut self, range: HyperparameterRange) -> Self {
        self.parameters.push(range);
        self
    }

    /// Tree depth, tree count and feature fraction, named for `algorithm`.
    pub fn defaults_for(algorithm: Algorithm) -> Self {
        Self::new()
            .add_integer("max_depth", 5, 15)
            .add_integer(algorithm.tree_count_param(), 100, 500)
            .add_continuous("max_features", 0.1, 1.0)
    }

    pub fn get(&self, name: &str) -> Option<&HyperparameterRange> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Rename the tree-count parameter to the name `algorithm` expects.
    ///
    /// Applying this twice for the same algorithm is a no-op.
    pub fn rename_for(mut self, algorithm: Algorithm) -> Self {
        let target = algorithm.tree_count_param();
        for param in &mut self.parameters {
            let is_tree_count = Algorithm::ALL
                .iter()
                .any(|a| a.tree_count_param() == param.name);
            if is_tree_count && param.name != target {
                tracing::debug!(from = %param.name, to = target, "renaming tree-count range");
                param.name = target.to_string();
            }
        }
        self
    }

    /// Range names the algorithm's entrypoint does not accept.
    pub fn unsupported_by(&self, algorithm: Algorithm) -> Vec<&str> {
        self.names().filter(|name| !algorithm.accepts(name)).collect()
    }

    pub fn validate(&self) -> HpoResult<()> {
        if self.parameters.is_empty() {
            return Err(HpoError::invalid("ranges", "{}", "at least one hyperparameter range is required"));
        }
        let mut seen = HashSet::new();
        for param in &self.parameters {
            param.validate()?;
            if !seen.insert(param.name.as_str()) {
                return Err(HpoError::invalid(
                    format!("ranges.{}", param.name),
                    &param.name,
                    "parameter appears more than once",
                ));
            }
        }
        Ok(())
    }

    /// True when every range is assigned a value within its bounds.
    pub fn admits(&self, params: &Hyperparameters) -> bool {
        self.parameters
            .iter()
            .all(|p| params.get(&p.name).is_some_and(|v| p.contains(v)))
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

/// Hyperparameters the training entrypoint falls back to when none are passed.
pub fn default_hyperparameters(algorithm: Algorithm) -> Hyperparameters {
    let entries: Vec<(&str, ParameterValue)> = match algorithm {
        Algorithm::GradientBoostedTrees => vec![
            ("max_depth", ParameterValue::Int(5)),
            ("num_boost_round", ParameterValue::Int(10)),
            ("subsample", ParameterValue::Float(0.25)),
            ("learning_rate", ParameterValue::Float(0.3)),
            ("lambda_l2", ParameterValue::Float(0.2)),
            ("gamma", ParameterValue::Float(0.0)),
            ("alpha", ParameterValue::Float(0.0)),
            ("seed", ParameterValue::Int(0)),
        ],
        Algorithm::RandomForest => vec![
            ("max_depth", ParameterValue::Int(5)),
            ("n_estimators", ParameterValue::Int(10)),
            ("max_features", ParameterValue::Float(0.25)),
            ("seed", ParameterValue::Int(0)),
        ],
    };
    entries
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

// ---------------------------------------------------------------------------
// Search strategies
// ---------------------------------------------------------------------------

/// Common trait for all search strategies.
pub trait SearchStrategy: Send + Sync {
    /// Generate the next batch of hyperparameter assignments to evaluate.
    fn suggest(&mut self, count: usize) -> Vec<Hyperparameters>;

    /// Report completed trial results so adaptive strategies can learn.
    fn report(&mut self, _params: &Hyperparameters, _objective: f64) {}

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

/// Build the sampler matching a strategy choice.
pub fn strategy_for(
    kind: SearchStrategyKind,
    space: SearchSpace,
    direction: ObjectiveDirection,
    seed: Option<u64>,
) -> Box<dyn SearchStrategy> {
    let rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    match kind {
        SearchStrategyKind::Random => Box::new(RandomSearch { space, rng }),
        SearchStrategyKind::Bayesian => Box::new(BayesianSearch {
            space,
            rng,
            observations: Vec::new(),
            exploration_weight: 0.3,
            direction,
        }),
    }
}

// ---- Random search ----

/// Independent random sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: StdRng,
}

impl RandomSearch {
    pub fn new(space: SearchSpace) -> Self {
        Self {
            space,
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn with_seed(space: SearchSpace, seed: u64) -> Self {
        Self {
            space,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn sample_one(&mut self) -> Hyperparameters {
        let mut params = Hyperparameters::new();
        for param in &self.space.parameters {
            params.insert(param.name.clone(), param.sample(&mut self.rng));
        }
        params
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, count: usize) -> Vec<Hyperparameters> {
        (0..count).map(|_| self.sample_one()).collect()
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Bayesian search (surrogate-model stub) ----

/// Bayesian optimization using a simple surrogate model.
///
/// Tracks observed (params, objective) pairs and biases future sampling
/// toward the best one seen so far; with probability `exploration_weight` a
/// suggestion is drawn uniformly instead.
#[derive(Debug, Clone)]
pub struct BayesianSearch {
    space: SearchSpace,
    rng: StdRng,
    observations: Vec<(Hyperparameters, f64)>,
    exploration_weight: f64,
    direction: ObjectiveDirection,
}

impl BayesianSearch {
    pub fn new(space: SearchSpace, exploration_weight: f64, direction: ObjectiveDirection) -> Self {
        Self {
            space,
            rng: StdRng::from_os_rng(),
            observations: Vec::new(),
            exploration_weight,
            direction,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    fn explore(&mut self) -> Hyperparameters {
        let mut params = Hyperparameters::new();
        for param in &self.space.parameters {
            params.insert(param.name.clone(), param.sample(&mut self.rng));
        }
        params
    }

    fn best_observation(&self) -> Option<&Hyperparameters> {
        let mut best: Option<&(Hyperparameters, f64)> = None;
        for observation in &self.observations {
            match best {
                Some((_, incumbent)) if !self.direction.improves(observation.1, *incumbent) => {}
                _ => best = Some(observation),
            }
        }
        best.map(|(params, _)| params)
    }

    /// Exploitation: perturb the best-known point.
    fn exploit(&mut self) -> Hyperparameters {
        let base = match self.best_observation() {
            Some(params) => params.clone(),
            None => return self.explore(),
        };

        let mut perturbed = Hyperparameters::new();
        for param in &self.space.parameters {
            let value = match (param.kind, base.get(&param.name)) {
                (ParameterKind::Integer { lower, upper }, Some(ParameterValue::Int(v))) => {
                    // i128 keeps the width of a full i64 range representable
                    let spread = ((i128::from(upper) - i128::from(lower)) / 10).max(1) as i64;
                    let delta = self.rng.random_range(-spread..=spread);
                    ParameterValue::Int(v.saturating_add(delta).clamp(lower, upper))
                }
                (ParameterKind::Continuous { lower, upper }, Some(v)) => {
                    let noise = self.rng.random_range(-0.1..=0.1) * (upper - lower);
                    ParameterValue::Float((v.as_f64() + noise).clamp(lower, upper))
                }
                // Missing or mistyped base value
                _ => param.sample(&mut self.rng),
            };
            perturbed.insert(param.name.clone(), value);
        }
        perturbed
    }
}

impl SearchStrategy for BayesianSearch {
    fn suggest(&mut self, count: usize) -> Vec<Hyperparameters> {
        (0..count)
            .map(|_| {
                if self.observations.is_empty() || self.rng.random::<f64>() < self.exploration_weight {
                    self.explore()
                } else {
                    self.exploit()
                }
            })
            .collect()
    }

    fn report(&mut self, params: &Hyperparameters, objective: f64) {
        self.observations.push((params.clone(), objective));
    }

    fn name(&self) -> &str {
        "bayesian"
    }
}
