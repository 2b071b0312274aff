//! Greedy coordinate ascent over per-field weights.
//!
//! A pass tries every `(step, field)` pair in order, keeping a move only when
//! it strictly raises the objective. The optimizer always runs
//! `min_passes` passes, then keeps going while the previous pass improved,
//! up to `max_passes`.

use citeres_core::config::{ExperimentConfig, WeightInitialization};
use citeres_core::constants::{
    DEFAULT_MAX_OPTIMIZER_PASSES, DEFAULT_MOVEMENTS, MIN_OPTIMIZER_PASSES, RANDOM_INIT_MAX,
    RANDOM_INIT_MIN,
};
use citeres_core::error::EvalError;
use citeres_core::types::WeightVector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Initialization {
    Ones,
    /// Integer weights drawn from `[-10, 10]` by a generator seeded with `seed`.
    Random { seed: u64 },
}

impl Initialization {
    pub fn from_config(exp: &ExperimentConfig) -> Self {
        match exp.initialization {
            WeightInitialization::Ones => Self::Ones,
            WeightInitialization::Random => Self::Random {
                seed: exp.random_seed,
            },
        }
    }

    pub fn initial_weights(self, fields: &[String]) -> WeightVector {
        match self {
            Self::Ones => WeightVector::all_ones(fields.iter().map(String::as_str)),
            Self::Random { seed } => {
                let mut rng = StdRng::seed_from_u64(seed);
                WeightVector::from_pairs(fields.iter().map(|field| {
                    let value = rng.gen_range(RANDOM_INIT_MIN..=RANDOM_INIT_MAX);
                    (field.as_str(), value as f64)
                }))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinateAscent {
    pub movements: Vec<f64>,
    pub min_passes: usize,
    pub max_passes: usize,
    pub smooth: bool,
}

impl Default for CoordinateAscent {
    fn default() -> Self {
        Self {
            movements: DEFAULT_MOVEMENTS.to_vec(),
            min_passes: MIN_OPTIMIZER_PASSES,
            max_passes: DEFAULT_MAX_OPTIMIZER_PASSES,
            smooth: false,
        }
    }
}

/// Objective value and weights after one full pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassTrace {
    pub pass: usize,
    pub score: f64,
    pub improvement: f64,
    pub weights: WeightVector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    pub weights: WeightVector,
    /// Objective value of `weights` (after smoothing, when enabled).
    pub score: f64,
    pub initial_score: f64,
    /// Best objective value reached by the ascent itself.
    pub ascent_score: f64,
    pub trajectory: Vec<PassTrace>,
    pub evaluations: usize,
    /// False when the run stopped at `max_passes` while still improving.
    pub converged: bool,
}

impl CoordinateAscent {
    pub fn from_config(exp: &ExperimentConfig) -> Self {
        Self {
            movements: exp.movements.clone(),
            min_passes: MIN_OPTIMIZER_PASSES,
            max_passes: exp.max_passes.max(MIN_OPTIMIZER_PASSES),
            smooth: exp.smooth_weights,
        }
    }

    pub fn optimize<F>(
        &self,
        initial: WeightVector,
        mut objective: F,
    ) -> Result<OptimizationOutcome, EvalError>
    where
        F: FnMut(&WeightVector) -> Result<f64, EvalError>,
    {
        if initial.is_empty() {
            return Err(EvalError::invalid_input(
                "cannot optimize an empty weight vector",
            ));
        }
        let mut weights = initial;
        let mut best = objective(&weights)?;
        let mut evaluations = 1;
        let initial_score = best;
        let mut trajectory = Vec::new();
        let mut converged = false;

        for pass in 1..=self.max_passes {
            let pass_start = best;
            for &step in &self.movements {
                for position in 0..weights.len() {
                    let previous = weights.value_at(position);
                    weights.set_at(position, previous + step);
                    let candidate = objective(&weights)?;
                    evaluations += 1;
                    if candidate > best {
                        best = candidate;
                    } else {
                        weights.set_at(position, previous);
                    }
                }
            }
            let improvement = best - pass_start;
            debug!(pass, score = best, improvement, "optimizer pass complete");
            trajectory.push(PassTrace {
                pass,
                score: best,
                improvement,
                weights: weights.clone(),
            });
            if pass >= self.min_passes && improvement <= 0.0 {
                converged = true;
                break;
            }
        }
        if !converged {
            warn!(
                max_passes = self.max_passes,
                score = best,
                "optimizer stopped at pass limit while still improving"
            );
        }

        let ascent_score = best;
        let (weights, score) = if self.smooth {
            let smoothed = smooth_toward_one(&weights);
            let score = objective(&smoothed)?;
            evaluations += 1;
            (smoothed, score)
        } else {
            (weights, best)
        };

        Ok(OptimizationOutcome {
            weights,
            score,
            initial_score,
            ascent_score,
            trajectory,
            evaluations,
            converged,
        })
    }
}

/// Moves each weight toward 1 by `|min(1, w)| / 3`, never past 1. A weight of
/// exactly 0 moves by 1/3.
pub fn smooth_toward_one(weights: &WeightVector) -> WeightVector {
    WeightVector::from_pairs(weights.iter().map(|(field, w)| {
        let mut amount = w.min(1.0).abs() / 3.0;
        if amount == 0.0 {
            amount = 1.0 / 3.0;
        }
        let smoothed = if w > 1.0 {
            (w - amount).max(1.0)
        } else if w < 1.0 {
            (w + amount).min(1.0)
        } else {
            w
        };
        (field, smoothed)
    }))
}
