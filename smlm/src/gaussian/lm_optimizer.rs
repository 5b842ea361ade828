//! Levenberg-Marquardt optimizer over a variable set of free parameters.
//!
//! The model exposes the full parameter vector and the indices of the
//! parameters being fitted; steps are solved in that reduced space. Uses f64
//! throughout for numerical stability.

use super::solver::{GaussianSolver, NormalEquations};
use crate::math::linear_solver::solve_in_place;

/// Damping above this means the model cannot be improved further.
const MAX_LAMBDA: f64 = 1e10;

/// Configuration for Levenberg-Marquardt optimization.
#[derive(Debug, Clone)]
pub struct LMConfig {
    pub min_iterations: usize,
    pub max_iterations: usize,
    /// Objective change threshold relative to its magnitude.
    pub relative_threshold: f64,
    /// Objective change threshold.
    pub absolute_threshold: f64,
    /// Per-parameter step threshold relative to the parameter. Non-positive disables it.
    pub parameter_relative_threshold: f64,
    /// Per-parameter step threshold. Non-positive disables it.
    pub parameter_absolute_threshold: f64,
    /// Initial damping parameter.
    pub initial_lambda: f64,
    /// Factor to increase lambda on failed step.
    pub lambda_up: f64,
    /// Factor to decrease lambda on successful step.
    pub lambda_down: f64,
    /// Maximum step per fitted parameter, in `fitted_indices` order.
    pub clamp: Option<Vec<f64>>,
    /// Halve a parameter's clamp each time its step changes sign.
    pub dynamic_clamp: bool,
}

impl Default for LMConfig {
    fn default() -> Self {
        Self {
            min_iterations: 0,
            max_iterations: 50,
            relative_threshold: 1e-6,
            absolute_threshold: 1e-16,
            parameter_relative_threshold: 0.0,
            parameter_absolute_threshold: 0.0,
            initial_lambda: 0.01,
            lambda_up: 10.0,
            lambda_down: 0.1,
            clamp: None,
            dynamic_clamp: false,
        }
    }
}

/// How the optimization ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LMStatus {
    Converged,
    /// Iteration budget exhausted.
    MaxIterations,
    /// Damping grew past the limit without improving the objective.
    Stalled,
    /// The damped curvature matrix could not be solved.
    Singular,
    /// The objective is undefined at the starting point.
    InvalidModel,
}

/// Result of L-M optimization.
#[derive(Debug, Clone)]
pub struct LMResult {
    pub params: Vec<f64>,
    pub value: f64,
    pub status: LMStatus,
    pub iterations: usize,
    pub evaluations: usize,
    /// Undamped curvature matrix at `params`.
    pub curvature: Vec<f64>,
}

/// Trait for models that can be fit with L-M optimization.
pub trait LMModel {
    /// Indices of the free parameters within the full parameter vector.
    fn fitted_indices(&self) -> &[usize];

    /// Evaluate the model at a point.
    fn evaluate(&self, x: f64, y: f64, params: &[f64]) -> f64;

    /// Evaluate the model and write the partial derivatives of the free
    /// parameters into `jacobian`.
    fn evaluate_and_jacobian(&self, x: f64, y: f64, params: &[f64], jacobian: &mut [f64]) -> f64;

    /// Apply parameter constraints after an update.
    fn constrain(&self, params: &mut [f64]);
}

/// Run L-M optimization of `model` against row-major `data`.
pub fn optimize<M: LMModel>(
    model: &M,
    solver: GaussianSolver,
    data: &[f64],
    width: usize,
    initial_params: &[f64],
    config: &LMConfig,
) -> LMResult {
    let fitted = model.fitted_indices();
    let m = fitted.len();

    let mut params = initial_params.to_vec();
    model.constrain(&mut params);

    let mut current = NormalEquations::new(m);
    let mut trial = NormalEquations::new(m);
    let mut damped = vec![0.0; m * m];
    let mut delta = vec![0.0; m];
    let mut clamp = config.clamp.clone();
    let mut last_sign = vec![0.0f64; m];

    let mut evaluations = 1;
    let Some(mut value) = solver.normal_equations(model, data, width, &params, &mut current)
    else {
        return LMResult {
            params,
            value: f64::INFINITY,
            status: LMStatus::InvalidModel,
            iterations: 0,
            evaluations,
            curvature: current.alpha,
        };
    };

    let mut lambda = config.initial_lambda;
    let mut status = LMStatus::MaxIterations;
    let mut iterations = 0;
    let mut trial_params = params.clone();

    while iterations < config.max_iterations {
        iterations += 1;

        damped.copy_from_slice(&current.alpha);
        for i in 0..m {
            let diagonal = &mut damped[i * m + i];
            // A parameter without influence (e.g. the angle of a circular
            // peak) keeps its value for this step.
            if *diagonal == 0.0 {
                *diagonal = 1.0;
            } else {
                *diagonal *= 1.0 + lambda;
            }
        }
        delta.copy_from_slice(&current.beta);
        if !solve_in_place(&mut damped, &mut delta) {
            status = LMStatus::Singular;
            break;
        }

        if let Some(clamp) = clamp.as_mut() {
            for i in 0..m {
                let sign = delta[i].signum();
                if config.dynamic_clamp && last_sign[i] != 0.0 && sign != last_sign[i] {
                    clamp[i] *= 0.5;
                }
                delta[i] /= 1.0 + delta[i].abs() / clamp[i];
            }
        }

        trial_params.copy_from_slice(&params);
        for (&index, &d) in fitted.iter().zip(&delta) {
            trial_params[index] += d;
        }
        model.constrain(&mut trial_params);

        evaluations += 1;
        let trial_value = solver.normal_equations(model, data, width, &trial_params, &mut trial);
        let can_stop = iterations >= config.min_iterations;

        match trial_value {
            Some(trial_value) if trial_value < value => {
                let converged = can_stop
                    && (value_converged(config, value, trial_value)
                        || parameters_converged(config, fitted, &params, &delta));

                std::mem::swap(&mut params, &mut trial_params);
                std::mem::swap(&mut current, &mut trial);
                value = trial_value;
                lambda *= config.lambda_down;
                for (s, d) in last_sign.iter_mut().zip(&delta) {
                    *s = d.signum();
                }

                if converged {
                    status = LMStatus::Converged;
                    break;
                }
            }
            other => {
                // No improvement: a change within tolerance means we are at
                // the minimum.
                if matches!(other, Some(v) if can_stop && value_converged(config, value, v)) {
                    status = LMStatus::Converged;
                    break;
                }
                lambda *= config.lambda_up;
                if lambda > MAX_LAMBDA {
                    status = LMStatus::Stalled;
                    break;
                }
            }
        }
    }

    LMResult {
        params,
        value,
        status,
        iterations,
        evaluations,
        curvature: current.alpha,
    }
}

#[inline]
fn value_converged(config: &LMConfig, old: f64, new: f64) -> bool {
    let change = (old - new).abs();
    change <= config.absolute_threshold
        || change <= config.relative_threshold * (old.abs() + new.abs()) * 0.5
}

fn parameters_converged(config: &LMConfig, fitted: &[usize], params: &[f64], delta: &[f64]) -> bool {
    let relative = config.parameter_relative_threshold;
    let absolute = config.parameter_absolute_threshold;
    if relative <= 0.0 && absolute <= 0.0 {
        return false;
    }
    fitted.iter().zip(delta).all(|(&index, &d)| {
        let d = d.abs();
        (absolute > 0.0 && d <= absolute) || (relative > 0.0 && d <= relative * params[index].abs())
    })
}
