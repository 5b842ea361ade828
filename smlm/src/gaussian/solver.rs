//! Objective functions minimised by the Levenberg-Marquardt loop.

use super::lm_optimizer::LMModel;
use crate::config::FitSolver;

/// Noise model selecting the objective, its gradient and curvature matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GaussianSolver {
    /// `Σ (z - f)²`.
    LeastSquares,
    /// Poisson deviance `2 Σ (f - z - z ln(f / z))`.
    PoissonMle,
}

impl From<FitSolver> for GaussianSolver {
    fn from(solver: FitSolver) -> Self {
        match solver {
            FitSolver::LeastSquares => GaussianSolver::LeastSquares,
            FitSolver::PoissonMle => GaussianSolver::PoissonMle,
        }
    }
}

/// Scratch buffers for one evaluation of the normal equations.
#[derive(Debug, Default)]
pub(crate) struct NormalEquations {
    /// Row-major `m x m` curvature matrix.
    pub alpha: Vec<f64>,
    /// Descent direction (negative half-gradient of the objective).
    pub beta: Vec<f64>,
    jacobian: Vec<f64>,
}

impl NormalEquations {
    pub fn new(m: usize) -> Self {
        Self {
            alpha: vec![0.0; m * m],
            beta: vec![0.0; m],
            jacobian: vec![0.0; m],
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.beta.len()
    }
}

impl GaussianSolver {
    /// Objective value at `params`, filling `eq` with the curvature matrix and
    /// gradient over the fitted parameters.
    ///
    /// Pixel `i` of `data` sits at `(i % width, i / width)`. Returns `None`
    /// when the Poisson model predicts a non-positive mean.
    pub(crate) fn normal_equations<M: LMModel>(
        self,
        model: &M,
        data: &[f64],
        width: usize,
        params: &[f64],
        eq: &mut NormalEquations,
    ) -> Option<f64> {
        let m = eq.size();
        eq.alpha.fill(0.0);
        eq.beta.fill(0.0);

        let mut value = 0.0;
        for (index, &z) in data.iter().enumerate() {
            let x = (index % width) as f64;
            let y = (index / width) as f64;
            let f = model.evaluate_and_jacobian(x, y, params, &mut eq.jacobian);

            let (weight, scale) = match self {
                GaussianSolver::LeastSquares => {
                    let r = z - f;
                    value += r * r;
                    (1.0, r)
                }
                GaussianSolver::PoissonMle => {
                    if !(f > 0.0) {
                        return None;
                    }
                    let z = z.max(0.0);
                    value += poisson_deviance(z, f);
                    (z / (f * f), z / f - 1.0)
                }
            };

            let row = &eq.jacobian;
            for i in 0..m {
                eq.beta[i] += scale * row[i];
                let wi = weight * row[i];
                // Only compute upper triangle (j >= i)
                for j in i..m {
                    eq.alpha[i * m + j] += wi * row[j];
                }
            }
        }

        // Mirror upper triangle to lower
        for i in 1..m {
            for j in 0..i {
                eq.alpha[i * m + j] = eq.alpha[j * m + i];
            }
        }

        Some(value)
    }

    /// Factor applied to the inverted curvature matrix to obtain the
    /// parameter covariance.
    pub(crate) fn covariance_scale(self, value: f64, degrees_of_freedom: usize) -> f64 {
        match self {
            GaussianSolver::LeastSquares if degrees_of_freedom > 0 => {
                value / degrees_of_freedom as f64
            }
            GaussianSolver::LeastSquares => 0.0,
            GaussianSolver::PoissonMle => 1.0,
        }
    }
}

#[inline]
fn poisson_deviance(z: f64, f: f64) -> f64 {
    if z > 0.0 {
        2.0 * (f - z - z * (f / z).ln())
    } else {
        2.0 * f
    }
}
