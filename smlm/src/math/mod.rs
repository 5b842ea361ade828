//! Numeric helpers shared by the fitter and the noise estimators.

pub(crate) mod linear_solver;
pub(crate) mod statistics;
