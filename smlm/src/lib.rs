//! SMLM - single-molecule localisation fitting core.
//!
//! Turns noisy microscope frames into sub-pixel emitter localisations:
//! - Spot candidate ranking and noise/background estimation
//! - Multi-peak 2D Gaussian fitting (Levenberg-Marquardt, LSE or Poisson MLE)
//! - Doublet detection via residual quadrant analysis and AIC model selection
//! - A pool of fit workers fed by a bounded job queue
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use smlm::{Config, FitEngine, FitJob, Frame, MaximaSpotFilter, SharedPeakResults};
//!
//! let results = Arc::new(SharedPeakResults::new());
//! let filter = Arc::new(MaximaSpotFilter::default());
//! let engine = FitEngine::new(Config::default(), filter, results.clone(), 4)?;
//!
//! for (index, pixels) in frames.into_iter().enumerate() {
//!     let frame = Frame::new(index as u32, width, height, pixels)?;
//!     engine.run(FitJob::new(frame))?;
//! }
//! engine.end(false)?;
//!
//! results.sort_by_frame();
//! println!("Localised {} emitters", results.size());
//! ```

pub(crate) mod math;

mod config;
mod doublet;
mod engine;
mod error;
mod fit_result;
mod frame;
mod gaussian;
mod job;
mod neighbours;
mod noise;
mod peak;
mod region;
mod result_filter;
mod spot_filter;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Configuration and errors
// ============================================================================

pub use config::{ClampValues, Config, FitConfig, FitFunction, FitSolver};
pub use error::{Error, Result};

// ============================================================================
// Data model
// ============================================================================

pub use fit_result::{FitResult, FitStatus};
pub use frame::{Frame, Rect};
pub use peak::{PeakResult, PeakResults, SharedPeakResults};
pub use spot_filter::{DataProcessor, MaximaSpotFilter, Spot, SpotFilter};

// ============================================================================
// Fitting core
// ============================================================================

pub use doublet::{DoubletAnalyzer, QuadrantAnalysis, information_criterion, quadrant_analysis};
pub use gaussian::{FitLimits, GaussianFitter, GaussianFunction, GaussianSolver};
pub use neighbours::{FittedPeak, NeighbourCriteria, NeighbourResolver};
pub use noise::{NoiseMethod, estimate_background, estimate_noise};
pub use region::{crop_into, perimeter_mean, region_bounds};

// ============================================================================
// Orchestration
// ============================================================================

pub use engine::FitEngine;
pub use job::{CandidateFit, FitJob, FitParameters, JobHandle, JobOutcome, JobQueue, JobStatus, Work};
pub use result_filter::{
    DistanceResultFilter, OptimumDistanceResultFilter, ResultFilter, ResultFilterSpec,
};
pub use worker::{FitWorker, WorkerState};
