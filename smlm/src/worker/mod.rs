//! Fit worker: turns one frame into accepted peaks.
//!
//! Per job the worker moves through `Idle → IdentifyingSpots →
//! (MaximaIdentificationOnly | Fitting) → Finished`. Candidates are fitted in
//! rank order; each may pull in neighbours for a multi-peak fit and may be
//! split into a doublet. Accepted peaks are checked against the border and
//! against earlier peaks of the same frame before they reach the sink.

use std::f64::consts::PI;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use glam::DVec2;
use log::{debug, trace};
use strum_macros::Display;

use crate::config::Config;
use crate::doublet::DoubletAnalyzer;
use crate::error::Result;
use crate::fit_result::FitResult;
use crate::frame::{Frame, Rect};
use crate::gaussian::{
    ANGLE, BACKGROUND, FitLimits, GaussianFitter, GaussianFunction, LMModel, PARAMETERS_PER_PEAK,
    SIGNAL, X_POSITION, X_SD, Y_POSITION, Y_SD, normalise_angle, peak_offset,
};
use crate::job::{CandidateFit, FitJob, FitParameters, InFlight, JobOutcome, JobQueue, Work};
use crate::neighbours::{FittedPeak, NeighbourCriteria, NeighbourResolver};
use crate::noise::{estimate_background, estimate_noise};
use crate::peak::{PEAK_RESULT_PARAMETERS, PeakResult, PeakResults};
use crate::region::{crop_into, perimeter_mean, region_bounds};
use crate::result_filter::ResultFilter;
use crate::spot_filter::{Spot, SpotFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum WorkerState {
    Idle,
    IdentifyingSpots,
    MaximaIdentificationOnly,
    Fitting,
    Finished,
}

/// Per-frame scratch state, reset at the start of every frame.
#[derive(Debug, Default)]
struct FrameScratch {
    region: Vec<f32>,
    /// Region with the neighbours of a multi-peak fit subtracted.
    primary_region: Vec<f32>,
    fitted: Vec<FittedPeak>,
    fitted_background: f64,
    /// Frame mean, computed on first use.
    frame_background: Option<f64>,
    results: Vec<PeakResult>,
    fit_results: Vec<CandidateFit>,
    fitted_indices: Vec<usize>,
}

impl FrameScratch {
    fn reset(&mut self) {
        self.fitted.clear();
        self.fitted_background = 0.0;
        self.frame_background = None;
        self.results.clear();
        self.fit_results.clear();
        self.fitted_indices.clear();
    }

    /// Mean background of the peaks accepted so far, else the frame mean.
    fn background(&mut self, data: &[f32]) -> f64 {
        if !self.fitted.is_empty() {
            return self.fitted_background / self.fitted.len() as f64;
        }
        *self
            .frame_background
            .get_or_insert_with(|| estimate_background(data) as f64)
    }
}

/// Fit of one candidate before acceptance checks.
struct CandidateOutcome {
    fit: FitResult,
    /// Region offset within the frame.
    bounds: Rect,
}

/// Frame-wide values shared by every candidate of a job.
struct FrameContext<'a> {
    frame: &'a Frame,
    spots: &'a [Spot],
    noise: f32,
    end_frame: u32,
    background_override: Option<f64>,
}

/// Long-lived fitting loop fed from a [`JobQueue`].
pub struct FitWorker {
    id: usize,
    config: Arc<Config>,
    spot_filter: Arc<dyn SpotFilter>,
    results: Arc<dyn PeakResults>,
    fitter: GaussianFitter,
    doublets: DoubletAnalyzer,
    resolver: NeighbourResolver,
    scratch: FrameScratch,
    state: WorkerState,
    finished: Arc<AtomicBool>,
}

impl FitWorker {
    pub fn new(
        id: usize,
        config: Arc<Config>,
        spot_filter: Arc<dyn SpotFilter>,
        results: Arc<dyn PeakResults>,
    ) -> Self {
        config.validate();
        Self {
            id,
            fitter: GaussianFitter::new(config.fit.clone()),
            doublets: DoubletAnalyzer::new(&config),
            config,
            spot_filter,
            results,
            resolver: NeighbourResolver::new(),
            scratch: FrameScratch::default(),
            state: WorkerState::Idle,
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Flag that stops the worker at its next check point when set.
    pub fn finished_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.finished)
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Process jobs until a stop signal arrives or the finished flag is set.
    ///
    /// Jobs taken after the flag was raised are cancelled unprocessed. Fails
    /// if the queue is closed underneath the worker.
    pub fn run(&mut self, queue: &JobQueue) -> Result<()> {
        debug!("Fit worker {} started", self.id);
        let outcome = loop {
            let work = match queue.take() {
                Ok(work) => work,
                Err(err) => break Err(err),
            };
            match work {
                Work::Stop => break Ok(()),
                Work::Job(job) => {
                    if self.is_finished() {
                        job.handle().cancel();
                        break Ok(());
                    }
                    self.process(*job);
                }
            }
        };
        self.finished.store(true, Ordering::Release);
        self.state = WorkerState::Finished;
        debug!("Fit worker {} stopped", self.id);
        outcome
    }

    /// Fit one job, publish its peaks and complete its handle.
    ///
    /// A panic while fitting leaves the job cancelled rather than started.
    pub fn process(&mut self, job: FitJob) {
        let in_flight = InFlight::start(job.handle());

        let outcome = self.fit_frame(job.frame(), job.parameters(), job.records_indices());
        self.results.add_all(outcome.results.clone());
        in_flight.finish(outcome);

        self.state = WorkerState::Idle;
    }

    fn fit_frame(
        &mut self,
        frame: &Frame,
        parameters: Option<&FitParameters>,
        record_indices: bool,
    ) -> JobOutcome {
        self.scratch.reset();
        let mut outcome = JobOutcome {
            frame: frame.index(),
            ..Default::default()
        };
        if record_indices {
            outcome.fitted_indices = Some(Vec::new());
        }

        self.state = WorkerState::IdentifyingSpots;
        let spots = self.identify_spots(frame, parameters);
        if spots.is_empty() {
            debug!("Frame {}: no candidates", frame.index());
            self.state = WorkerState::Finished;
            return outcome;
        }

        let noise = parameters.and_then(|p| p.noise).unwrap_or_else(|| {
            estimate_noise(
                frame.data(),
                frame.width(),
                frame.height(),
                self.config.noise_method,
            )
        });
        self.fitter.set_noise(noise as f64);

        let ctx = FrameContext {
            frame,
            spots: &spots,
            noise,
            end_frame: parameters
                .and_then(|p| p.end_frame)
                .unwrap_or(frame.index()),
            background_override: parameters.and_then(|p| p.background).map(f64::from),
        };

        if self.config.maxima_identification_only {
            self.state = WorkerState::MaximaIdentificationOnly;
            self.emit_maxima(&ctx);
        } else {
            self.state = WorkerState::Fitting;
            let mut filter = parameters.and_then(|p| p.filter.as_ref()).map(|f| f.build());
            outcome.aborted = self.fit_candidates(&ctx, filter.as_deref_mut(), record_indices);

            if let Some(filter) = filter.as_mut() {
                filter.finalise();
                self.scratch.results = filter.results().to_vec();
                self.scratch.fit_results = filter.fit_results().to_vec();
            }
        }

        debug!(
            "Frame {}: {} candidates, {} results",
            frame.index(),
            spots.len(),
            self.scratch.results.len()
        );

        outcome.results = std::mem::take(&mut self.scratch.results);
        outcome.fit_results = std::mem::take(&mut self.scratch.fit_results);
        if let Some(indices) = outcome.fitted_indices.as_mut() {
            indices.append(&mut self.scratch.fitted_indices);
        }
        outcome.candidates = spots;
        self.state = WorkerState::Finished;
        outcome
    }

    fn identify_spots(&self, frame: &Frame, parameters: Option<&FitParameters>) -> Vec<Spot> {
        let (width, height) = (frame.width(), frame.height());

        if let Some(spots) = parameters.and_then(|p| p.spots.as_ref()) {
            return spots
                .iter()
                .copied()
                .filter(|s| s.x < width && s.y < height)
                .collect();
        }

        if let Some(indices) = parameters.and_then(|p| p.max_indices.as_ref()) {
            let data = self
                .spot_filter
                .preprocess_data(frame.data(), width, height);
            return indices
                .iter()
                .filter(|&&i| i < data.len())
                .map(|&i| Spot::new(i % width, i / width, data[i]))
                .collect();
        }

        self.spot_filter.rank(frame.data(), width, height)
    }

    /// One unfitted result per candidate: perimeter background and a signal
    /// derived from the candidate height and the configured width.
    fn emit_maxima(&mut self, ctx: &FrameContext) {
        let frame = ctx.frame;
        let radius = self.config.fitting_radius();
        let (sd0, sd1) = (self.config.fit.initial_sd0, self.config.fit.initial_sd1);

        for spot in ctx.spots {
            let bounds = region_bounds(spot.x, spot.y, radius, frame.width(), frame.height());
            crop_into(frame.data(), frame.width(), &bounds, &mut self.scratch.region);
            let background = perimeter_mean(&self.scratch.region, bounds.width, bounds.height);
            let amplitude = frame.get(spot.x, spot.y) as f64 - background;

            let params = [
                background,
                amplitude * 2.0 * PI * sd0 * sd1,
                0.0,
                spot.x as f64,
                spot.y as f64,
                sd0,
                sd1,
            ];
            let result = self.peak_result(ctx, spot, &params, None, 0.0);
            self.scratch.results.push(result);
        }
    }

    /// Returns whether the failures limit ended the frame early.
    fn fit_candidates(
        &mut self,
        ctx: &FrameContext,
        mut filter: Option<&mut (dyn ResultFilter + 'static)>,
        record_indices: bool,
    ) -> bool {
        let frame = ctx.frame;
        let limit = self.config.failures_limit;
        let mut failures = 0;

        self.resolver.reset(ctx.spots.len());

        for (candidate, spot) in ctx.spots.iter().enumerate() {
            if self.is_finished() {
                debug!("Frame {}: worker {} finishing early", frame.index(), self.id);
                break;
            }

            let CandidateOutcome { fit, bounds } = self.fit_candidate(ctx, candidate);

            let accepted = if fit.is_ok() {
                let peaks = self.convert_peaks(ctx, spot, &fit, &bounds);
                if let Some(filter) = filter.as_deref_mut() {
                    filter.filter(candidate, &fit, &peaks);
                }
                self.accept_peaks(ctx, &fit, &bounds, peaks)
            } else {
                trace!("Candidate {candidate} at ({}, {}): {}", spot.x, spot.y, fit.status);
                if let Some(filter) = filter.as_deref_mut() {
                    let origin = frame.bounds();
                    let position = DVec2::new(
                        (origin.x + spot.x) as f64 + 0.5,
                        (origin.y + spot.y) as f64 + 0.5,
                    );
                    filter.pass_fail(candidate, &fit, position);
                }
                0
            };

            self.scratch.fit_results.push(CandidateFit::new(candidate, fit));

            if accepted > 0 {
                failures = 0;
                if record_indices {
                    self.scratch.fitted_indices.push(candidate);
                }
            } else {
                failures += 1;
                if limit > 0 && failures >= limit {
                    debug!(
                        "Frame {}: {failures} consecutive failures, skipping {} candidates",
                        frame.index(),
                        ctx.spots.len() - candidate - 1
                    );
                    return true;
                }
            }
        }
        false
    }

    fn fit_candidate(&mut self, ctx: &FrameContext, candidate: usize) -> CandidateOutcome {
        let frame = ctx.frame;
        let spot = ctx.spots[candidate];
        let radius = self.config.fitting_radius();
        let bounds = region_bounds(spot.x, spot.y, radius, frame.width(), frame.height());
        crop_into(frame.data(), frame.width(), &bounds, &mut self.scratch.region);

        let background = ctx
            .background_override
            .unwrap_or_else(|| self.scratch.background(frame.data()));

        let mut had_neighbours = false;
        if self.config.include_neighbours {
            let criteria = NeighbourCriteria {
                height_threshold: self.config.neighbour_height_threshold,
                absolute_intensity: self.spot_filter.is_absolute_intensity(),
                background,
                sd_expansion: self.config.fit.max_initial_sd(),
            };
            let (neighbours, fitted) = self.resolver.find(
                &bounds,
                candidate,
                ctx.spots,
                &self.scratch.fitted,
                &criteria,
            );

            if neighbours + fitted > 0 {
                had_neighbours = true;
                if let Some(fit) = self.fit_with_neighbours(ctx, candidate, &bounds, background) {
                    return CandidateOutcome { fit, bounds };
                }
            }
        }

        let fit = self.fit_single(ctx, candidate, &bounds, background, had_neighbours);
        CandidateOutcome { fit, bounds }
    }

    /// Multi-peak fit of the candidate with its neighbours. Returns the
    /// primary peak on success.
    fn fit_with_neighbours(
        &mut self,
        ctx: &FrameContext,
        candidate: usize,
        bounds: &Rect,
        background: f64,
    ) -> Option<FitResult> {
        let fit_config = &self.config.fit;
        let (sd0, sd1) = (fit_config.initial_sd0, fit_config.initial_sd1);
        let angle = fit_config.initial_angle;
        let norm = 2.0 * PI * sd0 * sd1;

        let neighbours = self.resolver.neighbours();
        let fitted = self.resolver.fitted_neighbours();
        let n_peaks = 1 + neighbours.len() + fitted.len();

        let mut initial = Vec::with_capacity(1 + n_peaks * PARAMETERS_PER_PEAK);
        initial.push(background);
        for &j in std::iter::once(&candidate).chain(neighbours) {
            let s = &ctx.spots[j];
            let height = ctx.frame.get(s.x, s.y) as f64 - background;
            initial.extend_from_slice(&[
                height * norm,
                angle,
                (s.x - bounds.x) as f64,
                (s.y - bounds.y) as f64,
                sd0,
                sd1,
            ]);
        }
        for &j in fitted {
            let peak = &self.scratch.fitted[j];
            let mut p = peak.params;
            // Height over the new background estimate.
            let (sx, sy) = (p[X_SD], p[Y_SD]);
            let height = p[SIGNAL] / (2.0 * PI * sx * sy) + peak.background - background;
            if height > 0.0 {
                p[SIGNAL] = height * 2.0 * PI * sx * sy;
            }
            p[X_POSITION] -= bounds.x as f64;
            p[Y_POSITION] -= bounds.y as f64;
            initial.extend_from_slice(&p);
        }

        let limits = FitLimits {
            max_iterations: Some(fit_config.max_iterations * n_peaks),
            coordinate_shift: None,
        };
        let fit = self.fitter.fit_with_limits(
            &self.scratch.region,
            bounds.width,
            bounds.height,
            n_peaks,
            &initial,
            false,
            limits,
        );

        if !fit.is_ok() {
            trace!(
                "Candidate {candidate}: {}-peak fit failed ({}), falling back to single",
                n_peaks, fit.status
            );
            return None;
        }

        trace!("Candidate {candidate}: fitted with {} neighbours", n_peaks - 1);
        if self.doublets.enabled() {
            if let Some(doublet) = self.neighbour_doublet(&fit, bounds) {
                return Some(doublet);
            }
        }
        Some(fit.with_peaks(&[0]))
    }

    /// Doublet analysis of the primary peak of a successful multi-peak fit.
    ///
    /// The other peaks are subtracted from the region, so the residuals seen
    /// by the analyzer are those of the full fit and the two-peak re-fit only
    /// has to explain the primary.
    fn neighbour_doublet(&mut self, fit: &FitResult, bounds: &Rect) -> Option<FitResult> {
        let fit_config = &self.config.fit;
        let others: Vec<usize> = (1..fit.n_peaks).collect();
        let mut other_params = fit.with_peaks(&others).params;
        other_params[BACKGROUND] = 0.0;
        let others_model =
            GaussianFunction::new(fit_config.function, fit_config.fit_background, others.len());

        let width = bounds.width;
        self.scratch.primary_region.clear();
        self.scratch.primary_region.extend(
            self.scratch.region.iter().enumerate().map(|(index, &z)| {
                let f = others_model.evaluate(
                    (index % width) as f64,
                    (index / width) as f64,
                    &other_params,
                );
                (z as f64 - f) as f32
            }),
        );

        // Judged as a one-peak model on the reduced region.
        let single_model = GaussianFunction::new(fit_config.function, fit_config.fit_background, 1);
        let mut primary = fit.with_peaks(&[0]);
        primary.n_fitted_params = single_model.fitted_indices().len();

        let region = &self.scratch.primary_region;
        self.fitter
            .evaluate_residuals(region, width, bounds.height, &primary.params);
        self.doublets
            .analyse(&mut self.fitter, &primary, region, width, bounds.height, true)
    }

    fn fit_single(
        &mut self,
        ctx: &FrameContext,
        candidate: usize,
        bounds: &Rect,
        background: f64,
        had_neighbours: bool,
    ) -> FitResult {
        let spot = ctx.spots[candidate];
        let c = &self.config.fit;
        let initial = [
            background,
            0.0,
            c.initial_angle,
            (spot.x - bounds.x) as f64,
            (spot.y - bounds.y) as f64,
            c.initial_sd0,
            c.initial_sd1,
        ];

        let region = &self.scratch.region;
        let single = self
            .fitter
            .fit(region, bounds.width, bounds.height, 1, &initial, true);

        if self.doublets.enabled() {
            if let Some(doublet) = self.doublets.analyse(
                &mut self.fitter,
                &single,
                region,
                bounds.width,
                bounds.height,
                had_neighbours,
            ) {
                return doublet;
            }
        }
        single
    }

    /// Every peak of a fit as a full-image result, before acceptance checks.
    fn convert_peaks(
        &self,
        ctx: &FrameContext,
        spot: &Spot,
        fit: &FitResult,
        bounds: &Rect,
    ) -> Vec<PeakResult> {
        (0..fit.n_peaks)
            .map(|k| {
                let mut params = [0.0; PEAK_RESULT_PARAMETERS];
                params[BACKGROUND] = fit.background();
                params[1..].copy_from_slice(fit.peak(k));
                params[1 + X_POSITION] += bounds.x as f64;
                params[1 + Y_POSITION] += bounds.y as f64;

                let devs = fit.param_devs.as_ref().map(|devs| {
                    let mut out = [0.0; PEAK_RESULT_PARAMETERS];
                    out[BACKGROUND] = devs[BACKGROUND];
                    let start = peak_offset(k);
                    out[1..].copy_from_slice(&devs[start..start + PARAMETERS_PER_PEAK]);
                    out
                });
                self.peak_result(ctx, spot, &params, devs.as_ref(), fit.error)
            })
            .collect()
    }

    /// Apply the border and duplicate checks and keep the survivors.
    /// Returns the number of accepted peaks.
    fn accept_peaks(
        &mut self,
        ctx: &FrameContext,
        fit: &FitResult,
        bounds: &Rect,
        peaks: Vec<PeakResult>,
    ) -> usize {
        let frame = ctx.frame;
        let border = self.config.border.unwrap_or(self.spot_filter.border()) as f64;
        let (width, height) = (frame.width() as f64, frame.height() as f64);
        let duplicate = self.config.duplicate_distance;
        let duplicate_squared = (duplicate * duplicate) as f32;
        let origin = frame.bounds();

        let mut accepted = 0;
        for (k, peak) in peaks.into_iter().enumerate() {
            // Frame-relative with the pixel centre correction.
            let x = peak.x() as f64 - origin.x as f64;
            let y = peak.y() as f64 - origin.y as f64;
            let inside = border < x && x < width - border && border < y && y < height - border;
            if !inside {
                trace!("Peak at ({x:.2}, {y:.2}) inside the border");
                continue;
            }
            if duplicate > 0.0
                && self
                    .scratch
                    .results
                    .iter()
                    .any(|r| r.distance_squared(&peak) < duplicate_squared)
            {
                trace!("Peak at ({x:.2}, {y:.2}) duplicates an earlier result");
                continue;
            }

            let mut params = [0.0; PARAMETERS_PER_PEAK];
            params.copy_from_slice(fit.peak(k));
            params[X_POSITION] += bounds.x as f64;
            params[Y_POSITION] += bounds.y as f64;
            self.scratch.fitted.push(FittedPeak {
                background: fit.background(),
                params,
            });
            self.scratch.fitted_background += fit.background();
            self.scratch.results.push(peak);
            accepted += 1;
        }
        accepted
    }

    /// Build a full-image result from single-peak parameters in frame pixels.
    fn peak_result(
        &self,
        ctx: &FrameContext,
        spot: &Spot,
        params: &[f64; PEAK_RESULT_PARAMETERS],
        devs: Option<&[f64; PEAK_RESULT_PARAMETERS]>,
        error: f64,
    ) -> PeakResult {
        let origin = ctx.frame.bounds();
        let fits_angle = self.config.fit.function.fits_angle();

        let mut out = params.map(|v| v as f32);
        out[1 + X_POSITION] = (params[1 + X_POSITION] + origin.x as f64 + 0.5) as f32;
        out[1 + Y_POSITION] = (params[1 + Y_POSITION] + origin.y as f64 + 0.5) as f32;
        if fits_angle {
            out[1 + ANGLE] = normalise_angle(params[1 + ANGLE]).to_degrees() as f32;
        }

        let param_devs = devs.map(|devs| {
            let mut out = devs.map(|v| v as f32);
            if fits_angle {
                out[1 + ANGLE] = devs[1 + ANGLE].to_degrees() as f32;
            }
            out
        });

        PeakResult {
            frame: ctx.frame.index(),
            end_frame: ctx.end_frame,
            orig_x: origin.x + spot.x,
            orig_y: origin.y + spot.y,
            orig_value: ctx.frame.get(spot.x, spot.y),
            error,
            noise: ctx.noise,
            params: out,
            param_devs,
        }
    }
}
