use std::sync::atomic::Ordering;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use super::*;
use crate::config::FitConfig;
use crate::frame::Frame;
use crate::job::{FitParameters, JobStatus};
use crate::peak::SharedPeakResults;
use crate::spot_filter::{MaximaSpotFilter, Spot, SpotFilter};
use crate::testing::{TestPeak, render_gaussians};

const SIZE: usize = 24;

fn config() -> Config {
    Config {
        fit: FitConfig::default().with_initial_sd(1.3),
        ..Default::default()
    }
}

fn engine(threads: usize) -> (FitEngine, Arc<SharedPeakResults>) {
    let results = Arc::new(SharedPeakResults::new());
    let engine = FitEngine::new(
        config(),
        Arc::new(MaximaSpotFilter::default()),
        results.clone(),
        threads,
    )
    .unwrap();
    (engine, results)
}

/// Frame `index` with one spot whose position depends on the index.
fn job(index: u32) -> FitJob {
    let x = 8 + (index as usize % 8);
    let peak = TestPeak::new(x as f64, 12.0, 400.0, 1.3);
    let data = render_gaussians(SIZE, SIZE, 5.0, &[peak]);
    let frame = Frame::new(index, SIZE, SIZE, data).unwrap();
    FitJob::new(frame).with_parameters(FitParameters {
        spots: Some(vec![Spot::new(x, 12, 405.0)]),
        ..Default::default()
    })
}

#[test]
fn test_fits_every_queued_frame() {
    let (engine, results) = engine(3);
    assert_eq!(engine.threads(), 3);

    let handles: Vec<JobHandle> = (0..12).map(|i| engine.run(job(i)).unwrap()).collect();
    engine.end(false).unwrap();

    for (i, handle) in handles.iter().enumerate() {
        assert_eq!(handle.status(), JobStatus::Finished);
        let outcome = handle.wait().unwrap();
        assert_eq!(outcome.frame, i as u32);
        assert_eq!(outcome.results.len(), 1);
        let expected_x = (8 + i % 8) as f32 + 0.5;
        assert!((outcome.results[0].x() - expected_x).abs() < 0.05);
    }

    results.sort_by_frame();
    let frames: Vec<u32> = results.take().iter().map(|r| r.frame).collect();
    assert_eq!(frames, (0..12).collect::<Vec<u32>>());
}

#[test]
fn test_handles_complete_while_running() {
    let (engine, _) = engine(2);
    let handle = engine.run(job(4)).unwrap();
    let outcome = handle.wait().unwrap();
    assert_eq!(outcome.frame, 4);
    assert_eq!(outcome.results.len(), 1);
    engine.end(false).unwrap();
}

#[test]
fn test_immediate_end_leaves_no_job_pending() {
    let (engine, results) = engine(1);
    let handles: Vec<JobHandle> = (0..8).map(|i| engine.run(job(i)).unwrap()).collect();
    engine.end(true).unwrap();

    let mut finished = 0;
    for handle in &handles {
        match handle.status() {
            JobStatus::Finished => finished += 1,
            JobStatus::Cancelled => assert!(handle.wait().is_none()),
            status => panic!("job left {status}"),
        }
    }
    // Finished jobs may have been cut short, so at most one peak each.
    assert!(results.size() <= finished);
}

#[test]
fn test_zero_threads_rejected() {
    let result = FitEngine::new(
        config(),
        Arc::new(MaximaSpotFilter::default()),
        Arc::new(SharedPeakResults::new()),
        0,
    );
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[test]
fn test_invalid_config_rejected() {
    let mut config = config();
    config.fitting_width = 0.0;
    let result = FitEngine::new(
        config,
        Arc::new(MaximaSpotFilter::default()),
        Arc::new(SharedPeakResults::new()),
        1,
    );
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[test]
fn test_run_rejected_once_workers_stopped() {
    let (engine, _) = engine(2);
    assert!(!engine.is_stopped());
    for worker in &engine.workers {
        worker.finished.store(true, Ordering::Release);
    }
    assert!(engine.is_stopped());
    assert!(matches!(engine.run(job(0)), Err(Error::EngineStopped)));
    // Dropping joins the workers.
}

/// Blocks in `rank` until released, then panics.
struct FailingSpotFilter {
    release: Barrier,
}

impl SpotFilter for FailingSpotFilter {
    fn rank(&self, _data: &[f32], _width: usize, _height: usize) -> Vec<Spot> {
        self.release.wait();
        panic!("spot filter failed");
    }

    fn preprocess_data(&self, data: &[f32], _width: usize, _height: usize) -> Vec<f32> {
        data.to_vec()
    }

    fn border(&self) -> usize {
        1
    }

    fn is_absolute_intensity(&self) -> bool {
        true
    }
}

/// Frame without explicit spots, so the spot filter ranks it.
fn flat_job(index: u32) -> FitJob {
    FitJob::new(Frame::new(index, SIZE, SIZE, vec![5.0; SIZE * SIZE]).unwrap())
}

#[test]
fn test_panicking_worker_stops_engine() {
    let filter = Arc::new(FailingSpotFilter {
        release: Barrier::new(2),
    });
    let config = Config {
        queue_capacity: 1,
        ..config()
    };
    let engine = FitEngine::new(
        config,
        filter.clone(),
        Arc::new(SharedPeakResults::new()),
        1,
    )
    .unwrap();

    // The worker takes frame 0 and waits in the filter; frame 1 fills the queue.
    let in_progress = engine.run(flat_job(0)).unwrap();
    let queued = engine.run(flat_job(1)).unwrap();

    thread::scope(|scope| {
        let blocked = scope.spawn(|| engine.run(flat_job(2)));
        thread::sleep(Duration::from_millis(50));
        filter.release.wait();
        assert!(matches!(blocked.join().unwrap(), Err(Error::EngineStopped)));
    });

    assert!(in_progress.wait_timeout(Duration::from_secs(2)).is_none());
    assert_eq!(in_progress.status(), JobStatus::Cancelled);
    assert!(engine.is_stopped());
    assert!(matches!(engine.run(flat_job(3)), Err(Error::EngineStopped)));

    assert!(matches!(engine.end(false), Err(Error::WorkerPanicked { id: 0 })));
    assert_eq!(queued.status(), JobStatus::Cancelled);
}
