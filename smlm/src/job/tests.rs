use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::*;
use crate::error::Error;

fn job(index: u32) -> FitJob {
    FitJob::new(Frame::new(index, 2, 2, vec![0.0; 4]).unwrap())
}

fn frame_of(work: Work) -> Option<u32> {
    match work {
        Work::Job(job) => Some(job.frame().index()),
        Work::Stop => None,
    }
}

#[test]
fn test_queue_is_fifo() {
    let queue = JobQueue::new(4);
    for i in 0..3 {
        queue.put(Work::Job(Box::new(job(i)))).unwrap();
    }
    queue.put(Work::Stop).unwrap();
    assert_eq!(queue.len(), 4);

    let order: Vec<Option<u32>> = (0..4).map(|_| frame_of(queue.take().unwrap())).collect();
    assert_eq!(order, vec![Some(0), Some(1), Some(2), None]);
    assert!(queue.is_empty());
}

#[test]
fn test_put_blocks_while_full() {
    let queue = Arc::new(JobQueue::new(1));
    queue.put(Work::Job(Box::new(job(0)))).unwrap();

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.put(Work::Job(Box::new(job(1)))))
    };

    thread::sleep(Duration::from_millis(50));
    assert_eq!(queue.len(), 1);

    assert_eq!(frame_of(queue.take().unwrap()), Some(0));
    producer.join().unwrap().unwrap();
    assert_eq!(frame_of(queue.take().unwrap()), Some(1));
}

#[test]
fn test_force_put_ignores_capacity() {
    let queue = JobQueue::new(1);
    queue.put(Work::Job(Box::new(job(0)))).unwrap();
    queue.force_put(Work::Stop).unwrap();
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.capacity(), 1);
}

#[test]
fn test_close_wakes_blocked_take() {
    let queue = Arc::new(JobQueue::new(2));
    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.take())
    };

    thread::sleep(Duration::from_millis(50));
    queue.close();
    assert!(matches!(consumer.join().unwrap(), Err(Error::QueueClosed)));
    assert!(matches!(queue.put(Work::Stop), Err(Error::QueueClosed)));
    assert!(matches!(queue.force_put(Work::Stop), Err(Error::QueueClosed)));
}

#[test]
fn test_closed_queue_still_drains() {
    let queue = JobQueue::new(2);
    queue.put(Work::Job(Box::new(job(5)))).unwrap();
    queue.close();
    assert_eq!(frame_of(queue.take().unwrap()), Some(5));
    assert!(queue.take().is_err());
}

#[test]
fn test_drain_empties_queue() {
    let queue = JobQueue::new(3);
    queue.put(Work::Job(Box::new(job(0)))).unwrap();
    queue.put(Work::Job(Box::new(job(1)))).unwrap();

    let drained = queue.drain();
    assert_eq!(drained.len(), 2);
    assert!(queue.is_empty());
}

#[test]
#[should_panic(expected = "queue capacity must be positive")]
fn test_zero_capacity_panics() {
    JobQueue::new(0);
}

#[test]
fn test_handle_lifecycle() {
    let job = job(3);
    let handle = job.handle();
    assert_eq!(handle.status(), JobStatus::Queued);
    assert!(!handle.is_done());

    handle.start();
    assert_eq!(handle.status(), JobStatus::Started);

    handle.finish(JobOutcome {
        frame: 3,
        ..Default::default()
    });
    assert!(handle.is_done());
    assert_eq!(handle.wait().map(|o| o.frame), Some(3));
    // The outcome is handed out once.
    assert!(handle.wait().is_none());
    assert_eq!(handle.status(), JobStatus::Finished);
}

#[test]
fn test_wait_blocks_until_finished() {
    let handle = job(8).handle();
    let waiter = {
        let handle = handle.clone();
        thread::spawn(move || handle.wait())
    };

    thread::sleep(Duration::from_millis(20));
    handle.finish(JobOutcome {
        frame: 8,
        aborted: true,
        ..Default::default()
    });
    let outcome = waiter.join().unwrap().unwrap();
    assert_eq!(outcome.frame, 8);
    assert!(outcome.aborted);
}

#[test]
fn test_cancelled_job_has_no_outcome() {
    let handle = job(1).handle();
    handle.cancel();
    assert_eq!(handle.status(), JobStatus::Cancelled);
    assert!(handle.is_done());
    assert!(handle.wait().is_none());
}

#[test]
fn test_wait_timeout_on_pending_job() {
    let handle = job(1).handle();
    assert!(handle.wait_timeout(Duration::from_millis(10)).is_none());
    assert_eq!(handle.status(), JobStatus::Queued);
}

#[test]
fn test_builder_options() {
    let job = job(2)
        .with_parameters(FitParameters {
            noise: Some(1.5),
            ..Default::default()
        })
        .with_recorded_indices();
    assert!(job.records_indices());
    assert_eq!(job.parameters().and_then(|p| p.noise), Some(1.5));
    assert_eq!(job.frame().index(), 2);
}

#[test]
fn test_wait_timeout_ignores_progress_updates() {
    let handle = job(4).handle();
    let updater = {
        let handle = handle.clone();
        thread::spawn(move || {
            for _ in 0..50 {
                handle.start();
                thread::sleep(Duration::from_millis(20));
            }
        })
    };

    let started = std::time::Instant::now();
    assert!(handle.wait_timeout(Duration::from_millis(100)).is_none());
    assert!(started.elapsed() < Duration::from_millis(500));
    updater.join().unwrap();
}

#[test]
fn test_dropped_in_flight_job_is_cancelled() {
    let handle = job(6).handle();
    let in_flight = InFlight::start(handle.clone());
    assert_eq!(handle.status(), JobStatus::Started);
    drop(in_flight);
    assert_eq!(handle.status(), JobStatus::Cancelled);
    assert!(handle.wait().is_none());

    let handle = job(7).handle();
    InFlight::start(handle.clone()).finish(JobOutcome {
        frame: 7,
        ..Default::default()
    });
    assert_eq!(handle.status(), JobStatus::Finished);
    assert_eq!(handle.wait().map(|o| o.frame), Some(7));
}
