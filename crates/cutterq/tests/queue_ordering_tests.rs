//! Claim order, status reporting and transition checks on a live queue.

mod common;

use common::TestHarness;

use cutterq::{JobPriority, JobStatus, NewJob, QueueError, WalActionKind};

#[test]
fn test_priority_classes_are_served_in_order() {
    let harness = TestHarness::new();
    let queue = harness.open();

    let low = harness.add(&queue, "ORD-LOW", JobPriority::Low);
    let normal = harness.add(&queue, "ORD-NORMAL", JobPriority::Normal);
    let high = harness.add(&queue, "ORD-HIGH", JobPriority::High);
    let rush = harness.add(&queue, "ORD-RUSH", JobPriority::Rush);

    let claimed: Vec<String> = std::iter::from_fn(|| queue.get_next_job().unwrap())
        .map(|job| job.job_id)
        .collect();

    assert_eq!(claimed, vec![rush, high, normal, low]);
    assert!(queue.get_next_job().unwrap().is_none());
}

#[test]
fn test_fifo_within_priority_class() {
    let harness = TestHarness::new();
    let queue = harness.open();

    let ids: Vec<String> = (1..=5)
        .map(|n| harness.add(&queue, &format!("ORD-{}", n), JobPriority::Normal))
        .collect();

    for expected in &ids {
        let job = queue.get_next_job().unwrap().expect("job should be queued");
        assert_eq!(&job.job_id, expected);
        queue.mark_complete(&job.job_id).unwrap();
    }
}

#[test]
fn test_rush_jumps_ahead_of_waiting_work() {
    let harness = TestHarness::new();
    let queue = harness.open();

    let low = harness.add(&queue, "ORD-1", JobPriority::Low);
    let normal = harness.add(&queue, "ORD-2", JobPriority::Normal);
    let rush = harness.add(&queue, "ORD-3", JobPriority::Rush);

    let order: Vec<String> = (0..3)
        .map(|_| queue.get_next_job().unwrap().unwrap().job_id)
        .collect();
    assert_eq!(order, vec![rush, normal, low]);

    // All three were claimed without completing any of them.
    let status = queue.get_status().unwrap();
    assert_eq!(status.queue_depth, 0);
    assert_eq!(status.active_jobs, 3);
}

#[test]
fn test_list_queue_shows_cutting_then_claim_order() {
    let harness = TestHarness::new();
    let queue = harness.open();

    let first = harness.add(&queue, "ORD-1", JobPriority::Normal);
    let low = harness.add(&queue, "ORD-2", JobPriority::Low);
    let high = harness.add(&queue, "ORD-3", JobPriority::High);

    let cutting = queue.get_next_job().unwrap().unwrap();
    assert_eq!(cutting.job_id, high);

    let listed: Vec<(String, JobStatus)> = queue
        .list_queue()
        .unwrap()
        .into_iter()
        .map(|job| (job.job_id, job.status))
        .collect();
    assert_eq!(
        listed,
        vec![
            (high, JobStatus::Cutting),
            (first, JobStatus::Queued),
            (low, JobStatus::Queued),
        ]
    );
}

#[test]
fn test_status_totals_fabric_and_estimate() {
    let harness = TestHarness::new();
    let queue = harness.open();

    queue
        .add_job(harness.job("ORD-1", JobPriority::Normal).fabric_length_cm(100.0))
        .unwrap();
    queue
        .add_job(harness.job("ORD-2", JobPriority::Normal).fabric_length_cm(150.0))
        .unwrap();

    let status = queue.get_status().unwrap();
    assert_eq!(status.queue_depth, 2);
    assert_eq!(status.active_jobs, 2);
    assert!((status.total_fabric_cm - 250.0).abs() < f64::EPSILON);
    assert!((status.estimated_time_min - 5.0).abs() < f64::EPSILON);
    assert_eq!(status.status_breakdown[&JobStatus::Queued], 2);
    assert_eq!(status.status_breakdown[&JobStatus::Complete], 0);
}

#[test]
fn test_status_breakdown_counts_finished_jobs() {
    let harness = TestHarness::new();
    let queue = harness.open();

    for n in 0..3 {
        harness.add(&queue, &format!("ORD-{}", n), JobPriority::Normal);
    }
    let done = queue.get_next_job().unwrap().unwrap();
    queue.mark_complete(&done.job_id).unwrap();
    let failed = queue.get_next_job().unwrap().unwrap();
    queue.mark_failed(&failed.job_id, "blade jam").unwrap();

    let status = queue.get_status().unwrap();
    assert_eq!(status.queue_depth, 1);
    assert_eq!(status.active_jobs, 1);
    assert_eq!(status.status_breakdown[&JobStatus::Queued], 1);
    assert_eq!(status.status_breakdown[&JobStatus::Cutting], 0);
    assert_eq!(status.status_breakdown[&JobStatus::Complete], 1);
    assert_eq!(status.status_breakdown[&JobStatus::Error], 1);
}

#[test]
fn test_invalid_transitions_leave_queue_intact() {
    let harness = TestHarness::new();
    let queue = harness.open();
    let job_id = harness.add(&queue, "ORD-1", JobPriority::Normal);
    let entries_before = harness.wal_kinds(&queue).len();

    let complete = queue.mark_complete(&job_id);
    assert!(matches!(
        complete,
        Err(QueueError::InvalidTransition {
            status: JobStatus::Queued,
            ..
        })
    ));
    let fail = queue.mark_failed(&job_id, "operator abort");
    assert!(matches!(fail, Err(QueueError::InvalidTransition { .. })));

    assert_eq!(harness.wal_kinds(&queue).len(), entries_before);
    assert_eq!(queue.get_job(&job_id).unwrap().status, JobStatus::Queued);
    assert_eq!(queue.get_next_job().unwrap().unwrap().job_id, job_id);
}

#[test]
fn test_finished_job_cannot_be_finished_again() {
    let harness = TestHarness::new();
    let queue = harness.open();
    let job_id = harness.add(&queue, "ORD-1", JobPriority::Normal);
    queue.get_next_job().unwrap();
    queue.mark_complete(&job_id).unwrap();

    let again = queue.mark_failed(&job_id, "late failure");
    assert!(matches!(
        again,
        Err(QueueError::InvalidTransition {
            status: JobStatus::Complete,
            ..
        })
    ));
    assert_eq!(queue.get_job(&job_id).unwrap().status, JobStatus::Complete);
}

#[test]
fn test_unknown_job_operations() {
    let harness = TestHarness::new();
    let queue = harness.open();

    assert!(matches!(
        queue.get_job("no-such-job"),
        Err(QueueError::NotFound(_))
    ));
    assert!(matches!(
        queue.mark_complete("no-such-job"),
        Err(QueueError::NotFound(_))
    ));
}

#[test]
fn test_wal_records_full_lifecycle() {
    let harness = TestHarness::new();
    let queue = harness.open();
    let job_id = harness.add(&queue, "ORD-1", JobPriority::High);
    queue.get_next_job().unwrap();
    queue.mark_complete(&job_id).unwrap();

    assert_eq!(
        harness.wal_kinds(&queue),
        vec![
            WalActionKind::JobCreated,
            WalActionKind::JobQueued,
            WalActionKind::JobCutting,
            WalActionKind::JobCompleted,
        ]
    );

    let sequences: Vec<u64> = queue
        .wal()
        .replay()
        .unwrap()
        .iter()
        .map(|e| e.sequence)
        .collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);
}

#[test]
fn test_missing_plot_is_accepted_without_checksum() {
    let harness = TestHarness::new();
    let queue = harness.open();

    let job = queue
        .add_job(NewJob::new("ORD-1", harness.plot_dir.join("never-written.plt")))
        .unwrap();

    assert_eq!(job.status, JobStatus::Queued);
    assert!(job.checksum_sha256.is_none());
    assert_eq!(queue.get_next_job().unwrap().unwrap().job_id, job.job_id);
}
