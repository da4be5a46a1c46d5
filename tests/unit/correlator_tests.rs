//! Unit tests for the control request correlator.

use std::time::Duration;

use tokio::time::Instant;

use session_runner::models::control::{ControlKind, ControlOutcome};
use session_runner::models::permission::PermissionMode;
use session_runner::runner::ControlCorrelator;
use session_runner::AppError;

fn mode(mode: PermissionMode) -> ControlKind {
    ControlKind::SetPermissionMode { mode }
}

#[test]
fn resolves_by_id_regardless_of_arrival_order() {
    let mut correlator = ControlCorrelator::new(Duration::from_secs(5));
    let now = Instant::now();
    let (first, mut first_rx) = correlator.issue(mode(PermissionMode::Plan), now);
    let (second, mut second_rx) = correlator.issue(mode(PermissionMode::AcceptEdits), now);

    let resolved = correlator
        .resolve(&second.id, ControlOutcome::Success)
        .expect("pending");
    assert_eq!(resolved.id, second.id);
    assert_eq!(resolved.kind, mode(PermissionMode::AcceptEdits));
    assert!(correlator.is_pending(&first.id));

    correlator
        .resolve(
            &first.id,
            ControlOutcome::Failed {
                error: "busy".into(),
            },
        )
        .expect("pending");

    assert_eq!(second_rx.try_recv().unwrap(), ControlOutcome::Success);
    assert_eq!(
        first_rx.try_recv().unwrap(),
        ControlOutcome::Failed {
            error: "busy".into()
        }
    );
    assert_eq!(correlator.pending_count(), 0);
}

#[test]
fn a_request_never_resolves_twice() {
    let mut correlator = ControlCorrelator::new(Duration::from_secs(5));
    let (request, _rx) = correlator.issue(ControlKind::Interrupt, Instant::now());

    assert!(correlator
        .resolve(&request.id, ControlOutcome::Success)
        .is_some());
    assert!(correlator
        .resolve(&request.id, ControlOutcome::Success)
        .is_none());
    assert!(correlator.resolve("ctl-unknown", ControlOutcome::Success).is_none());
}

#[test]
fn expire_times_out_only_overdue_requests_in_issue_order() {
    let timeout = Duration::from_millis(100);
    let mut correlator = ControlCorrelator::new(timeout);
    let start = Instant::now();

    let (a, mut a_rx) = correlator.issue(ControlKind::Interrupt, start);
    let (b, _) = correlator.issue(ControlKind::Interrupt, start + Duration::from_millis(10));
    let (c, _) = correlator.issue(ControlKind::Interrupt, start + Duration::from_millis(80));

    assert_eq!(correlator.next_deadline(), Some(start + timeout));
    assert!(correlator.expire(start + Duration::from_millis(99)).is_empty());

    let expired = correlator.expire(start + Duration::from_millis(110));
    let ids: Vec<&str> = expired.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec![a.id.as_str(), b.id.as_str()]);
    assert!(expired.iter().all(|r| r.outcome == ControlOutcome::TimedOut));
    assert_eq!(a_rx.try_recv().unwrap(), ControlOutcome::TimedOut);

    assert!(correlator.is_pending(&c.id));
    assert_eq!(
        correlator.next_deadline(),
        Some(start + Duration::from_millis(180))
    );

    // A late answer for a timed-out request is ignored.
    assert!(correlator.resolve(&a.id, ControlOutcome::Success).is_none());
}

#[test]
fn fail_all_drains_the_table() {
    let mut correlator = ControlCorrelator::new(Duration::from_secs(1));
    let now = Instant::now();
    let (_, mut rx) = correlator.issue(mode(PermissionMode::Plan), now);
    correlator.issue(ControlKind::Interrupt, now + Duration::from_millis(1));

    let failed = correlator.fail_all("process exited");

    assert_eq!(failed.len(), 2);
    assert_eq!(failed[0].kind, mode(PermissionMode::Plan));
    assert_eq!(correlator.pending_count(), 0);
    assert_eq!(correlator.next_deadline(), None);
    assert_eq!(
        rx.try_recv().unwrap(),
        ControlOutcome::Failed {
            error: "process exited".into()
        }
    );
}

#[test]
fn dropped_receiver_does_not_prevent_resolution() {
    let mut correlator = ControlCorrelator::new(Duration::from_secs(1));
    let (request, rx) = correlator.issue(ControlKind::Interrupt, Instant::now());
    drop(rx);

    let response = correlator.resolve(&request.id, ControlOutcome::Success);
    assert!(response.is_some());
}

#[test]
fn timeout_is_configurable() {
    let correlator = ControlCorrelator::new(Duration::from_millis(1234));
    assert_eq!(correlator.timeout(), Duration::from_millis(1234));
}

#[test]
fn outcomes_convert_into_typed_errors() {
    assert!(ControlOutcome::Success.into_result("ctl-1").is_ok());
    assert!(matches!(
        ControlOutcome::TimedOut.into_result("ctl-2"),
        Err(AppError::ControlTimeout(msg)) if msg.contains("ctl-2")
    ));
    assert!(matches!(
        ControlOutcome::Failed { error: "nope".into() }.into_result("ctl-3"),
        Err(AppError::Write(msg)) if msg.contains("nope")
    ));
}
