//! Certificate operations never overlap

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use certward_engine::gate::GateEvent;
use certward_engine::oplog::OperationLog;
use certward_engine::CertificateRequest;

use common::{Harness, ScriptedAuthority};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_issues_are_serialized() {
    let h = Harness::with_authority(ScriptedAuthority::with_delay(Duration::from_millis(150)));
    let mut events = h.engine.gate().subscribe();

    let mut tasks = Vec::new();
    for name in ["a.example.com", "b.example.com", "c.example.com"] {
        let engine = Arc::clone(&h.engine);
        tasks.push(tokio::spawn(async move {
            engine
                .issue(CertificateRequest::new(vec![name.to_string()]), &OperationLog::discard())
                .await
        }));
    }

    // Someone holds the gate while the CA is busy
    tokio::time::sleep(Duration::from_millis(75)).await;
    assert!(h.engine.gate().is_processing());

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(h.authority.obtains.load(Ordering::SeqCst), 3);
    assert_eq!(h.authority.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(!h.engine.gate().is_processing());

    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        transitions.push(event);
    }
    assert_eq!(transitions.len(), 6);
    for pair in transitions.chunks(2) {
        assert_eq!(pair, [GateEvent::Processing, GateEvent::Idle]);
    }
}

#[tokio::test]
async fn test_failed_operation_releases_gate_for_the_next() {
    let h = Harness::new();
    h.authority.fail_orders.store(true, Ordering::SeqCst);
    assert!(h
        .engine
        .issue(CertificateRequest::new(vec!["example.com".into()]), &OperationLog::discard())
        .await
        .is_err());

    h.authority.fail_orders.store(false, Ordering::SeqCst);
    let issued = tokio::time::timeout(
        Duration::from_secs(5),
        h.engine
            .issue(CertificateRequest::new(vec!["example.com".into()]), &OperationLog::discard()),
    )
    .await
    .expect("gate was left held");
    assert!(issued.is_ok());
}
