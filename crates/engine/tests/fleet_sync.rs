//! Fleet sync after issuance

mod common;

use certward_engine::error::SyncError;
use certward_engine::model::Node;
use certward_engine::oplog::OperationLog;
use certward_engine::sync::{NODE_SECRET_HEADER, SYNC_PATH};
use certward_engine::{CertificateRequest, Store};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::Harness;

#[tokio::test]
async fn test_issue_pushes_to_every_enabled_node() {
    let h = Harness::new();

    let healthy = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(SYNC_PATH))
        .and(header(NODE_SECRET_HEADER, "edge-1-secret"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&healthy)
        .await;

    let broken = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(SYNC_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("disk full"))
        .expect(1)
        .mount(&broken)
        .await;

    let trailing = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(SYNC_PATH))
        .and(header(NODE_SECRET_HEADER, "edge-3-secret"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&trailing)
        .await;

    let edge1 = h
        .store
        .create_node(Node {
            name: "edge-1".into(),
            url: healthy.uri(),
            token: "edge-1-secret".into(),
            enabled: true,
            ..Default::default()
        })
        .await
        .unwrap();
    let edge2 = h
        .store
        .create_node(Node {
            name: "edge-2".into(),
            url: broken.uri(),
            token: "edge-2-secret".into(),
            enabled: true,
            ..Default::default()
        })
        .await
        .unwrap();
    let edge3 = h
        .store
        .create_node(Node {
            name: "edge-3".into(),
            url: trailing.uri(),
            token: "edge-3-secret".into(),
            enabled: true,
            ..Default::default()
        })
        .await
        .unwrap();
    let parked = h
        .store
        .create_node(Node {
            name: "parked".into(),
            url: "http://127.0.0.1:9".into(),
            enabled: false,
            ..Default::default()
        })
        .await
        .unwrap();

    let mut request = CertificateRequest::new(vec!["example.com".into()]);
    request.sync_node_ids = vec![edge1.id, edge2.id, edge3.id, parked.id];

    let outcome = h.engine.issue(request, &OperationLog::discard()).await.unwrap();
    // Issuance already succeeded and released the gate
    assert!(!h.engine.gate().is_processing());

    let results = outcome.sync.expect("sync task").await.unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].node_id, edge1.id);
    assert!(results[0].is_success());
    assert_eq!(results[1].node_id, edge2.id);
    assert!(matches!(
        &results[1].result,
        Err(SyncError::Status { status: 500, body }) if body == "disk full"
    ));
    // A failing node in the middle does not affect the one after it
    assert_eq!(results[2].node_id, edge3.id);
    assert!(results[2].is_success());

    let mut ok: Vec<String> = h
        .notifier
        .titled("Sync Certificate Success")
        .iter()
        .map(|n| n.render())
        .collect();
    ok.sort();
    assert_eq!(
        ok,
        vec![
            "Sync Certificate example.com to edge-1 successfully".to_string(),
            "Sync Certificate example.com to edge-3 successfully".to_string(),
        ]
    );

    let failed = h.notifier.titled("Sync Certificate Error");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].args.get("env_name").map(String::as_str), Some("edge-2"));
    assert_eq!(failed[0].args.get("status_code").map(String::as_str), Some("500"));
    assert_eq!(failed[0].args.get("response").map(String::as_str), Some("disk full"));

    // Targets are remembered for renewals
    let stored = h
        .store
        .get_certificate(outcome.certificate.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.sync_node_ids.len(), 4);
}

#[tokio::test]
async fn test_no_targets_no_sync() {
    let h = Harness::new();
    let outcome = h
        .engine
        .issue(CertificateRequest::new(vec!["example.com".into()]), &OperationLog::discard())
        .await
        .unwrap();
    assert!(outcome.sync.is_none());
    assert!(h.notifier.sent.lock().is_empty());
}
