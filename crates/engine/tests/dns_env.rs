//! DNS provider environment scopes never outlive their operation
//!
//! Kept in its own test binary: the live-scope count is process-wide.

mod common;

use std::sync::atomic::Ordering;

use certward_engine::challenge::dns::ProviderEnv;
use certward_engine::error::EngineError;
use certward_engine::model::ChallengeMethod;
use certward_engine::oplog::OperationLog;
use certward_engine::CertificateRequest;

use common::Harness;

#[tokio::test]
async fn test_scopes_released_on_success_and_failure() {
    let h = Harness::new();
    let credential = h.dns_credential().await;

    let dns_request = || {
        let mut request = CertificateRequest::new(vec!["example.com".into()]);
        request.challenge_method = ChallengeMethod::Dns01;
        request.dns_credential_id = Some(credential.id);
        request.disable_cname = true;
        request
    };

    assert_eq!(ProviderEnv::live_scopes(), 0);

    h.engine
        .issue(dns_request(), &OperationLog::discard())
        .await
        .unwrap();
    assert_eq!(ProviderEnv::live_scopes(), 0);

    // Provider refuses the record
    h.dns.fail_create.store(true, Ordering::SeqCst);
    let err = h
        .engine
        .issue(dns_request(), &OperationLog::discard())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Authority(_)));
    assert_eq!(ProviderEnv::live_scopes(), 0);

    // CA rejects the order after the record was published
    h.dns.fail_create.store(false, Ordering::SeqCst);
    h.authority.fail_orders.store(true, Ordering::SeqCst);
    let created_before = h.dns.created.load(Ordering::SeqCst);
    assert!(h
        .engine
        .issue(dns_request(), &OperationLog::discard())
        .await
        .is_err());
    assert_eq!(ProviderEnv::live_scopes(), 0);
    assert_eq!(h.dns.created.load(Ordering::SeqCst), created_before + 1);
    assert!(h.dns.records.lock().is_empty());

    // Unknown credential fails before a scope is bound
    let mut broken = dns_request();
    broken.dns_credential_id = Some(certward_common::CredentialId::new(999));
    assert!(h.engine.issue(broken, &OperationLog::discard()).await.is_err());
    assert_eq!(ProviderEnv::live_scopes(), 0);
}
