//! Fleet sync
//!
//! The sender pushes fresh material to every enabled node concurrently, one
//! task per node, each under its own deadline. Results are reported per node
//! and never affect each other. The receiver applies a pushed payload on the
//! target node.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use certward_common::NodeId;

use crate::error::SyncError;
use crate::model::{AutoCertMode, KeyType, ManagedCertificate, Node};
use crate::notify::{Notification, Notifier};
use crate::persist::write_pair;
use crate::reload::ProxyReloader;
use crate::sandbox::ConfRoot;
use crate::store::Store;

/// Path of the receiving endpoint on every node
pub const SYNC_PATH: &str = "/api/certificates/sync";

/// Header carrying the node's shared secret
pub const NODE_SECRET_HEADER: &str = "X-Node-Secret";

/// Material pushed to a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPayload {
    pub name: String,
    pub ssl_certificate_path: String,
    pub ssl_certificate_key_path: String,
    /// PEM full chain
    pub ssl_certificate: String,
    /// PEM private key
    pub ssl_certificate_key: String,
    pub key_type: KeyType,
}

/// Result of one push
#[derive(Debug)]
pub struct SyncOutcome {
    pub node_id: NodeId,
    pub node_name: String,
    pub result: Result<(), SyncError>,
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Pushes material to remote nodes
#[derive(Clone)]
pub struct FleetSync {
    client: reqwest::Client,
    timeout: Duration,
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for FleetSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetSync").field("timeout", &self.timeout).finish()
    }
}

impl FleetSync {
    pub fn new(timeout: Duration, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
            notifier,
        }
    }

    /// Push `payload` to every enabled node and collect one outcome per node
    pub async fn push(&self, cert_name: &str, nodes: Vec<Node>, payload: SyncPayload) -> Vec<SyncOutcome> {
        let payload = Arc::new(payload);
        let mut tasks = JoinSet::new();

        for node in nodes.into_iter().filter(|n| n.enabled) {
            let client = self.client.clone();
            let payload = Arc::clone(&payload);
            let deadline = self.timeout;

            tasks.spawn(async move {
                let result = match tokio::time::timeout(deadline, push_one(&client, &node, &payload)).await {
                    Ok(result) => result,
                    Err(_) => Err(SyncError::Timeout(deadline)),
                };
                SyncOutcome {
                    node_id: node.id,
                    node_name: node.name,
                    result,
                }
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    self.report(cert_name, &outcome);
                    outcomes.push(outcome);
                }
                Err(e) => warn!(error = %e, "Sync task did not complete"),
            }
        }

        outcomes.sort_by_key(|o| o.node_id);
        outcomes
    }

    fn report(&self, cert_name: &str, outcome: &SyncOutcome) {
        let notification = match &outcome.result {
            Ok(()) => {
                info!(cert = %cert_name, node = %outcome.node_name, "Certificate synced");
                Notification::success(
                    "Sync Certificate Success",
                    "Sync Certificate {cert_name} to {env_name} successfully",
                )
            }
            Err(e) => {
                warn!(cert = %cert_name, node = %outcome.node_name, error = %e, "Certificate sync failed");
                let n = Notification::error(
                    "Sync Certificate Error",
                    "Sync Certificate {cert_name} to {env_name} failed: {error}",
                )
                .arg("error", e);
                match e {
                    SyncError::Status { status, body } => n.arg("status_code", status).arg("response", body),
                    _ => n,
                }
            }
        };
        self.notifier.notify(
            notification
                .arg("cert_name", cert_name)
                .arg("env_name", &outcome.node_name),
        );
    }
}

async fn push_one(client: &reqwest::Client, node: &Node, payload: &SyncPayload) -> Result<(), SyncError> {
    let url = format!("{}{}", node.url.trim_end_matches('/'), SYNC_PATH);
    debug!(node = %node.name, url = %url, "Pushing certificate");

    let response = client
        .put(&url)
        .header(NODE_SECRET_HEADER, &node.token)
        .json(payload)
        .send()
        .await
        .map_err(|e| SyncError::Transport(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Applies pushed material on the receiving node
pub struct SyncReceiver {
    root: ConfRoot,
    secret: Option<String>,
    store: Arc<dyn Store>,
    reloader: Arc<dyn ProxyReloader>,
}

impl SyncReceiver {
    pub fn new(
        root: ConfRoot,
        secret: Option<String>,
        store: Arc<dyn Store>,
        reloader: Arc<dyn ProxyReloader>,
    ) -> Self {
        Self {
            root,
            secret,
            store,
            reloader,
        }
    }

    fn authorize(&self, presented: Option<&str>) -> Result<(), SyncError> {
        let expected = self
            .secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(SyncError::Unauthorized)?;
        let presented = presented.ok_or(SyncError::Unauthorized)?;
        if bool::from(expected.as_bytes().ct_eq(presented.as_bytes())) {
            Ok(())
        } else {
            Err(SyncError::Unauthorized)
        }
    }

    /// Write the payload and upsert its managed certificate
    pub async fn apply(&self, secret: Option<&str>, payload: SyncPayload) -> Result<ManagedCertificate, SyncError> {
        self.authorize(secret)?;

        if payload.name.trim().is_empty() {
            return Err(SyncError::Payload("certificate name is empty".into()));
        }
        if payload.ssl_certificate.is_empty() || payload.ssl_certificate_key.is_empty() {
            return Err(SyncError::Payload("certificate or key content is empty".into()));
        }

        let cert_path = self.root.resolve(&payload.ssl_certificate_path)?;
        let key_path = self.root.resolve(&payload.ssl_certificate_key_path)?;

        write_pair(
            &self.root,
            &cert_path,
            &key_path,
            payload.ssl_certificate.as_bytes(),
            payload.ssl_certificate_key.as_bytes(),
        )?;

        let cert_path = cert_path.to_string_lossy().into_owned();
        let key_path = key_path.to_string_lossy().into_owned();

        let existing = self
            .store
            .find_certificate_by_paths(&payload.name, &cert_path, &key_path)
            .await?;
        let cert = match existing {
            Some(mut cert) => {
                cert.auto_cert = AutoCertMode::Sync;
                cert.key_type = payload.key_type;
                cert.updated_at = Some(Utc::now());
                self.store.update_certificate(&cert).await?;
                cert
            }
            None => {
                self.store
                    .create_certificate(ManagedCertificate {
                        name: payload.name.clone(),
                        ssl_certificate_path: cert_path,
                        ssl_certificate_key_path: key_path,
                        auto_cert: AutoCertMode::Sync,
                        key_type: payload.key_type,
                        created_at: Some(Utc::now()),
                        updated_at: Some(Utc::now()),
                        ..Default::default()
                    })
                    .await?
            }
        };

        let outcome = self.reloader.reload().await;
        if !outcome.is_ok() {
            warn!(severity = %outcome.severity, output = %outcome.output, "Reload after sync reported a failure");
        }

        info!(cert = %cert.name, id = %cert.id, "Synced certificate applied");
        Ok(cert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ChannelNotifier;
    use crate::reload::NoopReloader;
    use crate::store::JsonStore;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn payload(root: &ConfRoot) -> SyncPayload {
        SyncPayload {
            name: "example.com".into(),
            ssl_certificate_path: root.path().join("ssl/example.com/fullchain.cer").display().to_string(),
            ssl_certificate_key_path: root.path().join("ssl/example.com/private.key").display().to_string(),
            ssl_certificate: "CERT".into(),
            ssl_certificate_key: "KEY".into(),
            key_type: KeyType::EcP256,
        }
    }

    fn receiver(root: &ConfRoot, store: Arc<JsonStore>) -> SyncReceiver {
        SyncReceiver::new(root.clone(), Some("s3cret".into()), store, Arc::new(NoopReloader))
    }

    #[tokio::test]
    async fn test_receiver_upserts_by_paths() {
        let temp = TempDir::new().unwrap();
        let root = ConfRoot::new(temp.path());
        let store = Arc::new(JsonStore::in_memory());
        let receiver = receiver(&root, store.clone());

        let first = receiver.apply(Some("s3cret"), payload(&root)).await.unwrap();
        let second = receiver.apply(Some("s3cret"), payload(&root)).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.auto_cert, AutoCertMode::Sync);
        assert_eq!(store.list_certificates().await.unwrap().len(), 1);

        let written = std::fs::read_to_string(temp.path().join("ssl/example.com/fullchain.cer")).unwrap();
        assert_eq!(written, "CERT");
    }

    #[tokio::test]
    async fn test_receiver_rejects_bad_secret() {
        let temp = TempDir::new().unwrap();
        let root = ConfRoot::new(temp.path());
        let receiver = receiver(&root, Arc::new(JsonStore::in_memory()));

        assert!(matches!(
            receiver.apply(Some("wrong"), payload(&root)).await,
            Err(SyncError::Unauthorized)
        ));
        assert!(matches!(
            receiver.apply(None, payload(&root)).await,
            Err(SyncError::Unauthorized)
        ));
        assert!(!temp.path().join("ssl").exists());
    }

    #[tokio::test]
    async fn test_receiver_rejects_escape() {
        let temp = TempDir::new().unwrap();
        let root = ConfRoot::new(temp.path().join("nginx"));
        let receiver = receiver(&root, Arc::new(JsonStore::in_memory()));

        let mut bad = payload(&root);
        bad.ssl_certificate_key_path = "../../outside/private.key".into();
        assert!(matches!(
            receiver.apply(Some("s3cret"), bad).await,
            Err(SyncError::Sandbox(_))
        ));
        assert!(!root.path().exists());
    }

    #[tokio::test]
    async fn test_push_reports_each_node() {
        let ok = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(SYNC_PATH))
            .and(header(NODE_SECRET_HEADER, "t1"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&ok)
            .await;

        let failing = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(SYNC_PATH))
            .respond_with(ResponseTemplate::new(500).set_body_string("disk full"))
            .mount(&failing)
            .await;

        let channel = Arc::new(ChannelNotifier::new(16));
        let mut rx = channel.subscribe();
        let sync = FleetSync::new(Duration::from_secs(5), channel);

        let nodes = vec![
            Node {
                id: NodeId::new(1),
                name: "edge-1".into(),
                url: ok.uri(),
                token: "t1".into(),
                enabled: true,
            },
            Node {
                id: NodeId::new(2),
                name: "edge-2".into(),
                url: failing.uri(),
                token: "t2".into(),
                enabled: true,
            },
            Node {
                id: NodeId::new(3),
                name: "edge-3".into(),
                url: "http://127.0.0.1:1".into(),
                token: "t3".into(),
                enabled: false,
            },
        ];

        let root = ConfRoot::new("/etc/nginx");
        let outcomes = sync.push("example.com", nodes, payload(&root)).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].is_success());
        assert!(matches!(
            outcomes[1].result,
            Err(SyncError::Status { status: 500, ref body }) if body == "disk full"
        ));

        let mut rendered = vec![rx.recv().await.unwrap().render(), rx.recv().await.unwrap().render()];
        rendered.sort();
        assert_eq!(rendered[0], "Sync Certificate example.com to edge-1 successfully");
        assert!(rendered[1].starts_with("Sync Certificate example.com to edge-2 failed"));
    }
}
