//! Interactive issue and revoke sessions
//!
//! A session runs one engine operation and turns it into a stream of
//! [`Frame`]s: an `info` frame per log line, then exactly one terminal
//! `success` or `error` frame. A receiver that goes away stops delivery but
//! never the operation.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use certward_common::CertificateId;

use crate::model::KeyType;
use crate::oplog::{LogSink, OperationLog, LOG_QUEUE_CAPACITY};
use crate::operations::Engine;
use crate::request::CertificateRequest;

/// One message of an interactive session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Frame {
    Info {
        message: String,
    },
    Success {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ssl_certificate: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ssl_certificate_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key_type: Option<KeyType>,
    },
    Error {
        message: String,
    },
}

impl Frame {
    pub fn info(message: impl Into<String>) -> Self {
        Frame::Info {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Frame::Error {
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Frame::Info { .. })
    }
}

/// Run `operation` with a streaming log and return the frame stream
fn spawn_session<F, Fut>(operation: F) -> mpsc::Receiver<Frame>
where
    F: FnOnce(Arc<OperationLog>) -> Fut + Send + 'static,
    Fut: Future<Output = Frame> + Send + 'static,
{
    let (frames, rx) = mpsc::channel(LOG_QUEUE_CAPACITY);
    let (sink, mut lines) = LogSink::channel();
    let log = Arc::new(OperationLog::new(sink));

    let forward_frames = frames.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(line) = lines.recv().await {
            if forward_frames.send(Frame::info(line.to_string())).await.is_err() {
                debug!("Session receiver disconnected, dropping log frames");
                break;
            }
        }
    });

    tokio::spawn(async move {
        let terminal = operation(Arc::clone(&log)).await;
        // Log is closed by now; wait for the queue to drain so the terminal
        // frame comes last
        drop(log);
        if let Err(e) = forwarder.await {
            warn!(error = %e, "Session log forwarder failed");
        }
        if frames.send(terminal).await.is_err() {
            debug!("Session receiver disconnected before the terminal frame");
        }
    });

    rx
}

/// Streamed certificate issuance
pub struct IssueSession;

impl IssueSession {
    pub fn start(engine: Arc<Engine>, request: CertificateRequest) -> mpsc::Receiver<Frame> {
        spawn_session(move |log| async move {
            match engine.issue(request, &log).await {
                Ok(outcome) => {
                    let cert = outcome.certificate;
                    Frame::Success {
                        message: "Issued certificate successfully".into(),
                        ssl_certificate: Some(cert.ssl_certificate_path),
                        ssl_certificate_key: Some(cert.ssl_certificate_key_path),
                        key_type: Some(cert.key_type),
                    }
                }
                Err(e) => Frame::error(e.to_string()),
            }
        })
    }
}

/// Streamed revocation; success removes the managed certificate
pub struct RevokeSession;

impl RevokeSession {
    pub fn start(engine: Arc<Engine>, id: CertificateId) -> mpsc::Receiver<Frame> {
        spawn_session(move |log| async move {
            match engine.revoke(id, &log).await {
                Ok(cert) => match engine.store().delete_certificate(cert.id).await {
                    Ok(()) => Frame::Success {
                        message: "Certificate revoked successfully".into(),
                        ssl_certificate: None,
                        ssl_certificate_key: None,
                        key_type: None,
                    },
                    Err(e) => Frame::error(format!("certificate revoked but its record could not be removed: {}", e)),
                },
                Err(e) => Frame::error(e.to_string()),
            }
        })
    }
}
