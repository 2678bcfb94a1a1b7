//! Management API
//!
//! HTTP/1.1 over plain TCP or TLS (the hot-reloadable management
//! certificate). Issue and revoke respond with newline-delimited JSON frames
//! as the operation progresses.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, Limited, StreamBody};
use hyper::body::{Frame as BodyFrame, Incoming};
use hyper::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, trace, warn};

use certward_common::CertificateId;

use crate::error::{ServingError, SyncError};
use crate::operations::Engine;
use crate::request::CertificateRequest;
use crate::serving::ServingCertificate;
use crate::session::{Frame, IssueSession, RevokeSession};
use crate::sync::{SyncPayload, SyncReceiver, NODE_SECRET_HEADER, SYNC_PATH};

type Body = UnsyncBoxBody<Bytes, Infallible>;

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// How long shutdown waits for open connections
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Open connection counter used to drain on shutdown
#[derive(Debug, Default)]
struct ConnectionTracker {
    active: AtomicUsize,
}

impl ConnectionTracker {
    fn open(self: &Arc<Self>) -> ConnectionGuard {
        let count = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(active_connections = count, "Connection opened");
        ConnectionGuard(Arc::clone(self))
    }

    async fn wait_for_drain(&self, max: Duration) -> bool {
        let start = Instant::now();
        while self.active.load(Ordering::Relaxed) > 0 {
            if start.elapsed() > max {
                warn!(
                    remaining = self.active.load(Ordering::Relaxed),
                    "Drain timeout reached, connections still open"
                );
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        true
    }
}

struct ConnectionGuard(Arc<ConnectionTracker>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let count = self.0.active.fetch_sub(1, Ordering::Relaxed) - 1;
        trace!(active_connections = count, "Connection closed");
    }
}

struct ApiState {
    engine: Arc<Engine>,
    receiver: Arc<SyncReceiver>,
    token: Option<String>,
}

pub struct ApiServer {
    state: Arc<ApiState>,
    tls: Option<Arc<ServingCertificate>>,
    connections: Arc<ConnectionTracker>,
}

impl ApiServer {
    pub fn new(engine: Arc<Engine>, receiver: Arc<SyncReceiver>, token: Option<String>) -> Self {
        Self {
            state: Arc::new(ApiState {
                engine,
                receiver,
                token: token.filter(|t| !t.is_empty()),
            }),
            tls: None,
            connections: Arc::new(ConnectionTracker::default()),
        }
    }

    pub fn with_tls(mut self, serving: Arc<ServingCertificate>) -> Self {
        self.tls = Some(serving);
        self
    }

    /// Bind `addr`; see [`ApiServer::serve`]
    pub async fn run(self, addr: SocketAddr, shutdown: watch::Receiver<bool>) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Accept connections until `shutdown` flips, then drain
    pub async fn serve(self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> std::io::Result<()> {
        let acceptor = match &self.tls {
            Some(serving) => {
                let config = serving.server_config().map_err(into_io)?;
                Some(TlsAcceptor::from(Arc::new(config)))
            }
            None => None,
        };

        info!(
            address = %listener.local_addr()?,
            tls = acceptor.is_some(),
            "Management API listening"
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept API connection");
                            continue;
                        }
                    };
                    let guard = self.connections.open();
                    let state = Arc::clone(&self.state);
                    let stop = shutdown.clone();
                    match &acceptor {
                        Some(acceptor) => {
                            let acceptor = acceptor.clone();
                            tokio::spawn(async move {
                                let _guard = guard;
                                match acceptor.accept(stream).await {
                                    Ok(tls) => serve_connection(tls, state, peer, stop).await,
                                    Err(e) => debug!(peer = %peer, error = %e, "TLS handshake failed"),
                                }
                            });
                        }
                        None => {
                            tokio::spawn(async move {
                                let _guard = guard;
                                serve_connection(stream, state, peer, stop).await;
                            });
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Management API stopping, draining connections");
        self.connections.wait_for_drain(DRAIN_TIMEOUT).await;
        Ok(())
    }
}

fn into_io(e: ServingError) -> std::io::Error {
    std::io::Error::other(e.to_string())
}

/// Serve one connection; on shutdown, finish the in-flight request and close
async fn serve_connection<S>(stream: S, state: Arc<ApiState>, peer: SocketAddr, mut shutdown: watch::Receiver<bool>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req| {
        let state = Arc::clone(&state);
        async move { Ok::<_, Infallible>(route(state, req).await) }
    });
    let mut conn = std::pin::pin!(http1::Builder::new().serve_connection(TokioIo::new(stream), service));

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown.changed() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = result {
        debug!(peer = %peer, error = %e, "API connection ended with error");
    }
}

async fn route(state: Arc<ApiState>, req: Request<Incoming>) -> Response<Body> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!(method = %method, path = %path, "API request");

    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match (&method, segments.as_slice()) {
        (&Method::GET, ["api", "status"]) => json(
            StatusCode::OK,
            &serde_json::json!({ "processing": state.engine.gate().is_processing() }),
        ),
        (&Method::POST, ["api", "certificates", "issue"]) => {
            if !authorized(&state, &req) {
                return message(StatusCode::UNAUTHORIZED, "unauthorized");
            }
            let request: CertificateRequest = match read_json(req).await {
                Ok(request) => request,
                Err(response) => return response,
            };
            frames(IssueSession::start(Arc::clone(&state.engine), request))
        }
        (&Method::POST, ["api", "certificates", id, "revoke"]) => {
            if !authorized(&state, &req) {
                return message(StatusCode::UNAUTHORIZED, "unauthorized");
            }
            match id.parse::<u64>() {
                Ok(id) => frames(RevokeSession::start(
                    Arc::clone(&state.engine),
                    CertificateId::new(id),
                )),
                Err(_) => message(StatusCode::BAD_REQUEST, "invalid certificate id"),
            }
        }
        (&Method::PUT, _) if path == SYNC_PATH => sync(state, req).await,
        _ => message(StatusCode::NOT_FOUND, "not found"),
    }
}

async fn sync(state: Arc<ApiState>, req: Request<Incoming>) -> Response<Body> {
    let secret = req
        .headers()
        .get(NODE_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let payload: SyncPayload = match read_json(req).await {
        Ok(payload) => payload,
        Err(response) => return response,
    };

    match state.receiver.apply(secret.as_deref(), payload).await {
        Ok(cert) => json(
            StatusCode::OK,
            &serde_json::json!({ "message": "ok", "id": cert.id }),
        ),
        Err(SyncError::Unauthorized) => message(StatusCode::UNAUTHORIZED, "node secret rejected"),
        Err(e @ (SyncError::Sandbox(_) | SyncError::Payload(_))) => {
            message(StatusCode::BAD_REQUEST, &e.to_string())
        }
        Err(e) => {
            warn!(error = %e, "Failed to apply synced certificate");
            message(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

fn authorized(state: &ApiState, req: &Request<Incoming>) -> bool {
    let Some(expected) = &state.token else {
        return true;
    };
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|presented| bool::from(presented.as_bytes().ct_eq(expected.as_bytes())))
        .unwrap_or(false)
}

async fn read_json<T: serde::de::DeserializeOwned>(req: Request<Incoming>) -> Result<T, Response<Body>> {
    let body = Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| message(StatusCode::BAD_REQUEST, &format!("failed to read body: {}", e)))?
        .to_bytes();
    serde_json::from_slice(&body)
        .map_err(|e| message(StatusCode::BAD_REQUEST, &format!("invalid JSON: {}", e)))
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    let body = serde_json::to_vec(value).unwrap_or_default();
    let mut response = Response::new(Full::new(Bytes::from(body)).boxed_unsync());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn message(status: StatusCode, text: &str) -> Response<Body> {
    json(status, &serde_json::json!({ "message": text }))
}

/// Stream session frames as NDJSON
fn frames(rx: mpsc::Receiver<Frame>) -> Response<Body> {
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let frame = rx.recv().await?;
        let mut line = serde_json::to_vec(&frame).unwrap_or_default();
        line.push(b'\n');
        Some((Ok::<_, Infallible>(BodyFrame::data(Bytes::from(line))), rx))
    });

    let mut response = Response::new(StreamBody::new(stream).boxed_unsync());
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/x-ndjson"));
    response
}
