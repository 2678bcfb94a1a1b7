//! HTTP-01 challenge support
//!
//! Pending tokens live in a shared [`ChallengeManager`]; the embedded
//! [`Http01Responder`] answers `/.well-known/acme-challenge/<token>` from it.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::ChallengeError;

/// HTTP-01 challenge path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Pending HTTP-01 tokens
///
/// Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct ChallengeManager {
    /// token -> key authorization
    challenges: Arc<DashMap<String, String>>,
}

impl ChallengeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_challenge(&self, token: &str, key_authorization: &str) {
        debug!(token = %token, "Registering HTTP-01 challenge");
        self.challenges
            .insert(token.to_string(), key_authorization.to_string());
    }

    pub fn remove_challenge(&self, token: &str) {
        if self.challenges.remove(token).is_some() {
            debug!(token = %token, "Removed HTTP-01 challenge");
        }
    }

    pub fn get_response(&self, token: &str) -> Option<String> {
        self.challenges.get(token).map(|v| v.clone())
    }

    /// Token from a challenge request path
    pub fn extract_token(path: &str) -> Option<&str> {
        path.strip_prefix(ACME_CHALLENGE_PREFIX)
            .filter(|token| !token.is_empty() && !token.contains('/'))
    }

    pub fn pending_count(&self) -> usize {
        self.challenges.len()
    }
}

/// Embedded responder for HTTP-01 validation requests
#[derive(Debug)]
pub struct Http01Responder {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Http01Responder {
    /// Bind `addr` and start serving tokens from `manager`
    pub async fn start(addr: SocketAddr, manager: ChallengeManager) -> Result<Self, ChallengeError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ChallengeError::Responder(format!("failed to bind {}: {}", addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ChallengeError::Responder(e.to_string()))?;

        info!(address = %local_addr, "HTTP-01 challenge responder listening");

        let task = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept HTTP-01 connection");
                        continue;
                    }
                };
                trace!(peer = %peer, "HTTP-01 connection");

                let manager = manager.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let manager = manager.clone();
                        async move { Ok::<_, Infallible>(respond(&manager, &req)) }
                    });
                    if let Err(e) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        debug!(error = %e, "HTTP-01 connection ended with error");
                    }
                });
            }
        });

        Ok(Self { local_addr, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for Http01Responder {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn respond(manager: &ChallengeManager, req: &Request<Incoming>) -> Response<Full<Bytes>> {
    let found = (req.method() == Method::GET || req.method() == Method::HEAD)
        .then(|| ChallengeManager::extract_token(req.uri().path()))
        .flatten()
        .and_then(|token| manager.get_response(token));

    let (status, body) = match found {
        Some(key_authorization) => (StatusCode::OK, Bytes::from(key_authorization)),
        None => (StatusCode::NOT_FOUND, Bytes::from_static(b"not found")),
    };

    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_get_remove() {
        let manager = ChallengeManager::new();
        manager.add_challenge("tok", "tok.thumb");
        assert_eq!(manager.get_response("tok"), Some("tok.thumb".to_string()));
        assert_eq!(manager.pending_count(), 1);

        manager.remove_challenge("tok");
        assert_eq!(manager.get_response("tok"), None);
    }

    #[test]
    fn test_extract_token() {
        assert_eq!(
            ChallengeManager::extract_token("/.well-known/acme-challenge/abc123"),
            Some("abc123")
        );
        assert_eq!(ChallengeManager::extract_token("/.well-known/acme-challenge/"), None);
        assert_eq!(ChallengeManager::extract_token("/.well-known/acme-challenge/a/b"), None);
        assert_eq!(ChallengeManager::extract_token("/other"), None);
    }

    #[test]
    fn test_clone_shares_state() {
        let a = ChallengeManager::new();
        let b = a.clone();
        a.add_challenge("t", "k");
        assert_eq!(b.get_response("t"), Some("k".to_string()));
    }

    #[tokio::test]
    async fn test_responder_serves_token() {
        let manager = ChallengeManager::new();
        manager.add_challenge("abc", "abc.thumb");

        let responder = Http01Responder::start("127.0.0.1:0".parse().unwrap(), manager.clone())
            .await
            .unwrap();
        let base = format!("http://{}", responder.local_addr());

        let ok = reqwest::get(format!("{}/.well-known/acme-challenge/abc", base))
            .await
            .unwrap();
        assert_eq!(ok.status(), reqwest::StatusCode::OK);
        assert_eq!(ok.text().await.unwrap(), "abc.thumb");

        let missing = reqwest::get(format!("{}/.well-known/acme-challenge/nope", base))
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    }
}
