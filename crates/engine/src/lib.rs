//! Certward certificate lifecycle engine
//!
//! Turns declarative certificate requests into issued, persisted and
//! fleet-synchronized certificates, and keeps them renewed.
//!
//! # Module Organization
//!
//! - [`operations`]: the [`Engine`] issue/renew/revoke state machine
//! - [`gate`]: process-wide serialization of CA-facing work
//! - [`oplog`]: per-operation log with streaming and persistence
//! - [`challenge`]: HTTP-01 responder and DNS-01 providers
//! - [`authority`]: the CA seam and its ACME implementation
//! - [`renewal`]: periodic renewal sweep
//! - [`sync`]: fleet sync sender and receiver
//! - [`session`], [`api`]: interactive streams and the HTTP surface

pub mod api;
pub mod authority;
pub mod certinfo;
pub mod challenge;
pub mod error;
pub mod gate;
pub mod model;
pub mod notify;
pub mod operations;
pub mod oplog;
pub mod persist;
pub mod reload;
pub mod renewal;
pub mod request;
pub mod sandbox;
pub mod serving;
pub mod session;
pub mod store;
pub mod sync;

pub use error::{EngineError, EngineResult};
pub use gate::Gate;
pub use operations::{Engine, EngineBuilder, IssueOutcome};
pub use oplog::OperationLog;
pub use request::CertificateRequest;
pub use store::{JsonStore, Store};
