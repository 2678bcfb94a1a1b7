//! Shared types for certward crates.

pub mod ids;

pub use ids::{AccountId, CertificateId, CredentialId, NodeId, OperationId};
