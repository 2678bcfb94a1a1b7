//! Persistent store for managed certificates, accounts, credentials and nodes
//!
//! The engine only needs simple find/create/update semantics, expressed by
//! the [`Store`] trait. [`JsonStore`] keeps every table in memory and, when
//! given a path, rewrites a JSON file atomically after each mutation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use certward_common::{AccountId, CertificateId, CredentialId, NodeId};

use crate::error::StoreError;
use crate::model::{AcmeAccount, AutoCertMode, DnsCredential, ManagedCertificate, Node};

/// Store file name inside the data directory
pub const STORE_FILE: &str = "store.json";

/// Persistence interface consumed by the engine
#[async_trait]
pub trait Store: Send + Sync {
    /// Return the locally managed certificate named `name`, creating an empty
    /// row if absent; copies received through fleet sync never match
    async fn find_or_create_certificate(&self, name: &str) -> Result<ManagedCertificate, StoreError>;

    async fn get_certificate(&self, id: CertificateId) -> Result<Option<ManagedCertificate>, StoreError>;

    /// Certificate keyed by its (name, certificate path, key path) triple
    async fn find_certificate_by_paths(
        &self,
        name: &str,
        certificate_path: &str,
        key_path: &str,
    ) -> Result<Option<ManagedCertificate>, StoreError>;

    async fn list_certificates(&self) -> Result<Vec<ManagedCertificate>, StoreError>;

    /// Insert a new certificate row, assigning its id
    async fn create_certificate(&self, cert: ManagedCertificate) -> Result<ManagedCertificate, StoreError>;

    async fn update_certificate(&self, cert: &ManagedCertificate) -> Result<(), StoreError>;

    /// Replace the stored operation transcript
    async fn set_certificate_log(&self, id: CertificateId, log: &str) -> Result<(), StoreError>;

    async fn delete_certificate(&self, id: CertificateId) -> Result<(), StoreError>;

    async fn get_account(&self, id: AccountId) -> Result<Option<AcmeAccount>, StoreError>;

    async fn find_account(&self, email: &str, ca_directory: &str) -> Result<Option<AcmeAccount>, StoreError>;

    async fn create_account(&self, account: AcmeAccount) -> Result<AcmeAccount, StoreError>;

    async fn update_account(&self, account: &AcmeAccount) -> Result<(), StoreError>;

    async fn get_credential(&self, id: CredentialId) -> Result<Option<DnsCredential>, StoreError>;

    async fn create_credential(&self, credential: DnsCredential) -> Result<DnsCredential, StoreError>;

    /// Nodes among `ids`, in id order; unknown ids are skipped
    async fn list_nodes(&self, ids: &[NodeId]) -> Result<Vec<Node>, StoreError>;

    async fn create_node(&self, node: Node) -> Result<Node, StoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Tables {
    next_id: u64,
    certificates: BTreeMap<u64, ManagedCertificate>,
    accounts: BTreeMap<u64, AcmeAccount>,
    credentials: BTreeMap<u64, DnsCredential>,
    nodes: BTreeMap<u64, Node>,
}

impl Tables {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory store with optional JSON file persistence
#[derive(Debug)]
pub struct JsonStore {
    tables: RwLock<Tables>,
    path: Option<PathBuf>,
}

impl JsonStore {
    /// Store that lives only in memory
    pub fn in_memory() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            path: None,
        }
    }

    /// Open (or create) `<data_dir>/store.json`
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(data_dir, std::fs::Permissions::from_mode(0o700))?;
        }

        let path = data_dir.join(STORE_FILE);
        let tables = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let tables: Tables = serde_json::from_str(&content)?;
            info!(
                path = %path.display(),
                certificates = tables.certificates.len(),
                accounts = tables.accounts.len(),
                "Loaded certificate store"
            );
            tables
        } else {
            debug!(path = %path.display(), "Creating new certificate store");
            Tables::default()
        };

        Ok(Self {
            tables: RwLock::new(tables),
            path: Some(path),
        })
    }

    /// Apply `f` under the write lock and persist the result
    fn mutate<T>(&self, f: impl FnOnce(&mut Tables) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut tables = self.tables.write();
        let value = f(&mut tables)?;
        if let Some(path) = &self.path {
            write_atomic(path, &tables)?;
        }
        Ok(value)
    }
}

fn write_atomic(path: &Path, tables: &Tables) -> Result<(), StoreError> {
    use std::io::Write;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let content = serde_json::to_vec_pretty(tables)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&content)?;
    tmp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600))?;
    }

    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    trace!(path = %path.display(), bytes = content.len(), "Persisted certificate store");
    Ok(())
}

fn is_local_named(cert: &ManagedCertificate, name: &str) -> bool {
    cert.name == name && cert.auto_cert != AutoCertMode::Sync
}

#[async_trait]
impl Store for JsonStore {
    async fn find_or_create_certificate(&self, name: &str) -> Result<ManagedCertificate, StoreError> {
        if let Some(cert) = self
            .tables
            .read()
            .certificates
            .values()
            .find(|c| is_local_named(c, name))
        {
            return Ok(cert.clone());
        }

        self.mutate(|t| {
            // Another task may have created it between the locks
            if let Some(cert) = t.certificates.values().find(|c| is_local_named(c, name)) {
                return Ok(cert.clone());
            }
            let id = t.allocate();
            let now = Utc::now();
            let cert = ManagedCertificate {
                id: CertificateId::new(id),
                name: name.to_string(),
                created_at: Some(now),
                updated_at: Some(now),
                ..Default::default()
            };
            t.certificates.insert(id, cert.clone());
            debug!(certificate = %name, id, "Created managed certificate");
            Ok(cert)
        })
    }

    async fn get_certificate(&self, id: CertificateId) -> Result<Option<ManagedCertificate>, StoreError> {
        Ok(self.tables.read().certificates.get(&id.get()).cloned())
    }

    async fn find_certificate_by_paths(
        &self,
        name: &str,
        certificate_path: &str,
        key_path: &str,
    ) -> Result<Option<ManagedCertificate>, StoreError> {
        Ok(self
            .tables
            .read()
            .certificates
            .values()
            .find(|c| {
                c.name == name
                    && c.ssl_certificate_path == certificate_path
                    && c.ssl_certificate_key_path == key_path
            })
            .cloned())
    }

    async fn list_certificates(&self) -> Result<Vec<ManagedCertificate>, StoreError> {
        Ok(self.tables.read().certificates.values().cloned().collect())
    }

    async fn create_certificate(&self, mut cert: ManagedCertificate) -> Result<ManagedCertificate, StoreError> {
        self.mutate(|t| {
            let id = t.allocate();
            let now = Utc::now();
            cert.id = CertificateId::new(id);
            cert.created_at = Some(now);
            cert.updated_at = Some(now);
            t.certificates.insert(id, cert.clone());
            Ok(cert)
        })
    }

    async fn update_certificate(&self, cert: &ManagedCertificate) -> Result<(), StoreError> {
        self.mutate(|t| {
            let slot = t
                .certificates
                .get_mut(&cert.id.get())
                .ok_or(StoreError::Missing {
                    kind: "certificate",
                    id: cert.id.get(),
                })?;
            *slot = cert.clone();
            slot.updated_at = Some(Utc::now());
            Ok(())
        })
    }

    async fn set_certificate_log(&self, id: CertificateId, log: &str) -> Result<(), StoreError> {
        self.mutate(|t| {
            let cert = t.certificates.get_mut(&id.get()).ok_or(StoreError::Missing {
                kind: "certificate",
                id: id.get(),
            })?;
            cert.log = log.to_string();
            Ok(())
        })
    }

    async fn delete_certificate(&self, id: CertificateId) -> Result<(), StoreError> {
        self.mutate(|t| {
            t.certificates.remove(&id.get());
            Ok(())
        })
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<AcmeAccount>, StoreError> {
        Ok(self.tables.read().accounts.get(&id.get()).cloned())
    }

    async fn find_account(&self, email: &str, ca_directory: &str) -> Result<Option<AcmeAccount>, StoreError> {
        Ok(self
            .tables
            .read()
            .accounts
            .values()
            .find(|a| a.email == email && a.ca_directory == ca_directory)
            .cloned())
    }

    async fn create_account(&self, mut account: AcmeAccount) -> Result<AcmeAccount, StoreError> {
        self.mutate(|t| {
            let id = t.allocate();
            account.id = AccountId::new(id);
            account.created_at = Some(Utc::now());
            t.accounts.insert(id, account.clone());
            Ok(account)
        })
    }

    async fn update_account(&self, account: &AcmeAccount) -> Result<(), StoreError> {
        self.mutate(|t| {
            let slot = t
                .accounts
                .get_mut(&account.id.get())
                .ok_or(StoreError::Missing {
                    kind: "acme account",
                    id: account.id.get(),
                })?;
            *slot = account.clone();
            Ok(())
        })
    }

    async fn get_credential(&self, id: CredentialId) -> Result<Option<DnsCredential>, StoreError> {
        Ok(self.tables.read().credentials.get(&id.get()).cloned())
    }

    async fn create_credential(&self, mut credential: DnsCredential) -> Result<DnsCredential, StoreError> {
        self.mutate(|t| {
            let id = t.allocate();
            credential.id = CredentialId::new(id);
            t.credentials.insert(id, credential.clone());
            Ok(credential)
        })
    }

    async fn list_nodes(&self, ids: &[NodeId]) -> Result<Vec<Node>, StoreError> {
        let tables = self.tables.read();
        let mut nodes: Vec<Node> = ids
            .iter()
            .filter_map(|id| tables.nodes.get(&id.get()).cloned())
            .collect();
        nodes.sort_by_key(|n| n.id);
        nodes.dedup_by_key(|n| n.id);
        Ok(nodes)
    }

    async fn create_node(&self, mut node: Node) -> Result<Node, StoreError> {
        self.mutate(|t| {
            let id = t.allocate();
            node.id = NodeId::new(id);
            t.nodes.insert(id, node.clone());
            Ok(node)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CertificateResource;

    #[tokio::test]
    async fn test_find_or_create_is_idempotent() {
        let store = JsonStore::in_memory();

        let first = store.find_or_create_certificate("example.com").await.unwrap();
        let second = store.find_or_create_certificate("example.com").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.list_certificates().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_find_or_create_skips_synced_copy() {
        let store = JsonStore::in_memory();
        let synced = store
            .create_certificate(ManagedCertificate {
                name: "example.com".into(),
                auto_cert: AutoCertMode::Sync,
                ..Default::default()
            })
            .await
            .unwrap();

        let local = store.find_or_create_certificate("example.com").await.unwrap();

        assert_ne!(local.id, synced.id);
        assert_eq!(store.list_certificates().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_persisted_across_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let id = {
            let store = JsonStore::open(dir.path()).unwrap();
            let mut cert = store.find_or_create_certificate("example.com").await.unwrap();
            cert.domains = vec!["example.com".into()];
            cert.resource = Some(CertificateResource {
                domain: "example.com".into(),
                private_key: vec![0, 1, 2, 255],
                ..Default::default()
            });
            store.update_certificate(&cert).await.unwrap();
            store.set_certificate_log(cert.id, "line one").await.unwrap();
            cert.id
        };

        let store = JsonStore::open(dir.path()).unwrap();
        let cert = store.get_certificate(id).await.unwrap().unwrap();
        assert_eq!(cert.domains, vec!["example.com".to_string()]);
        assert_eq!(cert.log, "line one");
        assert_eq!(cert.resource.unwrap().private_key, vec![0, 1, 2, 255]);
    }

    #[tokio::test]
    async fn test_find_by_paths_and_delete() {
        let store = JsonStore::in_memory();
        let cert = store
            .create_certificate(ManagedCertificate {
                name: "synced".into(),
                ssl_certificate_path: "/etc/nginx/ssl/a/fullchain.cer".into(),
                ssl_certificate_key_path: "/etc/nginx/ssl/a/private.key".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let found = store
            .find_certificate_by_paths(
                "synced",
                "/etc/nginx/ssl/a/fullchain.cer",
                "/etc/nginx/ssl/a/private.key",
            )
            .await
            .unwrap();
        assert_eq!(found.map(|c| c.id), Some(cert.id));

        store.delete_certificate(cert.id).await.unwrap();
        assert!(store.get_certificate(cert.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_row_fails() {
        let store = JsonStore::in_memory();
        let ghost = ManagedCertificate {
            id: CertificateId::new(42),
            ..Default::default()
        };
        assert!(matches!(
            store.update_certificate(&ghost).await,
            Err(StoreError::Missing { id: 42, .. })
        ));
    }

    #[tokio::test]
    async fn test_list_nodes_skips_unknown() {
        let store = JsonStore::in_memory();
        let a = store
            .create_node(Node {
                name: "edge-1".into(),
                enabled: true,
                ..Default::default()
            })
            .await
            .unwrap();

        let nodes = store.list_nodes(&[a.id, NodeId::new(999), a.id]).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name, "edge-1");
    }
}
