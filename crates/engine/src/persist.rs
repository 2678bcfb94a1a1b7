//! Writing issued material to disk
//!
//! Both paths are sandbox-checked before the first filesystem call, so a
//! path that escapes the configuration root performs no I/O at all.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::PersistError;
use crate::model::CertificateResource;
use crate::request::RequestPaths;
use crate::sandbox::ConfRoot;

/// Where material ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFiles {
    pub certificate: PathBuf,
    pub key: PathBuf,
}

/// Write the full chain and key of `resource` to the request's paths
pub fn write_resource(
    root: &ConfRoot,
    paths: &RequestPaths,
    resource: &CertificateResource,
) -> Result<WrittenFiles, PersistError> {
    write_pair(
        root,
        &paths.certificate,
        &paths.key,
        &resource.full_chain(),
        &resource.private_key,
    )
}

/// Write a certificate and key pair, creating parent directories as needed
pub fn write_pair(
    root: &ConfRoot,
    certificate_path: &Path,
    key_path: &Path,
    certificate: &[u8],
    key: &[u8],
) -> Result<WrittenFiles, PersistError> {
    let certificate_path = root.resolve(certificate_path)?;
    let key_path = root.resolve(key_path)?;

    for path in [&certificate_path, &key_path] {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| PersistError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }
    }

    fs::write(&certificate_path, certificate).map_err(|source| PersistError::WriteCertificate {
        path: certificate_path.clone(),
        source,
    })?;

    write_key(&key_path, key).map_err(|source| PersistError::WriteKey {
        path: key_path.clone(),
        source,
    })?;

    debug!(certificate = ?certificate_path, key = ?key_path, "Certificate material written");
    Ok(WrittenFiles {
        certificate: certificate_path,
        key: key_path,
    })
}

fn write_key(path: &Path, key: &[u8]) -> std::io::Result<()> {
    fs::write(path, key)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SandboxError;
    use tempfile::TempDir;

    fn resource() -> CertificateResource {
        CertificateResource {
            domain: "example.com".into(),
            certificate: b"LEAF\n".to_vec(),
            issuer_certificate: b"ISSUER\n".to_vec(),
            private_key: b"KEY\n".to_vec(),
            ..Default::default()
        }
    }

    #[test]
    fn test_writes_chain_and_key() {
        let temp = TempDir::new().unwrap();
        let root = ConfRoot::new(temp.path());
        let dir = root.ssl_dir().join("example.com_P256");
        let paths = RequestPaths {
            certificate: dir.join("fullchain.cer"),
            key: dir.join("private.key"),
            dir,
        };

        let written = write_resource(&root, &paths, &resource()).unwrap();
        assert_eq!(fs::read(&written.certificate).unwrap(), b"LEAF\nISSUER\n");
        assert_eq!(fs::read(&written.key).unwrap(), b"KEY\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&written.key).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        // Second write into the existing directory
        write_resource(&root, &paths, &resource()).unwrap();
    }

    #[test]
    fn test_escape_performs_no_io() {
        let temp = TempDir::new().unwrap();
        let root = ConfRoot::new(temp.path().join("nginx"));
        let outside = temp.path().join("elsewhere");

        let err = write_pair(
            &root,
            &root.path().join("ssl/a/fullchain.cer"),
            &outside.join("private.key"),
            b"c",
            b"k",
        )
        .unwrap_err();

        assert!(matches!(err, PersistError::Sandbox(SandboxError::Escape { .. })));
        assert!(!root.path().exists());
        assert!(!outside.exists());
    }

    #[test]
    fn test_create_dir_failure_is_classified() {
        let temp = TempDir::new().unwrap();
        let root = ConfRoot::new(temp.path());
        // A file where the directory should go
        fs::write(temp.path().join("ssl"), b"").unwrap();

        let err = write_pair(
            &root,
            Path::new("ssl/a/fullchain.cer"),
            Path::new("ssl/a/private.key"),
            b"c",
            b"k",
        )
        .unwrap_err();
        assert!(matches!(err, PersistError::CreateDir { .. }));
    }
}
