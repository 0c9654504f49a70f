//! Tenant listing from the object-storage bucket.

use std::future::Future;
use std::path::PathBuf;

use anyhow::Context;
use compactd_state::{TenantId, is_valid_tenant_id};
use tracing::debug;

/// Lists the tenants present in the bucket.
pub trait TenantLister: Send + Sync {
    fn list_tenants(&self) -> impl Future<Output = anyhow::Result<Vec<TenantId>>> + Send;
}

/// A bucket laid out on a local filesystem: every top-level directory is a
/// tenant. Hidden entries and names unusable as tenant ids are skipped.
#[derive(Debug, Clone)]
pub struct DirectoryTenantLister {
    root: PathBuf,
}

impl DirectoryTenantLister {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

impl TenantLister for DirectoryTenantLister {
    async fn list_tenants(&self) -> anyhow::Result<Vec<TenantId>> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .with_context(|| format!("failed to read bucket dir {}", self.root.display()))?;

        let mut tenants = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') || !is_valid_tenant_id(&name) {
                continue;
            }
            tenants.push(name);
        }
        tenants.sort();
        debug!(root = %self.root.display(), count = tenants.len(), "listed tenants");
        Ok(tenants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_directories_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("tenant-b")).unwrap();
        std::fs::create_dir(dir.path().join("tenant-a")).unwrap();
        std::fs::create_dir(dir.path().join(".tmp")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"not a tenant").unwrap();

        let lister = DirectoryTenantLister::new(dir.path());
        let tenants = lister.list_tenants().await.unwrap();

        assert_eq!(tenants, ["tenant-a", "tenant-b"]);
    }

    #[tokio::test]
    async fn empty_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let lister = DirectoryTenantLister::new(dir.path());
        assert!(lister.list_tenants().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_bucket_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let lister = DirectoryTenantLister::new(dir.path().join("missing"));

        let err = lister.list_tenants().await.unwrap_err();
        assert!(err.to_string().contains("failed to read bucket dir"));
    }
}
