//! redb-backed job persistence for compactd.
//!
//! One database holds every tenant. Tenant records live in `tenants`, jobs
//! in `jobs` under `{tenant}/{job_id}` keys, JSON-serialized into redb's
//! `&[u8]` value columns. Each persister call is a single write
//! transaction, which gives `write_and_delete_jobs` its atomicity. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::{debug, info};

use crate::error::{StateError, StateResult};
use crate::persister::{JobPersistenceManager, JobPersister, RecoveredTenant};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe job store backed by redb.
#[derive(Clone)]
pub struct JobStore {
    db: Arc<Database>,
}

impl JobStore {
    /// Open (or create) a persistent job store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "job store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory job store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory job store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(TENANTS).map_err(map_err!(Table))?;
        txn.open_table(JOBS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Tenants ────────────────────────────────────────────────────

    /// Record a tenant as initialized. Re-initializing keeps the original
    /// record and any jobs already stored.
    pub fn put_tenant(&self, tenant: &str) -> StateResult<()> {
        validate_tenant(tenant)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TENANTS).map_err(map_err!(Table))?;
            let exists = table.get(tenant).map_err(map_err!(Read))?.is_some();
            if !exists {
                let record = TenantRecord {
                    tenant: tenant.to_string(),
                    initialized_at: SystemTime::now(),
                };
                let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                table
                    .insert(tenant, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// List all initialized tenants.
    pub fn list_tenants(&self) -> StateResult<Vec<TenantRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TENANTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: TenantRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Delete a tenant record and all of its jobs in one transaction.
    /// Returns the number of jobs removed.
    pub fn remove_tenant(&self, tenant: &str) -> StateResult<u32> {
        validate_tenant(tenant)?;
        let prefix = tenant_prefix(tenant);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count;
        {
            let mut jobs = txn.open_table(JOBS).map_err(map_err!(Table))?;
            let mut keys = Vec::new();
            for entry in jobs.range(prefix.as_str()..).map_err(map_err!(Read))? {
                let (key, _) = entry.map_err(map_err!(Read))?;
                if !key.value().starts_with(&prefix) {
                    break;
                }
                keys.push(key.value().to_string());
            }
            count = keys.len() as u32;
            for key in &keys {
                jobs.remove(key.as_str()).map_err(map_err!(Write))?;
            }

            let mut tenants = txn.open_table(TENANTS).map_err(map_err!(Table))?;
            tenants.remove(tenant).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(count)
    }

    // ── Jobs ───────────────────────────────────────────────────────

    /// List every persisted job of a tenant.
    pub fn list_jobs(&self, tenant: &str) -> StateResult<Vec<TrackedJob>> {
        validate_tenant(tenant)?;
        let prefix = tenant_prefix(tenant);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let job: TrackedJob =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(job);
        }
        Ok(results)
    }

    /// Write and delete a tenant's jobs in a single transaction.
    pub fn write_and_delete_jobs(
        &self,
        tenant: &str,
        to_write: &[TrackedJob],
        to_delete: &[TrackedJob],
    ) -> StateResult<()> {
        validate_tenant(tenant)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;
            for job in to_delete {
                let key = job_key(tenant, job.id());
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            for job in to_write {
                let key = job_key(tenant, job.id());
                let value = serde_json::to_vec(job).map_err(map_err!(Serialize))?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            %tenant,
            written = to_write.len(),
            deleted = to_delete.len(),
            "jobs stored"
        );
        Ok(())
    }

    /// A persister bound to one tenant's key space.
    pub fn tenant_jobs(&self, tenant: &str) -> StateResult<TenantJobs> {
        validate_tenant(tenant)?;
        Ok(TenantJobs {
            store: self.clone(),
            tenant: tenant.to_string(),
        })
    }
}

fn validate_tenant(tenant: &str) -> StateResult<()> {
    if is_valid_tenant_id(tenant) {
        Ok(())
    } else {
        Err(StateError::InvalidTenant(tenant.to_string()))
    }
}

/// Persister for a single tenant, writing under the `{tenant}/` prefix.
#[derive(Clone)]
pub struct TenantJobs {
    store: JobStore,
    tenant: String,
}

impl TenantJobs {
    pub fn tenant(&self) -> &str {
        &self.tenant
    }
}

impl JobPersister for TenantJobs {
    fn write_and_delete_jobs(&self, to_write: &[TrackedJob], to_delete: &[TrackedJob]) -> StateResult<()> {
        self.store
            .write_and_delete_jobs(&self.tenant, to_write, to_delete)
    }
}

impl JobPersistenceManager for JobStore {
    fn initialize_tenant(&self, tenant: &str) -> StateResult<Arc<dyn JobPersister>> {
        self.put_tenant(tenant)?;
        info!(%tenant, "tenant initialized");
        Ok(Arc::new(self.tenant_jobs(tenant)?))
    }

    fn delete_tenant(&self, tenant: &str) -> StateResult<()> {
        let jobs_removed = self.remove_tenant(tenant)?;
        info!(%tenant, jobs_removed, "tenant deleted");
        Ok(())
    }

    fn recover_tenants(&self) -> StateResult<Vec<RecoveredTenant>> {
        let mut recovered = Vec::new();
        for record in self.list_tenants()? {
            let jobs = self.list_jobs(&record.tenant)?;
            let persister: Arc<dyn JobPersister> = Arc::new(self.tenant_jobs(&record.tenant)?);
            debug!(tenant = %record.tenant, jobs = jobs.len(), "tenant recovered");
            recovered.push(RecoveredTenant::from_jobs(record.tenant, persister, jobs));
        }
        Ok(recovered)
    }
}
