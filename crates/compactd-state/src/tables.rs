//! redb table definitions for the compactd job store.
//!
//! Job keys follow `{tenant}/{job_id}`; tenant ids never contain `/`, so a
//! tenant's jobs form one contiguous key range.

use redb::TableDefinition;

/// Initialized tenants keyed by `{tenant}`. Values are JSON-encoded
/// `TenantRecord`s.
pub const TENANTS: TableDefinition<&str, &[u8]> = TableDefinition::new("tenants");

/// Tracked jobs keyed by `{tenant}/{job_id}`.
pub const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");

/// Separator between the tenant and job id components of a job key.
pub const KEY_SEPARATOR: char = '/';

/// Build the composite key of a tenant's job.
pub fn job_key(tenant: &str, job_id: &str) -> String {
    format!("{tenant}{KEY_SEPARATOR}{job_id}")
}

/// Prefix shared by every job key of a tenant.
pub fn tenant_prefix(tenant: &str) -> String {
    format!("{tenant}{KEY_SEPARATOR}")
}
