//! Tenant allow-list.

use std::collections::HashSet;

/// Filters which discovered tenants are scheduled.
///
/// An empty enabled set allows every tenant; the disabled set always wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    enabled: HashSet<String>,
    disabled: HashSet<String>,
}

impl AllowList {
    pub fn new<E, D>(enabled: E, disabled: D) -> Self
    where
        E: IntoIterator,
        E::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        Self {
            enabled: enabled.into_iter().map(Into::into).collect(),
            disabled: disabled.into_iter().map(Into::into).collect(),
        }
    }

    /// An allow-list that admits every tenant.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn is_allowed(&self, tenant: &str) -> bool {
        if !self.enabled.is_empty() && !self.enabled.contains(tenant) {
            return false;
        }
        !self.disabled.contains(tenant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allows_everything() {
        let list = AllowList::allow_all();
        assert!(list.is_allowed("anyone"));
    }

    #[test]
    fn enabled_restricts() {
        let list = AllowList::new(["a", "b"], Vec::<String>::new());
        assert!(list.is_allowed("a"));
        assert!(!list.is_allowed("c"));
    }

    #[test]
    fn disabled_wins_over_enabled() {
        let list = AllowList::new(["a", "b"], ["b"]);
        assert!(list.is_allowed("a"));
        assert!(!list.is_allowed("b"));

        let list = AllowList::new(Vec::<String>::new(), ["x"]);
        assert!(list.is_allowed("y"));
        assert!(!list.is_allowed("x"));
    }
}
