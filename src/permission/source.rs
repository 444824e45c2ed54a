//! Authoritative permission data

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;

/// A group a principal has joined
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionGroup {
    pub name: String,
    pub permissions: Vec<String>,
}

impl PermissionGroup {
    pub fn new<I, S>(name: impl Into<String>, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            permissions: permissions.into_iter().map(Into::into).collect(),
        }
    }
}

/// A principal's direct permissions and group memberships
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrincipalRecord {
    pub direct: Vec<String>,
    pub groups: Vec<PermissionGroup>,
}

impl PrincipalRecord {
    /// Direct permissions united with every group's permissions
    pub fn effective_permissions(&self) -> BTreeSet<String> {
        self.direct
            .iter()
            .chain(self.groups.iter().flat_map(|g| g.permissions.iter()))
            .cloned()
            .collect()
    }
}

/// The persistence layer behind the permission cache
///
/// Read-only from the cache's point of view. Whoever writes principal
/// records is responsible for invalidating the cache afterwards.
#[async_trait]
pub trait PermissionSource: Send + Sync {
    /// Load a principal. Unknown principals are `None`.
    async fn principal(&self, uid: u64) -> Result<Option<PrincipalRecord>>;
}

/// In-memory [`PermissionSource`]
#[derive(Debug, Default)]
pub struct MemoryPermissionSource {
    principals: RwLock<HashMap<u64, PrincipalRecord>>,
}

impl MemoryPermissionSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a principal
    pub async fn upsert(&self, uid: u64, record: PrincipalRecord) {
        self.principals.write().await.insert(uid, record);
    }

    /// Remove a principal
    pub async fn remove(&self, uid: u64) -> Option<PrincipalRecord> {
        self.principals.write().await.remove(&uid)
    }
}

#[async_trait]
impl PermissionSource for MemoryPermissionSource {
    async fn principal(&self, uid: u64) -> Result<Option<PrincipalRecord>> {
        Ok(self.principals.read().await.get(&uid).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_permissions() {
        let record = PrincipalRecord {
            direct: vec!["a".into(), "b".into()],
            groups: vec![
                PermissionGroup::new("mods", ["b", "c"]),
                PermissionGroup::new("empty", Vec::<String>::new()),
            ],
        };

        let expected: BTreeSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(record.effective_permissions(), expected);
        assert!(PrincipalRecord::default().effective_permissions().is_empty());
    }

    #[tokio::test]
    async fn test_memory_source() {
        let source = MemoryPermissionSource::new();
        assert_eq!(source.principal(1).await.unwrap(), None);

        source
            .upsert(
                1,
                PrincipalRecord {
                    direct: vec!["a".into()],
                    groups: vec![],
                },
            )
            .await;
        assert!(source.principal(1).await.unwrap().is_some());

        source.remove(1).await;
        assert_eq!(source.principal(1).await.unwrap(), None);
    }
}
