//! Target-file selection for append.
//!
//! Partitions the ledger by calendar month or by tenant. Each partition file
//! is an independent chain; the rotating front-end owns one store per file.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use atomic_core::atomic::Atomic;
use atomic_core::error::Result;
use atomic_core::ids::Cursor;

use crate::store::LedgerStore;

/// How append picks its target file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationStrategy {
    /// `ledger-YYYY-MM.ndjson`, keyed by wall clock.
    Monthly,
    /// `ledger-<tenant>.ndjson`, keyed by `metadata.tenant_id`.
    ByTenant,
}

/// Store front-end that routes appends to the active partition.
pub struct RotatingLedger {
    root: PathBuf,
    strategy: RotationStrategy,
    stores: DashMap<PathBuf, Arc<LedgerStore>>,
}

impl RotatingLedger {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, strategy: RotationStrategy) -> Self {
        Self {
            root: root.into(),
            strategy,
            stores: DashMap::new(),
        }
    }

    /// The partition file an atomic would land in at `now`.
    #[must_use]
    pub fn partition_file(&self, atomic: &Atomic, now: DateTime<Utc>) -> PathBuf {
        let name = match self.strategy {
            RotationStrategy::Monthly => format!("ledger-{}.ndjson", now.format("%Y-%m")),
            RotationStrategy::ByTenant => {
                let tenant = atomic.tenant_id().unwrap_or("default");
                format!("ledger-{}.ndjson", sanitize_partition(tenant))
            }
        };
        self.root.join(name)
    }

    /// The store backing an atomic's partition.
    pub fn store_for(&self, atomic: &Atomic) -> Result<Arc<LedgerStore>> {
        let path = self.partition_file(atomic, Utc::now());
        if let Some(store) = self.stores.get(&path) {
            return Ok(Arc::clone(&store));
        }
        let store = Arc::new(LedgerStore::open(&path)?);
        Ok(Arc::clone(
            self.stores.entry(path).or_insert(store).value(),
        ))
    }

    /// Append into the currently active partition.
    pub fn append(&self, atomic: &Atomic) -> Result<Cursor> {
        self.store_for(atomic)?.append(atomic)
    }
}

/// File-name-safe partition key.
fn sanitize_partition(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomic_core::atomic::{AtomicBuilder, EntityType};
    use tempfile::TempDir;

    fn tenant_atomic(tenant: &str) -> Atomic {
        AtomicBuilder::new(EntityType::File, "subject", "user", "create")
            .tenant_id(tenant)
            .build()
    }

    #[test]
    fn test_monthly_partition_name() {
        let ledger = RotatingLedger::new("/tmp/ledgers", RotationStrategy::Monthly);
        let atomic = tenant_atomic("acme");
        let now: DateTime<Utc> = "2024-03-15T12:00:00Z".parse().unwrap();
        assert_eq!(
            ledger.partition_file(&atomic, now),
            PathBuf::from("/tmp/ledgers/ledger-2024-03.ndjson")
        );
    }

    #[test]
    fn test_tenant_partition_name() {
        let ledger = RotatingLedger::new("/tmp/ledgers", RotationStrategy::ByTenant);
        let now = Utc::now();
        assert_eq!(
            ledger.partition_file(&tenant_atomic("acme"), now),
            PathBuf::from("/tmp/ledgers/ledger-acme.ndjson")
        );
        // No tenant falls back to the default partition.
        let untenanted = AtomicBuilder::new(EntityType::File, "s", "u", "a").build();
        assert_eq!(
            ledger.partition_file(&untenanted, now),
            PathBuf::from("/tmp/ledgers/ledger-default.ndjson")
        );
    }

    #[test]
    fn test_tenant_name_sanitized() {
        let ledger = RotatingLedger::new("/tmp/ledgers", RotationStrategy::ByTenant);
        let hostile = tenant_atomic("../../etc/passwd");
        assert_eq!(
            ledger.partition_file(&hostile, Utc::now()),
            PathBuf::from("/tmp/ledgers/ledger-.._.._etc_passwd.ndjson")
        );
    }

    #[test]
    fn test_tenant_partitions_are_independent_chains() {
        let dir = TempDir::new().unwrap();
        let ledger = RotatingLedger::new(dir.path(), RotationStrategy::ByTenant);
        // Each partition starts its own line count.
        assert_eq!(
            ledger.append(&tenant_atomic("alpha")).unwrap(),
            atomic_core::Cursor::new(1)
        );
        assert_eq!(
            ledger.append(&tenant_atomic("beta")).unwrap(),
            atomic_core::Cursor::new(1)
        );
        assert_eq!(
            ledger.append(&tenant_atomic("alpha")).unwrap(),
            atomic_core::Cursor::new(2)
        );
        assert!(dir.path().join("ledger-alpha.ndjson").exists());
        assert!(dir.path().join("ledger-beta.ndjson").exists());
    }

    #[test]
    fn test_store_reuse_for_same_partition() {
        let dir = TempDir::new().unwrap();
        let ledger = RotatingLedger::new(dir.path(), RotationStrategy::ByTenant);
        let a = ledger.store_for(&tenant_atomic("gamma")).unwrap();
        let b = ledger.store_for(&tenant_atomic("gamma")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
