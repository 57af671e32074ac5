use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::clock::Clock;
use crate::limits::*;
use crate::model::Ms;
use crate::slots::SlotManager;
use crate::store::SlotStore;
use crate::sweeper;

#[derive(Debug, Error)]
pub enum TenantError {
    #[error("tenant name too long")]
    NameTooLong,
    #[error("tenant name must be non-empty and use only letters, digits, '_' or '-'")]
    InvalidName,
    #[error("too many tenants")]
    TooManyTenants,
    #[error("tenant storage: {0}")]
    Io(#[from] std::io::Error),
}

/// Background cadence shared by every tenant.
#[derive(Debug, Clone, Copy)]
pub struct TenantSettings {
    pub hold_ttl_ms: Ms,
    pub sweep_interval: Duration,
    pub compact_threshold: u64,
    pub max_tenants: usize,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            hold_ttl_ms: DEFAULT_HOLD_TTL_MS,
            sweep_interval: Duration::from_secs(30),
            compact_threshold: 1000,
            max_tenants: MAX_TENANTS,
        }
    }
}

/// Per-tenant slot stores. Each tenant gets its own store, WAL file, hold
/// sweeper and compactor, created on first use.
pub struct TenantManager {
    stores: DashMap<String, Arc<SlotStore>>,
    data_dir: PathBuf,
    settings: TenantSettings,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

/// Keep only characters that are safe in a file name.
fn safe_name(tenant: &str) -> String {
    tenant
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

impl TenantManager {
    pub fn new(
        data_dir: PathBuf,
        settings: TenantSettings,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stores: DashMap::new(),
            data_dir,
            settings,
            clock,
            cancel,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn settings(&self) -> TenantSettings {
        self.settings
    }

    /// Already-open store for `tenant`, without creating one.
    pub fn get(&self, tenant: &str) -> Option<Arc<SlotStore>> {
        self.stores.get(tenant).map(|s| s.value().clone())
    }

    /// Get or lazily open the store for `tenant`.
    pub fn get_or_create(&self, tenant: &str) -> Result<Arc<SlotStore>, TenantError> {
        if let Some(store) = self.get(tenant) {
            return Ok(store);
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(TenantError::NameTooLong);
        }
        // Names that need sanitising are refused outright, so two tenants can
        // never share a WAL file.
        let safe_name = safe_name(tenant);
        if safe_name.is_empty() || safe_name != tenant {
            return Err(TenantError::InvalidName);
        }
        if self.stores.len() >= self.settings.max_tenants {
            return Err(TenantError::TooManyTenants);
        }

        // Two requests can race to open the same tenant; the map entry decides
        // which store wins, and only the winner's background tasks are spawned.
        let entry = match self.stores.entry(tenant.to_string()) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(v) => v,
        };
        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let store = Arc::new(SlotStore::open(tenant, &wal_path)?);
        entry.insert(store.clone());
        let active = self.stores.len();

        tokio::spawn(sweeper::run_hold_sweeper(
            self.manager_for(store.clone()),
            self.settings.sweep_interval,
            self.cancel.child_token(),
        ));
        tokio::spawn(sweeper::run_compactor(
            store.clone(),
            self.settings.compact_threshold,
            self.settings.sweep_interval,
            self.cancel.child_token(),
        ));

        info!("opened tenant {tenant} ({} slots replayed)", store.slot_count());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(active as f64);
        Ok(store)
    }

    /// Slot operations bound to `tenant`'s store.
    pub fn slot_manager(&self, tenant: &str) -> Result<SlotManager, TenantError> {
        Ok(self.manager_for(self.get_or_create(tenant)?))
    }

    /// Slot operations for a tenant that is already open.
    pub fn existing_manager(&self, tenant: &str) -> Option<SlotManager> {
        self.get(tenant).map(|store| self.manager_for(store))
    }

    /// Open every tenant that has a WAL file in the data directory.
    pub fn open_existing(&self) -> Result<usize, TenantError> {
        let mut opened = 0;
        for entry in std::fs::read_dir(&self.data_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("wal") {
                continue;
            }
            let Some(tenant) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            self.get_or_create(tenant)?;
            opened += 1;
        }
        Ok(opened)
    }

    fn manager_for(&self, store: Arc<SlotStore>) -> SlotManager {
        SlotManager::new(store, self.clock.clone(), self.settings.hold_ttl_ms)
    }

    pub fn tenant_ids(&self) -> Vec<String> {
        self.stores.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use ulid::Ulid;

    use super::*;
    use crate::clock::SystemClock;
    use crate::model::*;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("drivetime_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manager(dir: PathBuf) -> TenantManager {
        TenantManager::new(
            dir,
            TenantSettings::default(),
            Arc::new(SystemClock),
            CancellationToken::new(),
        )
    }

    fn open_slot(tenant: &str, staff_id: Ulid, start: Ms) -> AvailabilitySlot {
        AvailabilitySlot {
            id: Ulid::new(),
            tenant_id: tenant.into(),
            staff_id,
            span: Span::new(start, start + 30 * MINUTE_MS),
            location_id: None,
            category: None,
            is_available: true,
            reserved_until: None,
            reserved_by_session: None,
        }
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let tm = manager(test_data_dir("isolation"));
        let store_a = tm.get_or_create("school_a").unwrap();
        let store_b = tm.get_or_create("school_b").unwrap();

        let staff = Ulid::new();
        let start = 1_767_261_600_000;
        let slot = open_slot("school_a", staff, start);
        let slot_id = slot.id;
        store_a
            .replace_window(staff, Span::new(start, start + HOUR_MS), vec![slot], start)
            .await
            .unwrap();

        assert!(store_b.get_slot(&slot_id).await.is_none());
        assert!(store_b.staff_ids().is_empty());

        // A manager bound to tenant B refuses to act for tenant A and cannot see A's slot.
        let session = SessionId::parse("cart").unwrap();
        let mgr_b = tm.slot_manager("school_b").unwrap();
        assert!(mgr_b.reserve_slot(slot_id, &session, "school_a").await.is_err());
        assert!(mgr_b.reserve_slot(slot_id, &session, "school_b").await.is_err());
        assert!(store_a.get_slot(&slot_id).await.unwrap().is_available);
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = manager(dir.clone());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
        assert!(tm.get("my_school").is_none());

        let _store = tm.get_or_create("my_school").unwrap();
        assert!(dir.join("my_school.wal").exists());
        assert_eq!(tm.tenant_ids(), vec!["my_school".to_string()]);
    }

    #[tokio::test]
    async fn tenant_same_store_returned() {
        let tm = manager(test_data_dir("same_store"));
        let s1 = tm.get_or_create("foo").unwrap();
        let s2 = tm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&s1, &s2));
    }

    #[tokio::test]
    async fn tenant_names_needing_sanitising_are_refused() {
        let dir = test_data_dir("sanitize");
        let tm = manager(dir.clone());
        assert!(matches!(tm.get_or_create("../evil"), Err(TenantError::InvalidName)));
        assert!(matches!(tm.get_or_create(""), Err(TenantError::InvalidName)));
        assert!(!dir.join("evil.wal").exists());
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let tm = manager(test_data_dir("name_too_long"));
        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        assert!(matches!(tm.get_or_create(&long_name), Err(TenantError::NameTooLong)));
    }

    #[tokio::test]
    async fn tenant_state_survives_reopen() {
        let dir = test_data_dir("reopen");
        let staff = Ulid::new();
        let start = 1_767_261_600_000;
        {
            let tm = manager(dir.clone());
            let store = tm.get_or_create("school").unwrap();
            store
                .replace_window(
                    staff,
                    Span::new(start, start + HOUR_MS),
                    vec![open_slot("school", staff, start)],
                    start,
                )
                .await
                .unwrap();
        }
        let tm = manager(dir);
        assert_eq!(tm.get_or_create("school").unwrap().slot_count(), 1);
    }

    #[tokio::test]
    async fn open_existing_reopens_every_wal() {
        let dir = test_data_dir("open_existing");
        {
            let tm = manager(dir.clone());
            tm.get_or_create("north").unwrap();
            tm.get_or_create("south").unwrap();
        }
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let tm = manager(dir);
        assert_eq!(tm.open_existing().unwrap(), 2);
        let mut ids = tm.tenant_ids();
        ids.sort();
        assert_eq!(ids, vec!["north".to_string(), "south".to_string()]);
        assert!(tm.existing_manager("north").is_some());
        assert!(tm.existing_manager("east").is_none());
    }

    #[tokio::test]
    async fn tenant_count_limit() {
        let tm = TenantManager::new(
            test_data_dir("count_limit"),
            TenantSettings { max_tenants: 3, ..Default::default() },
            Arc::new(SystemClock),
            CancellationToken::new(),
        );
        for i in 0..3 {
            tm.get_or_create(&format!("t{i}")).unwrap();
        }
        assert!(matches!(tm.get_or_create("one_more"), Err(TenantError::TooManyTenants)));
    }
}
