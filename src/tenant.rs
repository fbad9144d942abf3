use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::engine::{BusinessHours, Engine};
use crate::limits::*;
use crate::reaper;

/// Manages per-tenant engines. Each tenant gets its own Engine + WAL +
/// reaper + compactor; no data or index is shared across tenants.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    business_hours: BusinessHours,
    compact_threshold: u64,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, business_hours: BusinessHours, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            business_hours,
            compact_threshold,
        }
    }

    /// Get or lazily create an engine for the given tenant. The caller has
    /// already validated that the tenant identifier is present and non-empty.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Sanitize tenant name to prevent path traversal
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let engine = Arc::new(Engine::new(wal_path, self.business_hours)?);

        // Spawn reaper + compactor for this tenant
        let reaper_engine = engine.clone();
        tokio::spawn(async move {
            reaper::run_reaper(reaper_engine).await;
        });
        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            reaper::run_compactor(compactor_engine, threshold).await;
        });

        self.engines.insert(tenant.to_string(), engine.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Availability, HoldRequest};
    use crate::model::*;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotbook_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn now_ms() -> Ms {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as Ms
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let dir = test_data_dir("isolation");
        let tm = TenantManager::new(dir, BusinessHours::DEFAULT, 1000);

        let eng_a = tm.get_or_create("salon_a").unwrap();
        let eng_b = tm.get_or_create("salon_b").unwrap();

        // Same staff id registered in both tenants
        let staff_id = Ulid::new();
        eng_a.register_staff(staff_id, "Robin".into()).await.unwrap();
        eng_b.register_staff(staff_id, "Robin".into()).await.unwrap();

        let now = now_ms();
        let span = Span::new(now + 3_600_000, now + 7_200_000);
        eng_a
            .place_hold(HoldRequest {
                staff_id,
                span,
                client_id: None,
                service_id: None,
            })
            .await
            .unwrap();

        // Tenant A sees the hold, tenant B's window stays free
        let avail_a = eng_a.check_availability(staff_id, span, None).await.unwrap();
        assert!(!avail_a.is_free());
        let avail_b = eng_b.check_availability(staff_id, span, None).await.unwrap();
        assert_eq!(avail_b, Availability::Free);
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = TenantManager::new(dir.clone(), BusinessHours::DEFAULT, 1000);

        // No WAL files should exist yet
        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _eng = tm.get_or_create("my_salon").unwrap();
        assert!(dir.join("my_salon.wal").exists());
    }

    #[tokio::test]
    async fn tenant_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let tm = TenantManager::new(dir, BusinessHours::DEFAULT, 1000);

        let eng1 = tm.get_or_create("foo").unwrap();
        let eng2 = tm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn tenant_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let tm = TenantManager::new(dir.clone(), BusinessHours::DEFAULT, 1000);

        // Path traversal attempt
        let _eng = tm.get_or_create("../evil").unwrap();
        // Should create "evil.wal", not "../evil.wal"
        assert!(dir.join("evil.wal").exists());

        // Empty after sanitization
        let result = tm.get_or_create("../..");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let tm = TenantManager::new(dir, BusinessHours::DEFAULT, 1000);

        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        let result = tm.get_or_create(&long_name);
        assert!(result.is_err());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("tenant name too long"));
    }

    #[tokio::test]
    async fn tenant_count_limit() {
        let dir = test_data_dir("count_limit");
        let tm = TenantManager::new(dir, BusinessHours::DEFAULT, 1000);

        for i in 0..MAX_TENANTS {
            tm.get_or_create(&format!("t{i}")).unwrap();
        }
        let result = tm.get_or_create("one_more");
        assert!(result.is_err());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("too many tenants"));
    }
}
