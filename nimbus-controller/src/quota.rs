use std::sync::Arc;

use nimbus_backends::ResourceStore;
use nimbus_common::instance_types::InstanceTypeSpec;
use nimbus_common::QuotaOverride;

use crate::config::QuotaDefaults;
use crate::error::ControllerResult;

/// Limits in force for one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantQuota {
    pub instances: i64,
    pub cores: i64,
    pub volumes: i64,
    pub gigabytes: i64,
    pub floating_ips: i64,
}

impl TenantQuota {
    fn resolve(defaults: &QuotaDefaults, over: Option<QuotaOverride>) -> Self {
        let over = over.unwrap_or_default();
        Self {
            instances: over.instances.unwrap_or(defaults.instances),
            cores: over.cores.unwrap_or(defaults.cores),
            volumes: over.volumes.unwrap_or(defaults.volumes),
            gigabytes: over.gigabytes.unwrap_or(defaults.gigabytes),
            floating_ips: over.floating_ips.unwrap_or(defaults.floating_ips),
        }
    }
}

/// Headroom arithmetic, kept free of I/O.
pub fn instance_headroom(
    quota: &TenantQuota,
    used_instances: i64,
    used_cores: i64,
    requested: i64,
    vcpus: i64,
) -> i64 {
    let by_count = quota.instances - used_instances;
    let mut allowed = requested.min(by_count);
    if vcpus > 0 {
        allowed = allowed.min((quota.cores - used_cores).div_euclid(vcpus));
    }
    allowed.max(0)
}

pub fn volume_headroom(
    quota: &TenantQuota,
    used_volumes: i64,
    used_gigabytes: i64,
    requested: i64,
    size: i64,
) -> i64 {
    let mut allowed = requested.min(quota.volumes - used_volumes);
    if size > 0 {
        allowed = allowed.min((quota.gigabytes - used_gigabytes).div_euclid(size));
    }
    allowed.max(0)
}

pub fn floating_ip_headroom(quota: &TenantQuota, used: i64, requested: i64) -> i64 {
    requested.min(quota.floating_ips - used).max(0)
}

/// Advisory admission check. Nothing is reserved; callers act on the answer
/// without holding any lock.
pub struct QuotaGate {
    store: Arc<dyn ResourceStore>,
    defaults: QuotaDefaults,
}

impl QuotaGate {
    pub fn new(store: Arc<dyn ResourceStore>, defaults: QuotaDefaults) -> Self {
        Self { store, defaults }
    }

    pub async fn tenant_quota(&self, tenant_id: &str) -> ControllerResult<TenantQuota> {
        let over = self.store.quota_get(tenant_id).await?;
        Ok(TenantQuota::resolve(&self.defaults, over))
    }

    pub async fn admissible_instances(
        &self,
        tenant_id: &str,
        requested: i64,
        instance_type: &InstanceTypeSpec,
    ) -> ControllerResult<i64> {
        let quota = self.tenant_quota(tenant_id).await?;
        let (used_instances, used_cores) = self.store.instance_data_get_for_tenant(tenant_id).await?;
        Ok(instance_headroom(
            &quota,
            used_instances,
            used_cores,
            requested,
            instance_type.vcpus as i64,
        ))
    }

    pub async fn admissible_volumes(
        &self,
        tenant_id: &str,
        requested: i64,
        size: i64,
    ) -> ControllerResult<i64> {
        let quota = self.tenant_quota(tenant_id).await?;
        let (used_volumes, used_gigabytes) = self.store.volume_data_get_for_tenant(tenant_id).await?;
        Ok(volume_headroom(&quota, used_volumes, used_gigabytes, requested, size))
    }

    pub async fn admissible_floating_ips(
        &self,
        tenant_id: &str,
        requested: i64,
    ) -> ControllerResult<i64> {
        let quota = self.tenant_quota(tenant_id).await?;
        let used = self.store.floating_ip_count_by_tenant(tenant_id).await?;
        Ok(floating_ip_headroom(&quota, used, requested))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> TenantQuota {
        TenantQuota::resolve(&QuotaDefaults::default(), None)
    }

    #[test]
    fn override_fields_fall_back_individually() {
        let q = TenantQuota::resolve(
            &QuotaDefaults::default(),
            Some(QuotaOverride {
                tenant_id: "t".into(),
                cores: Some(4),
                ..Default::default()
            }),
        );
        assert_eq!(q.cores, 4);
        assert_eq!(q.instances, 10);
        assert_eq!(q.gigabytes, 1000);
    }

    #[test]
    fn instances_limited_by_cores() {
        let q = defaults();
        // 20 cores, 8 vcpus each -> 2
        assert_eq!(instance_headroom(&q, 0, 0, 5, 8), 2);
        // 18 cores already used, 1 vcpu each -> 2 left
        assert_eq!(instance_headroom(&q, 3, 18, 5, 1), 2);
    }

    #[test]
    fn instances_limited_by_count() {
        let q = defaults();
        assert_eq!(instance_headroom(&q, 9, 9, 3, 1), 1);
        assert_eq!(instance_headroom(&q, 12, 12, 3, 1), 0);
    }

    #[test]
    fn over_consumed_cores_clamp_to_zero() {
        let q = defaults();
        assert_eq!(instance_headroom(&q, 1, 25, 2, 1), 0);
    }

    #[test]
    fn zero_size_volume_skips_gigabytes() {
        let mut q = defaults();
        q.gigabytes = 0;
        assert_eq!(volume_headroom(&q, 0, 0, 1, 0), 1);
        assert_eq!(volume_headroom(&q, 0, 0, 1, 1), 0);
    }

    #[test]
    fn volume_gigabytes_headroom() {
        let q = defaults();
        assert_eq!(volume_headroom(&q, 2, 900, 3, 50), 2);
        assert_eq!(volume_headroom(&q, 10, 0, 1, 1), 0);
    }

    #[test]
    fn floating_ips_headroom() {
        let mut q = defaults();
        assert_eq!(floating_ip_headroom(&q, 3, 1), 1);
        q.floating_ips = 0;
        assert_eq!(floating_ip_headroom(&q, 0, 1), 0);
    }
}
