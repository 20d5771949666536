use std::time::Duration;

/// Per-tenant limits applied when the store carries no override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaDefaults {
    pub instances: i64,
    pub cores: i64,
    pub volumes: i64,
    pub gigabytes: i64,
    pub floating_ips: i64,
}

impl Default for QuotaDefaults {
    fn default() -> Self {
        Self {
            instances: 10,
            cores: 20,
            volumes: 10,
            gigabytes: 1000,
            floating_ips: 10,
        }
    }
}

/// Everything the controller reads from its environment, resolved once at startup
/// and handed to each component.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub scheduler_topic: String,
    pub compute_topic: String,
    pub network_topic: String,
    pub volume_topic: String,
    pub vpn_image_id: String,
    pub vpn_key_suffix: String,
    pub default_kernel: String,
    pub default_ramdisk: String,
    pub storage_availability_zone: String,
    pub ec2_url: String,
    /// `name=url` entries; empty means a single local region.
    pub region_list: Vec<String>,
    pub quota: QuotaDefaults,
    pub keygen_workers: usize,
    pub call_timeout: Duration,
    pub listen_addr: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            scheduler_topic: "scheduler".to_string(),
            compute_topic: "compute".to_string(),
            network_topic: "network".to_string(),
            volume_topic: "volume".to_string(),
            vpn_image_id: "ami-cloudpipe".to_string(),
            vpn_key_suffix: "-vpn".to_string(),
            default_kernel: "aki-11111".to_string(),
            default_ramdisk: "ari-11111".to_string(),
            storage_availability_zone: "nova".to_string(),
            ec2_url: "http://127.0.0.1:8773/services/Cloud".to_string(),
            region_list: Vec::new(),
            quota: QuotaDefaults::default(),
            keygen_workers: 4,
            call_timeout: Duration::from_secs(60),
            listen_addr: "0.0.0.0:8773".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Overlay `NIMBUS_*` environment variables on the defaults.
    /// Unparseable numbers keep their default and log a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let text = |key: &str, default: String| -> String {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
        };
        let number = |key: &str, default: i64| -> i64 {
            match lookup(key).map(|v| v.trim().parse::<i64>()) {
                Some(Ok(v)) => v,
                Some(Err(_)) => {
                    tracing::warn!(key, default, "ignoring non-numeric config value");
                    default
                }
                None => default,
            }
        };

        let region_list = lookup("NIMBUS_REGION_LIST")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            scheduler_topic: text("NIMBUS_SCHEDULER_TOPIC", d.scheduler_topic),
            compute_topic: text("NIMBUS_COMPUTE_TOPIC", d.compute_topic),
            network_topic: text("NIMBUS_NETWORK_TOPIC", d.network_topic),
            volume_topic: text("NIMBUS_VOLUME_TOPIC", d.volume_topic),
            vpn_image_id: text("NIMBUS_VPN_IMAGE_ID", d.vpn_image_id),
            vpn_key_suffix: text("NIMBUS_VPN_KEY_SUFFIX", d.vpn_key_suffix),
            default_kernel: text("NIMBUS_DEFAULT_KERNEL", d.default_kernel),
            default_ramdisk: text("NIMBUS_DEFAULT_RAMDISK", d.default_ramdisk),
            storage_availability_zone: text(
                "NIMBUS_STORAGE_AVAILABILITY_ZONE",
                d.storage_availability_zone,
            ),
            ec2_url: text("NIMBUS_EC2_URL", d.ec2_url),
            region_list,
            quota: QuotaDefaults {
                instances: number("NIMBUS_QUOTA_INSTANCES", d.quota.instances),
                cores: number("NIMBUS_QUOTA_CORES", d.quota.cores),
                volumes: number("NIMBUS_QUOTA_VOLUMES", d.quota.volumes),
                gigabytes: number("NIMBUS_QUOTA_GIGABYTES", d.quota.gigabytes),
                floating_ips: number("NIMBUS_QUOTA_FLOATING_IPS", d.quota.floating_ips),
            },
            keygen_workers: number("NIMBUS_KEYGEN_WORKERS", d.keygen_workers as i64).max(1)
                as usize,
            call_timeout: Duration::from_secs(
                number("NIMBUS_CALL_TIMEOUT_SECS", d.call_timeout.as_secs() as i64).max(1) as u64,
            ),
            listen_addr: text("NIMBUS_LISTEN_ADDR", d.listen_addr),
        }
    }
}
