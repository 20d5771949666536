use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

pub mod bus;
pub mod ids;
pub mod instance_types;

pub use instance_types::{InstanceTypeSpec, UnknownInstanceType};

// --- Enums ---

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "volume_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum VolumeStatus {
    Creating,  // Scheduler has not picked a volume host yet
    Available, // Exported and free to attach
    #[sqlx(rename = "in-use")]
    #[serde(rename = "in-use")]
    InUse,
    Deleting,
    Error,
}

impl VolumeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeStatus::Creating => "creating",
            VolumeStatus::Available => "available",
            VolumeStatus::InUse => "in-use",
            VolumeStatus::Deleting => "deleting",
            VolumeStatus::Error => "error",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "attach_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AttachStatus {
    Attached,
    Detached,
}

/// Hypervisor power states reported by compute hosts (`Instance::state`).
pub mod power_state {
    pub const NOSTATE: i32 = 0;
    pub const RUNNING: i32 = 1;
    pub const BLOCKED: i32 = 2;
    pub const PAUSED: i32 = 3;
    pub const SHUTDOWN: i32 = 4;
    pub const SHUTOFF: i32 = 5;
    pub const CRASHED: i32 = 6;
}

// --- Request identity ---

/// Identity of the caller, passed explicitly into every controller operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub tenant_id: String,
    pub user_id: String,
    pub is_admin: bool,
    pub request_id: Uuid,
}

impl RequestContext {
    pub fn new(tenant_id: &str, user_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            user_id: user_id.to_string(),
            is_admin: false,
            request_id: Uuid::new_v4(),
        }
    }

    pub fn admin(tenant_id: &str, user_id: &str) -> Self {
        Self {
            is_admin: true,
            ..Self::new(tenant_id, user_id)
        }
    }
}

// --- Entities (SQLx Mapped) ---

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Instance {
    pub id: Uuid,
    pub ec2_id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub reservation_id: String,
    pub launch_index: i32,

    pub state: i32,
    pub state_description: String,
    pub host: Option<String>, // Set by the scheduler once placed

    pub image_id: String,
    pub kernel_id: String,
    pub ramdisk_id: String,

    pub instance_type: String,
    pub memory_mb: i32,
    pub vcpus: i32,
    pub local_gb: i32,

    pub key_name: Option<String>,
    pub key_data: Option<String>,
    pub user_data: String,
    pub security_group: String,
    pub mac_address: Option<String>,
    pub hostname: Option<String>,

    pub display_name: Option<String>,
    pub display_description: Option<String>,

    pub created_at: DateTime<Utc>,
    pub terminated_at: Option<DateTime<Utc>>,
}

/// Everything the provisioning loop knows before the record exists.
#[derive(Debug, Clone)]
pub struct NewInstance {
    pub ec2_id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub reservation_id: String,
    pub launch_index: i32,
    pub state_description: String,
    pub image_id: String,
    pub kernel_id: String,
    pub ramdisk_id: String,
    pub instance_type: String,
    pub memory_mb: i32,
    pub vcpus: i32,
    pub local_gb: i32,
    pub key_name: Option<String>,
    pub key_data: Option<String>,
    pub user_data: String,
    pub security_group: String,
    pub mac_address: String,
    pub display_name: Option<String>,
    pub display_description: Option<String>,
}

/// Partial instance update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct InstanceUpdate {
    pub display_name: Option<String>,
    pub display_description: Option<String>,
    pub terminated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Volume {
    pub id: Uuid,
    pub ec2_id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub size: i32, // GB
    pub availability_zone: String,

    pub status: VolumeStatus,
    pub attach_status: AttachStatus,
    pub instance_id: Option<Uuid>,
    pub mountpoint: Option<String>,
    pub attach_time: Option<DateTime<Utc>>,
    pub host: Option<String>,

    pub display_name: Option<String>,
    pub display_description: Option<String>,

    pub created_at: DateTime<Utc>,
    pub terminated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewVolume {
    pub ec2_id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub size: i32,
    pub availability_zone: String,
    pub display_name: Option<String>,
    pub display_description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct VolumeUpdate {
    pub display_name: Option<String>,
    pub display_description: Option<String>,
    pub terminated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct FixedIp {
    pub address: String,
    pub network_id: Uuid,
    pub instance_id: Option<Uuid>,
    pub allocated: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct FloatingIp {
    pub address: String,
    pub tenant_id: Option<String>,
    pub fixed_address: Option<String>,
    pub host: Option<String>,
}

/// Per-tenant network. `host` is the sticky network host, empty until first use.
#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Network {
    pub id: Uuid,
    pub tenant_id: String,
    pub cidr: String,
    pub host: Option<String>,
    pub vpn_private_address: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct KeyPair {
    pub user_id: String,
    pub name: String,
    pub public_key: String,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

/// Tenant-specific quota ceilings. Missing columns fall back to configured defaults.
#[derive(Debug, Serialize, Deserialize, Clone, Default, sqlx::FromRow)]
pub struct QuotaOverride {
    pub tenant_id: String,
    pub instances: Option<i64>,
    pub cores: Option<i64>,
    pub volumes: Option<i64>,
    pub gigabytes: Option<i64>,
    pub floating_ips: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_status_serializes_with_hyphen() {
        let s = serde_json::to_string(&VolumeStatus::InUse).unwrap();
        assert_eq!(s, "\"in-use\"");
        assert_eq!(VolumeStatus::InUse.as_str(), "in-use");
        let back: VolumeStatus = serde_json::from_str("\"available\"").unwrap();
        assert_eq!(back, VolumeStatus::Available);
    }

    #[test]
    fn admin_context_keeps_identity() {
        let ctx = RequestContext::admin("proj", "alice");
        assert!(ctx.is_admin);
        assert_eq!(ctx.tenant_id, "proj");
        assert_eq!(ctx.user_id, "alice");
        assert!(!RequestContext::new("proj", "alice").is_admin);
    }
}
