use async_trait::async_trait;
use nimbus_common::bus::{self, RpcMessage};
use nimbus_common::{
    FixedIp, FloatingIp, Instance, InstanceUpdate, KeyPair, Network, NewInstance, NewVolume,
    QuotaOverride, Volume, VolumeUpdate,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod http_images;
pub mod keygen;

#[cfg(any(test, feature = "memory"))]
pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "redis-bus")]
pub mod redis_bus;

// -----------------------------------------------------------------------------
// Errors
// -----------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} {id} already exists")]
    Duplicate { kind: &'static str, id: String },

    #[error("no free fixed address left in network {0}")]
    NoMoreAddresses(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("transport error on {queue}: {message}")]
    Transport { queue: String, message: String },

    #[error("no reply on {queue} after {timeout_secs}s")]
    Timeout { queue: String, timeout_secs: u64 },

    #[error("remote error from {queue}: {message}")]
    Remote { queue: String, message: String },

    #[error("malformed message: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
#[error("key generation failed: {0}")]
pub struct KeyGenError(pub String);

// -----------------------------------------------------------------------------
// Resource store
// -----------------------------------------------------------------------------

/// Durable bookkeeping for everything the controller owns.
/// Every single-record getter returns `StoreError::NotFound` when the row is absent.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    // Instances
    async fn instance_create(&self, new: NewInstance) -> StoreResult<Instance>;
    async fn instance_get(&self, id: Uuid) -> StoreResult<Instance>;
    async fn instance_get_by_ec2_id(&self, ec2_id: &str) -> StoreResult<Instance>;
    async fn instance_get_all(&self) -> StoreResult<Vec<Instance>>;
    async fn instance_get_all_by_tenant(&self, tenant_id: &str) -> StoreResult<Vec<Instance>>;
    async fn instance_get_all_by_reservation(
        &self,
        reservation_id: &str,
    ) -> StoreResult<Vec<Instance>>;
    async fn instance_update(&self, id: Uuid, update: InstanceUpdate) -> StoreResult<()>;
    async fn instance_destroy(&self, id: Uuid) -> StoreResult<()>;
    /// (instance count, total vcpus) of every live record owned by the tenant.
    async fn instance_data_get_for_tenant(&self, tenant_id: &str) -> StoreResult<(i64, i64)>;
    async fn instance_get_fixed_address(&self, id: Uuid) -> StoreResult<Option<String>>;
    async fn instance_get_floating_address(&self, id: Uuid) -> StoreResult<Option<String>>;

    // Volumes
    async fn volume_create(&self, new: NewVolume) -> StoreResult<Volume>;
    async fn volume_get(&self, id: Uuid) -> StoreResult<Volume>;
    async fn volume_get_by_ec2_id(&self, ec2_id: &str) -> StoreResult<Volume>;
    async fn volume_get_all(&self) -> StoreResult<Vec<Volume>>;
    async fn volume_get_all_by_tenant(&self, tenant_id: &str) -> StoreResult<Vec<Volume>>;
    async fn volume_update(&self, id: Uuid, update: VolumeUpdate) -> StoreResult<()>;
    /// Clear the attachment and return the volume to `available`.
    async fn volume_detached(&self, id: Uuid) -> StoreResult<()>;
    /// (volume count, total gigabytes) owned by the tenant.
    async fn volume_data_get_for_tenant(&self, tenant_id: &str) -> StoreResult<(i64, i64)>;

    // Fixed IPs
    async fn fixed_ip_associate(&self, address: &str, instance_id: Uuid) -> StoreResult<FixedIp>;
    async fn fixed_ip_associate_pool(
        &self,
        network_id: Uuid,
        instance_id: Uuid,
    ) -> StoreResult<FixedIp>;
    async fn fixed_ip_set_allocated(&self, address: &str, allocated: bool) -> StoreResult<()>;
    async fn fixed_ip_disassociate(&self, address: &str) -> StoreResult<()>;
    async fn fixed_ip_get_instance(&self, address: &str) -> StoreResult<Option<Instance>>;

    // Floating IPs
    async fn floating_ip_get_by_address(&self, address: &str) -> StoreResult<FloatingIp>;
    async fn floating_ip_get_all(&self) -> StoreResult<Vec<FloatingIp>>;
    async fn floating_ip_get_all_by_tenant(&self, tenant_id: &str) -> StoreResult<Vec<FloatingIp>>;
    async fn floating_ip_count_by_tenant(&self, tenant_id: &str) -> StoreResult<i64>;

    // Networks
    async fn tenant_get_network(&self, tenant_id: &str) -> StoreResult<Network>;
    /// Record `host` only if the network has none yet; returns the host that won.
    async fn network_set_host(&self, network_id: Uuid, host: &str) -> StoreResult<String>;

    // Key pairs
    async fn key_pair_create(&self, key_pair: KeyPair) -> StoreResult<()>;
    async fn key_pair_get(&self, user_id: &str, name: &str) -> StoreResult<KeyPair>;
    async fn key_pair_get_all_by_user(&self, user_id: &str) -> StoreResult<Vec<KeyPair>>;
    async fn key_pair_destroy(&self, user_id: &str, name: &str) -> StoreResult<()>;

    // Quotas
    async fn quota_get(&self, tenant_id: &str) -> StoreResult<Option<QuotaOverride>>;

    fn queue_get_for(&self, topic: &str, host: &str) -> String {
        bus::queue_for(topic, host)
    }
}

// -----------------------------------------------------------------------------
// Message dispatch
// -----------------------------------------------------------------------------

#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Blocking request/reply. Transport failures, timeouts and remote failures are errors.
    async fn call(&self, queue: &str, message: RpcMessage) -> Result<serde_json::Value, DispatchError>;

    /// Fire-and-forget. Returns once the transport accepted the message.
    async fn cast(&self, queue: &str, message: RpcMessage) -> Result<(), DispatchError>;
}

// -----------------------------------------------------------------------------
// Image registry
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    #[serde(alias = "imageId")]
    pub image_id: String,
    #[serde(default, alias = "kernelId")]
    pub kernel_id: Option<String>,
    #[serde(default, alias = "ramdiskId")]
    pub ramdisk_id: Option<String>,
}

#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Visibility-checked lookup; `StoreError::NotFound` when the image is unknown.
    async fn get(&self, image_id: &str) -> StoreResult<ImageInfo>;
}

// -----------------------------------------------------------------------------
// Key generation
// -----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GeneratedKey {
    pub private_key: String,
    pub public_key: String,
    pub fingerprint: String,
}

/// CPU-bound; callers run it on a blocking worker.
pub trait KeyGenerator: Send + Sync + 'static {
    fn generate(&self) -> Result<GeneratedKey, KeyGenError>;
}
