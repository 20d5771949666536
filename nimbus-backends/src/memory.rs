//! In-process doubles for every collaborator. Used by tests and local runs.

use crate::{
    DispatchError, Dispatcher, GeneratedKey, ImageInfo, ImageRegistry, KeyGenError, KeyGenerator,
    ResourceStore, StoreError, StoreResult,
};
use async_trait::async_trait;
use chrono::Utc;
use nimbus_common::bus::{RpcMessage, RpcMethod};
use nimbus_common::{
    power_state, AttachStatus, FixedIp, FloatingIp, Instance, InstanceUpdate, KeyPair, Network,
    NewInstance, NewVolume, QuotaOverride, Volume, VolumeStatus, VolumeUpdate,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

// -----------------------------------------------------------------------------
// Store
// -----------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    instances: Vec<Instance>,
    volumes: Vec<Volume>,
    fixed_ips: Vec<FixedIp>,
    floating_ips: Vec<FloatingIp>,
    networks: Vec<Network>,
    key_pairs: Vec<KeyPair>,
    quotas: HashMap<String, QuotaOverride>,
}

impl MemoryState {
    fn instance_mut(&mut self, id: Uuid) -> StoreResult<&mut Instance> {
        self.instances
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| StoreError::not_found("instance", id))
    }

    fn volume_mut(&mut self, id: Uuid) -> StoreResult<&mut Volume> {
        self.volumes
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or_else(|| StoreError::not_found("volume", id))
    }

    fn fixed_ip_mut(&mut self, address: &str) -> StoreResult<&mut FixedIp> {
        self.fixed_ips
            .iter_mut()
            .find(|f| f.address == address)
            .ok_or_else(|| StoreError::not_found("fixed_ip", address))
    }

    fn fixed_address_of(&self, instance_id: Uuid) -> Option<String> {
        self.fixed_ips
            .iter()
            .find(|f| f.instance_id == Some(instance_id))
            .map(|f| f.address.clone())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tenant network holding `addresses`; the VPN address, if any, is kept out of the pool.
    pub async fn add_network(
        &self,
        tenant_id: &str,
        cidr: &str,
        vpn_private_address: Option<&str>,
        addresses: &[&str],
    ) -> Uuid {
        let mut state = self.state.lock().await;
        let network_id = Uuid::new_v4();
        state.networks.push(Network {
            id: network_id,
            tenant_id: tenant_id.to_string(),
            cidr: cidr.to_string(),
            host: None,
            vpn_private_address: vpn_private_address.map(str::to_string),
        });
        for address in addresses {
            state.fixed_ips.push(FixedIp {
                address: address.to_string(),
                network_id,
                instance_id: None,
                allocated: false,
            });
        }
        network_id
    }

    pub async fn add_floating_ip(&self, address: &str, tenant_id: Option<&str>) {
        self.state.lock().await.floating_ips.push(FloatingIp {
            address: address.to_string(),
            tenant_id: tenant_id.map(str::to_string),
            fixed_address: None,
            host: None,
        });
    }

    /// What the network host does after `associate_floating_ip`.
    pub async fn bind_floating_ip(&self, floating: &str, fixed: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let fip = state
            .floating_ips
            .iter_mut()
            .find(|f| f.address == floating)
            .ok_or_else(|| StoreError::not_found("floating_ip", floating))?;
        fip.fixed_address = Some(fixed.to_string());
        Ok(())
    }

    pub async fn set_quota(&self, quota: QuotaOverride) {
        self.state
            .lock()
            .await
            .quotas
            .insert(quota.tenant_id.clone(), quota);
    }

    /// What the scheduler does once it places an instance.
    pub async fn set_instance_host(&self, id: Uuid, host: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let instance = state.instance_mut(id)?;
        instance.host = Some(host.to_string());
        instance.state = power_state::RUNNING;
        instance.state_description = "running".to_string();
        Ok(())
    }

    /// What the volume host reports after creating or failing a volume.
    pub async fn set_volume_state(
        &self,
        id: Uuid,
        status: VolumeStatus,
        host: Option<&str>,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let volume = state.volume_mut(id)?;
        volume.status = status;
        if let Some(h) = host {
            volume.host = Some(h.to_string());
        }
        Ok(())
    }

    /// What the compute host does once `attach_volume` completes.
    pub async fn mark_volume_attached(
        &self,
        id: Uuid,
        instance_id: Uuid,
        mountpoint: &str,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let volume = state.volume_mut(id)?;
        volume.status = VolumeStatus::InUse;
        volume.attach_status = AttachStatus::Attached;
        volume.instance_id = Some(instance_id);
        volume.mountpoint = Some(mountpoint.to_string());
        volume.attach_time = Some(Utc::now());
        Ok(())
    }

    pub async fn fixed_ips(&self) -> Vec<FixedIp> {
        self.state.lock().await.fixed_ips.clone()
    }
}

fn sorted(mut instances: Vec<Instance>) -> Vec<Instance> {
    instances.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then(a.reservation_id.cmp(&b.reservation_id))
            .then(a.launch_index.cmp(&b.launch_index))
    });
    instances
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn instance_create(&self, new: NewInstance) -> StoreResult<Instance> {
        let instance = Instance {
            id: Uuid::new_v4(),
            hostname: Some(new.ec2_id.clone()),
            ec2_id: new.ec2_id,
            tenant_id: new.tenant_id,
            user_id: new.user_id,
            reservation_id: new.reservation_id,
            launch_index: new.launch_index,
            state: power_state::NOSTATE,
            state_description: new.state_description,
            host: None,
            image_id: new.image_id,
            kernel_id: new.kernel_id,
            ramdisk_id: new.ramdisk_id,
            instance_type: new.instance_type,
            memory_mb: new.memory_mb,
            vcpus: new.vcpus,
            local_gb: new.local_gb,
            key_name: new.key_name,
            key_data: new.key_data,
            user_data: new.user_data,
            security_group: new.security_group,
            mac_address: Some(new.mac_address),
            display_name: new.display_name,
            display_description: new.display_description,
            created_at: Utc::now(),
            terminated_at: None,
        };
        self.state.lock().await.instances.push(instance.clone());
        Ok(instance)
    }

    async fn instance_get(&self, id: Uuid) -> StoreResult<Instance> {
        self.state
            .lock()
            .await
            .instances
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("instance", id))
    }

    async fn instance_get_by_ec2_id(&self, ec2_id: &str) -> StoreResult<Instance> {
        self.state
            .lock()
            .await
            .instances
            .iter()
            .find(|i| i.ec2_id == ec2_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("instance", ec2_id))
    }

    async fn instance_get_all(&self) -> StoreResult<Vec<Instance>> {
        Ok(sorted(self.state.lock().await.instances.clone()))
    }

    async fn instance_get_all_by_tenant(&self, tenant_id: &str) -> StoreResult<Vec<Instance>> {
        let state = self.state.lock().await;
        Ok(sorted(
            state
                .instances
                .iter()
                .filter(|i| i.tenant_id == tenant_id)
                .cloned()
                .collect(),
        ))
    }

    async fn instance_get_all_by_reservation(
        &self,
        reservation_id: &str,
    ) -> StoreResult<Vec<Instance>> {
        let state = self.state.lock().await;
        Ok(sorted(
            state
                .instances
                .iter()
                .filter(|i| i.reservation_id == reservation_id)
                .cloned()
                .collect(),
        ))
    }

    async fn instance_update(&self, id: Uuid, update: InstanceUpdate) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let instance = state.instance_mut(id)?;
        if let Some(name) = update.display_name {
            instance.display_name = Some(name);
        }
        if let Some(description) = update.display_description {
            instance.display_description = Some(description);
        }
        if let Some(at) = update.terminated_at {
            instance.terminated_at = Some(at);
        }
        Ok(())
    }

    async fn instance_destroy(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let before = state.instances.len();
        state.instances.retain(|i| i.id != id);
        if state.instances.len() == before {
            return Err(StoreError::not_found("instance", id));
        }
        Ok(())
    }

    async fn instance_data_get_for_tenant(&self, tenant_id: &str) -> StoreResult<(i64, i64)> {
        let state = self.state.lock().await;
        Ok(state
            .instances
            .iter()
            .filter(|i| i.tenant_id == tenant_id)
            .fold((0, 0), |(count, cores), i| (count + 1, cores + i.vcpus as i64)))
    }

    async fn instance_get_fixed_address(&self, id: Uuid) -> StoreResult<Option<String>> {
        Ok(self.state.lock().await.fixed_address_of(id))
    }

    async fn instance_get_floating_address(&self, id: Uuid) -> StoreResult<Option<String>> {
        let state = self.state.lock().await;
        let Some(fixed) = state.fixed_address_of(id) else {
            return Ok(None);
        };
        Ok(state
            .floating_ips
            .iter()
            .find(|f| f.fixed_address.as_deref() == Some(fixed.as_str()))
            .map(|f| f.address.clone()))
    }

    async fn volume_create(&self, new: NewVolume) -> StoreResult<Volume> {
        let volume = Volume {
            id: Uuid::new_v4(),
            ec2_id: new.ec2_id,
            tenant_id: new.tenant_id,
            user_id: new.user_id,
            size: new.size,
            availability_zone: new.availability_zone,
            status: VolumeStatus::Creating,
            attach_status: AttachStatus::Detached,
            instance_id: None,
            mountpoint: None,
            attach_time: None,
            host: None,
            display_name: new.display_name,
            display_description: new.display_description,
            created_at: Utc::now(),
            terminated_at: None,
        };
        self.state.lock().await.volumes.push(volume.clone());
        Ok(volume)
    }

    async fn volume_get(&self, id: Uuid) -> StoreResult<Volume> {
        self.state
            .lock()
            .await
            .volumes
            .iter()
            .find(|v| v.id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("volume", id))
    }

    async fn volume_get_by_ec2_id(&self, ec2_id: &str) -> StoreResult<Volume> {
        self.state
            .lock()
            .await
            .volumes
            .iter()
            .find(|v| v.ec2_id == ec2_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("volume", ec2_id))
    }

    async fn volume_get_all(&self) -> StoreResult<Vec<Volume>> {
        Ok(self.state.lock().await.volumes.clone())
    }

    async fn volume_get_all_by_tenant(&self, tenant_id: &str) -> StoreResult<Vec<Volume>> {
        let state = self.state.lock().await;
        Ok(state
            .volumes
            .iter()
            .filter(|v| v.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn volume_update(&self, id: Uuid, update: VolumeUpdate) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let volume = state.volume_mut(id)?;
        if let Some(name) = update.display_name {
            volume.display_name = Some(name);
        }
        if let Some(description) = update.display_description {
            volume.display_description = Some(description);
        }
        if let Some(at) = update.terminated_at {
            volume.terminated_at = Some(at);
        }
        Ok(())
    }

    async fn volume_detached(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let volume = state.volume_mut(id)?;
        volume.status = VolumeStatus::Available;
        volume.attach_status = AttachStatus::Detached;
        volume.instance_id = None;
        volume.mountpoint = None;
        volume.attach_time = None;
        Ok(())
    }

    async fn volume_data_get_for_tenant(&self, tenant_id: &str) -> StoreResult<(i64, i64)> {
        let state = self.state.lock().await;
        Ok(state
            .volumes
            .iter()
            .filter(|v| v.tenant_id == tenant_id)
            .fold((0, 0), |(count, gb), v| (count + 1, gb + v.size as i64)))
    }

    async fn fixed_ip_associate(&self, address: &str, instance_id: Uuid) -> StoreResult<FixedIp> {
        let mut state = self.state.lock().await;
        let fixed = state.fixed_ip_mut(address)?;
        if fixed.instance_id.is_some_and(|bound| bound != instance_id) {
            return Err(StoreError::Duplicate {
                kind: "fixed_ip",
                id: address.to_string(),
            });
        }
        fixed.instance_id = Some(instance_id);
        Ok(fixed.clone())
    }

    async fn fixed_ip_associate_pool(
        &self,
        network_id: Uuid,
        instance_id: Uuid,
    ) -> StoreResult<FixedIp> {
        let mut state = self.state.lock().await;
        let reserved = state
            .networks
            .iter()
            .find(|n| n.id == network_id)
            .ok_or_else(|| StoreError::not_found("network", network_id))?
            .vpn_private_address
            .clone();
        let fixed = state
            .fixed_ips
            .iter_mut()
            .find(|f| {
                f.network_id == network_id
                    && f.instance_id.is_none()
                    && !f.allocated
                    && Some(&f.address) != reserved.as_ref()
            })
            .ok_or(StoreError::NoMoreAddresses(network_id))?;
        fixed.instance_id = Some(instance_id);
        Ok(fixed.clone())
    }

    async fn fixed_ip_set_allocated(&self, address: &str, allocated: bool) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.fixed_ip_mut(address)?.allocated = allocated;
        Ok(())
    }

    async fn fixed_ip_disassociate(&self, address: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.fixed_ip_mut(address)?.instance_id = None;
        Ok(())
    }

    async fn fixed_ip_get_instance(&self, address: &str) -> StoreResult<Option<Instance>> {
        let state = self.state.lock().await;
        let fixed = state
            .fixed_ips
            .iter()
            .find(|f| f.address == address)
            .ok_or_else(|| StoreError::not_found("fixed_ip", address))?;
        Ok(fixed
            .instance_id
            .and_then(|id| state.instances.iter().find(|i| i.id == id).cloned()))
    }

    async fn floating_ip_get_by_address(&self, address: &str) -> StoreResult<FloatingIp> {
        self.state
            .lock()
            .await
            .floating_ips
            .iter()
            .find(|f| f.address == address)
            .cloned()
            .ok_or_else(|| StoreError::not_found("floating_ip", address))
    }

    async fn floating_ip_get_all(&self) -> StoreResult<Vec<FloatingIp>> {
        Ok(self.state.lock().await.floating_ips.clone())
    }

    async fn floating_ip_get_all_by_tenant(&self, tenant_id: &str) -> StoreResult<Vec<FloatingIp>> {
        let state = self.state.lock().await;
        Ok(state
            .floating_ips
            .iter()
            .filter(|f| f.tenant_id.as_deref() == Some(tenant_id))
            .cloned()
            .collect())
    }

    async fn floating_ip_count_by_tenant(&self, tenant_id: &str) -> StoreResult<i64> {
        let state = self.state.lock().await;
        Ok(state
            .floating_ips
            .iter()
            .filter(|f| f.tenant_id.as_deref() == Some(tenant_id))
            .count() as i64)
    }

    async fn tenant_get_network(&self, tenant_id: &str) -> StoreResult<Network> {
        self.state
            .lock()
            .await
            .networks
            .iter()
            .find(|n| n.tenant_id == tenant_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("network", tenant_id))
    }

    async fn network_set_host(&self, network_id: Uuid, host: &str) -> StoreResult<String> {
        let mut state = self.state.lock().await;
        let network = state
            .networks
            .iter_mut()
            .find(|n| n.id == network_id)
            .ok_or_else(|| StoreError::not_found("network", network_id))?;
        Ok(network
            .host
            .get_or_insert_with(|| host.to_string())
            .clone())
    }

    async fn key_pair_create(&self, key_pair: KeyPair) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state
            .key_pairs
            .iter()
            .any(|k| k.user_id == key_pair.user_id && k.name == key_pair.name)
        {
            return Err(StoreError::Duplicate {
                kind: "key_pair",
                id: key_pair.name,
            });
        }
        state.key_pairs.push(key_pair);
        Ok(())
    }

    async fn key_pair_get(&self, user_id: &str, name: &str) -> StoreResult<KeyPair> {
        self.state
            .lock()
            .await
            .key_pairs
            .iter()
            .find(|k| k.user_id == user_id && k.name == name)
            .cloned()
            .ok_or_else(|| StoreError::not_found("key_pair", name))
    }

    async fn key_pair_get_all_by_user(&self, user_id: &str) -> StoreResult<Vec<KeyPair>> {
        let state = self.state.lock().await;
        Ok(state
            .key_pairs
            .iter()
            .filter(|k| k.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn key_pair_destroy(&self, user_id: &str, name: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let before = state.key_pairs.len();
        state
            .key_pairs
            .retain(|k| !(k.user_id == user_id && k.name == name));
        if state.key_pairs.len() == before {
            return Err(StoreError::not_found("key_pair", name));
        }
        Ok(())
    }

    async fn quota_get(&self, tenant_id: &str) -> StoreResult<Option<QuotaOverride>> {
        Ok(self.state.lock().await.quotas.get(tenant_id).cloned())
    }
}

// -----------------------------------------------------------------------------
// Dispatcher
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchKind {
    Call,
    Cast,
}

#[derive(Debug, Clone)]
pub struct Dispatched {
    pub kind: DispatchKind,
    pub queue: String,
    pub message: RpcMessage,
}

/// Records every message and answers `call`s from a per-method reply table.
pub struct MemoryDispatcher {
    sent: Mutex<Vec<Dispatched>>,
    replies: Mutex<HashMap<RpcMethod, serde_json::Value>>,
    failures: Mutex<HashMap<RpcMethod, String>>,
}

impl Default for MemoryDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDispatcher {
    pub const DEFAULT_NETWORK_HOST: &'static str = "network-1";

    pub fn new() -> Self {
        let replies = HashMap::from([
            (
                RpcMethod::SetNetworkHost,
                serde_json::json!(Self::DEFAULT_NETWORK_HOST),
            ),
            (RpcMethod::SetupFixedIp, serde_json::Value::Null),
        ]);
        Self {
            sent: Mutex::new(Vec::new()),
            replies: Mutex::new(replies),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub async fn set_reply(&self, method: RpcMethod, reply: serde_json::Value) {
        self.replies.lock().await.insert(method, reply);
    }

    /// Make every `call` (and `cast`) for `method` fail at the transport level.
    pub async fn fail_method(&self, method: RpcMethod, message: &str) {
        self.failures
            .lock()
            .await
            .insert(method, message.to_string());
    }

    pub async fn recover_method(&self, method: RpcMethod) {
        self.failures.lock().await.remove(&method);
    }

    pub async fn sent(&self) -> Vec<Dispatched> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_with(&self, method: RpcMethod) -> Vec<Dispatched> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|d| d.message.method == method)
            .cloned()
            .collect()
    }

    pub async fn clear(&self) {
        self.sent.lock().await.clear();
    }

    async fn record(&self, kind: DispatchKind, queue: &str, message: RpcMessage) -> Result<(), DispatchError> {
        if let Some(reason) = self.failures.lock().await.get(&message.method) {
            return Err(DispatchError::Transport {
                queue: queue.to_string(),
                message: reason.clone(),
            });
        }
        self.sent.lock().await.push(Dispatched {
            kind,
            queue: queue.to_string(),
            message,
        });
        Ok(())
    }
}

#[async_trait]
impl Dispatcher for MemoryDispatcher {
    async fn call(&self, queue: &str, message: RpcMessage) -> Result<serde_json::Value, DispatchError> {
        let method = message.method;
        self.record(DispatchKind::Call, queue, message).await?;
        Ok(self
            .replies
            .lock()
            .await
            .get(&method)
            .cloned()
            .unwrap_or(serde_json::Value::Null))
    }

    async fn cast(&self, queue: &str, message: RpcMessage) -> Result<(), DispatchError> {
        self.record(DispatchKind::Cast, queue, message).await
    }
}

// -----------------------------------------------------------------------------
// Image registry
// -----------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryImageRegistry {
    images: HashMap<String, ImageInfo>,
}

impl MemoryImageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, image_id: &str, kernel_id: Option<&str>, ramdisk_id: Option<&str>) -> Self {
        self.images.insert(
            image_id.to_string(),
            ImageInfo {
                image_id: image_id.to_string(),
                kernel_id: kernel_id.map(str::to_string),
                ramdisk_id: ramdisk_id.map(str::to_string),
            },
        );
        self
    }
}

#[async_trait]
impl ImageRegistry for MemoryImageRegistry {
    async fn get(&self, image_id: &str) -> StoreResult<ImageInfo> {
        self.images
            .get(image_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("image", image_id))
    }
}

// -----------------------------------------------------------------------------
// Key generation
// -----------------------------------------------------------------------------

/// Deterministic keys: `private-<n>`, `ssh-test public-<n>`, `fp:<n>`.
#[derive(Default)]
pub struct SequentialKeyGenerator {
    next: AtomicU64,
}

impl KeyGenerator for SequentialKeyGenerator {
    fn generate(&self) -> Result<GeneratedKey, KeyGenError> {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        Ok(GeneratedKey {
            private_key: format!("private-{}", n),
            public_key: format!("ssh-test public-{}", n),
            fingerprint: format!("fp:{}", n),
        })
    }
}
