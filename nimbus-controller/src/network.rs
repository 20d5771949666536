use std::sync::Arc;

use nimbus_backends::{DispatchError, Dispatcher, ResourceStore};
use nimbus_common::bus::{RpcMessage, RpcMethod};
use serde_json::json;
use uuid::Uuid;

use crate::config::ControllerConfig;
use crate::error::{ControllerError, ControllerResult};

/// Fixed-IP bookkeeping done locally, plus routing of floating-IP work to the
/// tenant's network host.
///
/// The network host is assigned lazily: the first operation that needs it asks
/// the well-known network topic to pick one, and the answer is recorded with a
/// compare-and-set so concurrent first requests converge on a single host.
pub struct NetworkCoordinator {
    store: Arc<dyn ResourceStore>,
    dispatcher: Arc<dyn Dispatcher>,
    config: Arc<ControllerConfig>,
}

impl NetworkCoordinator {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        dispatcher: Arc<dyn Dispatcher>,
        config: Arc<ControllerConfig>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            config,
        }
    }

    /// Bind a fixed address from the tenant network to `instance_id` and mark it allocated.
    /// VPN instances always get the network's reserved VPN address.
    pub async fn allocate_fixed_ip(
        &self,
        tenant_id: &str,
        instance_id: Uuid,
        is_vpn: bool,
    ) -> ControllerResult<String> {
        let network = self.store.tenant_get_network(tenant_id).await?;
        let fixed = if is_vpn {
            let address = network.vpn_private_address.as_deref().ok_or_else(|| {
                ControllerError::InvalidState(format!(
                    "network for {} has no VPN address reserved",
                    tenant_id
                ))
            })?;
            self.store.fixed_ip_associate(address, instance_id).await?
        } else {
            self.store
                .fixed_ip_associate_pool(network.id, instance_id)
                .await?
        };
        self.store.fixed_ip_set_allocated(&fixed.address, true).await?;
        tracing::debug!(address = %fixed.address, %instance_id, is_vpn, "fixed ip allocated");
        Ok(fixed.address)
    }

    /// Release locally. Nothing is sent to the network host until the lease
    /// itself expires, which is outside this controller.
    pub async fn deallocate_fixed_ip(&self, address: &str) -> ControllerResult<()> {
        self.store.fixed_ip_set_allocated(address, false).await?;
        self.store.fixed_ip_disassociate(address).await?;
        tracing::debug!(address, "fixed ip deallocated");
        Ok(())
    }

    /// `network.<host>` for the tenant, assigning a host on first use.
    pub async fn network_topic(&self, tenant_id: &str) -> ControllerResult<String> {
        let network = self.store.tenant_get_network(tenant_id).await?;
        let host = match network.host {
            Some(host) => host,
            None => {
                let reply = self
                    .dispatcher
                    .call(
                        &self.config.network_topic,
                        RpcMessage::new(RpcMethod::SetNetworkHost, json!({ "project_id": tenant_id })),
                    )
                    .await?;
                let proposed = reply.as_str().ok_or_else(|| DispatchError::Remote {
                    queue: self.config.network_topic.clone(),
                    message: format!("set_network_host returned {} instead of a host name", reply),
                })?;
                let winner = self.store.network_set_host(network.id, proposed).await?;
                if winner != proposed {
                    tracing::info!(tenant_id, proposed, %winner, "network host already assigned");
                } else {
                    tracing::info!(tenant_id, host = %winner, "network host assigned");
                }
                winner
            }
        };
        Ok(self.store.queue_get_for(&self.config.network_topic, &host))
    }

    pub async fn call(&self, tenant_id: &str, message: RpcMessage) -> ControllerResult<serde_json::Value> {
        let queue = self.network_topic(tenant_id).await?;
        Ok(self.dispatcher.call(&queue, message).await?)
    }

    pub async fn cast(&self, tenant_id: &str, message: RpcMessage) -> ControllerResult<()> {
        let queue = self.network_topic(tenant_id).await?;
        Ok(self.dispatcher.cast(&queue, message).await?)
    }
}
