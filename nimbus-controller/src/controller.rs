use std::sync::Arc;

use nimbus_backends::{Dispatcher, ImageRegistry, KeyGenerator, ResourceStore};
use nimbus_common::bus::RpcMessage;

use crate::config::ControllerConfig;
use crate::error::ControllerResult;
use crate::keypairs::KeyPairService;
use crate::network::NetworkCoordinator;
use crate::quota::QuotaGate;

/// Entry point for every cloud operation. Holds no per-request state; each
/// call is an independent task against the shared collaborators.
///
/// Operations are grouped by resource in `provisioning`, `termination`,
/// `volumes`, `addresses` and `queries`.
pub struct CloudController {
    pub(crate) store: Arc<dyn ResourceStore>,
    pub(crate) dispatcher: Arc<dyn Dispatcher>,
    pub(crate) images: Arc<dyn ImageRegistry>,
    pub(crate) config: Arc<ControllerConfig>,
    pub(crate) quota: QuotaGate,
    pub(crate) network: NetworkCoordinator,
    pub(crate) keypairs: KeyPairService,
}

impl CloudController {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        dispatcher: Arc<dyn Dispatcher>,
        images: Arc<dyn ImageRegistry>,
        keygen: Arc<dyn KeyGenerator>,
        config: ControllerConfig,
    ) -> Self {
        let config = Arc::new(config);
        let quota = QuotaGate::new(store.clone(), config.quota.clone());
        let network = NetworkCoordinator::new(store.clone(), dispatcher.clone(), config.clone());
        let keypairs = KeyPairService::new(
            store.clone(),
            keygen,
            config.keygen_workers,
            config.vpn_key_suffix.clone(),
        );
        Self {
            store,
            dispatcher,
            images,
            config,
            quota,
            network,
            keypairs,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn quota(&self) -> &QuotaGate {
        &self.quota
    }

    pub fn network(&self) -> &NetworkCoordinator {
        &self.network
    }

    pub fn keypairs(&self) -> &KeyPairService {
        &self.keypairs
    }

    /// Cast to `<topic>.<host>`.
    pub(crate) async fn cast_to_host(
        &self,
        topic: &str,
        host: &str,
        message: RpcMessage,
    ) -> ControllerResult<()> {
        let queue = self.store.queue_get_for(topic, host);
        self.dispatcher.cast(&queue, message).await?;
        Ok(())
    }
}
