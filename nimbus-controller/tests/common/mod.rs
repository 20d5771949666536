// Shared fixtures: a controller wired to the in-memory backends.
#![allow(dead_code)]

use std::sync::Arc;

use nimbus_backends::memory::{
    MemoryDispatcher, MemoryImageRegistry, MemoryStore, SequentialKeyGenerator,
};
use nimbus_backends::ResourceStore;
use nimbus_common::{Instance, QuotaOverride, RequestContext};
use nimbus_controller::{CloudController, ControllerConfig, RunInstancesRequest};
use uuid::Uuid;

pub const TENANT: &str = "tenant-a";
pub const USER: &str = "alice";
pub const IMAGE: &str = "ami-00000001";
pub const KERNEL: &str = "aki-00000001";
pub const RAMDISK: &str = "ari-00000001";
pub const VPN_ADDRESS: &str = "10.0.0.2";
pub const POOL: &[&str] = &["10.0.0.2", "10.0.0.3", "10.0.0.4", "10.0.0.5", "10.0.0.6"];

pub struct Harness {
    pub controller: Arc<CloudController>,
    pub store: Arc<MemoryStore>,
    pub dispatcher: Arc<MemoryDispatcher>,
    pub network_id: Uuid,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(ControllerConfig::default()).await
    }

    pub async fn with_config(config: ControllerConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(MemoryDispatcher::new());
        let images = MemoryImageRegistry::new()
            .with_image(IMAGE, Some(KERNEL), Some(RAMDISK))
            .with_image(KERNEL, None, None)
            .with_image(RAMDISK, None, None)
            .with_image("aki-11111", None, None)
            .with_image("ari-11111", None, None)
            .with_image("ami-nokernel", Some("aki-missing"), None);
        let network_id = store
            .add_network(TENANT, "10.0.0.0/24", Some(VPN_ADDRESS), POOL)
            .await;

        let controller = Arc::new(CloudController::new(
            store.clone(),
            dispatcher.clone(),
            Arc::new(images),
            Arc::new(SequentialKeyGenerator::default()),
            config,
        ));
        Self {
            controller,
            store,
            dispatcher,
            network_id,
        }
    }

    pub async fn set_quota(&self, quota: QuotaOverride) {
        self.store.set_quota(quota).await;
    }

    /// Launch `count` instances of `IMAGE` and return them as stored.
    pub async fn launch(&self, ctx: &RequestContext, count: i64) -> Vec<Instance> {
        let reservation = self
            .controller
            .run_instances(
                ctx,
                RunInstancesRequest {
                    max_count: Some(count),
                    ..RunInstancesRequest::new(IMAGE)
                },
            )
            .await
            .expect("run_instances");
        let mut out = Vec::new();
        for view in reservation.instances {
            out.push(
                self.store
                    .instance_get_by_ec2_id(&view.instance_id)
                    .await
                    .expect("instance stored"),
            );
        }
        out
    }

    /// Launch one instance and place it on `host` the way the scheduler would.
    pub async fn launch_on(&self, ctx: &RequestContext, host: &str) -> Instance {
        let instance = self.launch(ctx, 1).await.remove(0);
        self.store
            .set_instance_host(instance.id, host)
            .await
            .expect("set host");
        self.store.instance_get(instance.id).await.expect("instance")
    }
}

pub fn ctx() -> RequestContext {
    RequestContext::new(TENANT, USER)
}

pub fn admin_ctx() -> RequestContext {
    RequestContext::admin(TENANT, USER)
}
