use nimbus_common::bus::{RpcMessage, RpcMethod};
use nimbus_common::instance_types::{self, DEFAULT_INSTANCE_TYPE};
use nimbus_common::{ids, NewInstance, RequestContext};
use serde::Deserialize;
use serde_json::json;

use crate::controller::CloudController;
use crate::error::{ControllerError, ControllerResult};
use crate::logger;
use crate::views::{InstanceView, Reservation};

/// Launch request. `max_count` defaults to 1 and `min_count` to `max_count`;
/// `instance_type` defaults to `m1.small`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunInstancesRequest {
    pub image_id: String,
    #[serde(default)]
    pub instance_type: Option<String>,
    #[serde(default)]
    pub min_count: Option<i64>,
    #[serde(default)]
    pub max_count: Option<i64>,
    #[serde(default)]
    pub kernel_id: Option<String>,
    #[serde(default)]
    pub ramdisk_id: Option<String>,
    #[serde(default)]
    pub key_name: Option<String>,
    /// Base64, decoded only when served back through instance metadata.
    #[serde(default)]
    pub user_data: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub display_description: Option<String>,
}

impl RunInstancesRequest {
    pub fn new(image_id: &str) -> Self {
        Self {
            image_id: image_id.to_string(),
            ..Default::default()
        }
    }

    fn counts(&self) -> ControllerResult<(i64, i64)> {
        let max = self.max_count.unwrap_or(1);
        let min = self.min_count.unwrap_or(max);
        if max < 1 || min < 1 {
            return Err(ControllerError::InvalidParameter(format!(
                "instance counts must be at least 1 (min {}, max {})",
                min, max
            )));
        }
        Ok((min, max))
    }
}

struct ResolvedImage {
    image_id: String,
    kernel_id: String,
    ramdisk_id: String,
    is_vpn: bool,
}

impl CloudController {
    /// Create up to `max_count` instances in one reservation and hand each to
    /// the scheduler.
    ///
    /// Fails with `QuotaExceeded` before touching anything when fewer than
    /// `min_count` fit. A failure inside the per-instance loop stops the loop;
    /// instances already created stay.
    pub async fn run_instances(
        &self,
        ctx: &RequestContext,
        req: RunInstancesRequest,
    ) -> ControllerResult<Reservation> {
        let type_name = req
            .instance_type
            .clone()
            .unwrap_or_else(|| DEFAULT_INSTANCE_TYPE.to_string());
        let instance_type = instance_types::lookup(&type_name)
            .map_err(|e| ControllerError::InvalidParameter(e.to_string()))?;
        let (min_count, max_count) = req.counts()?;

        let admissible = self
            .quota
            .admissible_instances(&ctx.tenant_id, max_count, instance_type)
            .await?;
        if admissible < min_count {
            tracing::warn!(
                tenant_id = %ctx.tenant_id,
                min_count,
                admissible,
                "instance quota exceeded"
            );
            return Err(ControllerError::QuotaExceeded(format!(
                "Instance quota exceeded. You can only run {} more instances of this type.",
                admissible
            )));
        }

        let image = self.resolve_image(&req).await?;

        let key_data = match &req.key_name {
            Some(name) => Some(self.keypairs.public_key(ctx, name).await?),
            None => None,
        };

        let reservation_id = ids::reservation_id();
        let log = logger::log_event_with_metadata(
            "RUN_INSTANCES",
            ctx,
            Some(json!({
                "reservation_id": reservation_id,
                "instance_type": instance_type.name,
                "image_id": image.image_id,
                "count": admissible,
            })),
        );

        let mut views = Vec::with_capacity(admissible as usize);
        let result = async {
            for launch_index in 0..admissible {
                let instance = self
                    .store
                    .instance_create(NewInstance {
                        ec2_id: ids::instance_ec2_id(),
                        tenant_id: ctx.tenant_id.clone(),
                        user_id: ctx.user_id.clone(),
                        reservation_id: reservation_id.clone(),
                        launch_index: launch_index as i32,
                        state_description: "scheduling".to_string(),
                        image_id: image.image_id.clone(),
                        kernel_id: image.kernel_id.clone(),
                        ramdisk_id: image.ramdisk_id.clone(),
                        instance_type: instance_type.name.to_string(),
                        memory_mb: instance_type.memory_mb,
                        vcpus: instance_type.vcpus,
                        local_gb: instance_type.local_gb,
                        key_name: req.key_name.clone(),
                        key_data: key_data.clone(),
                        user_data: req.user_data.clone(),
                        security_group: "default".to_string(),
                        mac_address: ids::generate_mac(),
                        display_name: req.display_name.clone(),
                        display_description: req.display_description.clone(),
                    })
                    .await?;

                let address = self
                    .network
                    .allocate_fixed_ip(&ctx.tenant_id, instance.id, image.is_vpn)
                    .await?;
                self.network
                    .call(
                        &ctx.tenant_id,
                        RpcMessage::new(RpcMethod::SetupFixedIp, json!({ "address": address })),
                    )
                    .await?;
                self.dispatcher
                    .cast(
                        &self.config.scheduler_topic,
                        RpcMessage::new(
                            RpcMethod::RunInstance,
                            json!({
                                "topic": self.config.compute_topic,
                                "instance_id": instance.id,
                            }),
                        ),
                    )
                    .await?;
                tracing::debug!(
                    instance_id = %instance.id,
                    ec2_id = %instance.ec2_id,
                    %address,
                    "instance handed to scheduler"
                );
                views.push(InstanceView::build(&instance, Some(address), None, ctx.is_admin));
            }
            Ok::<_, ControllerError>(())
        }
        .await;
        log.finish(result)?;

        Ok(Reservation {
            reservation_id,
            owner_id: ctx.tenant_id.clone(),
            instances: views,
        })
    }

    /// The VPN image skips the registry entirely, including kernel/ramdisk checks.
    async fn resolve_image(&self, req: &RunInstancesRequest) -> ControllerResult<ResolvedImage> {
        if req.image_id == self.config.vpn_image_id {
            return Ok(ResolvedImage {
                image_id: req.image_id.clone(),
                kernel_id: req
                    .kernel_id
                    .clone()
                    .unwrap_or_else(|| self.config.default_kernel.clone()),
                ramdisk_id: req
                    .ramdisk_id
                    .clone()
                    .unwrap_or_else(|| self.config.default_ramdisk.clone()),
                is_vpn: true,
            });
        }

        let image = self.images.get(&req.image_id).await?;
        let kernel_id = req
            .kernel_id
            .clone()
            .or(image.kernel_id)
            .unwrap_or_else(|| self.config.default_kernel.clone());
        let ramdisk_id = req
            .ramdisk_id
            .clone()
            .or(image.ramdisk_id)
            .unwrap_or_else(|| self.config.default_ramdisk.clone());

        self.images.get(&kernel_id).await?;
        self.images.get(&ramdisk_id).await?;

        Ok(ResolvedImage {
            image_id: image.image_id,
            kernel_id,
            ramdisk_id,
            is_vpn: false,
        })
    }
}
