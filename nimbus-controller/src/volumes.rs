use chrono::Utc;
use nimbus_common::bus::{RpcMessage, RpcMethod};
use nimbus_common::{ids, NewVolume, RequestContext, Volume, VolumeUpdate};
use serde::Deserialize;
use serde_json::json;

use crate::controller::CloudController;
use crate::error::{ControllerError, ControllerResult};
use crate::logger;
use crate::state_machine;
use crate::views::{VolumeAttachmentResult, VolumeView};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateVolumeRequest {
    pub size: i32,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub display_description: Option<String>,
}

/// Only display metadata can change after creation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateDisplayRequest {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub display_description: Option<String>,
}

impl UpdateDisplayRequest {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.display_description.is_none()
    }
}

impl CloudController {
    pub async fn create_volume(
        &self,
        ctx: &RequestContext,
        req: CreateVolumeRequest,
    ) -> ControllerResult<VolumeView> {
        if req.size < 0 {
            return Err(ControllerError::InvalidParameter(format!(
                "volume size must not be negative (got {})",
                req.size
            )));
        }
        let admissible = self
            .quota
            .admissible_volumes(&ctx.tenant_id, 1, req.size as i64)
            .await?;
        if admissible < 1 {
            tracing::warn!(tenant_id = %ctx.tenant_id, size = req.size, "volume quota exceeded");
            return Err(ControllerError::QuotaExceeded(format!(
                "Volume quota exceeded. You cannot create a volume of size {}",
                req.size
            )));
        }

        let log = logger::log_event_with_metadata(
            "CREATE_VOLUME",
            ctx,
            Some(json!({ "size": req.size })),
        );
        let result = async {
            let volume = self
                .store
                .volume_create(NewVolume {
                    ec2_id: ids::volume_ec2_id(),
                    tenant_id: ctx.tenant_id.clone(),
                    user_id: ctx.user_id.clone(),
                    size: req.size,
                    availability_zone: self.config.storage_availability_zone.clone(),
                    display_name: req.display_name,
                    display_description: req.display_description,
                })
                .await?;
            self.dispatcher
                .cast(
                    &self.config.scheduler_topic,
                    RpcMessage::new(
                        RpcMethod::CreateVolume,
                        json!({ "topic": self.config.volume_topic, "volume_id": volume.id }),
                    ),
                )
                .await?;
            Ok::<_, ControllerError>(VolumeView::build(&volume, None, ctx.is_admin))
        }
        .await;
        log.finish(result)
    }

    /// Hand the attach to the instance's compute host. The returned view shows
    /// the volume before the host acts.
    pub async fn attach_volume(
        &self,
        ctx: &RequestContext,
        volume_id: &str,
        instance_id: &str,
        device: &str,
    ) -> ControllerResult<VolumeAttachmentResult> {
        let volume = self.store.volume_get_by_ec2_id(volume_id).await?;
        state_machine::ensure_attachable(&volume)?;
        let instance = self.store.instance_get_by_ec2_id(instance_id).await?;
        let host = instance.host.as_deref().ok_or_else(|| {
            ControllerError::InvalidState(format!("Instance {} has no host yet", instance_id))
        })?;

        self.cast_to_host(
            &self.config.compute_topic,
            host,
            RpcMessage::new(
                RpcMethod::AttachVolume,
                json!({
                    "volume_id": volume.id,
                    "instance_id": instance.id,
                    "mountpoint": device,
                }),
            ),
        )
        .await?;
        logger::log_quick("ATTACH_VOLUME", ctx, volume_id);

        Ok(attachment_result(ctx, &volume, instance.ec2_id))
    }

    /// Detach through the bound instance's compute host. When that instance no
    /// longer exists the volume is marked detached locally and nothing is sent.
    pub async fn detach_volume(
        &self,
        ctx: &RequestContext,
        volume_id: &str,
    ) -> ControllerResult<VolumeAttachmentResult> {
        let volume = self.store.volume_get_by_ec2_id(volume_id).await?;
        let bound_id = state_machine::ensure_detachable(&volume)?;

        let instance = match self.store.instance_get(bound_id).await {
            Ok(instance) => instance,
            Err(e) if e.is_not_found() => {
                tracing::warn!(
                    volume_id,
                    instance_id = %bound_id,
                    "bound instance is gone, detaching locally"
                );
                self.store.volume_detached(volume.id).await?;
                return Ok(attachment_result(ctx, &volume, bound_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let host = instance.host.as_deref().ok_or_else(|| {
            ControllerError::InvalidState(format!("Instance {} has no host", instance.ec2_id))
        })?;
        self.cast_to_host(
            &self.config.compute_topic,
            host,
            RpcMessage::new(
                RpcMethod::DetachVolume,
                json!({ "instance_id": instance.id, "volume_id": volume.id }),
            ),
        )
        .await?;
        logger::log_quick("DETACH_VOLUME", ctx, volume_id);

        Ok(attachment_result(ctx, &volume, instance.ec2_id))
    }

    pub async fn delete_volume(&self, ctx: &RequestContext, volume_id: &str) -> ControllerResult<()> {
        let volume = self.store.volume_get_by_ec2_id(volume_id).await?;
        let host = state_machine::ensure_deletable(&volume)?;

        self.store
            .volume_update(
                volume.id,
                VolumeUpdate {
                    terminated_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        self.cast_to_host(
            &self.config.volume_topic,
            host,
            RpcMessage::new(RpcMethod::DeleteVolume, json!({ "volume_id": volume.id })),
        )
        .await?;
        logger::log_quick("DELETE_VOLUME", ctx, volume_id);
        Ok(())
    }

    pub async fn update_volume(
        &self,
        _ctx: &RequestContext,
        volume_id: &str,
        req: UpdateDisplayRequest,
    ) -> ControllerResult<()> {
        let volume = self.store.volume_get_by_ec2_id(volume_id).await?;
        if req.is_empty() {
            return Ok(());
        }
        self.store
            .volume_update(
                volume.id,
                VolumeUpdate {
                    display_name: req.display_name,
                    display_description: req.display_description,
                    terminated_at: None,
                },
            )
            .await?;
        Ok(())
    }

    /// Admins see every volume, everyone else only their tenant's.
    pub async fn describe_volumes(&self, ctx: &RequestContext) -> ControllerResult<Vec<VolumeView>> {
        let volumes = if ctx.is_admin {
            self.store.volume_get_all().await?
        } else {
            self.store.volume_get_all_by_tenant(&ctx.tenant_id).await?
        };
        let mut views = Vec::with_capacity(volumes.len());
        for volume in volumes {
            let attached = self.attached_ec2_id(&volume).await?;
            views.push(VolumeView::build(&volume, attached, ctx.is_admin));
        }
        Ok(views)
    }

    async fn attached_ec2_id(&self, volume: &Volume) -> ControllerResult<Option<String>> {
        let Some(instance_id) = volume.instance_id else {
            return Ok(None);
        };
        match self.store.instance_get(instance_id).await {
            Ok(instance) => Ok(Some(instance.ec2_id)),
            Err(e) if e.is_not_found() => Ok(Some(instance_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

fn attachment_result(
    ctx: &RequestContext,
    volume: &Volume,
    instance_id: String,
) -> VolumeAttachmentResult {
    VolumeAttachmentResult {
        attach_time: volume.attach_time,
        device: volume.mountpoint.clone(),
        instance_id,
        request_id: ctx.request_id,
        status: volume.attach_status,
        volume_id: volume.ec2_id.clone(),
    }
}
