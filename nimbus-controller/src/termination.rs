use chrono::Utc;
use nimbus_common::bus::{RpcMessage, RpcMethod};
use nimbus_common::{Instance, InstanceUpdate, RequestContext};
use serde_json::json;

use crate::controller::CloudController;
use crate::error::{ControllerError, ControllerResult};
use crate::logger;

impl CloudController {
    /// Terminate each instance independently. Unknown ids and instances that
    /// were already terminated are skipped. A failure on one id is logged and
    /// does not stop the others; that instance stays unterminated so a later
    /// call finishes its cleanup.
    pub async fn terminate_instances(
        &self,
        ctx: &RequestContext,
        instance_ids: &[String],
    ) -> ControllerResult<()> {
        for ec2_id in instance_ids {
            let instance = match self.store.instance_get_by_ec2_id(ec2_id).await {
                Ok(instance) => instance,
                Err(e) if e.is_not_found() => {
                    tracing::warn!(ec2_id = %ec2_id, "instance not found during terminate");
                    continue;
                }
                Err(e) => {
                    tracing::error!(ec2_id = %ec2_id, error = %e, "instance lookup failed during terminate");
                    continue;
                }
            };
            if instance.terminated_at.is_some() {
                tracing::debug!(ec2_id = %ec2_id, "instance already terminated");
                continue;
            }

            let log = logger::log_event_with_metadata(
                "TERMINATE_INSTANCE",
                ctx,
                Some(json!({ "instance_id": instance.id, "ec2_id": instance.ec2_id })),
            );
            let result = self.terminate_one(&instance).await;
            if log.finish(result).is_err() {
                tracing::warn!(ec2_id = %ec2_id, "terminate incomplete, retry to finish cleanup");
            }
        }
        Ok(())
    }

    /// Every step tolerates a repeat, and `terminated_at` is only written once
    /// the compute host has been told, so a failed attempt can be re-run.
    /// Messages go to the owning tenant's network host, whoever the caller is.
    async fn terminate_one(&self, instance: &Instance) -> ControllerResult<()> {
        // The network host is not asked to confirm the disassociation.
        if let Some(floating) = self.store.instance_get_floating_address(instance.id).await? {
            tracing::debug!(address = %floating, "disassociating floating address");
            self.network
                .cast(
                    &instance.tenant_id,
                    RpcMessage::new(
                        RpcMethod::DisassociateFloatingIp,
                        json!({ "floating_address": floating }),
                    ),
                )
                .await?;
        }

        if let Some(fixed) = self.store.instance_get_fixed_address(instance.id).await? {
            self.network.deallocate_fixed_ip(&fixed).await?;
        }

        let Some(host) = instance.host.as_deref() else {
            // Never scheduled: no compute host will clean up after us.
            self.store.instance_destroy(instance.id).await?;
            return Ok(());
        };
        self.cast_to_host(
            &self.config.compute_topic,
            host,
            RpcMessage::new(
                RpcMethod::TerminateInstance,
                json!({ "instance_id": instance.id }),
            ),
        )
        .await?;

        let marked = self
            .store
            .instance_update(
                instance.id,
                InstanceUpdate {
                    terminated_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await;
        match marked {
            // The compute host may already have removed the record.
            Err(e) if e.is_not_found() => Ok(()),
            other => Ok(other?),
        }
    }

    /// Ask each instance's compute host to reboot it. Stops at the first
    /// unknown or unplaced instance.
    pub async fn reboot_instances(
        &self,
        ctx: &RequestContext,
        instance_ids: &[String],
    ) -> ControllerResult<()> {
        for ec2_id in instance_ids {
            let instance = self.store.instance_get_by_ec2_id(ec2_id).await?;
            let host = instance.host.as_deref().ok_or_else(|| {
                ControllerError::InvalidState(format!("Instance {} has no host yet", ec2_id))
            })?;
            self.cast_to_host(
                &self.config.compute_topic,
                host,
                RpcMessage::new(RpcMethod::RebootInstance, json!({ "instance_id": instance.id })),
            )
            .await?;
            logger::log_quick("REBOOT_INSTANCE", ctx, ec2_id);
        }
        Ok(())
    }
}
