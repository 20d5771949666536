use nimbus_backends::DispatchError;
use nimbus_common::bus::{RpcMessage, RpcMethod};
use nimbus_common::{FloatingIp, RequestContext};
use serde_json::json;

use crate::controller::CloudController;
use crate::error::{ControllerError, ControllerResult};
use crate::logger;
use crate::views::AddressView;

impl CloudController {
    /// Ask the tenant's network host for a floating address and return it.
    pub async fn allocate_address(&self, ctx: &RequestContext) -> ControllerResult<String> {
        if self.quota.admissible_floating_ips(&ctx.tenant_id, 1).await? < 1 {
            tracing::warn!(tenant_id = %ctx.tenant_id, "floating ip quota exceeded");
            return Err(ControllerError::QuotaExceeded(
                "Address quota exceeded. You cannot allocate any more addresses".to_string(),
            ));
        }

        let log = logger::log_event_with_metadata("ALLOCATE_ADDRESS", ctx, None);
        let result = async {
            let reply = self
                .network
                .call(
                    &ctx.tenant_id,
                    RpcMessage::new(
                        RpcMethod::AllocateFloatingIp,
                        json!({ "project_id": ctx.tenant_id }),
                    ),
                )
                .await?;
            let Some(address) = reply.as_str() else {
                return Err(ControllerError::Dispatch(DispatchError::Remote {
                    queue: self.network.network_topic(&ctx.tenant_id).await?,
                    message: format!("allocate_floating_ip returned {} instead of an address", reply),
                }));
            };
            Ok::<_, ControllerError>(address.to_string())
        }
        .await;
        log.finish(result)
    }

    pub async fn release_address(&self, ctx: &RequestContext, public_ip: &str) -> ControllerResult<()> {
        let floating = self.store.floating_ip_get_by_address(public_ip).await?;
        self.network
            .cast(
                owning_tenant(ctx, &floating),
                RpcMessage::new(
                    RpcMethod::DeallocateFloatingIp,
                    json!({ "floating_address": floating.address }),
                ),
            )
            .await?;
        logger::log_quick("RELEASE_ADDRESS", ctx, public_ip);
        Ok(())
    }

    pub async fn associate_address(
        &self,
        ctx: &RequestContext,
        instance_id: &str,
        public_ip: &str,
    ) -> ControllerResult<()> {
        let instance = self.store.instance_get_by_ec2_id(instance_id).await?;
        let fixed_address = self
            .store
            .instance_get_fixed_address(instance.id)
            .await?
            .ok_or_else(|| ControllerError::NoFixedIp(instance.ec2_id.clone()))?;
        let floating = self.store.floating_ip_get_by_address(public_ip).await?;
        self.network
            .cast(
                &instance.tenant_id,
                RpcMessage::new(
                    RpcMethod::AssociateFloatingIp,
                    json!({
                        "floating_address": floating.address,
                        "fixed_address": fixed_address,
                    }),
                ),
            )
            .await?;
        logger::log_quick("ASSOCIATE_ADDRESS", ctx, public_ip);
        Ok(())
    }

    pub async fn disassociate_address(
        &self,
        ctx: &RequestContext,
        public_ip: &str,
    ) -> ControllerResult<()> {
        let floating = self.store.floating_ip_get_by_address(public_ip).await?;
        self.network
            .cast(
                owning_tenant(ctx, &floating),
                RpcMessage::new(
                    RpcMethod::DisassociateFloatingIp,
                    json!({ "floating_address": floating.address }),
                ),
            )
            .await?;
        logger::log_quick("DISASSOCIATE_ADDRESS", ctx, public_ip);
        Ok(())
    }

    /// Admins see every address with its owner folded into `instance_id`.
    pub async fn describe_addresses(&self, ctx: &RequestContext) -> ControllerResult<Vec<AddressView>> {
        let floating_ips = if ctx.is_admin {
            self.store.floating_ip_get_all().await?
        } else {
            self.store.floating_ip_get_all_by_tenant(&ctx.tenant_id).await?
        };
        let mut views = Vec::with_capacity(floating_ips.len());
        for fip in floating_ips {
            let instance_id = self.bound_instance_ec2_id(&fip).await?;
            let instance_id = if ctx.is_admin {
                Some(format!(
                    "{} ({})",
                    instance_id.as_deref().unwrap_or("None"),
                    fip.tenant_id.as_deref().unwrap_or("None")
                ))
            } else {
                instance_id
            };
            views.push(AddressView {
                public_ip: fip.address,
                instance_id,
            });
        }
        Ok(views)
    }

    async fn bound_instance_ec2_id(&self, fip: &FloatingIp) -> ControllerResult<Option<String>> {
        let Some(fixed) = fip.fixed_address.as_deref() else {
            return Ok(None);
        };
        match self.store.fixed_ip_get_instance(fixed).await {
            Ok(instance) => Ok(instance.map(|i| i.ec2_id)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Network whose host owns `floating`. Unallocated addresses fall back to the caller's.
fn owning_tenant<'a>(ctx: &'a RequestContext, floating: &'a FloatingIp) -> &'a str {
    floating.tenant_id.as_deref().unwrap_or(&ctx.tenant_id)
}
