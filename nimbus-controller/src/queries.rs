use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use nimbus_common::bus::{RpcMessage, RpcMethod};
use nimbus_common::{Instance, InstanceUpdate, RequestContext};
use serde_json::json;

use crate::controller::CloudController;
use crate::error::{ControllerError, ControllerResult};
use crate::views::{
    group_reservations, AvailabilityZone, InstanceMetadata, InstanceView, MetaData, PublicKey,
    Region, Reservation,
};
use crate::volumes::UpdateDisplayRequest;

const ZONE_NAME: &str = "nova";

impl CloudController {
    /// Instances grouped by reservation. VPN instances are hidden from non-admins.
    pub async fn describe_instances(&self, ctx: &RequestContext) -> ControllerResult<Vec<Reservation>> {
        let instances = if ctx.is_admin {
            self.store.instance_get_all().await?
        } else {
            self.store.instance_get_all_by_tenant(&ctx.tenant_id).await?
        };

        let mut rows = Vec::with_capacity(instances.len());
        for instance in instances {
            if !ctx.is_admin && instance.image_id == self.config.vpn_image_id {
                continue;
            }
            let view = self.instance_view(ctx, &instance).await?;
            rows.push((instance, view));
        }
        Ok(group_reservations(rows))
    }

    async fn instance_view(&self, ctx: &RequestContext, instance: &Instance) -> ControllerResult<InstanceView> {
        let fixed = self.store.instance_get_fixed_address(instance.id).await?;
        let floating = match fixed {
            Some(_) => self.store.instance_get_floating_address(instance.id).await?,
            None => None,
        };
        Ok(InstanceView::build(instance, fixed, floating, ctx.is_admin))
    }

    pub async fn update_instance(
        &self,
        _ctx: &RequestContext,
        instance_id: &str,
        req: UpdateDisplayRequest,
    ) -> ControllerResult<()> {
        if req.is_empty() {
            return Ok(());
        }
        let instance = self.store.instance_get_by_ec2_id(instance_id).await?;
        self.store
            .instance_update(
                instance.id,
                InstanceUpdate {
                    display_name: req.display_name,
                    display_description: req.display_description,
                    terminated_at: None,
                },
            )
            .await?;
        Ok(())
    }

    /// Blocks on the compute host for the console log.
    pub async fn get_console_output(
        &self,
        _ctx: &RequestContext,
        instance_id: &str,
    ) -> ControllerResult<String> {
        let instance = self.store.instance_get_by_ec2_id(instance_id).await?;
        let host = instance.host.as_deref().ok_or_else(|| {
            ControllerError::InvalidState(format!("Instance {} has no host yet", instance_id))
        })?;
        let queue = self.store.queue_get_for(&self.config.compute_topic, host);
        let reply = self
            .dispatcher
            .call(
                &queue,
                RpcMessage::new(RpcMethod::GetConsoleOutput, json!({ "instance_id": instance.id })),
            )
            .await?;
        Ok(match reply {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        })
    }

    /// Metadata for whichever instance holds the fixed `address`, or `None`
    /// when the address is unknown or unbound.
    pub async fn get_metadata(&self, address: &str) -> ControllerResult<Option<InstanceMetadata>> {
        let instance = match self.store.fixed_ip_get_instance(address).await {
            Ok(Some(instance)) => instance,
            Ok(None) => return Ok(None),
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let user_data = STANDARD.decode(instance.user_data.trim()).map_err(|e| {
            ControllerError::InvalidParameter(format!(
                "user data of {} is not valid base64: {}",
                instance.ec2_id, e
            ))
        })?;
        let mpi = self.mpi_hosts(&instance.tenant_id).await?;
        let floating = self.store.instance_get_floating_address(instance.id).await?;
        let hostname = instance
            .hostname
            .clone()
            .unwrap_or_else(|| instance.ec2_id.clone());
        let public_keys = match &instance.key_name {
            Some(name) => vec![PublicKey {
                name: name.clone(),
                openssh_key: instance.key_data.clone(),
            }],
            None => Vec::new(),
        };

        Ok(Some(InstanceMetadata {
            user_data: String::from_utf8_lossy(&user_data).into_owned(),
            meta_data: MetaData {
                ami_id: instance.image_id.clone(),
                ami_launch_index: instance.launch_index,
                hostname: hostname.clone(),
                instance_id: instance.ec2_id.clone(),
                instance_type: instance.instance_type.clone(),
                local_hostname: hostname.clone(),
                local_ipv4: address.to_string(),
                kernel_id: instance.kernel_id.clone(),
                ramdisk_id: instance.ramdisk_id.clone(),
                availability_zone: ZONE_NAME.to_string(),
                public_hostname: hostname,
                public_ipv4: floating.unwrap_or_default(),
                public_keys,
                reservation_id: instance.reservation_id.clone(),
                security_groups: Vec::new(),
                mpi,
            },
        }))
    }

    /// `<fixed address> slots=<vcpus>` for each addressed instance of the
    /// tenant, keyed by key name.
    async fn mpi_hosts(&self, tenant_id: &str) -> ControllerResult<BTreeMap<String, Vec<String>>> {
        let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for instance in self.store.instance_get_all_by_tenant(tenant_id).await? {
            let Some(address) = self.store.instance_get_fixed_address(instance.id).await? else {
                continue;
            };
            let key = instance.key_name.clone().unwrap_or_else(|| "None".to_string());
            out.entry(key)
                .or_default()
                .push(format!("{} slots={}", address, instance.vcpus));
        }
        Ok(out)
    }

    pub fn describe_availability_zones(&self) -> Vec<AvailabilityZone> {
        vec![AvailabilityZone {
            zone_name: ZONE_NAME.to_string(),
            zone_state: "available".to_string(),
        }]
    }

    /// Regions from `region_list` (`name=url`), or the local endpoint alone.
    pub fn describe_regions(&self, names: Option<&[String]>) -> Vec<Region> {
        let regions: Vec<Region> = if self.config.region_list.is_empty() {
            vec![Region {
                region_name: ZONE_NAME.to_string(),
                region_endpoint: self.config.ec2_url.clone(),
            }]
        } else {
            self.config
                .region_list
                .iter()
                .map(|entry| {
                    let (name, url) = entry.split_once('=').unwrap_or((entry.as_str(), ""));
                    Region {
                        region_name: name.to_string(),
                        region_endpoint: url.to_string(),
                    }
                })
                .collect()
        };
        match names {
            Some(names) if !names.is_empty() => regions
                .into_iter()
                .filter(|r| names.iter().any(|n| n == &r.region_name))
                .collect(),
            _ => regions,
        }
    }
}
