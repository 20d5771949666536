//! Typed results returned by controller operations. They serialize to JSON
//! as-is; mapping onto any external wire schema happens elsewhere.

use chrono::{DateTime, Utc};
use nimbus_common::{AttachStatus, Instance, Volume};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InstanceState {
    pub code: i32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstanceView {
    pub instance_id: String,
    pub image_id: String,
    pub kernel_id: String,
    pub ramdisk_id: String,
    pub instance_state: InstanceState,
    pub private_dns_name: Option<String>,
    pub public_dns_name: Option<String>,
    pub dns_name: Option<String>,
    pub key_name: Option<String>,
    pub instance_type: String,
    pub launch_time: DateTime<Utc>,
    pub launch_index: i32,
    pub display_name: Option<String>,
    pub display_description: Option<String>,
}

impl InstanceView {
    /// Admins additionally see owner and host folded into the key name.
    pub fn build(
        instance: &Instance,
        fixed_address: Option<String>,
        floating_address: Option<String>,
        is_admin: bool,
    ) -> Self {
        let key_name = if is_admin {
            Some(format!(
                "{} ({}, {})",
                instance.key_name.as_deref().unwrap_or("None"),
                instance.tenant_id,
                instance.host.as_deref().unwrap_or("None")
            ))
        } else {
            instance.key_name.clone()
        };
        let dns_name = floating_address.clone().or_else(|| fixed_address.clone());
        Self {
            instance_id: instance.ec2_id.clone(),
            image_id: instance.image_id.clone(),
            kernel_id: instance.kernel_id.clone(),
            ramdisk_id: instance.ramdisk_id.clone(),
            instance_state: InstanceState {
                code: instance.state,
                name: instance.state_description.clone(),
            },
            private_dns_name: fixed_address,
            public_dns_name: floating_address,
            dns_name,
            key_name,
            instance_type: instance.instance_type.clone(),
            launch_time: instance.created_at,
            launch_index: instance.launch_index,
            display_name: instance.display_name.clone(),
            display_description: instance.display_description.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Reservation {
    pub reservation_id: String,
    pub owner_id: String,
    pub instances: Vec<InstanceView>,
}

/// Group views by reservation, keeping first-seen order of reservations.
pub fn group_reservations(rows: Vec<(Instance, InstanceView)>) -> Vec<Reservation> {
    let mut out: Vec<Reservation> = Vec::new();
    for (instance, view) in rows {
        match out
            .iter_mut()
            .find(|r| r.reservation_id == instance.reservation_id)
        {
            Some(r) => r.instances.push(view),
            None => out.push(Reservation {
                reservation_id: instance.reservation_id.clone(),
                owner_id: instance.tenant_id.clone(),
                instances: vec![view],
            }),
        }
    }
    out
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumeAttachmentView {
    pub attach_time: Option<DateTime<Utc>>,
    pub device: Option<String>,
    pub instance_id: Option<String>,
    pub status: AttachStatus,
    pub volume_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumeView {
    pub volume_id: String,
    pub status: String,
    pub size: i32,
    pub availability_zone: String,
    pub create_time: DateTime<Utc>,
    pub attachment: Option<VolumeAttachmentView>,
    pub display_name: Option<String>,
    pub display_description: Option<String>,
}

impl VolumeView {
    /// `attached_ec2_id` is the external id of the bound instance, when known.
    pub fn build(volume: &Volume, attached_ec2_id: Option<String>, is_admin: bool) -> Self {
        let status = if is_admin {
            format!(
                "{} ({}, {}, {}, {})",
                volume.status.as_str(),
                volume.user_id,
                volume.host.as_deref().unwrap_or("None"),
                attached_ec2_id.as_deref().unwrap_or("None"),
                volume.mountpoint.as_deref().unwrap_or("None"),
            )
        } else {
            volume.status.as_str().to_string()
        };
        let attachment = (volume.attach_status == AttachStatus::Attached).then(|| {
            VolumeAttachmentView {
                attach_time: volume.attach_time,
                device: volume.mountpoint.clone(),
                instance_id: attached_ec2_id,
                status: AttachStatus::Attached,
                volume_id: volume.ec2_id.clone(),
            }
        });
        Self {
            volume_id: volume.ec2_id.clone(),
            status,
            size: volume.size,
            availability_zone: volume.availability_zone.clone(),
            create_time: volume.created_at,
            attachment,
            display_name: volume.display_name.clone(),
            display_description: volume.display_description.clone(),
        }
    }
}

/// Result of `attach_volume`/`detach_volume`: the volume as seen before the
/// remote host acted on the request.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeAttachmentResult {
    pub attach_time: Option<DateTime<Utc>>,
    pub device: Option<String>,
    pub instance_id: String,
    pub request_id: uuid::Uuid,
    pub status: AttachStatus,
    pub volume_id: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AddressView {
    pub public_ip: String,
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AvailabilityZone {
    pub zone_name: String,
    pub zone_state: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Region {
    pub region_name: String,
    pub region_endpoint: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PublicKey {
    pub name: String,
    pub openssh_key: Option<String>,
}

/// Document served to an instance from its metadata endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceMetadata {
    pub user_data: String,
    pub meta_data: MetaData,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetaData {
    pub ami_id: String,
    pub ami_launch_index: i32,
    pub hostname: String,
    pub instance_id: String,
    pub instance_type: String,
    pub local_hostname: String,
    pub local_ipv4: String,
    pub kernel_id: String,
    pub ramdisk_id: String,
    pub availability_zone: String,
    pub public_hostname: String,
    pub public_ipv4: String,
    pub public_keys: Vec<PublicKey>,
    pub reservation_id: String,
    pub security_groups: Vec<String>,
    /// Key name -> `<fixed address> slots=<vcpus>` lines of the tenant's instances.
    pub mpi: BTreeMap<String, Vec<String>>,
}
