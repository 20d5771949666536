//! Guards for volume transitions. Each check runs before any mutation or
//! dispatch, so a refused transition leaves no trace.

use nimbus_common::{AttachStatus, Volume, VolumeStatus};

use crate::error::{ControllerError, ControllerResult};

/// available + detached -> attaching (completed remotely).
pub fn ensure_attachable(volume: &Volume) -> ControllerResult<()> {
    if volume.status != VolumeStatus::Available {
        return Err(ControllerError::InvalidState(format!(
            "Volume {} status must be available (is {})",
            volume.ec2_id,
            volume.status.as_str()
        )));
    }
    if volume.attach_status == AttachStatus::Attached {
        return Err(ControllerError::InvalidState(format!(
            "Volume {} is already attached",
            volume.ec2_id
        )));
    }
    Ok(())
}

/// Returns the bound instance id. Attachment is checked before status.
pub fn ensure_detachable(volume: &Volume) -> ControllerResult<uuid::Uuid> {
    let Some(instance_id) = volume.instance_id else {
        return Err(ControllerError::NotAttached(volume.ec2_id.clone()));
    };
    if volume.status == VolumeStatus::Available {
        return Err(ControllerError::InvalidState(format!(
            "Volume {} is already detached",
            volume.ec2_id
        )));
    }
    Ok(instance_id)
}

/// available -> deleting. Returns the volume host the delete goes to.
pub fn ensure_deletable(volume: &Volume) -> ControllerResult<&str> {
    if volume.status != VolumeStatus::Available {
        return Err(ControllerError::InvalidState(format!(
            "Volume {} status must be available (is {})",
            volume.ec2_id,
            volume.status.as_str()
        )));
    }
    volume.host.as_deref().ok_or_else(|| {
        ControllerError::InvalidState(format!("Volume {} has no host", volume.ec2_id))
    })
}
