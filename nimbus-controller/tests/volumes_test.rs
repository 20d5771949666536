// Integration tests for the volume lifecycle
mod common;

use common::{ctx, Harness, TENANT, USER};
use nimbus_backends::ResourceStore;
use nimbus_common::bus::RpcMethod;
use nimbus_common::{AttachStatus, QuotaOverride, RequestContext, Volume, VolumeStatus};
use nimbus_controller::{ControllerError, CreateVolumeRequest, UpdateDisplayRequest};
use uuid::Uuid;

async fn available_volume(h: &Harness, ctx: &RequestContext, size: i32) -> Volume {
    let view = h
        .controller
        .create_volume(
            ctx,
            CreateVolumeRequest {
                size,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let volume = h.store.volume_get_by_ec2_id(&view.volume_id).await.unwrap();
    h.store
        .set_volume_state(volume.id, VolumeStatus::Available, Some("storage-1"))
        .await
        .unwrap();
    h.store.volume_get(volume.id).await.unwrap()
}

#[tokio::test]
async fn test_create_volume_hands_off_to_scheduler() {
    let h = Harness::new().await;
    let view = h
        .controller
        .create_volume(
            &ctx(),
            CreateVolumeRequest {
                size: 5,
                display_name: Some("data".to_string()),
                display_description: None,
            },
        )
        .await
        .unwrap();

    assert!(view.volume_id.starts_with("vol-"));
    assert_eq!(view.status, "creating");
    assert_eq!(view.availability_zone, "nova");
    assert!(view.attachment.is_none());

    let sent = h.dispatcher.sent_with(RpcMethod::CreateVolume).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].queue, "scheduler");
    assert_eq!(sent[0].message.arg_str("topic"), Some("volume"));
}

#[tokio::test]
async fn test_create_volume_over_quota_persists_nothing() {
    let h = Harness::new().await;
    h.set_quota(QuotaOverride {
        tenant_id: TENANT.to_string(),
        volumes: Some(0),
        ..Default::default()
    })
    .await;

    let err = h
        .controller
        .create_volume(
            &ctx(),
            CreateVolumeRequest {
                size: 1,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::QuotaExceeded(_)));
    assert!(h.store.volume_get_all().await.unwrap().is_empty());
    assert!(h.dispatcher.sent().await.is_empty());
}

#[tokio::test]
async fn test_create_volume_respects_gigabyte_quota() {
    let h = Harness::new().await;
    h.set_quota(QuotaOverride {
        tenant_id: TENANT.to_string(),
        gigabytes: Some(10),
        ..Default::default()
    })
    .await;

    let err = h
        .controller
        .create_volume(
            &ctx(),
            CreateVolumeRequest {
                size: 11,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::QuotaExceeded(_)));

    let err = h
        .controller
        .create_volume(
            &ctx(),
            CreateVolumeRequest {
                size: -1,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::InvalidParameter(_)));
}

#[tokio::test]
async fn test_attach_guards_send_nothing() {
    let h = Harness::new().await;
    let ctx = ctx();
    let placed = h.launch_on(&ctx, "compute-1").await;
    let unplaced = h.launch(&ctx, 1).await.remove(0);

    let creating = h
        .controller
        .create_volume(
            &ctx,
            CreateVolumeRequest {
                size: 1,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let ready = available_volume(&h, &ctx, 1).await;
    h.dispatcher.clear().await;

    let err = h
        .controller
        .attach_volume(&ctx, &creating.volume_id, &placed.ec2_id, "/dev/vdb")
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::InvalidState(_)));

    let err = h
        .controller
        .attach_volume(&ctx, &ready.ec2_id, &unplaced.ec2_id, "/dev/vdb")
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::InvalidState(_)));

    let err = h
        .controller
        .attach_volume(&ctx, "vol-missing1", &placed.ec2_id, "/dev/vdb")
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    assert!(h.dispatcher.sent().await.is_empty());
}

#[tokio::test]
async fn test_attach_casts_to_instance_host() {
    let h = Harness::new().await;
    let ctx = ctx();
    let instance = h.launch_on(&ctx, "compute-2").await;
    let volume = available_volume(&h, &ctx, 2).await;
    h.dispatcher.clear().await;

    let result = h
        .controller
        .attach_volume(&ctx, &volume.ec2_id, &instance.ec2_id, "/dev/vdb")
        .await
        .unwrap();
    assert_eq!(result.volume_id, volume.ec2_id);
    assert_eq!(result.instance_id, instance.ec2_id);
    assert_eq!(result.request_id, ctx.request_id);

    let sent = h.dispatcher.sent_with(RpcMethod::AttachVolume).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].queue, "compute.compute-2");
    assert_eq!(sent[0].message.arg_str("mountpoint"), Some("/dev/vdb"));

    // Attaching again once the host reports success is refused.
    h.store
        .mark_volume_attached(volume.id, instance.id, "/dev/vdb")
        .await
        .unwrap();
    let err = h
        .controller
        .attach_volume(&ctx, &volume.ec2_id, &instance.ec2_id, "/dev/vdc")
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::InvalidState(_)));
}

#[tokio::test]
async fn test_detach_requires_attachment() {
    let h = Harness::new().await;
    let ctx = ctx();
    let volume = available_volume(&h, &ctx, 1).await;

    let err = h
        .controller
        .detach_volume(&ctx, &volume.ec2_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::NotAttached(_)));
}

#[tokio::test]
async fn test_detach_casts_to_bound_host() {
    let h = Harness::new().await;
    let ctx = ctx();
    let instance = h.launch_on(&ctx, "compute-4").await;
    let volume = available_volume(&h, &ctx, 1).await;
    h.store
        .mark_volume_attached(volume.id, instance.id, "/dev/vdb")
        .await
        .unwrap();
    h.dispatcher.clear().await;

    let result = h.controller.detach_volume(&ctx, &volume.ec2_id).await.unwrap();
    assert_eq!(result.instance_id, instance.ec2_id);
    assert_eq!(result.device.as_deref(), Some("/dev/vdb"));
    assert_eq!(result.status, AttachStatus::Attached);

    let sent = h.dispatcher.sent_with(RpcMethod::DetachVolume).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].queue, "compute.compute-4");
}

#[tokio::test]
async fn test_detach_from_vanished_instance_is_local() {
    let h = Harness::new().await;
    let ctx = ctx();
    let volume = available_volume(&h, &ctx, 1).await;
    h.store
        .mark_volume_attached(volume.id, Uuid::new_v4(), "/dev/vdb")
        .await
        .unwrap();
    h.dispatcher.clear().await;

    h.controller.detach_volume(&ctx, &volume.ec2_id).await.unwrap();

    let stored = h.store.volume_get(volume.id).await.unwrap();
    assert_eq!(stored.status, VolumeStatus::Available);
    assert_eq!(stored.attach_status, AttachStatus::Detached);
    assert!(stored.instance_id.is_none());
    assert!(h.dispatcher.sent().await.is_empty());
}

#[tokio::test]
async fn test_delete_volume_goes_to_volume_host() {
    let h = Harness::new().await;
    let ctx = ctx();

    let creating = h
        .controller
        .create_volume(
            &ctx,
            CreateVolumeRequest {
                size: 1,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let err = h
        .controller
        .delete_volume(&ctx, &creating.volume_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::InvalidState(_)));

    let volume = available_volume(&h, &ctx, 3).await;
    h.dispatcher.clear().await;
    h.controller.delete_volume(&ctx, &volume.ec2_id).await.unwrap();

    let sent = h.dispatcher.sent_with(RpcMethod::DeleteVolume).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].queue, "volume.storage-1");
    assert!(h
        .store
        .volume_get(volume.id)
        .await
        .unwrap()
        .terminated_at
        .is_some());
}

#[tokio::test]
async fn test_update_and_describe_volumes() {
    let h = Harness::new().await;
    let ctx = ctx();
    let volume = available_volume(&h, &ctx, 4).await;

    h.controller
        .update_volume(
            &ctx,
            &volume.ec2_id,
            UpdateDisplayRequest {
                display_name: Some("scratch".to_string()),
                display_description: None,
            },
        )
        .await
        .unwrap();

    let views = h.controller.describe_volumes(&ctx).await.unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].display_name.as_deref(), Some("scratch"));
    assert_eq!(views[0].status, "available");

    let admin = RequestContext::admin("ops", "root");
    let views = h.controller.describe_volumes(&admin).await.unwrap();
    assert_eq!(
        views[0].status,
        format!("available ({}, storage-1, None, None)", USER)
    );

    let other = RequestContext::new("tenant-b", "bob");
    assert!(h.controller.describe_volumes(&other).await.unwrap().is_empty());
}
