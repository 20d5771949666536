// Integration tests for describe/metadata/console queries
mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use common::{admin_ctx, ctx, Harness, IMAGE, POOL, VPN_ADDRESS};
use nimbus_backends::ResourceStore;
use nimbus_common::bus::RpcMethod;
use nimbus_controller::{ControllerConfig, ControllerError, RunInstancesRequest, UpdateDisplayRequest};
use serde_json::json;

#[tokio::test]
async fn test_metadata_for_fixed_address() {
    let h = Harness::new().await;
    let ctx = ctx();
    h.controller.keypairs().create_key_pair(&ctx, "mykey").await.unwrap();

    let reservation = h
        .controller
        .run_instances(
            &ctx,
            RunInstancesRequest {
                max_count: Some(2),
                key_name: Some("mykey".to_string()),
                user_data: STANDARD.encode("#!/bin/sh\necho hello\n"),
                ..RunInstancesRequest::new(IMAGE)
            },
        )
        .await
        .unwrap();
    let second = &reservation.instances[1];
    let address = second.private_dns_name.clone().unwrap();

    let metadata = h.controller.get_metadata(&address).await.unwrap().unwrap();
    assert_eq!(metadata.user_data, "#!/bin/sh\necho hello\n");
    let meta = &metadata.meta_data;
    assert_eq!(meta.instance_id, second.instance_id);
    assert_eq!(meta.ami_launch_index, 1);
    assert_eq!(meta.local_ipv4, address);
    assert_eq!(meta.reservation_id, reservation.reservation_id);
    assert_eq!(meta.availability_zone, "nova");
    assert_eq!(meta.public_keys.len(), 1);
    assert_eq!(meta.public_keys[0].openssh_key.as_deref(), Some("ssh-test public-0"));

    let lines = meta.mpi.get("mykey").unwrap();
    assert_eq!(lines.len(), 2);
    assert!(lines.contains(&format!("{} slots=1", address)));
}

#[tokio::test]
async fn test_metadata_for_unknown_or_free_address() {
    let h = Harness::new().await;
    assert!(h.controller.get_metadata("192.0.2.1").await.unwrap().is_none());
    // Known address, no instance bound.
    assert!(h.controller.get_metadata(POOL[4]).await.unwrap().is_none());
}

#[tokio::test]
async fn test_metadata_rejects_corrupt_user_data() {
    let h = Harness::new().await;
    let reservation = h
        .controller
        .run_instances(
            &ctx(),
            RunInstancesRequest {
                user_data: "not base64!".to_string(),
                ..RunInstancesRequest::new(IMAGE)
            },
        )
        .await
        .unwrap();
    let address = reservation.instances[0].private_dns_name.clone().unwrap();

    let err = h.controller.get_metadata(&address).await.unwrap_err();
    assert!(matches!(err, ControllerError::InvalidParameter(_)));
}

#[tokio::test]
async fn test_vpn_instances_hidden_from_tenant() {
    let h = Harness::new().await;
    let ctx = ctx();
    h.launch(&ctx, 1).await;
    h.controller
        .run_instances(&ctx, RunInstancesRequest::new("ami-cloudpipe"))
        .await
        .unwrap();

    let visible: usize = h
        .controller
        .describe_instances(&ctx)
        .await
        .unwrap()
        .iter()
        .map(|r| r.instances.len())
        .sum();
    assert_eq!(visible, 1);

    let reservations = h.controller.describe_instances(&admin_ctx()).await.unwrap();
    assert_eq!(reservations.len(), 2);
    let vpn = reservations
        .iter()
        .flat_map(|r| r.instances.iter())
        .find(|i| i.private_dns_name.as_deref() == Some(VPN_ADDRESS))
        .unwrap();
    assert_eq!(vpn.key_name.as_deref(), Some("None (tenant-a, None)"));
}

#[tokio::test]
async fn test_describe_instances_groups_by_reservation() {
    let h = Harness::new().await;
    let ctx = ctx();
    h.launch(&ctx, 3).await;
    h.launch(&ctx, 1).await;

    let reservations = h.controller.describe_instances(&ctx).await.unwrap();
    let mut sizes: Vec<usize> = reservations.iter().map(|r| r.instances.len()).collect();
    sizes.sort();
    assert_eq!(sizes, vec![1, 3]);
}

#[tokio::test]
async fn test_update_instance_display_fields() {
    let h = Harness::new().await;
    let ctx = ctx();
    let instance = h.launch(&ctx, 1).await.remove(0);

    h.controller
        .update_instance(
            &ctx,
            &instance.ec2_id,
            UpdateDisplayRequest {
                display_name: Some("web-1".to_string()),
                display_description: Some("frontend".to_string()),
            },
        )
        .await
        .unwrap();

    let stored = h.store.instance_get(instance.id).await.unwrap();
    assert_eq!(stored.display_name.as_deref(), Some("web-1"));
    assert_eq!(stored.display_description.as_deref(), Some("frontend"));
}

#[tokio::test]
async fn test_console_output_from_compute_host() {
    let h = Harness::new().await;
    let ctx = ctx();
    let unplaced = h.launch(&ctx, 1).await.remove(0);
    let placed = h.launch_on(&ctx, "compute-5").await;
    h.dispatcher
        .set_reply(RpcMethod::GetConsoleOutput, json!("boot ok"))
        .await;

    let output = h
        .controller
        .get_console_output(&ctx, &placed.ec2_id)
        .await
        .unwrap();
    assert_eq!(output, "boot ok");
    let sent = h.dispatcher.sent_with(RpcMethod::GetConsoleOutput).await;
    assert_eq!(sent[0].queue, "compute.compute-5");

    let err = h
        .controller
        .get_console_output(&ctx, &unplaced.ec2_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::InvalidState(_)));
}

#[tokio::test]
async fn test_regions_and_zones() {
    let h = Harness::new().await;
    let regions = h.controller.describe_regions(None);
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].region_name, "nova");
    assert_eq!(regions[0].region_endpoint, h.controller.config().ec2_url);

    let zones = h.controller.describe_availability_zones();
    assert_eq!(zones[0].zone_name, "nova");
    assert_eq!(zones[0].zone_state, "available");

    let h = Harness::with_config(ControllerConfig {
        region_list: vec![
            "east=http://east.example:8773/services/Cloud".to_string(),
            "west=http://west.example:8773/services/Cloud".to_string(),
        ],
        ..Default::default()
    })
    .await;
    assert_eq!(h.controller.describe_regions(None).len(), 2);
    let west = h.controller.describe_regions(Some(&["west".to_string()]));
    assert_eq!(west.len(), 1);
    assert_eq!(west[0].region_endpoint, "http://west.example:8773/services/Cloud");
}
