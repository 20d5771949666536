// Integration tests for terminate_instances and reboot_instances
mod common;

use common::{ctx, Harness, TENANT};
use nimbus_backends::memory::DispatchKind;
use nimbus_backends::ResourceStore;
use nimbus_common::bus::RpcMethod;
use nimbus_common::{FixedIp, Instance, RequestContext};
use nimbus_controller::ControllerError;

async fn fixed_ip(h: &Harness, address: &str) -> FixedIp {
    h.store
        .fixed_ips()
        .await
        .into_iter()
        .find(|f| f.address == address)
        .unwrap()
}

/// Launch on `host` with a floating address bound to the fixed one.
async fn launch_with_floating(h: &Harness, host: &str, floating: &str) -> (Instance, String) {
    let instance = h.launch_on(&ctx(), host).await;
    let fixed = h
        .store
        .instance_get_fixed_address(instance.id)
        .await
        .unwrap()
        .unwrap();
    h.store.add_floating_ip(floating, Some(TENANT)).await;
    h.store.bind_floating_ip(floating, &fixed).await.unwrap();
    (instance, fixed)
}

#[tokio::test]
async fn test_terminate_unscheduled_instance_destroys_record() {
    let h = Harness::new().await;
    let ctx = ctx();
    let instance = h.launch(&ctx, 1).await.remove(0);
    let address = h
        .store
        .instance_get_fixed_address(instance.id)
        .await
        .unwrap()
        .unwrap();
    h.dispatcher.clear().await;

    h.controller
        .terminate_instances(&ctx, &[instance.ec2_id.clone()])
        .await
        .unwrap();

    assert!(h.store.instance_get(instance.id).await.unwrap_err().is_not_found());
    let fixed = h
        .store
        .fixed_ips()
        .await
        .into_iter()
        .find(|f| f.address == address)
        .unwrap();
    assert!(!fixed.allocated);
    assert!(fixed.instance_id.is_none());
    assert!(h.dispatcher.sent_with(RpcMethod::TerminateInstance).await.is_empty());
}

#[tokio::test]
async fn test_terminate_scheduled_instance_casts_to_host_once() {
    let h = Harness::new().await;
    let ctx = ctx();
    let instance = h.launch_on(&ctx, "compute-7").await;
    h.dispatcher.clear().await;

    h.controller
        .terminate_instances(&ctx, &[instance.ec2_id.clone()])
        .await
        .unwrap();

    let sent = h.dispatcher.sent_with(RpcMethod::TerminateInstance).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, DispatchKind::Cast);
    assert_eq!(sent[0].queue, "compute.compute-7");

    let stored = h.store.instance_get(instance.id).await.unwrap();
    assert!(stored.terminated_at.is_some());

    // A repeated terminate is a no-op.
    h.controller
        .terminate_instances(&ctx, &[instance.ec2_id.clone()])
        .await
        .unwrap();
    assert_eq!(h.dispatcher.sent_with(RpcMethod::TerminateInstance).await.len(), 1);
}

#[tokio::test]
async fn test_terminate_skips_unknown_ids() {
    let h = Harness::new().await;
    let ctx = ctx();
    let instance = h.launch_on(&ctx, "compute-1").await;
    h.dispatcher.clear().await;

    h.controller
        .terminate_instances(&ctx, &["i-missing1".to_string(), instance.ec2_id.clone()])
        .await
        .unwrap();

    assert_eq!(h.dispatcher.sent_with(RpcMethod::TerminateInstance).await.len(), 1);
}

#[tokio::test]
async fn test_terminate_disassociates_floating_address() {
    let h = Harness::new().await;
    let ctx = ctx();
    let instance = h.launch_on(&ctx, "compute-1").await;
    let fixed = h
        .store
        .instance_get_fixed_address(instance.id)
        .await
        .unwrap()
        .unwrap();
    h.store.add_floating_ip("203.0.113.5", Some(TENANT)).await;
    h.store.bind_floating_ip("203.0.113.5", &fixed).await.unwrap();
    h.dispatcher.clear().await;

    h.controller
        .terminate_instances(&ctx, &[instance.ec2_id.clone()])
        .await
        .unwrap();

    let sent = h.dispatcher.sent_with(RpcMethod::DisassociateFloatingIp).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, DispatchKind::Cast);
    assert_eq!(sent[0].queue, "network.network-1");
    assert_eq!(sent[0].message.arg_str("floating_address"), Some("203.0.113.5"));
}

#[tokio::test]
async fn test_reboot_requires_placed_instance() {
    let h = Harness::new().await;
    let ctx = ctx();
    let unplaced = h.launch(&ctx, 1).await.remove(0);
    let placed = h.launch_on(&ctx, "compute-3").await;
    h.dispatcher.clear().await;

    let err = h
        .controller
        .reboot_instances(&ctx, &[unplaced.ec2_id.clone()])
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::InvalidState(_)));

    let err = h
        .controller
        .reboot_instances(&ctx, &["i-missing1".to_string()])
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    h.controller
        .reboot_instances(&ctx, &[placed.ec2_id.clone()])
        .await
        .unwrap();
    let sent = h.dispatcher.sent_with(RpcMethod::RebootInstance).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].queue, "compute.compute-3");
}

#[tokio::test]
async fn test_terminate_only_unknown_id_changes_nothing() {
    let h = Harness::new().await;
    let ctx = ctx();
    let instance = h.launch_on(&ctx, "compute-2").await;
    let before_ips = h.store.fixed_ips().await;
    h.dispatcher.clear().await;

    h.controller
        .terminate_instances(&ctx, &["i-missing1".to_string()])
        .await
        .unwrap();

    assert!(h.dispatcher.sent().await.is_empty());
    let stored = h.store.instance_get(instance.id).await.unwrap();
    assert!(stored.terminated_at.is_none());
    assert_eq!(stored.host.as_deref(), Some("compute-2"));
    let after_ips = h.store.fixed_ips().await;
    assert_eq!(after_ips.len(), before_ips.len());
    for (before, after) in before_ips.iter().zip(after_ips.iter()) {
        assert_eq!(before.address, after.address);
        assert_eq!(before.allocated, after.allocated);
        assert_eq!(before.instance_id, after.instance_id);
    }
}

#[tokio::test]
async fn test_terminate_same_id_twice_in_one_call() {
    let h = Harness::new().await;
    let (instance, fixed) = launch_with_floating(&h, "compute-4", "203.0.113.30").await;
    h.dispatcher.clear().await;

    h.controller
        .terminate_instances(&ctx(), &[instance.ec2_id.clone(), instance.ec2_id.clone()])
        .await
        .unwrap();

    assert_eq!(h.dispatcher.sent_with(RpcMethod::TerminateInstance).await.len(), 1);
    assert_eq!(h.dispatcher.sent_with(RpcMethod::DisassociateFloatingIp).await.len(), 1);
    let released = fixed_ip(&h, &fixed).await;
    assert!(!released.allocated);
    assert!(released.instance_id.is_none());
}

#[tokio::test]
async fn test_failed_terminate_can_be_retried() {
    let h = Harness::new().await;
    let (instance, fixed) = launch_with_floating(&h, "compute-7", "203.0.113.31").await;
    h.dispatcher.clear().await;
    h.dispatcher
        .fail_method(RpcMethod::DisassociateFloatingIp, "broker down")
        .await;

    h.controller
        .terminate_instances(&ctx(), &[instance.ec2_id.clone()])
        .await
        .unwrap();

    let stored = h.store.instance_get(instance.id).await.unwrap();
    assert!(stored.terminated_at.is_none());
    let held = fixed_ip(&h, &fixed).await;
    assert!(held.allocated);
    assert_eq!(held.instance_id, Some(instance.id));
    assert!(h.dispatcher.sent_with(RpcMethod::TerminateInstance).await.is_empty());

    h.dispatcher.recover_method(RpcMethod::DisassociateFloatingIp).await;
    h.controller
        .terminate_instances(&ctx(), &[instance.ec2_id.clone()])
        .await
        .unwrap();

    assert_eq!(h.dispatcher.sent_with(RpcMethod::DisassociateFloatingIp).await.len(), 1);
    let released = fixed_ip(&h, &fixed).await;
    assert!(!released.allocated);
    assert!(released.instance_id.is_none());
    let sent = h.dispatcher.sent_with(RpcMethod::TerminateInstance).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].queue, "compute.compute-7");
    let stored = h.store.instance_get(instance.id).await.unwrap();
    assert!(stored.terminated_at.is_some());
}

#[tokio::test]
async fn test_terminate_failure_does_not_stop_batch() {
    let h = Harness::new().await;
    let (failing, _) = launch_with_floating(&h, "compute-1", "203.0.113.32").await;
    let healthy = h.launch_on(&ctx(), "compute-2").await;
    h.dispatcher.clear().await;
    h.dispatcher
        .fail_method(RpcMethod::DisassociateFloatingIp, "broker down")
        .await;

    h.controller
        .terminate_instances(&ctx(), &[failing.ec2_id.clone(), healthy.ec2_id.clone()])
        .await
        .unwrap();

    let sent = h.dispatcher.sent_with(RpcMethod::TerminateInstance).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].queue, "compute.compute-2");
    assert!(h.store.instance_get(failing.id).await.unwrap().terminated_at.is_none());
    assert!(h.store.instance_get(healthy.id).await.unwrap().terminated_at.is_some());
}

#[tokio::test]
async fn test_admin_terminate_routes_to_owning_network() {
    let h = Harness::new().await;
    let ops_network = h.store.add_network("ops", "10.9.0.0/24", None, &[]).await;
    h.store.network_set_host(ops_network, "network-ops").await.unwrap();
    let (instance, fixed) = launch_with_floating(&h, "compute-3", "203.0.113.33").await;
    h.dispatcher.clear().await;

    let admin = RequestContext::admin("ops", "root");
    h.controller
        .terminate_instances(&admin, &[instance.ec2_id.clone()])
        .await
        .unwrap();

    let sent = h.dispatcher.sent_with(RpcMethod::DisassociateFloatingIp).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].queue, "network.network-1");
    assert!(!fixed_ip(&h, &fixed).await.allocated);
    assert_eq!(h.dispatcher.sent_with(RpcMethod::TerminateInstance).await.len(), 1);
    assert!(h.store.instance_get(instance.id).await.unwrap().terminated_at.is_some());
}
