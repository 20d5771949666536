use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -----------------------------------------------------------------------------
// Queues
// -----------------------------------------------------------------------------

/// Host-specific queue for a topic, e.g. `compute.host-3`.
pub fn queue_for(topic: &str, host: &str) -> String {
    format!("{}.{}", topic, host)
}

/// List key a blocking `call` waits on for its reply.
pub fn reply_queue(msg_id: Uuid) -> String {
    format!("reply.{}", msg_id)
}

// -----------------------------------------------------------------------------
// Methods understood by the remote services
// -----------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RpcMethod {
    // scheduler
    RunInstance,
    CreateVolume,
    // compute host
    TerminateInstance,
    RebootInstance,
    AttachVolume,
    DetachVolume,
    GetConsoleOutput,
    // volume host
    DeleteVolume,
    // network host
    SetNetworkHost,
    SetupFixedIp,
    AllocateFloatingIp,
    DeallocateFloatingIp,
    AssociateFloatingIp,
    DisassociateFloatingIp,
}

impl RpcMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcMethod::RunInstance => "run_instance",
            RpcMethod::CreateVolume => "create_volume",
            RpcMethod::TerminateInstance => "terminate_instance",
            RpcMethod::RebootInstance => "reboot_instance",
            RpcMethod::AttachVolume => "attach_volume",
            RpcMethod::DetachVolume => "detach_volume",
            RpcMethod::GetConsoleOutput => "get_console_output",
            RpcMethod::DeleteVolume => "delete_volume",
            RpcMethod::SetNetworkHost => "set_network_host",
            RpcMethod::SetupFixedIp => "setup_fixed_ip",
            RpcMethod::AllocateFloatingIp => "allocate_floating_ip",
            RpcMethod::DeallocateFloatingIp => "deallocate_floating_ip",
            RpcMethod::AssociateFloatingIp => "associate_floating_ip",
            RpcMethod::DisassociateFloatingIp => "disassociate_floating_ip",
        }
    }
}

// -----------------------------------------------------------------------------
// Wire envelopes
// -----------------------------------------------------------------------------

/// `{method, args}` body shared by `call` and `cast`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RpcMessage {
    pub method: RpcMethod,
    pub args: serde_json::Value,
}

impl RpcMessage {
    pub fn new(method: RpcMethod, args: serde_json::Value) -> Self {
        Self { method, args }
    }

    /// String argument lookup, used by test doubles and remote handlers.
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(|v| v.as_str())
    }
}

/// What actually travels on a queue. `reply_to` is only set for `call`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcEnvelope {
    pub msg_id: Uuid,
    pub reply_to: Option<String>,
    pub sent_at: DateTime<Utc>,
    #[serde(flatten)]
    pub message: RpcMessage,
}

impl RpcEnvelope {
    pub fn cast(message: RpcMessage) -> Self {
        Self {
            msg_id: Uuid::new_v4(),
            reply_to: None,
            sent_at: Utc::now(),
            message,
        }
    }

    pub fn call(message: RpcMessage) -> Self {
        let msg_id = Uuid::new_v4();
        Self {
            msg_id,
            reply_to: Some(reply_queue(msg_id)),
            sent_at: Utc::now(),
            message,
        }
    }
}

/// Reply pushed by the remote side of a `call`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcReply {
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default)]
    pub failure: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_flattens_method_and_args() {
        let env = RpcEnvelope::call(RpcMessage::new(
            RpcMethod::SetupFixedIp,
            json!({"address": "10.0.0.3"}),
        ));
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["method"], "setup_fixed_ip");
        assert_eq!(v["args"]["address"], "10.0.0.3");
        assert_eq!(v["reply_to"], format!("reply.{}", env.msg_id));
    }

    #[test]
    fn cast_has_no_reply_queue() {
        let env = RpcEnvelope::cast(RpcMessage::new(RpcMethod::RunInstance, json!({})));
        assert!(env.reply_to.is_none());
        assert_eq!(queue_for("compute", "node-1"), "compute.node-1");
    }

    #[test]
    fn method_names_match_serde() {
        for m in [
            RpcMethod::RunInstance,
            RpcMethod::DisassociateFloatingIp,
            RpcMethod::GetConsoleOutput,
        ] {
            let s = serde_json::to_value(m).unwrap();
            assert_eq!(s, m.as_str());
        }
    }

    #[test]
    fn reply_defaults_when_fields_missing() {
        let r: RpcReply = serde_json::from_str("{}").unwrap();
        assert!(r.result.is_null());
        assert!(r.failure.is_none());
    }
}
