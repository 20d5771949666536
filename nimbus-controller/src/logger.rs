use std::time::Instant;

use nimbus_common::RequestContext;
use uuid::Uuid;

use crate::error::ControllerError;

/// An in-flight action. Emitted once at start and once on completion, both
/// carrying the same `log_id` so the pair can be correlated.
#[derive(Debug)]
pub struct ActionLog {
    pub log_id: Uuid,
    action_type: &'static str,
    request_id: Uuid,
    tenant_id: String,
    started: Instant,
}

/// Log event with metadata (context info)
pub fn log_event_with_metadata(
    action_type: &'static str,
    ctx: &RequestContext,
    metadata: Option<serde_json::Value>,
) -> ActionLog {
    let log_id = Uuid::new_v4();
    let metadata = metadata.unwrap_or(serde_json::Value::Null);
    tracing::info!(
        %log_id,
        action_type,
        status = "in_progress",
        request_id = %ctx.request_id,
        tenant_id = %ctx.tenant_id,
        user_id = %ctx.user_id,
        %metadata,
        "action started"
    );
    ActionLog {
        log_id,
        action_type,
        request_id: ctx.request_id,
        tenant_id: ctx.tenant_id.clone(),
        started: Instant::now(),
    }
}

impl ActionLog {
    pub fn duration_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Log event completion with duration
    pub fn complete(self, status: &str, error_message: Option<&str>) {
        let duration_ms = self.duration_ms();
        match error_message {
            None => tracing::info!(
                log_id = %self.log_id,
                action_type = self.action_type,
                status,
                duration_ms,
                request_id = %self.request_id,
                tenant_id = %self.tenant_id,
                "action completed"
            ),
            Some(error_message) => tracing::warn!(
                log_id = %self.log_id,
                action_type = self.action_type,
                status,
                duration_ms,
                request_id = %self.request_id,
                tenant_id = %self.tenant_id,
                error_message,
                "action failed"
            ),
        }
    }

    /// Close the log from an operation result and hand the result back.
    pub fn finish<T>(self, result: Result<T, ControllerError>) -> Result<T, ControllerError> {
        match &result {
            Ok(_) => self.complete("success", None),
            Err(e) => self.complete("failed", Some(&e.to_string())),
        }
        result
    }
}

/// Quick log for one-off events
pub fn log_quick(action_type: &'static str, ctx: &RequestContext, details: &str) {
    tracing::info!(
        action_type,
        request_id = %ctx.request_id,
        tenant_id = %ctx.tenant_id,
        details,
        "event"
    );
}
