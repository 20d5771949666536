use crate::{DispatchError, Dispatcher};
use async_trait::async_trait;
use nimbus_common::bus::{RpcEnvelope, RpcMessage, RpcReply};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;

/// Reply lists outlive an abandoned `call` by at most this long.
pub const REPLY_TTL_SECS: i64 = 60;

/// Topic-queue transport over Redis.
///
/// Envelopes are PUBLISHed on the queue name. A `call` then blocks on the
/// `reply_to` list until the remote side RPUSHes an [`RpcReply`] or the
/// timeout elapses. Repliers push through [`reply_pipeline`] so a reply
/// nobody pops still expires.
pub struct RedisDispatcher {
    client: redis::Client,
    call_timeout: Duration,
}

impl RedisDispatcher {
    pub fn new(client: redis::Client, call_timeout: Duration) -> Self {
        Self {
            client,
            call_timeout,
        }
    }

    async fn connect(&self, queue: &str) -> Result<MultiplexedConnection, DispatchError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| transport(queue, e))
    }
}

/// RPUSH `reply` onto `reply_to` and put a TTL on the list in one transaction.
pub fn reply_pipeline(reply_to: &str, reply: &RpcReply) -> Result<redis::Pipeline, DispatchError> {
    let payload = serde_json::to_string(reply)?;
    let mut pipe = redis::pipe();
    pipe.atomic()
        .rpush(reply_to, payload)
        .ignore()
        .expire(reply_to, REPLY_TTL_SECS)
        .ignore();
    Ok(pipe)
}

fn transport(queue: &str, err: redis::RedisError) -> DispatchError {
    DispatchError::Transport {
        queue: queue.to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl Dispatcher for RedisDispatcher {
    async fn call(
        &self,
        queue: &str,
        message: RpcMessage,
    ) -> Result<serde_json::Value, DispatchError> {
        let envelope = RpcEnvelope::call(message);
        let reply_key = envelope.reply_to.clone().unwrap_or_default();
        let payload = serde_json::to_string(&envelope)?;

        let mut conn = self.connect(queue).await?;
        let receivers: i64 = conn
            .publish(queue, payload)
            .await
            .map_err(|e| transport(queue, e))?;
        if receivers == 0 {
            return Err(DispatchError::Transport {
                queue: queue.to_string(),
                message: "no consumer subscribed".to_string(),
            });
        }

        // BLPOP holds its connection until the reply lands.
        let mut waiter = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| transport(queue, e))?;
        let popped: Option<(String, String)> = waiter
            .blpop(&reply_key, self.call_timeout.as_secs_f64())
            .await
            .map_err(|e| transport(queue, e))?;

        let Some((_, raw)) = popped else {
            tracing::warn!(queue, msg_id = %envelope.msg_id, "call timed out");
            // A late reply may have landed between the timeout and here.
            if let Err(e) = waiter.del::<_, i64>(&reply_key).await {
                tracing::debug!(queue, key = %reply_key, error = %e, "failed to drop reply list");
            }
            return Err(DispatchError::Timeout {
                queue: queue.to_string(),
                timeout_secs: self.call_timeout.as_secs(),
            });
        };

        let reply: RpcReply = serde_json::from_str(&raw)?;
        if let Some(failure) = reply.failure {
            return Err(DispatchError::Remote {
                queue: queue.to_string(),
                message: failure,
            });
        }
        Ok(reply.result)
    }

    async fn cast(&self, queue: &str, message: RpcMessage) -> Result<(), DispatchError> {
        let method = message.method.as_str();
        let envelope = RpcEnvelope::cast(message);
        let payload = serde_json::to_string(&envelope)?;

        let mut conn = self.connect(queue).await?;
        let receivers: i64 = conn
            .publish(queue, payload)
            .await
            .map_err(|e| transport(queue, e))?;
        if receivers == 0 {
            tracing::warn!(queue, method, "cast delivered to no consumer");
        }
        Ok(())
    }
}
