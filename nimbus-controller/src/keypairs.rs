use std::sync::Arc;

use chrono::Utc;
use nimbus_backends::{GeneratedKey, KeyGenError, KeyGenerator, ResourceStore};
use nimbus_common::{KeyPair, RequestContext};
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::error::{ControllerError, ControllerResult};
use crate::logger;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct KeyPairView {
    pub key_name: String,
    pub key_fingerprint: String,
}

/// Returned once at creation; the private key is never stored.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedKeyPair {
    pub key_name: String,
    pub key_fingerprint: String,
    pub key_material: String,
}

/// Runs key generation on blocking threads, at most `workers` at a time.
pub struct KeyPairService {
    store: Arc<dyn ResourceStore>,
    generator: Arc<dyn KeyGenerator>,
    permits: Arc<Semaphore>,
    vpn_key_suffix: String,
}

impl KeyPairService {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        generator: Arc<dyn KeyGenerator>,
        workers: usize,
        vpn_key_suffix: String,
    ) -> Self {
        Self {
            store,
            generator,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            vpn_key_suffix,
        }
    }

    async fn generate(&self) -> ControllerResult<GeneratedKey> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| KeyGenError("worker pool closed".to_string()))?;
        let generator = self.generator.clone();
        let key = tokio::task::spawn_blocking(move || generator.generate())
            .await
            .map_err(|e| KeyGenError(format!("worker panicked: {}", e)))??;
        Ok(key)
    }

    pub async fn create_key_pair(
        &self,
        ctx: &RequestContext,
        name: &str,
    ) -> ControllerResult<CreatedKeyPair> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ControllerError::InvalidParameter(
                "key name must not be empty".to_string(),
            ));
        }
        match self.store.key_pair_get(&ctx.user_id, name).await {
            Ok(_) => {
                return Err(ControllerError::Duplicate {
                    kind: "key_pair",
                    id: name.to_string(),
                })
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let log = logger::log_event_with_metadata(
            "CREATE_KEY_PAIR",
            ctx,
            Some(serde_json::json!({ "key_name": name })),
        );
        let result = async {
            let key = self.generate().await?;
            // A concurrent create of the same name loses here with Duplicate.
            self.store
                .key_pair_create(KeyPair {
                    user_id: ctx.user_id.clone(),
                    name: name.to_string(),
                    public_key: key.public_key,
                    fingerprint: key.fingerprint.clone(),
                    created_at: Utc::now(),
                })
                .await?;
            Ok::<_, ControllerError>(CreatedKeyPair {
                key_name: name.to_string(),
                key_fingerprint: key.fingerprint,
                key_material: key.private_key,
            })
        }
        .await;
        log.finish(result)
    }

    /// The caller's key pairs, optionally narrowed to `names`. VPN keys are
    /// only listed for admins.
    pub async fn describe_key_pairs(
        &self,
        ctx: &RequestContext,
        names: Option<&[String]>,
    ) -> ControllerResult<Vec<KeyPairView>> {
        let pairs = self.store.key_pair_get_all_by_user(&ctx.user_id).await?;
        Ok(pairs
            .into_iter()
            .filter(|kp| names.map_or(true, |n| n.iter().any(|x| x == &kp.name)))
            .filter(|kp| ctx.is_admin || !kp.name.ends_with(&self.vpn_key_suffix))
            .map(|kp| KeyPairView {
                key_name: kp.name,
                key_fingerprint: kp.fingerprint,
            })
            .collect())
    }

    /// Deleting a key that does not exist still succeeds.
    pub async fn delete_key_pair(&self, ctx: &RequestContext, name: &str) -> ControllerResult<()> {
        match self.store.key_pair_destroy(&ctx.user_id, name).await {
            Ok(()) => {
                logger::log_quick("DELETE_KEY_PAIR", ctx, name);
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Public key for launching; `NotFound` when the user has no such pair.
    pub async fn public_key(&self, ctx: &RequestContext, name: &str) -> ControllerResult<String> {
        Ok(self.store.key_pair_get(&ctx.user_id, name).await?.public_key)
    }
}
