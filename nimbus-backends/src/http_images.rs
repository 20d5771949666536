use crate::{ImageInfo, ImageRegistry, StoreError, StoreResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Image registry reached over HTTP: `GET {base_url}/images/{image_id}`.
pub struct HttpImageRegistry {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpImageRegistry {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> StoreResult<Self> {
        // A stalled registry must not hold a provisioning request forever.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| StoreError::Backend(format!("image registry client: {}", e)))?;
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        let auth_token = auth_token
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Ok(Self {
            client,
            base_url,
            auth_token,
        })
    }

    fn image_url(&self, image_id: &str) -> String {
        format!("{}/images/{}", self.base_url, image_id)
    }
}

#[async_trait]
impl ImageRegistry for HttpImageRegistry {
    async fn get(&self, image_id: &str) -> StoreResult<ImageInfo> {
        let mut req = self.client.get(self.image_url(image_id));
        if let Some(token) = &self.auth_token {
            req = req.header("X-Auth-Token", token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("image registry unreachable: {}", e)))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::FORBIDDEN {
            return Err(StoreError::not_found("image", image_id));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(StoreError::Backend(format!(
                "image registry returned {} for {}: {}",
                status, image_id, text
            )));
        }

        let info: ImageInfo = resp
            .json()
            .await
            .map_err(|e| StoreError::Backend(format!("bad image record for {}: {}", image_id, e)))?;
        tracing::debug!(image_id, kernel = ?info.kernel_id, ramdisk = ?info.ramdisk_id, "image resolved");
        Ok(info)
    }
}
