//! Object storage client for listing images. Public URLs follow the
//! `/storage/v1/object/public/{bucket}/{path}` convention; deletes derive the
//! path back out of that URL.

use async_trait::async_trait;
use reqwest::Client;
use urlencoding::encode;

use crate::error::MarketError;
use crate::http::build_client;
use crate::store::ObjectStore;
use crate::supabase::config::{IMAGE_BUCKET, SERVICE_KEY, STORAGE_ROOT};

#[derive(Debug, Clone)]
pub struct SupabaseStorage {
    root: String,
    bucket: String,
    service_key: String,
    http: Client,
}

impl SupabaseStorage {
    pub fn from_env() -> Self {
        Self {
            root: STORAGE_ROOT.clone(),
            bucket: IMAGE_BUCKET.clone(),
            service_key: SERVICE_KEY.clone(),
            http: build_client(),
        }
    }

    fn object_url(&self, path: &str) -> String {
        let encoded: Vec<String> = path.split('/').map(|seg| encode(seg).into_owned()).collect();
        format!("{}/object/{}/{}", self.root, self.bucket, encoded.join("/"))
    }

    pub fn public_url(&self, path: &str) -> String {
        format!("{}/object/public/{}/{}", self.root, self.bucket, path)
    }
}

#[async_trait]
impl ObjectStore for SupabaseStorage {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        mime: &str,
    ) -> Result<String, MarketError> {
        let response = self
            .http
            .post(self.object_url(path))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .header("Content-Type", mime)
            .body(bytes)
            .send()
            .await
            .map_err(|err| MarketError::transport("upload_object", err.to_string()))?;
        if !response.status().is_success() {
            return Err(MarketError::transport(
                "upload_object",
                format!("HTTP {}", response.status()),
            ));
        }
        Ok(self.public_url(path))
    }

    async fn remove(&self, path: &str) -> Result<(), MarketError> {
        let response = self
            .http
            .delete(self.object_url(path))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .send()
            .await
            .map_err(|err| MarketError::transport("delete_object", err.to_string()))?;
        if !response.status().is_success() {
            return Err(MarketError::transport(
                "delete_object",
                format!("HTTP {}", response.status()),
            ));
        }
        Ok(())
    }

    /// Everything after the `/{bucket}/` marker is the object path. A URL
    /// without the marker belongs to some other store (or is stale) and
    /// yields `None`.
    fn path_for_url(&self, url: &str) -> Option<String> {
        let marker = format!("/{}/", self.bucket);
        url.split_once(&marker)
            .map(|(_, path)| path.to_string())
            .filter(|path| !path.is_empty())
    }
}
