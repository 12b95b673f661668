//! Wire access to namespaced Kubernetes objects
//!
//! The stores only need a handful of verbs, so they talk to this trait instead
//! of `kube::Api` directly. Not-found comes back as `None` / `false` rather
//! than an error.

use crate::error::{is_not_found, Result};
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::fmt::Debug;
use tracing::debug;

#[async_trait]
pub trait ObjectApi<K>: Send + Sync
where
    K: Clone + Send + Sync + 'static,
{
    /// The named object, or `None` when it does not exist
    async fn get_opt(&self, name: &str) -> Result<Option<K>>;

    /// Objects matching a label selector
    async fn list(&self, label_selector: &str) -> Result<Vec<K>>;

    /// Create; fails with a 409 when the name is taken
    async fn create(&self, obj: &K) -> Result<K>;

    /// Replace; `obj` must carry the resourceVersion it was read at
    async fn replace(&self, name: &str, obj: &K) -> Result<K>;

    /// Write only the status subresource, guarded by the object's resourceVersion
    async fn replace_status(&self, name: &str, obj: &K) -> Result<K>;

    /// Delete; `false` when the object was already gone
    async fn delete(&self, name: &str) -> Result<bool>;
}

#[async_trait]
impl<K> ObjectApi<K> for Api<K>
where
    K: kube::Resource + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get_opt(&self, name: &str) -> Result<Option<K>> {
        Ok(Api::get_opt(self, name).await?)
    }

    async fn list(&self, label_selector: &str) -> Result<Vec<K>> {
        let params = ListParams::default().labels(label_selector);
        Ok(Api::list(self, &params).await?.items)
    }

    async fn create(&self, obj: &K) -> Result<K> {
        Ok(Api::create(self, &PostParams::default(), obj).await?)
    }

    async fn replace(&self, name: &str, obj: &K) -> Result<K> {
        Ok(Api::replace(self, name, &PostParams::default(), obj).await?)
    }

    async fn replace_status(&self, name: &str, obj: &K) -> Result<K> {
        // A merge patch carrying resourceVersion is rejected with 409 when stale,
        // which gives the status path the same compare-and-swap as replace
        let value = serde_json::to_value(obj)?;
        let patch = json!({
            "metadata": {
                "resourceVersion": value.pointer("/metadata/resourceVersion"),
            },
            "status": value.get("status"),
        });
        Ok(Api::patch_status(self, name, &PatchParams::default(), &Patch::Merge(&patch)).await?)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        match Api::delete(self, name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => {
                debug!(name, "Object already deleted");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
