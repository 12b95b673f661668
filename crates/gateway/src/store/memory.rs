//! In-memory `ObjectApi` with API-server write semantics, for tests
//!
//! Enforces resourceVersion compare-and-swap, assigns uid and
//! creationTimestamp on create, keeps status and spec on separate write paths,
//! and lets a test interleave a competing writer before the next write.

use super::backend::ObjectApi;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::ErrorResponse;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;

type Interleave<K> = Box<dyn FnOnce(&mut K) + Send>;

struct State<K> {
    objects: BTreeMap<String, K>,
    version: u64,
    writes: usize,
    interleave: Vec<(String, Interleave<K>)>,
}

pub(crate) struct MemoryApi<K> {
    state: Mutex<State<K>>,
}

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

impl<K> MemoryApi<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                objects: BTreeMap::new(),
                version: 0,
                writes: 0,
                interleave: Vec::new(),
            }),
        }
    }

    /// Store an object as-is, bypassing validation (seeds malformed items)
    pub(crate) fn insert_raw(&self, mut obj: K) {
        let mut state = self.state.lock().unwrap();
        state.version += 1;
        obj.meta_mut().resource_version = Some(state.version.to_string());
        let name = obj.meta().name.clone().unwrap_or_default();
        state.objects.insert(name, obj);
    }

    pub(crate) fn stored(&self, name: &str) -> Option<K> {
        self.state.lock().unwrap().objects.get(name).cloned()
    }

    /// Number of successful writes
    pub(crate) fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    /// Apply `f` to the stored object right before the next write to `name`,
    /// as if another client had won the race
    pub(crate) fn interleave(&self, name: &str, f: impl FnOnce(&mut K) + Send + 'static) {
        self.state
            .lock()
            .unwrap()
            .interleave
            .push((name.to_string(), Box::new(f)));
    }

    fn run_interleaved(state: &mut State<K>, name: &str) {
        if let Some(pos) = state.interleave.iter().position(|(n, _)| n == name) {
            let (_, f) = state.interleave.remove(pos);
            state.version += 1;
            let version = state.version.to_string();
            if let Some(obj) = state.objects.get_mut(name) {
                f(obj);
                obj.meta_mut().resource_version = Some(version);
            }
        }
    }

    fn check_version(stored: &K, incoming: &K, name: &str) -> Result<()> {
        if stored.meta().resource_version != incoming.meta().resource_version {
            return Err(api_error(
                409,
                "Conflict",
                format!("the object has been modified; please apply your changes to the latest version: {name}"),
            ));
        }
        Ok(())
    }

    fn with_status_of(target: &K, source: &K) -> Result<K> {
        let mut value = serde_json::to_value(target)?;
        let status = serde_json::to_value(source)?
            .get("status")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        if let Some(map) = value.as_object_mut() {
            if status.is_null() {
                map.remove("status");
            } else {
                map.insert("status".to_string(), status);
            }
        }
        Ok(serde_json::from_value(value)?)
    }
}

fn matches_selector<K: Resource>(obj: &K, selector: &str) -> bool {
    let labels = obj.meta().labels.clone().unwrap_or_default();
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
            None => labels.contains_key(term),
        })
}

#[async_trait]
impl<K> ObjectApi<K> for MemoryApi<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get_opt(&self, name: &str) -> Result<Option<K>> {
        Ok(self.stored(name))
    }

    async fn list(&self, label_selector: &str) -> Result<Vec<K>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .values()
            .filter(|obj| matches_selector(*obj, label_selector))
            .cloned()
            .collect())
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let mut state = self.state.lock().unwrap();
        let name = obj.meta().name.clone().unwrap_or_default();
        Self::run_interleaved(&mut state, &name);
        if state.objects.contains_key(&name) {
            return Err(api_error(409, "AlreadyExists", format!("{name} already exists")));
        }

        state.version += 1;
        let mut created = obj.clone();
        let meta = created.meta_mut();
        meta.resource_version = Some(state.version.to_string());
        meta.uid = Some(format!("uid-{}", state.version));
        meta.creation_timestamp = Some(Time(Utc::now()));
        state.writes += 1;
        state.objects.insert(name, created.clone());
        Ok(created)
    }

    async fn replace(&self, name: &str, obj: &K) -> Result<K> {
        let mut state = self.state.lock().unwrap();
        Self::run_interleaved(&mut state, name);
        let stored = state
            .objects
            .get(name)
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound", format!("{name} not found")))?;
        Self::check_version(&stored, obj, name)?;

        // The main resource endpoint ignores status changes
        let mut updated = Self::with_status_of(obj, &stored)?;
        state.version += 1;
        let meta = updated.meta_mut();
        meta.resource_version = Some(state.version.to_string());
        meta.uid = stored.meta().uid.clone();
        meta.creation_timestamp = stored.meta().creation_timestamp.clone();
        state.writes += 1;
        state.objects.insert(name.to_string(), updated.clone());
        Ok(updated)
    }

    async fn replace_status(&self, name: &str, obj: &K) -> Result<K> {
        let mut state = self.state.lock().unwrap();
        Self::run_interleaved(&mut state, name);
        let stored = state
            .objects
            .get(name)
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound", format!("{name} not found")))?;
        Self::check_version(&stored, obj, name)?;

        let mut updated = Self::with_status_of(&stored, obj)?;
        state.version += 1;
        updated.meta_mut().resource_version = Some(state.version.to_string());
        state.writes += 1;
        state.objects.insert(name.to_string(), updated.clone());
        Ok(updated)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let removed = state.objects.remove(name).is_some();
        if removed {
            state.writes += 1;
        }
        Ok(removed)
    }
}
