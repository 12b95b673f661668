//! Namespace-scoped store for per-user git-host tokens
//!
//! All users of a project share one Secret (tokens) and one ConfigMap
//! (connection metadata) per provider. Every change is a copy-mutate-write of
//! the whole object at the resourceVersion it was read at, replayed on
//! conflict.

use super::connection::{
    connections_config_map_name, storage_key, tokens_secret_name, GitConnection,
};
use crate::auth::Grant;
use crate::config::CredentialConfig;
use crate::error::{Error, Result};
use crate::retry::{read_modify_write, Mutation, RetryPolicy};
use crate::store::ObjectApi;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::Api;
use kube::Client;
use scm::Provider;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Token and connection storage for one provider in one namespace.
///
/// Acts with the platform's client and takes any user id, so it is only
/// reachable from inside the crate; callers get a [`UserCredentials`] bound
/// to their own identity.
///
/// [`UserCredentials`]: super::UserCredentials
pub struct CredentialStore {
    secrets: Arc<dyn ObjectApi<Secret>>,
    config_maps: Arc<dyn ObjectApi<ConfigMap>>,
    namespace: String,
    provider: Provider,
    retry: RetryPolicy,
    integration: CredentialConfig,
}

impl CredentialStore {
    /// Store in the grant's namespace. `client` is the platform's client:
    /// callers rarely hold RBAC on Secrets, so the grant is the proof that
    /// the caller may act in this project.
    #[must_use]
    pub(crate) fn new(
        client: Client,
        grant: &Grant,
        provider: Provider,
        integration: CredentialConfig,
        retry: RetryPolicy,
    ) -> Self {
        let namespace = grant.namespace();
        Self::with_apis(
            Arc::new(Api::<Secret>::namespaced(client.clone(), namespace)),
            Arc::new(Api::<ConfigMap>::namespaced(client, namespace)),
            namespace,
            provider,
            integration,
            retry,
        )
    }

    #[must_use]
    pub(crate) fn with_apis(
        secrets: Arc<dyn ObjectApi<Secret>>,
        config_maps: Arc<dyn ObjectApi<ConfigMap>>,
        namespace: &str,
        provider: Provider,
        integration: CredentialConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            secrets,
            config_maps,
            namespace: namespace.to_string(),
            provider,
            retry,
            integration,
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn provider(&self) -> Provider {
        self.provider
    }

    fn meta(&self, name: String) -> ObjectMeta {
        ObjectMeta {
            name: Some(name),
            namespace: Some(self.namespace.clone()),
            ..Default::default()
        }
    }

    /// Store (or replace) a user's token and connection metadata.
    ///
    /// The token is written first. If the metadata write then fails, the
    /// user's previous token is put back so the two never disagree.
    #[instrument(skip(self, token), fields(namespace = %self.namespace, provider = %self.provider, user = %connection.user_id))]
    pub async fn store(&self, connection: &GitConnection, token: &str) -> Result<()> {
        if connection.user_id.trim().is_empty() {
            return Err(Error::Validation("user id is required".to_string()));
        }
        if token.trim().is_empty() {
            return Err(Error::Validation("token must not be empty".to_string()));
        }
        if connection.provider != self.provider {
            return Err(Error::Validation(format!(
                "{} connection cannot be stored in the {} credential store",
                connection.provider, self.provider
            )));
        }

        let key = storage_key(&connection.user_id);
        let previous = self.set_token(&key, Some(token.as_bytes())).await?;

        if let Err(err) = self.put_connection(&key, connection).await {
            warn!(error = %err, "Connection metadata write failed, rolling back token");
            if let Err(rollback) = self.set_token(&key, previous.as_deref()).await {
                warn!(error = %rollback, "Token rollback failed");
            }
            return Err(err);
        }

        info!("Stored git credentials");
        Ok(())
    }

    /// The user's token, if stored
    pub async fn get(&self, user_id: &str) -> Result<Option<String>> {
        let key = storage_key(user_id);
        let Some(secret) = self.secrets.get_opt(&tokens_secret_name(self.provider)).await? else {
            return Ok(None);
        };
        Ok(secret
            .data
            .and_then(|mut data| data.remove(&key))
            .map(|bytes| String::from_utf8_lossy(&bytes.0).into_owned())
            .filter(|token| !token.is_empty()))
    }

    pub async fn has(&self, user_id: &str) -> Result<bool> {
        Ok(self.get(user_id).await?.is_some())
    }

    /// The user's connection metadata, if stored
    pub async fn get_connection(&self, user_id: &str) -> Result<Option<GitConnection>> {
        let key = storage_key(user_id);
        let Some(config_map) = self
            .config_maps
            .get_opt(&connections_config_map_name(self.provider))
            .await?
        else {
            return Ok(None);
        };
        match config_map.data.and_then(|mut data| data.remove(&key)) {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Every parseable connection in the namespace
    pub async fn list_connections(&self) -> Result<Vec<GitConnection>> {
        let Some(config_map) = self
            .config_maps
            .get_opt(&connections_config_map_name(self.provider))
            .await?
        else {
            return Ok(Vec::new());
        };

        Ok(config_map
            .data
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(key, raw)| match serde_json::from_str(&raw) {
                Ok(conn) => Some(conn),
                Err(e) => {
                    debug!(key = %key, error = %e, "Skipping unparseable connection");
                    None
                }
            })
            .collect())
    }

    /// Remove the user's token and metadata. Nothing stored is success.
    #[instrument(skip(self), fields(namespace = %self.namespace, provider = %self.provider))]
    pub async fn delete(&self, user_id: &str) -> Result<()> {
        let key = storage_key(user_id);
        self.set_token(&key, None).await?;

        let name = connections_config_map_name(self.provider);
        read_modify_write(self.config_maps.as_ref(), &name, &self.retry, |current| {
            let Some(mut config_map) = current else {
                return Ok(Mutation::Noop);
            };
            match config_map.data.as_mut().and_then(|d| d.remove(&key)) {
                Some(_) => Ok(Mutation::Replace(config_map)),
                None => Ok(Mutation::Noop),
            }
        })
        .await?;

        info!("Deleted git credentials");
        Ok(())
    }

    /// Token for git operations: the user's own, else the project's shared
    /// integration token
    #[instrument(skip(self), fields(namespace = %self.namespace, provider = %self.provider))]
    pub async fn resolve_git_token(&self, user_id: &str) -> Result<String> {
        if let Some(token) = self.get(user_id).await? {
            debug!("Using user's stored token");
            return Ok(token);
        }

        let secret_name = &self.integration.integration_secret_name;
        let token = self
            .secrets
            .get_opt(secret_name)
            .await?
            .and_then(|secret| secret.data)
            .and_then(|mut data| data.remove(&self.integration.integration_token_key))
            .map(|bytes| String::from_utf8_lossy(&bytes.0).trim().to_string())
            .filter(|token| !token.is_empty());

        match token {
            Some(token) => {
                debug!(secret = %secret_name, "Using project integration token");
                Ok(token)
            }
            None => {
                info!(secret = %secret_name, "No git credentials available");
                Err(Error::not_found(
                    &format!("{} credentials", self.provider),
                    &self.namespace,
                ))
            }
        }
    }

    /// Set or clear a user's token; returns the value it replaced
    async fn set_token(&self, key: &str, token: Option<&[u8]>) -> Result<Option<Vec<u8>>> {
        let name = tokens_secret_name(self.provider);
        let mut previous = None;

        read_modify_write(self.secrets.as_ref(), &name, &self.retry, |current| {
            previous = current
                .as_ref()
                .and_then(|s| s.data.as_ref())
                .and_then(|d| d.get(key))
                .map(|b| b.0.clone());

            match (current, token) {
                (None, None) => Ok(Mutation::Noop),
                (None, Some(token)) => Ok(Mutation::Create(Secret {
                    metadata: self.meta(name.clone()),
                    type_: Some("Opaque".to_string()),
                    data: Some(BTreeMap::from([(
                        key.to_string(),
                        ByteString(token.to_vec()),
                    )])),
                    ..Default::default()
                })),
                (Some(mut secret), Some(token)) => {
                    secret
                        .data
                        .get_or_insert_with(BTreeMap::new)
                        .insert(key.to_string(), ByteString(token.to_vec()));
                    Ok(Mutation::Replace(secret))
                }
                (Some(mut secret), None) => {
                    match secret.data.as_mut().and_then(|d| d.remove(key)) {
                        Some(_) => Ok(Mutation::Replace(secret)),
                        None => Ok(Mutation::Noop),
                    }
                }
            }
        })
        .await?;

        Ok(previous)
    }

    async fn put_connection(&self, key: &str, connection: &GitConnection) -> Result<()> {
        let name = connections_config_map_name(self.provider);

        read_modify_write(self.config_maps.as_ref(), &name, &self.retry, |current| {
            let mut record = connection.clone();
            // Reconnecting keeps the original connection time
            if let Some(existing) = current
                .as_ref()
                .and_then(|cm| cm.data.as_ref())
                .and_then(|d| d.get(key))
                .and_then(|raw| serde_json::from_str::<GitConnection>(raw).ok())
            {
                record.connected_at = existing.connected_at;
            }
            let raw = serde_json::to_string(&record)?;

            match current {
                None => Ok(Mutation::Create(ConfigMap {
                    metadata: self.meta(name.clone()),
                    data: Some(BTreeMap::from([(key.to_string(), raw)])),
                    ..Default::default()
                })),
                Some(mut config_map) => {
                    config_map
                        .data
                        .get_or_insert_with(BTreeMap::new)
                        .insert(key.to_string(), raw);
                    Ok(Mutation::Replace(config_map))
                }
            }
        })
        .await?;

        Ok(())
    }
}
