//! Clients that carry exactly one caller's credential

use super::identity::BearerToken;
use crate::error::{Error, Result};
use kube::config::AuthInfo;
use kube::{Client, Config};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Mints per-request clients from an immutable base configuration.
///
/// The base supplies the cluster endpoint and TLS roots only. Whatever
/// credential it was loaded with (token file, exec plugin, client
/// certificate, impersonation) is replaced, never merged.
#[derive(Clone)]
pub struct ScopedClientFactory {
    base: Arc<Config>,
}

impl ScopedClientFactory {
    #[must_use]
    pub fn new(base: Config) -> Self {
        Self {
            base: Arc::new(base),
        }
    }

    /// The base configuration with its authentication swapped for `token`
    pub fn scoped_config(&self, token: &BearerToken) -> Result<Config> {
        let auth_info: AuthInfo = serde_json::from_value(json!({ "token": token.expose() }))
            .map_err(|e| Error::Unauthenticated(format!("unusable credential: {e}")))?;

        let mut config = Config::clone(&self.base);
        config.auth_info = auth_info;
        Ok(config)
    }

    /// A client whose only authority is `token`
    pub fn client_for(&self, token: &BearerToken) -> Result<Client> {
        let config = self.scoped_config(token)?;
        let client = Client::try_from(config).map_err(|e| {
            Error::Unauthenticated(format!("failed to build client for credential: {e}"))
        })?;
        debug!(token_len = token.len(), "Built scoped client");
        Ok(client)
    }
}
