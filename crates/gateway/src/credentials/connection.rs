//! Git-host connection metadata and per-user storage keys

use chrono::{DateTime, Utc};
use scm::Provider;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// A user's connection to a git host. The token itself lives in a Secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitConnection {
    pub user_id: String,
    pub provider: Provider,
    /// Account id on the git host
    pub account_id: String,
    pub username: String,
    /// Base URL for self-hosted instances
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_url: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GitConnection {
    #[must_use]
    pub fn new(user_id: &str, provider: Provider, account_id: &str, username: &str) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_string(),
            provider,
            account_id: account_id.to_string(),
            username: username.to_string(),
            instance_url: None,
            connected_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_instance_url(mut self, url: impl Into<String>) -> Self {
        self.instance_url = Some(url.into());
        self
    }
}

/// Secret holding one token per user for `provider`
#[must_use]
pub fn tokens_secret_name(provider: Provider) -> String {
    format!("{}-user-tokens", provider_slug(provider))
}

/// ConfigMap holding one connection record per user for `provider`
#[must_use]
pub fn connections_config_map_name(provider: Provider) -> String {
    format!("{}-connections", provider_slug(provider))
}

fn provider_slug(provider: Provider) -> &'static str {
    match provider {
        Provider::GitHub => "github",
        Provider::GitLab => "gitlab",
    }
}

/// Data key for a user id.
///
/// Secret and ConfigMap keys only allow `[-._a-zA-Z0-9]`, while user ids from
/// identity providers may contain anything. Other bytes, and `_` itself, are
/// written as `_xx` (lowercase hex), so distinct ids never share a key.
#[must_use]
pub fn storage_key(user_id: &str) -> String {
    let mut key = String::with_capacity(user_id.len());
    for byte in user_id.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' => key.push(byte as char),
            _ => {
                let _ = write!(key, "_{byte:02x}");
            }
        }
    }
    key
}
