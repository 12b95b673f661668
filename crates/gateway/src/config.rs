//! Gateway configuration
//!
//! Loaded from a mounted ConfigMap file, then adjusted from the environment.

use crate::retry::RetryPolicy;
use scm::ScmConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Main gateway configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Platform-issued access keys (service-account tokens)
    #[serde(default, rename = "accessKeys")]
    pub access_keys: AccessKeyConfig,

    /// Conflict retry budget shared by the stores and the document engine
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Git-host credential storage
    #[serde(default)]
    pub credentials: CredentialConfig,

    /// Git transport settings for the document engine
    #[serde(default)]
    pub git: GitConfig,

    /// Git-host REST API settings
    #[serde(default)]
    pub scm: ScmConfig,

    /// Workflow API group/version overrides
    #[serde(default)]
    pub resources: ResourceConfig,
}

/// Access-key detection and last-used tracking
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccessKeyConfig {
    /// Record last use of access keys
    #[serde(default = "default_true", rename = "trackLastUsed")]
    pub track_last_used: bool,

    /// Label marking a service account as an access key
    #[serde(default = "default_label_key", rename = "labelKey")]
    pub label_key: String,

    #[serde(default = "default_label_value", rename = "labelValue")]
    pub label_value: String,

    /// Annotation holding the RFC3339 last-used time
    #[serde(default = "default_last_used_annotation", rename = "lastUsedAnnotation")]
    pub last_used_annotation: String,

    /// Upper bound on the background annotation update
    #[serde(default = "default_record_timeout", rename = "recordTimeoutSeconds")]
    pub record_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_label_key() -> String {
    "app".to_string()
}

fn default_label_value() -> String {
    "ambient-access-key".to_string()
}

fn default_last_used_annotation() -> String {
    "ambient-code.io/last-used-at".to_string()
}

fn default_record_timeout() -> u64 {
    5
}

impl Default for AccessKeyConfig {
    fn default() -> Self {
        Self {
            track_last_used: default_true(),
            label_key: default_label_key(),
            label_value: default_label_value(),
            last_used_annotation: default_last_used_annotation(),
            record_timeout_secs: default_record_timeout(),
        }
    }
}

impl AccessKeyConfig {
    #[must_use]
    pub fn record_timeout(&self) -> Duration {
        Duration::from_secs(self.record_timeout_secs)
    }
}

/// Where per-user and per-project git tokens live
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CredentialConfig {
    /// Project secret holding a shared token when the user has none
    #[serde(default = "default_integration_secret", rename = "integrationSecretName")]
    pub integration_secret_name: String,

    #[serde(default = "default_integration_key", rename = "integrationTokenKey")]
    pub integration_token_key: String,
}

fn default_integration_secret() -> String {
    "ambient-non-vertex-integrations".to_string()
}

fn default_integration_key() -> String {
    "GITHUB_TOKEN".to_string()
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            integration_secret_name: default_integration_secret(),
            integration_token_key: default_integration_key(),
        }
    }
}

/// Git transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitConfig {
    /// Committer name when the caller has no display name
    #[serde(default = "default_author_name", rename = "authorName")]
    pub author_name: String,

    /// Committer email when the caller has none
    #[serde(default = "default_author_email", rename = "authorEmail")]
    pub author_email: String,

    /// Timeout for a single git subprocess
    #[serde(default = "default_command_timeout", rename = "commandTimeoutSeconds")]
    pub command_timeout_secs: u64,
}

fn default_author_name() -> String {
    "vTeam".to_string()
}

fn default_author_email() -> String {
    "vteam@ambient-code.com".to_string()
}

fn default_command_timeout() -> u64 {
    120
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            author_name: default_author_name(),
            author_email: default_author_email(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

impl GitConfig {
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Overrides for the workflow CRDs' API group and version
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub group: Option<String>,

    #[serde(default)]
    pub version: Option<String>,
}

impl GatewayConfig {
    /// Load configuration from mounted ConfigMap file
    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        let config: GatewayConfig = serde_yaml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))?;

        debug!(path = config_path, "Loaded gateway configuration");
        Ok(config)
    }

    /// File (or defaults when `config_path` is `None`), environment overrides,
    /// then validation
    pub fn load(config_path: Option<&str>) -> Result<Self, anyhow::Error> {
        let mut config = match config_path {
            Some(path) => Self::from_mounted_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        info!(
            github_api = config.scm.github_api_url.as_deref().unwrap_or("default"),
            gitlab_api = config.scm.gitlab_api_url.as_deref().unwrap_or("default"),
            "Gateway configuration ready"
        );
        Ok(config)
    }

    /// Apply `GATEWAY_*` overrides from `lookup` (normally the process environment)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("GATEWAY_GITHUB_API_URL") {
            self.scm.github_api_url = Some(url);
        }
        if let Some(url) = non_empty("GATEWAY_GITLAB_API_URL") {
            self.scm.gitlab_api_url = Some(url);
        }
        if let Some(name) = non_empty("GATEWAY_GIT_AUTHOR_NAME") {
            self.git.author_name = name;
        }
        if let Some(email) = non_empty("GATEWAY_GIT_AUTHOR_EMAIL") {
            self.git.author_email = email;
        }
    }

    /// Validate that configuration has required fields
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.git.author_name.trim().is_empty() || self.git.author_email.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "git.authorName and git.authorEmail must not be empty"
            ));
        }
        if self.git.command_timeout_secs == 0 {
            return Err(anyhow::anyhow!("git.commandTimeoutSeconds must be positive"));
        }
        if self.scm.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("scm.requestTimeoutSeconds must be positive"));
        }
        if self.access_keys.label_key.is_empty() || self.access_keys.last_used_annotation.is_empty()
        {
            return Err(anyhow::anyhow!(
                "accessKeys.labelKey and accessKeys.lastUsedAnnotation must not be empty"
            ));
        }
        if self.credentials.integration_secret_name.is_empty()
            || self.credentials.integration_token_key.is_empty()
        {
            return Err(anyhow::anyhow!(
                "credentials.integrationSecretName and credentials.integrationTokenKey must not be empty"
            ));
        }
        for (field, value) in [
            ("resources.group", &self.resources.group),
            ("resources.version", &self.resources.version),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(anyhow::anyhow!("{field} must not be empty when set"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_platform_conventions() {
        let config = GatewayConfig::default();
        assert_eq!(config.git.author_name, "vTeam");
        assert_eq!(config.git.author_email, "vteam@ambient-code.com");
        assert_eq!(config.access_keys.label_value, "ambient-access-key");
        assert_eq!(config.access_keys.record_timeout(), Duration::from_secs(5));
        assert_eq!(config.retry, RetryPolicy::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn loads_partial_yaml_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "git:\n  authorName: Spec Bot\nretry:\n  maxRetries: 5\nscm:\n  requestTimeoutSeconds: 30\nresources:\n  group: vteam.example.com"
        )
        .unwrap();

        let config = GatewayConfig::from_mounted_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.git.author_name, "Spec Bot");
        assert_eq!(config.git.author_email, "vteam@ambient-code.com");
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.initial_backoff_ms, 100);
        assert_eq!(config.scm.request_timeout_secs, 30);
        assert_eq!(config.resources.group.as_deref(), Some("vteam.example.com"));
    }

    #[test]
    fn environment_overrides_apply() {
        let mut config = GatewayConfig::default();
        config.apply_overrides(|key| match key {
            "GATEWAY_GITHUB_API_URL" => Some("https://ghe.example.com/api/v3".to_string()),
            "GATEWAY_GIT_AUTHOR_EMAIL" => Some("bot@example.com".to_string()),
            "GATEWAY_GIT_AUTHOR_NAME" => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(
            config.scm.github_api_url.as_deref(),
            Some("https://ghe.example.com/api/v3")
        );
        assert_eq!(config.git.author_email, "bot@example.com");
        assert_eq!(config.git.author_name, "vTeam");
    }

    #[test]
    fn rejects_blank_overrides_and_zero_timeouts() {
        let mut config = GatewayConfig::default();
        config.resources.version = Some(String::new());
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.git.command_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(GatewayConfig::from_mounted_file("/nonexistent/gateway.yaml").is_err());
    }
}
