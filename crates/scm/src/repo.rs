//! Repository URL parsing and transient credential rewrites

use crate::error::{ScmError, ScmResult};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Git hosting provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[serde(rename = "github")]
    GitHub,
    #[serde(rename = "gitlab")]
    GitLab,
}

impl Provider {
    /// Classify a host name. Anything that does not look like GitLab is
    /// treated as GitHub (github.com or GitHub Enterprise).
    #[must_use]
    pub fn detect(host: &str) -> Self {
        if host.to_ascii_lowercase().contains("gitlab") {
            Self::GitLab
        } else {
            Self::GitHub
        }
    }

    /// Username paired with a token in an HTTPS remote URL
    #[must_use]
    pub fn token_username(self) -> &'static str {
        match self {
            Self::GitHub => "x-access-token",
            Self::GitLab => "oauth2",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GitHub => write!(f, "GitHub"),
            Self::GitLab => write!(f, "GitLab"),
        }
    }
}

/// A parsed remote repository reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub provider: Provider,
    /// Host plus optional port, e.g. `github.com` or `gitlab.corp:8443`
    pub authority: String,
    /// Owner, or the full group path for GitLab subgroups
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Parse an HTTPS or scp-style (`git@host:owner/repo.git`) URL
    pub fn parse(raw: &str) -> ScmResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ScmError::invalid_url(raw, "empty URL"));
        }

        let normalized = match trimmed.strip_prefix("git@") {
            Some(rest) => {
                let (host, path) = rest
                    .split_once(':')
                    .ok_or_else(|| ScmError::invalid_url(raw, "missing ':' in scp-style URL"))?;
                format!("https://{host}/{path}")
            }
            None => trimmed.to_string(),
        };

        let url = Url::parse(&normalized).map_err(|e| ScmError::invalid_url(raw, e.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| ScmError::invalid_url(raw, "missing host"))?;
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let path = url.path().trim_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() < 2 {
            return Err(ScmError::invalid_url(raw, "expected <owner>/<repository> path"));
        }

        let provider = Provider::detect(host);
        let (owner, name) = match provider {
            // github.com/<owner>/<repo>[/tree/...]
            Provider::GitHub => (segments[0].to_string(), segments[1].to_string()),
            // gitlab.com/<group>/<subgroup>/.../<project>[/-/tree/...]
            Provider::GitLab => {
                let end = segments
                    .iter()
                    .position(|s| *s == "-")
                    .unwrap_or(segments.len());
                if end < 2 {
                    return Err(ScmError::invalid_url(raw, "expected <group>/<project> path"));
                }
                (segments[..end - 1].join("/"), segments[end - 1].to_string())
            }
        };

        Ok(Self {
            provider,
            authority,
            owner,
            name,
        })
    }

    /// `owner/name` as used by both provider APIs
    #[must_use]
    pub fn full_path(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Whether this is the public SaaS host for the provider
    #[must_use]
    pub fn is_public_host(&self) -> bool {
        matches!(
            (self.provider, self.authority.as_str()),
            (Provider::GitHub, "github.com") | (Provider::GitLab, "gitlab.com")
        )
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.authority, self.full_path())
    }
}

/// A git `url.<authenticated>.insteadOf=<plain>` rewrite
///
/// Handed to git through environment configuration so the token only lives
/// for the duration of one command.
#[derive(Clone, PartialEq, Eq)]
pub struct UrlRewrite {
    pub authenticated_prefix: String,
    pub plain_prefix: String,
}

impl UrlRewrite {
    /// The git configuration key carrying this rewrite
    #[must_use]
    pub fn config_key(&self) -> String {
        format!("url.{}.insteadOf", self.authenticated_prefix)
    }
}

impl fmt::Debug for UrlRewrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlRewrite")
            .field("authenticated_prefix", &"[REDACTED]")
            .field("plain_prefix", &self.plain_prefix)
            .finish()
    }
}

/// Build the transient rewrite that injects `token` into HTTPS remotes on the
/// same host as `repo_url`. Non-HTTPS URLs (ssh, file) get no rewrite.
#[must_use]
pub fn credential_rewrite(repo_url: &str, token: &str) -> Option<UrlRewrite> {
    let url = Url::parse(repo_url.trim()).ok()?;
    if url.scheme() != "https" || token.is_empty() {
        return None;
    }
    let host = url.host_str()?;
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let user = Provider::detect(host).token_username();

    Some(UrlRewrite {
        authenticated_prefix: format!(
            "https://{user}:{}@{authority}/",
            urlencoding::encode(token)
        ),
        plain_prefix: format!("https://{authority}/"),
    })
}
