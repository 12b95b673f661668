//! Provider-agnostic content API

use crate::error::ScmResult;
use crate::github::GitHubClient;
use crate::gitlab::GitLabClient;
use crate::repo::{Provider, RepoRef};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Read-only repository access through a git host's REST API
#[async_trait]
pub trait ContentApi: Send + Sync {
    /// Raw file contents at `path` on `branch`; `None` when the path is absent
    async fn read_file(
        &self,
        repo_url: &str,
        branch: &str,
        path: &str,
        token: &str,
    ) -> ScmResult<Option<Vec<u8>>>;

    /// Whether `path` (file or directory) exists on `branch`
    async fn path_exists(
        &self,
        repo_url: &str,
        branch: &str,
        path: &str,
        token: &str,
    ) -> ScmResult<bool>;

    /// Fail unless `token` may push to `branch`
    async fn check_push_access(&self, repo_url: &str, branch: &str, token: &str) -> ScmResult<()>;
}

fn default_timeout_secs() -> u64 {
    15
}

/// HTTP settings for the content API clients
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScmConfig {
    /// Override for the GitHub API base (defaults to api.github.com or `<host>/api/v3`)
    #[serde(default, rename = "githubApiUrl")]
    pub github_api_url: Option<String>,

    /// Override for the GitLab API base (defaults to `<host>/api/v4`)
    #[serde(default, rename = "gitlabApiUrl")]
    pub gitlab_api_url: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs", rename = "requestTimeoutSeconds")]
    pub request_timeout_secs: u64,
}

impl Default for ScmConfig {
    fn default() -> Self {
        Self {
            github_api_url: None,
            gitlab_api_url: None,
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

impl ScmConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Dispatches content API calls to the provider behind each repository URL
pub struct ScmClient {
    github: GitHubClient,
    gitlab: GitLabClient,
}

impl ScmClient {
    pub fn new(config: &ScmConfig) -> ScmResult<Self> {
        Ok(Self {
            github: GitHubClient::new(config.github_api_url.clone(), config.request_timeout())?,
            gitlab: GitLabClient::new(config.gitlab_api_url.clone(), config.request_timeout())?,
        })
    }

    fn route(&self, repo_url: &str) -> ScmResult<(RepoRef, &dyn ContentApiFor)> {
        let repo = RepoRef::parse(repo_url)?;
        let client: &dyn ContentApiFor = match repo.provider {
            Provider::GitHub => &self.github,
            Provider::GitLab => &self.gitlab,
        };
        debug!(repo = %repo, provider = %repo.provider, "Routing content API call");
        Ok((repo, client))
    }
}

/// Provider clients operate on an already parsed [`RepoRef`]
#[async_trait]
pub(crate) trait ContentApiFor: Send + Sync {
    async fn read_file(
        &self,
        repo: &RepoRef,
        branch: &str,
        path: &str,
        token: &str,
    ) -> ScmResult<Option<Vec<u8>>>;

    async fn path_exists(
        &self,
        repo: &RepoRef,
        branch: &str,
        path: &str,
        token: &str,
    ) -> ScmResult<bool>;

    async fn check_push_access(&self, repo: &RepoRef, branch: &str, token: &str) -> ScmResult<()>;
}

#[async_trait]
impl ContentApi for ScmClient {
    async fn read_file(
        &self,
        repo_url: &str,
        branch: &str,
        path: &str,
        token: &str,
    ) -> ScmResult<Option<Vec<u8>>> {
        let (repo, client) = self.route(repo_url)?;
        client.read_file(&repo, branch, path, token).await
    }

    async fn path_exists(
        &self,
        repo_url: &str,
        branch: &str,
        path: &str,
        token: &str,
    ) -> ScmResult<bool> {
        let (repo, client) = self.route(repo_url)?;
        client.path_exists(&repo, branch, path, token).await
    }

    async fn check_push_access(&self, repo_url: &str, branch: &str, token: &str) -> ScmResult<()> {
        let (repo, client) = self.route(repo_url)?;
        client.check_push_access(&repo, branch, token).await
    }
}

/// Percent-encode each segment of a repository path, keeping the separators
pub(crate) fn encode_path(path: &str) -> String {
    path.trim_matches('/')
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_segments_but_not_separators() {
        assert_eq!(encode_path("/bug-1/notes file.md"), "bug-1/notes%20file.md");
    }

    #[test]
    fn default_timeout_is_fifteen_seconds() {
        assert_eq!(ScmConfig::default().request_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn rejects_unparseable_repository() {
        let client = ScmClient::new(&ScmConfig::default()).unwrap();
        assert!(client.route("https://github.com/only-owner").is_err());
    }
}
