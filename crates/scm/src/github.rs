//! GitHub REST client for repository contents and push-access checks

use crate::error::{ScmError, ScmResult};
use crate::provider::{encode_path, ContentApiFor};
use crate::repo::{Provider, RepoRef};
use async_trait::async_trait;
use reqwest::{header, Client as HttpClient, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Deserialize)]
struct GitHubError {
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct RepoPermissions {
    #[serde(default)]
    admin: bool,
    #[serde(default)]
    maintain: bool,
    #[serde(default)]
    push: bool,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    #[serde(default)]
    permissions: Option<RepoPermissions>,
}

#[derive(Debug, Deserialize)]
struct BranchResponse {
    #[serde(default)]
    protected: bool,
}

/// GitHub content API client
#[derive(Clone)]
pub struct GitHubClient {
    http_client: HttpClient,
    base_url: Option<String>,
}

impl GitHubClient {
    /// `base_url` overrides the API root for every host (GHE proxies, tests)
    pub fn new(base_url: Option<String>, timeout: Duration) -> ScmResult<Self> {
        let http_client = HttpClient::builder()
            .user_agent("vteam-gateway/0.1")
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
        })
    }

    fn api_base(&self, repo: &RepoRef) -> String {
        if let Some(base) = &self.base_url {
            return base.clone();
        }
        if repo.authority == "github.com" {
            "https://api.github.com".to_string()
        } else {
            format!("https://{}/api/v3", repo.authority)
        }
    }

    fn repo_url(&self, repo: &RepoRef) -> String {
        format!(
            "{}/repos/{}/{}",
            self.api_base(repo),
            urlencoding::encode(&repo.owner),
            urlencoding::encode(&repo.name)
        )
    }

    async fn get(&self, url: &str, token: &str, accept: &str) -> ScmResult<Response> {
        let response = self
            .http_client
            .get(url)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::ACCEPT, accept)
            .header("X-GitHub-Api-Version", API_VERSION)
            .send()
            .await?;
        Ok(response)
    }

    async fn api_error(response: Response) -> ScmError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GitHubError>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        ScmError::Api {
            provider: Provider::GitHub,
            status,
            message,
        }
    }
}

#[async_trait]
impl ContentApiFor for GitHubClient {
    #[instrument(skip(self, token), fields(repo = %repo))]
    async fn read_file(
        &self,
        repo: &RepoRef,
        branch: &str,
        path: &str,
        token: &str,
    ) -> ScmResult<Option<Vec<u8>>> {
        let url = format!(
            "{}/contents/{}?ref={}",
            self.repo_url(repo),
            encode_path(path),
            urlencoding::encode(branch)
        );

        let response = self.get(&url, token, "application/vnd.github.raw").await?;
        match response.status() {
            StatusCode::OK => Ok(Some(response.bytes().await?.to_vec())),
            StatusCode::NOT_FOUND => {
                debug!("File {} not found on {}", path, branch);
                Ok(None)
            }
            _ => Err(Self::api_error(response).await),
        }
    }

    #[instrument(skip(self, token), fields(repo = %repo))]
    async fn path_exists(
        &self,
        repo: &RepoRef,
        branch: &str,
        path: &str,
        token: &str,
    ) -> ScmResult<bool> {
        let url = format!(
            "{}/contents/{}?ref={}",
            self.repo_url(repo),
            encode_path(path),
            urlencoding::encode(branch)
        );

        let response = self.get(&url, token, "application/vnd.github+json").await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::api_error(response).await),
        }
    }

    #[instrument(skip(self, token), fields(repo = %repo))]
    async fn check_push_access(&self, repo: &RepoRef, branch: &str, token: &str) -> ScmResult<()> {
        let response = self
            .get(&self.repo_url(repo), token, "application/vnd.github+json")
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let permissions = response
            .json::<RepoResponse>()
            .await?
            .permissions
            .unwrap_or_default();
        if !(permissions.push || permissions.maintain || permissions.admin) {
            return Err(ScmError::PushDenied {
                repo: repo.to_string(),
            });
        }

        let branch_url = format!(
            "{}/branches/{}",
            self.repo_url(repo),
            urlencoding::encode(branch)
        );
        let response = self
            .get(&branch_url, token, "application/vnd.github+json")
            .await?;
        match response.status() {
            StatusCode::OK => {
                let branch_info: BranchResponse = response.json().await?;
                if branch_info.protected {
                    warn!(
                        "Branch {} on {} is protected; push may be rejected by branch rules",
                        branch, repo
                    );
                }
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(ScmError::BranchNotFound {
                repo: repo.to_string(),
                branch: branch.to_string(),
            }),
            _ => Err(Self::api_error(response).await),
        }
    }
}
