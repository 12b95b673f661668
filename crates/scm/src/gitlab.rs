//! GitLab REST client for repository contents and push-access checks

use crate::error::{ScmError, ScmResult};
use crate::provider::ContentApiFor;
use crate::repo::{Provider, RepoRef};
use async_trait::async_trait;
use reqwest::{header, Client as HttpClient, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

/// Developer access level; the minimum that may push to unprotected branches
const DEVELOPER_ACCESS: u32 = 30;

#[derive(Debug, Deserialize)]
struct AccessLevel {
    access_level: u32,
}

#[derive(Debug, Default, Deserialize)]
struct ProjectPermissions {
    #[serde(default)]
    project_access: Option<AccessLevel>,
    #[serde(default)]
    group_access: Option<AccessLevel>,
}

#[derive(Debug, Deserialize)]
struct ProjectResponse {
    #[serde(default)]
    permissions: Option<ProjectPermissions>,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    #[allow(dead_code)]
    path: String,
}

/// GitLab content API client
#[derive(Clone)]
pub struct GitLabClient {
    http_client: HttpClient,
    base_url: Option<String>,
}

impl GitLabClient {
    /// `base_url` overrides the API root for every host (self-hosted proxies, tests)
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

    fn project_url(&self, repo: &RepoRef) -> String {
        let base = match &self.base_url {
            Some(base) => base.clone(),
            None => format!("https://{}/api/v4", repo.authority),
        };
        format!("{base}/projects/{}", urlencoding::encode(&repo.full_path()))
    }

    async fn get(&self, url: &str, token: &str) -> ScmResult<Response> {
        let response = self
            .http_client
            .get(url)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .await?;
        Ok(response)
    }

    async fn api_error(response: Response) -> ScmError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        // GitLab reports either {"message": ...} or {"error": ...}
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                v.get("message")
                    .or_else(|| v.get("error"))
                    .map(|m| m.as_str().map_or_else(|| m.to_string(), str::to_string))
            })
            .unwrap_or(body);
        ScmError::Api {
            provider: Provider::GitLab,
            status,
            message,
        }
    }
}

#[async_trait]
impl ContentApiFor for GitLabClient {
    #[instrument(skip(self, token), fields(repo = %repo))]
    async fn read_file(
        &self,
        repo: &RepoRef,
        branch: &str,
        path: &str,
        token: &str,
    ) -> ScmResult<Option<Vec<u8>>> {
        let url = format!(
            "{}/repository/files/{}/raw?ref={}",
            self.project_url(repo),
            urlencoding::encode(path.trim_matches('/')),
            urlencoding::encode(branch)
        );

        let response = self.get(&url, token).await?;
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
        let trimmed = path.trim_matches('/');

        // Files answer on the metadata endpoint, directories only show up in the tree
        let file_url = format!(
            "{}/repository/files/{}?ref={}",
            self.project_url(repo),
            urlencoding::encode(trimmed),
            urlencoding::encode(branch)
        );
        let response = self.get(&file_url, token).await?;
        match response.status() {
            StatusCode::OK => return Ok(true),
            StatusCode::NOT_FOUND => {}
            _ => return Err(Self::api_error(response).await),
        }

        let tree_url = format!(
            "{}/repository/tree?path={}&ref={}&per_page=1",
            self.project_url(repo),
            urlencoding::encode(trimmed),
            urlencoding::encode(branch)
        );
        let response = self.get(&tree_url, token).await?;
        match response.status() {
            StatusCode::OK => {
                let entries: Vec<TreeEntry> = response.json().await?;
                Ok(!entries.is_empty())
            }
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::api_error(response).await),
        }
    }

    #[instrument(skip(self, token), fields(repo = %repo))]
    async fn check_push_access(&self, repo: &RepoRef, branch: &str, token: &str) -> ScmResult<()> {
        let response = self.get(&self.project_url(repo), token).await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let permissions = response
            .json::<ProjectResponse>()
            .await?
            .permissions
            .unwrap_or_default();
        let level = [permissions.project_access, permissions.group_access]
            .into_iter()
            .flatten()
            .map(|a| a.access_level)
            .max()
            .unwrap_or(0);
        if level < DEVELOPER_ACCESS {
            return Err(ScmError::PushDenied {
                repo: repo.to_string(),
            });
        }

        let branch_url = format!(
            "{}/repository/branches/{}",
            self.project_url(repo),
            urlencoding::encode(branch)
        );
        let response = self.get(&branch_url, token).await?;
        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => Err(ScmError::BranchNotFound {
                repo: repo.to_string(),
                branch: branch.to_string(),
            }),
            _ => Err(Self::api_error(response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ContentApi, ScmClient, ScmConfig};
    use wiremock::matchers::{method, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const REPO: &str = "https://gitlab.example.com/platform/tools/specs.git";

    async fn client_for(server: &MockServer) -> ScmClient {
        ScmClient::new(&ScmConfig {
            gitlab_api_url: Some(server.uri()),
            ..ScmConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn read_file_uses_encoded_project_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(
                r"^/projects/platform(%2F|/)tools(%2F|/)specs/repository/files/bug-7(%2F|/)README\.md/raw$",
            ))
            .and(query_param("ref", "bugfix/gh-7"))
            .respond_with(ResponseTemplate::new(200).set_body_string("# Bug #7"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let body = client
            .read_file(REPO, "bugfix/gh-7", "bug-7/README.md", "glpat")
            .await
            .unwrap();
        assert_eq!(body.as_deref(), Some(&b"# Bug #7"[..]));
    }

    #[tokio::test]
    async fn directory_found_through_tree_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"/repository/files/bug-7$"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"/repository/tree$"))
            .and(query_param("path", "bug-7"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"[{"path":"bug-7/README.md"}]"#),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert!(client.path_exists(REPO, "main", "bug-7", "t").await.unwrap());
    }

    #[tokio::test]
    async fn empty_tree_means_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"/repository/files/bug-8$"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"/repository/tree$"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert!(!client.path_exists(REPO, "main", "bug-8", "t").await.unwrap());
    }

    #[tokio::test]
    async fn reporter_cannot_push() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/projects/[^/]+(/tools/specs)?$"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"permissions":{"project_access":{"access_level":20},"group_access":null}}"#,
            ))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .check_push_access(REPO, "main", "t")
            .await
            .unwrap_err();
        assert!(matches!(err, ScmError::PushDenied { .. }));
    }

    #[tokio::test]
    async fn group_developer_can_push() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"/repository/branches/main$"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"name":"main"}"#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/projects/[^/]+(/tools/specs)?$"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"permissions":{"project_access":null,"group_access":{"access_level":30}}}"#,
            ))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client.check_push_access(REPO, "main", "t").await.unwrap();
    }
}
