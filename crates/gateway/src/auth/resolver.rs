//! Caller identity resolution from request headers
//!
//! Behind the platform's identity proxy the forwarded headers are trusted as
//! is. Without them the bearer credential is validated with a TokenReview
//! issued by the platform's own client, which is used for nothing else.

use super::identity::{BearerToken, CredentialSource, Identity, Principal};
use crate::config::AccessKeyConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use axum::extract::Query;
use axum::http::{HeaderMap, Uri};
use chrono::{SecondsFormat, Utc};
use k8s_openapi::api::authentication::v1::{TokenReview, TokenReviewSpec};
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub const FORWARDED_USER: &str = "x-forwarded-user";
pub const FORWARDED_PREFERRED_USERNAME: &str = "x-forwarded-preferred-username";
pub const FORWARDED_EMAIL: &str = "x-forwarded-email";
pub const FORWARDED_GROUPS: &str = "x-forwarded-groups";
pub const FORWARDED_ACCESS_TOKEN: &str = "x-forwarded-access-token";

/// Result of validating a bearer credential
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenReviewOutcome {
    pub authenticated: bool,
    pub username: String,
    pub uid: Option<String>,
    pub groups: Vec<String>,
    pub error: Option<String>,
}

/// Validates opaque bearer credentials
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenReviewer: Send + Sync {
    async fn review(&self, token: &str) -> Result<TokenReviewOutcome>;
}

/// `TokenReview` against the API server with the platform's client
pub struct KubeTokenReviewer {
    client: Client,
}

impl KubeTokenReviewer {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TokenReviewer for KubeTokenReviewer {
    async fn review(&self, token: &str) -> Result<TokenReviewOutcome> {
        let review = TokenReview {
            spec: TokenReviewSpec {
                token: Some(token.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let api: Api<TokenReview> = Api::all(self.client.clone());
        let result = api.create(&PostParams::default(), &review).await?;
        let status = result.status.unwrap_or_default();
        let user = status.user.unwrap_or_default();

        Ok(TokenReviewOutcome {
            authenticated: status.authenticated.unwrap_or(false),
            username: user.username.unwrap_or_default(),
            uid: user.uid,
            groups: user.groups.unwrap_or_default(),
            error: status.error,
        })
    }
}

/// Records that a service-account access key was used
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccessKeyRecorder: Send + Sync {
    /// Returns whether the account was an access key and got annotated
    async fn record_use(&self, namespace: &str, name: &str) -> Result<bool>;
}

/// Annotates access-key service accounts with the platform's client
pub struct KubeAccessKeyRecorder {
    client: Client,
    config: AccessKeyConfig,
}

impl KubeAccessKeyRecorder {
    #[must_use]
    pub fn new(client: Client, config: AccessKeyConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl AccessKeyRecorder for KubeAccessKeyRecorder {
    async fn record_use(&self, namespace: &str, name: &str) -> Result<bool> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let Some(account) = api.get_opt(name).await? else {
            return Ok(false);
        };
        let is_access_key = account
            .labels()
            .get(&self.config.label_key)
            .is_some_and(|v| *v == self.config.label_value);
        if !is_access_key {
            return Ok(false);
        }

        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let patch = json!({
            "metadata": {
                "annotations": { self.config.last_used_annotation.as_str(): now }
            }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(true)
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// `token` query parameter, for websocket-style callers that cannot set headers
#[must_use]
pub fn query_token(uri: &Uri) -> Option<String> {
    Query::<HashMap<String, String>>::try_from_uri(uri)
        .ok()
        .and_then(|Query(params)| params.get("token").cloned())
        .filter(|t| !t.trim().is_empty())
}

/// The bearer credential in priority order: `Authorization` (`Bearer <t>` or a
/// bare token), `X-Forwarded-Access-Token`, then the query parameter when
/// neither header is present
#[must_use]
pub fn extract_bearer(
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Option<(BearerToken, CredentialSource)> {
    if let Some(raw) = header(headers, axum::http::header::AUTHORIZATION.as_str()) {
        let token = match raw.split_once(' ') {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest,
            _ => raw.as_str(),
        };
        if let Some(token) = BearerToken::new(token) {
            return Some((token, CredentialSource::AuthorizationHeader));
        }
    }

    if let Some(token) = header(headers, FORWARDED_ACCESS_TOKEN).and_then(|t| BearerToken::new(&t))
    {
        return Some((token, CredentialSource::ForwardedAccessToken));
    }

    query_token
        .and_then(BearerToken::new)
        .map(|t| (t, CredentialSource::QueryParameter))
}

/// Identity asserted by the trusted proxy, if its headers are present
fn forwarded_identity(headers: &HeaderMap) -> Option<Identity> {
    let user_id = header(headers, FORWARDED_USER)?;
    let username = header(headers, FORWARDED_PREFERRED_USERNAME).unwrap_or_else(|| user_id.clone());
    let groups = header(headers, FORWARDED_GROUPS)
        .map(|g| {
            g.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Some(Identity {
        source: CredentialSource::ForwardedHeader,
        token: None,
        principal: Some(Principal::User {
            username: username.clone(),
        }),
        user_id,
        display_name: username,
        email: header(headers, FORWARDED_EMAIL),
        groups,
    })
}

/// Turns request headers into an [`Identity`]
pub struct CredentialResolver {
    reviewer: Arc<dyn TokenReviewer>,
    recorder: Arc<dyn AccessKeyRecorder>,
    access_keys: AccessKeyConfig,
}

impl CredentialResolver {
    #[must_use]
    pub fn new(
        reviewer: Arc<dyn TokenReviewer>,
        recorder: Arc<dyn AccessKeyRecorder>,
        access_keys: AccessKeyConfig,
    ) -> Self {
        Self {
            reviewer,
            recorder,
            access_keys,
        }
    }

    /// Resolve the caller. No proxy headers and no credential yields an
    /// anonymous identity, which every authorization step rejects; a
    /// credential the cluster does not accept is an error.
    #[instrument(skip_all)]
    pub async fn resolve(&self, headers: &HeaderMap, query_token: Option<&str>) -> Result<Identity> {
        let bearer = extract_bearer(headers, query_token);

        if let Some(mut identity) = forwarded_identity(headers) {
            debug!(
                user = %identity.user_id,
                has_token = bearer.is_some(),
                "Using identity from proxy headers"
            );
            identity.token = bearer.map(|(token, _)| token);
            return Ok(identity);
        }

        let Some((token, source)) = bearer else {
            debug!("No credential presented");
            return Ok(Identity::anonymous());
        };

        let outcome = self.reviewer.review(token.expose()).await?;
        if !outcome.authenticated || outcome.username.is_empty() {
            info!(%source, token_len = token.len(), "Token review rejected credential");
            return Err(Error::Unauthenticated(
                outcome
                    .error
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| "invalid or expired token".to_string()),
            ));
        }

        let principal = Principal::from_username(&outcome.username);
        debug!(%source, principal = %principal, "Token review accepted credential");

        if let Principal::ServiceAccount { namespace, name } = &principal {
            self.record_access_key_use(namespace, name);
        }

        Ok(Identity {
            source,
            token: Some(token),
            user_id: outcome.uid.unwrap_or_else(|| outcome.username.clone()),
            display_name: principal.to_string(),
            principal: Some(principal),
            email: None,
            groups: outcome.groups,
        })
    }

    /// Fire-and-forget last-used annotation; never delays or fails the request
    fn record_access_key_use(&self, namespace: &str, name: &str) {
        if !self.access_keys.track_last_used {
            return;
        }

        let recorder = Arc::clone(&self.recorder);
        let timeout = self.access_keys.record_timeout();
        let namespace = namespace.to_string();
        let name = name.to_string();
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, recorder.record_use(&namespace, &name)).await {
                Ok(Ok(true)) => debug!(%namespace, %name, "Recorded access key use"),
                Ok(Ok(false)) => {}
                Ok(Err(e)) => warn!(%namespace, %name, error = %e, "Failed to record access key use"),
                Err(_) => warn!(%namespace, %name, "Timed out recording access key use"),
            }
        });
    }
}
