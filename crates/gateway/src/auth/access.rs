//! Self-subject access review and the grants it produces

use super::identity::Principal;
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use kube::api::{Api, PostParams};
use kube::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info, instrument};

/// Kubernetes API verb
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Get,
    List,
    Create,
    Update,
    Patch,
    Delete,
}

impl Verb {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::List => "list",
            Self::Create => "create",
            Self::Update => "update",
            Self::Patch => "patch",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One "may I?" question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    pub namespace: String,
    pub group: String,
    pub resource: String,
    pub verb: Verb,
}

/// The reviewer's answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

/// Asks the cluster whether the current credential may perform a request
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccessReviewer: Send + Sync {
    async fn review(&self, request: &AccessRequest) -> Result<AccessDecision>;
}

/// `SelfSubjectAccessReview` issued with the caller's own scoped client
pub struct SelfSubjectAccessReviewer {
    client: Client,
}

impl SelfSubjectAccessReviewer {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AccessReviewer for SelfSubjectAccessReviewer {
    async fn review(&self, request: &AccessRequest) -> Result<AccessDecision> {
        let review = SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    namespace: Some(request.namespace.clone()),
                    group: Some(request.group.clone()),
                    resource: Some(request.resource.clone()),
                    verb: Some(request.verb.as_str().to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };

        let api: Api<SelfSubjectAccessReview> = Api::all(self.client.clone());
        let result = api.create(&PostParams::default(), &review).await?;
        let status = result.status.unwrap_or_default();

        let reason = status
            .reason
            .filter(|r| !r.is_empty())
            .or(status.evaluation_error.filter(|e| !e.is_empty()));
        Ok(AccessDecision {
            allowed: status.allowed && !status.denied.unwrap_or(false),
            reason,
        })
    }
}

/// Proof that an access review allowed `verbs` on `resource` in `namespace`.
///
/// Only [`authorize`] constructs one, so a function that takes a `Grant` can
/// only be reached after a successful review.
#[derive(Debug, Clone)]
pub struct Grant {
    namespace: String,
    group: String,
    resource: String,
    verbs: BTreeSet<Verb>,
    principal: Option<Principal>,
}

impl Grant {
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    #[must_use]
    pub fn permits(&self, namespace: &str, verb: Verb) -> bool {
        self.namespace == namespace && self.verbs.contains(&verb)
    }

    /// Fail unless the grant covers `verb` on `resource` in `namespace`
    pub fn require(&self, namespace: &str, resource: &str, verb: Verb) -> Result<()> {
        if self.resource != resource {
            return Err(Error::forbidden(format!(
                "grant covers {} not {resource}",
                self.resource
            )));
        }
        if !self.permits(namespace, verb) {
            return Err(Error::forbidden(format!(
                "not authorized to {verb} {resource} in namespace {namespace}"
            )));
        }
        Ok(())
    }

    /// Fail unless the grant covers `verb` in its own namespace
    pub fn require_verb(&self, verb: Verb) -> Result<()> {
        self.require(&self.namespace, &self.resource, verb)
    }

    #[cfg(test)]
    pub(crate) fn for_tests(namespace: &str, resource: &str, verbs: &[Verb]) -> Self {
        Self {
            namespace: namespace.to_string(),
            group: "vteam.ambient-code".to_string(),
            resource: resource.to_string(),
            verbs: verbs.iter().copied().collect(),
            principal: None,
        }
    }
}

/// Review every verb (one review per verb, never cached) and return a grant
/// only if all are allowed
#[instrument(skip(reviewer, principal))]
pub async fn authorize(
    reviewer: &dyn AccessReviewer,
    namespace: &str,
    group: &str,
    resource: &str,
    verbs: &[Verb],
    principal: Option<&Principal>,
) -> Result<Grant> {
    if verbs.is_empty() {
        return Err(Error::Validation("no verbs requested".to_string()));
    }

    for verb in verbs {
        let request = AccessRequest {
            namespace: namespace.to_string(),
            group: group.to_string(),
            resource: resource.to_string(),
            verb: *verb,
        };
        let decision = reviewer.review(&request).await?;
        if !decision.allowed {
            info!(%verb, resource, namespace, "Access review denied");
            return Err(Error::forbidden(decision.reason.unwrap_or_else(|| {
                format!("not authorized to {verb} {resource} in namespace {namespace}")
            })));
        }
        debug!(%verb, resource, namespace, "Access review allowed");
    }

    Ok(Grant {
        namespace: namespace.to_string(),
        group: group.to_string(),
        resource: resource.to_string(),
        verbs: verbs.iter().copied().collect(),
        principal: principal.cloned(),
    })
}
