//! `RFEWorkflow` Custom Resource Definition for feature-request workspaces

use super::common::GitRepository;
use super::{WorkflowKind, WorkflowResource};
use crate::error::{Error, Result};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Jira issue linked to a document path in the umbrella repository
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct WorkflowJiraLink {
    pub path: String,
    #[serde(rename = "jiraKey")]
    pub jira_key: String,
}

/// `RFEWorkflow` spec
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "vteam.ambient-code",
    version = "v1alpha1",
    kind = "RFEWorkflow",
    plural = "rfeworkflows"
)]
#[kube(namespaced)]
#[kube(status = "RFEWorkflowStatus")]
#[kube(printcolumn = r#"{"name":"Title","type":"string","jsonPath":".spec.title"}"#)]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct RFEWorkflowSpec {
    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub branch_name: String,

    #[serde(default)]
    pub workspace_path: String,

    /// Repository holding the feature's spec documents
    pub umbrella_repo: GitRepository,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supporting_repos: Vec<GitRepository>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jira_links: Vec<WorkflowJiraLink>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_outcome: Option<String>,
}

/// Status of an `RFEWorkflow`
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RFEWorkflowStatus {
    #[serde(default)]
    pub phase: String,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub completed: bool,
}

impl WorkflowResource for RFEWorkflow {
    const KIND: WorkflowKind = WorkflowKind::Rfe;

    fn validate(&self) -> Result<()> {
        if self.spec.umbrella_repo.url.trim().is_empty() {
            return Err(Error::Validation(format!(
                "RFEWorkflow {} missing required field: umbrellaRepo.url",
                self.name_any()
            )));
        }
        if let Some(i) = self
            .spec
            .supporting_repos
            .iter()
            .position(|r| r.url.trim().is_empty())
        {
            return Err(Error::Validation(format!(
                "RFEWorkflow {} supportingRepos[{i}] has no url",
                self.name_any()
            )));
        }
        Ok(())
    }
}
