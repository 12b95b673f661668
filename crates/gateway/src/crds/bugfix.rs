//! `BugFixWorkflow` Custom Resource Definition for GitHub-issue bug-fix workspaces

use super::common::{lenient_u64, GitRepository};
use super::{WorkflowKind, WorkflowResource};
use crate::error::{Error, Result};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `BugFixWorkflow` spec
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "vteam.ambient-code",
    version = "v1alpha1",
    kind = "BugFixWorkflow",
    plural = "bugfixworkflows"
)]
#[kube(namespaced)]
#[kube(status = "BugFixWorkflowStatus")]
#[kube(printcolumn = r#"{"name":"Issue","type":"integer","jsonPath":".spec.githubIssueNumber"}"#)]
#[kube(printcolumn = r#"{"name":"Branch","type":"string","jsonPath":".spec.branchName"}"#)]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct BugFixWorkflowSpec {
    #[serde(deserialize_with = "lenient_u64")]
    #[schemars(with = "u64")]
    pub github_issue_number: u64,

    #[serde(default, rename = "githubIssueURL")]
    pub github_issue_url: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub branch_name: String,

    #[serde(default)]
    pub workspace_path: String,

    /// Repository containing the code the bug is in
    pub implementation_repo: GitRepository,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jira_task_key: Option<String>,

    #[serde(default, rename = "jiraTaskURL", skip_serializing_if = "Option::is_none")]
    pub jira_task_url: Option<String>,

    /// RFC3339 time of the last Jira sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<String>,
}

/// Status of a `BugFixWorkflow`
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BugFixWorkflowStatus {
    /// Initializing, Ready, ...
    #[serde(default)]
    pub phase: String,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub implementation_completed: bool,
}

impl BugFixWorkflow {
    /// Branch the spec documents for this issue live on
    #[must_use]
    pub fn default_branch_name(issue_number: u64) -> String {
        format!("bugfix/gh-{issue_number}")
    }
}

impl WorkflowResource for BugFixWorkflow {
    const KIND: WorkflowKind = WorkflowKind::BugFix;

    fn validate(&self) -> Result<()> {
        if self.spec.implementation_repo.url.trim().is_empty() {
            return Err(Error::Validation(format!(
                "BugFixWorkflow {} missing required field: implementationRepo.url",
                self.name_any()
            )));
        }
        if self.spec.github_issue_number == 0 {
            return Err(Error::Validation(format!(
                "BugFixWorkflow {} missing required field: githubIssueNumber",
                self.name_any()
            )));
        }
        Ok(())
    }

    fn extra_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(
            "bugfix-issue-number".to_string(),
            self.spec.github_issue_number.to_string(),
        )])
    }
}
