//! Bug-fix document synchronization against the spec repository
//!
//! Writes go through a private shallow clone: check push access, clone, edit
//! one file, commit, push. A push that loses to a concurrent writer replays
//! the whole cycle on a fresh clone. Reads go through the git host's content
//! API and never clone.

use super::document::{
    document_path, folder_path, readme, readme_path, skeleton, upsert_section,
};
use super::git::GitWorkspace;
use crate::auth::{Grant, Identity, Verb};
use crate::config::GitConfig;
use crate::crds::BugFixWorkflow;
use crate::error::Result;
use crate::retry::{retry_on_conflict, RetryPolicy};
use scm::ContentApi;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Where one issue's documents live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentTarget {
    pub repo_url: String,
    pub branch: String,
    pub issue: u64,
    pub issue_url: String,
    pub jira_url: Option<String>,
}

impl DocumentTarget {
    /// The workflow's implementation repository on its working branch
    #[must_use]
    pub fn for_workflow(workflow: &BugFixWorkflow) -> Self {
        let spec = &workflow.spec;
        let branch = if spec.branch_name.trim().is_empty() {
            BugFixWorkflow::default_branch_name(spec.github_issue_number)
        } else {
            spec.branch_name.clone()
        };
        Self {
            repo_url: spec.implementation_repo.url.clone(),
            branch,
            issue: spec.github_issue_number,
            issue_url: spec.github_issue_url.clone(),
            jira_url: spec.jira_task_url.clone(),
        }
    }
}

/// Result of a write that may have had nothing to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A commit was pushed
    Committed,
    /// The branch already had the content
    Unchanged,
}

pub struct DocumentEngine {
    content: Arc<dyn ContentApi>,
    git: GitConfig,
    retry: RetryPolicy,
}

impl DocumentEngine {
    #[must_use]
    pub fn new(content: Arc<dyn ContentApi>, git: GitConfig, retry: RetryPolicy) -> Self {
        Self {
            content,
            git,
            retry,
        }
    }

    /// Create `bug-<n>/` with a seed README unless it is already there
    #[instrument(skip(self, grant, token, actor), fields(repo = %target.repo_url, branch = %target.branch, issue = target.issue))]
    pub async fn ensure_folder(
        &self,
        grant: &Grant,
        target: &DocumentTarget,
        token: &str,
        actor: &Identity,
    ) -> Result<SyncOutcome> {
        let issue = target.issue;
        let message = format!("Create bug folder for issue #{issue}");
        self.edit_file(grant, target, token, actor, &readme_path(issue), &message, |current| {
            current.is_none().then(|| readme(issue))
        })
        .await
    }

    /// Append `content` to `section` of the issue's document, creating the
    /// document from the skeleton when it does not exist yet
    #[instrument(skip(self, grant, content, token, actor), fields(repo = %target.repo_url, branch = %target.branch, issue = target.issue))]
    pub async fn upsert_section(
        &self,
        grant: &Grant,
        target: &DocumentTarget,
        section: &str,
        content: &str,
        token: &str,
        actor: &Identity,
    ) -> Result<SyncOutcome> {
        let message = format!(
            "Update bugfix documentation for issue #{}: {section}",
            target.issue
        );
        let path = document_path(target.issue);
        self.edit_file(grant, target, token, actor, &path, &message, |current| {
            let base = match current {
                Some(doc) => doc.to_string(),
                None => skeleton(target.issue, &target.issue_url, target.jira_url.as_deref()),
            };
            let updated = upsert_section(&base, section, content);
            (current != Some(updated.as_str())).then_some(updated)
        })
        .await
    }

    /// File contents through the content API; `None` when absent
    pub async fn read_file(
        &self,
        repo_url: &str,
        branch: &str,
        path: &str,
        token: &str,
    ) -> Result<Option<String>> {
        let bytes = self.content.read_file(repo_url, branch, path, token).await?;
        Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    pub async fn path_exists(
        &self,
        repo_url: &str,
        branch: &str,
        path: &str,
        token: &str,
    ) -> Result<bool> {
        Ok(self
            .content
            .path_exists(repo_url, branch, path, token)
            .await?)
    }

    /// The issue's bug-fix document, if written yet
    pub async fn read_document(&self, target: &DocumentTarget, token: &str) -> Result<Option<String>> {
        self.read_file(
            &target.repo_url,
            &target.branch,
            &document_path(target.issue),
            token,
        )
        .await
    }

    /// Whether `bug-<n>/` exists on the branch (duplicate workflow detection)
    pub async fn folder_exists(&self, target: &DocumentTarget, token: &str) -> Result<bool> {
        self.path_exists(
            &target.repo_url,
            &target.branch,
            &folder_path(target.issue),
            token,
        )
        .await
    }

    fn committer(&self, actor: &Identity) -> (String, String) {
        let name = if actor.display_name.trim().is_empty() {
            self.git.author_name.clone()
        } else {
            actor.display_name.clone()
        };
        let email = actor
            .email
            .clone()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| self.git.author_email.clone());
        (name, email)
    }

    /// Clone, apply `edit` to `path`, commit and push; replayed from a fresh
    /// clone when the push is rejected. `edit` gets the current contents and
    /// returns the new ones, or `None` to leave the file alone.
    #[allow(clippy::too_many_arguments)]
    async fn edit_file<F>(
        &self,
        grant: &Grant,
        target: &DocumentTarget,
        token: &str,
        actor: &Identity,
        path: &str,
        message: &str,
        edit: F,
    ) -> Result<SyncOutcome>
    where
        F: Fn(Option<&str>) -> Option<String> + Send + Sync,
    {
        grant.require_verb(Verb::Update)?;

        // Fail before paying for a clone
        self.content
            .check_push_access(&target.repo_url, &target.branch, token)
            .await?;

        let (name, email) = self.committer(actor);
        let edit = &edit;
        let outcome = retry_on_conflict(&self.retry, path, |attempt| {
            let name = name.clone();
            let email = email.clone();
            async move {
                debug!(attempt, path, "Syncing document");
                let workspace = GitWorkspace::clone(
                    &target.repo_url,
                    &target.branch,
                    token,
                    self.git.command_timeout(),
                )
                .await?;
                workspace.configure_identity(&name, &email).await?;

                let current = workspace.read_file(path).await?;
                if let Some(updated) = edit(current.as_deref()) {
                    workspace.write_file(path, &updated).await?;
                }

                if !workspace.commit_all(message).await? {
                    return Ok(SyncOutcome::Unchanged);
                }
                workspace.push().await?;
                Ok(SyncOutcome::Committed)
            }
        })
        .await?;

        match outcome {
            SyncOutcome::Committed => info!(path, "Pushed document update"),
            SyncOutcome::Unchanged => debug!(path, "Document already up to date"),
        }
        Ok(outcome)
    }
}
