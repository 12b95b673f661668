//! Ephemeral git working copies driven through the `git` binary
//!
//! The token never reaches `.git/config`, the command line or a remote URL on
//! disk: each command gets a `url.<authenticated>.insteadOf=<plain>` rewrite
//! through `GIT_CONFIG_COUNT`/`GIT_CONFIG_KEY_n`/`GIT_CONFIG_VALUE_n`, and all
//! captured output is redacted before it is logged or returned.

use crate::error::{Error, Result};
use scm::{credential_rewrite, UrlRewrite};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, warn};

const REDACTED: &str = "[REDACTED]";

/// Markers git prints when the remote branch moved under us. The ref-lock
/// lines come from a concurrent push landing between our fetch and update,
/// reported as `[remote rejected]`.
const REJECTION_MARKERS: [&str; 6] = [
    "[rejected]",
    "non-fast-forward",
    "fetch first",
    "cannot lock ref",
    "failed to update ref",
    "incorrect old value",
];

/// Whether a failed push lost a race rather than being refused outright
fn lost_push_race(output: &str) -> bool {
    REJECTION_MARKERS.iter().any(|m| output.contains(m))
}

/// A shallow single-branch clone in a private temporary directory. Dropping
/// the workspace removes the directory.
pub struct GitWorkspace {
    dir: TempDir,
    repo_dir: PathBuf,
    branch: String,
    token: String,
    rewrite: Option<UrlRewrite>,
    timeout: Duration,
}

impl std::fmt::Debug for GitWorkspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitWorkspace")
            .field("repo_dir", &self.repo_dir)
            .field("branch", &self.branch)
            .finish_non_exhaustive()
    }
}

impl GitWorkspace {
    /// Clone `branch` of `repo_url` at depth 1
    pub async fn clone(
        repo_url: &str,
        branch: &str,
        token: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("spec-repo-").tempdir()?;
        let repo_dir = dir.path().join("repo");
        let workspace = Self {
            rewrite: credential_rewrite(repo_url, token),
            token: token.to_string(),
            branch: branch.to_string(),
            repo_dir,
            dir,
            timeout,
        };

        debug!(branch, target = %workspace.repo_dir.display(), "Cloning repository");
        let target = workspace.repo_dir.to_string_lossy().into_owned();
        workspace
            .run_in(
                workspace.dir.path(),
                &[
                    "clone",
                    "--depth",
                    "1",
                    "--single-branch",
                    "--branch",
                    branch,
                    repo_url,
                    &target,
                ],
            )
            .await?;
        Ok(workspace)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.repo_dir
    }

    #[must_use]
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Committer identity for this working copy only
    pub async fn configure_identity(&self, name: &str, email: &str) -> Result<()> {
        self.run(&["config", "user.name", name]).await?;
        self.run(&["config", "user.email", email]).await?;
        Ok(())
    }

    /// Contents of a repository-relative file, `None` if absent
    pub async fn read_file(&self, relative: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.repo_dir.join(relative)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a repository-relative file, creating parent directories
    pub async fn write_file(&self, relative: &str, contents: &str) -> Result<()> {
        let path = self.repo_dir.join(relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await?;
        Ok(())
    }

    #[must_use]
    pub fn exists(&self, relative: &str) -> bool {
        self.repo_dir.join(relative).exists()
    }

    /// Stage everything and commit. `false` when there was nothing to commit.
    pub async fn commit_all(&self, message: &str) -> Result<bool> {
        self.run(&["add", "-A"]).await?;
        let status = self.run(&["status", "--porcelain"]).await?;
        if status.trim().is_empty() {
            debug!("Nothing to commit");
            return Ok(false);
        }
        self.run(&["commit", "-m", message]).await?;
        Ok(true)
    }

    /// Push the checked-out branch. A remote that moved since the clone is
    /// reported as [`Error::PushRejected`].
    pub async fn push(&self) -> Result<()> {
        let refspec = format!("HEAD:refs/heads/{}", self.branch);
        match self.run(&["push", "origin", &refspec]).await {
            Err(Error::Git { output, .. }) if lost_push_race(&output) => {
                warn!(branch = %self.branch, "Push rejected, remote branch moved");
                Err(Error::PushRejected {
                    branch: self.branch.clone(),
                    output,
                })
            }
            other => other.map(|_| ()),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        self.run_in(&self.repo_dir, args).await
    }

    async fn run_in(&self, cwd: &Path, args: &[&str]) -> Result<String> {
        let command = args.first().copied().unwrap_or_default().to_string();

        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(rewrite) = &self.rewrite {
            cmd.env("GIT_CONFIG_COUNT", "1")
                .env("GIT_CONFIG_KEY_0", rewrite.config_key())
                .env("GIT_CONFIG_VALUE_0", &rewrite.plain_prefix);
        }

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| Error::Git {
                command: command.clone(),
                output: format!("timed out after {}s", self.timeout.as_secs()),
            })??;

        let stdout = self.redact(&String::from_utf8_lossy(&output.stdout));
        if !output.status.success() {
            let stderr = self.redact(&String::from_utf8_lossy(&output.stderr));
            debug!(command = %command, status = ?output.status.code(), "git command failed");
            return Err(Error::Git {
                command,
                output: format!("{}\n{}", stderr.trim(), stdout.trim())
                    .trim()
                    .to_string(),
            });
        }
        Ok(stdout)
    }

    /// Git only ever sees the token through the rewrite, so there is nothing
    /// to scrub without one
    fn redact(&self, text: &str) -> String {
        match &self.rewrite {
            Some(rewrite) => text
                .replace(&rewrite.authenticated_prefix, &rewrite.plain_prefix)
                .replace(&self.token, REDACTED),
            None => text.to_string(),
        }
    }
}
