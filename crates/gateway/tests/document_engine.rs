//! Integration tests for the bug-fix document engine.
//!
//! Drives the engine against a real bare repository on local disk through
//! the `git` binary; the git host's REST API is replaced by a fake that
//! allows every push.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use gateway::auth::{authorize, AccessDecision, AccessRequest, AccessReviewer};
use gateway::config::GitConfig;
use gateway::docs::{section_body, GitWorkspace, SECTIONS};
use gateway::{
    DocumentEngine, DocumentTarget, Error, Grant, Identity, RetryPolicy, SyncOutcome, Verb,
};
use scm::{ContentApi, ScmResult};
use tempfile::TempDir;
use tokio::process::Command;

const BRANCH: &str = "bugfix/gh-123";

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// Content API that allows pushes and reports nothing on the remote
struct AllowAll;

#[async_trait]
impl ContentApi for AllowAll {
    async fn read_file(&self, _: &str, _: &str, _: &str, _: &str) -> ScmResult<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn path_exists(&self, _: &str, _: &str, _: &str, _: &str) -> ScmResult<bool> {
        Ok(false)
    }

    async fn check_push_access(&self, _: &str, _: &str, _: &str) -> ScmResult<()> {
        Ok(())
    }
}

struct AllowEverything;

#[async_trait]
impl AccessReviewer for AllowEverything {
    async fn review(&self, _: &AccessRequest) -> gateway::Result<AccessDecision> {
        Ok(AccessDecision {
            allowed: true,
            reason: None,
        })
    }
}

async fn git(cwd: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .expect("git is installed");
    assert!(status.success(), "git {args:?} failed");
}

/// Bare repository whose only branch is `bugfix/gh-123`
async fn spec_repository() -> (TempDir, String) {
    let root = TempDir::new().unwrap();
    let bare = root.path().join("specs.git");
    let seed = root.path().join("seed");
    std::fs::create_dir_all(&seed).unwrap();

    git(root.path(), &["init", "--bare", bare.to_str().unwrap()]).await;
    git(&seed, &["init"]).await;
    git(&seed, &["checkout", "-b", BRANCH]).await;
    std::fs::write(seed.join("README.md"), "# Specs\n").unwrap();
    git(&seed, &["add", "-A"]).await;
    git(
        &seed,
        &[
            "-c",
            "user.name=seed",
            "-c",
            "user.email=seed@example.com",
            "commit",
            "-m",
            "Initial commit",
        ],
    )
    .await;
    git(&seed, &["push", bare.to_str().unwrap(), BRANCH]).await;

    (root, format!("file://{}", bare.display()))
}

async fn update_grant() -> Grant {
    authorize(
        &AllowEverything,
        "team-a",
        "vteam.ambient-code",
        "bugfixworkflows",
        &[Verb::Get, Verb::Update],
        None,
    )
    .await
    .unwrap()
}

async fn remote_file(url: &str, path: &str) -> Option<String> {
    let workspace = GitWorkspace::clone(url, BRANCH, "", Duration::from_secs(60))
        .await
        .unwrap();
    workspace.read_file(path).await.unwrap()
}

#[tokio::test]
async fn issue_123_folder_and_section_round_trip() {
    init_tracing();
    let (_root, url) = spec_repository().await;
    let engine = DocumentEngine::new(
        Arc::new(AllowAll),
        GitConfig::default(),
        RetryPolicy::default(),
    );
    let grant = update_grant().await;
    let actor = Identity::anonymous();
    let target = DocumentTarget {
        repo_url: url.clone(),
        branch: BRANCH.to_string(),
        issue: 123,
        issue_url: "https://github.com/acme/app/issues/123".to_string(),
        jira_url: None,
    };

    // Folder with a seed README
    let outcome = engine
        .ensure_folder(&grant, &target, "", &actor)
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Committed);
    let readme = remote_file(&url, "bug-123/README.md").await.unwrap();
    assert!(readme.contains("Bug #123"));

    // Seeding again has nothing to commit and still succeeds
    let outcome = engine
        .ensure_folder(&grant, &target, "", &actor)
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Unchanged);

    // First section write creates the document from the skeleton
    let outcome = engine
        .upsert_section(&grant, &target, "Root Cause Analysis", "NPE in parser", "", &actor)
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Committed);

    let doc = remote_file(&url, "bug-123/bugfix-gh-123.md").await.unwrap();
    assert!(doc.contains("## Root Cause Analysis\n\nNPE in parser\n"));
    assert_eq!(
        section_body(&doc, "Root Cause Analysis").as_deref(),
        Some("NPE in parser")
    );
    for section in &SECTIONS[1..] {
        assert_eq!(
            section_body(&doc, section).as_deref(),
            Some(""),
            "{section} should still be empty"
        );
    }

    // A push with no net content change is success, not a commit error
    let outcome = engine
        .upsert_section(&grant, &target, "Root Cause Analysis", "  \n", "", &actor)
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Unchanged);
    assert_eq!(
        remote_file(&url, "bug-123/bugfix-gh-123.md").await.unwrap(),
        doc
    );
}

#[tokio::test]
async fn sections_append_in_order_across_pushes() {
    init_tracing();
    let (_root, url) = spec_repository().await;
    let engine = DocumentEngine::new(
        Arc::new(AllowAll),
        GitConfig::default(),
        RetryPolicy::default(),
    );
    let grant = update_grant().await;
    let actor = Identity::anonymous();
    let target = DocumentTarget {
        repo_url: url.clone(),
        branch: BRANCH.to_string(),
        issue: 123,
        issue_url: "https://github.com/acme/app/issues/123".to_string(),
        jira_url: Some("https://jira.example.com/browse/OPS-9".to_string()),
    };

    for (section, content) in [
        ("Resolution Plan", "X"),
        ("Testing", "unit tests added"),
        ("Resolution Plan", "Y"),
    ] {
        engine
            .upsert_section(&grant, &target, section, content, "", &actor)
            .await
            .unwrap();
    }

    let doc = remote_file(&url, "bug-123/bugfix-gh-123.md").await.unwrap();
    assert!(doc.contains("**Jira Task**: https://jira.example.com/browse/OPS-9"));
    assert_eq!(section_body(&doc, "Resolution Plan").as_deref(), Some("X\n\nY"));
    assert!(doc.find("\nY\n").unwrap() < doc.find("## Implementation Steps").unwrap());
    assert_eq!(
        section_body(&doc, "Testing").as_deref(),
        Some("unit tests added")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_replay_onto_the_moved_branch() {
    init_tracing();
    let (_root, url) = spec_repository().await;
    let engine = Arc::new(DocumentEngine::new(
        Arc::new(AllowAll),
        GitConfig::default(),
        RetryPolicy {
            max_retries: 10,
            initial_backoff_ms: 20,
        },
    ));
    let grant = update_grant().await;
    let target = DocumentTarget {
        repo_url: url.clone(),
        branch: BRANCH.to_string(),
        issue: 123,
        issue_url: "https://github.com/acme/app/issues/123".to_string(),
        jira_url: None,
    };

    let writers: Vec<_> = (0..4)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let grant = grant.clone();
            let target = target.clone();
            tokio::spawn(async move {
                engine
                    .upsert_section(
                        &grant,
                        &target,
                        "Testing",
                        &format!("writer-{i} verified"),
                        "",
                        &Identity::anonymous(),
                    )
                    .await
            })
        })
        .collect();

    for (i, writer) in writers.into_iter().enumerate() {
        match writer.await.unwrap() {
            Ok(outcome) => assert_eq!(outcome, SyncOutcome::Committed, "writer {i}"),
            Err(Error::Git { command, output }) => {
                panic!("writer {i} surfaced a raw git failure from {command}: {output}")
            }
            Err(other) => panic!("writer {i} failed: {other}"),
        }
    }

    let doc = remote_file(&url, "bug-123/bugfix-gh-123.md").await.unwrap();
    let testing = section_body(&doc, "Testing").unwrap();
    for i in 0..4 {
        assert!(
            testing.contains(&format!("writer-{i} verified")),
            "writer-{i} lost from:\n{testing}"
        );
    }
}
