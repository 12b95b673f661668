//! Workflow Custom Resource Definitions

pub mod bugfix;
pub mod common;
pub mod rfe;

pub use bugfix::{BugFixWorkflow, BugFixWorkflowSpec, BugFixWorkflowStatus};
pub use common::GitRepository;
pub use rfe::{RFEWorkflow, RFEWorkflowSpec, RFEWorkflowStatus, WorkflowJiraLink};

use crate::error::Result;
use kube::core::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Debug;

/// The workflow kinds served by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowKind {
    BugFix,
    Rfe,
}

impl WorkflowKind {
    /// Label key identifying a workflow of this kind by id
    #[must_use]
    pub fn workflow_label(self) -> &'static str {
        match self {
            Self::BugFix => "bugfix-workflow",
            Self::Rfe => "rfe-workflow",
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BugFix => write!(f, "BugFixWorkflow"),
            Self::Rfe => write!(f, "RFEWorkflow"),
        }
    }
}

/// A namespaced workflow custom resource the state store can manage
pub trait WorkflowResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    const KIND: WorkflowKind;

    /// Checks the schema cannot express (non-empty required URLs and the like)
    fn validate(&self) -> Result<()>;

    /// Labels specific to this kind, on top of `project` and the workflow label
    fn extra_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}
