//! Group/version/resource descriptors for the workflow kinds

use crate::config::ResourceConfig;
use crate::crds::{BugFixWorkflow, RFEWorkflow, WorkflowKind, WorkflowResource};
use kube::core::ApiResource;
use tracing::info;

/// Resolved API descriptors, fixed at process start
#[derive(Debug, Clone)]
pub struct ResourceRegistry {
    bugfix: ApiResource,
    rfe: ApiResource,
}

impl ResourceRegistry {
    /// Descriptors derived from the CRD types, with the configured group and
    /// version applied on top
    #[must_use]
    pub fn new(config: &ResourceConfig) -> Self {
        let mut bugfix = ApiResource::erase::<BugFixWorkflow>(&());
        let mut rfe = ApiResource::erase::<RFEWorkflow>(&());

        for resource in [&mut bugfix, &mut rfe] {
            if let Some(group) = &config.group {
                resource.group.clone_from(group);
            }
            if let Some(version) = &config.version {
                resource.version.clone_from(version);
            }
            resource.api_version = if resource.group.is_empty() {
                resource.version.clone()
            } else {
                format!("{}/{}", resource.group, resource.version)
            };
        }

        if config.group.is_some() || config.version.is_some() {
            info!(
                api_version = %bugfix.api_version,
                "Using overridden workflow API group/version"
            );
        }

        Self { bugfix, rfe }
    }

    #[must_use]
    pub fn get(&self, kind: WorkflowKind) -> &ApiResource {
        match kind {
            WorkflowKind::BugFix => &self.bugfix,
            WorkflowKind::Rfe => &self.rfe,
        }
    }

    #[must_use]
    pub fn of<W: WorkflowResource>(&self) -> &ApiResource {
        self.get(W::KIND)
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new(&ResourceConfig::default())
    }
}
