//! Workflow custom-resource state store
//!
//! Typed workflows are converted to and from `DynamicObject` only at the edge
//! of this module; the registry decides the group/version they are written at.

use super::backend::ObjectApi;
use super::registry::ResourceRegistry;
use crate::auth::{Grant, Verb};
use crate::crds::WorkflowResource;
use crate::error::{Error, Result};
use crate::retry::{read_modify_write, retry_on_conflict, Mutation, RetryPolicy};
use kube::api::{Api, DynamicObject};
use kube::core::ApiResource;
use kube::{Client, ResourceExt};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Label every workflow carries with its namespace, used for listing
pub const PROJECT_LABEL: &str = "project";

/// Typed workflow → wire object, stamped with the registry's apiVersion/kind
/// and the listing labels. Server-owned metadata is cleared.
pub fn to_dynamic<W: WorkflowResource>(
    workflow: &W,
    resource: &ApiResource,
    namespace: &str,
) -> Result<DynamicObject> {
    let name = workflow
        .meta()
        .name
        .clone()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::Validation(format!("{} requires a name", W::KIND)))?;

    let mut labels = workflow.labels().clone();
    labels.insert(PROJECT_LABEL.to_string(), namespace.to_string());
    labels.insert(W::KIND.workflow_label().to_string(), name);
    labels.extend(workflow.extra_labels());

    let mut value = serde_json::to_value(workflow)?;
    if let Some(map) = value.as_object_mut() {
        map.insert("apiVersion".to_string(), Value::from(resource.api_version.clone()));
        map.insert("kind".to_string(), Value::from(resource.kind.clone()));
    }

    let mut obj: DynamicObject = serde_json::from_value(value)?;
    let meta = &mut obj.metadata;
    meta.namespace = Some(namespace.to_string());
    meta.labels = Some(labels);
    meta.resource_version = None;
    meta.uid = None;
    meta.creation_timestamp = None;
    meta.managed_fields = None;
    Ok(obj)
}

/// Wire object → typed workflow. A missing required field is an error, never
/// a defaulted value.
pub fn from_dynamic<W: WorkflowResource>(obj: DynamicObject) -> Result<W> {
    let name = obj.name_any();
    let mut value = serde_json::to_value(obj)?;
    if let Some(map) = value.as_object_mut() {
        // The registry may serve the kind at a different group/version than the type declares
        map.insert("apiVersion".to_string(), Value::from(W::api_version(&()).into_owned()));
        map.insert("kind".to_string(), Value::from(W::kind(&()).into_owned()));
    }

    let workflow: W = serde_json::from_value(value)
        .map_err(|e| Error::Validation(format!("{} {name} is malformed: {e}", W::KIND)))?;
    workflow.validate()?;
    Ok(workflow)
}

/// Existing object's identity and concurrency token, incoming spec, and the
/// union of both annotation sets (incoming wins per key)
fn merge_for_update(existing: &DynamicObject, desired: &DynamicObject) -> DynamicObject {
    let mut next = desired.clone();
    let meta = &mut next.metadata;
    meta.resource_version.clone_from(&existing.metadata.resource_version);
    meta.uid.clone_from(&existing.metadata.uid);
    meta.creation_timestamp
        .clone_from(&existing.metadata.creation_timestamp);
    if meta.owner_references.is_none() {
        meta.owner_references.clone_from(&existing.metadata.owner_references);
    }
    if meta.finalizers.is_none() {
        meta.finalizers.clone_from(&existing.metadata.finalizers);
    }

    let mut annotations = existing.metadata.annotations.clone().unwrap_or_default();
    annotations.extend(desired.metadata.annotations.clone().unwrap_or_default());
    meta.annotations = (!annotations.is_empty()).then_some(annotations);
    next
}

/// Namespace-bound store for one workflow kind
pub struct WorkflowStore<W> {
    api: Arc<dyn ObjectApi<DynamicObject>>,
    resource: ApiResource,
    namespace: String,
    retry: RetryPolicy,
    _kind: PhantomData<fn() -> W>,
}

impl<W: WorkflowResource> WorkflowStore<W> {
    /// Store backed by `client`, normally the caller's scoped client
    #[must_use]
    pub fn new(
        client: Client,
        namespace: &str,
        registry: &ResourceRegistry,
        retry: RetryPolicy,
    ) -> Self {
        let resource = registry.of::<W>().clone();
        let api: Api<DynamicObject> = Api::namespaced_with(client, namespace, &resource);
        Self::with_api(Arc::new(api), namespace, resource, retry)
    }

    #[must_use]
    pub fn with_api(
        api: Arc<dyn ObjectApi<DynamicObject>>,
        namespace: &str,
        resource: ApiResource,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            api,
            resource,
            namespace: namespace.to_string(),
            retry,
            _kind: PhantomData,
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `None` when the workflow does not exist
    #[instrument(skip(self), fields(namespace = %self.namespace, kind = %W::KIND))]
    pub async fn get(&self, id: &str) -> Result<Option<W>> {
        match self.api.get_opt(id).await? {
            Some(obj) => from_dynamic(obj).map(Some),
            None => {
                debug!(id, "Workflow not found");
                Ok(None)
            }
        }
    }

    /// Like [`get`](Self::get) for callers that need the workflow to exist
    pub async fn require(&self, id: &str) -> Result<W> {
        self.get(id)
            .await?
            .ok_or_else(|| Error::not_found(&W::KIND.to_string(), id))
    }

    /// All workflows labelled with this namespace; malformed items are skipped
    #[instrument(skip(self), fields(namespace = %self.namespace, kind = %W::KIND))]
    pub async fn list(&self) -> Result<Vec<W>> {
        let selector = format!("{PROJECT_LABEL}={}", self.namespace);
        let items = self.api.list(&selector).await?;
        let total = items.len();

        let workflows: Vec<W> = items
            .into_iter()
            .filter_map(|obj| {
                let name = obj.name_any();
                match from_dynamic::<W>(obj) {
                    Ok(w) => Some(w),
                    Err(e) => {
                        warn!(name = %name, error = %e, "Skipping malformed workflow");
                        None
                    }
                }
            })
            .collect();

        debug!(total, parsed = workflows.len(), "Listed workflows");
        Ok(workflows)
    }

    /// Create the workflow, or update it preserving resourceVersion, uid,
    /// creationTimestamp and every annotation already on the object
    #[instrument(skip(self, grant, workflow), fields(namespace = %self.namespace, kind = %W::KIND, name = %workflow.name_any()))]
    pub async fn upsert(&self, grant: &Grant, workflow: &W) -> Result<W> {
        if let Some(ns) = workflow.namespace() {
            if ns != self.namespace {
                return Err(Error::Validation(format!(
                    "workflow namespace {ns} does not match project {}",
                    self.namespace
                )));
            }
        }
        workflow.validate()?;
        let desired = to_dynamic(workflow, &self.resource, &self.namespace)?;
        let name = desired.name_any();

        let stored = read_modify_write(self.api.as_ref(), &name, &self.retry, |current| {
            match current {
                None => {
                    grant.require(&self.namespace, &self.resource.plural, Verb::Create)?;
                    Ok(Mutation::Create(desired.clone()))
                }
                Some(existing) => {
                    grant.require(&self.namespace, &self.resource.plural, Verb::Update)?;
                    Ok(Mutation::Replace(merge_for_update(&existing, &desired)))
                }
            }
        })
        .await?
        .ok_or_else(|| Error::not_found(&W::KIND.to_string(), &name))?;

        info!(
            resource_version = stored.metadata.resource_version.as_deref().unwrap_or_default(),
            "Upserted workflow"
        );
        from_dynamic(stored)
    }

    /// Write the workflow's status through the status subresource. Spec fields
    /// on `workflow` are ignored.
    #[instrument(skip(self, grant, workflow), fields(namespace = %self.namespace, kind = %W::KIND, name = %workflow.name_any()))]
    pub async fn update_status(&self, grant: &Grant, workflow: &W) -> Result<W> {
        grant.require(&self.namespace, &self.resource.plural, Verb::Update)?;
        let name = workflow.name_any();
        let status = serde_json::to_value(workflow)?
            .get("status")
            .cloned()
            .unwrap_or(Value::Null);

        let stored = retry_on_conflict(&self.retry, &name, |attempt| {
            let name = name.clone();
            let status = status.clone();
            async move {
                let mut current = self
                    .api
                    .get_opt(&name)
                    .await?
                    .ok_or_else(|| Error::not_found(&W::KIND.to_string(), &name))?;
                debug!(attempt, "Writing workflow status");
                if let Some(map) = current.data.as_object_mut() {
                    map.insert("status".to_string(), status);
                } else {
                    current.data = serde_json::json!({ "status": status });
                }
                self.api.replace_status(&name, &current).await
            }
        })
        .await?;

        from_dynamic(stored)
    }

    /// Delete the workflow. Already absent is success (`false`).
    #[instrument(skip(self, grant), fields(namespace = %self.namespace, kind = %W::KIND))]
    pub async fn delete(&self, grant: &Grant, id: &str) -> Result<bool> {
        grant.require(&self.namespace, &self.resource.plural, Verb::Delete)?;
        let deleted = self.api.delete(id).await?;
        if deleted {
            info!(id, "Deleted workflow");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::{BugFixWorkflow, BugFixWorkflowSpec, BugFixWorkflowStatus, GitRepository};
    use crate::store::memory::MemoryApi;
    use std::collections::BTreeMap;

    const NS: &str = "team-a";

    fn workflow(annotations: &[(&str, &str)]) -> BugFixWorkflow {
        let mut wf = BugFixWorkflow::new(
            "bug-123",
            BugFixWorkflowSpec {
                github_issue_number: 123,
                github_issue_url: "https://github.com/acme/app/issues/123".into(),
                title: "Parser crash".into(),
                description: "NPE when parsing".into(),
                branch_name: BugFixWorkflow::default_branch_name(123),
                workspace_path: String::new(),
                implementation_repo: GitRepository::new("https://github.com/acme/app.git"),
                created_by: Some("alice".into()),
                jira_task_key: None,
                jira_task_url: None,
                last_synced_at: None,
            },
        );
        if !annotations.is_empty() {
            wf.metadata.annotations = Some(
                annotations
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            );
        }
        wf
    }

    fn store() -> (Arc<MemoryApi<DynamicObject>>, WorkflowStore<BugFixWorkflow>) {
        let memory = Arc::new(MemoryApi::new());
        let resource = ResourceRegistry::default().of::<BugFixWorkflow>().clone();
        let store = WorkflowStore::with_api(memory.clone(), NS, resource, RetryPolicy::immediate(3));
        (memory, store)
    }

    fn grant(verbs: &[Verb]) -> Grant {
        Grant::for_tests(NS, "bugfixworkflows", verbs)
    }

    fn all_verbs() -> Grant {
        grant(&[Verb::Get, Verb::Create, Verb::Update, Verb::Delete])
    }

    #[tokio::test]
    async fn upsert_preserves_identity_and_bumps_version() {
        let (_, store) = store();
        let created = store.upsert(&all_verbs(), &workflow(&[])).await.unwrap();

        let mut changed = workflow(&[]);
        changed.spec.title = "Parser crash on empty input".into();
        store.upsert(&all_verbs(), &changed).await.unwrap();

        let fetched = store.get("bug-123").await.unwrap().unwrap();
        assert_eq!(fetched.spec.title, "Parser crash on empty input");
        assert_eq!(fetched.metadata.uid, created.metadata.uid);
        assert_eq!(
            fetched.metadata.creation_timestamp,
            created.metadata.creation_timestamp
        );
        assert_ne!(
            fetched.metadata.resource_version,
            created.metadata.resource_version
        );
        let labels = fetched.labels();
        assert_eq!(labels.get("project").map(String::as_str), Some(NS));
        assert_eq!(labels.get("bugfix-workflow").map(String::as_str), Some("bug-123"));
        assert_eq!(labels.get("bugfix-issue-number").map(String::as_str), Some("123"));
    }

    #[tokio::test]
    async fn upsert_unions_annotations() {
        let (_, store) = store();
        store.upsert(&all_verbs(), &workflow(&[("b", "2")])).await.unwrap();
        let updated = store.upsert(&all_verbs(), &workflow(&[("a", "1")])).await.unwrap();

        let expected: BTreeMap<String, String> =
            [("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())].into();
        assert_eq!(updated.metadata.annotations, Some(expected));
    }

    #[tokio::test]
    async fn upsert_retries_when_another_writer_wins() {
        let (memory, store) = store();
        store.upsert(&all_verbs(), &workflow(&[("b", "2")])).await.unwrap();

        memory.interleave("bug-123", |obj| {
            obj.metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .insert("c".into(), "3".into());
        });
        let updated = store.upsert(&all_verbs(), &workflow(&[("a", "1")])).await.unwrap();

        let annotations = updated.metadata.annotations.unwrap();
        assert_eq!(annotations.len(), 3);
        assert_eq!(annotations.get("c").map(String::as_str), Some("3"));
    }

    #[tokio::test]
    async fn status_update_leaves_spec_alone() {
        let (_, store) = store();
        store.upsert(&all_verbs(), &workflow(&[])).await.unwrap();

        let mut wf = workflow(&[]);
        wf.spec.title = "should not be written".into();
        wf.status = Some(BugFixWorkflowStatus {
            phase: "Ready".into(),
            message: "Workspace initialized".into(),
            implementation_completed: false,
        });
        let updated = store.update_status(&all_verbs(), &wf).await.unwrap();

        assert_eq!(updated.status.unwrap().phase, "Ready");
        assert_eq!(updated.spec.title, "Parser crash");
    }

    #[tokio::test]
    async fn status_update_of_missing_workflow_is_not_found() {
        let (_, store) = store();
        let err = store
            .update_status(&all_verbs(), &workflow(&[]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_skips_malformed_items() {
        let (memory, store) = store();
        store.upsert(&all_verbs(), &workflow(&[])).await.unwrap();

        let resource = ResourceRegistry::default().of::<BugFixWorkflow>().clone();
        let mut broken = DynamicObject::new("bug-999", &resource)
            .within(NS)
            .data(serde_json::json!({ "spec": { "githubIssueNumber": 999 } }));
        broken.metadata.labels = Some([("project".to_string(), NS.to_string())].into());
        memory.insert_raw(broken);

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name_any(), "bug-123");
        assert!(store.get("bug-999").await.is_err());
    }

    #[tokio::test]
    async fn get_absent_is_none() {
        let (_, store) = store();
        assert!(store.get("nope").await.unwrap().is_none());
        assert!(matches!(
            store.require("nope").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_, store) = store();
        store.upsert(&all_verbs(), &workflow(&[])).await.unwrap();
        assert!(store.delete(&all_verbs(), "bug-123").await.unwrap());
        assert!(!store.delete(&all_verbs(), "bug-123").await.unwrap());
    }

    #[tokio::test]
    async fn missing_grant_prevents_any_write() {
        let (memory, store) = store();
        let read_only = grant(&[Verb::Get, Verb::List]);

        let err = store.upsert(&read_only, &workflow(&[])).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden { .. }));
        assert!(matches!(
            store.delete(&read_only, "bug-123").await,
            Err(Error::Forbidden { .. })
        ));
        assert_eq!(memory.writes(), 0);
    }

    #[tokio::test]
    async fn invalid_workflow_is_rejected_before_writing() {
        let (memory, store) = store();
        let mut wf = workflow(&[]);
        wf.spec.implementation_repo.url = String::new();
        assert!(matches!(
            store.upsert(&all_verbs(), &wf).await,
            Err(Error::Validation(_))
        ));

        let mut elsewhere = workflow(&[]);
        elsewhere.metadata.namespace = Some("team-b".into());
        assert!(matches!(
            store.upsert(&all_verbs(), &elsewhere).await,
            Err(Error::Validation(_))
        ));
        assert_eq!(memory.writes(), 0);
    }
}
