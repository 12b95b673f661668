//! Request-scoped entry point
//!
//! `Gateway` is built once at process start. Each request calls
//! [`Gateway::open`], which resolves the caller, mints a client carrying only
//! the caller's credential and runs the access review. The returned
//! [`Session`] is the only way to reach the stores and the document engine.

use crate::auth::{
    authorize, validate_project, CredentialResolver, Grant, Identity, KubeAccessKeyRecorder,
    KubeTokenReviewer, ScopedClientFactory, SelfSubjectAccessReviewer, Verb,
};
use crate::config::GatewayConfig;
use crate::credentials::{CredentialStore, UserCredentials};
use crate::crds::{BugFixWorkflow, WorkflowKind, WorkflowResource};
use crate::docs::{DocumentEngine, DocumentTarget, SyncOutcome};
use crate::error::{Error, Result};
use crate::store::{ResourceRegistry, WorkflowStore};
use axum::http::HeaderMap;
use kube::Client;
use scm::{Provider, ScmClient};
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub struct Gateway {
    config: Arc<GatewayConfig>,
    /// The platform's own client; token review, access-key bookkeeping and
    /// the credential store only
    platform: Client,
    clients: ScopedClientFactory,
    resolver: Arc<CredentialResolver>,
    registry: ResourceRegistry,
    documents: Arc<DocumentEngine>,
}

impl Gateway {
    /// Gateway for the cluster the process runs in (or the local kubeconfig)
    pub async fn connect(config: GatewayConfig) -> Result<Self> {
        let base = kube::Config::infer()
            .await
            .map_err(|e| Error::Config(format!("failed to load cluster configuration: {e}")))?;
        Self::new(config, base)
    }

    /// `base` supplies the cluster endpoint for scoped clients and the
    /// platform credential
    pub fn new(config: GatewayConfig, base: kube::Config) -> Result<Self> {
        let platform = Client::try_from(base.clone())
            .map_err(|e| Error::Config(format!("failed to build platform client: {e}")))?;

        let resolver = Arc::new(CredentialResolver::new(
            Arc::new(KubeTokenReviewer::new(platform.clone())),
            Arc::new(KubeAccessKeyRecorder::new(
                platform.clone(),
                config.access_keys.clone(),
            )),
            config.access_keys.clone(),
        ));
        let documents = Arc::new(DocumentEngine::new(
            Arc::new(ScmClient::new(&config.scm)?),
            config.git.clone(),
            config.retry,
        ));

        info!(cluster = %base.cluster_url, "Gateway initialized");
        Ok(Self {
            registry: ResourceRegistry::new(&config.resources),
            config: Arc::new(config),
            platform,
            clients: ScopedClientFactory::new(base),
            resolver,
            documents,
        })
    }

    /// For axum state: the `Authenticated` extractor needs it
    #[must_use]
    pub fn resolver(&self) -> Arc<CredentialResolver> {
        Arc::clone(&self.resolver)
    }

    #[must_use]
    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Resolve the caller from request headers, then [`open_for`](Self::open_for)
    pub async fn open(
        &self,
        headers: &HeaderMap,
        query_token: Option<&str>,
        project: &str,
        kind: WorkflowKind,
        verbs: &[Verb],
    ) -> Result<Session> {
        let identity = self.resolver.resolve(headers, query_token).await?;
        self.open_for(identity, project, kind, verbs).await
    }

    /// Authorize `verbs` on `kind` in `project` for an already resolved caller
    #[instrument(skip(self, identity), fields(user = %identity.user_id))]
    pub async fn open_for(
        &self,
        identity: Identity,
        project: &str,
        kind: WorkflowKind,
        verbs: &[Verb],
    ) -> Result<Session> {
        validate_project(project)?;
        if !identity.is_authenticated() {
            return Err(Error::Unauthenticated(
                "user token or identity headers required".to_string(),
            ));
        }

        let client = self.clients.client_for(identity.bearer()?)?;
        let resource = self.registry.get(kind);
        let grant = authorize(
            &SelfSubjectAccessReviewer::new(client.clone()),
            project,
            &resource.group,
            &resource.plural,
            verbs,
            identity.principal.as_ref(),
        )
        .await?;

        debug!(project, %kind, "Session opened");
        Ok(Session {
            identity,
            client,
            grant,
            platform: self.platform.clone(),
            registry: self.registry.clone(),
            config: Arc::clone(&self.config),
            documents: Arc::clone(&self.documents),
        })
    }
}

/// One authorized caller acting in one project
pub struct Session {
    identity: Identity,
    client: Client,
    grant: Grant,
    platform: Client,
    registry: ResourceRegistry,
    config: Arc<GatewayConfig>,
    documents: Arc<DocumentEngine>,
}

impl Session {
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    #[must_use]
    pub fn grant(&self) -> &Grant {
        &self.grant
    }

    /// The caller's scoped client
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    #[must_use]
    pub fn project(&self) -> &str {
        self.grant.namespace()
    }

    /// Workflow store acting with the caller's credential. `W` must be the
    /// kind the session was opened for.
    pub fn workflows<W: WorkflowResource>(&self) -> Result<WorkflowStore<W>> {
        let resource = self.registry.of::<W>();
        if resource.plural != self.grant.resource() {
            return Err(Error::forbidden(format!(
                "session was authorized for {}, not {}",
                self.grant.resource(),
                resource.plural
            )));
        }
        Ok(WorkflowStore::new(
            self.client.clone(),
            self.grant.namespace(),
            &self.registry,
            self.config.retry,
        ))
    }

    /// The session user's own credentials in the session's project
    pub fn credentials(&self, provider: Provider) -> Result<UserCredentials> {
        let store = CredentialStore::new(
            self.platform.clone(),
            &self.grant,
            provider,
            self.config.credentials.clone(),
            self.config.retry,
        );
        UserCredentials::new(store, &self.identity.user_id, self.grant.clone())
    }

    /// The token git operations run with for this caller
    pub async fn git_token(&self, provider: Provider) -> Result<String> {
        self.credentials(provider)?.git_token().await
    }

    /// Bug-fix documents need a grant on the BugFix kind, whatever verbs it has
    fn require_bugfix_grant(&self, verb: Verb) -> Result<()> {
        let plural = &self.registry.of::<BugFixWorkflow>().plural;
        self.grant.require(self.grant.namespace(), plural, verb)
    }

    async fn document_token(&self, workflow: &BugFixWorkflow) -> Result<String> {
        let provider = workflow
            .spec
            .implementation_repo
            .provider()
            .unwrap_or(Provider::GitHub);
        self.git_token(provider).await
    }

    /// Seed the workflow's issue folder in its repository
    pub async fn ensure_folder(&self, workflow: &BugFixWorkflow) -> Result<SyncOutcome> {
        self.require_bugfix_grant(Verb::Update)?;
        let token = self.document_token(workflow).await?;
        self.documents
            .ensure_folder(
                &self.grant,
                &DocumentTarget::for_workflow(workflow),
                &token,
                &self.identity,
            )
            .await
    }

    /// Append to one section of the workflow's bug-fix document
    pub async fn upsert_section(
        &self,
        workflow: &BugFixWorkflow,
        section: &str,
        content: &str,
    ) -> Result<SyncOutcome> {
        self.require_bugfix_grant(Verb::Update)?;
        let token = self.document_token(workflow).await?;
        self.documents
            .upsert_section(
                &self.grant,
                &DocumentTarget::for_workflow(workflow),
                section,
                content,
                &token,
                &self.identity,
            )
            .await
    }

    /// The workflow's bug-fix document as currently on its branch
    pub async fn read_document(&self, workflow: &BugFixWorkflow) -> Result<Option<String>> {
        self.require_bugfix_grant(Verb::Get)?;
        let token = self.document_token(workflow).await?;
        self.documents
            .read_document(&DocumentTarget::for_workflow(workflow), &token)
            .await
    }
}
