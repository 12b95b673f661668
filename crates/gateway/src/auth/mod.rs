//! Caller identity, scoped clients and access review
//!
//! Every privileged path runs resolve → scope → review in that order. The
//! platform's own client is used only for token review and access-key
//! bookkeeping; everything else runs with the caller's credential.

pub mod access;
pub mod client_factory;
pub mod extract;
pub mod identity;
pub mod project;
pub mod resolver;

pub use access::{
    authorize, AccessDecision, AccessRequest, AccessReviewer, Grant, SelfSubjectAccessReviewer,
    Verb,
};
pub use client_factory::ScopedClientFactory;
pub use extract::{Authenticated, ProjectScope};
pub use identity::{BearerToken, CredentialSource, Identity, Principal};
pub use project::{resolve_project, validate_project, PROJECT_HEADER};
pub use resolver::{
    extract_bearer, query_token, AccessKeyRecorder, CredentialResolver, KubeAccessKeyRecorder,
    KubeTokenReviewer, TokenReviewOutcome, TokenReviewer,
};
