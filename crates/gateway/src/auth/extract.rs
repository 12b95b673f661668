//! axum extractors for the caller and the project scope

use super::identity::Identity;
use super::project::resolve_project;
use super::resolver::{query_token, CredentialResolver};
use crate::error::Error;
use axum::extract::{FromRef, FromRequestParts, RawPathParams};
use axum::http::request::Parts;
use std::sync::Arc;

/// Route parameter names that carry the project
const PROJECT_PARAMS: [&str; 2] = ["projectName", "project"];

/// An authenticated caller; anonymous requests are rejected with 401
#[derive(Debug, Clone)]
pub struct Authenticated(pub Identity);

impl<S> FromRequestParts<S> for Authenticated
where
    Arc<CredentialResolver>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let resolver = Arc::<CredentialResolver>::from_ref(state);
        let query = query_token(&parts.uri);
        let identity = resolver.resolve(&parts.headers, query.as_deref()).await?;
        if !identity.is_authenticated() {
            return Err(Error::Unauthenticated(
                "user token or identity headers required".to_string(),
            ));
        }
        Ok(Self(identity))
    }
}

/// The validated project the request targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectScope(pub String);

impl<S> FromRequestParts<S> for ProjectScope
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let params = RawPathParams::from_request_parts(parts, state).await.ok();
        let route_param = params.as_ref().and_then(|params| {
            params
                .iter()
                .find(|(key, _)| PROJECT_PARAMS.contains(key))
                .map(|(_, value)| value.to_string())
        });
        resolve_project(route_param.as_deref(), &parts.headers).map(Self)
    }
}
