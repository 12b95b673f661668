//! Project (namespace) scoping

use crate::error::{Error, Result};
use axum::http::HeaderMap;
use lazy_static::lazy_static;
use regex::Regex;

/// Header carrying the project when the route has none
pub const PROJECT_HEADER: &str = "x-openshift-project";

lazy_static! {
    /// RFC 1123 label: lowercase alphanumerics and '-', alphanumeric at both ends
    static ref DNS_LABEL: Regex = Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap();
}

/// Reject anything that cannot be a namespace name
pub fn validate_project(project: &str) -> Result<()> {
    if project.is_empty() || project.len() > 63 || !DNS_LABEL.is_match(project) {
        return Err(Error::Validation(format!(
            "invalid project name {project:?}: must be a DNS-1123 label"
        )));
    }
    Ok(())
}

/// Route parameter first, then the project header; validated either way
pub fn resolve_project(route_param: Option<&str>, headers: &HeaderMap) -> Result<String> {
    let from_header = headers
        .get(PROJECT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim);

    let project = route_param
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .or(from_header.filter(|p| !p.is_empty()))
        .ok_or_else(|| Error::Validation("project is required".to_string()))?;

    validate_project(project)?;
    Ok(project.to_string())
}
