/*
 * vTeam Gateway - identity-scoped control plane for workflow workspaces
 * Copyright (C) 2025 vTeam developers
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Unified SCM abstraction
//!
//! Read-only access to repository contents on GitHub and GitLab through their
//! REST content APIs (no clone needed), push-access pre-validation, and the
//! URL helpers used to hand a short-lived token to the git transport.

pub mod error;
pub mod github;
pub mod gitlab;
pub mod provider;
pub mod repo;

pub use error::{ScmError, ScmResult};
pub use github::GitHubClient;
pub use gitlab::GitLabClient;
pub use provider::{ContentApi, ScmClient, ScmConfig};
pub use repo::{credential_rewrite, Provider, RepoRef, UrlRewrite};
