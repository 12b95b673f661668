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

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! Gateway core library
//!
//! Lets a multi-tenant platform act on a shared cluster and on external git
//! hosts on behalf of its callers: caller identity and scoped clients, access
//! review, the workflow custom-resource store, per-user git credentials, and
//! the git-backed bug-fix documents.

pub mod auth;
pub mod config;
pub mod credentials;
pub mod crds;
pub mod docs;
pub mod error;
pub mod gateway;
pub mod retry;
pub mod store;

// Re-export commonly used types
pub use auth::{Authenticated, Grant, Identity, Principal, ProjectScope, Verb};
pub use config::GatewayConfig;
pub use crds::{BugFixWorkflow, BugFixWorkflowSpec, RFEWorkflow, RFEWorkflowSpec, WorkflowKind};
pub use credentials::{GitConnection, UserCredentials};
pub use docs::{DocumentEngine, DocumentTarget, SyncOutcome};
pub use error::{Error, Result};
pub use gateway::{Gateway, Session};
pub use retry::RetryPolicy;
pub use store::WorkflowStore;
