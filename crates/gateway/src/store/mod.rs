//! Custom-resource state store

pub mod backend;
#[cfg(test)]
pub(crate) mod memory;
pub mod registry;
pub mod workflow;

pub use backend::ObjectApi;
pub use registry::ResourceRegistry;
pub use workflow::{from_dynamic, to_dynamic, WorkflowStore, PROJECT_LABEL};
