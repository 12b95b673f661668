//! Section-structured bug-fix documents in git

pub mod document;
pub mod engine;
pub mod git;

pub use document::{
    document_path, folder_path, readme, readme_path, section_body, skeleton, upsert_section,
    SECTIONS,
};
pub use engine::{DocumentEngine, DocumentTarget, SyncOutcome};
pub use git::GitWorkspace;
