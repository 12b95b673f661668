//! Bug-fix documents in the spec repository
//!
//! Layout per issue:
//!
//! ```text
//! bug-<n>/README.md
//! bug-<n>/bugfix-gh-<n>.md
//! ```
//!
//! The document is a sequence of `## <Section>` blocks. Each workflow phase
//! appends to its own section only, so edits are line-based and never reflow
//! the rest of the file.

/// Section headers every new document starts with, in order
pub const SECTIONS: [&str; 5] = [
    "Root Cause Analysis",
    "Resolution Plan",
    "Implementation Steps",
    "Testing",
    "Additional Notes",
];

const FENCE: &str = "```";

#[must_use]
pub fn folder_path(issue: u64) -> String {
    format!("bug-{issue}")
}

#[must_use]
pub fn readme_path(issue: u64) -> String {
    format!("bug-{issue}/README.md")
}

#[must_use]
pub fn document_path(issue: u64) -> String {
    format!("bug-{issue}/bugfix-gh-{issue}.md")
}

/// Seed README for a new issue folder
#[must_use]
pub fn readme(issue: u64) -> String {
    format!(
        "# Bug #{issue}\n\nThis folder contains all documentation and artifacts related to GitHub Issue #{issue}.\n"
    )
}

/// New document with the title block and empty section headers
#[must_use]
pub fn skeleton(issue: u64, issue_url: &str, jira_url: Option<&str>) -> String {
    let mut doc = format!("# Bug Fix: GitHub Issue #{issue}\n\n**GitHub Issue**: {issue_url}\n");
    if let Some(jira) = jira_url.filter(|u| !u.trim().is_empty()) {
        doc.push_str(&format!("**Jira Task**: {jira}\n"));
    }
    doc.push_str("**Status**: Open\n");
    for section in SECTIONS {
        doc.push_str(&format!("\n## {section}\n"));
    }
    doc
}

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with(FENCE)
}

fn is_boundary(line: &str) -> bool {
    line.starts_with("# ") || line.starts_with("## ")
}

/// Index of `## <section>` outside code fences
fn find_header(lines: &[&str], section: &str) -> Option<usize> {
    let header = format!("## {section}");
    let mut in_fence = false;
    for (i, line) in lines.iter().enumerate() {
        if is_fence(line) {
            in_fence = !in_fence;
        } else if !in_fence && line.trim_end() == header {
            return Some(i);
        }
    }
    None
}

/// Index of the first header after `start`, or `lines.len()`
fn section_end(lines: &[&str], start: usize) -> usize {
    let mut in_fence = false;
    for (i, line) in lines.iter().enumerate().skip(start + 1) {
        if is_fence(line) {
            in_fence = !in_fence;
        } else if !in_fence && is_boundary(line) {
            return i;
        }
    }
    lines.len()
}

/// Append `content` to the end of `section`.
///
/// An existing section gets the content just before the next header (or at
/// the end of the document when it is the last section). A missing section is
/// appended to the end of the document. Blank content leaves the document
/// untouched.
#[must_use]
pub fn upsert_section(document: &str, section: &str, content: &str) -> String {
    let content = content.trim_end();
    if content.trim().is_empty() {
        return document.to_string();
    }

    let lines: Vec<&str> = document.lines().collect();
    let Some(header) = find_header(&lines, section) else {
        let mut doc = document.trim_end_matches('\n').to_string();
        if !doc.is_empty() {
            doc.push_str("\n\n");
        }
        doc.push_str(&format!("## {section}\n\n{content}\n"));
        return doc;
    };

    let end = section_end(&lines, header);
    let mut body: Vec<&str> = lines[header + 1..end].to_vec();
    while body.last().is_some_and(|l| l.trim().is_empty()) {
        body.pop();
    }
    // one blank line after the header, or between old and new content
    body.push("");
    body.extend(content.lines());
    if end < lines.len() {
        body.push("");
    }

    let mut out: Vec<&str> = Vec::with_capacity(lines.len() + body.len());
    out.extend_from_slice(&lines[..=header]);
    out.extend(body);
    out.extend_from_slice(&lines[end..]);

    let mut doc = out.join("\n");
    doc.push('\n');
    doc
}

/// Text under `section`, without surrounding blank lines
#[must_use]
pub fn section_body(document: &str, section: &str) -> Option<String> {
    let lines: Vec<&str> = document.lines().collect();
    let header = find_header(&lines, section)?;
    let end = section_end(&lines, header);
    Some(lines[header + 1..end].join("\n").trim().to_string())
}
