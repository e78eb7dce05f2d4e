//! Instruction documentation parsing.
//!
//! The backend returns a docstring-like block. Section headers (`Args:`,
//! `Raises:`, `Notes:`, `Example:`) must start at column zero; everything
//! before the first header is the description.

use serde::{Deserialize, Serialize};

/// Documentation split into display sections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocSections {
    pub description: String,
    pub args: Vec<String>,
    pub raises: Vec<String>,
    pub notes: Vec<String>,
    pub example: Vec<String>,
}

#[derive(Clone, Copy)]
enum Section {
    Description,
    Args,
    Raises,
    Notes,
    Example,
}

pub fn parse_documentation(doc: &str) -> DocSections {
    let mut sections = DocSections::default();
    let mut current = Section::Description;
    let mut description = Vec::new();

    for line in doc.lines() {
        let header = if line.starts_with("Args:") {
            Some(Section::Args)
        } else if line.starts_with("Raises:") {
            Some(Section::Raises)
        } else if line.starts_with("Notes:") {
            Some(Section::Notes)
        } else if line.starts_with("Example:") {
            Some(Section::Example)
        } else {
            None
        };
        if let Some(next) = header {
            current = next;
            continue;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match current {
            Section::Description => description.push(trimmed),
            // args and examples keep their indentation
            Section::Args => sections.args.push(line.to_string()),
            Section::Raises => {
                if let Some(item) = trimmed.strip_prefix('-') {
                    sections.raises.push(item.trim().to_string());
                }
            }
            Section::Notes => sections.notes.push(trimmed.to_string()),
            Section::Example => sections.example.push(line.to_string()),
        }
    }

    sections.description = description.join(" ");
    sections
}
