//! Export and import of notebook content as portable JSON.
//!
//! Exports carry only cell types and sources; outputs and execution counts
//! stay local.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::notebook_state::{CellKind, NotebookError, NotebookState};

pub const EXPORT_FORMAT_VERSION: &str = "1.0.0";
pub const APP_NAME: &str = "ASM Studio";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportedCell {
    #[serde(rename = "type")]
    pub kind: CellKind,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionExport {
    pub cells: Vec<ExportedCell>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
}

pub fn export_session(state: &NotebookState, include_metadata: bool) -> SessionExport {
    let cells = state
        .cells()
        .iter()
        .map(|c| ExportedCell {
            kind: c.kind,
            content: c.content.clone(),
        })
        .collect();

    if include_metadata {
        SessionExport {
            cells,
            version: Some(EXPORT_FORMAT_VERSION.to_string()),
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
            app_name: Some(APP_NAME.to_string()),
        }
    } else {
        SessionExport {
            cells,
            version: None,
            timestamp: None,
            app_name: None,
        }
    }
}

/// File name suggested for a new export, e.g. `asm-session-2024-05-01.json`.
pub fn default_export_filename() -> String {
    format!(
        "asm-session-{}.json",
        chrono::Local::now().format("%Y-%m-%d")
    )
}

pub fn write_export(path: &Path, export: &SessionExport) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(export)?;
    std::fs::write(path, format!("{json}\n"))
        .with_context(|| format!("Failed to write export to {}", path.display()))?;
    Ok(())
}

/// Replace the notebook with the cells in an exported document.
///
/// Returns the number of imported cells. The notebook is untouched on error.
pub fn import_session(state: &mut NotebookState, text: &str) -> Result<usize, NotebookError> {
    let document: Value = serde_json::from_str(text)
        .map_err(|e| NotebookError::InvalidImport(format!("not valid JSON: {}", e)))?;
    let cells = document.get("cells").unwrap_or(&Value::Null);
    state.import_cells(cells)
}

pub fn import_file(state: &mut NotebookState, path: &Path) -> anyhow::Result<usize> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(import_session(state, &text)?)
}
