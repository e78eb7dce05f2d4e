use serde::{Deserialize, Serialize};
use serde_json::Value;
use sim_client::ExecutionResult;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of notebook cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    #[default]
    Code,
    Markdown,
}

impl std::fmt::Display for CellKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellKind::Code => write!(f, "code"),
            CellKind::Markdown => write!(f, "markdown"),
        }
    }
}

impl FromStr for CellKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "code" => Ok(CellKind::Code),
            "markdown" | "md" => Ok(CellKind::Markdown),
            other => Err(format!("Unknown cell type: {}", other)),
        }
    }
}

/// One unit of notebook content with its own execution lifecycle.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: CellKind,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub output: Option<ExecutionResult>,
    #[serde(default)]
    pub execution_count: Option<u32>,
    /// Transient; never persisted
    #[serde(default, skip_serializing)]
    pub is_running: bool,
}

impl Cell {
    pub fn new(kind: CellKind, content: impl Into<String>) -> Self {
        Cell {
            id: Uuid::new_v4().to_string(),
            kind,
            content: content.into(),
            output: None,
            execution_count: None,
            is_running: false,
        }
    }

    pub fn blank() -> Self {
        Self::new(CellKind::Code, "")
    }

    /// Code cell with something other than whitespace in it.
    pub fn is_runnable(&self) -> bool {
        self.kind == CellKind::Code && !self.content.trim().is_empty()
    }
}

/// Partial update applied by [`NotebookState::update_cell`].
///
/// `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct CellUpdate {
    pub content: Option<String>,
    pub kind: Option<CellKind>,
    pub output: Option<Option<ExecutionResult>>,
    pub execution_count: Option<Option<u32>>,
    pub is_running: Option<bool>,
}

impl CellUpdate {
    pub fn content(content: impl Into<String>) -> Self {
        CellUpdate {
            content: Some(content.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NotebookError {
    #[error("Invalid import: {0}")]
    InvalidImport(String),
}

/// Ordered cell list plus the global execution counter.
#[derive(Debug, Clone)]
pub struct NotebookState {
    cells: Vec<Cell>,
    execution_count: u32,
}

impl Default for NotebookState {
    fn default() -> Self {
        Self::new_empty()
    }
}

impl NotebookState {
    pub fn new_empty() -> Self {
        NotebookState {
            cells: vec![Cell::blank()],
            execution_count: 0,
        }
    }

    /// Rebuild from persisted cells. An empty list yields a fresh notebook.
    pub fn from_cells(cells: Vec<Cell>, execution_count: u32) -> Self {
        if cells.is_empty() {
            return Self::new_empty();
        }
        let cells = cells
            .into_iter()
            .map(|mut cell| {
                cell.is_running = false;
                cell
            })
            .collect();
        NotebookState {
            cells,
            execution_count,
        }
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Owned copy of the cell list.
    pub fn snapshot(&self) -> Vec<Cell> {
        self.cells.clone()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Global execution counter.
    pub fn execution_count(&self) -> u32 {
        self.execution_count
    }

    pub fn find_cell_index(&self, cell_id: &str) -> Option<usize> {
        self.cells.iter().position(|c| c.id == cell_id)
    }

    pub fn get_cell(&self, cell_id: &str) -> Option<&Cell> {
        self.cells.iter().find(|c| c.id == cell_id)
    }

    fn get_cell_mut(&mut self, cell_id: &str) -> Option<&mut Cell> {
        self.cells.iter_mut().find(|c| c.id == cell_id)
    }

    pub fn get_cell_source(&self, cell_id: &str) -> Option<String> {
        self.get_cell(cell_id).map(|c| c.content.clone())
    }

    /// Insert a blank cell after `after_index`, or append when `None` or
    /// out of range. Returns the new cell's id.
    pub fn add_cell(&mut self, kind: CellKind, after_index: Option<usize>) -> String {
        let cell = Cell::new(kind, "");
        let id = cell.id.clone();
        match after_index {
            Some(idx) if idx < self.cells.len() => self.cells.insert(idx + 1, cell),
            _ => self.cells.push(cell),
        }
        id
    }

    /// Remove a cell. Deleting the last remaining cell replaces it with a
    /// fresh blank one so the list never becomes empty.
    pub fn delete_cell(&mut self, cell_id: &str) -> bool {
        let Some(idx) = self.find_cell_index(cell_id) else {
            return false;
        };
        self.cells.remove(idx);
        if self.cells.is_empty() {
            self.cells.push(Cell::blank());
        }
        true
    }

    pub fn update_cell(&mut self, cell_id: &str, update: CellUpdate) -> bool {
        let Some(cell) = self.get_cell_mut(cell_id) else {
            return false;
        };
        if let Some(content) = update.content {
            cell.content = content;
        }
        if let Some(kind) = update.kind {
            cell.kind = kind;
        }
        if let Some(output) = update.output {
            cell.output = output;
        }
        if let Some(count) = update.execution_count {
            cell.execution_count = count;
        }
        if let Some(running) = update.is_running {
            cell.is_running = running;
        }
        true
    }

    pub fn update_cell_source(&mut self, cell_id: &str, source: &str) -> bool {
        self.update_cell(cell_id, CellUpdate::content(source))
    }

    pub fn clear_all_outputs(&mut self) {
        for cell in &mut self.cells {
            cell.output = None;
        }
    }

    /// Replace everything with one blank cell and reset the counter.
    pub fn clear_all(&mut self) {
        self.cells = vec![Cell::blank()];
        self.execution_count = 0;
    }

    /// Replace the cell list with imported `{type, content}` entries.
    ///
    /// Every imported cell gets a fresh id; outputs and execution counts
    /// are discarded and the global counter resets. On error the current
    /// state is left untouched.
    pub fn import_cells(&mut self, raw: &Value) -> Result<usize, NotebookError> {
        let Some(entries) = raw.as_array() else {
            return Err(NotebookError::InvalidImport(
                "cells must be an array".to_string(),
            ));
        };
        if entries.is_empty() {
            return Err(NotebookError::InvalidImport(
                "No valid cells to import".to_string(),
            ));
        }

        let cells: Vec<Cell> = entries
            .iter()
            .map(|entry| {
                let kind = entry
                    .get("type")
                    .and_then(Value::as_str)
                    .and_then(|t| t.parse().ok())
                    .unwrap_or_default();
                let content = entry
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Cell::new(kind, content)
            })
            .collect();

        let count = cells.len();
        self.cells = cells;
        self.execution_count = 0;
        Ok(count)
    }

    /// Mark a cell running and clear its previous output. Returns the
    /// source to execute, or `None` if the cell no longer exists or its
    /// source is blank. A `None` leaves the cell untouched.
    pub fn begin_execution(&mut self, cell_id: &str) -> Option<String> {
        let cell = self.get_cell_mut(cell_id)?;
        if cell.content.trim().is_empty() {
            return None;
        }
        cell.is_running = true;
        cell.output = None;
        Some(cell.content.clone())
    }

    /// Record a finished execution.
    ///
    /// The global counter advances exactly once per call, even if the cell
    /// was deleted while it ran. Returns the new counter value.
    pub fn complete_execution(&mut self, cell_id: &str, result: ExecutionResult) -> u32 {
        self.execution_count += 1;
        let count = self.execution_count;
        if let Some(cell) = self.get_cell_mut(cell_id) {
            cell.output = Some(result);
            cell.execution_count = Some(count);
            cell.is_running = false;
        }
        count
    }

    /// Attach an AI explanation to a cell's error output.
    pub fn attach_explanation(&mut self, cell_id: &str, explanation: String) -> bool {
        match self.get_cell_mut(cell_id).and_then(|c| c.output.as_mut()) {
            Some(ExecutionResult::Error(error)) => {
                error.explanation = Some(explanation);
                true
            }
            _ => false,
        }
    }
}
