//! Notebook persistence across restarts.
//!
//! The cell list and execution counter are written to a JSON document in the
//! user data directory. A background autosaver rewrites it after edits settle.

use crate::context::NotebookContext;
use crate::notebook_state::{Cell, NotebookState};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::PoisonError;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Persisted notebook document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionDocument {
    #[serde(default = "SessionDocument::current_schema_version")]
    pub schema_version: u32,
    /// RFC 3339 timestamp of the last save
    #[serde(default)]
    pub saved_at: String,
    pub cells: Vec<Cell>,
    #[serde(default)]
    pub global_execution_count: u32,
}

impl SessionDocument {
    pub const CURRENT_SCHEMA_VERSION: u32 = 1;

    fn current_schema_version() -> u32 {
        Self::CURRENT_SCHEMA_VERSION
    }

    pub fn from_state(state: &NotebookState) -> Self {
        Self {
            schema_version: Self::CURRENT_SCHEMA_VERSION,
            saved_at: chrono::Utc::now().to_rfc3339(),
            cells: state.snapshot(),
            global_execution_count: state.execution_count(),
        }
    }

    pub fn into_state(self) -> NotebookState {
        NotebookState::from_cells(self.cells, self.global_execution_count)
    }
}

/// Default location: `<data dir>/asm-studio/sessions/default-notebook.json`.
pub fn default_session_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("asm-studio")
        .join("sessions")
        .join("default-notebook.json")
}

/// Load the notebook saved at `path`.
///
/// A missing, unreadable or corrupt file yields a fresh notebook with a
/// single empty cell.
pub fn load_session(path: &Path) -> NotebookState {
    if !path.exists() {
        info!("[session] No session file found at {}", path.display());
        return NotebookState::new_empty();
    }

    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("[session] Failed to read session file: {}", e);
            return NotebookState::new_empty();
        }
    };

    let document: SessionDocument = match serde_json::from_str(&contents) {
        Ok(d) => d,
        Err(e) => {
            warn!("[session] Failed to parse session file: {}", e);
            return NotebookState::new_empty();
        }
    };

    info!(
        "[session] Loaded {} cells (execution count {})",
        document.cells.len(),
        document.global_execution_count
    );
    document.into_state()
}

fn encode(document: &SessionDocument) -> anyhow::Result<String> {
    let json = serde_json::to_string_pretty(document)?;
    Ok(format!("{json}\n"))
}

/// Write the document to disk, creating parent directories as needed.
pub fn save_session(path: &Path, document: &SessionDocument) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, encode(document)?)?;
    info!(
        "[session] Saved {} cells to {}",
        document.cells.len(),
        path.display()
    );
    Ok(())
}

async fn save_session_async(path: &Path, document: &SessionDocument) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, encode(document)?).await?;
    debug!(
        "[session] Autosaved {} cells to {}",
        document.cells.len(),
        path.display()
    );
    Ok(())
}

/// Spawn the debounced autosave task.
///
/// Each document change restarts a `delay` quiet-period timer; the document
/// is written once the timer runs out. Failures are logged and dropped. The
/// task performs a final save and exits when the event channel closes.
pub fn spawn_autosaver(context: &NotebookContext, path: PathBuf, delay: Duration) -> JoinHandle<()> {
    let mut rx = context.subscribe();
    let notebook = context.notebook();
    tokio::spawn(async move {
        info!("[session] Autosave enabled ({}ms debounce)", delay.as_millis());
        loop {
            match rx.recv().await {
                Ok(event) if event.touches_document() => {}
                Ok(_) => continue,
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }

            let mut closed = false;
            loop {
                match tokio::time::timeout(delay, rx.recv()).await {
                    Err(_) => break,
                    Ok(Err(RecvError::Closed)) => {
                        closed = true;
                        break;
                    }
                    Ok(_) => continue,
                }
            }

            let document = {
                let state = notebook.lock().unwrap_or_else(PoisonError::into_inner);
                SessionDocument::from_state(&state)
            };
            if let Err(e) = save_session_async(&path, &document).await {
                warn!("[session] Autosave failed: {}", e);
            }
            if closed {
                break;
            }
        }
        debug!("[session] Autosave task stopped");
    })
}
