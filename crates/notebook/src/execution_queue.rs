use log::{debug, error, info};
use serde::Serialize;
use sim_client::ExecutionResult;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

use crate::context::{NotebookContext, NotebookEvent};
use crate::magic::CommandRouter;
use crate::notebook_state::CellUpdate;

/// Status of a queued cell
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CellQueueStatus {
    /// Waiting in queue
    Pending,
    /// Currently executing
    Executing,
}

/// A cell in the execution queue
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueuedCell {
    pub cell_id: String,
    pub status: CellQueueStatus,
    /// Position in queue (0 = currently executing or next)
    pub position: usize,
}

/// Queue state published on every queue transition
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExecutionQueueState {
    /// Is a drain loop active?
    pub processing: bool,
    /// Cells currently in queue (executing first, then pending)
    pub cells: Vec<QueuedCell>,
    /// ID of currently executing cell (if any)
    pub executing_cell_id: Option<String>,
}

/// How a queued run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed {
        execution_count: u32,
        result: ExecutionResult,
    },
    /// Cell was empty, or deleted before its turn came
    Skipped,
}

/// One pending run, with an optional waiter for its outcome
#[derive(Debug)]
pub struct QueueEntry {
    pub cell_id: String,
    done: Option<oneshot::Sender<RunOutcome>>,
}

impl QueueEntry {
    pub fn new(cell_id: impl Into<String>) -> Self {
        Self {
            cell_id: cell_id.into(),
            done: None,
        }
    }

    fn with_waiter(cell_id: impl Into<String>) -> (Self, oneshot::Receiver<RunOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                cell_id: cell_id.into(),
                done: Some(tx),
            },
            rx,
        )
    }

    fn finish(self, outcome: RunOutcome) {
        if let Some(done) = self.done {
            // Receiver may have been dropped; the run still counted
            let _ = done.send(outcome);
        }
    }
}

/// The execution queue - owns the pending/executing state
#[derive(Debug, Default)]
pub struct ExecutionQueue {
    /// Pending runs (FIFO)
    pending: VecDeque<QueueEntry>,
    /// Currently executing cell ID
    executing: Option<String>,
    /// Set while a drain loop owns the queue
    draining: bool,
}

impl ExecutionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a run. Returns true when the queue was idle and the caller
    /// must start a drain loop.
    pub fn enqueue(&mut self, entry: QueueEntry) -> bool {
        self.pending.push_back(entry);
        if self.draining {
            false
        } else {
            self.draining = true;
            true
        }
    }

    /// Take the next run for the drain loop.
    ///
    /// Returns `None` while a cell is still executing. When nothing is
    /// pending the queue goes back to idle, so the next enqueue starts a
    /// fresh loop.
    pub fn dequeue(&mut self) -> Option<QueueEntry> {
        if self.executing.is_some() {
            return None;
        }
        match self.pending.pop_front() {
            Some(entry) => {
                self.executing = Some(entry.cell_id.clone());
                Some(entry)
            }
            None => {
                self.draining = false;
                None
            }
        }
    }

    /// Mark current execution as complete
    pub fn complete(&mut self, cell_id: &str) {
        if self.executing.as_deref() == Some(cell_id) {
            self.executing = None;
        }
    }

    /// Return to idle after the drain loop died mid-cell. Hands back the
    /// cell that was executing and the runs that never started.
    pub fn abandon(&mut self) -> (Option<String>, Vec<QueueEntry>) {
        self.draining = false;
        (self.executing.take(), self.pending.drain(..).collect())
    }

    /// Check if a cell is currently executing
    pub fn is_executing(&self, cell_id: &str) -> bool {
        self.executing.as_deref() == Some(cell_id)
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Check if queue is empty (no pending and no executing)
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.executing.is_none()
    }

    pub fn get_state(&self) -> ExecutionQueueState {
        let mut cells = Vec::new();
        let mut position = 0;

        if let Some(ref cell_id) = self.executing {
            cells.push(QueuedCell {
                cell_id: cell_id.clone(),
                status: CellQueueStatus::Executing,
                position,
            });
            position += 1;
        }

        for entry in &self.pending {
            cells.push(QueuedCell {
                cell_id: entry.cell_id.clone(),
                status: CellQueueStatus::Pending,
                position,
            });
            position += 1;
        }

        ExecutionQueueState {
            processing: self.draining,
            cells,
            executing_cell_id: self.executing.clone(),
        }
    }
}

pub type SharedExecutionQueue = Arc<StdMutex<ExecutionQueue>>;

/// Front door to the queue: enqueues runs and drives the drain loop.
#[derive(Clone)]
pub struct QueueHandle {
    queue: SharedExecutionQueue,
    context: NotebookContext,
    router: CommandRouter,
}

impl QueueHandle {
    pub fn new(context: NotebookContext, router: CommandRouter) -> Self {
        Self {
            queue: Arc::new(StdMutex::new(ExecutionQueue::new())),
            context,
            router,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ExecutionQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ExecutionQueueState {
        self.lock().get_state()
    }

    fn emit_state(&self, queue: &ExecutionQueue) {
        self.context
            .emit(NotebookEvent::QueueState(queue.get_state()));
    }

    /// Append a run and spawn the drain loop if the queue was idle.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue(&self, entry: QueueEntry) {
        info!("[queue] Enqueue cell: {}", entry.cell_id);
        let start = {
            let mut q = self.lock();
            let start = q.enqueue(entry);
            self.emit_state(&q);
            start
        };
        if start {
            tokio::spawn(self.clone().drain());
        }
    }

    /// Enqueue a cell and wait for its result.
    ///
    /// Empty or whitespace-only cells are skipped without touching the
    /// queue or the execution counter.
    pub async fn run(&self, cell_id: &str) -> RunOutcome {
        let runnable = self.context.read(|nb| {
            nb.get_cell(cell_id)
                .is_some_and(|c| !c.content.trim().is_empty())
        });
        if !runnable {
            debug!("[queue] Skipping empty or missing cell {}", cell_id);
            return RunOutcome::Skipped;
        }

        let (entry, rx) = QueueEntry::with_waiter(cell_id);
        self.enqueue(entry);
        rx.await.unwrap_or(RunOutcome::Skipped)
    }

    /// Run every non-empty code cell in document order, one at a time.
    pub async fn run_all(&self) -> Vec<(String, RunOutcome)> {
        let ids: Vec<String> = self.context.read(|nb| {
            nb.cells()
                .iter()
                .filter(|c| c.is_runnable())
                .map(|c| c.id.clone())
                .collect()
        });
        info!("[queue] Run all: {} cells", ids.len());

        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            let outcome = self.run(&id).await;
            outcomes.push((id, outcome));
        }
        outcomes
    }

    async fn drain(self) {
        info!("[queue] Drain loop started");
        let mut guard = DrainGuard {
            handle: self.clone(),
            armed: true,
        };

        loop {
            let entry = {
                let mut q = self.lock();
                let entry = q.dequeue();
                self.emit_state(&q);
                entry
            };

            let Some(entry) = entry else {
                break;
            };

            info!("[queue] Processing cell: {}", entry.cell_id);

            let outcome = match self.context.begin_execution(&entry.cell_id) {
                Some(source) => {
                    let dispatch = self.router.dispatch(&source).await;
                    if dispatch.result.is_error() {
                        info!("[queue] Cell {} finished with an error", entry.cell_id);
                    }
                    self.context.complete_execution(&entry.cell_id, dispatch)
                }
                None => {
                    info!("[queue] Cell {} deleted or emptied, skipping", entry.cell_id);
                    RunOutcome::Skipped
                }
            };

            {
                let mut q = self.lock();
                q.complete(&entry.cell_id);
            }
            entry.finish(outcome);
        }

        guard.armed = false;
        info!("[queue] Drain loop finished");
    }
}

/// Puts the queue back to idle if the drain task unwinds or is dropped
/// before the queue empties, so the next enqueue starts a fresh loop.
struct DrainGuard {
    handle: QueueHandle,
    armed: bool,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let (executing, pending) = {
            let mut q = self.handle.lock();
            let abandoned = q.abandon();
            self.handle.emit_state(&q);
            abandoned
        };
        error!(
            "[queue] Drain loop aborted; dropping {} pending runs",
            pending.len()
        );
        if let Some(cell_id) = executing {
            self.handle.context.update(|nb| {
                nb.update_cell(
                    &cell_id,
                    CellUpdate {
                        is_running: Some(false),
                        ..Default::default()
                    },
                )
            });
        }
        for entry in pending {
            entry.finish(RunOutcome::Skipped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> QueueEntry {
        QueueEntry::new(id)
    }

    #[test]
    fn test_new_creates_empty_queue() {
        let queue = ExecutionQueue::new();
        assert!(queue.is_empty());
        assert!(queue.executing.is_none());
        assert!(!queue.is_draining());
    }

    #[test]
    fn test_first_enqueue_starts_draining() {
        let mut queue = ExecutionQueue::new();

        assert!(queue.enqueue(entry("cell-1")));
        assert!(!queue.enqueue(entry("cell-2")));
        assert!(queue.is_draining());
        assert_eq!(queue.pending_len(), 2);
    }

    #[test]
    fn test_dequeue_maintains_fifo_order() {
        let mut queue = ExecutionQueue::new();
        queue.enqueue(entry("cell-1"));
        queue.enqueue(entry("cell-2"));
        queue.enqueue(entry("cell-3"));

        let order: Vec<String> = std::iter::from_fn(|| {
            let e = queue.dequeue()?;
            queue.complete(&e.cell_id);
            Some(e.cell_id)
        })
        .collect();

        assert_eq!(order, vec!["cell-1", "cell-2", "cell-3"]);
    }

    #[test]
    fn test_dequeue_blocked_while_executing() {
        let mut queue = ExecutionQueue::new();
        queue.enqueue(entry("cell-1"));
        queue.enqueue(entry("cell-2"));

        let first = queue.dequeue().unwrap();
        assert!(queue.is_executing("cell-1"));
        assert!(queue.dequeue().is_none());
        // Still draining: a blocked dequeue is not an empty queue
        assert!(queue.is_draining());

        queue.complete(&first.cell_id);
        assert_eq!(queue.dequeue().unwrap().cell_id, "cell-2");
    }

    #[test]
    fn test_empty_dequeue_returns_to_idle() {
        let mut queue = ExecutionQueue::new();
        queue.enqueue(entry("cell-1"));
        let e = queue.dequeue().unwrap();
        queue.complete(&e.cell_id);

        assert!(queue.dequeue().is_none());
        assert!(!queue.is_draining());
        assert!(queue.enqueue(entry("cell-2")));
    }

    #[test]
    fn test_complete_ignores_other_cell() {
        let mut queue = ExecutionQueue::new();
        queue.enqueue(entry("cell-1"));
        queue.dequeue();

        queue.complete("cell-2");

        assert!(queue.is_executing("cell-1"));
    }

    #[test]
    fn test_same_cell_can_queue_twice() {
        let mut queue = ExecutionQueue::new();
        queue.enqueue(entry("cell-1"));
        queue.enqueue(entry("cell-1"));
        assert_eq!(queue.pending_len(), 2);
    }

    #[test]
    fn test_get_state() {
        let mut queue = ExecutionQueue::new();
        queue.enqueue(entry("cell-1"));
        queue.enqueue(entry("cell-2"));
        queue.enqueue(entry("cell-3"));
        queue.dequeue();

        let state = queue.get_state();

        assert!(state.processing);
        assert_eq!(state.executing_cell_id, Some("cell-1".to_string()));
        assert_eq!(state.cells.len(), 3);
        assert_eq!(state.cells[0].status, CellQueueStatus::Executing);
        assert_eq!(state.cells[1].cell_id, "cell-2");
        assert_eq!(state.cells[1].status, CellQueueStatus::Pending);
        assert_eq!(state.cells[2].position, 2);
    }

    #[test]
    fn test_get_state_idle() {
        let state = ExecutionQueue::new().get_state();
        assert!(!state.processing);
        assert!(state.cells.is_empty());
        assert!(state.executing_cell_id.is_none());
    }

    #[test]
    fn test_queue_state_serialization() {
        let mut queue = ExecutionQueue::new();
        queue.enqueue(entry("cell-1"));
        queue.dequeue();

        let json = serde_json::to_value(queue.get_state()).unwrap();

        assert_eq!(json["processing"], true);
        assert_eq!(json["cells"][0]["status"], "executing");
        assert_eq!(json["executing_cell_id"], "cell-1");
    }

    #[test]
    fn test_abandon_returns_to_idle() {
        let mut queue = ExecutionQueue::new();
        queue.enqueue(entry("cell-1"));
        queue.enqueue(entry("cell-2"));
        queue.dequeue();

        let (executing, pending) = queue.abandon();

        assert_eq!(executing.as_deref(), Some("cell-1"));
        assert_eq!(pending.len(), 1);
        assert!(queue.is_empty());
        assert!(!queue.is_draining());
        assert!(queue.enqueue(entry("cell-3")));
    }

    #[test]
    fn test_finish_with_dropped_receiver() {
        let (entry, rx) = QueueEntry::with_waiter("cell-1");
        drop(rx);
        entry.finish(RunOutcome::Skipped);
    }
}
