//! Shared stores plus the event channel that announces changes to them.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use sim_client::ExecutionResult;
use tokio::sync::broadcast;

use crate::execution_queue::{ExecutionQueueState, RunOutcome};
use crate::magic::{Dispatch, ProcessorEffect};
use crate::notebook_state::NotebookState;
use crate::processor_state::{ProcessorAction, ProcessorState};

const EVENT_CAPACITY: usize = 256;

pub type SharedNotebook = Arc<StdMutex<NotebookState>>;
pub type SharedProcessor = Arc<StdMutex<ProcessorState>>;

/// Change notifications published to front-end and autosave listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum NotebookEvent {
    /// Cell list or content changed outside of execution
    CellsChanged,
    QueueState(ExecutionQueueState),
    CellStarted {
        cell_id: String,
    },
    CellCompleted {
        cell_id: String,
        execution_count: u32,
        result: ExecutionResult,
    },
    ProcessorChanged,
}

impl NotebookEvent {
    /// Whether the persisted notebook document may have changed.
    pub fn touches_document(&self) -> bool {
        matches!(
            self,
            NotebookEvent::CellsChanged
                | NotebookEvent::CellStarted { .. }
                | NotebookEvent::CellCompleted { .. }
        )
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to the notebook and processor stores.
///
/// Cheap to clone; every clone shares the same stores and channel. Locks
/// are never held across an `.await`.
#[derive(Clone)]
pub struct NotebookContext {
    notebook: SharedNotebook,
    processor: SharedProcessor,
    events: broadcast::Sender<NotebookEvent>,
}

impl NotebookContext {
    pub fn new(state: NotebookState) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            notebook: Arc::new(StdMutex::new(state)),
            processor: Arc::new(StdMutex::new(ProcessorState::new())),
            events,
        }
    }

    /// The notebook store alone, without the event sender.
    pub fn notebook(&self) -> SharedNotebook {
        self.notebook.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotebookEvent> {
        self.events.subscribe()
    }

    /// Publish an event. Having no listeners is not an error.
    pub fn emit(&self, event: NotebookEvent) {
        let _ = self.events.send(event);
    }

    pub fn read<R>(&self, f: impl FnOnce(&NotebookState) -> R) -> R {
        f(&lock(&self.notebook))
    }

    /// Mutate the notebook and announce the change.
    pub fn update<R>(&self, f: impl FnOnce(&mut NotebookState) -> R) -> R {
        let result = f(&mut lock(&self.notebook));
        self.emit(NotebookEvent::CellsChanged);
        result
    }

    pub fn processor<R>(&self, f: impl FnOnce(&ProcessorState) -> R) -> R {
        f(&lock(&self.processor))
    }

    pub fn dispatch_processor(&self, action: ProcessorAction) {
        lock(&self.processor).dispatch(action);
        self.emit(NotebookEvent::ProcessorChanged);
    }

    /// Mark a cell running. Returns its source, or `None` if it was deleted.
    pub(crate) fn begin_execution(&self, cell_id: &str) -> Option<String> {
        let source = lock(&self.notebook).begin_execution(cell_id)?;
        self.emit(NotebookEvent::CellStarted {
            cell_id: cell_id.to_string(),
        });
        Some(source)
    }

    /// Store a dispatch result, advance the counter and apply any processor
    /// effect.
    pub(crate) fn complete_execution(&self, cell_id: &str, dispatch: Dispatch) -> RunOutcome {
        let execution_count =
            lock(&self.notebook).complete_execution(cell_id, dispatch.result.clone());

        match dispatch.effect {
            Some(ProcessorEffect::Apply(update)) => {
                self.dispatch_processor(ProcessorAction::Apply(update))
            }
            Some(ProcessorEffect::Reset) => self.dispatch_processor(ProcessorAction::Reset),
            None => {}
        }

        self.emit(NotebookEvent::CellCompleted {
            cell_id: cell_id.to_string(),
            execution_count,
            result: dispatch.result.clone(),
        });

        RunOutcome::Completed {
            execution_count,
            result: dispatch.result,
        }
    }
}
