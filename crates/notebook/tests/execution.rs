//! Queue and notebook behaviour against an in-memory backend.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use notebook::assistant::{AiError, Assistant};
use notebook::context::NotebookEvent;
use notebook::notebook_state::NotebookState;
use notebook::{App, CellKind, RunOutcome};
use sim_client::{Backend, ErrorKind, Execution, ExecutionResult, ProcessorUpdate};

/// Backend that sleeps before answering and records call order.
///
/// Sources containing `FAIL` produce a domain error, `PANIC` panics, and
/// `SLOW n` sleeps n ms.
#[derive(Default)]
struct FakeBackend {
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeBackend {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

fn delay_for(code: &str) -> Duration {
    code.split_whitespace()
        .skip_while(|w| *w != "SLOW")
        .nth(1)
        .and_then(|ms| ms.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(1))
}

impl Backend for FakeBackend {
    fn execute<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Execution> {
        async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.calls.lock().unwrap().push(code.to_string());

            tokio::time::sleep(delay_for(code)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if code.contains("PANIC") {
                panic!("backend crashed on {}", code);
            }

            if code.contains("FAIL") {
                return ExecutionResult::error(ErrorKind::Domain, Some("Execution Error"), "bad")
                    .into();
            }
            Execution {
                result: ExecutionResult::success(format!("ran {}", code)),
                state: Some(ProcessorUpdate {
                    registers: Some(BTreeMap::from([("A".to_string(), "05".to_string())])),
                    flags: None,
                    memory: None,
                }),
            }
        }
        .boxed()
    }

    fn assemble<'a>(&'a self, _source: &'a str) -> BoxFuture<'a, ExecutionResult> {
        async { ExecutionResult::success("assembled") }.boxed()
    }

    fn reset(&self) -> BoxFuture<'_, Execution> {
        async { ExecutionResult::success("reset").into() }.boxed()
    }

    fn get_docs<'a>(&'a self, instruction: &'a str) -> BoxFuture<'a, ExecutionResult> {
        async move { ExecutionResult::success(format!("docs {}", instruction)) }.boxed()
    }

    fn get_timing_diagram<'a>(&'a self, instruction: &'a str) -> BoxFuture<'a, ExecutionResult> {
        async move { ExecutionResult::success(format!("timing {}", instruction)) }.boxed()
    }
}

struct EchoAssistant;

impl Assistant for EchoAssistant {
    fn ask<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String, AiError>> {
        async move {
            if prompt.contains("Message: bad") {
                Ok("Register Q does not exist.".to_string())
            } else {
                Ok(format!("echo: {}", prompt))
            }
        }
        .boxed()
    }
}

/// App whose notebook holds one code cell per source, in order.
fn app_with_cells(sources: &[&str]) -> (App, Arc<FakeBackend>, Vec<String>) {
    let mut state = NotebookState::new_empty();
    let mut ids = Vec::new();
    for (i, source) in sources.iter().enumerate() {
        let id = if i == 0 {
            state.cells()[0].id.clone()
        } else {
            state.add_cell(CellKind::Code, None)
        };
        state.update_cell_source(&id, source);
        ids.push(id);
    }
    let backend = Arc::new(FakeBackend::default());
    let app = App::new(state, backend.clone(), Arc::new(EchoAssistant));
    (app, backend, ids)
}

fn completed_result(outcome: &RunOutcome) -> &ExecutionResult {
    match outcome {
        RunOutcome::Completed { result, .. } => result,
        RunOutcome::Skipped => panic!("cell was skipped"),
    }
}

#[tokio::test]
async fn test_run_all_preserves_order_and_counts() {
    let (app, backend, ids) =
        app_with_cells(&["NOP SLOW 40", "NOP SLOW 5", "NOP SLOW 20", "NOP SLOW 1"]);

    let outcomes = app.queue().run_all().await;

    assert_eq!(outcomes.len(), 4);
    assert_eq!(
        backend.calls(),
        vec!["NOP SLOW 40", "NOP SLOW 5", "NOP SLOW 20", "NOP SLOW 1"]
    );
    app.context().read(|nb| {
        assert_eq!(nb.execution_count(), 4);
        for (i, id) in ids.iter().enumerate() {
            let cell = nb.get_cell(id).unwrap();
            assert_eq!(cell.execution_count, Some(i as u32 + 1));
            assert!(!cell.is_running);
            assert!(cell.output.is_some());
        }
    });
}

#[tokio::test]
async fn test_concurrent_runs_never_overlap() {
    let (app, backend, ids) = app_with_cells(&["A SLOW 30", "B SLOW 10", "C SLOW 20", "D SLOW 1"]);

    // All four triggers land before the first execution finishes
    let runs = ids.iter().map(|id| app.queue().run(id));
    let outcomes = futures::future::join_all(runs).await;

    assert_eq!(backend.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(backend.calls(), vec!["A SLOW 30", "B SLOW 10", "C SLOW 20", "D SLOW 1"]);

    let counts: Vec<u32> = outcomes
        .iter()
        .map(|o| match o {
            RunOutcome::Completed {
                execution_count, ..
            } => *execution_count,
            RunOutcome::Skipped => 0,
        })
        .collect();
    assert_eq!(counts, vec![1, 2, 3, 4]);
    assert!(!app.queue().state().processing);
}

#[tokio::test]
async fn test_error_does_not_stop_the_queue() {
    let (app, backend, ids) = app_with_cells(&["MVI A, 05H", "FAIL", "HLT"]);

    let outcomes = app.queue().run_all().await;

    assert_eq!(backend.calls().len(), 3);
    assert!(completed_result(&outcomes[1].1).is_error());
    assert!(!completed_result(&outcomes[2].1).is_error());
    let last = app
        .context()
        .read(|nb| nb.get_cell(&ids[2]).unwrap().execution_count);
    assert_eq!(last, Some(3));
}

#[tokio::test]
async fn test_empty_cells_are_not_run() {
    let (app, backend, ids) = app_with_cells(&["   \n  ", "HLT"]);

    assert_eq!(app.queue().run(&ids[0]).await, RunOutcome::Skipped);
    let outcomes = app.queue().run_all().await;

    assert_eq!(outcomes.len(), 1);
    assert_eq!(backend.calls(), vec!["HLT"]);
    assert_eq!(app.context().read(|nb| nb.execution_count()), 1);
}

#[tokio::test]
async fn test_deleted_cell_is_skipped() {
    let (app, backend, ids) = app_with_cells(&["FIRST SLOW 50", "SECOND"]);

    let first = app.queue().run(&ids[0]);
    let second = async {
        // Queue the second cell, then delete it while the first is running
        let pending = app.queue().run(&ids[1]);
        futures::pin_mut!(pending);
        assert!(futures::poll!(pending.as_mut()).is_pending());
        tokio::time::sleep(Duration::from_millis(10)).await;
        app.context().update(|nb| nb.delete_cell(&ids[1]));
        pending.await
    };
    let (first, second) = tokio::join!(first, second);

    assert!(matches!(first, RunOutcome::Completed { .. }));
    assert_eq!(second, RunOutcome::Skipped);
    assert_eq!(backend.calls(), vec!["FIRST SLOW 50"]);
    assert_eq!(app.context().read(|nb| nb.execution_count()), 1);
}

#[tokio::test]
async fn test_emptied_cell_is_skipped() {
    let (app, backend, ids) = app_with_cells(&["FIRST SLOW 50", "SECOND"]);

    let first = app.queue().run(&ids[0]);
    let second = async {
        // Queue the second cell, then blank it while the first is running
        let pending = app.queue().run(&ids[1]);
        futures::pin_mut!(pending);
        assert!(futures::poll!(pending.as_mut()).is_pending());
        tokio::time::sleep(Duration::from_millis(10)).await;
        app.context().update(|nb| nb.update_cell_source(&ids[1], "   "));
        pending.await
    };
    let (first, second) = tokio::join!(first, second);

    assert!(matches!(first, RunOutcome::Completed { .. }));
    assert_eq!(second, RunOutcome::Skipped);
    assert_eq!(backend.calls(), vec!["FIRST SLOW 50"]);
    app.context().read(|nb| {
        assert_eq!(nb.execution_count(), 1);
        let cell = nb.get_cell(&ids[1]).unwrap();
        assert!(!cell.is_running);
        assert!(cell.execution_count.is_none());
    });
}

#[tokio::test]
async fn test_queue_recovers_after_backend_panic() {
    let (app, backend, ids) = app_with_cells(&["PANIC SLOW 20", "AFTER", "HLT"]);

    let crashed = app.queue().run(&ids[0]);
    let queued = async {
        let pending = app.queue().run(&ids[1]);
        futures::pin_mut!(pending);
        assert!(futures::poll!(pending.as_mut()).is_pending());
        pending.await
    };
    let (crashed, queued) = tokio::join!(crashed, queued);

    assert_eq!(crashed, RunOutcome::Skipped);
    assert_eq!(queued, RunOutcome::Skipped);
    let state = app.queue().state();
    assert!(!state.processing);
    assert!(state.executing_cell_id.is_none());
    assert!(state.cells.is_empty());
    assert!(!app
        .context()
        .read(|nb| nb.get_cell(&ids[0]).unwrap().is_running));

    // A later run starts a fresh drain loop
    let outcome = app.queue().run(&ids[2]).await;
    assert!(matches!(
        outcome,
        RunOutcome::Completed {
            execution_count: 1,
            ..
        }
    ));
    assert_eq!(backend.calls(), vec!["PANIC SLOW 20", "HLT"]);
}

#[tokio::test]
async fn test_processor_state_follows_execution_and_reset() {
    let (app, _, ids) = app_with_cells(&["MVI A, 05H", "@reset"]);

    app.queue().run(&ids[0]).await;
    assert_eq!(
        app.context().processor(|p| p.register("A").map(str::to_string)),
        Some("05".to_string())
    );

    app.queue().run(&ids[1]).await;
    assert_eq!(
        app.context().processor(|p| p.register("A").map(str::to_string)),
        Some("00".to_string())
    );
}

#[tokio::test]
async fn test_events_published_in_order() {
    let (app, _, ids) = app_with_cells(&["HLT"]);
    let mut rx = app.context().subscribe();

    app.queue().run(&ids[0]).await;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    let started = events
        .iter()
        .position(|e| matches!(e, NotebookEvent::CellStarted { .. }))
        .unwrap();
    let completed = events
        .iter()
        .position(|e| matches!(e, NotebookEvent::CellCompleted { .. }))
        .unwrap();
    assert!(started < completed);
    assert!(matches!(events[0], NotebookEvent::QueueState(ref s) if s.processing));
}

#[tokio::test]
async fn test_explain_attaches_to_error() {
    let (app, _, ids) = app_with_cells(&["MOV Q, A FAIL", "HLT"]);
    app.queue().run_all().await;

    let text = app.explain(&ids[0]).await.unwrap();
    assert_eq!(text, "Register Q does not exist.");
    let attached = app.context().read(|nb| {
        nb.get_cell(&ids[0])
            .and_then(|c| c.output.as_ref())
            .and_then(|o| o.as_error())
            .and_then(|e| e.explanation.clone())
    });
    assert_eq!(attached.as_deref(), Some("Register Q does not exist."));

    assert!(app.explain(&ids[1]).await.is_err());
}

#[tokio::test]
async fn test_repl_session() {
    let (app, backend, _) = app_with_cells(&[""]);
    let input: &[u8] = b"MVI A, 05H\nHLT\n\n:state\n:add markdown\n# Notes\n\n:list\n@docs mov\n\n:quit\nNOP\n\n";
    let mut out = Vec::new();

    notebook::repl::run_repl(&app, input, &mut out).await.unwrap();

    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("Out[1]:"));
    assert!(text.contains("ok: ran MVI A, 05H\nHLT"));
    assert!(text.contains("Out[2]:"));
    assert!(text.contains("docs MOV"));
    assert!(text.contains("markdown"));
    // Input after :quit is ignored
    assert_eq!(backend.calls(), vec!["MVI A, 05H\nHLT"]);

    app.context().read(|nb| {
        assert_eq!(nb.len(), 3);
        assert_eq!(nb.cells()[0].content, "MVI A, 05H\nHLT");
        assert_eq!(nb.cells()[1].kind, CellKind::Markdown);
        assert_eq!(nb.cells()[1].content, "# Notes");
        assert_eq!(nb.cells()[2].content, "@docs mov");
    });
}
