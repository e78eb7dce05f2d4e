//! Notebook client for 8085 assembly.
//!
//! Cells hold assembly or `@` magic commands. Running a cell sends it through
//! the execution queue to the simulator backend (or the AI assistant), and
//! the result is stored on the cell. The processor state mirror follows each
//! execution.

pub mod assistant;
pub mod context;
pub mod execution_queue;
pub mod export;
pub mod magic;
pub mod notebook_state;
pub mod processor_state;
pub mod render;
pub mod repl;
pub mod session;
pub mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context as _};
use log::{info, warn};
use sim_client::{Backend, ExecutionResult, SimClient};
use tokio::io::BufReader;

use assistant::{explain_error, Assistant, ChatAssistant};
use context::NotebookContext;
use execution_queue::QueueHandle;
use magic::CommandRouter;
use notebook_state::NotebookState;
use session::SessionDocument;
use settings::AppSettings;

pub use execution_queue::RunOutcome;
pub use notebook_state::{Cell, CellKind};

/// Wired-up notebook: stores, router and queue.
pub struct App {
    context: NotebookContext,
    queue: QueueHandle,
    router: CommandRouter,
}

impl App {
    pub fn new(state: NotebookState, backend: Arc<dyn Backend>, assistant: Arc<dyn Assistant>) -> Self {
        let context = NotebookContext::new(state);
        let router = CommandRouter::new(backend, assistant);
        let queue = QueueHandle::new(context.clone(), router.clone());
        Self {
            context,
            queue,
            router,
        }
    }

    pub fn context(&self) -> &NotebookContext {
        &self.context
    }

    pub fn queue(&self) -> &QueueHandle {
        &self.queue
    }

    /// Ask the assistant to explain a cell's error and attach the answer to
    /// the cell output.
    pub async fn explain(&self, cell_id: &str) -> anyhow::Result<String> {
        let (code, error) = self.context.read(|nb| {
            let cell = nb.get_cell(cell_id)?;
            let error = cell.output.as_ref()?.as_error()?.clone();
            Some((cell.content.clone(), error))
        })
        .ok_or_else(|| anyhow!("cell has no error output to explain"))?;

        let prompt = explain_error(&code, &error);
        let text = self.router.assistant().ask(&prompt).await?;
        self.context
            .update(|nb| nb.attach_explanation(cell_id, text.clone()));
        Ok(text)
    }
}

/// Overrides given on the command line.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub backend_url: Option<String>,
    pub timeout_ms: Option<u64>,
    pub session_path: Option<PathBuf>,
}

impl LaunchOptions {
    pub fn apply(&self, settings: &mut AppSettings) {
        if let Some(url) = &self.backend_url {
            settings.backend_url = url.clone();
        }
        if let Some(timeout) = self.timeout_ms {
            settings.timeout_ms = timeout;
        }
    }
}

#[derive(Debug, Clone)]
pub enum Mode {
    /// Interactive session backed by the saved notebook
    Repl,
    /// Import an export file and run every code cell
    Run { file: PathBuf, json: bool },
    /// Probe the backend
    Health,
}

fn build_client(settings: &AppSettings) -> anyhow::Result<SimClient> {
    Ok(SimClient::new(&settings.backend_url)?.with_timeout(settings.timeout()))
}

fn build_app(settings: &AppSettings, state: NotebookState) -> anyhow::Result<App> {
    let client = build_client(settings)?;
    let assistant = ChatAssistant::new(settings.assistant_config())?;
    Ok(App::new(state, Arc::new(client), Arc::new(assistant)))
}

/// Import `file`, run all code cells and print the outputs.
///
/// Fails if any cell produced an error result.
pub async fn run_file(app: &App, file: &std::path::Path, json: bool) -> anyhow::Result<()> {
    let imported = app
        .context()
        .update(|nb| export::import_file(nb, file))?;
    info!("Imported {} cells from {}", imported, file.display());

    let outcomes = app.queue().run_all().await;
    let cells = app.context().read(|nb| nb.snapshot());

    if json {
        println!("{}", serde_json::to_string_pretty(&cells)?);
    } else {
        for (index, cell) in cells.iter().enumerate() {
            println!("{}", render::render_cell(index, cell));
        }
    }

    let failed = outcomes
        .iter()
        .filter(|(_, o)| {
            matches!(
                o,
                RunOutcome::Completed {
                    result: ExecutionResult::Error(_),
                    ..
                }
            )
        })
        .count();
    if failed > 0 {
        bail!("{} of {} cells failed", failed, outcomes.len());
    }
    Ok(())
}

pub async fn run(options: LaunchOptions, mode: Mode) -> anyhow::Result<()> {
    let settings_path = settings::settings_path();
    if !settings_path.exists() {
        // Leave an editable template for API keys and the backend URL
        match settings::save_settings(&AppSettings::default()) {
            Ok(()) => info!("Wrote default settings to {}", settings_path.display()),
            Err(e) => warn!("Could not write default settings: {}", e),
        }
    }
    let mut settings = settings::load_settings();
    options.apply(&mut settings);

    match mode {
        Mode::Health => {
            let client = build_client(&settings)?;
            if client.health().await {
                println!("Backend at {} is healthy", client.base_url());
                Ok(())
            } else {
                bail!("Backend at {} is not reachable", client.base_url())
            }
        }
        Mode::Run { file, json } => {
            let app = build_app(&settings, NotebookState::new_empty())?;
            run_file(&app, &file, json).await
        }
        Mode::Repl => {
            let session_path = options
                .session_path
                .clone()
                .unwrap_or_else(session::default_session_path);
            let state = session::load_session(&session_path);
            let app = build_app(&settings, state)?;
            let autosaver = session::spawn_autosaver(
                app.context(),
                session_path.clone(),
                settings.autosave_delay(),
            );

            println!(
                "8085 notebook ({}). Type :help for commands.",
                settings.backend_url
            );
            let mut stdout = std::io::stdout();
            let result = repl::run_repl(&app, BufReader::new(tokio::io::stdin()), &mut stdout).await;

            autosaver.abort();
            let document = app.context().read(SessionDocument::from_state);
            session::save_session(&session_path, &document)
                .with_context(|| format!("Failed to save session to {}", session_path.display()))?;
            result
        }
    }
}
