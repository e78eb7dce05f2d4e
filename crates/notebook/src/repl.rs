//! Line-oriented notebook front-end.
//!
//! Lines accumulate into a block until an empty line; the block becomes a
//! new code cell and runs. Lines starting with `:` outside a block are
//! notebook commands.

use std::io::Write;
use std::path::PathBuf;

use log::warn;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::execution_queue::RunOutcome;
use crate::export;
use crate::notebook_state::{CellKind, CellUpdate};
use crate::render;
use crate::App;

#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    List,
    Add(CellKind),
    Edit(usize),
    Run(usize),
    RunAll,
    Delete(usize),
    ClearOutputs,
    Clear,
    State,
    Explain(usize),
    Export(Option<PathBuf>),
    Import(PathBuf),
    Help,
    Quit,
}

/// Parse a 1-based cell number into an index.
fn cell_number(arg: Option<&str>) -> Result<usize, String> {
    let arg = arg.ok_or_else(|| "missing cell number".to_string())?;
    match arg.parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n - 1),
        _ => Err(format!("invalid cell number: {}", arg)),
    }
}

impl ReplCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let body = line
            .strip_prefix(':')
            .ok_or_else(|| format!("not a command: {}", line))?;
        let mut parts = body.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::trim).filter(|a| !a.is_empty());

        match name {
            "list" | "ls" => Ok(ReplCommand::List),
            "add" => Ok(ReplCommand::Add(match arg {
                Some(kind) => kind.parse()?,
                None => CellKind::Code,
            })),
            "edit" => cell_number(arg).map(ReplCommand::Edit),
            "run" => cell_number(arg).map(ReplCommand::Run),
            "runall" => Ok(ReplCommand::RunAll),
            "delete" | "rm" => cell_number(arg).map(ReplCommand::Delete),
            "clear-outputs" => Ok(ReplCommand::ClearOutputs),
            "clear" => Ok(ReplCommand::Clear),
            "state" => Ok(ReplCommand::State),
            "explain" => cell_number(arg).map(ReplCommand::Explain),
            "export" => Ok(ReplCommand::Export(arg.map(PathBuf::from))),
            "import" => arg
                .map(|p| ReplCommand::Import(PathBuf::from(p)))
                .ok_or_else(|| "usage: :import PATH".to_string()),
            "help" | "h" => Ok(ReplCommand::Help),
            "quit" | "q" | "exit" => Ok(ReplCommand::Quit),
            other => Err(format!("unknown command :{} (try :help)", other)),
        }
    }
}

const REPL_HELP: &str = "\
Type assembly or an @command, then an empty line to run it.

Notebook commands:
  :list                 list cells
  :add [code|markdown]  append a cell and edit it
  :edit N               replace the source of cell N
  :run N                run cell N
  :runall               run every code cell in order
  :delete N             delete cell N
  :clear-outputs        clear all outputs
  :clear                start over with one empty cell
  :state                show registers, flags and memory
  :explain N            ask the assistant to explain cell N's error
  :export [PATH]        export cells to JSON
  :import PATH          replace cells with an export file
  :help                 this text
  :quit                 save and exit
";

/// Where the next block of input goes.
#[derive(Debug, Clone, PartialEq)]
enum Target {
    NewCell,
    Replace(String),
}

struct Repl<'a, W: Write> {
    app: &'a App,
    out: &'a mut W,
    target: Target,
    block: Vec<String>,
}

impl<'a, W: Write> Repl<'a, W> {
    fn cell_id(&self, index: usize) -> Option<String> {
        self.app
            .context()
            .read(|nb| nb.cells().get(index).map(|c| c.id.clone()))
    }

    fn print_outcome(&mut self, outcome: &RunOutcome) -> std::io::Result<()> {
        match outcome {
            RunOutcome::Completed {
                execution_count,
                result,
            } => {
                writeln!(self.out, "Out[{}]:", execution_count)?;
                write!(self.out, "{}", render::render_result(result))
            }
            RunOutcome::Skipped => writeln!(self.out, "(skipped: nothing to run)"),
        }
    }

    async fn submit_block(&mut self) -> std::io::Result<()> {
        let content = self.block.join("\n");
        self.block.clear();
        let target = std::mem::replace(&mut self.target, Target::NewCell);
        let app = self.app;
        let context = app.context();

        match target {
            Target::Replace(cell_id) => {
                let updated =
                    context.update(|nb| nb.update_cell(&cell_id, CellUpdate::content(content)));
                if !updated {
                    writeln!(self.out, "cell no longer exists")?;
                }
                Ok(())
            }
            Target::NewCell => {
                // Fill a trailing blank code cell before appending a new one
                let cell_id = context.update(|nb| {
                    let reuse = nb
                        .cells()
                        .last()
                        .filter(|c| c.kind == CellKind::Code && c.content.trim().is_empty())
                        .map(|c| c.id.clone());
                    let id = reuse.unwrap_or_else(|| nb.add_cell(CellKind::Code, None));
                    nb.update_cell_source(&id, &content);
                    id
                });
                let outcome = app.queue().run(&cell_id).await;
                self.print_outcome(&outcome)
            }
        }
    }

    async fn command(&mut self, command: ReplCommand) -> std::io::Result<()> {
        let context = self.app.context().clone();
        match command {
            ReplCommand::List => {
                let cells = context.read(|nb| nb.snapshot());
                writeln!(self.out, "{}", render::cell_table(&cells))?;
            }
            ReplCommand::Add(kind) => {
                let id = context.update(|nb| nb.add_cell(kind, None));
                writeln!(self.out, "added {} cell; enter its source, end with an empty line", kind)?;
                self.target = Target::Replace(id);
            }
            ReplCommand::Edit(index) => match self.cell_id(index) {
                Some(id) => {
                    writeln!(self.out, "editing cell {}; end with an empty line", index + 1)?;
                    self.target = Target::Replace(id);
                }
                None => writeln!(self.out, "no cell {}", index + 1)?,
            },
            ReplCommand::Run(index) => match self.cell_id(index) {
                Some(id) => {
                    let outcome = self.app.queue().run(&id).await;
                    self.print_outcome(&outcome)?;
                }
                None => writeln!(self.out, "no cell {}", index + 1)?,
            },
            ReplCommand::RunAll => {
                let outcomes = self.app.queue().run_all().await;
                if outcomes.is_empty() {
                    writeln!(self.out, "nothing to run")?;
                }
                for (_, outcome) in outcomes {
                    self.print_outcome(&outcome)?;
                }
            }
            ReplCommand::Delete(index) => match self.cell_id(index) {
                Some(id) => {
                    context.update(|nb| nb.delete_cell(&id));
                    writeln!(self.out, "deleted cell {}", index + 1)?;
                }
                None => writeln!(self.out, "no cell {}", index + 1)?,
            },
            ReplCommand::ClearOutputs => {
                context.update(|nb| nb.clear_all_outputs());
                writeln!(self.out, "outputs cleared")?;
            }
            ReplCommand::Clear => {
                context.update(|nb| nb.clear_all());
                writeln!(self.out, "notebook cleared")?;
            }
            ReplCommand::State => {
                let text = context.processor(render::render_processor);
                write!(self.out, "{}", text)?;
            }
            ReplCommand::Explain(index) => match self.cell_id(index) {
                Some(id) => match self.app.explain(&id).await {
                    Ok(text) => writeln!(self.out, "{}", text.trim_end())?,
                    Err(e) => writeln!(self.out, "explain failed: {}", e)?,
                },
                None => writeln!(self.out, "no cell {}", index + 1)?,
            },
            ReplCommand::Export(path) => {
                let path = path.unwrap_or_else(|| PathBuf::from(export::default_export_filename()));
                let document = context.read(|nb| export::export_session(nb, true));
                match export::write_export(&path, &document) {
                    Ok(()) => writeln!(
                        self.out,
                        "exported {} cells to {}",
                        document.cells.len(),
                        path.display()
                    )?,
                    Err(e) => writeln!(self.out, "export failed: {:#}", e)?,
                }
            }
            ReplCommand::Import(path) => {
                match context.update(|nb| export::import_file(nb, &path)) {
                    Ok(count) => writeln!(self.out, "imported {} cells", count)?,
                    Err(e) => writeln!(self.out, "import failed: {:#}", e)?,
                }
            }
            ReplCommand::Help => write!(self.out, "{}", REPL_HELP)?,
            ReplCommand::Quit => {}
        }
        Ok(())
    }
}

/// Read input until `:quit` or end of input.
///
/// A block still open at end of input is submitted as if an empty line
/// followed it.
pub async fn run_repl<R, W>(app: &App, input: R, out: &mut W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut repl = Repl {
        app,
        out,
        target: Target::NewCell,
        block: Vec::new(),
    };
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await? {
        if repl.block.is_empty() && line.trim_start().starts_with(':') {
            match ReplCommand::parse(&line) {
                Ok(ReplCommand::Quit) => return Ok(()),
                Ok(command) => repl.command(command).await?,
                Err(message) => writeln!(repl.out, "{}", message)?,
            }
            repl.out.flush()?;
            continue;
        }

        if line.trim().is_empty() {
            if !repl.block.is_empty() {
                repl.submit_block().await?;
                repl.out.flush()?;
            }
            continue;
        }

        repl.block.push(line);
    }

    if !repl.block.is_empty() {
        warn!("[repl] input ended inside a block; submitting it");
        repl.submit_block().await?;
    }
    Ok(())
}
