//! Plain-text rendering of cells, results and processor state.

use std::fmt::Write as _;

use sim_client::{DocSections, ErrorOutput, ExecutionResult};
use tabled::builder::Builder;
use tabled::{settings::Style, Table, Tabled};

use crate::magic::MagicCommand;
use crate::notebook_state::{Cell, CellKind};
use crate::processor_state::ProcessorState;

const PREVIEW_WIDTH: usize = 48;

#[derive(Tabled)]
struct CellRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "TYPE")]
    kind: String,
    #[tabled(rename = "EXEC")]
    execution: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "SOURCE")]
    source: String,
}

#[derive(Tabled)]
struct RegisterRow {
    #[tabled(rename = "REGISTER")]
    name: String,
    #[tabled(rename = "VALUE")]
    value: String,
}

fn preview(content: &str) -> String {
    let first = content.lines().next().unwrap_or_default().trim();
    let more = content.lines().count() > 1;
    let mut text: String = first.chars().take(PREVIEW_WIDTH).collect();
    if more || first.chars().count() > PREVIEW_WIDTH {
        text.push_str(" ...");
    }
    text
}

fn status(cell: &Cell) -> &'static str {
    if cell.is_running {
        return "running";
    }
    match &cell.output {
        None => "",
        Some(ExecutionResult::Error(_)) => "error",
        Some(ExecutionResult::Warning { .. }) => "warning",
        Some(_) => "ok",
    }
}

/// One row per cell, numbered from 1.
pub fn cell_table(cells: &[Cell]) -> String {
    let rows: Vec<CellRow> = cells
        .iter()
        .enumerate()
        .map(|(i, cell)| CellRow {
            index: i + 1,
            kind: cell.kind.to_string(),
            execution: cell
                .execution_count
                .map(|n| format!("[{}]", n))
                .unwrap_or_default(),
            status: status(cell).to_string(),
            source: preview(&cell.content),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Full cell: header, source and output.
pub fn render_cell(index: usize, cell: &Cell) -> String {
    let mut out = String::new();
    let count = cell
        .execution_count
        .map(|n| n.to_string())
        .unwrap_or_else(|| " ".to_string());
    let _ = writeln!(out, "In [{}] #{} ({})", count, index + 1, cell.kind);
    for line in cell.content.lines() {
        let _ = writeln!(out, "    {}", line);
    }
    if let Some(result) = &cell.output {
        if cell.kind == CellKind::Code {
            let _ = writeln!(out, "Out[{}]:", count);
            out.push_str(&render_result(result));
        }
    }
    out
}

fn render_error(error: &ErrorOutput) -> String {
    let mut out = String::new();
    match &error.title {
        Some(title) => {
            let _ = writeln!(out, "error: {}: {}", title, error.message);
        }
        None => {
            let _ = writeln!(out, "error: {}", error.message);
        }
    }
    if let Some(detail) = &error.detail {
        let fields = [
            ("type", &detail.kind),
            ("instruction", &detail.instruction),
            ("tag", &detail.tag),
            ("position", &detail.position),
            ("line", &detail.line),
            ("hint", &detail.hint),
        ];
        for (label, value) in fields {
            if let Some(value) = value {
                let _ = writeln!(out, "  {}: {}", label, value);
            }
        }
    }
    if let Some(explanation) = &error.explanation {
        let _ = writeln!(out, "\nexplanation:\n{}", explanation.trim_end());
    }
    out
}

fn render_docs(instruction: &str, sections: &DocSections) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", instruction);
    if !sections.description.is_empty() {
        let _ = writeln!(out, "  {}", sections.description);
    }
    for (title, lines) in [
        ("Args", &sections.args),
        ("Raises", &sections.raises),
        ("Notes", &sections.notes),
        ("Example", &sections.example),
    ] {
        if lines.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n{}:", title);
        for line in lines {
            let _ = writeln!(out, "  {}", line);
        }
    }
    out
}

/// Assembly listing as a table with the backend's column labels.
pub fn assembly_table(labels: &[String], rows: &[Vec<String>]) -> String {
    let mut builder = Builder::default();
    if !labels.is_empty() {
        builder.push_record(labels.iter().cloned());
    }
    for row in rows {
        builder.push_record(row.iter().cloned());
    }
    let mut table = builder.build();
    table.with(Style::rounded());
    table.to_string()
}

pub fn help_text() -> String {
    let mut out = String::from("Magic commands:\n");
    for command in MagicCommand::ALL {
        let usage = match command.usage() {
            Some((placeholder, _)) => format!("{} {}", command.name(), placeholder),
            None => command.name().to_string(),
        };
        let _ = writeln!(out, "  {:<26} {}", usage, command.description());
        if let Some((_, example)) = command.usage() {
            let _ = writeln!(out, "  {:<26} e.g. {} {}", "", command.name(), example);
        }
    }
    out.push_str("\nAnything else is assembled and executed on the simulator.\n");
    out
}

pub fn render_result(result: &ExecutionResult) -> String {
    match result {
        ExecutionResult::Success { message } => format!("ok: {}\n", message),
        ExecutionResult::Error(error) => render_error(error),
        ExecutionResult::Warning { message } => format!("warning: {}\n", message),
        ExecutionResult::AiResponse { text } => format!("{}\n", text.trim_end()),
        ExecutionResult::Docs {
            instruction,
            sections,
        } => render_docs(instruction, sections),
        ExecutionResult::TimingDiagram { instruction, image } => {
            let kind = image
                .strip_prefix("data:")
                .and_then(|rest| rest.split(';').next())
                .unwrap_or("image");
            format!(
                "Timing diagram for {} ({}, {} bytes)\n",
                instruction,
                kind,
                image.len()
            )
        }
        ExecutionResult::AssemblyTable { labels, rows } => {
            format!("{}\n", assembly_table(labels, rows))
        }
        ExecutionResult::Help => help_text(),
    }
}

/// Registers as a table, followed by flags and non-empty memory.
pub fn render_processor(state: &ProcessorState) -> String {
    let rows: Vec<RegisterRow> = state
        .registers()
        .iter()
        .map(|(name, value)| RegisterRow {
            name: name.clone(),
            value: value.clone(),
        })
        .collect();
    let mut out = Table::new(rows).with(Style::rounded()).to_string();
    out.push('\n');

    let flags: Vec<String> = state
        .flags()
        .iter()
        .map(|(name, set)| format!("{}={}", name, u8::from(*set)))
        .collect();
    let _ = writeln!(out, "Flags: {}", flags.join(" "));

    if state.memory_size() == 0 {
        out.push_str("Memory: (empty)\n");
    } else {
        let _ = writeln!(out, "Memory ({} locations):", state.memory_size());
        for (address, value) in state.memory() {
            let _ = writeln!(out, "  {}: {}", address, value);
        }
    }
    out
}
