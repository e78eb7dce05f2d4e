//! Cell dispatch: magic commands versus plain assembly.
//!
//! Cell text starting with `@` is a magic command handled here; anything else
//! is sent to the simulator for execution. Every path resolves to exactly
//! one [`ExecutionResult`].

use std::sync::Arc;

use log::{debug, warn};
use sim_client::{Backend, ErrorKind, ExecutionResult, ProcessorUpdate};

use crate::assistant::{AiError, Assistant};

pub const MAGIC_PREFIX: char = '@';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagicCommand {
    Help,
    Docs,
    Timing,
    Assemble,
    Ask,
    Reset,
}

impl MagicCommand {
    pub const ALL: [MagicCommand; 6] = [
        MagicCommand::Help,
        MagicCommand::Docs,
        MagicCommand::Timing,
        MagicCommand::Assemble,
        MagicCommand::Ask,
        MagicCommand::Reset,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MagicCommand::Help => "@help",
            MagicCommand::Docs => "@docs",
            MagicCommand::Timing => "@timing",
            MagicCommand::Assemble => "@assemble",
            MagicCommand::Ask => "@ask",
            MagicCommand::Reset => "@reset",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            MagicCommand::Help => "Show available commands",
            MagicCommand::Docs => "Show documentation for an instruction",
            MagicCommand::Timing => "Show the timing diagram for an instruction",
            MagicCommand::Assemble => "Assemble code into an address/opcode table",
            MagicCommand::Ask => "Ask the AI assistant about 8085 programming",
            MagicCommand::Reset => "Reset the processor to its default state",
        }
    }

    /// Argument placeholder and example, for commands that take one.
    pub fn usage(&self) -> Option<(&'static str, &'static str)> {
        match self {
            MagicCommand::Docs => Some(("[instruction]", "MOV")),
            MagicCommand::Timing => Some(("[instruction]", "MOV")),
            MagicCommand::Assemble => Some(("[instructions]", "MVI A, 05H")),
            MagicCommand::Ask => Some(("[question]", "How does MOV instruction work?")),
            MagicCommand::Help | MagicCommand::Reset => None,
        }
    }
}

pub fn is_magic(text: &str) -> bool {
    text.trim_start().starts_with(MAGIC_PREFIX)
}

/// Split trimmed text at the first whitespace character into `(name, args)`.
pub fn split_command(text: &str) -> (&str, &str) {
    let trimmed = text.trim();
    match trimmed.find(char::is_whitespace) {
        Some(idx) => (&trimmed[..idx], trimmed[idx..].trim()),
        None => (trimmed, ""),
    }
}

fn usage_error(command: MagicCommand) -> ExecutionResult {
    let (placeholder, example) = command.usage().unwrap_or(("", ""));
    ExecutionResult::error(
        ErrorKind::Usage,
        Some("Usage Error"),
        format!(
            "Usage: {name} {placeholder}\nExample: {name} {example}",
            name = command.name()
        ),
    )
}

/// Change the processor store should undergo after a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorEffect {
    Apply(ProcessorUpdate),
    Reset,
}

/// Result of dispatching one cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub result: ExecutionResult,
    pub effect: Option<ProcessorEffect>,
}

impl From<ExecutionResult> for Dispatch {
    fn from(result: ExecutionResult) -> Self {
        Dispatch {
            result,
            effect: None,
        }
    }
}

/// Routes cell content to the backend or the assistant.
#[derive(Clone)]
pub struct CommandRouter {
    backend: Arc<dyn Backend>,
    assistant: Arc<dyn Assistant>,
}

impl CommandRouter {
    pub fn new(backend: Arc<dyn Backend>, assistant: Arc<dyn Assistant>) -> Self {
        Self { backend, assistant }
    }

    pub fn assistant(&self) -> &Arc<dyn Assistant> {
        &self.assistant
    }

    pub async fn dispatch(&self, content: &str) -> Dispatch {
        let trimmed = content.trim();
        if !is_magic(trimmed) {
            let exec = self.backend.execute(trimmed).await;
            let effect = exec
                .state
                .filter(|s| !s.is_empty())
                .map(ProcessorEffect::Apply);
            return Dispatch {
                result: exec.result,
                effect,
            };
        }

        let (name, args) = split_command(trimmed);
        let Some(command) = MagicCommand::from_name(name) else {
            debug!("[router] unknown magic command {}", name);
            return ExecutionResult::error(
                ErrorKind::UnknownCommand,
                None,
                format!(
                    "Unknown magic command: {}. Type {} for a list of available commands.",
                    name,
                    MagicCommand::Help.name()
                ),
            )
            .into();
        };

        if command.usage().is_some() && args.is_empty() {
            return usage_error(command).into();
        }

        match command {
            MagicCommand::Help => ExecutionResult::Help.into(),
            MagicCommand::Docs => self.backend.get_docs(&args.to_uppercase()).await.into(),
            MagicCommand::Timing => self
                .backend
                .get_timing_diagram(&args.to_uppercase())
                .await
                .into(),
            MagicCommand::Assemble => self.backend.assemble(args).await.into(),
            MagicCommand::Ask => self.ask(args).await.into(),
            MagicCommand::Reset => {
                let exec = self.backend.reset().await;
                let effect = (!exec.result.is_error()).then_some(ProcessorEffect::Reset);
                Dispatch {
                    result: exec.result,
                    effect,
                }
            }
        }
    }

    async fn ask(&self, question: &str) -> ExecutionResult {
        match self.assistant.ask(question).await {
            Ok(text) => ExecutionResult::AiResponse { text },
            Err(AiError::NotConfigured(provider)) => ExecutionResult::warning(format!(
                "API Key Required: AI features require a {} API key. Add it to your settings file to enable @ask.",
                provider
            )),
            Err(err @ AiError::InvalidKey(_)) => ExecutionResult::warning(format!(
                "AI Service Error: {}\nPlease configure a valid API key in your settings file.",
                err
            )),
            Err(err) => {
                warn!("[router] AI request failed: {}", err);
                ExecutionResult::error(
                    ErrorKind::AiProvider,
                    Some("AI Service Error"),
                    err.to_string(),
                )
            }
        }
    }
}
