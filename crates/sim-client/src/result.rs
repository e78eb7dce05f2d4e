//! Typed execution results shared by the client and the notebook.
//!
//! Every execution, magic command or remote call resolves to exactly one
//! [`ExecutionResult`]. Failures are values of this type, never panics or
//! `Err`s that reach the front-end.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::docs::DocSections;

/// Category of an error result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or malformed magic command argument
    Usage,
    /// Magic command not in the registry
    UnknownCommand,
    /// Backend unreachable or request timed out
    Network,
    /// Non-JSON body or unexpected response from the backend
    Server,
    /// Assembly/runtime fault reported by the simulator
    Domain,
    /// AI provider rejected or failed the request
    AiProvider,
}

/// Structured detail attached to an error, as reported by the simulator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorDetail {
    /// Detail carrying only a hint.
    pub fn hint(hint: impl Into<String>) -> Self {
        Self {
            hint: Some(hint.into()),
            ..Default::default()
        }
    }

    /// Build from a loosely-typed JSON object; scalars are stringified.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let obj = value.as_object()?;
        let field = |name: &str| obj.get(name).and_then(scalar_to_string);
        let detail = Self {
            kind: field("type"),
            instruction: field("instruction"),
            tag: field("tag"),
            position: field("position"),
            line: field("line"),
            hint: field("hint"),
        };
        if detail == Self::default() {
            None
        } else {
            Some(detail)
        }
    }
}

/// Render a JSON scalar as display text. Null and containers yield `None`.
pub(crate) fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Payload of an error result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorOutput {
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<ErrorDetail>,
    /// AI explanation attached after the fact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// Outcome of running one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ExecutionResult {
    Success {
        message: String,
    },
    Error(ErrorOutput),
    Warning {
        message: String,
    },
    AiResponse {
        text: String,
    },
    Docs {
        instruction: String,
        sections: DocSections,
    },
    TimingDiagram {
        instruction: String,
        /// Image reference, usually a `data:image/png;base64,...` URL
        image: String,
    },
    AssemblyTable {
        labels: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    Help,
}

impl ExecutionResult {
    pub fn success(message: impl Into<String>) -> Self {
        ExecutionResult::Success {
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        ExecutionResult::Warning {
            message: message.into(),
        }
    }

    pub fn error(kind: ErrorKind, title: Option<&str>, message: impl Into<String>) -> Self {
        ExecutionResult::Error(ErrorOutput {
            kind,
            title: title.map(str::to_string),
            message: message.into(),
            detail: None,
            explanation: None,
        })
    }

    pub fn error_with_detail(
        kind: ErrorKind,
        title: Option<&str>,
        message: impl Into<String>,
        detail: Option<ErrorDetail>,
    ) -> Self {
        ExecutionResult::Error(ErrorOutput {
            kind,
            title: title.map(str::to_string),
            message: message.into(),
            detail,
            explanation: None,
        })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ExecutionResult::Error(_))
    }

    pub fn as_error(&self) -> Option<&ErrorOutput> {
        match self {
            ExecutionResult::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.as_error().map(|e| e.kind)
    }
}

/// Mirror of the simulator's register, flag and memory state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorSnapshot {
    pub registers: BTreeMap<String, String>,
    pub flags: BTreeMap<String, bool>,
    pub memory: BTreeMap<String, String>,
}

impl Default for ProcessorSnapshot {
    fn default() -> Self {
        let registers = ["A", "B", "C", "D", "E", "H", "L"]
            .into_iter()
            .map(|r| (r.to_string(), "00".to_string()))
            .chain(
                ["SP", "PC"]
                    .into_iter()
                    .map(|r| (r.to_string(), "0000".to_string())),
            )
            .collect();
        let flags = ["S", "Z", "AC", "P", "C"]
            .into_iter()
            .map(|f| (f.to_string(), false))
            .collect();
        Self {
            registers,
            flags,
            memory: BTreeMap::new(),
        }
    }
}
