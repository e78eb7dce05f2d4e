//! Normalization of backend response bodies into [`ExecutionResult`]s.
//!
//! The simulator service has grown several response shapes over time. This
//! module is the only place that looks at raw JSON; everything past it works
//! with typed results.
//!
//! Precedence for execute payloads is `newState` > `state` > flat
//! `registers`/`flags`/`memory` fields.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::docs::parse_documentation;
use crate::result::{scalar_to_string, ErrorDetail, ErrorKind, ExecutionResult};

pub const EXECUTED_WITH_STATE: &str = "Code executed successfully. Check Processor State panel.";
pub const EXECUTED: &str = "Code executed successfully.";
pub const RESET_DONE: &str = "Reset Successful: Processor state has been reset to default values. Check the Processor State panel to see the updated values.";
pub const SYNTAX_HINT: &str = "Please check your code syntax and try again";
pub const CONNECTIVITY_HINT: &str = "Please ensure the backend server is running";
const DOCS_HINT: &str = "Valid instructions: MOV, MVI, LDA, STA, ADD, SUB, etc.";
const TIMING_HINT: &str = "Valid instructions: MOV, MVI, ADD, SUB, LDA, STA, etc.";

/// Partial processor state reported by the backend.
///
/// Sections the backend did not send are `None` and leave the mirrored
/// state untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessorUpdate {
    pub registers: Option<BTreeMap<String, String>>,
    pub flags: Option<BTreeMap<String, bool>>,
    pub memory: Option<BTreeMap<String, String>>,
}

impl ProcessorUpdate {
    pub fn is_empty(&self) -> bool {
        self.registers.is_none() && self.flags.is_none() && self.memory.is_none()
    }
}

/// A normalized result plus the processor state to forward, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub result: ExecutionResult,
    pub state: Option<ProcessorUpdate>,
}

impl From<ExecutionResult> for Execution {
    fn from(result: ExecutionResult) -> Self {
        Execution {
            result,
            state: None,
        }
    }
}

/// JavaScript-style truthiness, which is what the backend contract assumes.
fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

fn str_field<'a>(obj: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    obj.get(name).and_then(Value::as_str)
}

fn register_text(name: &str, value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => {
            let n = n.as_u64()?;
            if matches!(name, "SP" | "PC") {
                Some(format!("{:04X}", n))
            } else {
                Some(format!("{:02X}", n))
            }
        }
        other => scalar_to_string(other),
    }
}

fn byte_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => n.as_u64().map(|n| format!("{:02X}", n)),
        other => scalar_to_string(other),
    }
}

fn flag_value(value: &Value) -> bool {
    match value {
        Value::String(s) => matches!(s.as_str(), "1" | "true" | "True"),
        other => truthy(Some(other)),
    }
}

fn parse_registers(value: &Value) -> Option<BTreeMap<String, String>> {
    let obj = value.as_object()?;
    Some(
        obj.iter()
            .filter_map(|(name, v)| register_text(name, v).map(|text| (name.clone(), text)))
            .collect(),
    )
}

fn parse_flags(value: &Value) -> Option<BTreeMap<String, bool>> {
    let obj = value.as_object()?;
    Some(
        obj.iter()
            .map(|(name, v)| (name.clone(), flag_value(v)))
            .collect(),
    )
}

fn memory_entries(items: &[Value]) -> BTreeMap<String, String> {
    items
        .iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            let address = obj.get("address").and_then(scalar_to_string)?;
            let value = obj.get("value").and_then(byte_text)?;
            Some((address, value))
        })
        .collect()
}

/// Memory arrives as a plain map, a list of `{address, value}` entries, or
/// either of those wrapped under `data`.
fn parse_memory(value: &Value) -> Option<BTreeMap<String, String>> {
    match value {
        Value::Array(items) => Some(memory_entries(items)),
        Value::Object(obj) => match obj.get("data") {
            Some(Value::Array(items)) => Some(memory_entries(items)),
            Some(Value::Object(data)) => Some(
                data.iter()
                    .filter_map(|(addr, v)| byte_text(v).map(|text| (addr.clone(), text)))
                    .collect(),
            ),
            _ => Some(
                obj.iter()
                    .filter_map(|(addr, v)| byte_text(v).map(|text| (addr.clone(), text)))
                    .collect(),
            ),
        },
        _ => None,
    }
}

/// Read `registers`/`flags`/`memory` from an object. `None` when none of
/// the sections is present.
pub fn processor_update(value: &Value) -> Option<ProcessorUpdate> {
    let obj = value.as_object()?;
    let section = |name: &str| obj.get(name).filter(|v| truthy(Some(v)));
    let update = ProcessorUpdate {
        registers: section("registers").and_then(parse_registers),
        flags: section("flags").and_then(parse_flags),
        memory: section("memory").and_then(parse_memory),
    };
    if update.is_empty() {
        None
    } else {
        Some(update)
    }
}

/// Locate the processor payload following the documented precedence.
fn state_payload(obj: &Map<String, Value>) -> Option<ProcessorUpdate> {
    if let Some(new_state) = obj.get("newState").filter(|v| v.is_object()) {
        return processor_update(new_state).or_else(|| Some(ProcessorUpdate::default()));
    }
    if let Some(state) = obj.get("state").filter(|v| v.is_object()) {
        return processor_update(state).or_else(|| Some(ProcessorUpdate::default()));
    }
    processor_update(&Value::Object(obj.clone()))
}

/// Error result for a non-JSON or malformed execute response.
pub fn server_error(code: &str) -> ExecutionResult {
    ExecutionResult::error_with_detail(
        ErrorKind::Server,
        Some("Server Error"),
        "Server error occurred during execution",
        Some(ErrorDetail {
            instruction: Some("Unknown".to_string()),
            position: Some("Unknown".to_string()),
            line: Some(code.to_string()),
            ..ErrorDetail::hint(SYNTAX_HINT)
        }),
    )
}

/// Error result for a transport failure (refused connection, timeout).
pub fn network_error(message: impl Into<String>, code: Option<&str>) -> ExecutionResult {
    ExecutionResult::error_with_detail(
        ErrorKind::Network,
        Some("Connection Error"),
        message,
        Some(ErrorDetail {
            line: code.map(str::to_string),
            ..ErrorDetail::hint(CONNECTIVITY_HINT)
        }),
    )
}

fn execution_error(message: Option<&str>, detail: Option<&Value>) -> ExecutionResult {
    ExecutionResult::error_with_detail(
        ErrorKind::Domain,
        Some("Execution Error"),
        message.unwrap_or("Execution failed"),
        detail.and_then(ErrorDetail::from_value),
    )
}

/// Normalize a parsed `POST /api/execute` body.
pub fn normalize_execute(body: &Value, code: &str) -> Execution {
    let Some(obj) = body.as_object() else {
        return server_error(code).into();
    };

    let success = obj.get("success");
    let succeeded = truthy(success);

    if succeeded {
        return match state_payload(obj) {
            Some(state) => Execution {
                result: ExecutionResult::success(EXECUTED_WITH_STATE),
                state: Some(state),
            },
            None => ExecutionResult::success(EXECUTED).into(),
        };
    }

    let explicit_failure = matches!(success, Some(Value::Bool(false)));
    if explicit_failure && truthy(obj.get("error")) {
        let error = &obj["error"];
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| error.as_str());
        return execution_error(message, Some(error)).into();
    }

    if truthy(obj.get("error")) {
        return execution_error(str_field(obj, "message"), obj.get("details")).into();
    }

    match state_payload(obj) {
        Some(state) => Execution {
            result: ExecutionResult::success(EXECUTED_WITH_STATE),
            state: Some(state),
        },
        None => ExecutionResult::success(EXECUTED).into(),
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => scalar_to_string(other).unwrap_or_else(|| other.to_string()),
    }
}

fn row_cells(row: &Value, labels: &[String]) -> Vec<String> {
    match row {
        Value::Array(items) => items.iter().map(cell_text).collect(),
        Value::Object(obj) => {
            let by_label: Vec<String> = labels
                .iter()
                .map(|label| {
                    obj.get(label)
                        .or_else(|| obj.get(&label.to_lowercase()))
                        .map(cell_text)
                        .unwrap_or_default()
                })
                .collect();
            if by_label.iter().all(String::is_empty) {
                obj.values().map(cell_text).collect()
            } else {
                by_label
            }
        }
        other => vec![cell_text(other)],
    }
}

/// Normalize a parsed `POST /api/assemble` body.
pub fn normalize_assemble(body: &Value) -> ExecutionResult {
    let status = body.get("status").and_then(Value::as_str);

    if status == Some("success") {
        if let (Some(labels), Some(rows)) = (
            body.get("label").and_then(Value::as_array),
            body.get("data").and_then(Value::as_array),
        ) {
            let labels: Vec<String> = labels.iter().map(cell_text).collect();
            let rows = rows.iter().map(|row| row_cells(row, &labels)).collect();
            return ExecutionResult::AssemblyTable { labels, rows };
        }
    }

    if status == Some("error") {
        let details = body.get("details");
        let message = details
            .and_then(|d| d.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("Assembly failed");
        return ExecutionResult::error_with_detail(
            ErrorKind::Domain,
            Some("Assembly Error"),
            message,
            details
                .and_then(|d| d.get("details"))
                .and_then(ErrorDetail::from_value),
        );
    }

    ExecutionResult::error_with_detail(
        ErrorKind::Server,
        Some("Assembly Error"),
        "Unable to process the assembly code. Please check your syntax and try again.",
        None,
    )
}

/// Normalize a parsed `GET /api/docs/{instruction}` body.
pub fn normalize_docs(body: &Value, instruction: &str) -> ExecutionResult {
    const TITLE: Option<&str> = Some("Documentation Error");

    if truthy(body.get("error")) {
        return ExecutionResult::error_with_detail(
            ErrorKind::Domain,
            TITLE,
            body.get("message")
                .and_then(Value::as_str)
                .unwrap_or("Documentation request failed"),
            body.get("details").and_then(ErrorDetail::from_value),
        );
    }

    let reported = body
        .get("instruction")
        .and_then(Value::as_str)
        .unwrap_or(instruction);

    match body.get("documentation").and_then(Value::as_str) {
        Some(doc) if !doc.trim().is_empty() => {
            let text = doc.trim();
            if text.starts_with("Invalid Instruction") || text.contains("not found") {
                return ExecutionResult::error_with_detail(
                    ErrorKind::Domain,
                    TITLE,
                    text,
                    Some(ErrorDetail {
                        instruction: Some(reported.to_string()),
                        hint: Some(DOCS_HINT.to_string()),
                        ..Default::default()
                    }),
                );
            }
            ExecutionResult::Docs {
                instruction: reported.to_string(),
                sections: parse_documentation(doc),
            }
        }
        _ => ExecutionResult::error(
            ErrorKind::Domain,
            TITLE,
            format!("Documentation not found for instruction: {}", instruction),
        ),
    }
}

/// Normalize a parsed `GET /api/timing/{instruction}` body.
pub fn normalize_timing(body: &Value, instruction: &str) -> ExecutionResult {
    const TITLE: Option<&str> = Some("Timing Diagram Error");

    if truthy(body.get("error")) {
        return ExecutionResult::error_with_detail(
            ErrorKind::Domain,
            TITLE,
            body.get("message")
                .and_then(Value::as_str)
                .unwrap_or("Timing diagram request failed"),
            body.get("details").and_then(ErrorDetail::from_value),
        );
    }

    // FastAPI reports HTTPException as {"detail": "..."}
    if let Some(detail) = body.get("detail").and_then(Value::as_str) {
        return ExecutionResult::error_with_detail(
            ErrorKind::Domain,
            TITLE,
            detail,
            Some(ErrorDetail {
                instruction: Some(instruction.to_string()),
                hint: Some(TIMING_HINT.to_string()),
                ..Default::default()
            }),
        );
    }

    match body.get("diagram").and_then(Value::as_str) {
        Some(diagram) if !diagram.is_empty() => ExecutionResult::TimingDiagram {
            instruction: body
                .get("instruction")
                .and_then(Value::as_str)
                .unwrap_or(instruction)
                .to_string(),
            image: diagram.to_string(),
        },
        _ => ExecutionResult::error(
            ErrorKind::Domain,
            TITLE,
            format!("Failed to generate timing diagram for: {}", instruction),
        ),
    }
}

/// Normalize a parsed `POST /api/reset` body.
pub fn normalize_reset(body: &Value) -> Execution {
    if truthy(body.get("success")) {
        return Execution {
            result: ExecutionResult::success(RESET_DONE),
            state: body.get("defaultState").and_then(processor_update),
        };
    }
    let reason = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("Reset failed");
    ExecutionResult::error(
        ErrorKind::Domain,
        Some("Reset Error"),
        format!("Failed to reset processor: {}", reason),
    )
    .into()
}
