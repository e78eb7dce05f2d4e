//! Local mirror of the simulated processor.
//!
//! Updated only through [`ProcessorState::dispatch`]; readers go through the
//! selector methods.

use std::collections::BTreeMap;

use sim_client::{ProcessorSnapshot, ProcessorUpdate};

/// Mutations accepted by the processor store.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorAction {
    /// Replace each section present in the update. Absent sections keep
    /// their prior values.
    Apply(ProcessorUpdate),
    /// Restore power-on defaults.
    Reset,
    UpdateMemory { address: String, value: String },
    ClearMemory,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessorState {
    snapshot: ProcessorSnapshot,
}

impl ProcessorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch(&mut self, action: ProcessorAction) {
        match action {
            ProcessorAction::Apply(update) => {
                if let Some(registers) = update.registers {
                    self.snapshot.registers = registers;
                }
                if let Some(flags) = update.flags {
                    self.snapshot.flags = flags;
                }
                if let Some(memory) = update.memory {
                    self.snapshot.memory = memory;
                }
            }
            ProcessorAction::Reset => self.snapshot = ProcessorSnapshot::default(),
            ProcessorAction::UpdateMemory { address, value } => {
                self.snapshot.memory.insert(address, value);
            }
            ProcessorAction::ClearMemory => self.snapshot.memory.clear(),
        }
    }

    pub fn snapshot(&self) -> &ProcessorSnapshot {
        &self.snapshot
    }

    pub fn registers(&self) -> &BTreeMap<String, String> {
        &self.snapshot.registers
    }

    pub fn register(&self, name: &str) -> Option<&str> {
        self.snapshot.registers.get(name).map(String::as_str)
    }

    pub fn flags(&self) -> &BTreeMap<String, bool> {
        &self.snapshot.flags
    }

    pub fn memory(&self) -> &BTreeMap<String, String> {
        &self.snapshot.memory
    }

    /// Names of flags that are currently set.
    pub fn active_flags(&self) -> Vec<&str> {
        self.snapshot
            .flags
            .iter()
            .filter(|(_, set)| **set)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn memory_size(&self) -> usize {
        self.snapshot.memory.len()
    }
}
