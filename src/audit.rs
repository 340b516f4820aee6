use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One computation step, recorded append-only. Results themselves are
/// never mutated to carry history; the audit log is the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// RFC 3339 timestamp of the step
    pub timestamp: String,
    /// Which engine performed the step (reconcile, estimate, strategy)
    pub engine: String,
    /// The operation within the engine
    pub operation: String,
    pub inputs: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
    pub notes: String,
}

impl AuditEntry {
    pub fn new(engine: &str, operation: &str) -> Self {
        AuditEntry {
            timestamp: Local::now().to_rfc3339(),
            engine: engine.to_string(),
            operation: operation.to_string(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            notes: String::new(),
        }
    }

    pub fn input(mut self, key: &str, value: impl ToString) -> Self {
        self.inputs.insert(key.to_string(), value.to_string());
        self
    }

    pub fn output(mut self, key: &str, value: impl ToString) -> Self {
        self.outputs.insert(key.to_string(), value.to_string());
        self
    }

    pub fn note(mut self, note: &str) -> Self {
        if !self.notes.is_empty() {
            self.notes.push_str("; ");
        }
        self.notes.push_str(note);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_accumulates() {
        let entry = AuditEntry::new("reconcile", "match_sale")
            .input("sale_id", "sale-1")
            .input("shares", "100")
            .output("allocations", "2")
            .note("partial fill")
            .note("second note");

        assert_eq!(entry.engine, "reconcile");
        assert_eq!(entry.inputs.len(), 2);
        assert_eq!(entry.outputs["allocations"], "2");
        assert_eq!(entry.notes, "partial fill; second note");
    }
}
