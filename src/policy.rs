//! Options that shape one diff run

use crate::safety::rules::SafetyTable;
use crate::safety::SafetyMode;

/// Diff and filter options for a single run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffPolicy {
    /// Emit GRANT/REVOKE statements for table, view and sequence privileges
    pub include_privileges: bool,
    pub safety_mode: SafetyMode,
    /// Swap "from" and "to" before diffing
    pub reverse_direction: bool,
    /// Confirmation for `SafetyMode::AllowUnsafeExplicit`
    pub allow_unsafe: bool,
    pub safety_table: SafetyTable,
}

impl DiffPolicy {
    pub fn with_privileges(mut self, include: bool) -> Self {
        self.include_privileges = include;
        self
    }

    pub fn with_safety_mode(mut self, mode: SafetyMode) -> Self {
        self.safety_mode = mode;
        self
    }

    pub fn reversed(mut self, reverse: bool) -> Self {
        self.reverse_direction = reverse;
        self
    }

    pub fn allowing_unsafe(mut self, allow: bool) -> Self {
        self.allow_unsafe = allow;
        self
    }
}
