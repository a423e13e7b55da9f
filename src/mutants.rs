use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one discovered mutation. Unique within a single discovery pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationId(pub u64);

impl MutationId {
    /// Parent of every mutation found directly in the unmutated tree.
    pub const ROOT: MutationId = MutationId(0);

    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub id: MutationId,
    /// The mutation whose replaced range this one was discovered inside.
    pub parent_id: MutationId,
    pub line: usize,
    pub column: usize,
    pub start_byte: usize,
    pub end_byte: usize,
    /// Code of the operator that produced this mutation.
    pub operator: String,
    pub original: String,
    pub replacement: String,
    pub context_before: Vec<String>,
    pub context_after: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutantStatus {
    Survived,
    Killed,
    Errored,
    TimedOut,
}

impl MutantStatus {
    /// Timed-out mutants count as detected.
    pub fn is_detected(self) -> bool {
        matches!(self, MutantStatus::Killed | MutantStatus::TimedOut)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutantResult {
    /// Mutated file, relative to the project root.
    pub file: String,
    pub mutation: Mutation,
    pub status: MutantStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub diff: String,
}
