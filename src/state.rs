use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::mutants::{MutantResult, MutantStatus};

pub const STATE_FILE_NAME: &str = ".jsmutator-state.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    /// The unmutated tests failed; no mutant was executed.
    BaselineFailed,
}

/// A source file that was not mutated, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedUnit {
    pub file: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub score: f64,
    pub total: usize,
    pub killed: usize,
    pub survived: usize,
    pub timed_out: usize,
    pub errored: usize,
    pub duration_ms: u64,
    /// One entry per mutant, in discovery order.
    pub results: Vec<MutantResult>,
    #[serde(default)]
    pub skipped: Vec<SkippedUnit>,
    /// Combined output of a failed baseline.
    #[serde(default)]
    pub baseline_output: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurvivedMutant {
    pub ref_id: String,
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub operator: String,
    pub original: String,
    pub replacement: String,
    pub diff: String,
    pub context_before: Vec<String>,
    pub context_after: Vec<String>,
}

/// Detected over testable mutants. Errored mutants are not testable.
pub fn mutation_score(killed: usize, timed_out: usize, total: usize, errored: usize) -> f64 {
    let testable = total.saturating_sub(errored);
    if testable == 0 {
        1.0
    } else {
        (killed + timed_out) as f64 / testable as f64
    }
}

impl RunReport {
    pub fn from_results(results: Vec<MutantResult>, skipped: Vec<SkippedUnit>, duration_ms: u64) -> Self {
        let count = |status: MutantStatus| results.iter().filter(|r| r.status == status).count();
        let killed = count(MutantStatus::Killed);
        let survived = count(MutantStatus::Survived);
        let timed_out = count(MutantStatus::TimedOut);
        let errored = count(MutantStatus::Errored);
        let total = results.len();
        Self {
            status: RunStatus::Success,
            score: mutation_score(killed, timed_out, total, errored),
            total,
            killed,
            survived,
            timed_out,
            errored,
            duration_ms,
            results,
            skipped,
            baseline_output: None,
        }
    }

    pub fn baseline_failed(output: String, skipped: Vec<SkippedUnit>, duration_ms: u64) -> Self {
        Self {
            status: RunStatus::BaselineFailed,
            score: 0.0,
            total: 0,
            killed: 0,
            survived: 0,
            timed_out: 0,
            errored: 0,
            duration_ms,
            results: Vec::new(),
            skipped,
            baseline_output: Some(output),
        }
    }

    /// Survivors numbered `m1`, `m2`, ... in discovery order.
    pub fn survivors(&self) -> Vec<SurvivedMutant> {
        self.results
            .iter()
            .filter(|r| r.status == MutantStatus::Survived)
            .enumerate()
            .map(|(i, r)| SurvivedMutant {
                ref_id: format!("m{}", i + 1),
                file: r.file.clone(),
                line: r.mutation.line,
                column: r.mutation.column,
                operator: r.mutation.operator.clone(),
                original: r.mutation.original.clone(),
                replacement: r.mutation.replacement.clone(),
                diff: r.diff.clone(),
                context_before: r.mutation.context_before.clone(),
                context_after: r.mutation.context_after.clone(),
            })
            .collect()
    }

    /// Look up a survivor by `m3` or `@m3`.
    pub fn find_survivor(&self, reference: &str) -> Option<SurvivedMutant> {
        let wanted = reference.trim_start_matches('@');
        self.survivors().into_iter().find(|m| m.ref_id == wanted)
    }
}

pub fn state_path(project_root: &Path) -> PathBuf {
    project_root.join(STATE_FILE_NAME)
}

pub fn save_last_run(report: &RunReport, project_root: &Path) {
    save_to_path(report, &state_path(project_root));
}

pub fn load_last_run(project_root: &Path) -> Option<RunReport> {
    load_from_path(&state_path(project_root))
}

pub fn save_to_path(report: &RunReport, path: &Path) {
    match serde_json::to_string(report) {
        Ok(json) => {
            if let Err(err) = std::fs::write(path, json) {
                warn!(path = %path.display(), error = %err, "could not save run state");
            }
        }
        Err(err) => warn!(error = %err, "could not serialize run state"),
    }
}

pub fn load_from_path(path: &Path) -> Option<RunReport> {
    let data = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}
