//! Run outcome, per-stage counters and collected issues

use std::fmt;

use crate::error::OnionooError;
use crate::store::StoreStats;
use crate::time::format_millis;

/// Stages of one run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Correlate,
    PersistNodes,
    History,
    Documents,
    Prune,
    Index,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Correlate,
        Stage::PersistNodes,
        Stage::History,
        Stage::Documents,
        Stage::Prune,
        Stage::Index,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Correlate => "correlate",
            Stage::PersistNodes => "persist_nodes",
            Stage::History => "history",
            Stage::Documents => "documents",
            Stage::Prune => "prune",
            Stage::Index => "index",
        }
    }

    fn position(&self) -> usize {
        match self {
            Stage::Correlate => 0,
            Stage::PersistNodes => 1,
            Stage::History => 2,
            Stage::Documents => 3,
            Stage::Prune => 4,
            Stage::Index => 5,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Item counters of one stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageStats {
    pub processed: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Class of a recorded problem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    Input,
    Storage,
    Invariant,
}

impl IssueKind {
    /// Class of an error recovered from a single item
    pub fn of(err: &OnionooError) -> Self {
        if err.is_input() {
            IssueKind::Input
        } else if err.is_invariant() {
            IssueKind::Invariant
        } else {
            IssueKind::Storage
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueKind::Input => f.write_str("input"),
            IssueKind::Storage => f.write_str("storage"),
            IssueKind::Invariant => f.write_str("invariant"),
        }
    }
}

/// A per-item problem that was recovered from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub stage: Stage,
    pub kind: IssueKind,
    pub message: String,
}

/// Statistics of a completed run
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub started_millis: i64,
    pub finished_millis: i64,
    stages: [StageStats; 6],
    pub issues: Vec<Issue>,
    pub store: StoreStats,
}

impl RunReport {
    pub fn new(started_millis: i64) -> Self {
        Self {
            started_millis,
            finished_millis: started_millis,
            stages: [StageStats::default(); 6],
            issues: Vec::new(),
            store: StoreStats::default(),
        }
    }

    pub fn stage(&self, stage: Stage) -> &StageStats {
        &self.stages[stage.position()]
    }

    pub fn stage_mut(&mut self, stage: Stage) -> &mut StageStats {
        &mut self.stages[stage.position()]
    }

    /// Record an issue and count it as a failed item of `stage`
    pub fn fail(&mut self, stage: Stage, kind: IssueKind, message: impl Into<String>) {
        self.stage_mut(stage).failed += 1;
        self.note(stage, kind, message);
    }

    /// Record an issue without touching the counters
    pub fn note(&mut self, stage: Stage, kind: IssueKind, message: impl Into<String>) {
        self.issues.push(Issue {
            stage,
            kind,
            message: message.into(),
        });
    }

    pub fn issues_of(&self, kind: IssueKind) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }

    /// Human-readable multi-line summary
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Run started {} and finished {}\n",
            format_millis(self.started_millis),
            format_millis(self.finished_millis)
        );
        for stage in Stage::ALL {
            let s = self.stage(stage);
            out.push_str(&format!(
                "  {:<14} {} processed, {} updated, {} skipped, {} failed\n",
                stage.name(),
                s.processed,
                s.updated,
                s.skipped,
                s.failed
            ));
        }
        out.push_str(&format!("  store: {}\n", self.store.summary()));
        if !self.issues.is_empty() {
            out.push_str(&format!("  {} issues:\n", self.issues.len()));
            for issue in &self.issues {
                out.push_str(&format!(
                    "    [{}/{}] {}\n",
                    issue.stage, issue.kind, issue.message
                ));
            }
        }
        out
    }
}

/// What one invocation of the pipeline did
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// All stages ran; per-item problems are listed in the report
    Completed(RunReport),
    /// Another run holds the lock; nothing was done
    Skipped,
    /// The run could not begin; published state is untouched
    Failed(String),
}

impl RunOutcome {
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            RunOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_counts_and_records() {
        let mut report = RunReport::new(0);
        report.fail(Stage::History, IssueKind::Input, "non-finite sample");
        report.note(Stage::History, IssueKind::Invariant, "overlap");
        assert_eq!(report.stage(Stage::History).failed, 1);
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.issues_of(IssueKind::Invariant).count(), 1);
    }

    #[test]
    fn test_issue_kind_follows_error_class() {
        let input = OnionooError::Input("bad".into()).with_context("entry 2");
        assert_eq!(IssueKind::of(&input), IssueKind::Input);
        let broken = OnionooError::Invariant("overlap".into());
        assert_eq!(IssueKind::of(&broken), IssueKind::Invariant);
        let disk = OnionooError::storage("/tmp/out", "disk full");
        assert_eq!(IssueKind::of(&disk), IssueKind::Storage);
    }

    #[test]
    fn test_summary_lists_every_stage() {
        let mut report = RunReport::new(0);
        report.stage_mut(Stage::Prune).updated = 3;
        report.fail(Stage::Documents, IssueKind::Storage, "disk full");
        let text = report.summary();
        for stage in Stage::ALL {
            assert!(text.contains(stage.name()));
        }
        assert!(text.contains("[documents/storage] disk full"));
        assert!(text.starts_with("Run started 1970-01-01 00:00:00"));
    }
}
