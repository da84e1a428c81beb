//! Per-stage run reports
//!
//! Partial completion is a normal outcome: a report with failures still means
//! the stage ran to its end and can simply be re-invoked.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::models::UpsertOutcome;

/// Counters for one entity kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl EntityCounts {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created => self.created += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }

    pub fn merge(&mut self, other: &EntityCounts) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Report returned by every manager's `start()`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    pub entities: BTreeMap<String, EntityCounts>,
    /// Short human-readable reasons for skipped/failed items (capped)
    pub notes: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Keep only the first few notes; logs carry the full detail.
pub const MAX_REPORT_NOTES: usize = 20;

impl StageReport {
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            started_at: Utc::now(),
            ..Default::default()
        }
    }

    /// Stamp the end of the stage
    pub fn finished(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn elapsed_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }

    pub fn counts(&self, entity: &str) -> EntityCounts {
        self.entities.get(entity).copied().unwrap_or_default()
    }

    pub fn entry(&mut self, entity: &str) -> &mut EntityCounts {
        self.entities.entry(entity.to_string()).or_default()
    }

    pub fn record(&mut self, entity: &str, outcome: UpsertOutcome) {
        self.entry(entity).record(outcome);
    }

    pub fn skip(&mut self, entity: &str, note: impl Into<String>) {
        self.entry(entity).skipped += 1;
        self.note(note);
    }

    pub fn fail(&mut self, entity: &str, note: impl Into<String>) {
        self.entry(entity).failed += 1;
        self.note(note);
    }

    pub fn note(&mut self, note: impl Into<String>) {
        if self.notes.len() < MAX_REPORT_NOTES {
            self.notes.push(note.into());
        }
    }

    pub fn merge(&mut self, other: StageReport) {
        for (entity, counts) in &other.entities {
            self.entry(entity).merge(counts);
        }
        for note in other.notes {
            self.note(note);
        }
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.stage)?;
        for (entity, c) in &self.entities {
            write!(
                f,
                " {}: +{} ~{} ={} skipped {} failed {};",
                entity, c.created, c.updated, c.unchanged, c.skipped, c.failed
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_merge() {
        let mut a = StageReport::new("uniprot");
        a.record("protein", UpsertOutcome::Created);
        a.record("protein", UpsertOutcome::Unchanged);
        a.fail("accession", "Q00000: not found");

        let mut b = StageReport::new("uniprot");
        b.record("protein", UpsertOutcome::Updated);
        b.skip("accession", "bad code");

        a.merge(b);
        let protein = a.counts("protein");
        assert_eq!((protein.created, protein.updated, protein.unchanged), (1, 1, 1));
        assert_eq!(a.counts("accession").failed, 1);
        assert_eq!(a.counts("accession").skipped, 1);
        assert_eq!(a.notes.len(), 2);
        assert_eq!(a.counts("go_term"), EntityCounts::default());
    }

    #[test]
    fn test_notes_are_capped() {
        let mut report = StageReport::new("pdb");
        for i in 0..(MAX_REPORT_NOTES + 5) {
            report.skip("structure", format!("note {}", i));
        }
        assert_eq!(report.notes.len(), MAX_REPORT_NOTES);
        assert_eq!(report.counts("structure").skipped as usize, MAX_REPORT_NOTES + 5);
    }

    #[test]
    fn test_finished_stamps_elapsed_time() {
        let report = StageReport::new("accessions");
        assert_eq!(report.elapsed_ms(), None);
        let report = report.finished();
        assert!(report.elapsed_ms().unwrap() >= 0);
    }
}
