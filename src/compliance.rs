//! Compliance evaluation.
//!
//! Maps a list of findings to a `ComplianceStatus` and decides whether the
//! status changed since the previous evaluation. Alerts are edge-triggered:
//! a repeated status never counts as a change.
//!
//! Policy, first match wins:
//! 1. any helmet-absent finding -> `Critical`
//! 2. any vest-absent finding -> `Warning`
//! 3. otherwise -> `Compliant`
//!
//! An empty finding list yields `Unknown`.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::finding::{Equipment, Finding};
use crate::normalize::NormalizationWarning;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum ComplianceStatus {
    #[default]
    Unknown,
    Compliant,
    Warning,
    Critical,
}

impl ComplianceStatus {
    /// Operator message for this status and the equipment found missing.
    pub fn message(self, missing: &BTreeSet<Equipment>) -> String {
        match self {
            ComplianceStatus::Unknown => "Awaiting detection".to_string(),
            ComplianceStatus::Compliant => {
                if missing.is_empty() {
                    "PPE Compliance OK".to_string()
                } else {
                    format!("PPE Compliance OK (also missing: {})", display_list(missing))
                }
            }
            ComplianceStatus::Warning => {
                if missing.len() > 1 {
                    format!("WARNING: Missing {}", display_list(missing))
                } else {
                    "WARNING: Safety Vest Missing".to_string()
                }
            }
            ComplianceStatus::Critical => {
                if missing.contains(&Equipment::Vest) {
                    "CRITICAL: Helmet & Vest Required!".to_string()
                } else {
                    "CRITICAL: Helmet Required!".to_string()
                }
            }
        }
    }

    /// True for statuses that represent a PPE violation.
    pub fn is_violation(self) -> bool {
        matches!(self, ComplianceStatus::Warning | ComplianceStatus::Critical)
    }
}

fn display_list(missing: &BTreeSet<Equipment>) -> String {
    missing
        .iter()
        .map(|e| e.display_name())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ComplianceEvaluation {
    pub status: ComplianceStatus,
    pub missing: BTreeSet<Equipment>,
    pub changed_from_previous: bool,
    /// Normalizer coercions for the findings that produced this evaluation.
    pub warnings: Vec<NormalizationWarning>,
}

impl ComplianceEvaluation {
    pub fn message(&self) -> String {
        self.status.message(&self.missing)
    }

    /// Display names of missing equipment, in stable order.
    pub fn missing_display(&self) -> Vec<&'static str> {
        self.missing.iter().map(|e| e.display_name()).collect()
    }

    pub(crate) fn with_warnings(mut self, warnings: Vec<NormalizationWarning>) -> Self {
        self.warnings = warnings;
        self
    }
}

pub fn evaluate(findings: &[Finding], previous: ComplianceStatus) -> ComplianceEvaluation {
    let missing: BTreeSet<Equipment> = findings
        .iter()
        .filter_map(|f| f.class().absent_equipment())
        .collect();

    let status = if findings.is_empty() {
        ComplianceStatus::Unknown
    } else if missing.contains(&Equipment::Helmet) {
        ComplianceStatus::Critical
    } else if missing.contains(&Equipment::Vest) {
        ComplianceStatus::Warning
    } else {
        ComplianceStatus::Compliant
    };

    ComplianceEvaluation {
        status,
        missing,
        changed_from_previous: status != previous,
        warnings: Vec::new(),
    }
}

/// Carries the previous status across evaluations and counts transitions.
#[derive(Clone, Debug, Default)]
pub struct AlertTracker {
    last: ComplianceStatus,
    transitions: u64,
}

impl AlertTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate against the last observed status and remember the result.
    pub fn observe(&mut self, findings: &[Finding]) -> ComplianceEvaluation {
        let evaluation = evaluate(findings, self.last);
        self.record(&evaluation);
        evaluation
    }

    /// Record an evaluation computed elsewhere.
    pub fn record(&mut self, evaluation: &ComplianceEvaluation) {
        if evaluation.changed_from_previous {
            self.transitions += 1;
        }
        self.last = evaluation.status;
    }

    pub fn last_status(&self) -> ComplianceStatus {
        self.last
    }

    pub fn transitions(&self) -> u64 {
        self.transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn findings(labels: &[&str]) -> Vec<Finding> {
        labels
            .iter()
            .map(|label| Finding::new(label.to_string(), 0.9, None))
            .collect()
    }

    #[test]
    fn helmet_absence_is_critical() {
        let eval = evaluate(&findings(&["NoHelmet"]), ComplianceStatus::Unknown);
        assert_eq!(eval.status, ComplianceStatus::Critical);
        assert!(eval.missing.contains(&Equipment::Helmet));
        assert!(eval.changed_from_previous);
    }

    #[test]
    fn helmet_outranks_vest() {
        let eval = evaluate(&findings(&["NoVest", "NoHelmet"]), ComplianceStatus::Unknown);
        assert_eq!(eval.status, ComplianceStatus::Critical);
        assert_eq!(eval.missing.len(), 2);
        assert_eq!(eval.message(), "CRITICAL: Helmet & Vest Required!");
    }

    #[test]
    fn vest_absence_is_warning() {
        let eval = evaluate(&findings(&["NoVest"]), ComplianceStatus::Unknown);
        assert_eq!(eval.status, ComplianceStatus::Warning);
        assert_eq!(eval.message(), "WARNING: Safety Vest Missing");
    }

    #[test]
    fn empty_is_unknown_and_not_a_change_from_unknown() {
        let eval = evaluate(&[], ComplianceStatus::Unknown);
        assert_eq!(eval.status, ComplianceStatus::Unknown);
        assert!(!eval.changed_from_previous);
        assert!(eval.missing.is_empty());
    }

    #[test]
    fn all_clear_and_presence_are_compliant() {
        let eval = evaluate(&findings(&["GoodToGo"]), ComplianceStatus::Unknown);
        assert_eq!(eval.status, ComplianceStatus::Compliant);
        let eval = evaluate(&findings(&["Helmet", "Vest", "Person"]), ComplianceStatus::Compliant);
        assert_eq!(eval.status, ComplianceStatus::Compliant);
        assert!(!eval.changed_from_previous);
    }

    #[test]
    fn other_tracked_equipment_is_reported_missing_without_escalating() {
        let eval = evaluate(&findings(&["NoGloves", "Helmet"]), ComplianceStatus::Unknown);
        assert_eq!(eval.status, ComplianceStatus::Compliant);
        assert_eq!(eval.missing_display(), vec!["Safety Gloves"]);
    }

    #[test]
    fn tracker_counts_edges_only() {
        let mut tracker = AlertTracker::new();
        for _ in 0..3 {
            tracker.observe(&findings(&["NoHelmet"]));
        }
        assert_eq!(tracker.transitions(), 1);

        let mut tracker = AlertTracker::new();
        tracker.observe(&findings(&["NoHelmet"]));
        tracker.observe(&findings(&["GoodToGo"]));
        tracker.observe(&findings(&["GoodToGo"]));
        assert_eq!(tracker.transitions(), 2);
        assert_eq!(tracker.last_status(), ComplianceStatus::Compliant);
    }
}
