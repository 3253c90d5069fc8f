use crate::control::{InspectionOutcome, RepositoryReport};
use crate::orchestrator::RunSummary;
use crate::verify::{Baseline, Classification, Finding};

/// Length of archive ids as shown; borg ids are 64 hex characters.
const SHORT_ID_LEN: usize = 16;

pub fn print_summary(summary: &RunSummary, show_all: bool) {
    for line in format_summary(summary, show_all) {
        println!("{}", line);
    }
}

fn format_summary(summary: &RunSummary, show_all: bool) -> Vec<String> {
    let mut lines = Vec::new();
    for report in &summary.reports {
        lines.extend(format_report(report, show_all));
    }
    for name in &summary.vanished {
        lines.push(format!("!  {}: REPOSITORY_MISSING", name));
    }
    lines
}

fn format_report(report: &RepositoryReport, show_all: bool) -> Vec<String> {
    let name = report.name();
    let verdict = match &report.inspection.outcome {
        InspectionOutcome::Unreadable { reason } => {
            return vec![format!("!  {}: UNREADABLE ({})", name, reason)];
        }
        InspectionOutcome::Verified { verdict, .. } => verdict,
    };

    let mut lines = Vec::new();
    match &verdict.baseline {
        Baseline::Ledger => {}
        Baseline::FirstSighting { allowed: true } => {
            lines.push(format!("+  {}: FIRST_SIGHTING (no ledger yet)", name));
        }
        Baseline::FirstSighting { allowed: false } => {
            lines.push(format!(
                "!  {}: FIRST_SIGHTING (no ledger yet, use --force to create it)",
                name
            ));
        }
        Baseline::LedgerMissing => {
            lines.push(format!(
                "!  {}: LEDGER_MISSING (repository was baselined before)",
                name
            ));
        }
        Baseline::LedgerCorrupt(reason) => {
            lines.push(format!("!  {}: LEDGER_CORRUPT ({})", name, reason));
        }
    }

    for finding in &verdict.findings {
        if finding.classification == Classification::Match && !show_all {
            continue;
        }
        lines.push(format!(
            "{:<2} {}::{}",
            status_code(finding.classification),
            name,
            finding.name
        ));
        lines.extend(format_ids(finding));
    }

    lines
}

fn status_code(classification: Classification) -> &'static str {
    match classification {
        Classification::Match => ".",
        Classification::IdMismatch => "M",
        Classification::MissingArchive => "D",
        Classification::NewArchive => "A",
    }
}

fn format_ids(finding: &Finding) -> Vec<String> {
    match (finding.classification, &finding.ledger_id, &finding.live_id) {
        (Classification::IdMismatch, Some(old), Some(new)) => {
            vec![format!("   id: {} -> {}", short_id(old), short_id(new))]
        }
        (Classification::MissingArchive, Some(old), _) => {
            vec![format!("   was: {}", short_id(old))]
        }
        _ => Vec::new(),
    }
}

fn short_id(id: &str) -> &str {
    match id.char_indices().nth(SHORT_ID_LEN) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}
