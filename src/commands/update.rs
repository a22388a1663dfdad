use anyhow::{Result, bail};
use serde::Serialize;
use tracing::info;

use crate::cli::UpdateArgs;
use crate::reconcile::{Correction, CorrectionReport, apply_corrections};
use crate::store::{CommitSummary, Store};
use crate::util::write_json_stdout;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRunReport {
    voter_id: String,
    dry_run: bool,
    report: CorrectionReport,
    commit: Option<CommitSummary>,
}

/// A one-item correction batch keyed by voter ID. Unlike a batch, a missing
/// target fails the command.
pub fn run(args: UpdateArgs) -> Result<()> {
    let correction = correction_from_args(&args);
    let mut store = Store::open(&args.store)?;
    let report = apply_corrections(store.records_mut(), std::slice::from_ref(&correction));

    if let Some(missing) = report.not_found.first() {
        bail!("cannot update {}: {}", missing.key, missing.reason);
    }

    let commit = if args.dry_run || !report.has_changes() {
        info!(voter_id = %args.voter_id, changes = report.field_changes, "store not written");
        None
    } else {
        Some(store.commit("update")?)
    };

    write_json_stdout(&UpdateRunReport {
        voter_id: args.voter_id,
        dry_run: args.dry_run,
        report,
        commit,
    })
}

fn correction_from_args(args: &UpdateArgs) -> Correction {
    let provided = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    Correction {
        voter_id: Some(args.voter_id.trim().to_string()),
        name: provided(&args.name),
        relation: provided(&args.relation),
        house: provided(&args.house),
        age: provided(&args.age),
        gender: provided(&args.gender),
        clear: args.clear.clone(),
        ..Correction::default()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn args() -> UpdateArgs {
        UpdateArgs {
            store: PathBuf::from("voters.json"),
            voter_id: " xua7224868 ".to_string(),
            name: Some("  ".to_string()),
            relation: None,
            house: Some("12".to_string()),
            age: None,
            gender: Some("स्त्री".to_string()),
            clear: vec!["age".to_string()],
            dry_run: true,
        }
    }

    #[test]
    fn blank_flags_mean_no_change() {
        let correction = correction_from_args(&args());
        assert_eq!(correction.voter_id.as_deref(), Some("xua7224868"));
        assert_eq!(correction.name, None);
        assert_eq!(correction.house.as_deref(), Some("12"));
        assert_eq!(correction.clear, vec!["age".to_string()]);
        assert!(correction.serial.is_none());
    }

    #[test]
    fn unknown_voter_id_fails_the_update() {
        let dir = tempfile::tempdir().unwrap();
        let mut update = args();
        update.store = dir.path().join("voters.json");
        assert!(run(update).is_err());
    }
}
