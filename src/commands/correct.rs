use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::info;

use crate::cli::CorrectArgs;
use crate::reconcile::correction::{ChangeEntry, NotFound};
use crate::reconcile::{CorrectionReport, apply_corrections, parse_batch};
use crate::store::{CommitSummary, Store};
use crate::util::{now_utc_string, read_text, write_json_stdout};

/// The file written next to each correcting Store write.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChangeLog<'a> {
    generated_at: String,
    batch: &'a Path,
    store: &'a Path,
    records_changed: usize,
    field_changes: usize,
    not_found: &'a [NotFound],
    changes: &'a [ChangeEntry],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CorrectRunReport {
    store: PathBuf,
    batch: PathBuf,
    dry_run: bool,
    change_log: Option<PathBuf>,
    report: CorrectionReport,
    commit: Option<CommitSummary>,
}

pub fn run(args: CorrectArgs) -> Result<()> {
    if !args.batch.exists() {
        bail!("correction batch not found: {}", args.batch.display());
    }
    let batch = parse_batch(&read_text(&args.batch)?)
        .with_context(|| format!("rejected correction batch {}", args.batch.display()))?;

    let mut store = Store::open(&args.store)?;
    let report = apply_corrections(store.records_mut(), &batch);

    let change_log_path = args
        .change_log
        .clone()
        .unwrap_or_else(|| default_change_log_path(&args.batch));
    let mut written_log = None;
    let mut commit = None;
    if args.dry_run {
        info!("dry run; store not written");
    } else if !report.has_changes() {
        info!("no field changed; store not written");
    } else {
        let log = ChangeLog {
            generated_at: now_utc_string(),
            batch: &args.batch,
            store: &args.store,
            records_changed: report.records_changed,
            field_changes: report.field_changes,
            not_found: &report.not_found,
            changes: &report.change_log,
        };
        commit = Some(store.commit_with_log("correct", Some((change_log_path.as_path(), &log)))?);
        written_log = Some(change_log_path);
    }

    write_json_stdout(&CorrectRunReport {
        store: args.store,
        batch: args.batch,
        dry_run: args.dry_run,
        change_log: written_log,
        report,
        commit,
    })
}

/// `fixes.json` logs to `fixes.changes.json`.
fn default_change_log_path(batch: &Path) -> PathBuf {
    let stem = batch
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "corrections".to_string());
    batch.with_file_name(format!("{stem}.changes.json"))
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::model::{Age, VoterRecord};
    use crate::store::BACKUP_MARKER;
    use crate::util::write_json_pretty;

    #[test]
    fn change_log_defaults_next_to_the_batch() {
        assert_eq!(
            default_change_log_path(Path::new("fixes/ward7.json")),
            PathBuf::from("fixes/ward7.changes.json")
        );
    }

    #[test]
    fn correcting_writes_backup_change_log_and_store() {
        let dir = tempdir().unwrap();
        let store_path = dir.path().join("voters.json");
        let batch_path = dir.path().join("fixes.json");

        let mut record = VoterRecord {
            voter_id: Some("XUA7224868".to_string()),
            serial: Some(5),
            ward: Some("7".to_string()),
            booth: Some("1".to_string()),
            name: Some("राम शिंदे".to_string()),
            age: Age::new(29),
            ..VoterRecord::default()
        };
        record.refresh_quality();
        write_json_pretty(&store_path, &vec![record]).unwrap();
        std::fs::write(&batch_path, r#"[{"serial": 5, "age": "31", "name": ""}, {"serial": 9, "age": "40"}]"#)
            .unwrap();

        run(CorrectArgs {
            store: store_path.clone(),
            batch: batch_path.clone(),
            change_log: None,
            dry_run: false,
        })
        .unwrap();

        let store = Store::open(&store_path).unwrap();
        assert_eq!(store.records()[0].age.map(Age::get), Some(31));
        assert_eq!(store.records()[0].name.as_deref(), Some("राम शिंदे"));
        assert_eq!(store.backups().unwrap().len(), 1);
        assert!(
            store.backups().unwrap()[0]
                .to_string_lossy()
                .contains(&format!("{BACKUP_MARKER}correct-"))
        );

        let log: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("fixes.changes.json")).unwrap())
                .unwrap();
        assert_eq!(log["changes"][0]["changes"][0], "Age: \"29\" → \"31\"");
        assert_eq!(log["notFound"][0]["key"], "serial 9");
    }
}
