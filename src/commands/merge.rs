use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::MergeArgs;
use crate::model::{SourceKind, VoterRecord};
use crate::reconcile::{MergeReport, SourceList, merge_sources};
use crate::store::{CommitSummary, Store};
use crate::util::{now_utc_string, read_text, write_json_pretty, write_json_stdout};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MergeRunReport {
    generated_at: String,
    store: PathBuf,
    dry_run: bool,
    mode: &'static str,
    booths: Vec<String>,
    replaced: usize,
    inserted: usize,
    removed: usize,
    anukramank_assigned: usize,
    merge: MergeReport,
    validation_warnings: Vec<String>,
    commit: Option<CommitSummary>,
}

pub fn run(args: MergeArgs) -> Result<()> {
    let mut store = Store::open(&args.store)?;

    let mut lists = args
        .sources
        .iter()
        .map(|spec| {
            let records = load_candidates(&spec.path.display().to_string(), &read_text(&spec.path)?, spec.kind)?;
            info!(path = %spec.path.display(), source = %spec.kind, records = records.len(), "loaded candidate list");
            Ok(SourceList::new(spec.kind, spec.path.display().to_string(), records))
        })
        .collect::<Result<Vec<SourceList>>>()?;

    let booths = lists
        .iter()
        .flat_map(|list| list.records.iter())
        .filter_map(VoterRecord::booth_key)
        .collect::<BTreeSet<(String, String)>>();

    if !args.replace_booth {
        let prior = booths
            .iter()
            .flat_map(|(ward, booth)| store.booth_records(ward, booth))
            .collect::<Vec<VoterRecord>>();
        info!(records = prior.len(), booths = booths.len(), "including prior store records");
        if !prior.is_empty() {
            lists.push(SourceList::new(
                SourceKind::PriorStore,
                args.store.display().to_string(),
                prior,
            ));
        }
    }

    let outcome = merge_sources(lists);
    let mut report = MergeRunReport {
        generated_at: now_utc_string(),
        store: args.store.clone(),
        dry_run: args.dry_run,
        mode: if args.replace_booth { "replace-booth" } else { "upsert" },
        booths: booths
            .iter()
            .map(|(ward, booth)| format!("W{ward}F{booth}"))
            .collect(),
        replaced: 0,
        inserted: 0,
        removed: 0,
        anukramank_assigned: 0,
        merge: outcome.report,
        validation_warnings: Vec::new(),
        commit: None,
    };

    if args.replace_booth {
        let (mut by_booth, unplaced) = split_by_booth(outcome.records);
        for (ward, booth) in &booths {
            let incoming = by_booth.remove(&(ward.clone(), booth.clone())).unwrap_or_default();
            report.inserted += incoming.len();
            report.removed += store.replace_booth(ward, booth, incoming);
        }
        if !unplaced.is_empty() {
            warn!(records = unplaced.len(), "records without ward/booth are upserted instead");
            let (replaced, inserted) = store.upsert(unplaced);
            report.replaced += replaced;
            report.inserted += inserted;
        }
    } else {
        let (replaced, inserted) = store.upsert(outcome.records);
        report.replaced = replaced;
        report.inserted = inserted;
    }
    report.anukramank_assigned = store.assign_anukramank();

    let validation = store.validate();
    report.validation_warnings = validation.warnings.clone();
    if args.dry_run {
        if !validation.is_ok() {
            warn!(errors = %validation.errors.join("; "), "merged store would be rejected");
        }
        info!("dry run; store not written");
    } else {
        report.commit = Some(store.commit("merge")?);
    }

    info!(
        sources = args.sources.len(),
        input_records = report.merge.input_records,
        output_records = report.merge.output_records,
        mismatches = report.merge.mismatches.len(),
        serial_conflicts = report.merge.serial_conflicts.len(),
        replaced = report.replaced,
        inserted = report.inserted,
        removed = report.removed,
        "merge completed"
    );

    match &args.report_path {
        Some(path) => {
            write_json_pretty(path, &report)?;
            info!(path = %path.display(), "wrote merge report");
            Ok(())
        }
        None => write_json_stdout(&report),
    }
}

/// Reads a candidate list, recomputing derived fields and tagging records
/// that carry no source with the list's kind.
fn load_candidates(label: &str, text: &str, kind: SourceKind) -> Result<Vec<VoterRecord>> {
    let mut records: Vec<VoterRecord> = serde_json::from_str(text)
        .with_context(|| format!("candidate list {label} is not a JSON array of voter records"))?;
    for record in &mut records {
        if record.source.is_none() {
            record.source = Some(kind);
        }
        record.refresh_quality();
    }
    Ok(records)
}

type BoothGroups = BTreeMap<(String, String), Vec<VoterRecord>>;

fn split_by_booth(records: Vec<VoterRecord>) -> (BoothGroups, Vec<VoterRecord>) {
    let mut groups = BoothGroups::new();
    let mut unplaced = Vec::new();
    for record in records {
        match record.booth_key() {
            Some(key) => groups.entry(key).or_default().push(record),
            None => unplaced.push(record),
        }
    }
    (groups, unplaced)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::cli::SourceSpec;
    use crate::model::Age;
    use crate::reconcile::{apply_corrections, parse_batch};
    use crate::util::write_json_pretty;

    fn merge_into(store: &std::path::Path, kind: SourceKind, candidates: &std::path::Path) -> serde_json::Value {
        let report_path = candidates.with_extension("report.json");
        run(MergeArgs {
            store: store.to_path_buf(),
            sources: vec![SourceSpec {
                kind,
                path: candidates.to_path_buf(),
            }],
            replace_booth: false,
            report_path: Some(report_path.clone()),
            dry_run: false,
        })
        .unwrap();
        serde_json::from_str(&std::fs::read_to_string(report_path).unwrap()).unwrap()
    }

    #[test]
    fn re_merging_an_extraction_pass_keeps_corrections_and_valid_ids() {
        let dir = tempdir().unwrap();
        let store_path = dir.path().join("voters.json");
        let mut stored = VoterRecord {
            voter_id: Some("XUA7224868".to_string()),
            serial: Some(5),
            ward: Some("7".to_string()),
            booth: Some("1".to_string()),
            name: Some("गजानन अनासपुरे".to_string()),
            ..VoterRecord::default()
        };
        stored.refresh_quality();
        write_json_pretty(&store_path, &vec![stored]).unwrap();

        let mut store = Store::open(&store_path).unwrap();
        let batch = parse_batch(r#"[{"serial": 5, "name": "गजानन यशवंत अनासपुरे"}]"#).unwrap();
        assert_eq!(apply_corrections(store.records_mut(), &batch).field_changes, 1);
        store.commit("correct").unwrap();

        let ocr_path = dir.path().join("ocr.json");
        std::fs::write(
            &ocr_path,
            r#"[{"voterId": "XUA7224868", "serial": 5, "ward": "7", "booth": "1", "name": "गजानन अनासपुरे", "age": "82"}]"#,
        )
        .unwrap();
        let report = merge_into(&store_path, SourceKind::Ocr, &ocr_path);
        assert_eq!(report["merge"]["mismatches"][0]["field"], "name");

        let store = Store::open(&store_path).unwrap();
        assert_eq!(store.records().len(), 1);
        let record = &store.records()[0];
        assert_eq!(record.name.as_deref(), Some("गजानन यशवंत अनासपुरे"));
        assert_eq!(record.age.map(Age::get), Some(82));
        assert_eq!(record.anukramank, Some(1));

        let garbled_path = dir.path().join("garbled.json");
        std::fs::write(
            &garbled_path,
            r#"[{"voterId": "XUA72248", "serial": 5, "ward": "7", "booth": "1", "name": "गजानन"}]"#,
        )
        .unwrap();
        merge_into(&store_path, SourceKind::Ocr, &garbled_path);

        let store = Store::open(&store_path).unwrap();
        assert_eq!(store.records().len(), 1);
        let record = &store.records()[0];
        assert_eq!(record.voter_id.as_deref(), Some("XUA7224868"));
        assert_eq!(record.name.as_deref(), Some("गजानन यशवंत अनासपुरे"));
        assert_eq!(record.anukramank, Some(1));
        assert!(!record.ocr_failed);
        assert_eq!(store.backups().unwrap().len(), 3);
    }

    #[test]
    fn candidate_lists_are_tagged_with_their_source() {
        let text = r#"[
            {"voterId": "XUA7224868", "serialNumber": "5", "ward": "7", "booth": "1", "name": "राम", "age": 82},
            {"voterId": "XUA7224869", "serial": 6, "ward": "7", "booth": "1", "source": "pdf-text"}
        ]"#;
        let records = load_candidates("ocr.json", text, SourceKind::Ocr).unwrap();
        assert_eq!(records[0].source, Some(SourceKind::Ocr));
        assert_eq!(records[0].unique_serial.as_deref(), Some("W7F1-S5"));
        assert_eq!(records[1].source, Some(SourceKind::PdfText));
        assert!(records[1].pending_manual_entry);
    }

    #[test]
    fn candidate_list_must_be_an_array() {
        assert!(load_candidates("bad.json", r#"{"voterId": "XUA7224868"}"#, SourceKind::Ocr).is_err());
    }

    #[test]
    fn records_without_booth_are_kept_apart() {
        let placed = VoterRecord {
            ward: Some("7".to_string()),
            booth: Some("1".to_string()),
            ..VoterRecord::default()
        };
        let (groups, unplaced) = split_by_booth(vec![placed, VoterRecord::default()]);
        assert_eq!(groups.len(), 1);
        assert_eq!(unplaced.len(), 1);
    }
}
