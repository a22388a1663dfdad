use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::model::{FieldStatus, VoterRecord};
use crate::reconcile::merge::LocationKey;
use crate::store::{Store, StoreValidation};
use crate::util::write_json_stdout;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldCounts {
    pub voter_id: usize,
    pub serial: usize,
    pub name: usize,
    pub relation: usize,
    pub house: usize,
    pub age: usize,
    pub gender: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoothSummary {
    pub ward: String,
    pub booth: String,
    pub records: usize,
    pub pending_manual_entry: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub store: PathBuf,
    pub records: usize,
    pub without_booth: usize,
    pub booths: Vec<BoothSummary>,
    pub missing: FieldCounts,
    pub inferred: FieldCounts,
    pub conflicts: FieldCounts,
    pub ocr_failed: usize,
    pub pending_manual_entry: usize,
    pub backups: usize,
    pub latest_backup: Option<PathBuf>,
    pub validation: StoreValidation,
}

pub fn run(args: StatusArgs) -> Result<()> {
    info!(store = %args.store.display(), "status requested");
    let store = Store::open(&args.store)?;
    let backups = store.backups()?;

    let mut report = summarize(store.records());
    report.store = args.store.clone();
    report.backups = backups.len();
    report.latest_backup = backups.last().cloned();
    report.validation = store.validate();

    if args.json {
        return write_json_stdout(&report);
    }

    info!(
        path = %report.store.display(),
        records = report.records,
        booths = report.booths.len(),
        without_booth = report.without_booth,
        ocr_failed = report.ocr_failed,
        pending_manual_entry = report.pending_manual_entry,
        backups = report.backups,
        latest_backup = %report.latest_backup.as_ref().map(|path| path.display().to_string()).unwrap_or_default(),
        "store status"
    );
    for booth in &report.booths {
        info!(
            ward = %booth.ward,
            booth = %booth.booth,
            records = booth.records,
            pending_manual_entry = booth.pending_manual_entry,
            "booth status"
        );
    }
    info!(
        voter_id = report.missing.voter_id,
        serial = report.missing.serial,
        name = report.missing.name,
        relation = report.missing.relation,
        house = report.missing.house,
        age = report.missing.age,
        gender = report.missing.gender,
        inferred_gender = report.inferred.gender,
        inferred_serial = report.inferred.serial,
        "missing fields"
    );
    for error in &report.validation.errors {
        warn!(error = %error, "store invariant violated");
    }
    for warning in &report.validation.warnings {
        warn!(warning = %warning, "store validation warning");
    }
    Ok(())
}

pub fn summarize(records: &[VoterRecord]) -> StatusReport {
    let mut booths = BTreeMap::<(LocationKey, LocationKey), BoothSummary>::new();
    let mut missing = FieldCounts::default();
    let mut inferred = FieldCounts::default();
    let mut conflicts = FieldCounts::default();
    let mut without_booth = 0usize;

    for record in records {
        match record.booth_key() {
            Some((ward, booth)) => {
                let key = (
                    LocationKey::from(Some(ward.as_str())),
                    LocationKey::from(Some(booth.as_str())),
                );
                let summary = booths.entry(key).or_insert_with(|| BoothSummary {
                    ward,
                    booth,
                    ..BoothSummary::default()
                });
                summary.records += 1;
                summary.pending_manual_entry += usize::from(record.pending_manual_entry);
            }
            None => without_booth += 1,
        }
        tally(&mut missing, record, FieldStatus::Missing);
        tally(&mut inferred, record, FieldStatus::Inferred);
        tally(&mut conflicts, record, FieldStatus::Conflict);
    }

    StatusReport {
        store: PathBuf::new(),
        records: records.len(),
        without_booth,
        booths: booths.into_values().collect(),
        missing,
        inferred,
        conflicts,
        ocr_failed: records.iter().filter(|record| record.ocr_failed).count(),
        pending_manual_entry: records
            .iter()
            .filter(|record| record.pending_manual_entry)
            .count(),
        backups: 0,
        latest_backup: None,
        validation: StoreValidation::default(),
    }
}

fn tally(counts: &mut FieldCounts, record: &VoterRecord, status: FieldStatus) {
    let quality = &record.data_quality;
    counts.voter_id += usize::from(quality.voter_id == status);
    counts.serial += usize::from(quality.serial == status);
    counts.name += usize::from(quality.name == status);
    counts.relation += usize::from(quality.relation == status);
    counts.house += usize::from(quality.house == status);
    counts.age += usize::from(quality.age == status);
    counts.gender += usize::from(quality.gender == status);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(booth: Option<&str>, serial: u32, name: Option<&str>) -> VoterRecord {
        let mut record = VoterRecord {
            voter_id: Some(format!("XUA722486{serial}")),
            serial: Some(serial),
            ward: booth.map(|_| "7".to_string()),
            booth: booth.map(str::to_string),
            name: name.map(str::to_string),
            ..VoterRecord::default()
        };
        record.refresh_quality();
        record
    }

    #[test]
    fn booths_are_counted_in_numeric_order() {
        let records = vec![
            record(Some("10"), 1, Some("राम")),
            record(Some("2"), 2, None),
            record(Some("2"), 3, Some("सीता")),
            record(None, 4, Some("गीता")),
        ];
        let report = summarize(&records);

        assert_eq!(report.records, 4);
        assert_eq!(report.without_booth, 1);
        let booths = report
            .booths
            .iter()
            .map(|booth| (booth.booth.as_str(), booth.records, booth.pending_manual_entry))
            .collect::<Vec<(&str, usize, usize)>>();
        assert_eq!(booths, vec![("2", 2, 1), ("10", 1, 0)]);
        assert_eq!(report.missing.name, 1);
        assert_eq!(report.missing.age, 4);
        assert_eq!(report.pending_manual_entry, 1);
    }
}
