use std::io::{self, Write};

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use crate::cli::{OutputFormat, RecordFilter, SearchArgs};
use crate::extract::numerals::to_arabic;
use crate::model::VoterRecord;
use crate::reconcile::merge::location_order;
use crate::store::Store;
use crate::util::write_json_stdout;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse<'a> {
    total: usize,
    offset: usize,
    limit: usize,
    returned: usize,
    records: Vec<&'a VoterRecord>,
}

pub fn run(args: SearchArgs) -> Result<()> {
    let store = Store::open(&args.store)?;
    let matched = select(store.records(), &args.filter);
    let total = matched.len();
    let page = matched
        .into_iter()
        .skip(args.offset)
        .take(args.limit)
        .collect::<Vec<&VoterRecord>>();

    info!(total, returned = page.len(), offset = args.offset, "search completed");

    match args.format {
        OutputFormat::Json => write_json_stdout(&SearchResponse {
            total,
            offset: args.offset,
            limit: args.limit,
            returned: page.len(),
            records: page,
        }),
        OutputFormat::Table => write_table(total, args.offset, &page),
    }
}

/// Records passing `filter`, in booth then serial order.
pub fn select<'a>(records: &'a [VoterRecord], filter: &RecordFilter) -> Vec<&'a VoterRecord> {
    let query = filter
        .query
        .as_deref()
        .map(|query| to_arabic(query.trim()))
        .filter(|query| !query.is_empty());
    let ward = filter.ward.as_deref().map(to_arabic);
    let booth = filter.booth.as_deref().map(to_arabic);

    let mut selected = records
        .iter()
        .filter(|record| ward.as_ref().is_none_or(|ward| record.ward.as_ref() == Some(ward)))
        .filter(|record| booth.as_ref().is_none_or(|booth| record.booth.as_ref() == Some(booth)))
        .filter(|record| filter.gender.is_none_or(|gender| record.gender == Some(gender)))
        .filter(|record| {
            filter
                .min_age
                .is_none_or(|min| record.age.is_some_and(|age| age.get() >= min))
        })
        .filter(|record| {
            filter
                .max_age
                .is_none_or(|max| record.age.is_some_and(|age| age.get() <= max))
        })
        .filter(|record| query.as_deref().is_none_or(|query| matches_text(record, query)))
        .collect::<Vec<&VoterRecord>>();
    selected.sort_by_key(|record| location_order(record));
    selected
}

/// Name substring, case-insensitive voter ID substring, or exact serial.
fn matches_text(record: &VoterRecord, query: &str) -> bool {
    let upper = query.to_uppercase();
    record.name.as_deref().is_some_and(|name| name.contains(query))
        || record
            .voter_id
            .as_deref()
            .is_some_and(|voter_id| voter_id.contains(&upper))
        || record.serial.is_some_and(|serial| serial.to_string() == query)
        || record.unique_serial.as_deref() == Some(upper.as_str())
}

fn write_table(total: usize, offset: usize, records: &[&VoterRecord]) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    writeln!(output, "Matches: {total} (showing {} from {offset})", records.len())?;
    writeln!(
        output,
        "{:<8} {:<14} {:<12} {:<4} {:<2} {:<8} Name",
        "Anuk.", "UniqueSerial", "VoterId", "Age", "G", "House"
    )?;
    for record in records {
        writeln!(
            output,
            "{:<8} {:<14} {:<12} {:<4} {:<2} {:<8} {}{}",
            record.anukramank.map(|value| value.to_string()).unwrap_or_default(),
            record.unique_serial.as_deref().unwrap_or("-"),
            record.voter_id.as_deref().unwrap_or("-"),
            record.age.map(|age| age.to_string()).unwrap_or_default(),
            record.gender.map(|gender| gender.as_str()).unwrap_or("-"),
            record.house.as_deref().unwrap_or("-"),
            record.name.as_deref().unwrap_or("-"),
            if record.pending_manual_entry { "  [pending]" } else { "" },
        )?;
    }
    output.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Age, Gender};

    fn record(voter_id: &str, booth: &str, serial: u32, name: &str, age: u32, gender: Gender) -> VoterRecord {
        let mut record = VoterRecord {
            voter_id: Some(voter_id.to_string()),
            serial: Some(serial),
            ward: Some("7".to_string()),
            booth: Some(booth.to_string()),
            name: Some(name.to_string()),
            age: Age::new(age),
            gender: Some(gender),
            ..VoterRecord::default()
        };
        record.refresh_quality();
        record
    }

    fn roll() -> Vec<VoterRecord> {
        vec![
            record("XUA7224870", "2", 1, "सुनीता पाटील", 45, Gender::Female),
            record("XUA7224868", "1", 5, "राम शिंदे", 29, Gender::Male),
            record("XUA7224869", "1", 6, "सीता शिंदे", 62, Gender::Female),
        ]
    }

    #[test]
    fn filters_combine_and_results_follow_booth_order() {
        let records = roll();
        let filter = RecordFilter {
            gender: Some(Gender::Female),
            min_age: Some(40),
            ..RecordFilter::default()
        };
        let selected = select(&records, &filter);
        let serials = selected
            .iter()
            .filter_map(|record| record.unique_serial.as_deref())
            .collect::<Vec<&str>>();
        assert_eq!(serials, vec!["W7F1-S6", "W7F2-S1"]);
    }

    #[test]
    fn free_text_matches_name_id_and_devanagari_serial() {
        let records = roll();
        let by = |query: &str| {
            select(
                &records,
                &RecordFilter {
                    query: Some(query.to_string()),
                    ..RecordFilter::default()
                },
            )
            .len()
        };
        assert_eq!(by("शिंदे"), 2);
        assert_eq!(by("xua7224868"), 1);
        assert_eq!(by("५"), 1);
        assert_eq!(by("w7f2-s1"), 1);
        assert_eq!(by("कोणी नाही"), 0);
    }

    #[test]
    fn booth_filter_accepts_devanagari_digits() {
        let records = roll();
        let filter = RecordFilter {
            ward: Some("७".to_string()),
            booth: Some("१".to_string()),
            ..RecordFilter::default()
        };
        assert_eq!(select(&records, &filter).len(), 2);
    }
}
