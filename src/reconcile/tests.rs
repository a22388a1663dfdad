use std::collections::HashSet;

use test_case::test_case;

use super::*;
use crate::model::{Age, FieldStatus, Gender, SourceKind, VoterRecord};

fn voter(voter_id: &str, serial: u32) -> VoterRecord {
    let mut record = VoterRecord {
        voter_id: Some(voter_id.to_string()),
        serial: Some(serial),
        ward: Some("7".to_string()),
        booth: Some("1".to_string()),
        ..VoterRecord::default()
    };
    record.refresh_quality();
    record
}

fn with_name(mut record: VoterRecord, name: &str) -> VoterRecord {
    record.name = Some(name.to_string());
    record.refresh_quality();
    record
}

fn with_age(mut record: VoterRecord, age: u32) -> VoterRecord {
    record.age = Age::new(age);
    record.refresh_quality();
    record
}

#[test]
fn numeric_fields_prefer_pdf_text_and_names_prefer_ocr() {
    let pdf = VoterRecord {
        voter_id: Some("XUA7224868".to_string()),
        age: Age::new(82),
        ..VoterRecord::default()
    };
    let ocr = VoterRecord {
        voter_id: Some("XUA7224868".to_string()),
        age: Age::new(83),
        name: Some("गजानन यशवंत अनासपुरे".to_string()),
        ..VoterRecord::default()
    };

    let outcome = merge_sources(vec![
        SourceList::new(SourceKind::PdfText, "a.txt", vec![pdf]),
        SourceList::new(SourceKind::Ocr, "b.txt", vec![ocr]),
    ]);

    assert_eq!(outcome.records.len(), 1);
    let merged = &outcome.records[0];
    assert_eq!(merged.age.map(Age::get), Some(82));
    assert_eq!(merged.name.as_deref(), Some("गजानन यशवंत अनासपुरे"));
    assert_eq!(merged.merged_from, vec![SourceKind::PdfText, SourceKind::Ocr]);

    assert_eq!(outcome.report.mismatches.len(), 1);
    let mismatch = &outcome.report.mismatches[0];
    assert_eq!(mismatch.field, "age");
    assert_eq!(mismatch.voter_id.as_deref(), Some("XUA7224868"));
    assert_eq!(mismatch.chosen, "82");
    assert_eq!(mismatch.values.len(), 2);
}

#[test]
fn precedence_does_not_depend_on_list_order() {
    let pdf = with_name(with_age(voter("XUA7224868", 5), 82), "गजानन अनासपुरे");
    let ocr = with_name(with_age(voter("XUA7224868", 5), 83), "गजानन अनासपूरे");

    let forward = merge_sources(vec![
        SourceList::new(SourceKind::PdfText, "pdf", vec![pdf.clone()]),
        SourceList::new(SourceKind::Ocr, "ocr", vec![ocr.clone()]),
    ]);
    let backward = merge_sources(vec![
        SourceList::new(SourceKind::Ocr, "ocr", vec![ocr]),
        SourceList::new(SourceKind::PdfText, "pdf", vec![pdf]),
    ]);

    for outcome in [&forward, &backward] {
        assert_eq!(outcome.records[0].age.map(Age::get), Some(82));
        assert_eq!(outcome.records[0].name.as_deref(), Some("गजानन अनासपूरे"));
        assert_eq!(outcome.report.mismatches.len(), 2);
    }
}

#[test]
fn values_read_from_the_page_beat_inferred_ones_from_any_source() {
    let mut pdf = voter("XUA7224868", 6);
    pdf.gender = Some(Gender::Male);
    pdf.data_quality.serial = FieldStatus::Inferred;
    pdf.refresh_quality();
    let mut ocr = voter("XUA7224868", 5);
    ocr.gender = Some(Gender::Female);
    ocr.data_quality.gender = FieldStatus::Inferred;
    ocr.refresh_quality();

    let outcome = merge_sources(vec![
        SourceList::new(SourceKind::PdfText, "pdf", vec![pdf]),
        SourceList::new(SourceKind::Ocr, "ocr", vec![ocr]),
    ]);

    assert_eq!(outcome.records.len(), 1);
    let merged = &outcome.records[0];
    assert_eq!(merged.gender, Some(Gender::Male));
    assert_eq!(merged.data_quality.gender, FieldStatus::Verified);
    assert_eq!(merged.serial, Some(5));
    assert_eq!(merged.data_quality.serial, FieldStatus::Verified);
    assert_eq!(merged.unique_serial.as_deref(), Some("W7F1-S5"));
    assert_eq!(outcome.report.mismatches.len(), 2);
}

#[test]
fn records_without_valid_ids_join_on_unique_serial() {
    let pdf = with_age(voter("XUA72248", 5), 40);
    let ocr = with_name(voter("XUA7224868", 5), "राम शिंदे");

    let outcome = merge_sources(vec![
        SourceList::new(SourceKind::PdfText, "pdf", vec![pdf]),
        SourceList::new(SourceKind::Ocr, "ocr", vec![ocr]),
    ]);

    assert_eq!(outcome.records.len(), 1);
    let merged = &outcome.records[0];
    assert_eq!(merged.voter_id.as_deref(), Some("XUA7224868"));
    assert_eq!(merged.age.map(Age::get), Some(40));
    assert_eq!(merged.name.as_deref(), Some("राम शिंदे"));
    assert!(!merged.ocr_failed);
    assert_eq!(outcome.report.sources[0].matched, 1);
    assert_eq!(outcome.report.sources[1].matched, 1);
}

#[test]
fn merge_is_a_union_and_keeps_unique_serials_unique() {
    let pdf = vec![
        with_name(voter("XUA7224868", 1), "अ"),
        with_name(voter("XUA7224869", 2), "ब"),
        with_name(voter("XUA7224870", 3), "क"),
    ];
    // Same serial 2 as a different voter: an identity clash.
    let ocr = vec![
        with_name(voter("XUA7224868", 1), "अ"),
        with_name(voter("XUA7224871", 2), "ड"),
        with_name(voter("XUA7224872", 4), "इ"),
    ];

    let outcome = merge_sources(vec![
        SourceList::new(SourceKind::PdfText, "pdf", pdf.clone()),
        SourceList::new(SourceKind::Ocr, "ocr", ocr.clone()),
    ]);

    let output_ids = outcome
        .records
        .iter()
        .filter_map(|record| record.voter_id.clone())
        .collect::<HashSet<String>>();
    for record in pdf.iter().chain(ocr.iter()) {
        assert!(output_ids.contains(record.voter_id.as_deref().unwrap()));
    }
    assert_eq!(outcome.records.len(), 5);

    let unique_serials = outcome
        .records
        .iter()
        .filter_map(|record| record.unique_serial.clone())
        .collect::<Vec<String>>();
    let distinct = unique_serials.iter().collect::<HashSet<&String>>();
    assert_eq!(unique_serials.len(), distinct.len());

    assert_eq!(outcome.report.serial_conflicts.len(), 1);
    let loser = outcome
        .records
        .iter()
        .find(|record| record.voter_id.as_deref() == Some("XUA7224871"))
        .unwrap();
    assert_eq!(loser.serial, None);
    assert_eq!(loser.data_quality.serial, FieldStatus::Conflict);
    assert!(loser.pending_manual_entry);

    assert_eq!(outcome.report.sources[0].unmatched, 2);
    assert_eq!(outcome.report.sources[1].unmatched, 2);
}

#[test]
fn records_from_one_list_never_merge_with_each_other() {
    let list = vec![
        with_name(voter("XUA72248", 5), "अ"),
        with_name(voter("XUA72249", 5), "ब"),
    ];
    let outcome = merge_sources(vec![SourceList::new(SourceKind::Ocr, "ocr", list)]);
    assert_eq!(outcome.records.len(), 2);
    assert_eq!(outcome.report.merged_groups, 0);
    assert_eq!(outcome.report.serial_conflicts.len(), 1);
}

#[test]
fn prior_store_keeps_anukramank_and_outranks_fresh_text() {
    let mut prior = with_name(voter("XUA7224868", 5), "गजानन अनासपुरे");
    prior.anukramank = Some(42);
    let ocr = with_name(voter("XUA7224868", 5), "गजानन अनासपूरे");

    let outcome = merge_sources(vec![
        SourceList::new(SourceKind::Ocr, "ocr", vec![ocr]),
        SourceList::new(SourceKind::PriorStore, "voters.json", vec![prior]),
    ]);
    let merged = &outcome.records[0];
    assert_eq!(merged.anukramank, Some(42));
    assert_eq!(merged.name.as_deref(), Some("गजानन अनासपुरे"));
    assert_eq!(merged.source, Some(SourceKind::PriorStore));
}

#[test]
fn merged_output_is_sorted_by_location_and_serial() {
    let mut other_ward = with_name(voter("XUA7224870", 1), "क");
    other_ward.ward = Some("10".to_string());
    let list = vec![
        other_ward,
        with_name(voter("XUA7224869", 2), "ब"),
        with_name(voter("XUA7224868", 1), "अ"),
    ];
    let outcome = merge_sources(vec![SourceList::new(SourceKind::PdfText, "pdf", list)]);
    let order = outcome
        .records
        .iter()
        .map(|record| record.unique_serial.clone().unwrap())
        .collect::<Vec<String>>();
    assert_eq!(order, vec!["W7F1-S1", "W7F1-S2", "W10F1-S1"]);
}

fn store_with_age(age: u32) -> Vec<VoterRecord> {
    vec![
        with_age(with_name(voter("XUA7224868", 5), "राम शिंदे"), age),
        with_name(voter("XUA7224869", 6), "सीता शहा"),
    ]
}

#[test]
fn correction_by_serial_logs_old_and_new_value() {
    let mut records = store_with_age(29);
    let batch = parse_batch(r#"[{"serial": 5, "age": "31"}]"#).unwrap();

    let report = apply_corrections(&mut records, &batch);
    assert_eq!(records[0].age.map(Age::get), Some(31));
    assert_eq!(report.records_changed, 1);
    assert_eq!(report.change_log.len(), 1);
    assert_eq!(report.change_log[0].changes, vec!["Age: \"29\" → \"31\"".to_string()]);
    assert_eq!(report.change_log[0].unique_serial.as_deref(), Some("W7F1-S5"));
}

#[test]
fn applying_the_same_batch_twice_converges() {
    let mut records = store_with_age(29);
    let batch = parse_batch(r#"[{"serial": 5, "age": "31", "name": "राम शिंदे"}]"#).unwrap();

    let first = apply_corrections(&mut records, &batch);
    assert!(first.has_changes());
    let snapshot = records.clone();

    let second = apply_corrections(&mut records, &batch);
    assert!(!second.has_changes());
    assert!(second.change_log.is_empty());
    assert_eq!(second.unchanged, 1);
    assert_eq!(records, snapshot);
}

#[test_case(r#"[{"serial": 5}]"#; "key only")]
#[test_case(r#"[{"serial": 5, "name": "", "age": "", "gender": "  "}]"#; "empty strings")]
#[test_case(r#"[{"serial": 5, "house": null, "relation": null}]"#; "nulls")]
fn empty_fields_leave_the_record_unchanged(batch: &str) {
    let mut records = store_with_age(29);
    let before = records.clone();

    let report = apply_corrections(&mut records, &parse_batch(batch).unwrap());
    assert_eq!(records, before);
    assert!(report.change_log.is_empty());
    assert_eq!(report.field_changes, 0);
}

#[test]
fn clearing_requires_the_explicit_sentinel() {
    let mut records = store_with_age(29);
    let batch = parse_batch(r#"[{"serial": 5, "clear": ["age"]}]"#).unwrap();

    let report = apply_corrections(&mut records, &batch);
    assert_eq!(records[0].age, None);
    assert_eq!(report.change_log[0].changes, vec!["Age: \"29\" → \"\"".to_string()]);
}

#[test]
fn missing_keys_are_reported_and_the_batch_continues() {
    let mut records = store_with_age(29);
    let batch = parse_batch(
        r#"[
            {"serial": 99, "age": "40"},
            {"name": "कोणी"},
            {"voterId": "xua 7224869", "gender": "स्त्री"}
        ]"#,
    )
    .unwrap();

    let report = apply_corrections(&mut records, &batch);
    assert_eq!(report.not_found.len(), 2);
    assert_eq!(report.not_found[0].index, 0);
    assert_eq!(records[1].gender, Some(Gender::Female));
    assert_eq!(report.records_changed, 1);
}

#[test]
fn duplicate_keys_apply_in_order_with_a_warning() {
    let mut records = store_with_age(29);
    let batch = parse_batch(r#"[{"serial": 5, "age": "30"}, {"serial": 5, "age": "31"}]"#).unwrap();

    let report = apply_corrections(&mut records, &batch);
    assert_eq!(records[0].age.map(Age::get), Some(31));
    assert_eq!(report.duplicate_keys, vec!["serial 5".to_string()]);
    assert_eq!(report.field_changes, 2);
}

#[test]
fn ambiguous_serial_without_booth_scope_is_not_applied() {
    let mut records = store_with_age(29);
    let mut elsewhere = with_name(voter("XUA7224870", 5), "इतर");
    elsewhere.booth = Some("2".to_string());
    elsewhere.refresh_quality();
    records.push(elsewhere);

    let report = apply_corrections(&mut records, &parse_batch(r#"[{"serial": 5, "age": "50"}]"#).unwrap());
    assert_eq!(report.not_found.len(), 1);
    assert!(report.not_found[0].reason.starts_with("ambiguous"));

    let scoped = parse_batch(r#"[{"serial": 5, "ward": "7", "booth": "2", "age": "50"}]"#).unwrap();
    let report = apply_corrections(&mut records, &scoped);
    assert_eq!(report.records_changed, 1);
    assert_eq!(records[2].age.map(Age::get), Some(50));
}

#[test_case(r#"[{"serial": 5, "ward": "07", "booth": "०१", "age": "50"}]"#, "XUA7224868"; "padded and devanagari scope")]
#[test_case(r#"[{"voterId": "xua 72248", "age": "50"}]"#, "XUA72248"; "unreadable id with spaces")]
#[test_case(r#"[{"voterId": "xua-7224-868", "age": "50"}]"#, "XUA7224868"; "valid id with dashes")]
fn correction_keys_are_normalized_like_stored_values(batch: &str, stored_id: &str) {
    let mut records = vec![with_name(voter(stored_id, 5), "गजानन")];

    let report = apply_corrections(&mut records, &parse_batch(batch).unwrap());
    assert!(report.not_found.is_empty());
    assert_eq!(report.records_changed, 1);
    assert_eq!(records[0].age.map(Age::get), Some(50));
}

#[test_case(r#"{"serial": 5}"#; "object")]
#[test_case(r#""serial""#; "string")]
#[test_case(r#"[1, 2]"#; "array of numbers")]
#[test_case("not json"; "garbage")]
fn malformed_batches_are_fatal(batch: &str) {
    assert!(parse_batch(batch).is_err());
}

#[test]
fn out_of_range_age_and_unknown_gender_are_rejected() {
    let mut records = store_with_age(29);
    let batch = parse_batch(r#"[{"serial": 5, "age": "150", "gender": "X"}]"#).unwrap();

    let report = apply_corrections(&mut records, &batch);
    assert_eq!(records[0].age.map(Age::get), Some(29));
    assert_eq!(records[0].gender, None);
    assert_eq!(report.rejected_values.len(), 2);
    assert_eq!(report.field_changes, 0);
}

#[test_case("सुनीता रमेश पाटील", Some(Gender::Female); "aa ending")]
#[test_case("लक्ष्मी", Some(Gender::Female); "ii ending")]
#[test_case("राम बाबुराव शिंदे", Some(Gender::Male); "consonant ending")]
#[test_case("कृष्णा गावडे", Some(Gender::Male); "male exception")]
#[test_case("शिवाजी", Some(Gender::Male); "honorific ji")]
#[test_case("सोनू", None; "undecided")]
fn name_endings_guess_gender(name: &str, expected: Option<Gender>) {
    assert_eq!(enrich::gender_from_name(name), expected);
}

#[test]
fn enrichment_only_fills_absent_genders_and_marks_them_inferred() {
    let mut stated = with_name(voter("XUA7224868", 5), "सुनीता पाटील");
    stated.gender = Some(Gender::Male);
    stated.refresh_quality();
    let mut records = vec![
        stated,
        with_name(voter("XUA7224869", 6), "सुनीता पाटील"),
        with_name(voter("XUA7224870", 7), "सोनू पाटील"),
        voter("XUA7224871", 8),
    ];

    let report = enrich_genders(&mut records);
    assert_eq!(report.without_gender, 3);
    assert_eq!(report.filled, 1);
    assert_eq!(report.undecided, 2);

    assert_eq!(records[0].gender, Some(Gender::Male));
    assert_eq!(records[0].data_quality.gender, FieldStatus::Verified);
    assert_eq!(records[1].gender, Some(Gender::Female));
    assert_eq!(records[1].data_quality.gender, FieldStatus::Inferred);
    assert_eq!(records[2].gender, None);
}
