use tracing::debug;

use super::fields::FieldExtractor;
use super::voter_id::{self, VoterIdCheck};
use crate::model::{FieldStatus, SourceKind, VoterRecord};

/// Ward and booth known from outside the block (filename or operator).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoothLocation {
    pub ward: Option<String>,
    pub booth: Option<String>,
}

/// One located voter entry handed over by the page parser.
#[derive(Debug, Clone, Default)]
pub struct BlockInput {
    pub lines: Vec<String>,
    pub serial: Option<u32>,
    pub raw_voter_id: Option<String>,
    pub part_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBlock {
    pub record: VoterRecord,
    pub id_check: Option<VoterIdCheck>,
}

pub struct RecordParser<'a> {
    extractor: &'a FieldExtractor,
    method: SourceKind,
    fallback: &'a BoothLocation,
}

impl<'a> RecordParser<'a> {
    pub fn new(extractor: &'a FieldExtractor, method: SourceKind, fallback: &'a BoothLocation) -> Self {
        Self {
            extractor,
            method,
            fallback,
        }
    }

    /// Returns `None` when the block has neither a usable name nor a usable
    /// voter ID.
    pub fn parse(&self, input: &BlockInput) -> Option<ParsedBlock> {
        let block = input.lines.join("\n");
        let fields = self.extractor.extract_all(&block);

        let id_check = input.raw_voter_id.as_deref().map(voter_id::normalize);
        let has_usable_id = id_check
            .as_ref()
            .map(|check| check.id().is_some())
            .unwrap_or(false);
        if fields.name.is_none() && !has_usable_id {
            debug!(
                raw_voter_id = %input.raw_voter_id.as_deref().unwrap_or_default(),
                serial = ?input.serial,
                "block yielded no candidate"
            );
            return None;
        }

        let part_number = input
            .part_number
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let (part_ward, part_booth) = part_number
            .as_deref()
            .map(split_part_number)
            .unwrap_or((None, None));

        let mut record = VoterRecord {
            voter_id: id_check.clone().map(VoterIdCheck::into_stored),
            serial: input.serial,
            name: fields.name,
            relation: fields.relation,
            relation_type: fields.relation_type,
            house: fields.house,
            age: fields.age,
            gender: fields.gender,
            ward: part_ward.or_else(|| self.fallback.ward.clone()),
            booth: part_booth.or_else(|| self.fallback.booth.clone()),
            part_number,
            source: Some(self.method),
            ..VoterRecord::default()
        };
        if fields.gender_inferred {
            record.data_quality.gender = FieldStatus::Inferred;
        }
        record.refresh_quality();

        Some(ParsedBlock { record, id_check })
    }
}

/// `ddd/ward/booth`: the second segment is the ward, the third the booth.
pub fn split_part_number(part_number: &str) -> (Option<String>, Option<String>) {
    let converted = super::numerals::to_arabic(part_number);
    let segments = converted
        .split('/')
        .map(str::trim)
        .collect::<Vec<&str>>();
    if segments.len() < 3 {
        return (None, None);
    }
    (
        normalize_location_segment(segments[1]),
        normalize_location_segment(segments[2]),
    )
}

/// Numeric ward/booth identifiers lose leading zeros so `07` and `7` key the
/// same booth; anything else is kept as printed.
pub fn normalize_location_segment(segment: &str) -> Option<String> {
    let trimmed = segment.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.chars().all(|character| character.is_ascii_digit()) {
        let stripped = trimmed.trim_start_matches('0');
        return Some(if stripped.is_empty() { "0" } else { stripped }.to_string());
    }
    Some(trimmed.to_string())
}
