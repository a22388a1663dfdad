use serde::Serialize;
use tracing::{debug, info};

use crate::extract::labels::{FEMALE_NAME_ENDINGS, MALE_NAME_ENDINGS, MALE_NAME_EXCEPTIONS};
use crate::model::{FieldStatus, Gender, Sample, VoterRecord};

const MAX_SAMPLES: usize = 20;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichReport {
    pub records: usize,
    pub without_gender: usize,
    pub filled: usize,
    pub undecided: usize,
    pub undecided_samples: Vec<Sample>,
}

/// Guesses a gender from the ending of the first name token. Heuristic and
/// only used by the explicit enrichment pass.
pub fn gender_from_name(name: &str) -> Option<Gender> {
    let given = name.split_whitespace().next()?;
    if MALE_NAME_EXCEPTIONS.contains(&given) {
        return Some(Gender::Male);
    }
    if MALE_NAME_ENDINGS.iter().any(|ending| given.ends_with(ending)) {
        return Some(Gender::Male);
    }
    if FEMALE_NAME_ENDINGS.iter().any(|ending| given.ends_with(ending)) {
        return Some(Gender::Female);
    }
    // An inherent-vowel ending (bare consonant) is the common male pattern.
    given
        .chars()
        .last()
        .filter(|last| matches!(last, '\u{0915}'..='\u{0939}' | '\u{0958}'..='\u{095F}'))
        .map(|_| Gender::Male)
}

/// Fills absent genders from name endings and marks them inferred. Present
/// genders are never touched.
pub fn enrich_genders(records: &mut [VoterRecord]) -> EnrichReport {
    let mut report = EnrichReport {
        records: records.len(),
        ..EnrichReport::default()
    };

    for record in records.iter_mut().filter(|record| record.gender.is_none()) {
        report.without_gender += 1;
        match record.name.as_deref().and_then(gender_from_name) {
            Some(gender) => {
                debug!(
                    unique_serial = %record.unique_serial.as_deref().unwrap_or_default(),
                    gender = %gender,
                    "inferred gender from name"
                );
                record.gender = Some(gender);
                record.data_quality.gender = FieldStatus::Inferred;
                record.refresh_quality();
                report.filled += 1;
            }
            None => {
                report.undecided += 1;
                if report.undecided_samples.len() < MAX_SAMPLES {
                    report.undecided_samples.push(Sample {
                        location: record
                            .unique_serial
                            .clone()
                            .or_else(|| record.voter_id.clone())
                            .unwrap_or_default(),
                        detail: record.name.clone().unwrap_or_default(),
                    });
                }
            }
        }
    }

    info!(
        records = report.records,
        without_gender = report.without_gender,
        filled = report.filled,
        undecided = report.undecided,
        "gender enrichment finished"
    );
    report
}
