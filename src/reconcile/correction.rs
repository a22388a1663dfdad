use std::collections::HashSet;
use std::fmt;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use crate::extract::numerals::to_arabic;
use crate::extract::record::normalize_location_segment;
use crate::extract::voter_id::{self, normalize_id};
use crate::model::{Age, FieldStatus, Gender, Sample, VoterRecord};

/// One hand-entered patch. Empty or missing fields mean "no change"; a field
/// is only cleared when it is named in `clear`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Correction {
    #[serde(alias = "serialNumber", deserialize_with = "de_loose_u64")]
    pub serial: Option<u64>,
    #[serde(deserialize_with = "de_loose_u64")]
    pub anukramank: Option<u64>,
    #[serde(deserialize_with = "de_loose_string")]
    pub voter_id: Option<String>,
    /// Narrows a serial key to one booth.
    #[serde(deserialize_with = "de_loose_string")]
    pub ward: Option<String>,
    #[serde(deserialize_with = "de_loose_string")]
    pub booth: Option<String>,
    #[serde(deserialize_with = "de_loose_string")]
    pub name: Option<String>,
    #[serde(deserialize_with = "de_loose_string")]
    pub relation: Option<String>,
    #[serde(deserialize_with = "de_loose_string")]
    pub house: Option<String>,
    #[serde(deserialize_with = "de_loose_string")]
    pub age: Option<String>,
    #[serde(deserialize_with = "de_loose_string")]
    pub gender: Option<String>,
    pub clear: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrectionKey {
    Serial {
        serial: u64,
        ward: Option<String>,
        booth: Option<String>,
    },
    Anukramank(u64),
    VoterId(String),
}

impl fmt::Display for CorrectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial { serial, ward, booth } => {
                write!(f, "serial {serial}")?;
                if let Some(ward) = ward {
                    write!(f, " ward {ward}")?;
                }
                if let Some(booth) = booth {
                    write!(f, " booth {booth}")?;
                }
                Ok(())
            }
            Self::Anukramank(value) => write!(f, "anukramank {value}"),
            Self::VoterId(value) => write!(f, "voterId {value}"),
        }
    }
}

impl Correction {
    /// Serial first, then anukramank, then voter ID.
    pub fn key(&self) -> Option<CorrectionKey> {
        if let Some(serial) = self.serial {
            return Some(CorrectionKey::Serial {
                serial,
                ward: self.ward.as_deref().map(location_scope),
                booth: self.booth.as_deref().map(location_scope),
            });
        }
        if let Some(anukramank) = self.anukramank {
            return Some(CorrectionKey::Anukramank(anukramank));
        }
        self.voter_id
            .as_deref()
            .map(|raw| CorrectionKey::VoterId(voter_id::normalize(raw).into_stored()))
    }

    fn patches_voter_id(&self) -> bool {
        !matches!(self.key(), Some(CorrectionKey::VoterId(_)) | None)
    }
}

/// Ward and booth the way the parser stores them: ASCII digits, no padding.
fn location_scope(raw: &str) -> String {
    let arabic = to_arabic(raw);
    normalize_location_segment(&arabic).unwrap_or_else(|| arabic.trim().to_string())
}

impl CorrectionKey {
    fn matches(&self, record: &VoterRecord) -> bool {
        match self {
            Self::Serial { serial, ward, booth } => {
                record.serial.map(u64::from) == Some(*serial)
                    && ward.as_ref().is_none_or(|ward| record.ward.as_ref() == Some(ward))
                    && booth.as_ref().is_none_or(|booth| record.booth.as_ref() == Some(booth))
            }
            Self::Anukramank(value) => record.anukramank == Some(*value),
            Self::VoterId(value) => record.voter_id.as_deref() == Some(value.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEntry {
    pub key: String,
    pub unique_serial: Option<String>,
    pub changes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotFound {
    pub index: usize,
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionReport {
    pub corrections: usize,
    pub records_changed: usize,
    pub field_changes: usize,
    pub unchanged: usize,
    pub not_found: Vec<NotFound>,
    pub duplicate_keys: Vec<String>,
    pub rejected_values: Vec<Sample>,
    pub change_log: Vec<ChangeEntry>,
}

impl CorrectionReport {
    pub fn has_changes(&self) -> bool {
        self.field_changes > 0
    }
}

/// Reads a batch file's contents. Anything but a JSON array of objects is
/// rejected before any record is touched.
pub fn parse_batch(text: &str) -> Result<Vec<Correction>> {
    let value: serde_json::Value =
        serde_json::from_str(text).context("correction batch is not valid JSON")?;
    let serde_json::Value::Array(items) = value else {
        bail!("correction batch must be a JSON array of corrections");
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            if !item.is_object() {
                bail!("correction #{index} is not a JSON object");
            }
            serde_json::from_value::<Correction>(item)
                .with_context(|| format!("correction #{index} is malformed"))
        })
        .collect()
}

/// Applies `batch` in order. A correction whose key matches no record, or more
/// than one, is reported and skipped.
pub fn apply_corrections(records: &mut [VoterRecord], batch: &[Correction]) -> CorrectionReport {
    let mut report = CorrectionReport {
        corrections: batch.len(),
        ..CorrectionReport::default()
    };
    let mut touched = HashSet::<usize>::new();
    let mut changed_records = HashSet::<usize>::new();

    for (index, correction) in batch.iter().enumerate() {
        let Some(key) = correction.key() else {
            warn!(index, "correction has no serial, anukramank or voterId");
            report.not_found.push(NotFound {
                index,
                key: String::new(),
                reason: "no key".to_string(),
            });
            continue;
        };

        let matches = records
            .iter()
            .enumerate()
            .filter(|(_, record)| key.matches(record))
            .map(|(position, _)| position)
            .collect::<Vec<usize>>();
        let position = match matches.as_slice() {
            [position] => *position,
            [] => {
                warn!(index, key = %key, "correction target not found");
                report.not_found.push(NotFound {
                    index,
                    key: key.to_string(),
                    reason: "not found".to_string(),
                });
                continue;
            }
            many => {
                warn!(index, key = %key, candidates = many.len(), "correction key is ambiguous");
                report.not_found.push(NotFound {
                    index,
                    key: key.to_string(),
                    reason: format!("ambiguous: {} records match", many.len()),
                });
                continue;
            }
        };

        if !touched.insert(position) {
            warn!(index, key = %key, "record corrected more than once in this batch; last write wins");
            report.duplicate_keys.push(key.to_string());
        }

        let changes = patch_record(
            &mut records[position],
            correction,
            &key,
            &mut report.rejected_values,
        );
        if changes.is_empty() {
            report.unchanged += 1;
            continue;
        }
        changed_records.insert(position);
        report.field_changes += changes.len();
        report.change_log.push(ChangeEntry {
            key: key.to_string(),
            unique_serial: records[position].unique_serial.clone(),
            changes,
        });
    }

    report.records_changed = changed_records.len();
    info!(
        corrections = report.corrections,
        records_changed = report.records_changed,
        field_changes = report.field_changes,
        not_found = report.not_found.len(),
        duplicate_keys = report.duplicate_keys.len(),
        "applied correction batch"
    );
    report
}

fn patch_record(
    record: &mut VoterRecord,
    correction: &Correction,
    key: &CorrectionKey,
    rejected: &mut Vec<Sample>,
) -> Vec<String> {
    let mut changes = Vec::<String>::new();
    let mut reject = |field: &str, value: &str| {
        warn!(key = %key, field, value, "rejected correction value");
        rejected.push(Sample {
            location: key.to_string(),
            detail: format!("{field}: {value:?} is not acceptable"),
        });
    };

    if let Some(raw) = correction.voter_id.as_ref().filter(|_| correction.patches_voter_id()) {
        match normalize_id(raw) {
            Some(id) => {
                set_value(&mut record.voter_id, id, "VoterId", &mut changes);
            }
            None => reject("voterId", raw),
        }
    }
    // Corrected fields lose any inferred mark.
    if let Some(name) = &correction.name
        && set_value(&mut record.name, name.clone(), "Name", &mut changes)
    {
        record.data_quality.name = FieldStatus::Missing;
    }
    if let Some(relation) = &correction.relation
        && set_value(&mut record.relation, relation.clone(), "Relation", &mut changes)
    {
        record.data_quality.relation = FieldStatus::Missing;
    }
    if let Some(house) = &correction.house
        && set_value(&mut record.house, house.clone(), "House", &mut changes)
    {
        record.data_quality.house = FieldStatus::Missing;
    }
    if let Some(raw) = &correction.age {
        match Age::parse(&to_arabic(raw)) {
            Some(age) => {
                if set_value(&mut record.age, age, "Age", &mut changes) {
                    record.data_quality.age = FieldStatus::Missing;
                }
            }
            None => reject("age", raw),
        }
    }
    if let Some(raw) = &correction.gender {
        match Gender::parse(raw) {
            Some(gender) => {
                if set_value(&mut record.gender, gender, "Gender", &mut changes) {
                    record.data_quality.gender = FieldStatus::Missing;
                }
            }
            None => reject("gender", raw),
        }
    }

    for field in &correction.clear {
        let cleared = match field.trim() {
            "name" => clear_field(&mut record.name, "Name", &mut changes),
            "relation" => clear_field(&mut record.relation, "Relation", &mut changes),
            "house" => clear_field(&mut record.house, "House", &mut changes),
            "age" => clear_field(&mut record.age, "Age", &mut changes),
            "gender" => clear_field(&mut record.gender, "Gender", &mut changes),
            other => {
                reject("clear", other);
                false
            }
        };
        if cleared && record.relation.is_none() {
            record.relation_type = None;
        }
    }

    if !changes.is_empty() {
        record.refresh_quality();
    }
    changes
}

fn set_value<T>(slot: &mut Option<T>, value: T, label: &str, changes: &mut Vec<String>) -> bool
where
    T: PartialEq + fmt::Display,
{
    if slot.as_ref() == Some(&value) {
        return false;
    }
    changes.push(format!(
        "{label}: \"{}\" → \"{value}\"",
        slot.as_ref().map(ToString::to_string).unwrap_or_default()
    ));
    *slot = Some(value);
    true
}

fn clear_field<T: fmt::Display>(slot: &mut Option<T>, label: &str, changes: &mut Vec<String>) -> bool {
    match slot.take() {
        Some(previous) => {
            changes.push(format!("{label}: \"{previous}\" → \"\""));
            true
        }
        None => false,
    }
}

fn de_loose_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::String(text)) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Some(serde_json::Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

fn de_loose_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::Number(number)) => number.as_u64(),
        Some(serde_json::Value::String(text)) => to_arabic(text.trim()).parse().ok(),
        _ => None,
    })
}
