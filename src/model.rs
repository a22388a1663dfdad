use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const MIN_AGE: u8 = 18;
pub const MAX_AGE: u8 = 120;

/// Voter age, always within [`MIN_AGE`, `MAX_AGE`]. Serialized as a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Age(u8);

impl Age {
    pub fn new(value: u32) -> Option<Self> {
        if (u32::from(MIN_AGE)..=u32::from(MAX_AGE)).contains(&value) {
            Some(Self(value as u8))
        } else {
            None
        }
    }

    /// Parses ASCII digits only; callers convert Devanagari numerals first.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        trimmed.parse::<u32>().ok().and_then(Self::new)
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Age {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Age {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Gender {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Male => "M",
            Self::Female => "F",
        }
    }

    /// Accepts the stored codes plus English and Marathi spellings.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "M" | "m" | "Male" | "male" | "MALE" | "पुरुष" | "पुरूष" | "पु" => Some(Self::Male),
            "F" | "f" | "Female" | "female" | "FEMALE" | "स्त्री" | "स्री" | "स्त्रि" | "स्" => {
                Some(Self::Female)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which guardian label the relation value was found under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationType {
    Father,
    Husband,
    Mother,
    Other,
}

/// Where a set of records came from. Also the merge trust ranking input.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    PdfText,
    Ocr,
    Manual,
    PriorStore,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PdfText => "pdf-text",
            Self::Ocr => "ocr",
            Self::Manual => "manual",
            Self::PriorStore => "prior-store",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "pdf-text" | "pdf" | "text" => Some(Self::PdfText),
            "ocr" => Some(Self::Ocr),
            "manual" => Some(Self::Manual),
            "prior-store" | "store" => Some(Self::PriorStore),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldStatus {
    Verified,
    #[default]
    Missing,
    Inferred,
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataQuality {
    pub voter_id: FieldStatus,
    pub serial: FieldStatus,
    pub name: FieldStatus,
    pub relation: FieldStatus,
    pub house: FieldStatus,
    pub age: FieldStatus,
    pub gender: FieldStatus,
}

/// One row on the electoral roll.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voter_id: Option<String>,
    #[serde(
        default,
        alias = "serialNumber",
        deserialize_with = "de_lenient_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub serial: Option<u32>,
    #[serde(
        default,
        deserialize_with = "de_lenient_u64",
        skip_serializing_if = "Option::is_none"
    )]
    pub anukramank: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_serial: Option<String>,
    #[serde(default, deserialize_with = "de_text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "de_text")]
    pub relation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_type: Option<RelationType>,
    #[serde(default, deserialize_with = "de_text")]
    pub house: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_age")]
    pub age: Option<Age>,
    #[serde(default, deserialize_with = "de_lenient_gender")]
    pub gender: Option<Gender>,
    #[serde(default, deserialize_with = "de_text")]
    pub ward: Option<String>,
    #[serde(default, deserialize_with = "de_text")]
    pub booth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_from: Vec<SourceKind>,
    #[serde(default)]
    pub data_quality: DataQuality,
    #[serde(default)]
    pub ocr_failed: bool,
    #[serde(default)]
    pub pending_manual_entry: bool,
}

impl VoterRecord {
    /// `W{ward}F{booth}-S{serial}` when all three components are known.
    pub fn compute_unique_serial(&self) -> Option<String> {
        match (&self.ward, &self.booth, self.serial) {
            (Some(ward), Some(booth), Some(serial)) => {
                Some(format!("W{}F{}-S{}", ward, booth, serial))
            }
            _ => None,
        }
    }

    pub fn refresh_unique_serial(&mut self) {
        self.unique_serial = self.compute_unique_serial();
    }

    pub fn has_valid_voter_id(&self) -> bool {
        self.voter_id
            .as_deref()
            .map(crate::extract::voter_id::is_valid)
            .unwrap_or(false)
    }

    pub fn booth_key(&self) -> Option<(String, String)> {
        Some((self.ward.clone()?, self.booth.clone()?))
    }

    /// Recomputes per-field statuses from the current values. `inferred` and
    /// `conflict` marks set by earlier steps survive while the field stays in
    /// the same state.
    pub fn refresh_quality(&mut self) {
        let previous = self.data_quality.clone();
        let status = |present: bool, prior: FieldStatus| match (present, prior) {
            (true, FieldStatus::Inferred) => FieldStatus::Inferred,
            (true, _) => FieldStatus::Verified,
            (false, FieldStatus::Conflict) => FieldStatus::Conflict,
            (false, _) => FieldStatus::Missing,
        };

        let id_valid = self.has_valid_voter_id();
        self.data_quality = DataQuality {
            voter_id: status(id_valid, previous.voter_id),
            serial: status(self.serial.is_some(), previous.serial),
            name: status(self.name.is_some(), previous.name),
            relation: status(self.relation.is_some(), previous.relation),
            house: status(self.house.is_some(), previous.house),
            age: status(self.age.is_some(), previous.age),
            gender: status(self.gender.is_some(), previous.gender),
        };
        self.ocr_failed = self.voter_id.is_some() && !id_valid;
        self.pending_manual_entry = self.name.is_none()
            || !id_valid
            || self.data_quality.serial == FieldStatus::Conflict;
        self.refresh_unique_serial();
    }
}

/// One example of a soft failure, kept in reports next to the counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Sample {
    pub location: String,
    pub detail: String,
}

fn non_placeholder(value: &str) -> Option<String> {
    let trimmed = value.trim();
    match trimmed {
        "" | "N/A" | "NA" | "n/a" | "na" | "-" => None,
        _ => Some(trimmed.to_string()),
    }
}

fn de_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::String(s)) => non_placeholder(&s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn de_lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn de_lenient_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    Ok(de_lenient_u64(deserializer)?.and_then(|value| u32::try_from(value).ok()))
}

fn de_lenient_age<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Age>, D::Error> {
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .and_then(|value| u32::try_from(value).ok())
            .and_then(Age::new),
        Some(serde_json::Value::String(s)) => Age::parse(&crate::extract::numerals::to_arabic(&s)),
        _ => None,
    })
}

fn de_lenient_gender<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Gender>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(Gender::parse))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_rejects_out_of_range_without_clamping() {
        assert_eq!(Age::parse("17"), None);
        assert_eq!(Age::parse("121"), None);
        assert_eq!(Age::parse("18").map(Age::get), Some(18));
        assert_eq!(Age::parse("120").map(Age::get), Some(120));
        assert_eq!(Age::parse("8a"), None);
    }

    #[test]
    fn record_round_trips_with_camel_case_keys_and_string_age() {
        let raw = r#"{
            "voterId": "XUA7224868",
            "serialNumber": "5",
            "name": "गजानन यशवंत अनासपुरे",
            "relation": "N/A",
            "house": "",
            "age": 82,
            "gender": "X",
            "ward": "7",
            "booth": "1"
        }"#;

        let record: VoterRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.serial, Some(5));
        assert_eq!(record.relation, None);
        assert_eq!(record.house, None);
        assert_eq!(record.age.map(Age::get), Some(82));
        assert_eq!(record.gender, None);
        assert_eq!(record.compute_unique_serial().as_deref(), Some("W7F1-S5"));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["age"], "82");
        assert_eq!(json["voterId"], "XUA7224868");
        assert_eq!(json["name"], "गजानन यशवंत अनासपुरे");
    }

    #[test]
    fn out_of_range_stored_age_loads_as_absent() {
        let record: VoterRecord = serde_json::from_str(r#"{"age": "150"}"#).unwrap();
        assert_eq!(record.age, None);
        let record: VoterRecord = serde_json::from_str(r#"{"age": "८२"}"#).unwrap();
        assert_eq!(record.age.map(Age::get), Some(82));
    }

    #[test]
    fn refresh_quality_flags_missing_identity() {
        let mut record = VoterRecord {
            voter_id: Some("XU7224868".to_string()),
            ..VoterRecord::default()
        };
        record.refresh_quality();
        assert!(record.ocr_failed);
        assert!(record.pending_manual_entry);
        assert_eq!(record.data_quality.voter_id, FieldStatus::Missing);
        assert_eq!(record.data_quality.name, FieldStatus::Missing);
    }
}
