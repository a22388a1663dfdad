use anyhow::{Context, Result};
use regex::Regex;

use super::labels::{
    AGE_LABEL, FEMALE_TOKENS, GENDER_LABEL, HOUSE_LABELS, HOUSE_PLACEHOLDERS, MALE_TOKENS,
    NAME_LABELS, NOISE_MARKERS, RELATION_LABELS,
};
use super::numerals::to_arabic;
use crate::model::{Age, Gender, RelationType};

const SEPARATOR: &str = r"\s*[:：;.\-]*\s*";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedFields {
    pub name: Option<String>,
    pub relation: Option<String>,
    pub relation_type: Option<RelationType>,
    pub house: Option<String>,
    pub age: Option<Age>,
    pub gender: Option<Gender>,
    /// Gender came from the husband-relation rule rather than a label.
    pub gender_inferred: bool,
}

/// Label-anchored extractors for one voter block. Every method returns `None`
/// rather than a guess when its label or value is not there.
#[derive(Debug)]
pub struct FieldExtractor {
    name_labels: Vec<Regex>,
    relation_labels: Vec<(RelationType, Regex)>,
    house_labels: Vec<Regex>,
    age: Regex,
    gender_label: Regex,
    stop: Regex,
    name_any: Regex,
    label_any: Regex,
}

impl FieldExtractor {
    pub fn new() -> Result<Self> {
        let name_labels = NAME_LABELS
            .iter()
            .map(|label| compile_label(label))
            .collect::<Result<Vec<Regex>>>()?;
        let relation_labels = RELATION_LABELS
            .iter()
            .map(|(kind, label)| compile_label(label).map(|regex| (*kind, regex)))
            .collect::<Result<Vec<(RelationType, Regex)>>>()?;
        let house_labels = HOUSE_LABELS
            .iter()
            .map(|label| compile_label(label))
            .collect::<Result<Vec<Regex>>>()?;

        let age = Regex::new(&format!(
            r"\b{}\b{}([0-9०-९]{{1,3}})\b",
            AGE_LABEL, SEPARATOR
        ))
        .context("failed to compile age regex")?;
        let gender_label = Regex::new(&format!(r"\b{}\b{}", GENDER_LABEL, SEPARATOR))
            .context("failed to compile gender label regex")?;

        Ok(Self {
            name_labels,
            relation_labels,
            house_labels,
            age,
            gender_label,
            stop: compile_stop_regex()?,
            name_any: compile_any(NAME_LABELS.iter().copied())
                .context("failed to compile combined name label regex")?,
            label_any: compile_any(
                NAME_LABELS
                    .iter()
                    .copied()
                    .chain(RELATION_LABELS.iter().map(|(_, label)| *label))
                    .chain(HOUSE_LABELS.iter().copied())
                    .chain([AGE_LABEL, GENDER_LABEL]),
            )
            .context("failed to compile combined label regex")?,
        })
    }

    /// Byte offsets where a name label starts, in reading order.
    pub fn name_label_starts(&self, text: &str) -> Vec<usize> {
        self.name_any.find_iter(text).map(|found| found.start()).collect()
    }

    /// Every label occurrence in `text` with its whitespace-free spelling, so
    /// repeated labels on one line can be told apart from different ones.
    pub fn label_anchors(&self, text: &str) -> Vec<(usize, String)> {
        self.label_any
            .find_iter(text)
            .map(|found| {
                let key = found
                    .as_str()
                    .chars()
                    .filter(|character| !character.is_whitespace())
                    .collect::<String>();
                (found.start(), key)
            })
            .collect()
    }

    pub fn extract_all(&self, block: &str) -> ExtractedFields {
        let name = self.name(block);
        let relation = self.relation(block);
        let (relation, relation_type) = match relation {
            Some((value, kind)) => (Some(value), Some(kind)),
            None => (None, None),
        };
        let direct_gender = self.gender_label_value(block);
        let gender = direct_gender.or_else(|| infer_gender_from_relation(relation_type));

        ExtractedFields {
            name,
            relation,
            relation_type,
            house: self.house(block),
            age: self.age(block),
            gender,
            gender_inferred: direct_gender.is_none() && gender.is_some(),
        }
    }

    pub fn name(&self, block: &str) -> Option<String> {
        self.name_labels
            .iter()
            .find_map(|label| label.find(block))
            .and_then(|found| self.capture_after(block, found.end()))
    }

    pub fn relation(&self, block: &str) -> Option<(String, RelationType)> {
        let (kind, found) = self
            .relation_labels
            .iter()
            .find_map(|(kind, label)| label.find(block).map(|found| (*kind, found)))?;
        self.capture_after(block, found.end())
            .map(|value| (value, kind))
    }

    pub fn house(&self, block: &str) -> Option<String> {
        let found = self
            .house_labels
            .iter()
            .find_map(|label| label.find(block))?;
        let raw = self.truncate_at_stop(&block[found.end()..]);
        let trimmed = raw
            .trim_end_matches(|character: char| {
                character.is_whitespace() || matches!(character, '.' | ',' | ';' | ':' | '|' | '_' | '-' | '–' | '—')
            })
            .trim_start_matches(|character: char| {
                character.is_whitespace() || matches!(character, ':' | ';' | '|')
            });
        let collapsed = collapse_spurious_spaces(trimmed);

        if collapsed.is_empty() || HOUSE_PLACEHOLDERS.contains(&collapsed.as_str()) {
            None
        } else {
            Some(collapsed)
        }
    }

    pub fn age(&self, block: &str) -> Option<Age> {
        let captures = self.age.captures(block)?;
        let digits = to_arabic(captures.get(1)?.as_str());
        Age::parse(&digits)
    }

    fn gender_label_value(&self, block: &str) -> Option<Gender> {
        let found = self.gender_label.find(block)?;
        let rest = block[found.end()..].trim_start();

        // Female tokens are checked first: "स्" never prefixes a male token,
        // while "पु" alone is a valid male abbreviation.
        if FEMALE_TOKENS.iter().any(|token| rest.starts_with(token)) {
            return Some(Gender::Female);
        }
        if MALE_TOKENS.iter().any(|token| rest.starts_with(token)) {
            return Some(Gender::Male);
        }

        let first_word = rest.split_whitespace().next().unwrap_or_default();
        match first_word.trim_matches(|character: char| !character.is_alphanumeric()) {
            "M" => Some(Gender::Male),
            "F" => Some(Gender::Female),
            _ => None,
        }
    }

    fn capture_after(&self, block: &str, offset: usize) -> Option<String> {
        let raw = self.truncate_at_stop(&block[offset..]);
        let value = collapse_spurious_spaces(raw)
            .trim_matches(|character: char| {
                character.is_whitespace()
                    || matches!(character, ':' | ';' | '|' | ',' | '.' | '-' | '_')
            })
            .to_string();
        if value.is_empty() { None } else { Some(value) }
    }

    fn truncate_at_stop<'a>(&self, rest: &'a str) -> &'a str {
        match self.stop.find(rest) {
            Some(found) => &rest[..found.start()],
            None => rest,
        }
    }
}

/// A husband's-name relation means the listed voter is a wife. This is the
/// only gender inference the extractors perform.
pub fn infer_gender_from_relation(relation_type: Option<RelationType>) -> Option<Gender> {
    match relation_type {
        Some(RelationType::Husband) => Some(Gender::Female),
        _ => None,
    }
}

/// Collapses whitespace runs to one space and drops the runs OCR inserts
/// inside a glyph cluster (before a vowel sign or after a virama).
pub fn collapse_spurious_spaces(input: &str) -> String {
    let characters = input.chars().collect::<Vec<char>>();
    let mut output = String::with_capacity(input.len());
    let mut index = 0usize;

    while index < characters.len() {
        let character = characters[index];
        if !character.is_whitespace() {
            output.push(character);
            index += 1;
            continue;
        }

        let run_end = characters[index..]
            .iter()
            .position(|value| !value.is_whitespace())
            .map(|offset| index + offset)
            .unwrap_or(characters.len());
        let previous = output.chars().last();
        let next = characters.get(run_end).copied();

        let inside_cluster = next.map(is_devanagari_combining).unwrap_or(false)
            || previous.map(|value| value == VIRAMA).unwrap_or(false);
        if !inside_cluster && previous.is_some() && next.is_some() {
            output.push(' ');
        }
        index = run_end;
    }

    output
}

const VIRAMA: char = '\u{094D}';

fn is_devanagari_combining(character: char) -> bool {
    matches!(
        character,
        '\u{0900}'..='\u{0903}'
            | '\u{093A}'..='\u{093C}'
            | '\u{093E}'..='\u{094F}'
            | '\u{0951}'..='\u{0957}'
            | '\u{0962}'..='\u{0963}'
    )
}

fn label_pattern(label: &str) -> String {
    label
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<String>>()
        .join(r"\s*")
}

/// Multi-word labels may be followed directly by the value; a single-word
/// label needs a separator so it is not mistaken for the start of a name.
fn compile_label(label: &str) -> Result<Regex> {
    let separator = if label.contains(' ') {
        SEPARATOR
    } else {
        r"\s*[:：;\-]+\s*"
    };
    Regex::new(&format!(r"\b{}{}", label_pattern(label), separator))
        .with_context(|| format!("failed to compile label regex for {label}"))
}

fn compile_any<'a>(labels: impl Iterator<Item = &'a str>) -> Result<Regex> {
    let alternatives = labels
        .map(|label| format!(r"\b{}", label_pattern(label)))
        .collect::<Vec<String>>();
    Regex::new(&alternatives.join("|")).map_err(Into::into)
}

fn compile_stop_regex() -> Result<Regex> {
    let mut alternatives = Vec::<String>::new();
    for label in NAME_LABELS
        .iter()
        .chain(HOUSE_LABELS.iter())
        .chain(RELATION_LABELS.iter().map(|(_, label)| label))
    {
        let pattern = label_pattern(label);
        if label.contains(' ') {
            alternatives.push(format!(r"\b{pattern}"));
        } else {
            alternatives.push(format!(r"\b{pattern}\s*[:：;\-]"));
        }
    }
    alternatives.push(format!(r"\b{AGE_LABEL}\b\s*[:：;\-]"));
    alternatives.push(format!(r"\b{AGE_LABEL}\b\s*[0-9०-९]"));
    alternatives.push(format!(r"\b{GENDER_LABEL}\b"));
    alternatives.extend(NOISE_MARKERS.iter().map(|marker| regex::escape(marker)));

    Regex::new(&alternatives.join("|")).context("failed to compile field stop regex")
}
