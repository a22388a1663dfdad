use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Display;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::model::{DataQuality, FieldStatus, Sample, SourceKind, VoterRecord};

/// One extraction pass over a booth, or the prior Store slice for it.
#[derive(Debug, Clone)]
pub struct SourceList {
    pub kind: SourceKind,
    /// File name or other operator-facing label.
    pub label: String,
    pub records: Vec<VoterRecord>,
}

impl SourceList {
    pub fn new(kind: SourceKind, label: impl Into<String>, records: Vec<VoterRecord>) -> Self {
        Self {
            kind,
            label: label.into(),
            records,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceValue {
    pub source: SourceKind,
    pub label: String,
    pub value: String,
}

/// Two or more sources disagreed on one field of one merged record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMismatch {
    pub voter_id: Option<String>,
    pub unique_serial: Option<String>,
    pub field: &'static str,
    pub chosen: String,
    pub values: Vec<SourceValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCounts {
    pub label: String,
    pub source: Option<SourceKind>,
    pub records: usize,
    pub matched: usize,
    pub unmatched: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub input_records: usize,
    pub output_records: usize,
    pub merged_groups: usize,
    pub refused_links: usize,
    pub sources: Vec<SourceCounts>,
    pub mismatches: Vec<FieldMismatch>,
    pub serial_conflicts: Vec<Sample>,
}

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub records: Vec<VoterRecord>,
    pub report: MergeReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldClass {
    /// Digits and structure: PDF text reads these more reliably.
    Numeric,
    /// Devanagari free text: OCR reads these more reliably.
    Text,
}

/// Lower wins. Hand-entered data and the prior Store always outrank a fresh
/// extraction pass.
fn rank(kind: SourceKind, class: FieldClass) -> u8 {
    match (kind, class) {
        (SourceKind::Manual, _) => 0,
        (SourceKind::PriorStore, _) => 1,
        (SourceKind::PdfText, FieldClass::Numeric) | (SourceKind::Ocr, FieldClass::Text) => 2,
        (SourceKind::PdfText, FieldClass::Text) | (SourceKind::Ocr, FieldClass::Numeric) => 3,
    }
}

struct Member {
    list: usize,
    kind: SourceKind,
    label: String,
    record: VoterRecord,
}

/// Union-find over members. A group never holds two records from the same
/// list, nor two different valid voter IDs.
struct Groups {
    parent: Vec<usize>,
    lists: Vec<BTreeSet<usize>>,
    voter_ids: Vec<BTreeSet<String>>,
}

impl Groups {
    fn new(members: &[Member]) -> Self {
        Self {
            parent: (0..members.len()).collect(),
            lists: members
                .iter()
                .map(|member| BTreeSet::from([member.list]))
                .collect(),
            voter_ids: members
                .iter()
                .map(|member| {
                    member
                        .record
                        .voter_id
                        .iter()
                        .filter(|_| member.record.has_valid_voter_id())
                        .cloned()
                        .collect()
                })
                .collect(),
        }
    }

    fn find(&mut self, index: usize) -> usize {
        let mut root = index;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut current = index;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    /// Returns false when joining would break a group invariant.
    fn union(&mut self, left: usize, right: usize) -> bool {
        let left = self.find(left);
        let right = self.find(right);
        if left == right {
            return true;
        }
        if !self.lists[left].is_disjoint(&self.lists[right]) {
            return false;
        }
        let ids_clash = !self.voter_ids[left].is_empty()
            && !self.voter_ids[right].is_empty()
            && self.voter_ids[left] != self.voter_ids[right];
        if ids_clash {
            return false;
        }

        let (root, child) = if left < right { (left, right) } else { (right, left) };
        self.parent[child] = root;
        let lists = std::mem::take(&mut self.lists[child]);
        self.lists[root].extend(lists);
        let voter_ids = std::mem::take(&mut self.voter_ids[child]);
        self.voter_ids[root].extend(voter_ids);
        true
    }
}

/// Merges candidate lists into one list with per-field source precedence.
/// Every input record ends up in exactly one output record.
pub fn merge_sources(lists: Vec<SourceList>) -> MergeOutcome {
    let mut report = MergeReport::default();
    let mut members = Vec::<Member>::new();
    for (list, source) in lists.into_iter().enumerate() {
        report.sources.push(SourceCounts {
            label: source.label.clone(),
            source: Some(source.kind),
            records: source.records.len(),
            ..SourceCounts::default()
        });
        for mut record in source.records {
            record.refresh_unique_serial();
            members.push(Member {
                list,
                kind: source.kind,
                label: source.label.clone(),
                record,
            });
        }
    }
    report.input_records = members.len();

    let mut groups = Groups::new(&members);
    report.refused_links += link_by(&members, &mut groups, |record| {
        record
            .has_valid_voter_id()
            .then(|| record.voter_id.clone())
            .flatten()
    });
    report.refused_links += link_by(&members, &mut groups, |record| record.unique_serial.clone());

    let mut grouped = BTreeMap::<usize, Vec<usize>>::new();
    for index in 0..members.len() {
        let root = groups.find(index);
        grouped.entry(root).or_default().push(index);
    }

    let mut records = Vec::<VoterRecord>::with_capacity(grouped.len());
    let mut serial_ranks = Vec::<u8>::with_capacity(grouped.len());
    for indexes in grouped.values() {
        let group = indexes.iter().map(|index| &members[*index]).collect::<Vec<&Member>>();
        if group.len() > 1 {
            report.merged_groups += 1;
            for member in &group {
                report.sources[member.list].matched += 1;
            }
        } else {
            report.sources[group[0].list].unmatched += 1;
        }
        let (record, serial_rank) = resolve_group(&group, &mut report.mismatches);
        records.push(record);
        serial_ranks.push(serial_rank);
    }

    resolve_serial_conflicts(&mut records, &serial_ranks, &mut report.serial_conflicts);
    records.sort_by(|left, right| location_order(left).cmp(&location_order(right)));
    report.output_records = records.len();

    info!(
        inputs = report.input_records,
        outputs = report.output_records,
        merged_groups = report.merged_groups,
        mismatches = report.mismatches.len(),
        serial_conflicts = report.serial_conflicts.len(),
        "merged sources"
    );

    MergeOutcome { records, report }
}

fn link_by<F>(members: &[Member], groups: &mut Groups, key: F) -> usize
where
    F: Fn(&VoterRecord) -> Option<String>,
{
    let mut seen = HashMap::<String, Vec<usize>>::new();
    let mut refused = 0usize;

    for (index, member) in members.iter().enumerate() {
        let Some(value) = key(&member.record) else {
            continue;
        };
        let earlier = seen.entry(value.clone()).or_default();
        let mut linked = earlier.is_empty();
        for other in earlier.iter() {
            if groups.union(*other, index) {
                linked = true;
            }
        }
        if !linked {
            refused += 1;
            debug!(key = %value, source = %member.label, "records share a key but cannot be joined");
        }
        earlier.push(index);
    }

    refused
}

/// Builds the merged record and returns it with the rank of the source its
/// serial came from.
fn resolve_group(group: &[&Member], mismatches: &mut Vec<FieldMismatch>) -> (VoterRecord, u8) {
    if let [only] = group {
        let mut record = only.record.clone();
        record.source.get_or_insert(only.kind);
        record.refresh_quality();
        return (record, rank(only.kind, FieldClass::Numeric));
    }

    let mut resolver = FieldResolver {
        group,
        found: Vec::new(),
    };

    let voter_id = resolve_voter_id(group);
    let serial = resolver.pick("serial", FieldClass::Numeric, |record| record.serial, |quality| quality.serial);
    let age = resolver.pick("age", FieldClass::Numeric, |record| record.age, |quality| quality.age);
    let part_number = resolver.pick(
        "partNumber",
        FieldClass::Numeric,
        |record| record.part_number.clone(),
        |_| FieldStatus::Verified,
    );
    let ward = resolver.pick("ward", FieldClass::Numeric, |record| record.ward.clone(), |_| FieldStatus::Verified);
    let booth = resolver.pick("booth", FieldClass::Numeric, |record| record.booth.clone(), |_| FieldStatus::Verified);
    let name = resolver.pick("name", FieldClass::Text, |record| record.name.clone(), |quality| quality.name);
    let relation = resolver.pick(
        "relation",
        FieldClass::Text,
        |record| record.relation.clone(),
        |quality| quality.relation,
    );
    let house = resolver.pick("house", FieldClass::Text, |record| record.house.clone(), |quality| quality.house);
    let gender = resolver.pick("gender", FieldClass::Text, |record| record.gender, |quality| quality.gender);

    let anukramank = group
        .iter()
        .filter(|member| member.kind == SourceKind::PriorStore)
        .chain(group.iter())
        .find_map(|member| member.record.anukramank);
    let card_image = group.iter().find_map(|member| member.record.card_image.clone());
    let relation_type = relation
        .as_ref()
        .and_then(|winner| group[winner.member].record.relation_type);
    let source = group
        .iter()
        .map(|member| member.kind)
        .min_by_key(|kind| rank(*kind, FieldClass::Numeric));
    let merged_from = group
        .iter()
        .map(|member| member.kind)
        .collect::<BTreeSet<SourceKind>>()
        .into_iter()
        .collect::<Vec<SourceKind>>();

    let mut record = VoterRecord {
        voter_id,
        serial: serial.as_ref().map(|winner| winner.value),
        anukramank,
        name: name.as_ref().map(|winner| winner.value.clone()),
        relation: relation.as_ref().map(|winner| winner.value.clone()),
        relation_type,
        house: house.as_ref().map(|winner| winner.value.clone()),
        age: age.as_ref().map(|winner| winner.value),
        gender: gender.as_ref().map(|winner| winner.value),
        ward: ward.as_ref().map(|winner| winner.value.clone()),
        booth: booth.as_ref().map(|winner| winner.value.clone()),
        part_number: part_number.as_ref().map(|winner| winner.value.clone()),
        card_image,
        source,
        merged_from,
        ..VoterRecord::default()
    };
    record.data_quality.serial = inherited_status(group, &serial, |quality| quality.serial);
    record.data_quality.gender = inherited_status(group, &gender, |quality| quality.gender);
    record.refresh_quality();

    let serial_rank = serial
        .as_ref()
        .map(|winner| rank(group[winner.member].kind, FieldClass::Numeric))
        .unwrap_or(u8::MAX);

    for found in resolver.found {
        mismatches.push(FieldMismatch {
            voter_id: record.voter_id.clone(),
            unique_serial: record.unique_serial.clone(),
            field: found.field,
            chosen: found.chosen,
            values: found.values,
        });
    }

    (record, serial_rank)
}

/// Carries an `inferred` mark over from the member that supplied the value.
fn inherited_status<T>(
    group: &[&Member],
    winner: &Option<Winner<T>>,
    status: fn(&DataQuality) -> FieldStatus,
) -> FieldStatus {
    winner
        .as_ref()
        .map(|winner| status(&group[winner.member].record.data_quality))
        .filter(|status| *status == FieldStatus::Inferred)
        .unwrap_or_default()
}

/// A valid ID from any member wins; the group invariant guarantees they agree.
fn resolve_voter_id(group: &[&Member]) -> Option<String> {
    group
        .iter()
        .find(|member| member.record.has_valid_voter_id())
        .or_else(|| {
            group
                .iter()
                .filter(|member| member.record.voter_id.is_some())
                .min_by_key(|member| rank(member.kind, FieldClass::Numeric))
        })
        .and_then(|member| member.record.voter_id.clone())
}

struct Winner<T> {
    value: T,
    member: usize,
}

struct PendingMismatch {
    field: &'static str,
    chosen: String,
    values: Vec<SourceValue>,
}

struct FieldResolver<'a> {
    group: &'a [&'a Member],
    found: Vec<PendingMismatch>,
}

impl FieldResolver<'_> {
    /// Takes the value from the highest-ranked member that has one. A value
    /// read from the page beats an inferred one whatever the source; ties go to
    /// the earlier list. Disagreement is recorded, never fatal.
    fn pick<T, F>(
        &mut self,
        field: &'static str,
        class: FieldClass,
        get: F,
        status: fn(&DataQuality) -> FieldStatus,
    ) -> Option<Winner<T>>
    where
        T: Clone + PartialEq + Display,
        F: Fn(&VoterRecord) -> Option<T>,
    {
        let present = self
            .group
            .iter()
            .enumerate()
            .filter_map(|(index, member)| get(&member.record).map(|value| (index, value)))
            .collect::<Vec<(usize, T)>>();

        let (winner_index, winner_value) = present
            .iter()
            .min_by_key(|(index, _)| {
                let member = self.group[*index];
                let inferred = status(&member.record.data_quality) == FieldStatus::Inferred;
                (inferred, rank(member.kind, class), member.list)
            })
            .cloned()?;

        if present.iter().any(|(_, value)| *value != winner_value) {
            self.found.push(PendingMismatch {
                field,
                chosen: winner_value.to_string(),
                values: present
                    .iter()
                    .map(|(index, value)| SourceValue {
                        source: self.group[*index].kind,
                        label: self.group[*index].label.clone(),
                        value: value.to_string(),
                    })
                    .collect(),
            });
        }

        Some(Winner {
            value: winner_value,
            member: winner_index,
        })
    }
}

/// Keeps `uniqueSerial` unique across the output: the record whose serial came
/// from the most trusted source keeps it, the others lose the serial and are
/// marked as conflicts for manual entry.
fn resolve_serial_conflicts(records: &mut [VoterRecord], serial_ranks: &[u8], conflicts: &mut Vec<Sample>) {
    let mut claims = BTreeMap::<String, Vec<usize>>::new();
    for (index, record) in records.iter().enumerate() {
        if let Some(unique_serial) = &record.unique_serial {
            claims.entry(unique_serial.clone()).or_default().push(index);
        }
    }

    for (unique_serial, claimants) in claims {
        if claimants.len() < 2 {
            continue;
        }
        let keeper = claimants
            .iter()
            .copied()
            .min_by_key(|index| (serial_ranks[*index], *index))
            .unwrap_or(claimants[0]);
        for index in claimants.into_iter().filter(|index| *index != keeper) {
            let record = &mut records[index];
            warn!(
                unique_serial = %unique_serial,
                voter_id = %record.voter_id.as_deref().unwrap_or_default(),
                "serial claimed by another record; cleared for manual entry"
            );
            conflicts.push(Sample {
                location: unique_serial.clone(),
                detail: format!(
                    "voter {} lost serial to a higher-trust source",
                    record.voter_id.as_deref().unwrap_or("without id")
                ),
            });
            record.serial = None;
            record.data_quality.serial = FieldStatus::Conflict;
            record.refresh_quality();
        }
    }
}

/// Ward and booth in numeric order when numeric, then serial.
pub fn location_order(record: &VoterRecord) -> (LocationKey, LocationKey, u32, Option<String>) {
    (
        LocationKey::from(record.ward.as_deref()),
        LocationKey::from(record.booth.as_deref()),
        record.serial.unwrap_or(u32::MAX),
        record.voter_id.clone(),
    )
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum LocationKey {
    Number(u64),
    Text(String),
    Unknown,
}

impl From<Option<&str>> for LocationKey {
    fn from(value: Option<&str>) -> Self {
        match value {
            Some(text) => match text.parse::<u64>() {
                Ok(number) => Self::Number(number),
                Err(_) => Self::Text(text.to_string()),
            },
            None => Self::Unknown,
        }
    }
}
