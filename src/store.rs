use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{info, warn};

use crate::model::{FieldStatus, VoterRecord};
use crate::util::{epoch_millis, now_utc_string, sha256_bytes, write_json_pretty};

pub const BACKUP_MARKER: &str = ".backup-";

/// The JSON array of voter records on disk, held in memory between `open` and
/// `commit`. Every commit snapshots the previous file first.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    records: Vec<VoterRecord>,
    /// sha256 of the file as opened; `None` when there was no file.
    fingerprint: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreValidation {
    pub records: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl StoreValidation {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitSummary {
    pub path: PathBuf,
    pub backup: Option<PathBuf>,
    pub records: usize,
    pub written_at: String,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "store file missing; starting empty");
            return Ok(Self {
                path: path.to_path_buf(),
                records: Vec::new(),
                fingerprint: None,
            });
        }

        let bytes =
            fs::read(path).with_context(|| format!("failed to read store {}", path.display()))?;
        let mut records: Vec<VoterRecord> = serde_json::from_slice(&bytes)
            .with_context(|| format!("store is not a JSON array of voter records: {}", path.display()))?;
        for record in &mut records {
            record.refresh_unique_serial();
        }

        info!(path = %path.display(), records = records.len(), "opened store");
        Ok(Self {
            path: path.to_path_buf(),
            records,
            fingerprint: Some(sha256_bytes(&bytes)),
        })
    }

    pub fn records(&self) -> &[VoterRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [VoterRecord] {
        &mut self.records
    }

    pub fn booth_records(&self, ward: &str, booth: &str) -> Vec<VoterRecord> {
        self.records
            .iter()
            .filter(|record| record.ward.as_deref() == Some(ward) && record.booth.as_deref() == Some(booth))
            .cloned()
            .collect()
    }

    pub fn validate(&self) -> StoreValidation {
        validate_records(&self.records)
    }

    /// Gives every record without an anukramank the next number after the
    /// current maximum. Existing numbers are never touched.
    pub fn assign_anukramank(&mut self) -> usize {
        let mut next = self
            .records
            .iter()
            .filter_map(|record| record.anukramank)
            .max()
            .unwrap_or(0)
            + 1;
        let mut assigned = 0usize;
        for record in self.records.iter_mut().filter(|record| record.anukramank.is_none()) {
            record.anukramank = Some(next);
            next += 1;
            assigned += 1;
        }
        assigned
    }

    /// Swaps every record of one booth for `incoming`. A replacement record
    /// keeps the anukramank of the record it supersedes, matched by valid
    /// voter ID first and `uniqueSerial` second. Returns how many were removed.
    pub fn replace_booth(&mut self, ward: &str, booth: &str, mut incoming: Vec<VoterRecord>) -> usize {
        let (removed, kept): (Vec<VoterRecord>, Vec<VoterRecord>) =
            std::mem::take(&mut self.records).into_iter().partition(|record| {
                record.ward.as_deref() == Some(ward) && record.booth.as_deref() == Some(booth)
            });

        let mut by_voter_id = HashMap::<String, u64>::new();
        let mut by_unique_serial = HashMap::<String, u64>::new();
        for record in &removed {
            let Some(anukramank) = record.anukramank else {
                continue;
            };
            if record.has_valid_voter_id()
                && let Some(voter_id) = &record.voter_id
            {
                by_voter_id.entry(voter_id.clone()).or_insert(anukramank);
            }
            if let Some(unique_serial) = record.compute_unique_serial() {
                by_unique_serial.entry(unique_serial).or_insert(anukramank);
            }
        }

        for record in incoming.iter_mut().filter(|record| record.anukramank.is_none()) {
            let carried = record
                .voter_id
                .as_ref()
                .filter(|_| record.has_valid_voter_id())
                .and_then(|voter_id| by_voter_id.get(voter_id))
                .or_else(|| {
                    record
                        .compute_unique_serial()
                        .and_then(|unique_serial| by_unique_serial.get(&unique_serial))
                })
                .copied();
            record.anukramank = carried;
        }

        info!(
            ward,
            booth,
            removed = removed.len(),
            inserted = incoming.len(),
            "replaced booth records"
        );
        self.records = kept;
        self.records.extend(incoming);
        removed.len()
    }

    /// Folds merged records into the ones they were derived from, matched by
    /// anukramank, then valid voter ID, then `uniqueSerial`. Only present
    /// values are taken over, and a valid stored ID is never swapped for an
    /// unreadable one. Unmatched records are appended. Returns
    /// `(replaced, inserted)`.
    pub fn upsert(&mut self, incoming: Vec<VoterRecord>) -> (usize, usize) {
        let mut by_anukramank = HashMap::<u64, usize>::new();
        let mut by_voter_id = HashMap::<String, usize>::new();
        let mut by_unique_serial = HashMap::<String, usize>::new();
        for (position, record) in self.records.iter().enumerate() {
            if let Some(anukramank) = record.anukramank {
                by_anukramank.entry(anukramank).or_insert(position);
            }
            if record.has_valid_voter_id()
                && let Some(voter_id) = &record.voter_id
            {
                by_voter_id.entry(voter_id.clone()).or_insert(position);
            }
            if let Some(unique_serial) = record.compute_unique_serial() {
                by_unique_serial.entry(unique_serial).or_insert(position);
            }
        }

        let mut replaced = 0usize;
        let mut appended = Vec::<VoterRecord>::new();
        let mut claimed = HashSet::<usize>::new();
        for record in incoming {
            let target = record
                .anukramank
                .and_then(|anukramank| by_anukramank.get(&anukramank))
                .or_else(|| {
                    record
                        .voter_id
                        .as_ref()
                        .filter(|_| record.has_valid_voter_id())
                        .and_then(|voter_id| by_voter_id.get(voter_id))
                })
                .or_else(|| {
                    record
                        .compute_unique_serial()
                        .and_then(|unique_serial| by_unique_serial.get(&unique_serial))
                        .filter(|position| same_or_unknown_identity(&self.records[**position], &record))
                })
                .copied()
                .filter(|position| claimed.insert(*position));

            match target {
                Some(position) => {
                    absorb(&mut self.records[position], record);
                    replaced += 1;
                }
                None => appended.push(record),
            }
        }

        let inserted = appended.len();
        self.records.extend(appended);
        info!(replaced, inserted, "upserted records");
        (replaced, inserted)
    }

    pub fn commit(&mut self, operation: &str) -> Result<CommitSummary> {
        self.commit_with_log::<()>(operation, None)
    }

    /// Validates, snapshots the current file, writes `log` (if any) and then
    /// replaces the Store. Nothing is written when validation fails, the file
    /// changed since `open`, or the backup cannot be made.
    pub fn commit_with_log<T: Serialize>(
        &mut self,
        operation: &str,
        log: Option<(&Path, &T)>,
    ) -> Result<CommitSummary> {
        for record in &mut self.records {
            record.refresh_unique_serial();
        }

        let validation = self.validate();
        for warning in &validation.warnings {
            warn!(warning = %warning, "store validation warning");
        }
        if !validation.is_ok() {
            bail!(
                "refusing to write store {}: {}",
                self.path.display(),
                validation.errors.join("; ")
            );
        }

        let on_disk = self.read_current()?;
        let current_fingerprint = on_disk.as_deref().map(sha256_bytes);
        if current_fingerprint != self.fingerprint {
            bail!(
                "store {} changed on disk since it was opened; re-run the operation",
                self.path.display()
            );
        }

        let backup = match &on_disk {
            Some(bytes) => Some(self.write_backup(operation, bytes)?),
            None => {
                info!(path = %self.path.display(), "no prior store; skipping backup");
                None
            }
        };

        if let Some((log_path, log_value)) = log {
            write_json_pretty(log_path, log_value)?;
            info!(path = %log_path.display(), "wrote change log");
        }

        let mut data = serde_json::to_vec_pretty(&self.records)
            .with_context(|| format!("failed to serialize store {}", self.path.display()))?;
        data.push(b'\n');
        let temp_path = sibling_path(&self.path, ".tmp");
        fs::write(&temp_path, &data)
            .with_context(|| format!("failed to write {}", temp_path.display()))?;
        fs::rename(&temp_path, &self.path).with_context(|| {
            format!("failed to move {} over {}", temp_path.display(), self.path.display())
        })?;
        self.fingerprint = Some(sha256_bytes(&data));

        info!(
            path = %self.path.display(),
            records = self.records.len(),
            backup = %backup.as_ref().map(|path| path.display().to_string()).unwrap_or_default(),
            operation,
            "wrote store"
        );

        Ok(CommitSummary {
            path: self.path.clone(),
            backup,
            records: self.records.len(),
            written_at: now_utc_string(),
        })
    }

    /// Backup files written next to the Store, oldest first.
    pub fn backups(&self) -> Result<Vec<PathBuf>> {
        let Some(file_name) = self.path.file_name().map(|name| name.to_string_lossy().to_string())
        else {
            return Ok(Vec::new());
        };
        let directory = match self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            Some(parent) => parent.to_path_buf(),
            None => PathBuf::from("."),
        };
        if !directory.exists() {
            return Ok(Vec::new());
        }

        let prefix = format!("{file_name}{BACKUP_MARKER}");
        let mut backups = fs::read_dir(&directory)
            .with_context(|| format!("failed to list {}", directory.display()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().starts_with(&prefix))
                    .unwrap_or(false)
            })
            .collect::<Vec<PathBuf>>();
        backups.sort_by_key(|path| backup_millis(path).unwrap_or_default());
        Ok(backups)
    }

    fn read_current(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("failed to read store {}", self.path.display()))
            }
        }
    }

    /// Writes `<store>.backup-<operation>-<epochMillis>` without ever
    /// overwriting an earlier backup.
    fn write_backup(&self, operation: &str, bytes: &[u8]) -> Result<PathBuf> {
        let operation = sanitize_operation(operation);
        let mut stamp = epoch_millis();
        loop {
            let path = sibling_path(&self.path, &format!("{BACKUP_MARKER}{operation}-{stamp}"));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(bytes)
                        .with_context(|| format!("failed to write backup {}", path.display()))?;
                    file.sync_all()
                        .with_context(|| format!("failed to flush backup {}", path.display()))?;
                    info!(path = %path.display(), sha256 = %sha256_bytes(bytes), "wrote store backup");
                    return Ok(path);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => stamp += 1,
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("failed to create backup {}", path.display()));
                }
            }
        }
    }
}

/// Checks the Store invariants. Duplicate identities are errors; a duplicate
/// anukramank or voter ID is only a warning.
pub fn validate_records(records: &[VoterRecord]) -> StoreValidation {
    let mut validation = StoreValidation {
        records: records.len(),
        ..StoreValidation::default()
    };

    let mut unique_serials = BTreeMap::<String, usize>::new();
    let mut anukramanks = BTreeMap::<u64, usize>::new();
    let mut voter_ids = BTreeMap::<String, usize>::new();
    for record in records {
        if record.unique_serial != record.compute_unique_serial() {
            validation.errors.push(format!(
                "uniqueSerial {} does not match its ward/booth/serial",
                record.unique_serial.as_deref().unwrap_or("(none)")
            ));
        }
        if let Some(unique_serial) = record.compute_unique_serial() {
            *unique_serials.entry(unique_serial).or_default() += 1;
        } else if record.serial.is_some() {
            validation.warnings.push(format!(
                "serial {} of voter {} has no ward/booth",
                record.serial.unwrap_or_default(),
                record.voter_id.as_deref().unwrap_or("without id")
            ));
        }
        if let Some(anukramank) = record.anukramank {
            *anukramanks.entry(anukramank).or_default() += 1;
        }
        if record.has_valid_voter_id()
            && let Some(voter_id) = &record.voter_id
        {
            *voter_ids.entry(voter_id.clone()).or_default() += 1;
        }
    }

    for (unique_serial, count) in unique_serials.iter().filter(|(_, count)| **count > 1) {
        validation
            .errors
            .push(format!("uniqueSerial {unique_serial} is claimed by {count} records"));
    }
    for (anukramank, count) in anukramanks.iter().filter(|(_, count)| **count > 1) {
        validation
            .warnings
            .push(format!("anukramank {anukramank} is shared by {count} records"));
    }
    for (voter_id, count) in voter_ids.iter().filter(|(_, count)| **count > 1) {
        validation
            .warnings
            .push(format!("voterId {voter_id} appears in {count} records"));
    }

    validation
}

fn absorb(existing: &mut VoterRecord, incoming: VoterRecord) {
    let keep_stored_id = existing.has_valid_voter_id() && !incoming.has_valid_voter_id();
    let quality = incoming.data_quality.clone();
    let stored = &mut existing.data_quality;

    if !keep_stored_id {
        take_present(&mut existing.voter_id, incoming.voter_id, &mut stored.voter_id, quality.voter_id);
    }
    if quality.serial == FieldStatus::Conflict {
        existing.serial = None;
        stored.serial = FieldStatus::Conflict;
    } else {
        take_present(&mut existing.serial, incoming.serial, &mut stored.serial, quality.serial);
    }
    if incoming.relation.is_some() {
        existing.relation_type = incoming.relation_type;
    }
    take_present(&mut existing.name, incoming.name, &mut stored.name, quality.name);
    take_present(&mut existing.relation, incoming.relation, &mut stored.relation, quality.relation);
    take_present(&mut existing.house, incoming.house, &mut stored.house, quality.house);
    take_present(&mut existing.age, incoming.age, &mut stored.age, quality.age);
    take_present(&mut existing.gender, incoming.gender, &mut stored.gender, quality.gender);

    if existing.anukramank.is_none() {
        existing.anukramank = incoming.anukramank;
    }
    existing.ward = incoming.ward.or(existing.ward.take());
    existing.booth = incoming.booth.or(existing.booth.take());
    existing.part_number = incoming.part_number.or(existing.part_number.take());
    existing.card_image = incoming.card_image.or(existing.card_image.take());
    existing.source = incoming.source.or(existing.source);
    if !incoming.merged_from.is_empty() {
        existing.merged_from = incoming.merged_from;
    }
    existing.refresh_quality();
}

fn take_present<T>(slot: &mut Option<T>, value: Option<T>, status: &mut FieldStatus, incoming: FieldStatus) {
    if value.is_some() {
        *slot = value;
        *status = incoming;
    }
}

/// A serial slot may be taken over unless both records carry different
/// valid voter IDs.
fn same_or_unknown_identity(existing: &VoterRecord, incoming: &VoterRecord) -> bool {
    !(existing.has_valid_voter_id()
        && incoming.has_valid_voter_id()
        && existing.voter_id != incoming.voter_id)
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

fn sanitize_operation(operation: &str) -> String {
    let cleaned = operation
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() {
                character.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect::<String>();
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() { "write".to_string() } else { trimmed.to_string() }
}

fn backup_millis(path: &Path) -> Option<i64> {
    path.file_name()?
        .to_string_lossy()
        .rsplit('-')
        .next()?
        .parse()
        .ok()
}
