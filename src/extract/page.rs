use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use super::fields::FieldExtractor;
use super::numerals::{self, to_arabic};
use super::record::{BlockInput, BoothLocation, RecordParser, normalize_location_segment};
use super::voter_id::VoterIdCheck;
use crate::model::{FieldStatus, Sample, SourceKind, VoterRecord};

/// Lines after an ID row that may still belong to its block.
pub const MAX_BLOCK_LINES: usize = 8;
pub const PAGE_BREAK: char = '\u{000C}';

const MAX_SAMPLES: usize = 20;
const MIN_ID_DIGITS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnLayout {
    #[default]
    Auto,
    Fixed(usize),
}

impl ColumnLayout {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "auto" => Some(Self::Auto),
            value => value
                .parse::<usize>()
                .ok()
                .filter(|count| *count > 0)
                .map(Self::Fixed),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ParseReport {
    pub pages: usize,
    pub empty_pages: usize,
    pub id_tokens: usize,
    pub candidates: usize,
    pub skipped_blocks: usize,
    pub ocr_failed_ids: usize,
    pub repaired_ids: usize,
    pub inferred_serials: usize,
    pub positional_pages: usize,
    pub multi_column_pages: usize,
    pub samples: Vec<Sample>,
}

impl ParseReport {
    fn sample(&mut self, location: String, detail: String) {
        if self.samples.len() < MAX_SAMPLES {
            self.samples.push(Sample { location, detail });
        }
    }

    pub fn absorb(&mut self, other: ParseReport) {
        self.pages += other.pages;
        self.empty_pages += other.empty_pages;
        self.id_tokens += other.id_tokens;
        self.candidates += other.candidates;
        self.skipped_blocks += other.skipped_blocks;
        self.ocr_failed_ids += other.ocr_failed_ids;
        self.repaired_ids += other.repaired_ids;
        self.inferred_serials += other.inferred_serials;
        self.positional_pages += other.positional_pages;
        self.multi_column_pages += other.multi_column_pages;
        for sample in other.samples {
            if self.samples.len() >= MAX_SAMPLES {
                break;
            }
            self.samples.push(sample);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DocumentParse {
    pub records: Vec<VoterRecord>,
    pub report: ParseReport,
}

/// One voter-ID-like token located on a line.
#[derive(Debug, Clone)]
struct IdHit {
    raw: String,
    serial: Option<u32>,
    part_number: Option<String>,
    /// Text in the same cell after the ID and part number.
    tail: String,
}

#[derive(Debug)]
struct IdRow {
    line_index: usize,
    hits: Vec<IdHit>,
}

pub struct PageParser {
    extractor: FieldExtractor,
    id_token: Regex,
    serial_suffix: Regex,
    part_number: Regex,
    column_gap: Regex,
    location_in_name: Regex,
}

impl PageParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            extractor: FieldExtractor::new()?,
            id_token: Regex::new(r"\b[A-Z][A-Z0-9]{2}[A-Z0-9]?[ \-]?[0-9०-९OIlSZBDQGT]{7}\b")
                .context("failed to compile voter id token regex")?,
            serial_suffix: Regex::new(r"(?:^|[^0-9०-९/])([0-9०-९]{1,4})\s*[|:.)\-]*\s*$")
                .context("failed to compile serial regex")?,
            part_number: Regex::new(
                r"([0-9०-९]{1,4})\s*/\s*([0-9०-९]{1,4})\s*/\s*([0-9०-९]{1,4})",
            )
            .context("failed to compile part number regex")?,
            column_gap: Regex::new(r"\t+| {3,}").context("failed to compile column gap regex")?,
            location_in_name: Regex::new(r"(?i)ward[_\- ]?([0-9०-९A-Za-z]+)[_\- ]+booth[_\- ]?([0-9०-९A-Za-z]+)")
                .context("failed to compile filename location regex")?,
        })
    }

    /// Reads `Ward_<n>_Booth_<m>` out of a source file name.
    pub fn location_from_path(&self, path: &Path) -> BoothLocation {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        match self.location_in_name.captures(&file_name) {
            Some(captures) => BoothLocation {
                ward: captures
                    .get(1)
                    .and_then(|value| normalize_location_segment(&to_arabic(value.as_str()))),
                booth: captures
                    .get(2)
                    .and_then(|value| normalize_location_segment(&to_arabic(value.as_str()))),
            },
            None => BoothLocation::default(),
        }
    }

    /// Splits the document on form feeds and parses it as one extraction pass.
    #[cfg(test)]
    pub fn parse_document(
        &self,
        text: &str,
        layout: ColumnLayout,
        method: SourceKind,
        fallback: &BoothLocation,
    ) -> DocumentParse {
        let mut page_texts = text.split(PAGE_BREAK).collect::<Vec<&str>>();
        if page_texts.len() > 1 && page_texts.last().is_some_and(|last| last.trim().is_empty()) {
            page_texts.pop();
        }
        self.parse_pages(
            page_texts.into_iter().map(|page| (page, method)),
            layout,
            fallback,
        )
    }

    /// Parses pages that may come from different extraction methods, then
    /// fills serial gaps and orders each page's candidates by serial.
    pub fn parse_pages<'t, I>(&self, pages: I, layout: ColumnLayout, fallback: &BoothLocation) -> DocumentParse
    where
        I: IntoIterator<Item = (&'t str, SourceKind)>,
    {
        let mut report = ParseReport::default();
        let mut parsed = Vec::<Vec<VoterRecord>>::new();

        for (page_index, (page_text, method)) in pages.into_iter().enumerate() {
            let (records, page_report) =
                self.parse_page(page_text, page_index + 1, layout, method, fallback);
            report.absorb(page_report);
            parsed.push(records);
        }

        report.inferred_serials = infer_missing_serials(&mut parsed);

        let mut records = Vec::<VoterRecord>::new();
        for mut page in parsed {
            page.sort_by_key(|record| record.serial.unwrap_or(u32::MAX));
            records.extend(page);
        }
        report.candidates = records.len();

        info!(
            pages = report.pages,
            id_tokens = report.id_tokens,
            candidates = report.candidates,
            skipped_blocks = report.skipped_blocks,
            ocr_failed_ids = report.ocr_failed_ids,
            "parsed document"
        );

        DocumentParse { records, report }
    }

    /// Candidates of one page in reading order.
    pub fn parse_page(
        &self,
        page_text: &str,
        page_number: usize,
        layout: ColumnLayout,
        method: SourceKind,
        fallback: &BoothLocation,
    ) -> (Vec<VoterRecord>, ParseReport) {
        let mut report = ParseReport {
            pages: 1,
            ..ParseReport::default()
        };
        let lines = page_text.lines().collect::<Vec<&str>>();
        let rows = self.locate_rows(&lines);

        if rows.is_empty() {
            if page_text.trim().is_empty() {
                report.empty_pages = 1;
            }
            debug!(page = page_number, "no voter id tokens on page");
            return (Vec::new(), report);
        }

        let detected = rows.iter().map(|row| row.hits.len()).max().unwrap_or(1);
        let columns = match layout {
            ColumnLayout::Auto => detected,
            ColumnLayout::Fixed(count) => count.max(1),
        };
        if columns > 1 {
            report.multi_column_pages = 1;
        }

        let mut blocks = self.column_blocks(&lines, &rows, columns);
        let page_names = self.extractor.name_label_starts(page_text).len();
        let block_names = blocks
            .iter()
            .filter(|(_, block)| !self.extractor.name_label_starts(&block.join("\n")).is_empty())
            .count();
        if block_names == 0 && page_names > 0 {
            report.positional_pages = 1;
            report.sample(
                format!("page {page_number}"),
                format!("{page_names} name labels paired positionally with {} ids", blocks.len()),
            );
            blocks = self.positional_blocks(&lines, &rows);
        }

        let parser = RecordParser::new(&self.extractor, method, fallback);
        let mut records = Vec::<VoterRecord>::new();
        for (hit, block_lines) in blocks {
            report.id_tokens += 1;
            let input = BlockInput {
                lines: block_lines,
                serial: hit.serial,
                raw_voter_id: Some(hit.raw.clone()),
                part_number: hit.part_number.clone(),
            };
            match parser.parse(&input) {
                Some(parsed) => {
                    match &parsed.id_check {
                        Some(VoterIdCheck::Invalid(raw)) => {
                            report.ocr_failed_ids += 1;
                            report.sample(format!("page {page_number}"), format!("unreadable voter id {raw}"));
                        }
                        Some(VoterIdCheck::Repaired { id, cleaned }) => {
                            report.repaired_ids += 1;
                            debug!(page = page_number, raw = %cleaned, repaired = %id, "repaired voter id");
                        }
                        _ => {}
                    }
                    records.push(parsed.record);
                }
                None => {
                    report.skipped_blocks += 1;
                    report.sample(
                        format!("page {page_number}"),
                        format!("block for {} yielded no candidate", hit.raw),
                    );
                }
            }
        }

        report.candidates = records.len();
        (records, report)
    }

    fn locate_rows(&self, lines: &[&str]) -> Vec<IdRow> {
        lines
            .iter()
            .enumerate()
            .filter_map(|(line_index, line)| {
                let hits = self.locate_hits(line);
                (!hits.is_empty()).then_some(IdRow { line_index, hits })
            })
            .collect()
    }

    fn locate_hits(&self, line: &str) -> Vec<IdHit> {
        let tokens = self
            .id_token
            .find_iter(line)
            .filter(|found| {
                found
                    .as_str()
                    .chars()
                    .filter(|character| numerals::is_digit(*character) || character.is_ascii_digit())
                    .count()
                    >= MIN_ID_DIGITS
            })
            .map(|found| (found.start(), found.end()))
            .collect::<Vec<(usize, usize)>>();

        // A cell starts at its serial when one precedes the token.
        let mut cell_starts = Vec::<usize>::with_capacity(tokens.len());
        let mut serials = Vec::<Option<u32>>::with_capacity(tokens.len());
        let mut previous_end = 0usize;
        for (start, end) in &tokens {
            let segment = &line[previous_end..*start];
            match self.serial_suffix.captures(segment).and_then(|captures| captures.get(1)) {
                Some(found) => {
                    cell_starts.push(previous_end + found.start());
                    serials.push(to_arabic(found.as_str()).parse::<u32>().ok());
                }
                None => {
                    cell_starts.push(*start);
                    serials.push(None);
                }
            }
            previous_end = *end;
        }

        tokens
            .iter()
            .enumerate()
            .map(|(index, (start, end))| {
                let cell_end = cell_starts.get(index + 1).copied().unwrap_or(line.len());
                let after = &line[*end..cell_end.max(*end)];
                let (part_number, tail) = match self.part_number.captures(after) {
                    Some(captures) => {
                        let whole = captures.get(0).map(|found| found.range()).unwrap_or(0..0);
                        let part = format!(
                            "{}/{}/{}",
                            to_arabic(&captures[1]),
                            to_arabic(&captures[2]),
                            to_arabic(&captures[3])
                        );
                        (Some(part), after[whole.end..].to_string())
                    }
                    None => (None, after.to_string()),
                };
                IdHit {
                    raw: line[*start..*end].to_string(),
                    serial: serials[index],
                    part_number,
                    tail: clean_cell(&tail),
                }
            })
            .collect()
    }

    /// Pairs every hit with the lines below its row, split into `columns`
    /// cells, up to the next ID row or `MAX_BLOCK_LINES`.
    fn column_blocks(&self, lines: &[&str], rows: &[IdRow], columns: usize) -> Vec<(IdHit, Vec<String>)> {
        let mut blocks = Vec::<(IdHit, Vec<String>)>::new();

        for (row_index, row) in rows.iter().enumerate() {
            let next_row = rows
                .get(row_index + 1)
                .map(|next| next.line_index)
                .unwrap_or(lines.len());
            let body_end = next_row.min(row.line_index + 1 + MAX_BLOCK_LINES);
            let row_columns = columns.max(row.hits.len());

            let mut cells = vec![Vec::<String>::new(); row.hits.len()];
            for (column, hit) in row.hits.iter().enumerate() {
                if !hit.tail.is_empty() {
                    cells[column].push(hit.tail.clone());
                }
            }

            for line in &lines[row.line_index + 1..body_end] {
                if line.trim().is_empty() {
                    continue;
                }
                let split = if row.hits.len() == 1 && row_columns == 1 {
                    vec![line.trim().to_string()]
                } else {
                    self.split_columns(line, row_columns)
                };
                for (column, cell) in split.into_iter().enumerate().take(row.hits.len()) {
                    if !cell.is_empty() {
                        cells[column].push(cell);
                    }
                }
            }

            for (hit, cell) in row.hits.iter().zip(cells) {
                blocks.push((hit.clone(), cell));
            }
        }

        blocks
    }

    /// Cuts the non-ID text of the page at each name label and pairs the
    /// pieces with the ID tokens by index.
    fn positional_blocks(&self, lines: &[&str], rows: &[IdRow]) -> Vec<(IdHit, Vec<String>)> {
        let id_lines = rows.iter().map(|row| row.line_index).collect::<Vec<usize>>();
        let body = lines
            .iter()
            .enumerate()
            .filter(|(index, _)| !id_lines.contains(index))
            .map(|(_, line)| *line)
            .collect::<Vec<&str>>()
            .join("\n");

        let mut starts = self.extractor.name_label_starts(&body);
        starts.push(body.len());
        let pieces = starts
            .windows(2)
            .map(|window| body[window[0]..window[1]].to_string())
            .collect::<Vec<String>>();

        rows.iter()
            .flat_map(|row| row.hits.iter().cloned())
            .enumerate()
            .map(|(index, hit)| {
                let lines = pieces
                    .get(index)
                    .map(|piece| {
                        piece
                            .lines()
                            .map(str::trim)
                            .filter(|line| !line.is_empty())
                            .map(str::to_string)
                            .collect::<Vec<String>>()
                    })
                    .unwrap_or_default();
                (hit, lines)
            })
            .collect()
    }

    /// Splits one body line into exactly `columns` cells: pipes first, then
    /// wide gaps, then repeated labels, then by position.
    pub fn split_columns(&self, line: &str, columns: usize) -> Vec<String> {
        if columns <= 1 {
            return vec![clean_cell(line)];
        }

        if line.contains('|') {
            let cells = line
                .split('|')
                .map(clean_cell)
                .collect::<Vec<String>>();
            let cells = trim_outer_empty(cells);
            if cells.len() == columns {
                return cells;
            }
        }

        let gap_cells = self
            .column_gap
            .split(line.trim())
            .map(clean_cell)
            .filter(|cell| !cell.is_empty())
            .collect::<Vec<String>>();
        if gap_cells.len() == columns {
            return gap_cells;
        }

        if let Some(cells) = self.split_at_repeated_label(line, columns) {
            return cells;
        }

        let mut cells = if gap_cells.is_empty() {
            vec![clean_cell(line)]
        } else {
            gap_cells
        };
        if cells.len() > columns {
            let overflow = cells.split_off(columns - 1).join(" ");
            cells.push(overflow);
        }
        cells.resize(columns, String::new());
        cells
    }

    fn split_at_repeated_label(&self, line: &str, columns: usize) -> Option<Vec<String>> {
        let anchors = self.extractor.label_anchors(line);
        let (_, first_key) = anchors.first()?;
        let starts = anchors
            .iter()
            .filter(|(_, key)| key == first_key)
            .map(|(start, _)| *start)
            .collect::<Vec<usize>>();
        if starts.len() != columns {
            return None;
        }

        let mut bounds = starts.clone();
        bounds[0] = 0;
        bounds.push(line.len());
        Some(
            bounds
                .windows(2)
                .map(|window| clean_cell(&line[window[0]..window[1]]))
                .collect(),
        )
    }
}

/// Gives every record without a printed serial the serial after the previous
/// record in reading order. Returns how many were filled.
fn infer_missing_serials(pages: &mut [Vec<VoterRecord>]) -> usize {
    let mut previous = None::<u32>;
    let mut inferred = 0usize;
    for record in pages.iter_mut().flat_map(|page| page.iter_mut()) {
        match (record.serial, previous) {
            (Some(serial), _) => previous = Some(serial),
            (None, Some(last)) => {
                record.serial = Some(last + 1);
                record.data_quality.serial = FieldStatus::Inferred;
                record.refresh_quality();
                previous = record.serial;
                inferred += 1;
            }
            (None, None) => {}
        }
    }
    inferred
}

fn clean_cell(cell: &str) -> String {
    cell.trim_matches(|character: char| character.is_whitespace() || character == '|')
        .to_string()
}

fn trim_outer_empty(mut cells: Vec<String>) -> Vec<String> {
    while cells.first().map(String::is_empty).unwrap_or(false) {
        cells.remove(0);
    }
    while cells.last().map(String::is_empty).unwrap_or(false) {
        cells.pop();
    }
    cells
}
