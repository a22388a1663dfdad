use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::extract::ColumnLayout;
use crate::model::{Gender, SourceKind};

#[derive(Parser, Debug)]
#[command(
    name = "voterroll",
    version,
    about = "Marathi electoral-roll extraction, reconciliation and correction tooling"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract candidate records from roll text or a roll PDF.
    Parse(ParseArgs),
    /// Merge candidate lists from several extraction passes into the Store.
    Merge(MergeArgs),
    /// Apply a batch of hand-entered corrections to the Store.
    Correct(CorrectArgs),
    /// Patch a single record, keyed by voter ID.
    Update(UpdateArgs),
    Search(SearchArgs),
    /// Print voter cards for a filtered set of records.
    Export(ExportArgs),
    Status(StatusArgs),
    /// Fill absent genders from name endings, marking them inferred.
    EnrichGender(EnrichGenderArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ParseArgs {
    /// `.pdf` goes through pdftotext/tesseract; anything else is read as text.
    #[arg(long)]
    pub input: PathBuf,

    /// Candidate list destination; stdout when omitted.
    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub report_path: Option<PathBuf>,

    /// Which pass produced a text input.
    #[arg(long, value_enum, default_value_t = SourceKind::PdfText)]
    pub text_source: SourceKind,

    /// `auto` or a fixed number of record columns per row.
    #[arg(long, default_value = "auto", value_parser = parse_columns)]
    pub columns: ColumnLayout,

    /// Ward used when a block carries no part number.
    #[arg(long)]
    pub ward: Option<String>,

    #[arg(long)]
    pub booth: Option<String>,

    #[arg(long)]
    pub max_pages: Option<usize>,

    #[arg(long, value_enum, default_value_t = OcrMode::Off)]
    pub ocr_mode: OcrMode,

    #[arg(long, default_value = "mar")]
    pub ocr_lang: String,

    #[arg(long, default_value_t = 120)]
    pub ocr_min_text_chars: usize,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OcrMode {
    Off,
    Auto,
    Force,
}

impl OcrMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Auto => "auto",
            Self::Force => "force",
        }
    }
}

/// A candidate list file tagged with the pass that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub kind: SourceKind,
    pub path: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct MergeArgs {
    #[arg(long, default_value = "voters.json")]
    pub store: PathBuf,

    /// `<kind>:<file>`, e.g. `pdf-text:ward7.json` or `ocr:ward7-ocr.json`.
    #[arg(long = "source", required = true, value_parser = parse_source_spec)]
    pub sources: Vec<SourceSpec>,

    /// Supersede each touched booth instead of upserting into it. Without
    /// this flag the Store's records for the touched booths take part in the
    /// merge as a `prior-store` list.
    #[arg(long, default_value_t = false)]
    pub replace_booth: bool,

    #[arg(long)]
    pub report_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CorrectArgs {
    #[arg(long, default_value = "voters.json")]
    pub store: PathBuf,

    /// JSON array of corrections.
    #[arg(long)]
    pub batch: PathBuf,

    /// Where the per-record change log goes; defaults next to the batch file.
    #[arg(long)]
    pub change_log: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct UpdateArgs {
    #[arg(long, default_value = "voters.json")]
    pub store: PathBuf,

    #[arg(long)]
    pub voter_id: String,

    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub relation: Option<String>,

    #[arg(long)]
    pub house: Option<String>,

    #[arg(long)]
    pub age: Option<String>,

    #[arg(long)]
    pub gender: Option<String>,

    /// Field to blank out (name, relation, house, age, gender).
    #[arg(long = "clear")]
    pub clear: Vec<String>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RecordFilter {
    #[arg(long)]
    pub ward: Option<String>,

    #[arg(long)]
    pub booth: Option<String>,

    #[arg(long, value_parser = parse_gender)]
    pub gender: Option<Gender>,

    #[arg(long)]
    pub min_age: Option<u8>,

    #[arg(long)]
    pub max_age: Option<u8>,

    /// Matched against name, voter ID and serial; Devanagari digits allowed.
    #[arg(long)]
    pub query: Option<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    #[arg(long, default_value = "voters.json")]
    pub store: PathBuf,

    #[command(flatten)]
    pub filter: RecordFilter,

    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    #[arg(long, default_value_t = 50)]
    pub limit: usize,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    #[arg(long, default_value = "voters.json")]
    pub store: PathBuf,

    #[command(flatten)]
    pub filter: RecordFilter,

    /// Cards file; stdout when omitted.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = "voters.json")]
    pub store: PathBuf,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct EnrichGenderArgs {
    #[arg(long, default_value = "voters.json")]
    pub store: PathBuf,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

fn parse_columns(raw: &str) -> Result<ColumnLayout, String> {
    ColumnLayout::parse(raw).ok_or_else(|| format!("expected `auto` or a column count, got `{raw}`"))
}

fn parse_source_spec(raw: &str) -> Result<SourceSpec, String> {
    let (kind, path) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `<kind>:<file>`, got `{raw}`"))?;
    let kind = SourceKind::parse(kind)
        .ok_or_else(|| format!("unknown source kind `{kind}` (pdf-text, ocr, manual, prior-store)"))?;
    if path.trim().is_empty() {
        return Err(format!("missing file in `{raw}`"));
    }
    Ok(SourceSpec {
        kind,
        path: PathBuf::from(path),
    })
}

fn parse_gender(raw: &str) -> Result<Gender, String> {
    Gender::parse(raw).ok_or_else(|| format!("expected M or F, got `{raw}`"))
}
