use std::path::PathBuf;

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::{info, warn};

use crate::adapters::{PdfExtractOptions, load_document};
use crate::cli::ParseArgs;
use crate::extract::numerals::to_arabic;
use crate::extract::record::normalize_location_segment;
use crate::extract::{BoothLocation, PageParser, ParseReport};
use crate::model::SourceKind;
use crate::util::{now_utc_string, write_json_pretty, write_json_stdout};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ParseRunReport {
    generated_at: String,
    input: PathBuf,
    output: Option<PathBuf>,
    method: SourceKind,
    ocr_mode: &'static str,
    ocr_pages: usize,
    fallback_ward: Option<String>,
    fallback_booth: Option<String>,
    extraction_warnings: Vec<String>,
    parse: ParseReport,
}

pub fn run(args: ParseArgs) -> Result<()> {
    if !args.input.exists() {
        bail!("input not found: {}", args.input.display());
    }

    let parser = PageParser::new()?;
    let fallback = fallback_location(&parser, &args);
    if fallback.ward.is_none() || fallback.booth.is_none() {
        warn!(
            input = %args.input.display(),
            "no ward/booth fallback; records without a part number will lack uniqueSerial"
        );
    }

    let document = load_document(
        &args.input,
        args.text_source,
        &PdfExtractOptions {
            ocr_mode: args.ocr_mode,
            ocr_lang: args.ocr_lang.clone(),
            ocr_min_text_chars: args.ocr_min_text_chars,
            max_pages: args.max_pages,
        },
    )?;
    let parsed = parser.parse_pages(document.page_inputs(), args.columns, &fallback);

    match &args.output {
        Some(path) => {
            write_json_pretty(path, &parsed.records)?;
            info!(path = %path.display(), records = parsed.records.len(), "wrote candidate list");
        }
        None => write_json_stdout(&parsed.records)?,
    }

    let report = ParseRunReport {
        generated_at: now_utc_string(),
        input: args.input.clone(),
        output: args.output.clone(),
        method: document.dominant_source(),
        ocr_mode: args.ocr_mode.as_str(),
        ocr_pages: document.ocr_pages,
        fallback_ward: fallback.ward.clone(),
        fallback_booth: fallback.booth.clone(),
        extraction_warnings: document.warnings.clone(),
        parse: parsed.report,
    };
    if let Some(path) = &args.report_path {
        write_json_pretty(path, &report)?;
        info!(path = %path.display(), "wrote parse report");
    }

    info!(
        input = %args.input.display(),
        method = %report.method,
        pages = report.parse.pages,
        empty_pages = report.parse.empty_pages,
        candidates = report.parse.candidates,
        skipped_blocks = report.parse.skipped_blocks,
        ocr_failed_ids = report.parse.ocr_failed_ids,
        inferred_serials = report.parse.inferred_serials,
        "parse completed"
    );
    Ok(())
}

/// Operator-supplied ward/booth win over the file name.
fn fallback_location(parser: &PageParser, args: &ParseArgs) -> BoothLocation {
    let from_name = parser.location_from_path(&args.input);
    BoothLocation {
        ward: args
            .ward
            .as_deref()
            .and_then(|value| normalize_location_segment(&to_arabic(value)))
            .or(from_name.ward),
        booth: args
            .booth
            .as_deref()
            .and_then(|value| normalize_location_segment(&to_arabic(value)))
            .or(from_name.booth),
    }
}
