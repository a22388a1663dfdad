//! Shelling out to poppler and tesseract to turn a roll PDF into page text.

use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::OcrMode;
use crate::extract::page::PAGE_BREAK;
use crate::model::SourceKind;

/// Render resolution for OCR; Devanagari matras need more than the default.
const OCR_RENDER_DPI: &str = "300";

/// Page texts of one document with the method that produced each page.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedDocument {
    pub pages: Vec<String>,
    pub page_sources: Vec<SourceKind>,
    pub ocr_pages: usize,
    pub empty_pages: usize,
    pub warnings: Vec<String>,
}

impl ExtractedDocument {
    pub fn from_text(text: &str, source: SourceKind) -> Self {
        let mut pages = text
            .split(PAGE_BREAK)
            .map(|page| page.replace('\u{0000}', ""))
            .collect::<Vec<String>>();
        trim_trailing_empty_pages(&mut pages);
        Self {
            empty_pages: pages
                .iter()
                .filter(|page| non_whitespace_char_count(page) == 0)
                .count(),
            page_sources: vec![source; pages.len()],
            ocr_pages: if source == SourceKind::Ocr { pages.len() } else { 0 },
            pages,
            warnings: Vec::new(),
        }
    }

    pub fn page_inputs(&self) -> impl Iterator<Item = (&str, SourceKind)> {
        self.pages
            .iter()
            .map(String::as_str)
            .zip(self.page_sources.iter().copied())
    }

    /// The method that produced most pages; used to label the whole pass.
    pub fn dominant_source(&self) -> SourceKind {
        if self.ocr_pages * 2 > self.pages.len() {
            SourceKind::Ocr
        } else {
            SourceKind::PdfText
        }
    }
}

#[derive(Debug, Clone)]
pub struct PdfExtractOptions {
    pub ocr_mode: OcrMode,
    pub ocr_lang: String,
    pub ocr_min_text_chars: usize,
    pub max_pages: Option<usize>,
}

/// Reads a document as page text. `.txt` files are taken as already extracted
/// text (pages split on form feeds) from `text_source`; anything else goes
/// through pdftotext and, per `ocr_mode`, tesseract.
pub fn load_document(
    path: &Path,
    text_source: SourceKind,
    options: &PdfExtractOptions,
) -> Result<ExtractedDocument> {
    let is_pdf = path
        .extension()
        .map(|extension| extension.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);
    if !is_pdf {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read text source {}", path.display()))?;
        return Ok(ExtractedDocument::from_text(&text, text_source));
    }
    extract_pdf(path, options)
}

pub fn extract_pdf(pdf_path: &Path, options: &PdfExtractOptions) -> Result<ExtractedDocument> {
    let pages = match options.ocr_mode {
        OcrMode::Force => Vec::new(),
        _ => extract_pages_with_pdftotext(pdf_path, options.max_pages)?,
    };
    let page_count = match options.ocr_mode {
        OcrMode::Force => pdf_page_count(pdf_path, options.max_pages)?,
        _ => pages.len(),
    };

    let mut document = ExtractedDocument {
        pages: if pages.is_empty() { vec![String::new(); page_count] } else { pages },
        page_sources: vec![SourceKind::PdfText; page_count],
        ..ExtractedDocument::default()
    };

    let candidates = collect_ocr_candidates(&document.pages, options.ocr_mode, options.ocr_min_text_chars);
    if !candidates.is_empty() {
        if !command_available("pdftoppm") || !command_available("tesseract") {
            let message = format!(
                "OCR mode '{}' requested for {} pages but pdftoppm/tesseract are unavailable",
                options.ocr_mode.as_str(),
                candidates.len()
            );
            if matches!(options.ocr_mode, OcrMode::Force) {
                bail!(message);
            }
            warn!(path = %pdf_path.display(), "{message}");
            document.warnings.push(message);
        } else {
            for page_number in candidates {
                ocr_page_into(&mut document, pdf_path, page_number, options);
            }
        }
    }

    document.empty_pages = document
        .pages
        .iter()
        .filter(|page| non_whitespace_char_count(page) == 0)
        .count();
    info!(
        path = %pdf_path.display(),
        pages = document.pages.len(),
        ocr_pages = document.ocr_pages,
        empty_pages = document.empty_pages,
        "extracted document text"
    );
    Ok(document)
}

/// A failed or empty OCR page keeps whatever the text layer had; the parser
/// then finds no candidates there rather than the run failing.
fn ocr_page_into(
    document: &mut ExtractedDocument,
    pdf_path: &Path,
    page_number: usize,
    options: &PdfExtractOptions,
) {
    let page_index = page_number.saturating_sub(1);
    match extract_page_with_ocr(pdf_path, page_number, &options.ocr_lang) {
        Ok(text) if non_whitespace_char_count(&text) == 0 => {
            document.warnings.push(format!(
                "OCR text was empty for {} page {}",
                pdf_path.display(),
                page_number
            ));
        }
        Ok(text) => {
            if let Some(page) = document.pages.get_mut(page_index) {
                *page = text;
            }
            if let Some(source) = document.page_sources.get_mut(page_index) {
                *source = SourceKind::Ocr;
            }
            document.ocr_pages += 1;
        }
        Err(error) => {
            warn!(path = %pdf_path.display(), page = page_number, error = %error, "OCR failed");
            document.warnings.push(format!(
                "OCR failed for {} page {}: {}",
                pdf_path.display(),
                page_number,
                error
            ));
        }
    }
}

fn collect_ocr_candidates(pages: &[String], ocr_mode: OcrMode, min_text_chars: usize) -> Vec<usize> {
    match ocr_mode {
        OcrMode::Off => Vec::new(),
        OcrMode::Force => (1..=pages.len()).collect(),
        OcrMode::Auto => pages
            .iter()
            .enumerate()
            .filter_map(|(index, page)| {
                (non_whitespace_char_count(page) < min_text_chars).then_some(index + 1)
            })
            .collect(),
    }
}

fn extract_pages_with_pdftotext(pdf_path: &Path, max_pages: Option<usize>) -> Result<Vec<String>> {
    let mut command = Command::new("pdftotext");
    command.args(["-enc", "UTF-8", "-layout", "-f", "1"]);
    if let Some(max_pages) = max_pages {
        command.arg("-l").arg(max_pages.to_string());
    }
    command.arg(pdf_path).arg("-");

    let stdout = run_tool(&mut command, &pdf_path.display().to_string())?;
    let mut pages = tool_text(&stdout)
        .split(PAGE_BREAK)
        .map(str::to_string)
        .collect::<Vec<String>>();
    trim_trailing_empty_pages(&mut pages);
    Ok(pages)
}

fn pdf_page_count(pdf_path: &Path, max_pages: Option<usize>) -> Result<usize> {
    let stdout = run_tool(Command::new("pdfinfo").arg(pdf_path), &pdf_path.display().to_string())?;
    let pages = tool_text(&stdout)
        .lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .with_context(|| format!("pdfinfo reported no page count for {}", pdf_path.display()))?;
    Ok(max_pages.map(|limit| pages.min(limit)).unwrap_or(pages))
}

/// Renders one page into a scratch directory and reads it back with
/// tesseract. The directory is removed when `scratch` drops, on every path.
fn extract_page_with_ocr(pdf_path: &Path, page_number: usize, ocr_lang: &str) -> Result<String> {
    let scratch = tempfile::Builder::new()
        .prefix("voterroll-ocr-")
        .tempdir()
        .context("failed to create OCR scratch directory")?;
    let image_root = scratch.path().join(format!("page-{page_number}"));
    let image = image_root.with_extension("png");
    let page = page_number.to_string();
    let target = format!("{} page {page_number}", pdf_path.display());

    run_tool(
        Command::new("pdftoppm")
            .args(["-f", page.as_str(), "-l", page.as_str(), "-r", OCR_RENDER_DPI, "-singlefile", "-png"])
            .arg(pdf_path)
            .arg(&image_root),
        &target,
    )?;
    if !image.is_file() {
        bail!("pdftoppm produced no image for {target}");
    }

    // psm 6: a roll page is one uniform block of text cells.
    let text = run_tool(
        Command::new("tesseract")
            .arg(&image)
            .args(["stdout", "-l", ocr_lang, "--psm", "6"]),
        &target,
    )?;
    Ok(tool_text(&text).trim().to_string())
}

/// Runs an external tool and returns its stdout; a non-zero exit carries the
/// tool's stderr into the error.
fn run_tool(command: &mut Command, target: &str) -> Result<Vec<u8>> {
    let program = command.get_program().to_string_lossy().into_owned();
    let output = command
        .output()
        .with_context(|| format!("failed to execute {program} for {target}"))?;
    if !output.status.success() {
        bail!(
            "{program} exited with {} for {target}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output.stdout)
}

fn tool_text(stdout: &[u8]) -> String {
    String::from_utf8_lossy(stdout).replace('\u{0000}', "")
}

fn command_available(program: &str) -> bool {
    Command::new(program).arg("--version").output().is_ok()
}

fn non_whitespace_char_count(text: &str) -> usize {
    text.chars()
        .filter(|character| !character.is_whitespace())
        .count()
}

fn trim_trailing_empty_pages(pages: &mut Vec<String>) {
    while pages.len() > 1 && pages.last().is_some_and(|page| page.trim().is_empty()) {
        pages.pop();
    }
}
