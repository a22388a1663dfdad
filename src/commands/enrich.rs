use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::EnrichGenderArgs;
use crate::reconcile::{EnrichReport, enrich_genders};
use crate::store::{CommitSummary, Store};
use crate::util::write_json_stdout;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EnrichRunReport {
    /// Always "name-ending heuristic": these genders are guesses.
    method: &'static str,
    dry_run: bool,
    report: EnrichReport,
    commit: Option<CommitSummary>,
}

pub fn run(args: EnrichGenderArgs) -> Result<()> {
    warn!("gender enrichment guesses from name endings; filled values are marked inferred");
    let mut store = Store::open(&args.store)?;
    let report = enrich_genders(store.records_mut());

    let commit = if args.dry_run || report.filled == 0 {
        info!(filled = report.filled, "store not written");
        None
    } else {
        Some(store.commit("enrich-gender")?)
    };

    write_json_stdout(&EnrichRunReport {
        method: "name-ending heuristic",
        dry_run: args.dry_run,
        report,
        commit,
    })
}
