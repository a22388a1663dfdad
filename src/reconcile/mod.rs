//! Combining extraction passes and hand corrections into one record set.

pub mod correction;
pub mod enrich;
pub mod merge;
#[cfg(test)]
mod tests;

pub use correction::{Correction, CorrectionReport, apply_corrections, parse_batch};
pub use enrich::{EnrichReport, enrich_genders};
pub use merge::{MergeReport, SourceList, merge_sources};
