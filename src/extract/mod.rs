//! Turning raw PDF-text or OCR output of a roll into candidate records.

pub mod fields;
pub mod labels;
pub mod numerals;
pub mod page;
pub mod record;
pub mod voter_id;

pub use page::{ColumnLayout, PageParser, ParseReport};
pub use record::BoothLocation;
