pub mod correct;
pub mod enrich;
pub mod export;
pub mod merge;
pub mod parse;
pub mod search;
pub mod status;
pub mod update;
