use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write};

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::ExportArgs;
use crate::commands::search::select;
use crate::extract::numerals::to_devanagari;
use crate::model::{Gender, RelationType, VoterRecord};
use crate::store::Store;
use crate::util::ensure_directory;

const CARD_RULE: &str = "----------------------------------------";

pub fn run(args: ExportArgs) -> Result<()> {
    let store = Store::open(&args.store)?;
    let selected = select(store.records(), &args.filter);

    let mut cards = String::new();
    for record in &selected {
        cards.push_str(&render_card(record));
    }

    match &args.output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                ensure_directory(parent)?;
            }
            fs::write(path, cards.as_bytes())
                .with_context(|| format!("failed to write cards {}", path.display()))?;
            info!(path = %path.display(), cards = selected.len(), "wrote voter cards");
        }
        None => {
            let mut output = io::BufWriter::new(io::stdout().lock());
            output.write_all(cards.as_bytes())?;
            output.flush()?;
        }
    }
    Ok(())
}

/// One print-ready card with Marathi labels and Devanagari numerals. Absent
/// fields print as a blank line for hand entry.
pub fn render_card(record: &VoterRecord) -> String {
    let number = |value: Option<String>| value.map(|value| to_devanagari(&value)).unwrap_or_default();
    let relation_label = match record.relation_type {
        Some(RelationType::Husband) => "पतीचे नाव",
        Some(RelationType::Mother) => "आईचे नाव",
        Some(RelationType::Other) => "इतरांचे नाव",
        Some(RelationType::Father) | None => "वडिलांचे नाव",
    };
    let gender = match record.gender {
        Some(Gender::Male) => "पुरुष",
        Some(Gender::Female) => "स्त्री",
        None => "",
    };

    let mut card = String::new();
    let _ = writeln!(card, "{CARD_RULE}");
    let _ = writeln!(
        card,
        "अनुक्रमांक: {:<8} {}",
        number(record.anukramank.map(|value| value.to_string())),
        record.unique_serial.as_deref().unwrap_or_default()
    );
    let _ = writeln!(card, "मतदार ओळखपत्र: {}", record.voter_id.as_deref().unwrap_or_default());
    let _ = writeln!(card, "मतदाराचे पूर्ण नाव: {}", record.name.as_deref().unwrap_or_default());
    let _ = writeln!(card, "{relation_label}: {}", record.relation.as_deref().unwrap_or_default());
    let _ = writeln!(card, "घर क्रमांक: {}", record.house.as_deref().unwrap_or_default());
    let _ = writeln!(
        card,
        "वय: {:<6} लिंग: {gender}",
        number(record.age.map(|age| age.to_string()))
    );
    if record.pending_manual_entry {
        let _ = writeln!(card, "[तपासणी बाकी]");
    }
    card
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Age;

    #[test]
    fn card_uses_relation_label_and_devanagari_numbers() {
        let mut record = VoterRecord {
            voter_id: Some("XUA7224868".to_string()),
            serial: Some(5),
            anukramank: Some(12),
            ward: Some("7".to_string()),
            booth: Some("1".to_string()),
            name: Some("सीता शिंदे".to_string()),
            relation: Some("राम शिंदे".to_string()),
            relation_type: Some(RelationType::Husband),
            age: Age::new(82),
            gender: Some(Gender::Female),
            ..VoterRecord::default()
        };
        record.refresh_quality();

        let card = render_card(&record);
        assert!(card.contains("अनुक्रमांक: १२"));
        assert!(card.contains("W7F1-S5"));
        assert!(card.contains("पतीचे नाव: राम शिंदे"));
        assert!(card.contains("वय: ८२"));
        assert!(card.contains("लिंग: स्त्री"));
        assert!(card.contains("घर क्रमांक: \n"));
        assert!(!card.contains("तपासणी"));
    }

    #[test]
    fn pending_records_are_marked() {
        let mut record = VoterRecord::default();
        record.refresh_quality();
        assert!(render_card(&record).contains("[तपासणी बाकी]"));
    }
}
