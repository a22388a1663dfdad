use super::numerals::to_arabic;

const PREFIX_LETTERS: usize = 3;
const ID_DIGITS: usize = 7;

/// Characters that OCR returns in the digit zone of an ID in place of the
/// digit they resemble.
const DIGIT_FOR_LETTER: &[(char, char)] = &[
    ('O', '0'),
    ('D', '0'),
    ('Q', '0'),
    ('I', '1'),
    ('L', '1'),
    ('Z', '2'),
    ('S', '5'),
    ('G', '6'),
    ('T', '7'),
    ('B', '8'),
];

/// Digits that OCR returns in the letter prefix in place of the letter they
/// resemble.
const LETTER_FOR_DIGIT: &[(char, char)] = &[
    ('0', 'O'),
    ('1', 'I'),
    ('2', 'Z'),
    ('4', 'A'),
    ('5', 'S'),
    ('6', 'G'),
    ('8', 'B'),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoterIdCheck {
    /// Matched the grammar after cleanup alone.
    Valid(String),
    /// Matched only after the confusion table was applied.
    Repaired { id: String, cleaned: String },
    /// No match; carries the cleaned token so callers can keep it.
    Invalid(String),
}

impl VoterIdCheck {
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Valid(id) | Self::Repaired { id, .. } => Some(id),
            Self::Invalid(_) => None,
        }
    }

    /// The value to store: the normalized ID, or the cleaned raw token.
    pub fn into_stored(self) -> String {
        match self {
            Self::Valid(id) | Self::Repaired { id, .. } => id,
            Self::Invalid(raw) => raw,
        }
    }
}

/// `^[A-Z]{3}[A-B]?\d{7}$`
pub fn is_valid(candidate: &str) -> bool {
    let bytes = candidate.as_bytes();
    let prefix_len = match bytes.len() {
        10 => PREFIX_LETTERS,
        11 => PREFIX_LETTERS + 1,
        _ => return false,
    };

    bytes[..PREFIX_LETTERS].iter().all(u8::is_ascii_uppercase)
        && (prefix_len == PREFIX_LETTERS || matches!(bytes[PREFIX_LETTERS], b'A' | b'B'))
        && bytes[prefix_len..].iter().all(u8::is_ascii_digit)
        && bytes.len() - prefix_len == ID_DIGITS
}

pub fn normalize(raw: &str) -> VoterIdCheck {
    let cleaned = clean(raw);
    if is_valid(&cleaned) {
        return VoterIdCheck::Valid(cleaned);
    }

    if !zones_interleaved(&cleaned) {
        return VoterIdCheck::Invalid(cleaned);
    }

    match repair(&cleaned) {
        Some(id) => VoterIdCheck::Repaired { id, cleaned },
        None => VoterIdCheck::Invalid(cleaned),
    }
}

pub fn normalize_id(raw: &str) -> Option<String> {
    normalize(raw).id().map(str::to_string)
}

fn clean(raw: &str) -> String {
    to_arabic(raw)
        .chars()
        .filter(|character| {
            !character.is_whitespace() && !matches!(character, '-' | '–' | '—' | '|' | '.' | '_')
        })
        .collect::<String>()
        .to_ascii_uppercase()
}

/// A token that is already `letters then digits` is never repaired: a wrong
/// digit count there is a real rejection, not an OCR confusion.
fn zones_interleaved(cleaned: &str) -> bool {
    let letters = cleaned
        .chars()
        .take_while(|character| character.is_ascii_alphabetic())
        .count();
    !cleaned
        .chars()
        .skip(letters)
        .all(|character| character.is_ascii_digit())
}

fn repair(cleaned: &str) -> Option<String> {
    let characters = cleaned.chars().collect::<Vec<char>>();
    let prefix_len = match characters.len() {
        10 => PREFIX_LETTERS,
        11 => PREFIX_LETTERS + 1,
        _ => return None,
    };

    let mut repaired = String::with_capacity(characters.len());
    for (index, character) in characters.iter().copied().enumerate() {
        let fixed = if index < prefix_len {
            lookup(LETTER_FOR_DIGIT, character)
        } else {
            lookup(DIGIT_FOR_LETTER, character)
        };
        repaired.push(fixed);
    }

    if is_valid(&repaired) {
        Some(repaired)
    } else {
        None
    }
}

fn lookup(table: &[(char, char)], character: char) -> char {
    table
        .iter()
        .find(|(from, _)| *from == character)
        .map(|(_, to)| *to)
        .unwrap_or(character)
}
