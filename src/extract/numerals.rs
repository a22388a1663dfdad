const DEVANAGARI_ZERO: u32 = 0x0966;
const DEVANAGARI_NINE: u32 = 0x096F;

/// Replaces Devanagari digits (U+0966..=U+096F) with ASCII digits. Every other
/// character is left untouched.
pub fn to_arabic(input: &str) -> String {
    input.chars().map(arabic_digit_or_self).collect()
}

fn arabic_digit_or_self(character: char) -> char {
    let code = character as u32;
    if (DEVANAGARI_ZERO..=DEVANAGARI_NINE).contains(&code) {
        char::from(b'0' + (code - DEVANAGARI_ZERO) as u8)
    } else {
        character
    }
}

/// ASCII digits to Devanagari, for printed output.
pub fn to_devanagari(input: &str) -> String {
    input
        .chars()
        .map(|character| match character.to_digit(10) {
            Some(value) if character.is_ascii_digit() => {
                char::from_u32(DEVANAGARI_ZERO + value).unwrap_or(character)
            }
            _ => character,
        })
        .collect()
}

pub fn is_digit(character: char) -> bool {
    character.is_ascii_digit() || (DEVANAGARI_ZERO..=DEVANAGARI_NINE).contains(&(character as u32))
}
