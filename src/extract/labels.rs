//! Label spellings seen on the printed rolls and in OCR output of them.
//!
//! Order matters: within each table the first matching entry wins, so longer
//! and more specific spellings come before their shorter fallbacks.

use crate::model::RelationType;

pub const NAME_LABELS: &[&str] = &[
    "मतदाराचे पूर्ण नांव",
    "मतदाराचे पूर्ण नाव",
    "मतदाराचें पूर्ण नांव",
    "मतदाराचे पुर्ण नांव",
    "मतदाराचे पुर्ण नाव",
    "मतदाराचे पूर्ण नाय",
    "मतदाराचे नांव",
    "मतदाराचे नाव",
    "पूर्ण नांव",
    "पूर्ण नाव",
];

pub const RELATION_LABELS: &[(RelationType, &str)] = &[
    (RelationType::Father, "वडिलांचे नांव"),
    (RelationType::Father, "वडिलांचे नाव"),
    (RelationType::Father, "वडीलांचे नाव"),
    (RelationType::Father, "वडिलांचें नाव"),
    (RelationType::Husband, "पतीचे नांव"),
    (RelationType::Husband, "पतीचे नाव"),
    (RelationType::Husband, "पतीचें नाव"),
    (RelationType::Mother, "आईचे नांव"),
    (RelationType::Mother, "आईचे नाव"),
    (RelationType::Other, "इतरांचे नाव"),
    (RelationType::Other, "इतर"),
];

pub const HOUSE_LABELS: &[&str] = &[
    "घर क्रमांक",
    "घर क्रमाक",
    "घर नंबर",
    "घर क्रं",
    "घर क्र",
];

pub const AGE_LABEL: &str = "वय";

pub const GENDER_LABEL: &str = "लिंग";

pub const MALE_TOKENS: &[&str] = &["पुरुष", "पुरूष", "पुरष", "पुरुश", "Male", "MALE", "पु"];

pub const FEMALE_TOKENS: &[&str] = &["स्त्री", "स्त्रि", "स्त्नी", "स्री", "Female", "FEMALE", "स्"];

/// Text printed inside a card that is never part of a field value.
pub const NOISE_MARKERS: &[&str] = &["छायाचित्र", "उपलब्ध", "Photo", "Available"];

/// Placeholders that mean "no value" in a house field.
pub const HOUSE_PLACEHOLDERS: &[&str] = &["-", "--", "NA", "N/A", "na", "n/a", "नाही"];

/// Given-name endings used only by the opt-in gender enrichment pass. Checked
/// longest first; a name matching none stays undecided.
pub const FEMALE_NAME_ENDINGS: &[&str] = &["बाई", "ताई", "देवी", "वती", "श्री", "ा", "ी"];

pub const MALE_NAME_ENDINGS: &[&str] = &["राव", "जी", "नाथ", "कुमार", "सिंग", "दास", "प्पा"];

/// Given names that end like a female name but belong to men.
pub const MALE_NAME_EXCEPTIONS: &[&str] = &[
    "कृष्णा", "रवी", "हरी", "मारुती", "गणपती", "बाळा", "दादा", "नाना", "आबा", "बापू", "तात्या",
    "भाऊ",
];
