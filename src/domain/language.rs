use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Bn,
    En,
}

impl Language {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "bn" => Some(Self::Bn),
            "en" => Some(Self::En),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Bn => "bn",
            Self::En => "en",
        }
    }
}

/// Classify a story's script. Any character inside the Bengali Unicode
/// block (U+0980..=U+09FF) marks the whole text as Bengali; romanized
/// Banglish therefore classifies as `En`, matching the client's behavior.
pub fn detect_script(text: &str) -> Language {
    let is_bengali = text
        .chars()
        .any(|ch| ('\u{0980}'..='\u{09FF}').contains(&ch));
    if is_bengali {
        Language::Bn
    } else {
        Language::En
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bengali_script_detected() {
        assert_eq!(detect_script("আজকে খুব মজা হয়েছে"), Language::Bn);
    }

    #[test]
    fn latin_text_is_english() {
        assert_eq!(detect_script("cha thanda hoye gechhe"), Language::En);
    }

    #[test]
    fn single_bengali_char_wins() {
        assert_eq!(detect_script("abar গরম korte bolbo"), Language::Bn);
    }

    #[test]
    fn empty_text_defaults_to_english() {
        assert_eq!(detect_script(""), Language::En);
    }
}
