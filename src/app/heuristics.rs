use crate::domain::moderation::Decision;

/// Hard-disallowed vocabulary: explicit sexual, violent or exploitative
/// terms. A single match forces a reject, no matter what the AI later says.
const HARD_TERMS: &[&str] = &[
    "porn",
    "pornography",
    "nude",
    "xxx",
    "rape",
    "dhorshon",
    "chudachudi",
    "khanki",
    "magi",
    "sex video",
    "child abuse",
];

/// Culturally ambiguous profanity. Strong enough to need a second look,
/// not strong enough to reject outright.
const CONTEXTUAL_TERMS: &[&str] = &[
    "shala",
    "shali",
    "haramjada",
    "haramzada",
    "kutta",
    "kuttar baccha",
    "baal",
    "faltu maal",
];

/// Playful cultural insults that show up constantly in banter.
const MILD_TERMS: &[&str] = &[
    "pagol",
    "pagli",
    "gadha",
    "boka",
    "abal",
    "bekub",
    "hadaram",
    "bedob",
];

const HARD_SEVERITY: i32 = 4;
const CONTEXTUAL_SEVERITY: i32 = 2;
const MILD_SEVERITY: i32 = 1;

const REJECT_THRESHOLD: i32 = 5;
const PENDING_THRESHOLD: i32 = 2;

/// Word count under which a lone mild-slang hit reads as banter.
const PLAYFUL_WORD_LIMIT: usize = 25;

const MAX_STORY_CHARS: usize = 1000;

#[derive(Debug, Clone)]
pub struct HeuristicReport {
    pub flags: Vec<String>,
    pub severity: i32,
    pub decision: Decision,
    pub reason: String,
}

impl HeuristicReport {
    pub fn has_hard_flag(&self) -> bool {
        self.flags.iter().any(|flag| flag.starts_with("hard:"))
    }
}

/// Keyword and pattern severity scan over a submitted story. Pure and
/// deterministic: no I/O, result depends only on the term lists above.
pub fn scan(text: &str) -> HeuristicReport {
    let normalized = text.to_lowercase();
    let tokens: Vec<&str> = normalized
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect();

    let mut flags = Vec::new();
    let mut severity = 0;

    for term in HARD_TERMS {
        if term_matches(&normalized, &tokens, term) {
            severity += HARD_SEVERITY;
            flags.push(format!("hard:{}", term));
        }
    }
    for term in CONTEXTUAL_TERMS {
        if term_matches(&normalized, &tokens, term) {
            severity += CONTEXTUAL_SEVERITY;
            flags.push(format!("ctx:{}", term));
        }
    }
    for term in MILD_TERMS {
        if term_matches(&normalized, &tokens, term) {
            severity += MILD_SEVERITY;
            flags.push(format!("mild:{}", term));
        }
    }

    if count_links(&normalized) > 2 {
        severity += 2;
        flags.push("spam:links".to_string());
    }
    if has_long_repeat(&normalized) {
        severity += 2;
        flags.push("spam:repeat".to_string());
    }
    // Latent dead branch: submissions are capped at 1000 characters before
    // they ever reach the scanner, so this only fires for direct callers.
    if text.chars().count() > MAX_STORY_CHARS {
        severity += 1;
        flags.push("spam:length".to_string());
    }

    let word_count = tokens.len();
    let has_hard = flags.iter().any(|flag| flag.starts_with("hard:"));

    let (decision, reason) = if has_hard || severity >= REJECT_THRESHOLD {
        (
            Decision::Reject,
            "contains disallowed content".to_string(),
        )
    } else if severity >= PENDING_THRESHOLD {
        (Decision::Pending, "flagged terms need review".to_string())
    } else if severity == MILD_SEVERITY {
        let reason = if word_count < PLAYFUL_WORD_LIMIT {
            "mild slang, likely playful".to_string()
        } else {
            "mild slang in a longer story".to_string()
        };
        (Decision::Pending, reason)
    } else {
        (Decision::Approve, "clean".to_string())
    };

    HeuristicReport {
        flags,
        severity,
        decision,
        reason,
    }
}

/// Single-word terms match whole tokens only (so "therapeutic" never trips
/// the "rape" filter); multi-word phrases match as substrings.
fn term_matches(normalized: &str, tokens: &[&str], term: &str) -> bool {
    if term.contains(' ') {
        normalized.contains(term)
    } else {
        tokens.contains(&term)
    }
}

/// One count per URL start: a `www.` directly after a scheme's `//` is the
/// same link, not a second one.
fn count_links(normalized: &str) -> usize {
    let scheme_hits =
        normalized.matches("http://").count() + normalized.matches("https://").count();
    let bare_www = normalized
        .match_indices("www.")
        .filter(|(index, _)| !normalized[..*index].ends_with("//"))
        .count();
    scheme_hits + bare_www
}

fn has_long_repeat(normalized: &str) -> bool {
    let mut last: Option<char> = None;
    let mut run = 0;
    for ch in normalized.chars() {
        if Some(ch) == last {
            run += 1;
            if run >= 7 {
                return true;
            }
        } else {
            last = Some(ch);
            run = 1;
        }
    }
    false
}
