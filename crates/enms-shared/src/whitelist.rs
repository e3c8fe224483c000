//! Machine whitelist - the authoritative set of canonical machine names.
//!
//! Lookups are case-insensitive and separator-insensitive; results always
//! carry the canonical spelling. The whitelist itself is immutable: a refresh
//! builds a new one and swaps it into a [`WhitelistHandle`].

use std::sync::{Arc, RwLock};
use tracing::debug;

/// Default similarity (0-100) for "did you mean" suggestions
pub const DEFAULT_FUZZY_THRESHOLD: u8 = 80;

const NUMBER_WORDS: &[(&str, &str)] = &[
    ("zero", "0"),
    ("one", "1"),
    ("two", "2"),
    ("three", "3"),
    ("four", "4"),
    ("five", "5"),
    ("six", "6"),
    ("seven", "7"),
    ("eight", "8"),
    ("nine", "9"),
    ("ten", "10"),
    ("eleven", "11"),
    ("twelve", "12"),
    ("thirteen", "13"),
    ("fourteen", "14"),
    ("fifteen", "15"),
    ("sixteen", "16"),
    ("seventeen", "17"),
    ("eighteen", "18"),
    ("nineteen", "19"),
    ("twenty", "20"),
];

/// Lowercase, split on anything that is not alphanumeric and on
/// letter/digit boundaries, spell-out numbers as digits.
///
/// "Compressor-EU-1", "compressor eu one" and "compressor_eu1" all
/// normalize to `["compressor", "eu", "1"]`.
pub fn normalize_tokens(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut tokens = Vec::new();
    for word in lower.split(|c: char| !c.is_alphanumeric()) {
        let mut current = String::new();
        let mut prev_digit: Option<bool> = None;
        for ch in word.chars() {
            let is_digit = ch.is_ascii_digit();
            if prev_digit.is_some_and(|p| p != is_digit) && !current.is_empty() {
                tokens.push(number_word_to_digit(std::mem::take(&mut current)));
            }
            current.push(ch);
            prev_digit = Some(is_digit);
        }
        if !current.is_empty() {
            tokens.push(number_word_to_digit(current));
        }
    }
    tokens
}

fn number_word_to_digit(token: String) -> String {
    NUMBER_WORDS
        .iter()
        .find(|(word, _)| *word == token)
        .map(|(_, digit)| digit.to_string())
        .unwrap_or(token)
}

/// "3" or "three" -> 3
pub fn parse_number(word: &str) -> Option<u32> {
    let w = word.trim().to_lowercase();
    if let Ok(n) = w.parse() {
        return Some(n);
    }
    NUMBER_WORDS
        .iter()
        .find(|(name, _)| *name == w)
        .and_then(|(_, digit)| digit.parse().ok())
}

/// "compressors" -> "compressor"; leaves "press", "gas", "hvac" alone
fn singular(token: &str) -> &str {
    if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        &token[..token.len() - 1]
    } else {
        token
    }
}

/// Result of resolving one user-supplied machine token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineMatch {
    /// Case-insensitive equality with a canonical name
    Exact(String),
    /// Equal after normalization, or a unique prefix/type/substring match
    Normalized(String),
    /// Several names match at the same specificity
    Ambiguous(Vec<String>),
    /// No structural match, but one name is similar enough to suggest
    Fuzzy { suggestion: String, score: u8 },
    NotFound,
}

/// Machine reference found in free text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractedMachine {
    Canonical(String),
    /// Bare type word ("compressor") that maps to more than one machine
    TypeToken(String),
}

impl ExtractedMachine {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Canonical(s) | Self::TypeToken(s) => s,
        }
    }

    pub fn into_string(self) -> String {
        match self {
            Self::Canonical(s) | Self::TypeToken(s) => s,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    canonical: String,
    lower: String,
    tokens: Vec<String>,
    key: String,
}

#[derive(Debug, Clone)]
enum ScanHit {
    Full(String),
    Partial { phrase: String, names: Vec<String> },
}

/// Ordered, case-insensitively unique canonical machine names.
#[derive(Debug, Clone, Default)]
pub struct MachineWhitelist {
    entries: Vec<Entry>,
}

impl MachineWhitelist {
    /// Build from roster names. Blank names are dropped; a name equal to an
    /// earlier one ignoring case is dropped too (first spelling wins).
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries: Vec<Entry> = Vec::new();
        for name in names {
            let canonical = name.as_ref().trim();
            if canonical.is_empty() {
                continue;
            }
            let lower = canonical.to_lowercase();
            if entries.iter().any(|e| e.lower == lower) {
                debug!("Whitelist: dropping duplicate name {}", canonical);
                continue;
            }
            let tokens = normalize_tokens(canonical);
            let key = tokens.join(" ");
            entries.push(Entry {
                canonical: canonical.to_string(),
                lower,
                tokens,
                key,
            });
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.canonical.clone()).collect()
    }

    /// Canonical spelling for an exact (case-insensitive) name
    pub fn canonical(&self, name: &str) -> Option<&str> {
        let lower = name.trim().to_lowercase();
        self.entries
            .iter()
            .find(|e| e.lower == lower)
            .map(|e| e.canonical.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.canonical(name).is_some()
    }

    /// Resolve a machine token, most specific strategy first.
    pub fn lookup(&self, token: &str, fuzzy_threshold: u8) -> MachineMatch {
        let trimmed = token.trim();
        if trimmed.is_empty() || self.entries.is_empty() {
            return MachineMatch::NotFound;
        }
        if let Some(name) = self.canonical(trimmed) {
            return MachineMatch::Exact(name.to_string());
        }

        let query = normalize_tokens(trimmed);
        if query.is_empty() {
            return MachineMatch::NotFound;
        }
        let mut singular_query = query.clone();
        if let Some(last) = singular_query.last_mut() {
            *last = singular(last).to_string();
        }

        let structural = self
            .match_level(|e| e.tokens == query)
            .or_else(|| self.match_level(|e| e.tokens.starts_with(&query)))
            .or_else(|| self.match_level(|e| e.tokens.starts_with(&singular_query)))
            .or_else(|| {
                self.match_level(|e| {
                    contains_run(&e.tokens, &query)
                        || (e.tokens.len() > 1 && e.tokens[1..] == query[..])
                })
            });
        if let Some(found) = structural {
            return found;
        }

        self.fuzzy_match(&query.join(" "), fuzzy_threshold)
    }

    /// First machine referenced in `text`.
    ///
    /// A full canonical name anywhere in the text wins. Otherwise a partial
    /// reference (type word, optionally followed by more name tokens) is
    /// used: if it narrows to one machine that name is returned, if it
    /// still matches several the phrase itself is returned so that the
    /// validator has to disambiguate. Never silently picks one of many.
    pub fn extract_from_text(&self, text: &str) -> Option<ExtractedMachine> {
        let hits = self.scan(text);
        if let Some(name) = hits.iter().find_map(|h| match h {
            ScanHit::Full(name) => Some(name.clone()),
            ScanHit::Partial { .. } => None,
        }) {
            return Some(ExtractedMachine::Canonical(name));
        }
        hits.into_iter().find_map(|h| match h {
            ScanHit::Partial { phrase, mut names } => Some(if names.len() == 1 {
                ExtractedMachine::Canonical(names.remove(0))
            } else {
                ExtractedMachine::TypeToken(phrase)
            }),
            ScanHit::Full(_) => None,
        })
    }

    /// Every distinct machine reference in `text`, in order of appearance
    pub fn extract_all(&self, text: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for hit in self.scan(text) {
            let value = match hit {
                ScanHit::Full(name) => name,
                ScanHit::Partial { phrase, mut names } => {
                    if names.len() == 1 {
                        names.remove(0)
                    } else {
                        phrase
                    }
                }
            };
            if !out.iter().any(|v| v.eq_ignore_ascii_case(&value)) {
                out.push(value);
            }
        }
        out
    }

    fn match_level(&self, pred: impl Fn(&Entry) -> bool) -> Option<MachineMatch> {
        let mut hits: Vec<String> = self
            .entries
            .iter()
            .filter(|e| pred(e))
            .map(|e| e.canonical.clone())
            .collect();
        match hits.len() {
            0 => None,
            1 => Some(MachineMatch::Normalized(hits.remove(0))),
            _ => Some(MachineMatch::Ambiguous(hits)),
        }
    }

    fn fuzzy_match(&self, query: &str, threshold: u8) -> MachineMatch {
        let mut best: u8 = 0;
        let mut hits: Vec<String> = Vec::new();
        for e in &self.entries {
            let score = (strsim::normalized_levenshtein(query, &e.key) * 100.0).round() as u8;
            if score > best {
                best = score;
                hits.clear();
                hits.push(e.canonical.clone());
            } else if score == best && score > 0 {
                hits.push(e.canonical.clone());
            }
        }
        if best < threshold || hits.is_empty() {
            return MachineMatch::NotFound;
        }
        if hits.len() == 1 {
            MachineMatch::Fuzzy {
                suggestion: hits.remove(0),
                score: best,
            }
        } else {
            MachineMatch::Ambiguous(hits)
        }
    }

    fn scan(&self, text: &str) -> Vec<ScanHit> {
        let tokens = normalize_tokens(text);
        let mut hits = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            let rest = &tokens[i..];

            // Longest full name starting here; ties keep whitelist order
            if let Some(e) = self
                .entries
                .iter()
                .filter(|e| !e.tokens.is_empty() && rest.starts_with(&e.tokens))
                .min_by_key(|e| std::cmp::Reverse(e.tokens.len()))
            {
                hits.push(ScanHit::Full(e.canonical.clone()));
                i += e.tokens.len();
                continue;
            }

            // Longest run of leading name tokens, type word first
            let mut matched: Option<(usize, Vec<String>)> = None;
            for k in 1..=rest.len() {
                let names: Vec<String> = self
                    .entries
                    .iter()
                    .filter(|e| partial_prefix(&e.tokens, &rest[..k]))
                    .map(|e| e.canonical.clone())
                    .collect();
                if names.is_empty() {
                    break;
                }
                matched = Some((k, names));
            }
            match matched {
                Some((k, names)) => {
                    let mut words: Vec<&str> = rest[..k].iter().map(String::as_str).collect();
                    if k == 1 {
                        words[0] = singular(words[0]);
                    }
                    hits.push(ScanHit::Partial {
                        phrase: words.join(" "),
                        names,
                    });
                    i += k;
                }
                None => i += 1,
            }
        }
        hits
    }
}

/// `probe` is a strict prefix of `name`, tolerating a plural first word
fn partial_prefix(name: &[String], probe: &[String]) -> bool {
    if probe.is_empty() || probe.len() >= name.len() {
        return false;
    }
    if probe.len() == 1 {
        return singular(&name[0]) == singular(&probe[0]);
    }
    name.starts_with(probe)
}

fn contains_run(haystack: &[String], needle: &[String]) -> bool {
    !needle.is_empty()
        && needle.len() <= haystack.len()
        && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Shared slot holding the current whitelist snapshot.
///
/// Readers clone the `Arc` and work on a consistent snapshot; a refresh
/// replaces the whole `Arc` under one write, so nobody ever observes a
/// half-updated list.
#[derive(Debug, Default)]
pub struct WhitelistHandle {
    inner: RwLock<Arc<MachineWhitelist>>,
}

impl WhitelistHandle {
    pub fn new(whitelist: MachineWhitelist) -> Self {
        Self {
            inner: RwLock::new(Arc::new(whitelist)),
        }
    }

    pub fn snapshot(&self) -> Arc<MachineWhitelist> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn store(&self, whitelist: Arc<MachineWhitelist>) {
        match self.inner.write() {
            Ok(mut guard) => *guard = whitelist,
            Err(poisoned) => *poisoned.into_inner() = whitelist,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tokens() {
        assert_eq!(normalize_tokens("Compressor-EU-1"), vec!["compressor", "eu", "1"]);
        assert_eq!(normalize_tokens("compressor eu one"), vec!["compressor", "eu", "1"]);
        assert_eq!(normalize_tokens("compressor_eu1"), vec!["compressor", "eu", "1"]);
        assert!(normalize_tokens(" -- ").is_empty());
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("3"), Some(3));
        assert_eq!(parse_number("Seven"), Some(7));
        assert_eq!(parse_number("lots"), None);
    }

    #[test]
    fn test_singular() {
        assert_eq!(singular("compressors"), "compressor");
        assert_eq!(singular("press"), "press");
        assert_eq!(singular("gas"), "gas");
    }

    #[test]
    fn test_duplicates_keep_first_spelling() {
        let wl = MachineWhitelist::new(["Boiler-1", "BOILER-1", " ", "Chiller-2"]);
        assert_eq!(wl.names(), vec!["Boiler-1", "Chiller-2"]);
    }
}
