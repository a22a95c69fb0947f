//! # Multi-dictionary query engine
//!
//! [`Library`] owns an ordered collection of [`Dict`]s and dispatches queries
//! across them: exact lookup with an English morphological fallback, bounded
//! n-best fuzzy lookup, `*`/`?` pattern lookup, and full-text search over
//! article bodies. [`analyze_query`] classifies a raw user string into one of
//! those four shapes.
//!
//! Per-query failures never abort a batch: a dictionary that fails mid-query
//! is logged and skipped, and the remaining dictionaries still answer.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::PathBuf;

use log::warn;

use crate::distance::EditDistance;
use crate::glob::GlobPattern;
use crate::stardict::error::Result;
use crate::stardict::utils::{is_pure_english, is_vowel, lowercase_chars, stardict_strcmp};
use crate::stardict::Dict;

/// Ceiling for the fuzzy edit distance.
pub const MAX_FUZZY_DISTANCE: usize = 3;

/// Pattern matches collected per dictionary before truncation.
pub const MAX_MATCH_ITEM_PER_LIB: usize = 1024;

/// What kind of query a user string is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Simple,
    Fuzzy,
    Regexp,
    Data,
}

/// Classify a query string and strip its syntax.
///
/// A leading `/` selects fuzzy and `|` body search, each keeping the rest of
/// the string verbatim. Otherwise a backslash escapes (and is removed before)
/// any single character, and an unescaped `*` or `?` selects pattern lookup.
pub fn analyze_query(query: &str) -> (QueryType, String) {
    if query.is_empty() {
        return (QueryType::Simple, String::new());
    }
    if let Some(rest) = query.strip_prefix('/') {
        return (QueryType::Fuzzy, rest.to_string());
    }
    if let Some(rest) = query.strip_prefix('|') {
        return (QueryType::Data, rest.to_string());
    }

    let mut payload = String::with_capacity(query.len());
    let mut is_pattern = false;
    let mut chars = query.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(escaped) => payload.push(escaped),
                None => break,
            }
            continue;
        }
        if c == '*' || c == '?' {
            is_pattern = true;
        }
        payload.push(c);
    }
    let kind = if is_pattern {
        QueryType::Regexp
    } else {
        QueryType::Simple
    };
    (kind, payload)
}

struct FuzzySlot {
    word: Option<String>,
    distance: usize,
}

/// An ordered collection of dictionaries and the query policy shared by all
/// of them.
pub struct Library {
    dicts: Vec<Dict>,
    fuzzy: bool,
    max_fuzzy_distance: usize,
    progress: Option<Box<dyn Fn()>>,
}

impl Library {
    /// `fuzzy` enables the morphological fallback after failed exact lookups.
    pub fn new(fuzzy: bool) -> Library {
        Library {
            dicts: Vec::new(),
            fuzzy,
            max_fuzzy_distance: MAX_FUZZY_DISTANCE,
            progress: None,
        }
    }

    /// Install a callback invoked at each dictionary boundary during fuzzy,
    /// pattern and body-search scans (e.g. for a UI repaint).
    pub fn set_progress_callback(&mut self, callback: Option<Box<dyn Fn()>>) {
        self.progress = callback;
    }

    /// Load every `.ifo` in order. A dictionary that fails to load is logged
    /// and skipped; the library continues with the others.
    pub fn load(&mut self, ifo_files: &[PathBuf], verbose: bool) {
        for path in ifo_files {
            match Dict::load(path, verbose) {
                Ok(dict) => self.dicts.push(dict),
                Err(e) => warn!("skipping dictionary {}: {}", path.display(), e),
            }
        }
    }

    pub fn ndicts(&self) -> usize {
        self.dicts.len()
    }

    pub fn dict_name(&self, lib: usize) -> &str {
        self.dicts[lib].book_name()
    }

    pub fn narticles(&self, lib: usize) -> usize {
        self.dicts[lib].word_count()
    }

    /// Headword `idx` of dictionary `lib`.
    pub fn word(&mut self, idx: usize, lib: usize) -> Result<String> {
        self.dicts[lib].key(idx).map(str::to_owned)
    }

    /// Canonical article record for headword `idx` of dictionary `lib`.
    pub fn word_data(&mut self, idx: usize, lib: usize) -> Result<Vec<u8>> {
        self.dicts[lib].article(idx).map(<[u8]>::to_vec)
    }

    /// Exact lookup in one dictionary, falling back on case and English
    /// suffix variants when enabled and nothing matched.
    pub fn lookup_simple(&mut self, word: &str, hits: &mut BTreeSet<usize>, lib: usize) -> bool {
        let dict = &mut self.dicts[lib];
        let mut found = try_lookup(dict, word, hits);
        if !found && self.fuzzy {
            found = lookup_similar(dict, word, hits);
        }
        found
    }

    /// Bounded n-best fuzzy lookup over every headword of every dictionary.
    ///
    /// Returns `reslist_size` slots sorted by distance then headword order;
    /// slots that never filled stay `None`.
    pub fn lookup_fuzzy(&mut self, word: &str, reslist_size: usize) -> Vec<Option<String>> {
        let mut slots: Vec<FuzzySlot> = (0..reslist_size)
            .map(|_| FuzzySlot {
                word: None,
                distance: self.max_fuzzy_distance,
            })
            .collect();
        if word.is_empty() || reslist_size == 0 {
            return slots.into_iter().map(|slot| slot.word).collect();
        }

        let mut query: Vec<char> = word.chars().collect();
        lowercase_chars(&mut query);
        let query_len = query.len();
        let mut ceiling = self.max_fuzzy_distance;
        let mut calculator = EditDistance::new();
        let mut candidate: Vec<char> = Vec::new();
        let mut found = false;

        for lib in 0..self.dicts.len() {
            if let Some(callback) = &self.progress {
                callback();
            }
            let dict = &mut self.dicts[lib];
            for index in 0..dict.word_count() {
                let key = match dict.key(index) {
                    Ok(key) => key,
                    Err(e) => {
                        warn!("fuzzy scan failed in {}: {}", dict.book_name(), e);
                        break;
                    }
                };
                candidate.clear();
                candidate.extend(key.chars());
                // skip words whose length alone puts them out of reach
                if candidate.len().abs_diff(query_len) >= ceiling {
                    continue;
                }
                // trailing text beyond the query length is ignored
                if candidate.len() > query_len {
                    candidate.truncate(query_len);
                }
                lowercase_chars(&mut candidate);
                let distance = calculator.distance(&candidate, &query, ceiling);
                if distance >= ceiling || distance >= query_len {
                    continue;
                }
                found = true;

                let mut already_listed = false;
                // the admission test guarantees some slot sits at the ceiling
                let mut replace_at = 0;
                for (slot_idx, slot) in slots.iter().enumerate() {
                    if let Some(listed) = &slot.word {
                        if listed == key {
                            already_listed = true;
                            break;
                        }
                    }
                    if slot.distance == ceiling {
                        replace_at = slot_idx;
                    }
                }
                if !already_listed {
                    slots[replace_at].word = Some(key.to_string());
                    slots[replace_at].distance = distance;
                    ceiling = slots
                        .iter()
                        .map(|slot| slot.distance)
                        .max()
                        .unwrap_or(distance);
                }
            }
        }

        if found {
            slots.sort_by(|a, b| {
                a.distance.cmp(&b.distance).then_with(|| match (&a.word, &b.word) {
                    (Some(x), Some(y)) => stardict_strcmp(x.as_bytes(), y.as_bytes()),
                    _ => Ordering::Equal,
                })
            });
        }
        slots.into_iter().map(|slot| slot.word).collect()
    }

    /// Pattern lookup across all dictionaries: per-dictionary linear scans
    /// capped at [`MAX_MATCH_ITEM_PER_LIB`], deduplicated by raw bytes and
    /// sorted by headword order.
    pub fn lookup_pattern(&mut self, pattern: &str) -> Vec<String> {
        let compiled = GlobPattern::new(pattern);
        let mut matches: Vec<String> = Vec::new();
        for lib in 0..self.dicts.len() {
            let dict = &mut self.dicts[lib];
            let indices = match dict.lookup_pattern(&compiled, MAX_MATCH_ITEM_PER_LIB + 1) {
                Ok(indices) => indices,
                Err(e) => {
                    warn!("pattern scan failed in {}: {}", dict.book_name(), e);
                    continue;
                }
            };
            if indices.is_empty() {
                continue;
            }
            if let Some(callback) = &self.progress {
                callback();
            }
            for idx in indices {
                match dict.key(idx) {
                    Ok(key) => {
                        if !matches.iter().any(|m| m.as_bytes() == key.as_bytes()) {
                            matches.push(key.to_string());
                        }
                    }
                    Err(e) => {
                        warn!("pattern scan failed in {}: {}", dict.book_name(), e);
                        break;
                    }
                }
            }
        }
        matches.sort_by(|a, b| stardict_strcmp(a.as_bytes(), b.as_bytes()));
        matches
    }

    /// Full-text search: every article of every body-search-enabled
    /// dictionary is scanned for the co-occurrence of all query substrings.
    /// Returns one list of matching headwords per dictionary.
    pub fn lookup_data(&mut self, query: &str) -> Vec<Vec<String>> {
        let mut results: Vec<Vec<String>> = (0..self.dicts.len()).map(|_| Vec::new()).collect();
        let words = parse_search_words(query);
        if words.is_empty() {
            return results;
        }

        let mut scratch: Vec<u8> = Vec::new();
        for lib in 0..self.dicts.len() {
            if !self.dicts[lib].supports_body_search() {
                continue;
            }
            if let Some(callback) = &self.progress {
                callback();
            }
            let dict = &mut self.dicts[lib];
            for idx in 0..dict.word_count() {
                let (offset, size) = match dict.location(idx) {
                    Ok(location) => location,
                    Err(e) => {
                        warn!("body search failed in {}: {}", dict.book_name(), e);
                        break;
                    }
                };
                match dict.search_article(&words, offset, size, &mut scratch) {
                    Ok(true) => match dict.key(idx) {
                        Ok(key) => results[lib].push(key.to_string()),
                        Err(e) => {
                            warn!("body search failed in {}: {}", dict.book_name(), e);
                            break;
                        }
                    },
                    Ok(false) => {}
                    Err(e) => {
                        warn!("body search failed in {}: {}", dict.book_name(), e);
                        break;
                    }
                }
            }
        }
        results
    }
}

/// Split a body-search query into substrings on spaces. A backslash escapes
/// a space or backslash, spells `\t`/`\n`, and is dropped before anything
/// else.
fn parse_search_words(query: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut chars = query.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(' ') => current.push(' '),
                Some('\\') => current.push('\\'),
                Some('t') => current.push('\t'),
                Some('n') => current.push('\n'),
                Some(other) => current.push(other),
                None => {}
            },
            ' ' => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn try_lookup(dict: &mut Dict, word: &str, hits: &mut BTreeSet<usize>) -> bool {
    match dict.lookup(word, hits) {
        Ok(found) => found,
        Err(e) => {
            warn!("lookup failed in {}: {}", dict.book_name(), e);
            false
        }
    }
}

/// Try `candidate`, and when the matched suffix (or the word's first letter)
/// was uppercase, retry its ASCII-lowercased form.
fn lookup_with_lower_retry(
    dict: &mut Dict,
    candidate: &str,
    retry_lower: bool,
    hits: &mut BTreeSet<usize>,
) -> bool {
    if try_lookup(dict, candidate, hits) {
        return true;
    }
    if retry_lower {
        let lowered = candidate.to_ascii_lowercase();
        if lowered != candidate && try_lookup(dict, &lowered, hits) {
            return true;
        }
    }
    false
}

/// Is the tail of `stem` a doubled non-vowel after a vowel (`stopp`, `runn`)?
fn has_doubled_tail(stem: &[u8]) -> bool {
    let n = stem.len();
    n >= 3
        && stem[n - 1] == stem[n - 2]
        && !is_vowel(stem[n - 2])
        && is_vowel(stem[n - 3])
}

/// Morphological fallback: case variants of the whole word, then for pure
/// ASCII words a fixed battery of English suffix rules. Each stage stops the
/// battery at its first hit.
fn lookup_similar(dict: &mut Dict, word: &str, hits: &mut BTreeSet<usize>) -> bool {
    let mut found = false;

    let lowered = word.to_lowercase();
    if lowered != word && try_lookup(dict, &lowered, hits) {
        found = true;
    }
    if !found {
        let uppered = word.to_uppercase();
        if uppered != word && try_lookup(dict, &uppered, hits) {
            found = true;
        }
    }
    if !found {
        if let Some(first) = word.chars().next() {
            let mut titled = String::with_capacity(word.len());
            titled.extend(first.to_uppercase());
            titled.push_str(&word[first.len_utf8()..].to_lowercase());
            if titled != word && try_lookup(dict, &titled, hits) {
                found = true;
            }
        }
    }

    if is_pure_english(word) {
        let bytes = word.as_bytes();
        let len = bytes.len();
        let first_upper = bytes.first().is_some_and(|b| b.is_ascii_uppercase());

        // cut one char: "s", or the "d" of "ed"
        if !found && len > 1 {
            let upcase = bytes[len - 1] == b'S' || bytes.ends_with(b"ED");
            if upcase || bytes[len - 1] == b's' || bytes.ends_with(b"ed") {
                found = lookup_with_lower_retry(dict, &word[..len - 1], upcase || first_upper, hits);
            }
        }

        // cut "ly", un-doubling the consonant it exposed
        if !found && len > 2 {
            let upcase = bytes.ends_with(b"LY");
            if upcase || bytes.ends_with(b"ly") {
                let retry = upcase || first_upper;
                let stem = &word[..len - 2];
                if len > 5 && has_doubled_tail(stem.as_bytes()) {
                    found = lookup_with_lower_retry(dict, &stem[..stem.len() - 1], retry, hits);
                }
                if !found {
                    found = lookup_with_lower_retry(dict, stem, retry, hits);
                }
            }
        }

        // cut "ing": un-double, plain, then restore the dropped "e"
        if !found && len > 3 {
            let upcase = bytes.ends_with(b"ING");
            if upcase || bytes.ends_with(b"ing") {
                let retry = upcase || first_upper;
                let stem = &word[..len - 3];
                if len > 6 && has_doubled_tail(stem.as_bytes()) {
                    found = lookup_with_lower_retry(dict, &stem[..stem.len() - 1], retry, hits);
                }
                if !found {
                    found = lookup_with_lower_retry(dict, stem, retry, hits);
                }
                if !found {
                    let with_e = format!("{}{}", stem, if upcase { 'E' } else { 'e' });
                    found = lookup_with_lower_retry(dict, &with_e, retry, hits);
                }
            }
        }

        // cut "es" after s/x/o or ch/sh
        if !found && len > 3 {
            let upcase = bytes.ends_with(b"ES")
                && (matches!(bytes[len - 3], b'S' | b'X' | b'O')
                    || (len > 4
                        && bytes[len - 3] == b'H'
                        && matches!(bytes[len - 4], b'C' | b'S')));
            let lowcase = bytes.ends_with(b"es")
                && (matches!(bytes[len - 3], b's' | b'x' | b'o')
                    || (len > 4
                        && bytes[len - 3] == b'h'
                        && matches!(bytes[len - 4], b'c' | b's')));
            if upcase || lowcase {
                found = lookup_with_lower_retry(dict, &word[..len - 2], upcase || first_upper, hits);
            }
        }

        // cut "ed", un-doubling
        if !found && len > 3 {
            let upcase = bytes.ends_with(b"ED");
            if upcase || bytes.ends_with(b"ed") {
                let retry = upcase || first_upper;
                let stem = &word[..len - 2];
                if len > 5 && has_doubled_tail(stem.as_bytes()) {
                    found = lookup_with_lower_retry(dict, &stem[..stem.len() - 1], retry, hits);
                }
                if !found {
                    found = lookup_with_lower_retry(dict, stem, retry, hits);
                }
            }
        }

        // "ied" -> "y"
        if !found && len > 3 {
            let upcase = bytes.ends_with(b"IED");
            if upcase || bytes.ends_with(b"ied") {
                let replaced = format!("{}{}", &word[..len - 3], if upcase { 'Y' } else { 'y' });
                found = lookup_with_lower_retry(dict, &replaced, upcase || first_upper, hits);
            }
        }

        // "ies" -> "y"
        if !found && len > 3 {
            let upcase = bytes.ends_with(b"IES");
            if upcase || bytes.ends_with(b"ies") {
                let replaced = format!("{}{}", &word[..len - 3], if upcase { 'Y' } else { 'y' });
                found = lookup_with_lower_retry(dict, &replaced, upcase || first_upper, hits);
            }
        }

        // cut "er"
        if !found && len > 2 {
            let upcase = bytes.ends_with(b"ER");
            if upcase || bytes.ends_with(b"er") {
                found = lookup_with_lower_retry(dict, &word[..len - 2], upcase || first_upper, hits);
            }
        }

        // cut "est"
        if !found && len > 3 {
            let upcase = bytes.ends_with(b"EST");
            if upcase || bytes.ends_with(b"est") {
                found = lookup_with_lower_retry(dict, &word[..len - 3], upcase || first_upper, hits);
            }
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::{analyze_query, parse_search_words, QueryType};

    #[test]
    fn classifier_strips_prefixes() {
        assert_eq!(analyze_query("/making"), (QueryType::Fuzzy, "making".to_string()));
        assert_eq!(analyze_query("|red table"), (QueryType::Data, "red table".to_string()));
        assert_eq!(analyze_query(""), (QueryType::Simple, String::new()));
        assert_eq!(analyze_query("plain"), (QueryType::Simple, "plain".to_string()));
    }

    #[test]
    fn classifier_detects_unescaped_wildcards() {
        assert_eq!(analyze_query("ca*"), (QueryType::Regexp, "ca*".to_string()));
        assert_eq!(analyze_query("c?t"), (QueryType::Regexp, "c?t".to_string()));
        // an escaped wildcard is literal, and the backslash is dropped
        assert_eq!(analyze_query("ca\\*"), (QueryType::Simple, "ca*".to_string()));
        assert_eq!(analyze_query("a\\\\b"), (QueryType::Simple, "a\\b".to_string()));
    }

    #[test]
    fn search_words_split_and_unescape() {
        assert_eq!(parse_search_words("red table"), vec!["red", "table"]);
        assert_eq!(parse_search_words("  red  "), vec!["red"]);
        assert_eq!(parse_search_words("a\\ b c"), vec!["a b", "c"]);
        assert_eq!(parse_search_words("x\\ty"), vec!["x\ty"]);
        assert_eq!(parse_search_words("x\\ny"), vec!["x\ny"]);
        assert_eq!(parse_search_words("x\\\\y"), vec!["x\\y"]);
        assert_eq!(parse_search_words("\\q"), vec!["q"]);
        assert!(parse_search_words("   ").is_empty());
    }
}
