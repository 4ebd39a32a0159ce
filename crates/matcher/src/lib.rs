//! `lk-matcher` — the Word-list Matcher: case-insensitive word-boundary
//! matching against curated term lists.
//!
//! Word-list entries are compiled as regex fragments, not pre-escaped
//! literals: an operator adding `c++` to a word list is writing a
//! regex, not a guaranteed-literal string. This mirrors the source
//! behavior rather than silently changing it (see the design notes on
//! this open question).

use lk_domain::Profile;
use regex::RegexSet;

/// A compiled set of word-boundary patterns.
pub struct WordList {
    set: RegexSet,
}

impl WordList {
    /// Compile a list of raw terms (one per line, already trimmed) into
    /// word-boundary patterns. A term that fails to compile as a regex
    /// fragment is logged and skipped rather than aborting the whole list.
    pub fn compile(words: &[String]) -> Self {
        let patterns: Vec<String> = words
            .iter()
            .filter(|w| !w.is_empty())
            .filter_map(|w| {
                let pattern = format!(r"(?i)\b{}\b", w);
                match regex::Regex::new(&pattern) {
                    Ok(_) => Some(pattern),
                    Err(e) => {
                        tracing::warn!(word = %w, error = %e, "matcher: skipping unparsable word-list entry");
                        None
                    }
                }
            })
            .collect();

        let set = RegexSet::new(&patterns).unwrap_or_else(|_| RegexSet::empty());
        Self { set }
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    fn matches_text(&self, text: &str) -> bool {
        !text.is_empty() && self.set.is_match(text)
    }

    /// True iff any word appears, word-boundary delimited and
    /// case-insensitively, in the profile's description, handle, or
    /// display name. A profile lacking `description` contributes no
    /// match from that field only; `handle`/`display_name` always
    /// participate when present.
    pub fn matches(&self, profile: &Profile) -> bool {
        if let Some(description) = &profile.description {
            if self.matches_text(description) {
                return true;
            }
        }
        if let Some(handle) = &profile.handle {
            if self.matches_text(handle) {
                return true;
            }
        }
        if let Some(display_name) = &profile.display_name {
            if self.matches_text(display_name) {
                return true;
            }
        }
        false
    }
}
