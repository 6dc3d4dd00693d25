// Copyright (c) 2026  The narrative contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Compilation of `$name`-placeholder step patterns into [`Regex`]es.
//!
//! A pattern like `I have $n cukes` compiles into a whole-text matcher
//! (`^I\s+have\s+(.*)\s+cukes$`) capturing one group per placeholder, plus a
//! prefix matcher used for registration-time overlap detection. Literal
//! whitespace in the pattern matches any whitespace run.

use lazy_regex::regex;
use linked_hash_map::LinkedHashMap;
use regex::Regex;

use crate::error::Error;

/// Characters escaped in pattern literals before placeholder substitution.
const ESCAPED: &[char] =
    &['[', ']', '{', '}', '?', '^', '.', '*', '(', ')', '+', '\\', '|'];

/// A compiled step pattern.
#[derive(Clone, Debug)]
pub struct StepPattern {
    source: String,
    whole: Regex,
    prefix: Regex,
    names: Vec<String>,
}

impl StepPattern {
    /// Compiles `pattern`, capturing every `$word` placeholder.
    ///
    /// # Errors
    ///
    /// If the substituted pattern does not compile as a regular expression.
    pub fn compile(pattern: &str) -> Result<Self, Error> {
        let escaped = escape_literals(pattern);
        let (body, names) = substitute_placeholders(&escaped);
        let body = normalize_whitespace(&body);

        let compile = |re: String| {
            Regex::new(&re).map_err(|e| Error::InvalidPattern {
                pattern: pattern.to_owned(),
                message: e.to_string(),
            })
        };
        Ok(Self {
            source: pattern.to_owned(),
            whole: compile(format!("^(?s){body}$"))?,
            prefix: compile(format!("^(?s){body}"))?,
            names,
        })
    }

    /// The pattern text as registered.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder names, in pattern order.
    #[must_use]
    pub fn parameter_names(&self) -> &[String] {
        &self.names
    }

    /// Tests the pattern against the *entire* `text`.
    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        self.whole.is_match(text)
    }

    /// Captures placeholder values out of `text`, in pattern order.
    #[must_use]
    pub fn capture(&self, text: &str) -> Option<LinkedHashMap<String, String>> {
        let captures = self.whole.captures(text)?;
        Some(
            self.names
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    let value = captures
                        .get(i + 1)
                        .map_or("", |m| m.as_str())
                        .to_owned();
                    (name.clone(), value)
                })
                .collect(),
        )
    }

    /// Tests whether this pattern matches a leading portion of `text` ending
    /// on a word boundary. Used for the literal-prefix overlap rule at
    /// registration time: a full match is a prefix match too.
    #[must_use]
    pub fn prefix_matches(&self, text: &str) -> bool {
        self.prefix.find(text).is_some_and(|m| {
            text[m.end()..].chars().next().map_or(true, char::is_whitespace)
        })
    }

    /// The pattern with placeholders stripped, used for edit-distance
    /// ranking.
    #[must_use]
    pub fn scoring_literal(&self) -> String {
        let spaced =
            regex!(r"\s\$\w+\s").replace_all(&self.source, " ").into_owned();
        regex!(r"\$\w+").replace_all(&spaced, "").into_owned()
    }
}

fn escape_literals(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if ESCAPED.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Replaces each `$word` placeholder with a capture group, keeping whatever
/// single non-word character followed it, and collects placeholder names.
fn substitute_placeholders(escaped: &str) -> (String, Vec<String>) {
    let finder = regex!(r"(?s)(\$\w*)(\W|\z)");
    let mut names = Vec::new();
    let mut spans: Vec<(usize, usize, String)> = Vec::new();
    for captures in finder.captures_iter(escaped) {
        let whole = captures.get(0).map_or(0..0, |m| m.range());
        let name = captures
            .get(1)
            .map_or("", |m| m.as_str())
            .trim_start_matches('$')
            .to_owned();
        let tail = captures.get(2).map_or("", |m| m.as_str()).to_owned();
        names.push(name);
        spans.push((whole.start, whole.end, tail));
    }

    let mut body = escaped.to_owned();
    for (start, end, tail) in spans.into_iter().rev() {
        body.replace_range(start..end, &format!("(.*){tail}"));
    }
    (body, names)
}

/// Makes any literal whitespace run match any whitespace run.
fn normalize_whitespace(body: &str) -> String {
    regex!(r"\s+").replace_all(body, r"\s+").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_patterns_match_whole_text_only() {
        let pattern = StepPattern::compile("the user logs in").unwrap();
        assert!(pattern.matches("the user logs in"));
        assert!(!pattern.matches("the user logs in twice"));
        assert!(!pattern.matches("when the user logs in"));
    }

    #[test]
    fn placeholders_capture_by_name() {
        let pattern = StepPattern::compile("I have $n cukes in $place").unwrap();
        assert_eq!(pattern.parameter_names(), ["n", "place"]);

        let captured = pattern.capture("I have 17 cukes in my belly").unwrap();
        assert_eq!(captured["n"], "17");
        assert_eq!(captured["place"], "my belly");
    }

    #[test]
    fn literal_punctuation_is_escaped() {
        let pattern = StepPattern::compile("the total is $amount (net)").unwrap();
        let captured = pattern.capture("the total is 12.50 (net)").unwrap();
        assert_eq!(captured["amount"], "12.50");
    }

    #[test]
    fn whitespace_runs_are_interchangeable() {
        let pattern = StepPattern::compile("a  spaced   pattern").unwrap();
        assert!(pattern.matches("a spaced pattern"));
    }

    #[test]
    fn prefix_matching_requires_a_word_boundary() {
        let pattern = StepPattern::compile("I have $n cukes").unwrap();
        assert!(pattern.prefix_matches("I have $n cukes"));
        assert!(pattern.prefix_matches("I have $n cukes in my belly"));
        assert!(!pattern.prefix_matches("I have $n cukesandmore"));
        assert!(!pattern.prefix_matches("I see $n cukes"));
    }

    #[test]
    fn scoring_literal_strips_placeholders() {
        let pattern = StepPattern::compile("I have $n cukes").unwrap();
        assert_eq!(pattern.scoring_literal(), "I have cukes");
    }
}
