// Copyright (c) 2026  The narrative contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Per-path story timeout rules.
//!
//! Rules are textual `pattern:duration` pairs, matched against story paths
//! in declaration order. A pattern is tried as a regular expression first
//! and falls back to a glob; a rule with no pattern replaces the default
//! timeout. Durations are compound humantime strings (`1d 2h 3m 4s`) or
//! plain integer seconds.

use std::time::Duration;

use either::Either;
use regex::Regex;

use crate::error::Error;

/// One parsed rule.
#[derive(Clone, Debug)]
struct TimeoutRule {
    pattern: Either<Regex, glob::Pattern>,
    timeout: Duration,
}

impl TimeoutRule {
    fn matches(&self, path: &str) -> bool {
        match &self.pattern {
            Either::Left(regex) => regex.is_match(path),
            Either::Right(pattern) => pattern.matches(path),
        }
    }
}

/// Ordered per-path timeout rules plus the default.
#[derive(Clone, Debug)]
pub struct TimeoutRules {
    rules: Vec<TimeoutRule>,
    default_timeout: Duration,
}

impl TimeoutRules {
    /// Parses the configured rules.
    ///
    /// # Errors
    ///
    /// If a rule's duration is unparseable or its pattern is neither a valid
    /// regular expression nor a valid glob.
    pub fn parse(
        rules: &[String],
        default_timeout: Duration,
    ) -> Result<Self, Error> {
        let mut parsed = Vec::with_capacity(rules.len());
        let mut default_timeout = default_timeout;
        for rule in rules {
            match rule.split_once(':') {
                Some((pattern, duration)) => parsed.push(TimeoutRule {
                    pattern: compile_pattern(pattern, rule)?,
                    timeout: parse_duration(duration, rule)?,
                }),
                // A bare duration replaces the default.
                None => default_timeout = parse_duration(rule, rule)?,
            }
        }
        Ok(Self { rules: parsed, default_timeout })
    }

    /// Resolves the timeout of the story at `path`: the first matching rule
    /// wins, else the default.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Duration {
        let timeout = self
            .rules
            .iter()
            .find(|rule| rule.matches(path))
            .map_or(self.default_timeout, |rule| rule.timeout);
        tracing::debug!(path, ?timeout, "resolved story timeout");
        timeout
    }

    /// The timeout used when no rule matches.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}

/// Tries the pattern as an anchored regular expression first, then as a
/// glob. Glob wildcards like `**/` fail regex compilation, which is what
/// routes them to the glob branch.
fn compile_pattern(
    pattern: &str,
    rule: &str,
) -> Result<Either<Regex, glob::Pattern>, Error> {
    if let Ok(regex) = Regex::new(&format!("^(?:{pattern})$")) {
        return Ok(Either::Left(regex));
    }
    glob::Pattern::new(pattern).map(Either::Right).map_err(|e| {
        Error::InvalidTimeout { rule: rule.to_owned(), message: e.to_string() }
    })
}

fn parse_duration(text: &str, rule: &str) -> Result<Duration, Error> {
    let text = text.trim();
    if let Ok(seconds) = text.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    humantime::parse_duration(text).map_err(|e| Error::InvalidTimeout {
        rule: rule.to_owned(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(rules: &[&str]) -> TimeoutRules {
        TimeoutRules::parse(
            &rules.iter().map(|r| (*r).to_owned()).collect::<Vec<_>>(),
            Duration::from_secs(300),
        )
        .unwrap()
    }

    #[test]
    fn plain_seconds_and_compound_durations_parse() {
        let rules = rules(&["a/.*:90", "b/.*:1h 30m"]);
        assert_eq!(rules.resolve("a/one.story"), Duration::from_secs(90));
        assert_eq!(rules.resolve("b/two.story"), Duration::from_secs(5400));
        assert_eq!(rules.resolve("c/other.story"), Duration::from_secs(300));
    }

    #[test]
    fn glob_patterns_take_the_fallback_branch() {
        let rules = rules(&["**/slow/*.story:2"]);
        assert_eq!(
            rules.resolve("stories/slow/import.story"),
            Duration::from_secs(2),
        );
        assert_eq!(
            rules.resolve("stories/fast/import.story"),
            Duration::from_secs(300),
        );
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = rules(&["a/.*:10", ".*:20"]);
        assert_eq!(rules.resolve("a/one.story"), Duration::from_secs(10));
        assert_eq!(rules.resolve("z/one.story"), Duration::from_secs(20));
    }

    #[test]
    fn bare_duration_replaces_the_default() {
        let rules = rules(&["45"]);
        assert_eq!(rules.resolve("any.story"), Duration::from_secs(45));
        assert_eq!(rules.default_timeout(), Duration::from_secs(45));
    }

    #[test]
    fn bad_rules_are_rejected() {
        let result = TimeoutRules::parse(
            &["a/.*:soon".to_owned()],
            Duration::from_secs(300),
        );
        assert!(result.is_err());
    }
}
