// Copyright (c) 2026  The narrative contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Engine configuration.
//!
//! One immutable [`Config`] value is built once, up front, through consuming
//! builder methods, and shared across the whole run. Every recognized option
//! is a named field documented here; nothing is discovered or mutated later.

use std::time::Duration;

use linked_hash_map::LinkedHashMap;
use smart_default::SmartDefault;

use crate::{
    convert::NumericLocale,
    step::{RankingStrategy, StepType},
};

/// Starting words of step texts and the comment marker.
#[derive(Clone, Debug, Eq, PartialEq, SmartDefault)]
pub struct Keywords {
    /// Starting word of Given steps.
    #[default = "Given"]
    pub given: String,

    /// Starting word of When steps.
    #[default = "When"]
    pub when: String,

    /// Starting word of Then steps.
    #[default = "Then"]
    pub then: String,

    /// Starting word inheriting the previous non-And step's type.
    #[default = "And"]
    pub and: String,

    /// Marker of ignorable lines.
    #[default = "!--"]
    pub ignorable: String,
}

impl Keywords {
    /// Starting word for the given step type.
    #[must_use]
    pub fn starting_word(&self, step_type: StepType) -> &str {
        match step_type {
            StepType::Given => &self.given,
            StepType::When => &self.when,
            StepType::Then => &self.then,
        }
    }

    /// Resolves the step type a text's starting word announces, `None` for
    /// And, ignorable and unrecognized lines.
    #[must_use]
    pub fn step_type_of(&self, text: &str) -> Option<StepType> {
        [StepType::Given, StepType::When, StepType::Then]
            .into_iter()
            .find(|ty| Self::starts_with_word(text, self.starting_word(*ty)))
    }

    /// Indicates whether `text` is an And step.
    #[must_use]
    pub fn is_and(&self, text: &str) -> bool {
        Self::starts_with_word(text, &self.and)
    }

    /// Indicates whether `text` is an ignorable step: the comment marker
    /// followed by an otherwise regular step.
    #[must_use]
    pub fn is_ignorable(&self, text: &str) -> bool {
        Self::strip_word(text, &self.ignorable).is_some_and(|rest| {
            self.step_type_of(rest).is_some() || self.is_and(rest)
        })
    }

    /// Indicates whether `text` is a plain comment: the comment marker
    /// followed by anything but a step.
    #[must_use]
    pub fn is_comment(&self, text: &str) -> bool {
        Self::strip_word(text, &self.ignorable).is_some()
            && !self.is_ignorable(text)
    }

    /// Strips the starting word of the given `step_type` off `text`.
    #[must_use]
    pub fn strip_starting_word<'t>(
        &self,
        text: &'t str,
        step_type: StepType,
    ) -> Option<&'t str> {
        Self::strip_word(text, self.starting_word(step_type))
            .or_else(|| Self::strip_word(text, &self.and))
    }

    fn starts_with_word(text: &str, word: &str) -> bool {
        Self::strip_word(text, word).is_some()
    }

    fn strip_word<'t>(text: &'t str, word: &str) -> Option<&'t str> {
        let rest = text.strip_prefix(word)?;
        if rest.is_empty() {
            Some(rest)
        } else if rest.starts_with(char::is_whitespace) {
            Some(rest.trim_start())
        } else {
            None
        }
    }
}

/// Delimiters of named-parameter references inside step texts and composed
/// steps, `<name>` by default.
#[derive(Clone, Debug, Eq, PartialEq, SmartDefault)]
pub struct ParameterControls {
    /// Opening delimiter.
    #[default = "<"]
    pub left: String,

    /// Closing delimiter.
    #[default = ">"]
    pub right: String,
}

impl ParameterControls {
    /// Replaces every `<name>` occurrence in `text` with its value from
    /// `parameters`, leaving unknown names untouched.
    #[must_use]
    pub fn replace_delimited(
        &self,
        text: &str,
        parameters: &LinkedHashMap<String, String>,
    ) -> String {
        let mut replaced = text.to_owned();
        for (name, value) in parameters {
            let delimited = format!("{}{name}{}", self.left, self.right);
            replaced = replaced.replace(&delimited, value);
        }
        replaced
    }

    /// When `value` is exactly one delimited name, resolves it against
    /// `parameters`; returns `value` itself otherwise.
    #[must_use]
    pub fn delimited_value<'v>(
        &self,
        value: &'v str,
        parameters: &'v LinkedHashMap<String, String>,
    ) -> &'v str {
        value
            .strip_prefix(self.left.as_str())
            .and_then(|v| v.strip_suffix(self.right.as_str()))
            .and_then(|name| parameters.get(name))
            .map_or(value, String::as_str)
    }
}

/// What an unmatched (pending) step does to its scope.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PendingStepPolicy {
    /// Pending steps are reported and the scope goes on.
    #[default]
    PassOnPending,

    /// Pending steps fail the scope they appear in.
    FailOnPending,
}

/// Immutable engine configuration.
///
/// Build one with the consuming setters and hand it to the runner:
///
/// ```
/// use narrative::Config;
///
/// let config = Config::default()
///     .threads(4)
///     .meta_filter("-skip")
///     .fail_on_pending();
/// assert_eq!(config.threads, 4);
/// ```
#[derive(Clone, Debug, SmartDefault)]
pub struct Config {
    /// Number of stories performing concurrently; 1 runs the batch fully
    /// sequentially.
    #[default = 1]
    pub threads: usize,

    /// Ordered `pattern:duration` timeout rules, matched against story paths
    /// top to bottom. Durations are compound (`1h 30m`) or plain seconds.
    pub story_timeouts: Vec<String>,

    /// Timeout of stories no rule matches.
    #[default(Duration::from_secs(300))]
    pub default_timeout: Duration,

    /// Meta filter expression applied to stories, scenarios and example
    /// rows.
    pub meta_filter: String,

    /// What an unmatched step does to its scope.
    pub pending_step_policy: PendingStepPolicy,

    /// Resets the state machine at every story boundary.
    #[default = true]
    pub reset_state_before_story: bool,

    /// Resets the state machine at every scenario boundary.
    #[default = true]
    pub reset_state_before_scenario: bool,

    /// Once a scenario fails, records later scenarios of the same story as
    /// not performed instead of running them.
    pub skip_scenarios_after_failure: bool,

    /// Skips a story's scenarios when one of its given stories failed.
    pub skip_story_if_given_story_failed: bool,

    /// Walks the whole tree, matching and converting, without invoking any
    /// handler.
    pub dry_run: bool,

    /// Keeps collecting story outcomes past failures instead of
    /// short-circuiting on the first one.
    pub ignore_failure_in_stories: bool,

    /// Defers failure reporting to one aggregate raised after all stories
    /// finished.
    pub batch: bool,

    /// Separator splitting textual lists before element conversion.
    #[default = ","]
    pub list_separator: String,

    /// Decimal/grouping separators for numeric conversion.
    pub numeric_locale: NumericLocale,

    /// Format of textual dates, in `chrono` strftime syntax.
    #[default = "%d/%m/%Y"]
    pub date_format: String,

    /// Starting words and the comment marker.
    pub keywords: Keywords,

    /// Delimiters of named-parameter references.
    pub parameter_controls: ParameterControls,

    /// How multiple matching step candidates are ranked.
    pub ranking: RankingStrategy,
}

impl Config {
    /// Sets the number of concurrently performing stories.
    #[must_use]
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Adds a `pattern:duration` timeout rule.
    #[must_use]
    pub fn story_timeout(mut self, rule: impl Into<String>) -> Self {
        self.story_timeouts.push(rule.into());
        self
    }

    /// Sets the timeout of stories no rule matches.
    #[must_use]
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Sets the meta filter expression.
    #[must_use]
    pub fn meta_filter(mut self, expression: impl Into<String>) -> Self {
        self.meta_filter = expression.into();
        self
    }

    /// Makes unmatched steps fail their scope.
    #[must_use]
    pub fn fail_on_pending(mut self) -> Self {
        self.pending_step_policy = PendingStepPolicy::FailOnPending;
        self
    }

    /// Sets whether the state machine resets at story boundaries.
    #[must_use]
    pub fn reset_state_before_story(mut self, reset: bool) -> Self {
        self.reset_state_before_story = reset;
        self
    }

    /// Sets whether the state machine resets at scenario boundaries.
    #[must_use]
    pub fn reset_state_before_scenario(mut self, reset: bool) -> Self {
        self.reset_state_before_scenario = reset;
        self
    }

    /// Skips scenarios following a failure within the same story.
    #[must_use]
    pub fn skip_scenarios_after_failure(mut self) -> Self {
        self.skip_scenarios_after_failure = true;
        self
    }

    /// Skips a story's scenarios when one of its given stories failed.
    #[must_use]
    pub fn skip_story_if_given_story_failed(mut self) -> Self {
        self.skip_story_if_given_story_failed = true;
        self
    }

    /// Walks the tree without invoking handlers.
    #[must_use]
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Keeps collecting story outcomes past failures.
    #[must_use]
    pub fn ignore_failure_in_stories(mut self) -> Self {
        self.ignore_failure_in_stories = true;
        self
    }

    /// Defers failure reporting to one aggregate.
    #[must_use]
    pub fn batch(mut self) -> Self {
        self.batch = true;
        self
    }

    /// Sets the list separator used before element conversion.
    #[must_use]
    pub fn list_separator(mut self, separator: impl Into<String>) -> Self {
        self.list_separator = separator.into();
        self
    }

    /// Sets the numeric locale.
    #[must_use]
    pub fn numeric_locale(mut self, locale: NumericLocale) -> Self {
        self.numeric_locale = locale;
        self
    }

    /// Sets the date format, in `chrono` strftime syntax.
    #[must_use]
    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = format.into();
        self
    }

    /// Replaces the starting words and comment marker.
    #[must_use]
    pub fn keywords(mut self, keywords: Keywords) -> Self {
        self.keywords = keywords;
        self
    }

    /// Sets the candidate ranking strategy.
    #[must_use]
    pub fn ranking(mut self, ranking: RankingStrategy) -> Self {
        self.ranking = ranking;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_resolve_starting_words() {
        let keywords = Keywords::default();
        assert_eq!(
            keywords.step_type_of("Given a precondition"),
            Some(StepType::Given),
        );
        assert_eq!(
            keywords.step_type_of("When something happens"),
            Some(StepType::When),
        );
        assert_eq!(keywords.step_type_of("And more"), None);
        assert!(keywords.is_and("And more"));
        // `Thenceforth` is not a starting word.
        assert_eq!(keywords.step_type_of("Thenceforth things"), None);
    }

    #[test]
    fn ignorable_lines_need_a_step_after_the_marker() {
        let keywords = Keywords::default();
        assert!(keywords.is_ignorable("!-- Given a skipped step"));
        assert!(!keywords.is_ignorable("!-- just a note"));
        assert!(keywords.is_comment("!-- just a note"));
        assert!(!keywords.is_comment("!-- Given a skipped step"));
    }

    #[test]
    fn delimited_names_substitute_from_parameters() {
        let controls = ParameterControls::default();
        let mut parameters = LinkedHashMap::new();
        parameters.insert("name".to_owned(), "Alice".to_owned());

        assert_eq!(
            controls.replace_delimited("Given <name> logs in", &parameters),
            "Given Alice logs in",
        );
        assert_eq!(controls.delimited_value("<name>", &parameters), "Alice");
        assert_eq!(controls.delimited_value("plain", &parameters), "plain");
        assert_eq!(controls.delimited_value("<other>", &parameters), "<other>");
    }

    #[test]
    fn config_builder_keeps_at_least_one_thread() {
        let config = Config::default().threads(0);
        assert_eq!(config.threads, 1);
    }
}
