// Copyright (c) 2026  The narrative contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Input data model: [`Story`], [`Scenario`] and their satellites.
//!
//! These are pre-parsed value objects produced by an external loader. The
//! engine is agnostic to whatever textual syntax they were read from and
//! treats them as read-only.

use std::fmt;

use linked_hash_map::LinkedHashMap;

use crate::meta::Meta;

/// One row of an [`ExamplesTable`]: an ordered column name → value map.
pub type Row = LinkedHashMap<String, String>;

/// Tabular parameter source generating multiple scenario instances.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExamplesTable {
    headers: Vec<String>,
    rows: Vec<Row>,
}

impl ExamplesTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from explicit header and row cells. Rows shorter than
    /// the header are padded with blank values.
    #[must_use]
    pub fn from_rows<S: AsRef<str>>(
        headers: &[S],
        rows: &[Vec<String>],
    ) -> Self {
        let headers: Vec<String> =
            headers.iter().map(|h| h.as_ref().to_owned()).collect();
        let rows = rows
            .iter()
            .map(|cells| {
                headers
                    .iter()
                    .enumerate()
                    .map(|(i, h)| {
                        (h.clone(), cells.get(i).cloned().unwrap_or_default())
                    })
                    .collect()
            })
            .collect();
        Self { headers, rows }
    }

    /// Parses a pipe-separated table literal: first non-blank line is the
    /// header, each following line one row. Cells are trimmed.
    ///
    /// This is a value-level format (tables also arrive as parameter
    /// values), not story-file parsing.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut lines = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && l.starts_with('|'));
        let Some(header_line) = lines.next() else {
            return Self::default();
        };
        let headers: Vec<String> = split_cells(header_line);
        let rows = lines
            .map(|line| {
                let cells = split_cells(line);
                headers
                    .iter()
                    .enumerate()
                    .map(|(i, h)| {
                        (h.clone(), cells.get(i).cloned().unwrap_or_default())
                    })
                    .collect()
            })
            .collect();
        Self { headers, rows }
    }

    /// Column names, in declaration order.
    #[must_use]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Rows, in declaration order.
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Indicates whether the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn split_cells(line: &str) -> Vec<String> {
    line.trim_matches('|')
        .split('|')
        .map(|cell| cell.trim().to_owned())
        .collect()
}

impl fmt::Display for ExamplesTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "|{}|", self.headers.join("|"))?;
        for row in &self.rows {
            let cells: Vec<&str> = self
                .headers
                .iter()
                .map(|h| row.get(h).map_or("", String::as_str))
                .collect();
            writeln!(f, "|{}|", cells.join("|"))?;
        }
        Ok(())
    }
}

/// Scope of a [`Lifecycle`] step group.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Scope {
    /// Runs once around the whole story.
    Story,

    /// Runs around every scenario instance.
    Scenario,

    /// Runs around every single scenario step.
    Step,
}

/// Before/after step groups scoped to a story, scenario or step, independent
/// of handler-level hooks, plus the story-level examples table.
#[derive(Clone, Debug, Default)]
pub struct Lifecycle {
    before: Vec<(Scope, Vec<String>)>,
    after: Vec<(Scope, Vec<String>)>,

    /// Story-level examples: each row is cross-producted with every
    /// scenario's own examples.
    pub examples: ExamplesTable,
}

impl Lifecycle {
    /// Creates an empty lifecycle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a before group for the given `scope`.
    #[must_use]
    pub fn with_before<S: Into<String>>(
        mut self,
        scope: Scope,
        steps: impl IntoIterator<Item = S>,
    ) -> Self {
        self.before.push((scope, steps.into_iter().map(Into::into).collect()));
        self
    }

    /// Adds an after group for the given `scope`.
    #[must_use]
    pub fn with_after<S: Into<String>>(
        mut self,
        scope: Scope,
        steps: impl IntoIterator<Item = S>,
    ) -> Self {
        self.after.push((scope, steps.into_iter().map(Into::into).collect()));
        self
    }

    /// Sets the story-level examples table.
    #[must_use]
    pub fn with_examples(mut self, examples: ExamplesTable) -> Self {
        self.examples = examples;
        self
    }

    /// Before step texts for `scope`, in declaration order.
    pub fn before_steps(&self, scope: Scope) -> impl Iterator<Item = &str> {
        self.before
            .iter()
            .filter(move |(s, _)| *s == scope)
            .flat_map(|(_, steps)| steps.iter().map(String::as_str))
    }

    /// After step texts for `scope`, in declaration order.
    pub fn after_steps(&self, scope: Scope) -> impl Iterator<Item = &str> {
        self.after
            .iter()
            .filter(move |(s, _)| *s == scope)
            .flat_map(|(_, steps)| steps.iter().map(String::as_str))
    }
}

/// Reference to another story embedded as a precondition.
#[derive(Clone, Debug, Default)]
pub struct GivenStory {
    /// Path of the referenced story, resolved by the loader the engine is
    /// driven with.
    pub path: String,

    /// Anchor parameters: when present, only scenarios of the referenced
    /// story whose meta matches one of these name/value pairs are embedded,
    /// and the scenario is bound to these parameters instead of any
    /// examples.
    pub anchor_parameters: LinkedHashMap<String, String>,
}

impl GivenStory {
    /// Creates a reference to the story at `path`.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), anchor_parameters: LinkedHashMap::new() }
    }

    /// Adds an anchor parameter.
    #[must_use]
    pub fn anchored(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        drop(self.anchor_parameters.insert(name.into(), value.into()));
        self
    }

    /// Indicates whether this reference carries anchor parameters.
    #[must_use]
    pub fn has_anchor_parameters(&self) -> bool {
        !self.anchor_parameters.is_empty()
    }
}

/// Ordered set of [`GivenStory`] references.
#[derive(Clone, Debug, Default)]
pub struct GivenStories {
    stories: Vec<GivenStory>,
}

impl GivenStories {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from plain paths.
    #[must_use]
    pub fn from_paths<S: Into<String>>(
        paths: impl IntoIterator<Item = S>,
    ) -> Self {
        Self { stories: paths.into_iter().map(GivenStory::new).collect() }
    }

    /// Adds a reference.
    #[must_use]
    pub fn with(mut self, story: GivenStory) -> Self {
        self.stories.push(story);
        self
    }

    /// The references, in declaration order.
    #[must_use]
    pub fn stories(&self) -> &[GivenStory] {
        &self.stories
    }

    /// Indicates whether no stories are referenced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stories.is_empty()
    }

    /// Indicates whether any reference requires parameter binding (carries
    /// anchor parameters). When true, the referencing scenario is bound to
    /// given-story parameters instead of being example-parametrized.
    #[must_use]
    pub fn require_parameters(&self) -> bool {
        self.stories.iter().any(GivenStory::has_anchor_parameters)
    }
}

/// Titled step sequence, optionally parametrized by an [`ExamplesTable`].
#[derive(Clone, Debug, Default)]
pub struct Scenario {
    /// Scenario title.
    pub title: String,

    /// Tags on the scenario, inheriting from the story's meta during
    /// filtering.
    pub meta: Meta,

    /// Examples parametrizing this scenario, possibly empty.
    pub examples: ExamplesTable,

    /// Ordered step texts.
    pub steps: Vec<String>,

    /// Stories embedded as preconditions of this scenario.
    pub given_stories: GivenStories,
}

impl Scenario {
    /// Creates a scenario with the given `title` and no steps.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self { title: title.into(), ..Self::default() }
    }

    /// Replaces the step texts.
    #[must_use]
    pub fn with_steps<S: Into<String>>(
        mut self,
        steps: impl IntoIterator<Item = S>,
    ) -> Self {
        self.steps = steps.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the meta.
    #[must_use]
    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    /// Sets the examples table.
    #[must_use]
    pub fn with_examples(mut self, examples: ExamplesTable) -> Self {
        self.examples = examples;
        self
    }

    /// Sets the given stories.
    #[must_use]
    pub fn with_given_stories(mut self, given: GivenStories) -> Self {
        self.given_stories = given;
        self
    }
}

/// Top-level unit: a description, a lifecycle and an ordered list of
/// scenarios.
#[derive(Clone, Debug, Default)]
pub struct Story {
    /// Path identifying the story. Timeout rules and failure aggregation key
    /// on it.
    pub path: String,

    /// Free-form description of the story's intent.
    pub description: String,

    /// Tags on the story.
    pub meta: Meta,

    /// Before/after step groups and story-level examples.
    pub lifecycle: Lifecycle,

    /// Ordered scenarios.
    pub scenarios: Vec<Scenario>,

    /// Stories embedded as preconditions of the whole story.
    pub given_stories: GivenStories,
}

impl Story {
    /// Creates an empty story at `path`.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), ..Self::default() }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the meta.
    #[must_use]
    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    /// Sets the lifecycle.
    #[must_use]
    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Appends a scenario.
    #[must_use]
    pub fn with_scenario(mut self, scenario: Scenario) -> Self {
        self.scenarios.push(scenario);
        self
    }

    /// Sets the given stories.
    #[must_use]
    pub fn with_given_stories(mut self, given: GivenStories) -> Self {
        self.given_stories = given;
        self
    }

    /// Returns a copy of this story holding only the given scenarios.
    #[must_use]
    pub fn clone_with_scenarios(&self, scenarios: Vec<Scenario>) -> Story {
        Story { scenarios, ..self.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn examples_table_parses_pipe_literals() {
        let table = ExamplesTable::parse(
            "|name|age|\n\
             |Alice|30|\n\
             |Bob|25|",
        );
        assert_eq!(table.headers(), ["name", "age"]);
        assert_eq!(table.rows().len(), 2);
        assert_eq!(table.rows()[0]["name"], "Alice");
        assert_eq!(table.rows()[1]["age"], "25");
    }

    #[test]
    fn examples_table_pads_short_rows() {
        let table =
            ExamplesTable::from_rows(&["a", "b"], &[vec!["1".to_owned()]]);
        assert_eq!(table.rows()[0]["b"], "");
    }

    #[test]
    fn lifecycle_steps_filter_by_scope() {
        let lifecycle = Lifecycle::new()
            .with_before(Scope::Story, ["Given the database is clean"])
            .with_before(Scope::Scenario, ["Given a fresh session"]);
        assert_eq!(
            lifecycle.before_steps(Scope::Story).collect::<Vec<_>>(),
            ["Given the database is clean"]
        );
        assert_eq!(
            lifecycle.before_steps(Scope::Scenario).collect::<Vec<_>>(),
            ["Given a fresh session"]
        );
        assert_eq!(lifecycle.before_steps(Scope::Step).count(), 0);
    }

    #[test]
    fn given_stories_require_parameters_when_anchored() {
        let plain = GivenStories::from_paths(["pre.story"]);
        assert!(!plain.require_parameters());

        let anchored = GivenStories::new()
            .with(GivenStory::new("pre.story").anchored("variant", "one"));
        assert!(anchored.require_parameters());
    }
}
