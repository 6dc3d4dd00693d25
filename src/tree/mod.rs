// Copyright (c) 2026  The narrative contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The performable tree: stories → scenarios → steps, built once per run.
//!
//! [`TreeBuilder`] consumes [`Story`] values, the step [`Registry`] and the
//! active [`MetaFilter`] and produces a [`PerformableRoot`] whose nodes own
//! their before/after/given/step sublists plus a mutable status+timing
//! result filled in during execution. A [`PerformableStory`] is owned
//! exclusively by the run that built it and moves into its worker task
//! whole.
//!
//! [`MetaFilter`]: crate::meta::MetaFilter
//! [`Registry`]: crate::step::Registry
//! [`Story`]: crate::model::Story

mod builder;
mod performable;

pub use self::builder::{StoryResolver, TreeBuilder};

use std::{fmt, sync::Arc, time::Duration};

use linked_hash_map::LinkedHashMap;

use crate::{
    meta::Meta,
    model::Row,
    step::{CollectedStep, Hook},
};

/// Folded outcome of a performed unit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    /// Every step passed.
    Successful,

    /// A step or hook failed.
    Failed,

    /// The unit contained unmatched steps (under the pass-on-pending
    /// policy).
    Pending,

    /// The unit was not performed because its scope had already failed.
    NotPerformed,

    /// The unit was excluded by the meta filter.
    Excluded,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Successful => "successful",
            Self::Failed => "failed",
            Self::Pending => "pending",
            Self::NotPerformed => "not performed",
            Self::Excluded => "excluded",
        })
    }
}

/// Wall time a unit took to perform.
#[derive(Clone, Copy, Debug, Default)]
pub struct Timing {
    /// Elapsed wall time.
    pub duration: Duration,
}

/// Root of the performable tree: before/after-stories hooks around the
/// stories of one run.
#[derive(Debug, Default)]
pub struct PerformableRoot {
    pub(crate) before_hooks: HookSet,
    pub(crate) stories: Vec<PerformableStory>,
    pub(crate) after_hooks: HookSet,
}

impl PerformableRoot {
    /// The stories of this run, in submission order.
    #[must_use]
    pub fn stories(&self) -> &[PerformableStory] {
        &self.stories
    }

    /// Moves the stories out for dispatching; the runner puts the performed
    /// stories back.
    pub(crate) fn take_stories(&mut self) -> Vec<PerformableStory> {
        std::mem::take(&mut self.stories)
    }

    pub(crate) fn put_stories(&mut self, stories: Vec<PerformableStory>) {
        self.stories = stories;
    }
}

/// Handler-level hooks of one (stage, scope), already ordered for
/// execution, evaluated against the owning unit's meta.
#[derive(Clone, Debug, Default)]
pub(crate) struct HookSet {
    pub(crate) hooks: Vec<Arc<Hook>>,
    pub(crate) meta: Meta,
}

/// An ordered block of collected steps performing under the state machine.
#[derive(Clone, Debug, Default)]
pub(crate) struct StepsBlock {
    pub(crate) steps: Vec<CollectedStep>,
}

/// One story of the performable tree.
#[derive(Debug)]
pub struct PerformableStory {
    pub(crate) path: String,
    pub(crate) given_story: bool,
    pub(crate) excluded: bool,
    pub(crate) filter_expression: String,

    pub(crate) before_hooks: HookSet,
    pub(crate) before_user: StepsBlock,
    pub(crate) given_stories: Vec<PerformableStory>,
    pub(crate) scenarios: Vec<PerformableScenario>,
    pub(crate) after_user: StepsBlock,
    pub(crate) after_hooks: HookSet,

    pub(crate) status: Option<Status>,
    pub(crate) timing: Timing,
}

impl PerformableStory {
    /// Path of the story.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Indicates whether the story was excluded by the meta filter.
    #[must_use]
    pub fn is_excluded(&self) -> bool {
        self.excluded
    }

    /// The story's scenarios.
    #[must_use]
    pub fn scenarios(&self) -> &[PerformableScenario] {
        &self.scenarios
    }

    /// Folded outcome, present once performed.
    #[must_use]
    pub fn status(&self) -> Option<Status> {
        self.status
    }

    /// Wall time the story took, once performed.
    #[must_use]
    pub fn timing(&self) -> Timing {
        self.timing
    }
}

/// One scenario of the performable tree: either a single normal execution
/// path or one-or-more example variants, never a mix.
#[derive(Debug)]
pub struct PerformableScenario {
    pub(crate) title: String,
    pub(crate) story_path: String,
    pub(crate) excluded: bool,
    pub(crate) filter_expression: String,

    pub(crate) normal: Option<ScenarioInstance>,
    pub(crate) examples: Vec<ScenarioInstance>,

    pub(crate) status: Option<Status>,
    pub(crate) timing: Timing,
}

impl PerformableScenario {
    /// Title of the scenario.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Indicates whether the scenario was excluded by the meta filter.
    #[must_use]
    pub fn is_excluded(&self) -> bool {
        self.excluded
    }

    /// Indicates whether this scenario performs as example variants.
    #[must_use]
    pub fn has_examples(&self) -> bool {
        !self.examples.is_empty()
    }

    /// Number of example variants.
    #[must_use]
    pub fn example_count(&self) -> usize {
        self.examples.len()
    }

    /// Folded outcome, present once performed.
    #[must_use]
    pub fn status(&self) -> Option<Status> {
        self.status
    }

    /// Example parameters of each variant, in order.
    pub fn example_parameters(
        &self,
    ) -> impl Iterator<Item = &LinkedHashMap<String, String>> {
        self.examples.iter().map(|e| &e.parameters)
    }

    /// Number of collected steps of each instance, in execution order.
    #[must_use]
    pub fn step_counts(&self) -> Vec<usize> {
        self.normal
            .iter()
            .chain(&self.examples)
            .map(|instance| instance.steps.steps.len())
            .collect()
    }
}

/// How one [`ScenarioInstance`] came to be.
#[derive(Clone, Debug)]
pub(crate) enum InstanceKind {
    /// The scenario's single normal execution path.
    Normal,

    /// One examples-row variant; `index` is absent for the implicit variant
    /// a story-level row induces on an example-less scenario.
    Example { index: Option<usize>, row: Row },
}

/// One executable variant of a scenario, with its bound parameters.
#[derive(Debug)]
pub(crate) struct ScenarioInstance {
    pub(crate) kind: InstanceKind,
    pub(crate) parameters: LinkedHashMap<String, String>,

    pub(crate) before_hooks: HookSet,
    pub(crate) before_user: StepsBlock,
    pub(crate) given_stories: Vec<PerformableStory>,
    pub(crate) steps: StepsBlock,
    pub(crate) after_user: StepsBlock,
    pub(crate) after_hooks: HookSet,
}
