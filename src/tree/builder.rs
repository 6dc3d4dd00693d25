// Copyright (c) 2026  The narrative contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Expansion of [`Story`] values into the performable tree.

use linked_hash_map::LinkedHashMap;

use super::{
    HookSet, InstanceKind, PerformableRoot, PerformableScenario,
    PerformableStory, ScenarioInstance, StepsBlock,
};
use crate::{
    config::Config,
    convert::ConverterChain,
    error::Error,
    meta::{Meta, MetaFilter},
    model::{GivenStories, Row, Scenario, Scope, Story},
    step::{HookScope, Registry, ScenarioKind, Stage},
};

/// Key of the reserved examples-table column carrying per-row meta.
const META_COLUMN: &str = "meta";

/// Resolves the story a given-story path refers to.
///
/// The engine never reads story files itself; resolution goes through
/// whatever loader the embedder wires in.
pub trait StoryResolver: Send + Sync {
    /// The story at `path`, if the loader knows it.
    fn story_at(&self, path: &str) -> Option<Story>;
}

/// Resolver over a fixed set of already-loaded stories.
impl StoryResolver for Vec<Story> {
    fn story_at(&self, path: &str) -> Option<Story> {
        self.iter().find(|s| s.path == path).cloned()
    }
}

/// Builds a [`PerformableRoot`] out of stories, the registry and the active
/// meta filter.
pub struct TreeBuilder<'a> {
    config: &'a Config,
    registry: &'a Registry,
    converters: &'a ConverterChain,
    filter: &'a MetaFilter,
    resolver: &'a dyn StoryResolver,
}

impl<'a> TreeBuilder<'a> {
    /// Creates a builder over the given collaborators.
    #[must_use]
    pub fn new(
        config: &'a Config,
        registry: &'a Registry,
        converters: &'a ConverterChain,
        filter: &'a MetaFilter,
        resolver: &'a dyn StoryResolver,
    ) -> Self {
        Self { config, registry, converters, filter, resolver }
    }

    /// Expands `stories` into a performable tree.
    ///
    /// # Errors
    ///
    /// If a given-story reference cannot be resolved.
    pub fn build(&self, stories: &[Story]) -> Result<PerformableRoot, Error> {
        let mut root = PerformableRoot {
            before_hooks: HookSet {
                hooks: self.registry.hooks(Stage::Before, HookScope::Stories),
                meta: Meta::new(),
            },
            stories: Vec::with_capacity(stories.len()),
            after_hooks: HookSet {
                hooks: self.registry.hooks(Stage::After, HookScope::Stories),
                meta: Meta::new(),
            },
        };
        for story in stories {
            let mut parameters = LinkedHashMap::new();
            root.stories
                .push(self.performable_story(story, &mut parameters, false)?);
        }
        Ok(root)
    }

    fn performable_story(
        &self,
        story: &Story,
        parameters: &mut LinkedHashMap<String, String>,
        given_story: bool,
    ) -> Result<PerformableStory, Error> {
        let scenario_excluded: Vec<bool> = story
            .scenarios
            .iter()
            .map(|scenario| {
                self.filter
                    .excludes(&scenario.meta.inherit_from(&story.meta))
            })
            .collect();
        // A story is skipped only when no scenario within it is included.
        let excluded = if scenario_excluded.is_empty() {
            self.filter.excludes(&story.meta)
        } else {
            scenario_excluded.iter().all(|e| *e)
        };

        let mut performable = PerformableStory {
            path: story.path.clone(),
            given_story,
            excluded,
            filter_expression: self.filter.as_str().to_owned(),
            before_hooks: HookSet::default(),
            before_user: StepsBlock::default(),
            given_stories: Vec::new(),
            scenarios: Vec::new(),
            after_user: StepsBlock::default(),
            after_hooks: HookSet::default(),
            status: None,
            timing: super::Timing::default(),
        };
        if excluded {
            return Ok(performable);
        }

        let story_scope = HookScope::Story { given: given_story };
        performable.before_hooks = HookSet {
            hooks: self.registry.hooks(Stage::Before, story_scope),
            meta: story.meta.clone(),
        };
        performable.after_hooks = HookSet {
            hooks: self.registry.hooks(Stage::After, story_scope),
            meta: story.meta.clone(),
        };
        performable.before_user = self.lifecycle_block(
            story,
            Scope::Story,
            Stage::Before,
            parameters,
        );
        performable.after_user =
            self.lifecycle_block(story, Scope::Story, Stage::After, parameters);

        performable.scenarios =
            self.performable_scenarios(story, parameters, &scenario_excluded)?;

        // Given stories attach only when the story has included scenarios.
        let any_included =
            performable.scenarios.iter().any(|s| !s.excluded);
        if any_included {
            let mut given_parameters = parameters.clone();
            add_meta_parameters(&mut given_parameters, &story.meta);
            performable.given_stories = self
                .performable_given_stories(
                    &story.given_stories,
                    &mut given_parameters,
                )?;
        }

        Ok(performable)
    }

    fn performable_scenarios(
        &self,
        story: &Story,
        parameters: &LinkedHashMap<String, String>,
        scenario_excluded: &[bool],
    ) -> Result<Vec<PerformableScenario>, Error> {
        let story_rows = self.story_example_rows(story);
        let mut scenarios = Vec::new();
        match story_rows {
            None => {
                for (scenario, excluded) in
                    story.scenarios.iter().zip(scenario_excluded)
                {
                    scenarios.push(self.performable_scenario(
                        story,
                        scenario,
                        &scenario.title,
                        parameters,
                        *excluded,
                        &Row::new(),
                    )?);
                }
            }
            Some(rows) => {
                for (i, story_row) in rows.iter().enumerate() {
                    for (scenario, excluded) in
                        story.scenarios.iter().zip(scenario_excluded)
                    {
                        let title =
                            format!("{} [{}]", scenario.title, i + 1);
                        scenarios.push(self.performable_scenario(
                            story,
                            scenario,
                            &title,
                            parameters,
                            *excluded,
                            story_row,
                        )?);
                    }
                }
            }
        }
        Ok(scenarios)
    }

    /// Story-level example rows off the lifecycle, values converted through
    /// the chain; `None` when the story declares no examples.
    fn story_example_rows(&self, story: &Story) -> Option<Vec<Row>> {
        let table = &story.lifecycle.examples;
        if table.is_empty() {
            return None;
        }
        Some(
            table
                .rows()
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|(name, value)| {
                            (name.clone(), self.convert_value(value))
                        })
                        .collect()
                })
                .collect(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn performable_scenario(
        &self,
        story: &Story,
        scenario: &Scenario,
        title: &str,
        story_parameters: &LinkedHashMap<String, String>,
        excluded: bool,
        story_row: &Row,
    ) -> Result<PerformableScenario, Error> {
        let mut performable = PerformableScenario {
            title: title.to_owned(),
            story_path: story.path.clone(),
            excluded,
            filter_expression: self.filter.as_str().to_owned(),
            normal: None,
            examples: Vec::new(),
            status: None,
            timing: super::Timing::default(),
        };
        if excluded {
            return Ok(performable);
        }

        let meta = scenario.meta.inherit_from(&story.meta);
        if self.parameterised_by_examples(scenario) {
            for (index, example_row) in
                scenario.examples.rows().iter().enumerate()
            {
                let mut merged: LinkedHashMap<String, String> =
                    story_parameters.clone();
                for (name, value) in story_row {
                    drop(merged.insert(name.clone(), value.clone()));
                }
                for (name, value) in example_row {
                    drop(merged.insert(name.clone(), value.clone()));
                }
                // Story-row values substitute into scenario-row values, then
                // each value runs through the chain.
                for (_, value) in merged.iter_mut() {
                    let substituted = self
                        .config
                        .parameter_controls
                        .replace_delimited(value, story_row);
                    *value = self.convert_value(&substituted);
                }

                let row_meta = example_meta(&merged).inherit_from(&meta);
                if !row_meta.is_empty() && self.filter.excludes(&row_meta) {
                    tracing::debug!(
                        scenario = title,
                        index,
                        "example row excluded by meta filter"
                    );
                    continue;
                }

                performable.examples.push(self.scenario_instance(
                    story,
                    scenario,
                    &meta,
                    merged.clone(),
                    InstanceKind::Example {
                        index: Some(index),
                        row: example_row.clone(),
                    },
                )?);
            }
        } else if !story_row.is_empty() {
            // A story-level row on an example-less scenario yields a single
            // implicit variant bound to the story row alone; the index stays
            // unset on purpose.
            let mut merged = story_parameters.clone();
            for (name, value) in story_row {
                drop(merged.insert(name.clone(), value.clone()));
            }
            let row_meta = example_meta(&merged).inherit_from(&meta);
            if row_meta.is_empty() || !self.filter.excludes(&row_meta) {
                performable.examples.push(self.scenario_instance(
                    story,
                    scenario,
                    &meta,
                    merged,
                    InstanceKind::Example { index: None, row: story_row.clone() },
                )?);
            }
        } else {
            performable.normal = Some(self.scenario_instance(
                story,
                scenario,
                &meta,
                story_parameters.clone(),
                InstanceKind::Normal,
            )?);
        }
        Ok(performable)
    }

    /// The explicit precedence rule: a non-empty examples table only
    /// parametrizes a scenario whose given stories do not themselves require
    /// parameters; given-story parameter binding wins.
    fn parameterised_by_examples(&self, scenario: &Scenario) -> bool {
        !scenario.examples.is_empty()
            && !scenario.given_stories.require_parameters()
    }

    fn scenario_instance(
        &self,
        story: &Story,
        scenario: &Scenario,
        meta: &Meta,
        mut parameters: LinkedHashMap<String, String>,
        kind: InstanceKind,
    ) -> Result<ScenarioInstance, Error> {
        let kind_scope = HookScope::Scenario(match &kind {
            InstanceKind::Normal => ScenarioKind::Normal,
            InstanceKind::Example { .. } => ScenarioKind::Example,
        });
        let any_scope = HookScope::Scenario(ScenarioKind::Any);

        let mut before_hooks =
            self.registry.hooks(Stage::Before, any_scope);
        before_hooks.extend(self.registry.hooks(Stage::Before, kind_scope));
        let mut after_hooks = self.registry.hooks(Stage::After, kind_scope);
        after_hooks.extend(self.registry.hooks(Stage::After, any_scope));

        let before_user = self.scenario_lifecycle_block(
            story,
            Stage::Before,
            &parameters,
        );
        let after_user =
            self.scenario_lifecycle_block(story, Stage::After, &parameters);

        add_meta_parameters(&mut parameters, meta);
        let given_stories = self.performable_given_stories(
            &scenario.given_stories,
            &mut parameters,
        )?;

        let steps = self.scenario_steps(story, scenario, &parameters);

        Ok(ScenarioInstance {
            kind,
            parameters: parameters.clone(),
            before_hooks: HookSet { hooks: before_hooks, meta: meta.clone() },
            before_user,
            given_stories,
            steps,
            after_user,
            after_hooks: HookSet { hooks: after_hooks, meta: meta.clone() },
        })
    }

    /// Assembles the scenario's own steps, each wrapped in the step-scoped
    /// lifecycle steps.
    fn scenario_steps(
        &self,
        story: &Story,
        scenario: &Scenario,
        parameters: &LinkedHashMap<String, String>,
    ) -> StepsBlock {
        let controls = &self.config.parameter_controls;
        let before_each: Vec<String> = story
            .lifecycle
            .before_steps(Scope::Step)
            .map(str::to_owned)
            .collect();
        let after_each: Vec<String> = story
            .lifecycle
            .after_steps(Scope::Step)
            .map(str::to_owned)
            .collect();

        let mut texts: Vec<String> = Vec::new();
        for step in &scenario.steps {
            texts.extend(before_each.iter().cloned());
            texts.push(step.clone());
            texts.extend(after_each.iter().cloned());
        }
        StepsBlock {
            steps: self.registry.collect_steps(&texts, parameters, controls),
        }
    }

    fn lifecycle_block(
        &self,
        story: &Story,
        scope: Scope,
        stage: Stage,
        parameters: &LinkedHashMap<String, String>,
    ) -> StepsBlock {
        let texts: Vec<String> = match stage {
            Stage::Before => story
                .lifecycle
                .before_steps(scope)
                .map(str::to_owned)
                .collect(),
            Stage::After => story
                .lifecycle
                .after_steps(scope)
                .map(str::to_owned)
                .collect(),
        };
        StepsBlock {
            steps: self.registry.collect_steps(
                &texts,
                parameters,
                &self.config.parameter_controls,
            ),
        }
    }

    fn scenario_lifecycle_block(
        &self,
        story: &Story,
        stage: Stage,
        parameters: &LinkedHashMap<String, String>,
    ) -> StepsBlock {
        self.lifecycle_block(story, Scope::Scenario, stage, parameters)
    }

    /// Resolves given stories recursively through the same builder,
    /// accumulating parameters across siblings.
    fn performable_given_stories(
        &self,
        given: &GivenStories,
        parameters: &mut LinkedHashMap<String, String>,
    ) -> Result<Vec<PerformableStory>, Error> {
        let mut stories = Vec::new();
        for reference in given.stories() {
            let story = self
                .resolver
                .story_at(&reference.path)
                .ok_or_else(|| {
                    Error::GivenStoryNotFound(reference.path.clone())
                })?;
            let story = if reference.has_anchor_parameters() {
                anchored_story(&story, &reference.anchor_parameters)
            } else {
                story
            };
            for (name, value) in &reference.anchor_parameters {
                drop(parameters.insert(name.clone(), value.clone()));
            }
            stories.push(self.performable_story(&story, parameters, true)?);
        }
        Ok(stories)
    }

    fn convert_value(&self, value: &str) -> String {
        self.converters
            .convert_to::<String>(value)
            .unwrap_or_else(|_| value.to_owned())
    }
}

/// Adds every meta property not already present as a named parameter.
fn add_meta_parameters(
    parameters: &mut LinkedHashMap<String, String>,
    meta: &Meta,
) {
    for (name, value) in meta.iter() {
        if !parameters.contains_key(name) {
            drop(parameters.insert(name.to_owned(), value.to_owned()));
        }
    }
}

/// Per-row meta off the reserved `meta` column.
fn example_meta(parameters: &LinkedHashMap<String, String>) -> Meta {
    parameters
        .get(META_COLUMN)
        .map(|value| Meta::parse(value))
        .unwrap_or_default()
}

/// Keeps only the scenarios whose meta matches the anchor parameters: the
/// first anchor name a scenario's meta carries decides by value equality.
fn anchored_story(
    story: &Story,
    anchors: &LinkedHashMap<String, String>,
) -> Story {
    if anchors.is_empty() {
        return story.clone();
    }
    let scenarios = story
        .scenarios
        .iter()
        .filter(|scenario| {
            anchors.iter().find_map(|(name, value)| {
                scenario
                    .meta
                    .has_property(name)
                    .then(|| scenario.meta.property(name) == value)
            }) == Some(true)
        })
        .cloned()
        .collect();
    story.clone_with_scenarios(scenarios)
}
