// Copyright (c) 2026  The narrative contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The step registry: registration-time ambiguity detection, ranked
//! matching and composite expansion.

use std::sync::Arc;

use itertools::Itertools as _;
use linked_hash_map::LinkedHashMap;

use super::{
    definition::{Candidate, Hook, HookScope, StepDefinition},
    CollectedStep, MatchedStep, Stage, StepKind,
};
use crate::{
    config::{Keywords, ParameterControls},
    error::{Error, PendingStep},
    pattern::StepPattern,
};

/// How candidates matching the same step text are ranked.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RankingStrategy {
    /// Descending explicit priority; insertion order breaks ties. The
    /// stable default.
    #[default]
    ByPriority,

    /// Minimum edit distance between the placeholder-stripped pattern and
    /// the step text; priority breaks ties.
    ByLevenshtein,
}

/// Holds every [`StepDefinition`] and [`Hook`], matches step texts against
/// them and expands composites.
#[derive(Debug, Default)]
pub struct Registry {
    keywords: Keywords,
    ranking: RankingStrategy,
    candidates: Vec<Arc<Candidate>>,
    hooks: Vec<Arc<Hook>>,
}

impl Registry {
    /// Creates an empty registry with default keywords and priority
    /// ranking.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the starting words used to strip step texts.
    #[must_use]
    pub fn with_keywords(mut self, keywords: Keywords) -> Self {
        self.keywords = keywords;
        self
    }

    /// Replaces the ranking strategy.
    #[must_use]
    pub fn with_ranking(mut self, ranking: RankingStrategy) -> Self {
        self.ranking = ranking;
        self
    }

    /// Registers a definition.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPattern`] if the pattern does not compile.
    /// - [`Error::AmbiguousStepDefinition`] if an existing definition of the
    ///   same type overlaps per the literal-prefix rule: either pattern
    ///   matches a leading portion of the other's rendered name up to a word
    ///   boundary. Checked here, never at match time.
    pub fn register(&mut self, definition: StepDefinition) -> Result<(), Error> {
        let StepDefinition {
            step_type,
            pattern,
            priority,
            params,
            handler,
            composed_of,
        } = definition;
        let compiled = StepPattern::compile(&pattern)?;

        for existing in
            self.candidates.iter().filter(|c| c.step_type == step_type)
        {
            let overlaps = compiled.prefix_matches(existing.pattern())
                || existing.compiled.prefix_matches(compiled.source());
            if overlaps {
                return Err(Error::AmbiguousStepDefinition(
                    format!("{step_type} {pattern}"),
                    existing.name(),
                ));
            }
        }

        tracing::debug!(%step_type, %pattern, priority, "registered step definition");
        self.candidates.push(Arc::new(Candidate {
            step_type,
            priority,
            compiled,
            params,
            handler,
            composed_of,
            insertion: self.candidates.len(),
        }));
        Ok(())
    }

    /// Registers a hook.
    pub fn register_hook(&mut self, hook: Hook) {
        self.hooks.push(Arc::new(hook));
    }

    /// The registered keywords.
    #[must_use]
    pub fn keywords(&self) -> &Keywords {
        &self.keywords
    }

    /// Hooks of one (stage, scope), ordered for execution: before-hooks by
    /// descending order, after-hooks by ascending order.
    #[must_use]
    pub fn hooks(&self, stage: Stage, scope: HookScope) -> Vec<Arc<Hook>> {
        let mut selected: Vec<_> = self
            .hooks
            .iter()
            .filter(|h| h.stage == stage && h.scope == scope)
            .cloned()
            .collect();
        match stage {
            Stage::Before => selected.sort_by_key(|h| std::cmp::Reverse(h.order)),
            Stage::After => selected.sort_by_key(|h| h.order),
        }
        selected
    }

    /// Matches `text` against the registered candidates, resolving `And`
    /// against `previous_non_and`. Returns the ranked winner with its raw
    /// captures, or `None` when nothing matches.
    #[must_use]
    pub fn find(
        &self,
        text: &str,
        previous_non_and: Option<&str>,
    ) -> Option<(Arc<Candidate>, LinkedHashMap<String, String>)> {
        let step_type = if self.keywords.is_and(text) {
            // An And step with no previous step cannot resolve a type.
            self.keywords.step_type_of(previous_non_and?)?
        } else {
            self.keywords.step_type_of(text)?
        };
        let remainder = self.keywords.strip_starting_word(text, step_type)?;

        let matching = self
            .candidates
            .iter()
            .filter(|c| c.step_type == step_type)
            .filter(|c| c.compiled.matches(remainder));

        let winner = match self.ranking {
            RankingStrategy::ByPriority => matching
                .sorted_by_key(|c| (std::cmp::Reverse(c.priority), c.insertion))
                .next(),
            RankingStrategy::ByLevenshtein => matching
                .sorted_by_key(|c| {
                    (
                        levenshtein(&c.compiled.scoring_literal(), remainder),
                        std::cmp::Reverse(c.priority),
                        c.insertion,
                    )
                })
                .next(),
        }?;

        let captured = winner.compiled.capture(remainder)?;
        tracing::trace!(text, pattern = winner.pattern(), "step matched");
        Some((Arc::clone(winner), captured))
    }

    /// Resolves an ordered list of step texts into [`CollectedStep`]s,
    /// tracking the previous non-And step, short-circuiting ignorable and
    /// comment lines, expanding composites and marking unmatched texts
    /// pending.
    #[must_use]
    pub fn collect_steps(
        &self,
        texts: &[String],
        parameters: &LinkedHashMap<String, String>,
        controls: &ParameterControls,
    ) -> Vec<CollectedStep> {
        let mut collected = Vec::with_capacity(texts.len());
        let mut previous_non_and: Option<String> = None;
        for text in texts {
            collected.push(self.collect_one(
                text,
                previous_non_and.as_deref(),
                parameters,
                controls,
            ));
            if !(self.keywords.is_and(text)
                || self.keywords.is_ignorable(text)
                || self.keywords.is_comment(text))
            {
                previous_non_and = Some(text.clone());
            }
        }
        collected
    }

    fn collect_one(
        &self,
        text: &str,
        previous_non_and: Option<&str>,
        parameters: &LinkedHashMap<String, String>,
        controls: &ParameterControls,
    ) -> CollectedStep {
        // Ignorable lines bypass ranked search entirely.
        if self.keywords.is_ignorable(text) {
            return CollectedStep {
                text: text.to_owned(),
                kind: StepKind::Ignorable,
            };
        }
        if self.keywords.is_comment(text) {
            return CollectedStep {
                text: text.to_owned(),
                kind: StepKind::Comment,
            };
        }

        match self.find(text, previous_non_and) {
            Some((candidate, captured)) => {
                let composed = if candidate.is_composite() {
                    let mut merged = parameters.clone();
                    for (name, value) in &captured {
                        drop(merged.insert(name.clone(), value.clone()));
                    }
                    self.expand_composed(&candidate, &merged, controls)
                } else {
                    Vec::new()
                };
                CollectedStep {
                    text: text.to_owned(),
                    kind: StepKind::Matched(MatchedStep {
                        candidate,
                        captured,
                        named: parameters.clone(),
                        composed,
                    }),
                }
            }
            None => CollectedStep {
                text: text.to_owned(),
                kind: StepKind::Pending(PendingStep {
                    step: text.to_owned(),
                    previous_non_and: previous_non_and.map(str::to_owned),
                }),
            },
        }
    }

    /// Expands a composite candidate's child texts, substituting the merged
    /// parameters by name and resolving each child against the full
    /// registry. Children may themselves be composite; no depth bound is
    /// enforced, so a self-referential composite recurses until the stack
    /// runs out.
    fn expand_composed(
        &self,
        candidate: &Candidate,
        parameters: &LinkedHashMap<String, String>,
        controls: &ParameterControls,
    ) -> Vec<CollectedStep> {
        let substituted: Vec<String> = candidate
            .composed_of
            .iter()
            .map(|child| controls.replace_delimited(child, parameters))
            .collect();
        self.collect_steps(&substituted, parameters, controls)
    }
}

/// Plain dynamic-programming edit distance, used by
/// [`RankingStrategy::ByLevenshtein`].
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(pattern: &str) -> StepDefinition {
        StepDefinition::given(pattern).handler_fn(|_| Ok(()))
    }

    #[test]
    fn overlapping_registrations_are_rejected_up_front() {
        let mut registry = Registry::new();
        registry.register(noop("I have $n cukes")).unwrap();

        let err = registry
            .register(noop("I have $n cukes in my belly"))
            .unwrap_err();
        assert!(matches!(err, Error::AmbiguousStepDefinition(..)));
    }

    #[test]
    fn same_pattern_on_another_type_is_fine() {
        let mut registry = Registry::new();
        registry.register(noop("the light is $color")).unwrap();
        registry
            .register(
                StepDefinition::then("the light is $color")
                    .handler_fn(|_| Ok(())),
            )
            .unwrap();
    }

    #[test]
    fn and_steps_inherit_the_previous_type() {
        let mut registry = Registry::new();
        registry.register(noop("the kettle is on")).unwrap();

        assert!(registry
            .find("And the kettle is on", Some("Given tea is ready"))
            .is_some());
        // No previous step: the And step cannot resolve.
        assert!(registry.find("And the kettle is on", None).is_none());
    }

    #[test]
    fn priority_ranking_is_stable_on_ties() {
        // Both patterns match `the big win result`; neither prefix-matches
        // the other's rendered name, so they coexist.
        let mut registry = Registry::new();
        registry.register(noop("the $a result")).unwrap();
        registry.register(noop("the big $b")).unwrap();

        let (winner, _) =
            registry.find("Given the big win result", None).unwrap();
        assert_eq!(winner.pattern(), "the $a result");

        let mut prioritised = Registry::new();
        prioritised.register(noop("the $a result")).unwrap();
        prioritised
            .register(
                StepDefinition::given("the big $b")
                    .priority(5)
                    .handler_fn(|_| Ok(())),
            )
            .unwrap();
        let (winner, _) =
            prioritised.find("Given the big win result", None).unwrap();
        assert_eq!(winner.pattern(), "the big $b");
    }

    #[test]
    fn levenshtein_prefers_the_closer_literal() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", "abc"), 0);
    }

    #[test]
    fn unmatched_texts_collect_as_pending() {
        let registry = Registry::new();
        let steps = registry.collect_steps(
            &["Given nothing matches this".to_owned()],
            &LinkedHashMap::new(),
            &ParameterControls::default(),
        );
        assert!(matches!(steps[0].kind, StepKind::Pending(_)));
    }

    #[test]
    fn composites_expand_with_substituted_parameters() {
        let mut registry = Registry::new();
        registry.register(noop("the user $who exists")).unwrap();
        registry
            .register(
                StepDefinition::given("a session for $name")
                    .composed_of(["Given the user <name> exists"]),
            )
            .unwrap();

        let steps = registry.collect_steps(
            &["Given a session for Alice".to_owned()],
            &LinkedHashMap::new(),
            &ParameterControls::default(),
        );
        let StepKind::Matched(matched) = &steps[0].kind else {
            panic!("expected a match");
        };
        assert_eq!(matched.composed.len(), 1);
        assert_eq!(matched.composed[0].text, "Given the user Alice exists");
        assert!(matches!(matched.composed[0].kind, StepKind::Matched(_)));
    }
}
