// Copyright (c) 2026  The narrative contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! User-facing builders of step definitions and hooks.

use std::{fmt, sync::Arc};

use futures::{future, FutureExt as _};

use super::{
    HookContext, HookFn, ParamSpec, Stage, StepContext, StepFn, StepOutcome,
    StepType,
};
use crate::{convert::TargetType, pattern::StepPattern};

/// Immutable description of one step: pattern text, type, priority,
/// declared parameters, handler and optional composed child steps.
///
/// Built once with the consuming setters, then handed to
/// [`Registry::register`]:
///
/// ```
/// use narrative::step::StepDefinition;
///
/// let _definition = StepDefinition::given("I have $n cukes")
///     .param::<u64>("n")
///     .handler_fn(|ctx| {
///         let n: &u64 = ctx.args.get("n")?;
///         assert!(*n < 100);
///         Ok(())
///     });
/// ```
///
/// [`Registry::register`]: crate::step::Registry::register
#[derive(Clone)]
pub struct StepDefinition {
    pub(crate) step_type: StepType,
    pub(crate) pattern: String,
    pub(crate) priority: i32,
    pub(crate) params: Vec<ParamSpec>,
    pub(crate) handler: Option<StepFn>,
    pub(crate) composed_of: Vec<String>,
}

impl StepDefinition {
    fn new(step_type: StepType, pattern: impl Into<String>) -> Self {
        Self {
            step_type,
            pattern: pattern.into(),
            priority: 0,
            params: Vec::new(),
            handler: None,
            composed_of: Vec::new(),
        }
    }

    /// Starts a Given definition for the `pattern`.
    #[must_use]
    pub fn given(pattern: impl Into<String>) -> Self {
        Self::new(StepType::Given, pattern)
    }

    /// Starts a When definition for the `pattern`.
    #[must_use]
    pub fn when(pattern: impl Into<String>) -> Self {
        Self::new(StepType::When, pattern)
    }

    /// Starts a Then definition for the `pattern`.
    #[must_use]
    pub fn then(pattern: impl Into<String>) -> Self {
        Self::new(StepType::Then, pattern)
    }

    /// Sets the explicit ranking priority; higher wins. Defaults to 0.
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Declares the placeholder `name` to convert to `T` before the handler
    /// runs.
    #[must_use]
    pub fn param<T: 'static>(mut self, name: impl Into<String>) -> Self {
        self.params
            .push(ParamSpec { name: name.into(), target: TargetType::of::<T>() });
        self
    }

    /// Sets an async handler.
    #[must_use]
    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: for<'c> Fn(
                StepContext<'c>,
            ) -> futures::future::BoxFuture<'c, StepOutcome>
            + Send
            + Sync
            + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Sets a synchronous handler.
    #[must_use]
    pub fn handler_fn<F>(mut self, handler: F) -> Self
    where
        F: for<'c> Fn(StepContext<'c>) -> StepOutcome + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(move |ctx| {
            future::ready(handler(ctx)).boxed()
        }));
        self
    }

    /// Makes this a composite definition expanding into the given child-step
    /// texts. Parameters captured from the pattern substitute into `<name>`
    /// references of the children.
    #[must_use]
    pub fn composed_of<S: Into<String>>(
        mut self,
        steps: impl IntoIterator<Item = S>,
    ) -> Self {
        self.composed_of = steps.into_iter().map(Into::into).collect();
        self
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("step_type", &self.step_type)
            .field("pattern", &self.pattern)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// A registered definition with its compiled pattern, as held by the
/// [`Registry`].
///
/// [`Registry`]: crate::step::Registry
pub struct Candidate {
    pub(crate) step_type: StepType,
    pub(crate) priority: i32,
    pub(crate) compiled: StepPattern,
    pub(crate) params: Vec<ParamSpec>,
    pub(crate) handler: Option<StepFn>,
    pub(crate) composed_of: Vec<String>,
    pub(crate) insertion: usize,
}

impl Candidate {
    /// Type of the registered step.
    #[must_use]
    pub fn step_type(&self) -> StepType {
        self.step_type
    }

    /// Pattern text as registered.
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.compiled.source()
    }

    /// Ranking priority.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Declared parameters.
    #[must_use]
    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Handler of the step, absent on purely composite definitions.
    #[must_use]
    pub fn handler(&self) -> Option<&StepFn> {
        self.handler.as_ref()
    }

    /// Indicates whether this definition expands into child steps.
    #[must_use]
    pub fn is_composite(&self) -> bool {
        !self.composed_of.is_empty()
    }

    /// The candidate's rendered name: starting word plus pattern.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{} {}", self.step_type, self.compiled.source())
    }
}

impl fmt::Debug for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("step_type", &self.step_type)
            .field("pattern", &self.compiled.source())
            .field("priority", &self.priority)
            .field("composite", &self.is_composite())
            .finish_non_exhaustive()
    }
}

/// Which scenario instances a scenario-scoped [`Hook`] applies to.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ScenarioKind {
    /// Every instance.
    #[default]
    Any,

    /// Only plain, non-example instances.
    Normal,

    /// Only example instances.
    Example,
}

/// Which outcomes an after-hook runs upon.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum OutcomeFilter {
    /// Runs regardless of the unit's outcome.
    #[default]
    Any,

    /// Runs only when the unit succeeded so far.
    Success,

    /// Runs only when the unit already failed.
    Failure,
}

/// Unit a [`Hook`] wraps.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HookScope {
    /// Around the whole batch of stories.
    Stories,

    /// Around each story; `given` selects whether the hook applies to given
    /// stories or to top-level ones.
    Story {
        /// Applies to given stories instead of top-level ones.
        given: bool,
    },

    /// Around each scenario instance of the selected kind.
    Scenario(ScenarioKind),
}

/// Handler-level before/after hook, registered beside step definitions.
///
/// Hooks of one (stage, scope) run ordered by `order`: descending before,
/// ascending after, so a pair with the same order nests symmetrically.
#[derive(Clone)]
pub struct Hook {
    pub(crate) stage: Stage,
    pub(crate) scope: HookScope,
    pub(crate) order: i32,
    pub(crate) outcome: OutcomeFilter,
    pub(crate) handler: HookFn,
}

impl Hook {
    fn new<F>(stage: Stage, scope: HookScope, handler: F) -> Self
    where
        F: for<'c> Fn(HookContext<'c>) -> StepOutcome + Send + Sync + 'static,
    {
        Self {
            stage,
            scope,
            order: 0,
            outcome: OutcomeFilter::Any,
            handler: Arc::new(move |ctx| future::ready(handler(ctx)).boxed()),
        }
    }

    /// Creates a hook running before all stories.
    #[must_use]
    pub fn before_stories<F>(handler: F) -> Self
    where
        F: for<'c> Fn(HookContext<'c>) -> StepOutcome + Send + Sync + 'static,
    {
        Self::new(Stage::Before, HookScope::Stories, handler)
    }

    /// Creates a hook running after all stories.
    #[must_use]
    pub fn after_stories<F>(handler: F) -> Self
    where
        F: for<'c> Fn(HookContext<'c>) -> StepOutcome + Send + Sync + 'static,
    {
        Self::new(Stage::After, HookScope::Stories, handler)
    }

    /// Creates a hook running before each top-level story.
    #[must_use]
    pub fn before_story<F>(handler: F) -> Self
    where
        F: for<'c> Fn(HookContext<'c>) -> StepOutcome + Send + Sync + 'static,
    {
        Self::new(Stage::Before, HookScope::Story { given: false }, handler)
    }

    /// Creates a hook running after each top-level story.
    #[must_use]
    pub fn after_story<F>(handler: F) -> Self
    where
        F: for<'c> Fn(HookContext<'c>) -> StepOutcome + Send + Sync + 'static,
    {
        Self::new(Stage::After, HookScope::Story { given: false }, handler)
    }

    /// Creates a hook running before each scenario instance of `kind`.
    #[must_use]
    pub fn before_scenario<F>(kind: ScenarioKind, handler: F) -> Self
    where
        F: for<'c> Fn(HookContext<'c>) -> StepOutcome + Send + Sync + 'static,
    {
        Self::new(Stage::Before, HookScope::Scenario(kind), handler)
    }

    /// Creates a hook running after each scenario instance of `kind`.
    #[must_use]
    pub fn after_scenario<F>(kind: ScenarioKind, handler: F) -> Self
    where
        F: for<'c> Fn(HookContext<'c>) -> StepOutcome + Send + Sync + 'static,
    {
        Self::new(Stage::After, HookScope::Scenario(kind), handler)
    }

    /// Scopes a story hook to given stories instead of top-level ones.
    #[must_use]
    pub fn for_given_stories(mut self) -> Self {
        if let HookScope::Story { .. } = self.scope {
            self.scope = HookScope::Story { given: true };
        }
        self
    }

    /// Sets the ordering weight.
    #[must_use]
    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Restricts an after-hook to the given outcome.
    #[must_use]
    pub fn upon(mut self, outcome: OutcomeFilter) -> Self {
        self.outcome = outcome;
        self
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("stage", &self.stage)
            .field("scope", &self.scope)
            .field("order", &self.order)
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}
