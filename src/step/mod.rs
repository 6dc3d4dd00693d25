// Copyright (c) 2026  The narrative contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Step definitions, hooks and the registry matching step texts against
//! them.
//!
//! A [`StepDefinition`] pairs a `$name`-placeholder pattern with a handler.
//! The [`Registry`] holds every definition, rejects ambiguous ones at
//! registration time and resolves textual steps (including `And`
//! continuation and composite expansion) into [`CollectedStep`]s ready to
//! perform.

mod definition;
mod registry;

pub use self::{
    definition::{Hook, HookScope, OutcomeFilter, ScenarioKind, StepDefinition},
    registry::{Registry, RankingStrategy},
};

use std::{any::Any, collections::HashMap, fmt, sync::Arc};

use futures::future::BoxFuture;
use linked_hash_map::LinkedHashMap;

use crate::{
    context::ContextStore,
    convert::{ConverterChain, TargetType},
    error::{ConversionFailed, Failure, PendingStep},
    meta::Meta,
};

/// Type of a registerable step. `And` and ignorable lines are not types of
/// their own: `And` resolves to the previous non-And step's type at match
/// time, ignorable lines match as no-ops.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StepType {
    /// Precondition step.
    Given,

    /// Action step.
    When,

    /// Verification step.
    Then,
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Given => "Given",
            Self::When => "When",
            Self::Then => "Then",
        })
    }
}

/// Execution stage of hooks and lifecycle step groups.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Stage {
    /// Runs before the unit's own steps.
    Before,

    /// Runs after the unit's own steps.
    After,
}

/// Declared parameter of a [`StepDefinition`]: a placeholder name and the
/// type its captured value converts to before the handler runs.
#[derive(Clone, Debug)]
pub struct ParamSpec {
    /// Placeholder name, without the `$` prefix.
    pub name: String,

    /// Conversion target.
    pub target: TargetType,
}

/// Outcome of a step handler or hook.
pub type StepOutcome = Result<(), Failure>;

/// Everything a step handler gets to work with.
pub struct StepContext<'c> {
    /// Captured and converted arguments of the step.
    pub args: &'c StepArgs,

    /// Scoped context-object store shared by the steps of one story.
    pub store: &'c mut ContextStore,

    /// Converter chain, for on-demand conversion of undeclared parameters.
    pub converters: &'c ConverterChain,
}

/// Handler of a matched step.
pub type StepFn =
    Arc<dyn for<'c> Fn(StepContext<'c>) -> BoxFuture<'c, StepOutcome> + Send + Sync>;

/// Everything a hook gets to work with.
pub struct HookContext<'c> {
    /// Meta of the unit the hook runs around (scenario meta inheriting from
    /// story meta).
    pub meta: &'c Meta,

    /// Scoped context-object store shared by the steps of one story.
    pub store: &'c mut ContextStore,
}

/// Handler of a before/after hook.
pub type HookFn =
    Arc<dyn for<'c> Fn(HookContext<'c>) -> BoxFuture<'c, StepOutcome> + Send + Sync>;

/// Captured arguments of one step execution.
///
/// Raw values are the placeholder captures after named-parameter resolution;
/// declared parameters are additionally pre-converted, so handlers (and dry
/// runs) surface conversion failures before any side effect.
#[derive(Default)]
pub struct StepArgs {
    /// The step text the arguments were captured from.
    pub text: String,

    values: LinkedHashMap<String, String>,
    converted: HashMap<String, Box<dyn Any + Send>>,
}

impl fmt::Debug for StepArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepArgs")
            .field("text", &self.text)
            .field("values", &self.values)
            .field("converted", &self.converted.len())
            .finish()
    }
}

impl StepArgs {
    pub(crate) fn new(
        text: impl Into<String>,
        values: LinkedHashMap<String, String>,
    ) -> Self {
        Self { text: text.into(), values, converted: HashMap::new() }
    }

    pub(crate) fn put_converted(
        &mut self,
        name: &str,
        value: Box<dyn Any + Send>,
    ) {
        drop(self.converted.insert(name.to_owned(), value));
    }

    /// Raw captured value of the placeholder `name`.
    #[must_use]
    pub fn raw(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Raw captured value at the given placeholder position.
    #[must_use]
    pub fn raw_at(&self, index: usize) -> Option<&str> {
        self.values.values().nth(index).map(String::as_str)
    }

    /// Pre-converted value of the declared parameter `name`.
    ///
    /// # Errors
    ///
    /// If `name` was not declared on the definition or its declared type is
    /// not `T`.
    pub fn get<T: 'static>(&self, name: &str) -> Result<&T, Failure> {
        self.converted
            .get(name)
            .and_then(|v| v.downcast_ref::<T>())
            .ok_or_else(|| {
                Failure::Conversion(ConversionFailed {
                    value: self.raw(name).unwrap_or_default().to_owned(),
                    target: std::any::type_name::<T>(),
                    message: format!(
                        "parameter `{name}` was not declared with this type"
                    ),
                })
            })
    }

    /// Number of captured placeholders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Indicates whether the step captured nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A textual step resolved against the [`Registry`], ready to perform.
#[derive(Clone, Debug)]
pub struct CollectedStep {
    /// The step's text as written.
    pub text: String,

    /// How the text resolved.
    pub kind: StepKind,
}

/// Resolution of one step text.
#[derive(Clone, Debug)]
pub enum StepKind {
    /// The text matched a definition.
    Matched(MatchedStep),

    /// Nothing matched; flagged for stub generation.
    Pending(PendingStep),

    /// Ignorable line, performing as a no-op but preserved in reporting.
    Ignorable,

    /// Plain comment line.
    Comment,
}

/// A step text matched to its definition, with captures and expanded
/// composite children.
#[derive(Clone, Debug)]
pub struct MatchedStep {
    /// The winning candidate.
    pub candidate: Arc<definition::Candidate>,

    /// Raw placeholder captures, in pattern order.
    pub captured: LinkedHashMap<String, String>,

    /// Named parameters accumulated at collection time (example rows,
    /// given-story and meta parameters), used to resolve `<name>` references
    /// at perform time.
    pub named: LinkedHashMap<String, String>,

    /// Recursively resolved children of a composite definition.
    pub composed: Vec<CollectedStep>,
}

pub use self::definition::Candidate;
