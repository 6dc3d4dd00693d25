// Copyright (c) 2026  The narrative contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Failure taxonomy of the engine.
//!
//! Two families live here: [`Error`] covers build-time problems
//! (registration, configuration), while [`Failure`] covers everything that
//! can go wrong once stories are performing. [`Failure`]s are cheaply
//! [`Clone`]able, because the same cause is recorded in the step result that
//! produced it, in the [`State`] machine and in the shared [`BatchFailures`]
//! aggregate.
//!
//! [`State`]: crate::state::State

use std::{error::Error as StdError, fmt, sync::Arc, time::Duration};

use dashmap::DashMap;
use derive_more::{Display, Error};
use uuid::Uuid;

/// Build-time error of the engine: registering [`StepDefinition`]s or
/// assembling a [`Config`].
///
/// [`Config`]: crate::Config
/// [`StepDefinition`]: crate::step::StepDefinition
#[derive(Clone, Debug, Display, Error)]
pub enum Error {
    /// Two same-typed [`StepDefinition`]s overlap per the literal-prefix
    /// rule, so matching them could never be deterministic.
    ///
    /// [`StepDefinition`]: crate::step::StepDefinition
    #[display(fmt = "ambiguous step definition: `{}` overlaps `{}`", _0, _1)]
    AmbiguousStepDefinition(
        #[error(not(source))] String,
        #[error(not(source))] String,
    ),

    /// A step pattern failed to compile.
    #[display(fmt = "invalid step pattern `{}`: {}", pattern, message)]
    InvalidPattern {
        /// Pattern text as registered.
        pattern: String,

        /// Underlying [`regex`] compilation message.
        message: String,
    },

    /// A timeout rule could not be parsed.
    #[display(fmt = "invalid timeout rule `{}`: {}", rule, message)]
    InvalidTimeout {
        /// Rule text as configured.
        rule: String,

        /// What was wrong with it.
        message: String,
    },

    /// A given-story reference points at a story the wired-in resolver does
    /// not know.
    #[display(fmt = "given story `{}` cannot be resolved", _0)]
    GivenStoryNotFound(#[error(not(source))] String),

    /// The whole batch failed: one entry per (story path, failure identity).
    #[display(fmt = "{}", _0)]
    BatchFailed(#[error(not(source))] BatchFailures),
}

/// Cause of a conversion that could not be carried out by the
/// [`ConverterChain`].
///
/// [`ConverterChain`]: crate::convert::ConverterChain
#[derive(Clone, Debug, Display, Error)]
#[display(fmt = "cannot convert `{}` to `{}`: {}", value, target, message)]
pub struct ConversionFailed {
    /// Textual value the conversion started from.
    pub value: String,

    /// Display name of the requested target type.
    pub target: &'static str,

    /// Why the conversion failed (no path, malformed input, ...).
    pub message: String,
}

/// Unmatched step, flagged for stub generation.
///
/// Not an error by itself: it becomes one only under the
/// [`PendingStepPolicy::FailOnPending`] policy.
///
/// [`PendingStepPolicy::FailOnPending`]: crate::PendingStepPolicy::FailOnPending
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingStep {
    /// Original step text that nothing matched.
    pub step: String,

    /// Text of the previous non-And step, used to resolve the step type of
    /// the synthesized stub.
    pub previous_non_and: Option<String>,
}

impl PendingStep {
    /// Synthesizes a registration stub for this unmatched step, suitable for
    /// pasting into a step-definition module.
    #[must_use]
    pub fn stub(&self) -> String {
        let (keyword, rest) =
            self.step.split_once(' ').unwrap_or((self.step.as_str(), ""));
        let resolved = if keyword == "And" {
            self.previous_non_and
                .as_deref()
                .and_then(|prev| prev.split_once(' ').map(|(word, _)| word))
                .unwrap_or("Given")
        } else {
            keyword
        };
        let ctor = match resolved {
            "When" => "when",
            "Then" => "then",
            _ => "given",
        };
        format!("StepDefinition::{ctor}(\"{rest}\") /* {} */", self.step)
    }
}

impl fmt::Display for PendingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pending step: {}", self.step)
    }
}

/// Failure of a single step handler, wrapping whatever the handler returned
/// or panicked with, tagged with a correlation id so the same cause can be
/// cross-referenced between step results, scope summaries and the batch
/// aggregate.
#[derive(Clone, Debug)]
pub struct InvocationFailure {
    /// Correlation id of this failure.
    pub id: Uuid,

    /// Underlying cause.
    pub cause: Arc<dyn StdError + Send + Sync>,
}

impl InvocationFailure {
    /// Wraps the given `cause`, assigning it a fresh correlation id.
    #[must_use]
    pub fn new(cause: impl StdError + Send + Sync + 'static) -> Self {
        Self { id: Uuid::new_v4(), cause: Arc::new(cause) }
    }

    /// Wraps an opaque panic message.
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        Self::new(HandlerPanic(message.into()))
    }
}

impl fmt::Display for InvocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step invocation failed ({}): {}", self.id, self.cause)
    }
}

impl StdError for InvocationFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.cause.as_ref() as &(dyn StdError + 'static))
    }
}

/// Payload of a handler panic, preserved as an error message.
#[derive(Clone, Debug, Display, Error)]
#[display(fmt = "handler panicked: {}", _0)]
pub struct HandlerPanic(#[error(not(source))] pub String);

/// Cooperative cancellation of a story that overran its resolved timeout.
///
/// Reported distinctly from a failed story.
#[derive(Clone, Debug, Display, Error)]
#[display(
    fmt = "story `{}` cancelled: {:?} elapsed > {:?} timeout",
    path,
    elapsed,
    timeout
)]
pub struct Cancellation {
    /// Path of the cancelled story.
    pub path: String,

    /// Wall time the story had been running for when it was marked.
    pub elapsed: Duration,

    /// Timeout resolved for the story's path.
    pub timeout: Duration,
}

/// Anything that can go wrong (or redirect control flow) while a story
/// performs.
#[derive(Clone, Debug, Display)]
pub enum Failure {
    /// A textual value could not be converted to the type a handler declared.
    ///
    /// Becomes a failed step result, not a process crash.
    #[display(fmt = "{}", _0)]
    Conversion(ConversionFailed),

    /// One or more unmatched steps were found in a scope while the
    /// fail-on-pending policy is active.
    #[display(fmt = "pending steps found: {}", "_0.len()")]
    PendingFound(Vec<PendingStep>),

    /// A step handler returned an error or panicked.
    #[display(fmt = "{}", _0)]
    Invocation(InvocationFailure),

    /// Control-flow signal: re-run the current scenario from scratch.
    #[display(fmt = "restarting scenario: {}", _0)]
    RestartScenario(String),

    /// Control-flow signal: re-run the current story from scratch.
    #[display(fmt = "restarting story: {}", _0)]
    RestartStory(String),

    /// The owning story was cancelled after overrunning its timeout.
    #[display(fmt = "{}", _0)]
    Cancelled(Cancellation),
}

impl Failure {
    /// Wraps an arbitrary handler error into an [`Invocation`] failure.
    ///
    /// [`Invocation`]: Failure::Invocation
    #[must_use]
    pub fn invocation(cause: impl StdError + Send + Sync + 'static) -> Self {
        Self::Invocation(InvocationFailure::new(cause))
    }

    /// Indicates whether this failure is a pending-step marker rather than a
    /// genuine failure. Genuine failures always outrank pending markers in
    /// the [`State`] machine.
    ///
    /// [`State`]: crate::state::State
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::PendingFound(_))
    }

    /// Indicates whether this failure is a restart control-flow signal.
    #[must_use]
    pub fn is_restart(&self) -> bool {
        matches!(self, Self::RestartScenario(_) | Self::RestartStory(_))
    }

    /// Correlation id of this failure, if it carries one; a stable surrogate
    /// otherwise.
    #[must_use]
    pub fn correlation_id(&self) -> Uuid {
        match self {
            Self::Invocation(f) => f.id,
            other => {
                Uuid::new_v5(&Uuid::NAMESPACE_OID, other.to_string().as_bytes())
            }
        }
    }
}

impl StdError for Failure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Conversion(f) => Some(f),
            Self::Invocation(f) => Some(f),
            Self::Cancelled(f) => Some(f),
            Self::PendingFound(_)
            | Self::RestartScenario(_)
            | Self::RestartStory(_) => None,
        }
    }
}

impl From<ConversionFailed> for Failure {
    fn from(f: ConversionFailed) -> Self {
        Self::Conversion(f)
    }
}

/// Key of a single entry in [`BatchFailures`]: the story path plus the
/// failure's correlation id, so multiple distinct failures of the same story
/// stay distinct.
#[derive(Clone, Debug, Display, Eq, Hash, PartialEq)]
#[display(fmt = "{}@{}", path, id)]
pub struct FailureKey {
    /// Story path the failure belongs to.
    pub path: String,

    /// Correlation id of the failure.
    pub id: Uuid,
}

/// Append-only, thread-safe aggregate of story failures, keyed by
/// (story path, failure identity).
///
/// The single point of cross-thread mutable sharing in a run: story worker
/// tasks append, the orchestrator reads.
#[derive(Clone, Debug, Default)]
pub struct BatchFailures {
    failures: Arc<DashMap<FailureKey, Failure>>,
}

impl BatchFailures {
    /// Creates an empty aggregate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `failure` against the story at `path`.
    pub fn append(&self, path: impl Into<String>, failure: Failure) {
        let key =
            FailureKey { path: path.into(), id: failure.correlation_id() };
        drop(self.failures.insert(key, failure));
    }

    /// Number of recorded failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Indicates whether nothing has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Snapshot of the recorded failures, ordered by story path.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(FailureKey, Failure)> {
        let mut all: Vec<_> = self
            .failures
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        all.sort_by(|(a, _), (b, _)| {
            a.path.cmp(&b.path).then(a.id.cmp(&b.id))
        });
        all
    }

    /// Drops all failures recorded against the story at `path`.
    ///
    /// Used at the reset boundary of a restarting story.
    pub fn reset_story(&self, path: &str) {
        self.failures.retain(|key, _| key.path != path);
    }
}

impl fmt::Display for BatchFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} story failure(s):", self.len())?;
        for (key, failure) in self.snapshot() {
            writeln!(f, "  {key}: {failure}")?;
        }
        Ok(())
    }
}
