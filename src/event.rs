// Copyright (c) 2026  The narrative contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Key occurrences in the lifecycle of a run.
//!
//! The top-level enum here is [`RunEvent`]. Each nested enum mirrors one
//! level of the execution tree and tells what stage of execution the engine
//! is at, with detailed content about the precise sub-event. Events are
//! emitted in source order within a story; across stories the interleaving
//! follows execution.

use std::time::SystemTime;

use derive_more::{AsRef, Deref, DerefMut};
use sealed::sealed;

use crate::{
    error::{Cancellation, Failure},
    model::Row,
    tree::Status,
};

/// Arbitrary event, paired with the time it has happened at.
#[derive(AsRef, Clone, Copy, Debug, Deref, DerefMut)]
pub struct Event<T: ?Sized> {
    /// When this event has happened.
    pub at: SystemTime,

    /// Actual value of this event.
    #[as_ref]
    #[deref]
    #[deref_mut]
    pub value: T,
}

impl<T> Event<T> {
    /// Wraps the given `value`, stamping it with the current time.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self { at: SystemTime::now(), value }
    }

    /// Unwraps the inner value, losing the timestamp.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.value
    }
}

/// Top-level run event.
#[derive(Clone, Debug)]
pub enum RunEvent {
    /// The run has started.
    Started,

    /// Something happened within the story at the given path.
    Story(String, StoryEvent),

    /// The run has finished.
    Finished,
}

impl RunEvent {
    /// Constructs an event of a story having started.
    #[must_use]
    pub fn story_started(path: impl Into<String>, given_story: bool) -> Self {
        Self::Story(path.into(), StoryEvent::Started { given_story })
    }

    /// Constructs a scenario event within a story.
    #[must_use]
    pub fn scenario(
        path: impl Into<String>,
        title: impl Into<String>,
        event: ScenarioEvent,
    ) -> Self {
        Self::Story(path.into(), StoryEvent::Scenario(title.into(), event))
    }

    /// Constructs a step event within a scenario.
    #[must_use]
    pub fn step(
        path: impl Into<String>,
        title: impl Into<String>,
        text: impl Into<String>,
        event: StepEvent,
    ) -> Self {
        Self::scenario(path, title, ScenarioEvent::Step(text.into(), event))
    }
}

/// Event specific to one story.
#[derive(Clone, Debug)]
pub enum StoryEvent {
    /// The story has started performing.
    Started {
        /// Whether the story performs as a given story of another one.
        given_story: bool,
    },

    /// The story was excluded by the active meta filter. None of its hooks
    /// ran.
    Excluded {
        /// Textual form of the excluding filter.
        filter: String,
    },

    /// The tree walk performs without invoking handlers.
    DryRun,

    /// The story overran its timeout and was cancelled, distinct from a
    /// failure.
    Cancelled(Cancellation),

    /// The story is being re-run from scratch after a restart signal.
    Restarted {
        /// What the restarting handler reported.
        cause: String,
    },

    /// Stub suggestions for the unmatched steps collected in this story.
    PendingStubs(Vec<String>),

    /// Something happened to a story-scoped lifecycle step with the given
    /// text.
    Step(String, StepEvent),

    /// Something happened within the scenario with the given title.
    Scenario(String, ScenarioEvent),

    /// The story has finished.
    Finished {
        /// Folded outcome of the story.
        status: Status,
    },
}

/// Event specific to one scenario.
#[derive(Clone, Debug)]
pub enum ScenarioEvent {
    /// The scenario has started performing.
    Started,

    /// The scenario was excluded by the active meta filter.
    Excluded {
        /// Textual form of the excluding filter.
        filter: String,
    },

    /// An examples row starts performing as its own scenario instance.
    Example {
        /// Zero-based row index; absent for the implicit variant a
        /// story-level row induces on an example-less scenario.
        index: Option<usize>,

        /// The row's parameters.
        row: Row,
    },

    /// Something happened to the step with the given text.
    Step(String, StepEvent),

    /// Expanded composite children of the current step start performing.
    ComposedStepsStarted,

    /// Expanded composite children of the current step finished.
    ComposedStepsFinished,

    /// The scenario is being re-run from scratch after a restart signal.
    Restarted {
        /// What the restarting handler reported.
        cause: String,
    },

    /// The scenario has finished.
    Finished {
        /// Folded outcome of the scenario.
        status: Status,
    },
}

/// Outcome of one step.
#[derive(Clone, Debug)]
pub enum StepEvent {
    /// The step has started performing.
    Started,

    /// The step performed successfully.
    Successful,

    /// The step failed.
    Failed(Failure),

    /// No definition matched the step's text; flagged for stub generation.
    Pending,

    /// The step was not performed because its scope had already failed.
    NotPerformed,

    /// The step is an ignorable line, preserved for reporting.
    Ignorable,

    /// The step is a plain comment line.
    Comment,
}

/// Extension of a [`RunEvent`] allowing to pick it apart without matching
/// the whole tree.
#[sealed]
pub trait Ext {
    /// Path of the story this event belongs to, if any.
    #[must_use]
    fn story_path(&self) -> Option<&str>;

    /// Step text and outcome, when this is a step event at any depth.
    #[must_use]
    fn step(&self) -> Option<(&str, &StepEvent)>;

    /// Folded status, when this is a finished event of a story or scenario.
    #[must_use]
    fn finished_status(&self) -> Option<Status>;
}

#[sealed]
impl Ext for RunEvent {
    fn story_path(&self) -> Option<&str> {
        match self {
            Self::Story(path, _) => Some(path),
            Self::Started | Self::Finished => None,
        }
    }

    fn step(&self) -> Option<(&str, &StepEvent)> {
        match self {
            Self::Story(_, StoryEvent::Step(text, event))
            | Self::Story(
                _,
                StoryEvent::Scenario(_, ScenarioEvent::Step(text, event)),
            ) => Some((text, event)),
            _ => None,
        }
    }

    fn finished_status(&self) -> Option<Status> {
        match self {
            Self::Story(_, StoryEvent::Finished { status })
            | Self::Story(
                _,
                StoryEvent::Scenario(_, ScenarioEvent::Finished { status }),
            ) => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_dereference_to_their_value() {
        let event = Event::new(RunEvent::Started);
        assert!(matches!(*event, RunEvent::Started));
    }

    #[test]
    fn constructors_nest_the_tree() {
        let event = RunEvent::step(
            "a.story",
            "a scenario",
            "Given a step",
            StepEvent::Successful,
        );
        let RunEvent::Story(path, StoryEvent::Scenario(title, scenario)) =
            event
        else {
            panic!("expected a story event");
        };
        assert_eq!(path, "a.story");
        assert_eq!(title, "a scenario");
        assert!(matches!(
            scenario,
            ScenarioEvent::Step(text, StepEvent::Successful) if text == "Given a step"
        ));
    }
}
