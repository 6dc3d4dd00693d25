// Copyright (c) 2026  The narrative contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Behavior-driven story execution engine.
//!
//! `narrative` matches human-readable textual steps against registered step
//! definitions, builds a tree of performable units (stories → scenarios →
//! steps, with before/after hooks, parameter tables and nested given
//! stories) and runs that tree, possibly many stories concurrently, while
//! tracking pass/fail/pending state, timeouts and cancellation.
//!
//! Story parsing, step discovery and report rendering are external
//! collaborators: stories arrive as pre-parsed [`Story`] values, step
//! definitions through the builder-style [`Registry`], and results leave as
//! an ordered [`event`] stream consumed by injected [`Reporter`]s.
//!
//! ```
//! use narrative::{
//!     Config, Registry, Scenario, StepDefinition, Story, StoryRunner,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut registry = Registry::new();
//! registry
//!     .register(
//!         StepDefinition::given("a pot with $n liters of water")
//!             .param::<u32>("n")
//!             .handler_fn(|ctx| {
//!                 let n: &u32 = ctx.args.get("n")?;
//!                 assert_eq!(*n, 3);
//!                 Ok(())
//!             }),
//!     )
//!     .unwrap();
//!
//! let story = Story::new("kettle.story").with_scenario(
//!     Scenario::new("boiling water")
//!         .with_steps(["Given a pot with 3 liters of water"]),
//! );
//!
//! let runner = StoryRunner::new(Config::default(), registry);
//! let summary = runner.run(vec![story]).await.unwrap();
//! assert_eq!(summary.statuses.len(), 1);
//! # }
//! ```

#![deny(rust_2018_idioms, unused_crate_dependencies)]
#![forbid(non_ascii_idents, unsafe_code)]

pub mod cli;
pub mod config;
pub mod context;
pub mod convert;
pub mod error;
pub mod event;
pub mod meta;
pub mod model;
pub mod pattern;
pub mod reporter;
pub mod runner;
pub mod state;
pub mod step;
pub mod tree;

pub use self::{
    config::{Config, Keywords, ParameterControls, PendingStepPolicy},
    context::{ContextStore, ObjectScope, RunContext},
    convert::ConverterChain,
    error::{BatchFailures, Error, Failure},
    event::{Event, RunEvent},
    meta::{Meta, MetaFilter},
    model::{
        ExamplesTable, GivenStories, GivenStory, Lifecycle, Scenario, Scope,
        Story,
    },
    reporter::{EventCollector, NullReporter, Reporter, Reporters},
    runner::{RunSummary, StoryRunner, TimeoutRules},
    step::{
        Hook, OutcomeFilter, RankingStrategy, Registry, ScenarioKind,
        StepDefinition, StepType,
    },
    tree::{PerformableRoot, Status, TreeBuilder},
};

// Exercised by the test suite rather than the library itself.
#[cfg(test)]
use tracing_subscriber as _;
