// Copyright (c) 2026  The narrative contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Execution of the performable tree.
//!
//! Each node's `perform` walks its sublists through the [`State`] machine,
//! emitting paired started/finished events. Restart signals unwind to the
//! loop re-running their scope; cancellation unwinds the whole story walk.
//!
//! [`State`]: crate::state::State

use std::{panic::AssertUnwindSafe, sync::Arc, time::Instant};

use futures::{future::BoxFuture, FutureExt as _};
use linked_hash_map::LinkedHashMap;

use super::{
    HookSet, InstanceKind, PerformableScenario, PerformableStory,
    ScenarioInstance, Status, StepsBlock, Timing,
};
use crate::{
    context::RunContext,
    error::{Failure, InvocationFailure, PendingStep},
    event::{RunEvent, ScenarioEvent, StepEvent, StoryEvent},
    step::{
        CollectedStep, HookContext, MatchedStep, Stage, StepArgs, StepContext,
        StepKind,
    },
};

/// Where a steps block reports its step events.
#[derive(Clone, Copy)]
pub(crate) enum EventScope<'s> {
    /// Story-scoped lifecycle steps of the story at the given path.
    Story(&'s str),

    /// Scenario steps of (story path, scenario title).
    Scenario(&'s str, &'s str),
}

impl EventScope<'_> {
    fn step_event(&self, text: &str, event: StepEvent) -> RunEvent {
        match self {
            Self::Story(path) => RunEvent::Story(
                (*path).to_owned(),
                StoryEvent::Step(text.to_owned(), event),
            ),
            Self::Scenario(path, title) => {
                RunEvent::step(*path, *title, text, event)
            }
        }
    }
}

impl PerformableStory {
    /// Performs this story, re-running it from scratch for as long as a
    /// story-restart signal is raised. No bound on the restart count is
    /// enforced.
    pub(crate) fn perform<'c>(
        &'c mut self,
        ctx: &'c mut RunContext,
    ) -> BoxFuture<'c, Result<(), Failure>> {
        async move {
            loop {
                let outcome = self.perform_once(ctx).await;
                match outcome {
                    Ok(()) => {
                        if let Some(Failure::RestartStory(cause)) =
                            ctx.state().failure()
                        {
                            let cause = cause.clone();
                            tracing::debug!(path = %self.path, %cause, "restarting story");
                            ctx.emit(RunEvent::Story(
                                self.path.clone(),
                                StoryEvent::Restarted { cause },
                            ));
                            ctx.reset_state();
                            if !self.given_story {
                                ctx.reset_story_failures();
                            }
                            continue;
                        }
                        if ctx.failure_occurred() {
                            ctx.record_failure();
                        }
                        return Ok(());
                    }
                    Err(Failure::Cancelled(cancellation)) => {
                        self.status = Some(Status::NotPerformed);
                        ctx.emit(RunEvent::Story(
                            self.path.clone(),
                            StoryEvent::Cancelled(cancellation.clone()),
                        ));
                        ctx.emit(RunEvent::Story(
                            self.path.clone(),
                            StoryEvent::Finished {
                                status: Status::NotPerformed,
                            },
                        ));
                        return Err(Failure::Cancelled(cancellation));
                    }
                    Err(other) => return Err(other),
                }
            }
        }
        .boxed()
    }

    async fn perform_once(
        &mut self,
        ctx: &mut RunContext,
    ) -> Result<(), Failure> {
        if self.excluded {
            ctx.emit(RunEvent::Story(
                self.path.clone(),
                StoryEvent::Excluded {
                    filter: self.filter_expression.clone(),
                },
            ));
            self.status = Some(Status::Excluded);
            return Ok(());
        }

        if !self.given_story {
            if ctx.config.reset_state_before_story {
                ctx.reset_state();
                ctx.reset_story_failures();
            }
            if ctx.config.dry_run {
                ctx.emit(RunEvent::Story(
                    self.path.clone(),
                    StoryEvent::DryRun,
                ));
            }
        }
        ctx.set_path(self.path.clone());
        ctx.store.reset_story();

        let started = Instant::now();
        ctx.emit(RunEvent::story_started(&self.path, self.given_story));
        let initial = ctx.state().clone();

        let result = self.perform_content(ctx).await;

        self.timing = Timing { duration: started.elapsed() };
        let status = ctx.status(&initial);
        self.status = Some(status);

        let pending = ctx.take_pending();
        if !pending.is_empty() {
            ctx.emit(RunEvent::Story(
                self.path.clone(),
                StoryEvent::PendingStubs(
                    pending.iter().map(PendingStep::stub).collect(),
                ),
            ));
        }
        result?;
        ctx.emit(RunEvent::Story(
            self.path.clone(),
            StoryEvent::Finished { status },
        ));
        Ok(())
    }

    async fn perform_content(
        &mut self,
        ctx: &mut RunContext,
    ) -> Result<(), Failure> {
        self.before_hooks.perform(ctx).await?;
        self.before_user
            .perform(ctx, EventScope::Story(&self.path))
            .await?;

        for given in &mut self.given_stories {
            given.perform(ctx).await?;
            ctx.set_path(self.path.clone());
        }

        let skip_after_given = ctx.failure_occurred()
            && ctx.config.skip_story_if_given_story_failed;
        if !skip_after_given {
            for scenario in &mut self.scenarios {
                scenario.perform(ctx, &self.path).await?;
            }
        }

        self.after_user
            .perform(ctx, EventScope::Story(&self.path))
            .await?;
        self.after_hooks.perform(ctx).await?;
        Ok(())
    }
}

impl PerformableScenario {
    pub(crate) fn perform<'c>(
        &'c mut self,
        ctx: &'c mut RunContext,
        path: &'c str,
    ) -> BoxFuture<'c, Result<(), Failure>> {
        async move {
            if self.excluded {
                ctx.emit(RunEvent::scenario(
                    path,
                    &self.title,
                    ScenarioEvent::Excluded {
                        filter: self.filter_expression.clone(),
                    },
                ));
                self.status = Some(Status::Excluded);
                return Ok(());
            }

            if ctx.failure_occurred()
                && ctx.config.skip_scenarios_after_failure
            {
                self.status = Some(Status::NotPerformed);
                ctx.emit(RunEvent::scenario(
                    path,
                    &self.title,
                    ScenarioEvent::Started,
                ));
                ctx.emit(RunEvent::scenario(
                    path,
                    &self.title,
                    ScenarioEvent::Finished {
                        status: Status::NotPerformed,
                    },
                ));
                return Ok(());
            }

            ctx.store.reset_scenario();
            let started = Instant::now();
            ctx.emit(RunEvent::scenario(
                path,
                &self.title,
                ScenarioEvent::Started,
            ));
            let initial = ctx.state().clone();

            let result = {
                let title = self.title.clone();
                async {
                    if self.examples.is_empty() {
                        if let Some(normal) = &mut self.normal {
                            ctx.store.reset_example();
                            normal.perform(ctx, path, &title).await?;
                        }
                    } else {
                        for example in &mut self.examples {
                            example.perform(ctx, path, &title).await?;
                        }
                    }
                    Ok::<(), Failure>(())
                }
                .await
            };

            self.timing = Timing { duration: started.elapsed() };
            let status = ctx.status(&initial);
            self.status = Some(status);
            result?;
            ctx.emit(RunEvent::scenario(
                path,
                &self.title,
                ScenarioEvent::Finished { status },
            ));
            Ok(())
        }
        .boxed()
    }
}

impl ScenarioInstance {
    async fn perform(
        &mut self,
        ctx: &mut RunContext,
        path: &str,
        title: &str,
    ) -> Result<(), Failure> {
        if ctx.config.reset_state_before_scenario {
            if ctx.failure_occurred() {
                ctx.record_failure();
            }
            ctx.reset_state();
        }

        if let InstanceKind::Example { index, row } = &self.kind {
            ctx.store.reset_example();
            ctx.emit(RunEvent::scenario(
                path,
                title,
                ScenarioEvent::Example { index: *index, row: row.clone() },
            ));
        }

        self.before_hooks.perform(ctx).await?;
        self.before_user
            .perform(ctx, EventScope::Scenario(path, title))
            .await?;

        for given in &mut self.given_stories {
            given.perform(ctx).await?;
            ctx.set_path(path.to_owned());
        }

        // The restart loop: discard partial results and re-run the steps
        // from scratch until no restart signal is raised. No retry bound.
        loop {
            match self
                .steps
                .perform(ctx, EventScope::Scenario(path, title))
                .await
            {
                Err(Failure::RestartScenario(cause)) => {
                    tracing::debug!(scenario = title, %cause, "restarting scenario");
                    ctx.emit(RunEvent::scenario(
                        path,
                        title,
                        ScenarioEvent::Restarted { cause },
                    ));
                    continue;
                }
                other => other?,
            }
            break;
        }

        self.after_user
            .perform(ctx, EventScope::Scenario(path, title))
            .await?;
        self.after_hooks.perform(ctx).await?;
        Ok(())
    }
}

impl HookSet {
    /// Performs the hooks of one stage. Before-hooks are skipped in a failed
    /// state; after-hooks consult their outcome filter, so cleanup runs even
    /// after failures. Hook failures fold into the state machine like step
    /// failures.
    pub(crate) async fn perform(
        &self,
        ctx: &mut RunContext,
    ) -> Result<(), Failure> {
        for hook in &self.hooks {
            ctx.check_cancelled()?;
            let failed = ctx.failure_occurred();
            let run = match (failed, hook.stage, hook.outcome) {
                (_, _, crate::step::OutcomeFilter::Any) => {
                    !(failed && hook.stage == Stage::Before)
                }
                (false, _, crate::step::OutcomeFilter::Success) => true,
                (true, Stage::After, crate::step::OutcomeFilter::Failure) => {
                    true
                }
                _ => false,
            };
            if !run || ctx.config.dry_run {
                continue;
            }

            let outcome = {
                let handler = Arc::clone(&hook.handler);
                let context =
                    HookContext { meta: &self.meta, store: &mut ctx.store };
                AssertUnwindSafe(handler(context)).catch_unwind().await
            };
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(failure)) => {
                    if failure.is_restart() {
                        return Err(failure);
                    }
                    ctx.fold_failure(failure);
                }
                Err(panic_info) => {
                    ctx.fold_failure(Failure::Invocation(
                        InvocationFailure::from_message(describe_panic(
                            &panic_info,
                        )),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl StepsBlock {
    /// Performs an ordered block of collected steps under the state
    /// machine, checking cancellation before each one, and records the
    /// block's pending steps at the end.
    async fn perform(
        &self,
        ctx: &mut RunContext,
        scope: EventScope<'_>,
    ) -> Result<(), Failure> {
        if self.steps.is_empty() {
            return Ok(());
        }
        for step in &self.steps {
            ctx.check_cancelled()?;
            run_step(step, ctx, scope).await?;
        }

        let pending: Vec<PendingStep> = self
            .steps
            .iter()
            .filter_map(|s| match &s.kind {
                StepKind::Pending(p) => Some(p.clone()),
                _ => None,
            })
            .collect();
        ctx.record_pending(pending);
        Ok(())
    }
}

/// Applies the state machine to one step: `Ok` performs it, `Failed`
/// records it as not performed. Composed steps run recursively under
/// before/after-composed brackets with identical fail-fast semantics.
fn run_step<'a>(
    step: &'a CollectedStep,
    ctx: &'a mut RunContext,
    scope: EventScope<'a>,
) -> BoxFuture<'a, Result<(), Failure>> {
    async move {
        match &step.kind {
            StepKind::Ignorable => {
                ctx.emit(scope.step_event(&step.text, StepEvent::Ignorable));
            }
            StepKind::Comment => {
                ctx.emit(scope.step_event(&step.text, StepEvent::Comment));
            }
            StepKind::Pending(pending) => {
                ctx.emit(scope.step_event(&step.text, StepEvent::Pending));
                ctx.fold_failure(Failure::PendingFound(vec![pending.clone()]));
            }
            StepKind::Matched(matched) => {
                let was_failed = ctx.failure_occurred();
                if was_failed {
                    ctx.emit(
                        scope.step_event(&step.text, StepEvent::NotPerformed),
                    );
                } else {
                    ctx.emit(scope.step_event(&step.text, StepEvent::Started));
                    match invoke_matched(matched, &step.text, ctx).await {
                        Ok(()) => {
                            ctx.emit(scope.step_event(
                                &step.text,
                                StepEvent::Successful,
                            ));
                        }
                        Err(failure) if failure.is_restart() => {
                            return Err(failure);
                        }
                        Err(failure) => {
                            ctx.emit(scope.step_event(
                                &step.text,
                                StepEvent::Failed(failure.clone()),
                            ));
                            ctx.fold_failure(failure);
                        }
                    }
                }

                if !was_failed && !matched.composed.is_empty() {
                    if let EventScope::Scenario(path, title) = scope {
                        ctx.emit(RunEvent::scenario(
                            path,
                            title,
                            ScenarioEvent::ComposedStepsStarted,
                        ));
                    }
                    for composed in &matched.composed {
                        run_step(composed, ctx, scope).await?;
                    }
                    if let EventScope::Scenario(path, title) = scope {
                        ctx.emit(RunEvent::scenario(
                            path,
                            title,
                            ScenarioEvent::ComposedStepsFinished,
                        ));
                    }
                }
            }
        }
        Ok(())
    }
    .boxed()
}

/// Resolves the step's arguments, pre-converts declared parameters and
/// invokes the handler (unless dry-running), trapping panics.
async fn invoke_matched(
    matched: &MatchedStep,
    text: &str,
    ctx: &mut RunContext,
) -> Result<(), Failure> {
    let controls = &ctx.config.parameter_controls;
    let mut values = LinkedHashMap::new();
    for (name, raw) in &matched.captured {
        let resolved = controls.replace_delimited(raw, &matched.named);
        drop(values.insert(name.clone(), resolved));
    }

    let mut args = StepArgs::new(text, values);
    for spec in matched.candidate.params() {
        let raw = args.raw(&spec.name).unwrap_or_default().to_owned();
        let converted = ctx
            .converters
            .convert_dyn(&raw, &spec.target)
            .and_then(|v| v.into_any(&spec.target))
            .map_err(Failure::Conversion)?;
        args.put_converted(&spec.name, converted);
    }

    let Some(handler) = matched.candidate.handler() else {
        return Ok(());
    };
    if ctx.config.dry_run {
        return Ok(());
    }

    let handler = Arc::clone(handler);
    let converters = Arc::clone(&ctx.converters);
    let outcome = {
        let context = StepContext {
            args: &args,
            store: &mut ctx.store,
            converters: &converters,
        };
        AssertUnwindSafe(handler(context)).catch_unwind().await
    };
    match outcome {
        Ok(result) => result,
        Err(panic_info) => Err(Failure::Invocation(
            InvocationFailure::from_message(describe_panic(&panic_info)),
        )),
    }
}

/// Extracts a readable message out of a panic payload.
fn describe_panic(info: &(dyn std::any::Any + Send)) -> String {
    info.downcast_ref::<String>().cloned().unwrap_or_else(|| {
        info.downcast_ref::<&str>()
            .map_or_else(|| "opaque panic payload".to_owned(), |s| (*s).to_owned())
    })
}
