// Copyright (c) 2026  The narrative contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Concurrent execution of the performable tree.
//!
//! One worker task per story, bounded by the configured thread count. The
//! orchestrator polls on a fixed ~100ms tick, marks overrunning stories
//! cancelled (observed cooperatively at step boundaries) and force-aborts
//! tasks that do not wind down, so the run always shuts down cleanly.

use std::{
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use tokio::{sync::Semaphore, task::JoinHandle};

use super::timeouts::TimeoutRules;
use crate::{
    config::Config,
    context::{CancelRegistry, RunContext},
    convert::ConverterChain,
    error::{BatchFailures, Cancellation, Error, Failure, InvocationFailure},
    event::RunEvent,
    meta::MetaFilter,
    model::Story,
    reporter::{Reporter, Reporters},
    step::Registry,
    tree::{
        PerformableRoot, PerformableStory, Status, StoryResolver, TreeBuilder,
    },
};

/// Poll tick of the orchestrator.
const TICK: Duration = Duration::from_millis(100);

/// Grace period a marked story gets to wind down cooperatively before its
/// task is force-aborted.
const CANCEL_GRACE: Duration = Duration::from_millis(500);

/// Outcome summary of one run.
#[derive(Debug)]
pub struct RunSummary {
    /// Folded status per story path, in submission order.
    pub statuses: Vec<(String, Status)>,

    /// Wall time per story path, in submission order.
    pub durations: Vec<(String, Duration)>,

    /// Paths of the stories the meta filter excluded.
    pub excluded: Vec<String>,

    /// Every failure recorded during the run, also available when the run
    /// is configured to ignore them.
    pub failures: BatchFailures,
}

/// Schedules per-story execution on bounded worker tasks, enforcing
/// per-path timeouts and aggregating failures.
pub struct StoryRunner {
    config: Arc<Config>,
    registry: Arc<Registry>,
    converters: Arc<ConverterChain>,
    reporters: Reporters,
}

impl StoryRunner {
    /// Creates a runner over the given configuration and registry, with a
    /// converter chain built from the configuration's conversion settings.
    #[must_use]
    pub fn new(config: Config, registry: Registry) -> Self {
        let converters = ConverterChain::with_settings(
            config.numeric_locale,
            &config.list_separator,
            &config.date_format,
        );
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            converters: Arc::new(converters),
            reporters: Reporters::new(),
        }
    }

    /// Replaces the converter chain, keeping custom registrations.
    #[must_use]
    pub fn with_converters(mut self, converters: ConverterChain) -> Self {
        self.converters = Arc::new(converters);
        self
    }

    /// Adds a reporter to the fan-out sequence.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporters = self.reporters.with(reporter);
        self
    }

    /// Runs the given stories, resolving given-story references among them.
    ///
    /// # Errors
    ///
    /// - Build-time errors: unresolvable given stories, invalid timeout
    ///   rules.
    /// - [`Error::BatchFailed`] with every story failure, unless failures
    ///   are configured to be ignored.
    pub async fn run(&self, stories: Vec<Story>) -> Result<RunSummary, Error> {
        let resolver = stories.clone();
        self.run_with(stories, &resolver).await
    }

    /// Runs the given stories, resolving given-story references through
    /// `resolver`.
    ///
    /// # Errors
    ///
    /// As [`StoryRunner::run`].
    pub async fn run_with(
        &self,
        stories: Vec<Story>,
        resolver: &dyn StoryResolver,
    ) -> Result<RunSummary, Error> {
        let filter = MetaFilter::parse(&self.config.meta_filter);
        let timeouts = TimeoutRules::parse(
            &self.config.story_timeouts,
            self.config.default_timeout,
        )?;
        let failures = BatchFailures::new();
        let cancellation = CancelRegistry::new();

        let builder = TreeBuilder::new(
            &self.config,
            &self.registry,
            &self.converters,
            &filter,
            resolver,
        );
        let mut root = builder.build(&stories)?;

        self.reporters.emit(RunEvent::Started);
        self.perform_stories_hooks(
            &root.before_hooks,
            "BeforeStories",
            &failures,
            &cancellation,
        )
        .await;

        let performed = self
            .perform_stories(&mut root, &timeouts, &failures, &cancellation)
            .await;

        let statuses: Vec<(String, Status)> = performed
            .iter()
            .map(|s| {
                (s.path().to_owned(), s.status().unwrap_or(Status::NotPerformed))
            })
            .collect();
        let durations: Vec<(String, Duration)> = performed
            .iter()
            .map(|s| (s.path().to_owned(), s.timing().duration))
            .collect();
        let excluded: Vec<String> = performed
            .iter()
            .filter(|s| s.is_excluded())
            .map(|s| s.path().to_owned())
            .collect();
        if !excluded.is_empty() {
            tracing::info!(
                filter = %filter,
                count = excluded.len(),
                "stories excluded by meta filter"
            );
        }
        let total: Duration = durations.iter().map(|(_, d)| *d).sum();
        tracing::info!(
            stories = performed.len(),
            threads = self.config.threads,
            ?total,
            "batch finished"
        );
        root.put_stories(performed);

        self.perform_stories_hooks(
            &root.after_hooks,
            "AfterStories",
            &failures,
            &cancellation,
        )
        .await;
        self.reporters.emit(RunEvent::Finished);

        let summary = RunSummary {
            statuses,
            durations,
            excluded,
            failures: failures.clone(),
        };
        if failures.is_empty() || self.config.ignore_failure_in_stories {
            Ok(summary)
        } else {
            Err(Error::BatchFailed(failures))
        }
    }

    /// Runs the before/after-stories hooks on the orchestrator itself.
    async fn perform_stories_hooks(
        &self,
        hooks: &crate::tree::HookSet,
        path: &str,
        failures: &BatchFailures,
        cancellation: &CancelRegistry,
    ) {
        let mut ctx = RunContext::new(
            Arc::clone(&self.config),
            Arc::clone(&self.registry),
            Arc::clone(&self.converters),
            self.reporters.clone(),
            failures.clone(),
            cancellation.clone(),
            path,
        );
        if hooks.perform(&mut ctx).await.is_err() {
            tracing::warn!(path, "stories-level hooks were interrupted");
        }
        ctx.record_failure();
    }

    /// Dispatches one task per story and polls until all are done or
    /// cancelled.
    async fn perform_stories(
        &self,
        root: &mut PerformableRoot,
        timeouts: &TimeoutRules,
        failures: &BatchFailures,
        cancellation: &CancelRegistry,
    ) -> Vec<PerformableStory> {
        let stories = root.take_stories();
        if stories.is_empty() {
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(self.config.threads));
        let mut running: Vec<RunningStory> = stories
            .into_iter()
            .map(|story| {
                self.submit(
                    story,
                    timeouts,
                    failures,
                    cancellation,
                    Arc::clone(&semaphore),
                )
            })
            .collect();

        let short_circuit_on_failure = !self.config.ignore_failure_in_stories
            && !self.config.batch;
        let mut short_circuited = false;
        let mut interval = tokio::time::interval(TICK);
        loop {
            interval.tick().await;
            let mut all_done = true;
            for story in &mut running {
                if story.performed.is_some() {
                    continue;
                }
                let Some(handle) = &story.handle else { continue };

                if handle.is_finished() {
                    if let Some(handle) = story.handle.take() {
                        let performed = self
                            .collect_outcome(
                                handle,
                                story,
                                failures,
                                cancellation,
                                short_circuited,
                            )
                            .await;
                        story.performed = Some(performed);
                        if story.failed && short_circuit_on_failure {
                            short_circuited = true;
                        }
                    }
                    continue;
                }

                all_done = false;
                let Some(started) = story.started.get() else {
                    // Still queued behind the worker limit.
                    continue;
                };
                let elapsed = started.elapsed();
                if let Some(marked_at) = story.cancelled_at {
                    // Cooperative cancellation did not wind the story down
                    // in time; force-cancel its task.
                    if marked_at.elapsed() > CANCEL_GRACE {
                        if let Some(h) = &story.handle {
                            h.abort();
                        }
                    }
                } else if elapsed > story.timeout {
                    tracing::warn!(
                        path = %story.path,
                        ?elapsed,
                        timeout = ?story.timeout,
                        "story timed out, marking cancelled"
                    );
                    let cancelled = Cancellation {
                        path: story.path.clone(),
                        elapsed,
                        timeout: story.timeout,
                    };
                    cancellation.mark(cancelled.clone());
                    if !short_circuited {
                        failures.append(
                            story.path.clone(),
                            Failure::Cancelled(cancelled),
                        );
                    }
                    story.cancelled_at = Some(Instant::now());
                }
            }
            if all_done {
                break;
            }
        }

        running
            .into_iter()
            .filter_map(|story| story.performed)
            .collect()
    }

    fn submit(
        &self,
        story: PerformableStory,
        timeouts: &TimeoutRules,
        failures: &BatchFailures,
        cancellation: &CancelRegistry,
        semaphore: Arc<Semaphore>,
    ) -> RunningStory {
        let path = story.path().to_owned();
        let timeout = timeouts.resolve(&path);
        let started = Arc::new(OnceLock::new());

        let task_started = Arc::clone(&started);
        let mut ctx = RunContext::new(
            Arc::clone(&self.config),
            Arc::clone(&self.registry),
            Arc::clone(&self.converters),
            self.reporters.clone(),
            failures.clone(),
            cancellation.clone(),
            path.clone(),
        );
        let task_path = path.clone();
        let handle = tokio::spawn(async move {
            let mut story = story;
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (story, Ok(()));
            };
            let _ = task_started.set(Instant::now());
            tracing::info!(path = %task_path, "running story");
            let outcome = story.perform(&mut ctx).await;
            (story, outcome)
        });

        RunningStory {
            path,
            timeout,
            started,
            handle: Some(handle),
            performed: None,
            cancelled_at: None,
            failed: false,
        }
    }

    /// Awaits an already-finished story task and folds its outcome into the
    /// failure aggregate, unless collection has been short-circuited.
    async fn collect_outcome(
        &self,
        handle: JoinHandle<(PerformableStory, Result<(), Failure>)>,
        story: &mut RunningStory,
        failures: &BatchFailures,
        cancellation: &CancelRegistry,
        short_circuited: bool,
    ) -> PerformableStory {
        match handle.await {
            Ok((performed, outcome)) => {
                match outcome {
                    Ok(()) => {
                        story.failed = matches!(
                            performed.status(),
                            Some(Status::Failed)
                        );
                    }
                    Err(failure) => {
                        story.failed = true;
                        if !short_circuited {
                            failures.append(story.path.clone(), failure);
                        }
                    }
                }
                performed
            }
            Err(join_error) => {
                if join_error.is_panic() && !short_circuited {
                    failures.append(
                        story.path.clone(),
                        Failure::Invocation(InvocationFailure::from_message(
                            format!("story task panicked: {join_error}"),
                        )),
                    );
                }
                // An aborted task lost its tree node; synthesize a
                // placeholder recording the cancellation.
                let status = if cancellation.is_cancelled(&story.path) {
                    Status::NotPerformed
                } else {
                    Status::Failed
                };
                story.failed = true;
                placeholder_story(&story.path, status)
            }
        }
    }
}

/// A submitted story being tracked by the orchestrator.
struct RunningStory {
    path: String,
    timeout: Duration,
    started: Arc<OnceLock<Instant>>,
    handle: Option<JoinHandle<(PerformableStory, Result<(), Failure>)>>,
    performed: Option<PerformableStory>,
    cancelled_at: Option<Instant>,
    failed: bool,
}

/// Stand-in tree node for a story whose task was force-aborted.
fn placeholder_story(path: &str, status: Status) -> PerformableStory {
    PerformableStory {
        path: path.to_owned(),
        given_story: false,
        excluded: false,
        filter_expression: String::new(),
        before_hooks: crate::tree::HookSet::default(),
        before_user: crate::tree::StepsBlock::default(),
        given_stories: Vec::new(),
        scenarios: Vec::new(),
        after_user: crate::tree::StepsBlock::default(),
        after_hooks: crate::tree::HookSet::default(),
        status: Some(status),
        timing: crate::tree::Timing::default(),
    }
}
