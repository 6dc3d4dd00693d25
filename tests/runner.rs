// Copyright (c) 2026  The narrative contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! End-to-end runs through the concurrent runner.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use futures::FutureExt as _;
use narrative::{
    event::{Ext as _, ScenarioEvent, StepEvent, StoryEvent},
    Config, Error, EventCollector, Failure, ObjectScope, Registry, RunEvent,
    Scenario, Status, StepDefinition, Story, StoryRunner,
};

fn init_tracing() {
    drop(tracing_subscriber::fmt().with_test_writer().try_init());
}

fn passing_registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register(
            StepDefinition::given("the kettle is filled")
                .handler_fn(|_| Ok(())),
        )
        .unwrap();
    registry
        .register(
            StepDefinition::when("the kettle boils").handler_fn(|_| Ok(())),
        )
        .unwrap();
    registry
        .register(
            StepDefinition::then("tea can be made").handler_fn(|_| Ok(())),
        )
        .unwrap();
    registry
}

fn tea_story(path: &str) -> Story {
    Story::new(path).with_scenario(Scenario::new("making tea").with_steps([
        "Given the kettle is filled",
        "When the kettle boils",
        "Then tea can be made",
    ]))
}

#[tokio::test(flavor = "multi_thread")]
async fn a_passing_story_reports_successful() {
    init_tracing();
    let (collector, _) = EventCollector::fan_out();
    let runner = StoryRunner::new(Config::default(), passing_registry())
        .with_reporter(Arc::clone(&collector) as _);

    let summary = runner.run(vec![tea_story("tea.story")]).await.unwrap();
    assert_eq!(
        summary.statuses,
        [("tea.story".to_owned(), Status::Successful)],
    );
    assert!(summary.failures.is_empty());

    let events = collector.values();
    let successful = events
        .iter()
        .filter(|e| matches!(e.step(), Some((_, StepEvent::Successful))))
        .count();
    assert_eq!(successful, 3);
    assert!(matches!(events.first(), Some(RunEvent::Started)));
    assert!(matches!(events.last(), Some(RunEvent::Finished)));
}

#[tokio::test(flavor = "multi_thread")]
async fn a_failing_step_fails_its_scope_and_skips_the_rest() {
    let mut registry = passing_registry();
    registry
        .register(StepDefinition::when("the fuse blows").handler_fn(|_| {
            Err(Failure::invocation(std::io::Error::new(
                std::io::ErrorKind::Other,
                "no power",
            )))
        }))
        .unwrap();

    let story = Story::new("fuse.story").with_scenario(
        Scenario::new("power cut").with_steps([
            "Given the kettle is filled",
            "When the fuse blows",
            "Then tea can be made",
        ]),
    );

    let (collector, _) = EventCollector::fan_out();
    let runner = StoryRunner::new(Config::default(), registry)
        .with_reporter(Arc::clone(&collector) as _);

    let err = runner.run(vec![story]).await.unwrap_err();
    let Error::BatchFailed(failures) = err else {
        panic!("expected batch failures");
    };
    assert_eq!(failures.len(), 1);

    let events = collector.values();
    let outcomes: Vec<&StepEvent> =
        events.iter().filter_map(|e| e.step().map(|(_, ev)| ev)).collect();
    assert!(matches!(outcomes[0], StepEvent::Started));
    assert!(matches!(outcomes[1], StepEvent::Successful));
    assert!(matches!(outcomes[2], StepEvent::Started));
    assert!(matches!(outcomes[3], StepEvent::Failed(_)));
    assert!(matches!(outcomes[4], StepEvent::NotPerformed));
}

#[tokio::test(flavor = "multi_thread")]
async fn a_hanging_story_is_cancelled_not_hung() {
    init_tracing();
    let mut registry = Registry::new();
    registry
        .register(
            StepDefinition::when("the line never answers").handler(
                |_ctx: narrative::step::StepContext<'_>| {
                    futures::future::pending::<narrative::step::StepOutcome>()
                        .boxed()
                },
            ),
        )
        .unwrap();

    let story = Story::new("hang.story").with_scenario(
        Scenario::new("waiting forever")
            .with_steps(["When the line never answers"]),
    );

    let config = Config::default().story_timeout("hang/.*:1").story_timeout("1");
    let (collector, _) = EventCollector::fan_out();
    let runner = StoryRunner::new(config, registry)
        .with_reporter(Arc::clone(&collector) as _);

    let started = Instant::now();
    let err = runner.run(vec![story]).await.unwrap_err();
    let elapsed = started.elapsed();

    // Marked within (timeout + one poll tick), force-cancelled shortly
    // after; nowhere near a hang.
    assert!(elapsed < Duration::from_secs(4), "took {elapsed:?}");

    let Error::BatchFailed(failures) = err else {
        panic!("expected batch failures");
    };
    let cancelled = failures
        .snapshot()
        .iter()
        .any(|(_, f)| matches!(f, Failure::Cancelled(_)));
    assert!(cancelled, "batch should report a cancellation");
}

#[tokio::test(flavor = "multi_thread")]
async fn pending_policy_pass_reports_pending_and_continues() {
    let story = Story::new("pending.story").with_scenario(
        Scenario::new("unwired").with_steps([
            "Given the kettle is filled",
            "When nobody wrote this step yet",
        ]),
    );

    let (collector, _) = EventCollector::fan_out();
    let runner = StoryRunner::new(Config::default(), passing_registry())
        .with_reporter(Arc::clone(&collector) as _);

    let summary = runner.run(vec![story]).await.unwrap();
    assert_eq!(
        summary.statuses,
        [("pending.story".to_owned(), Status::Pending)],
    );

    let events = collector.values();
    assert!(events
        .iter()
        .any(|e| matches!(e.step(), Some((_, StepEvent::Pending)))));
    // A stub suggestion is surfaced for the unmatched step.
    assert!(events.iter().any(|e| matches!(
        e,
        RunEvent::Story(_, StoryEvent::PendingStubs(stubs))
            if stubs.iter().any(|s| s.contains("nobody wrote this step yet"))
    )));
}

#[tokio::test(flavor = "multi_thread")]
async fn pending_policy_fail_fails_the_scenario() {
    let story = Story::new("pending.story").with_scenario(
        Scenario::new("unwired")
            .with_steps(["When nobody wrote this step yet"]),
    );

    let (collector, _) = EventCollector::fan_out();
    let runner = StoryRunner::new(
        Config::default().fail_on_pending(),
        passing_registry(),
    )
    .with_reporter(Arc::clone(&collector) as _);

    let err = runner.run(vec![story]).await.unwrap_err();
    assert!(matches!(err, Error::BatchFailed(_)));

    let scenario_failed = collector.values().iter().any(|e| {
        matches!(
            e,
            RunEvent::Story(
                _,
                StoryEvent::Scenario(
                    _,
                    ScenarioEvent::Finished { status: Status::Failed },
                ),
            )
        )
    });
    assert!(scenario_failed, "scenario should report FAILED");
}

#[tokio::test(flavor = "multi_thread")]
async fn stories_run_concurrently_within_the_thread_limit() {
    let mut registry = Registry::new();
    registry
        .register(StepDefinition::when("work happens").handler(
            |_ctx: narrative::step::StepContext<'_>| {
                async {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    Ok::<_, Failure>(())
                }
                .boxed()
            },
        ))
        .unwrap();

    let stories: Vec<Story> = (0..3)
        .map(|i| {
            Story::new(format!("parallel-{i}.story")).with_scenario(
                Scenario::new("busy").with_steps(["When work happens"]),
            )
        })
        .collect();

    let runner =
        StoryRunner::new(Config::default().threads(3), registry);
    let started = Instant::now();
    let summary = runner.run(stories).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(summary.statuses.len(), 3);
    assert!(
        summary.statuses.iter().all(|(_, s)| *s == Status::Successful)
    );
    // Three 300ms stories on three workers overlap instead of serializing.
    assert!(elapsed < Duration::from_millis(800), "took {elapsed:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn scenario_restarts_rerun_from_scratch() {
    let mut registry = Registry::new();
    registry
        .register(
            StepDefinition::when("the flaky call goes through").handler_fn(
                |ctx| {
                    let attempts = ctx
                        .store
                        .get::<usize>("attempts")
                        .copied()
                        .unwrap_or_default();
                    ctx.store.put(
                        ObjectScope::Scenario,
                        "attempts",
                        attempts + 1,
                    );
                    if attempts == 0 {
                        Err(Failure::RestartScenario(
                            "first attempt always times out".into(),
                        ))
                    } else {
                        Ok(())
                    }
                },
            ),
        )
        .unwrap();

    let story = Story::new("flaky.story").with_scenario(
        Scenario::new("retrying")
            .with_steps(["When the flaky call goes through"]),
    );

    let (collector, _) = EventCollector::fan_out();
    let runner = StoryRunner::new(Config::default(), registry)
        .with_reporter(Arc::clone(&collector) as _);

    let summary = runner.run(vec![story]).await.unwrap();
    assert_eq!(
        summary.statuses,
        [("flaky.story".to_owned(), Status::Successful)],
    );

    let events = collector.values();
    assert!(events.iter().any(|e| matches!(
        e,
        RunEvent::Story(_, StoryEvent::Scenario(_, ScenarioEvent::Restarted { .. }))
    )));
    let successful = events
        .iter()
        .filter(|e| matches!(e.step(), Some((_, StepEvent::Successful))))
        .count();
    assert_eq!(successful, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn dry_runs_walk_the_tree_without_invoking_handlers() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&invocations);

    let mut registry = Registry::new();
    registry
        .register(StepDefinition::given("a side effect").handler_fn(
            move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        ))
        .unwrap();

    let story = Story::new("dry.story").with_scenario(
        Scenario::new("no effects").with_steps(["Given a side effect"]),
    );

    let (collector, _) = EventCollector::fan_out();
    let runner = StoryRunner::new(Config::default().dry_run(), registry)
        .with_reporter(Arc::clone(&collector) as _);

    let summary = runner.run(vec![story]).await.unwrap();
    assert_eq!(
        summary.statuses,
        [("dry.story".to_owned(), Status::Successful)],
    );
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    assert!(collector
        .values()
        .iter()
        .any(|e| matches!(e, RunEvent::Story(_, StoryEvent::DryRun))));
}

#[tokio::test(flavor = "multi_thread")]
async fn excluded_stories_are_reported_but_never_run() {
    let story = tea_story("tea.story").with_meta(narrative::Meta::from_pairs(
        [("skip", "")],
    ));

    let (collector, _) = EventCollector::fan_out();
    let runner = StoryRunner::new(
        Config::default().meta_filter("-skip"),
        passing_registry(),
    )
    .with_reporter(Arc::clone(&collector) as _);

    let summary = runner.run(vec![story]).await.unwrap();
    assert_eq!(summary.excluded, ["tea.story"]);

    let events = collector.values();
    assert!(events
        .iter()
        .any(|e| matches!(e, RunEvent::Story(_, StoryEvent::Excluded { .. }))));
    assert!(events.iter().all(|e| e.step().is_none()));
}
