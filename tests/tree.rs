// Copyright (c) 2026  The narrative contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Tree building: examples expansion, filtering, given stories.

use narrative::{
    Config, ConverterChain, ExamplesTable, GivenStories, Meta, MetaFilter,
    Registry, Scenario, StepDefinition, Story, TreeBuilder,
};

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register(
            StepDefinition::given("a user called $name")
                .handler_fn(|_| Ok(())),
        )
        .unwrap();
    registry
        .register(
            StepDefinition::when("the user orders $count items")
                .handler_fn(|_| Ok(())),
        )
        .unwrap();
    registry
        .register(
            StepDefinition::then("the cart holds $count items")
                .handler_fn(|_| Ok(())),
        )
        .unwrap();
    registry
}

fn examples_story() -> Story {
    Story::new("orders.story").with_scenario(
        Scenario::new("ordering")
            .with_steps([
                "Given a user called <name>",
                "When the user orders <count> items",
                "Then the cart holds <count> items",
            ])
            .with_examples(ExamplesTable::parse(
                "|name|count|meta|\n\
                 |Alice|1||\n\
                 |Bob|2||\n\
                 |Carol|3|@skip|",
            )),
    )
}

#[test]
fn each_examples_row_yields_one_scenario_instance() {
    let config = Config::default();
    let registry = registry();
    let converters = ConverterChain::with_defaults();
    let filter = MetaFilter::parse("");
    let resolver: Vec<Story> = Vec::new();

    let builder =
        TreeBuilder::new(&config, &registry, &converters, &filter, &resolver);
    let root = builder.build(&[examples_story()]).unwrap();

    let scenario = &root.stories()[0].scenarios()[0];
    assert_eq!(scenario.example_count(), 3);
    let names: Vec<&str> = scenario
        .example_parameters()
        .map(|p| p["name"].as_str())
        .collect();
    assert_eq!(names, ["Alice", "Bob", "Carol"]);
}

#[test]
fn example_rows_are_filtered_independently_by_their_meta() {
    let config = Config::default();
    let registry = registry();
    let converters = ConverterChain::with_defaults();
    let filter = MetaFilter::parse("-skip");
    let resolver: Vec<Story> = Vec::new();

    let builder =
        TreeBuilder::new(&config, &registry, &converters, &filter, &resolver);
    let root = builder.build(&[examples_story()]).unwrap();

    let scenario = &root.stories()[0].scenarios()[0];
    assert_eq!(scenario.example_count(), 2);
    let names: Vec<&str> = scenario
        .example_parameters()
        .map(|p| p["name"].as_str())
        .collect();
    assert_eq!(names, ["Alice", "Bob"]);
}

#[test]
fn building_twice_yields_structurally_identical_trees() {
    let config = Config::default();
    let registry = registry();
    let converters = ConverterChain::with_defaults();
    let filter = MetaFilter::parse("");
    let resolver: Vec<Story> = Vec::new();
    let stories = [examples_story()];

    let builder =
        TreeBuilder::new(&config, &registry, &converters, &filter, &resolver);
    let first = builder.build(&stories).unwrap();
    let second = builder.build(&stories).unwrap();

    let shape = |root: &narrative::PerformableRoot| -> Vec<Vec<usize>> {
        root.stories()
            .iter()
            .flat_map(|s| s.scenarios())
            .map(narrative::tree::PerformableScenario::step_counts)
            .collect()
    };
    assert_eq!(shape(&first), shape(&second));
    assert!(!shape(&first).is_empty());
}

#[test]
fn given_story_parameters_override_examples() {
    // A scenario with both an examples table and an anchored given story is
    // bound to the given-story parameters; the examples table does not
    // parametrize it.
    let precondition = Story::new("pre.story").with_scenario(
        Scenario::new("seeded user")
            .with_meta(Meta::from_pairs([("variant", "one")]))
            .with_steps(["Given a user called Zoe"]),
    );

    let story = Story::new("main.story").with_scenario(
        Scenario::new("ordering")
            .with_steps(["When the user orders 2 items"])
            .with_examples(ExamplesTable::parse("|count|\n|1|\n|2|"))
            .with_given_stories(GivenStories::new().with(
                narrative::GivenStory::new("pre.story")
                    .anchored("variant", "one"),
            )),
    );

    let config = Config::default();
    let registry = registry();
    let converters = ConverterChain::with_defaults();
    let filter = MetaFilter::parse("");
    let resolver = vec![precondition];

    let builder =
        TreeBuilder::new(&config, &registry, &converters, &filter, &resolver);
    let root = builder.build(&[story]).unwrap();

    let scenario = &root.stories()[0].scenarios()[0];
    assert_eq!(scenario.example_count(), 0);
    assert!(!scenario.has_examples());
}

#[test]
fn story_level_examples_cross_product_with_scenarios() {
    let story = Story::new("cross.story")
        .with_lifecycle(
            narrative::Lifecycle::new()
                .with_examples(ExamplesTable::parse("|region|\n|eu|\n|us|")),
        )
        .with_scenario(
            Scenario::new("ordering")
                .with_steps(["When the user orders <count> items"])
                .with_examples(ExamplesTable::parse("|count|\n|1|\n|2|")),
        );

    let config = Config::default();
    let registry = registry();
    let converters = ConverterChain::with_defaults();
    let filter = MetaFilter::parse("");
    let resolver: Vec<Story> = Vec::new();

    let builder =
        TreeBuilder::new(&config, &registry, &converters, &filter, &resolver);
    let root = builder.build(&[story]).unwrap();

    // Two story rows × one scenario, each carrying both example instances.
    let scenarios = root.stories()[0].scenarios();
    assert_eq!(scenarios.len(), 2);
    assert_eq!(scenarios[0].title(), "ordering [1]");
    assert_eq!(scenarios[1].title(), "ordering [2]");
    for scenario in scenarios {
        assert_eq!(scenario.example_count(), 2);
        for parameters in scenario.example_parameters() {
            assert!(parameters.contains_key("region"));
            assert!(parameters.contains_key("count"));
        }
    }
}

#[test]
fn excluded_scenarios_keep_their_story_alive() {
    let story = Story::new("mixed.story")
        .with_scenario(
            Scenario::new("kept")
                .with_steps(["Given a user called Ada"]),
        )
        .with_scenario(
            Scenario::new("dropped")
                .with_meta(Meta::from_pairs([("skip", "")]))
                .with_steps(["Given a user called Eve"]),
        );

    let config = Config::default();
    let registry = registry();
    let converters = ConverterChain::with_defaults();
    let filter = MetaFilter::parse("-skip");
    let resolver: Vec<Story> = Vec::new();

    let builder =
        TreeBuilder::new(&config, &registry, &converters, &filter, &resolver);
    let root = builder.build(&[story]).unwrap();

    let story = &root.stories()[0];
    assert!(!story.is_excluded());
    assert!(!story.scenarios()[0].is_excluded());
    assert!(story.scenarios()[1].is_excluded());
}

#[test]
fn a_story_with_only_excluded_scenarios_is_skipped() {
    let story = Story::new("skipped.story").with_scenario(
        Scenario::new("dropped")
            .with_meta(Meta::from_pairs([("skip", "")]))
            .with_steps(["Given a user called Eve"]),
    );

    let config = Config::default();
    let registry = registry();
    let converters = ConverterChain::with_defaults();
    let filter = MetaFilter::parse("-skip");
    let resolver: Vec<Story> = Vec::new();

    let builder =
        TreeBuilder::new(&config, &registry, &converters, &filter, &resolver);
    let root = builder.build(&[story]).unwrap();
    assert!(root.stories()[0].is_excluded());
}
