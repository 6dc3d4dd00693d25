// Copyright (c) 2026  The narrative contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Step matching behavior across the registry.

use linked_hash_map::LinkedHashMap;
use narrative::{
    step::StepKind, Error, ParameterControls, RankingStrategy, Registry,
    StepDefinition,
};

fn given(pattern: &str) -> StepDefinition {
    StepDefinition::given(pattern).handler_fn(|_| Ok(()))
}

#[test]
fn matching_is_independent_of_registration_order() {
    let patterns =
        ["the user logs in", "the user logs out", "a parcel of $kg kilos"];

    let mut forward = Registry::new();
    for p in patterns {
        forward.register(given(p)).unwrap();
    }
    let mut backward = Registry::new();
    for p in patterns.iter().rev() {
        backward.register(given(*p)).unwrap();
    }

    for text in
        ["Given the user logs in", "Given a parcel of 12 kilos"]
    {
        let (a, _) = forward.find(text, None).unwrap();
        let (b, _) = backward.find(text, None).unwrap();
        assert_eq!(a.pattern(), b.pattern(), "diverged on `{text}`");
    }
}

#[test]
fn equal_priority_ties_resolve_by_insertion_order() {
    // Both match `Given the big win result` without overlapping as rendered
    // names.
    let mut registry = Registry::new();
    registry.register(given("the $a result")).unwrap();
    registry.register(given("the big $b")).unwrap();
    let (winner, _) = registry.find("Given the big win result", None).unwrap();
    assert_eq!(winner.pattern(), "the $a result");

    let mut reversed = Registry::new();
    reversed.register(given("the big $b")).unwrap();
    reversed.register(given("the $a result")).unwrap();
    let (winner, _) = reversed.find("Given the big win result", None).unwrap();
    assert_eq!(winner.pattern(), "the big $b");
}

#[test]
fn and_steps_inherit_the_type_of_the_previous_non_and_step() {
    let mut registry = Registry::new();
    registry.register(given("A")).unwrap();
    registry.register(given("B")).unwrap();
    registry
        .register(StepDefinition::when("C").handler_fn(|_| Ok(())))
        .unwrap();
    registry
        .register(StepDefinition::then("D").handler_fn(|_| Ok(())))
        .unwrap();

    let steps = registry.collect_steps(
        &[
            "Given A".to_owned(),
            "And B".to_owned(),
            "When C".to_owned(),
            "Then D".to_owned(),
        ],
        &LinkedHashMap::new(),
        &ParameterControls::default(),
    );

    let patterns: Vec<&str> = steps
        .iter()
        .map(|s| match &s.kind {
            StepKind::Matched(m) => m.candidate.pattern(),
            other => panic!("`{}` did not match: {other:?}", s.text),
        })
        .collect();
    assert_eq!(patterns, ["A", "B", "C", "D"]);
}

#[test]
fn overlapping_definitions_fail_at_registration_not_at_match() {
    let mut registry = Registry::new();
    registry.register(given("I have $n cukes")).unwrap();

    let err =
        registry.register(given("I have $n cukes in my belly")).unwrap_err();
    assert!(matches!(err, Error::AmbiguousStepDefinition(..)));

    // The surviving registration still matches cleanly.
    assert!(registry.find("Given I have 5 cukes", None).is_some());
}

#[test]
fn ignorable_lines_bypass_ranked_search() {
    let registry = Registry::new();
    let steps = registry.collect_steps(
        &[
            "!-- Given this would never match".to_owned(),
            "!-- a plain note".to_owned(),
        ],
        &LinkedHashMap::new(),
        &ParameterControls::default(),
    );
    assert!(matches!(steps[0].kind, StepKind::Ignorable));
    assert!(matches!(steps[1].kind, StepKind::Comment));
}

#[test]
fn levenshtein_ranking_prefers_the_closer_literal() {
    let mut registry =
        Registry::new().with_ranking(RankingStrategy::ByLevenshtein);
    registry.register(given("the $a result")).unwrap();
    registry.register(given("the big $b")).unwrap();

    // Stripped literals: `the result` vs `the big `; the input text
    // `the big win result` sits closer to `the result`... measured by plain
    // edit distance over the stripped forms.
    let (winner, _) = registry.find("Given the big win result", None).unwrap();
    assert_eq!(winner.pattern(), "the $a result");
}

#[test]
fn captures_resolve_by_placeholder_name() {
    let mut registry = Registry::new();
    registry.register(given("$who pays $amount to $payee")).unwrap();

    let (_, captured) =
        registry.find("Given Alice pays 30 to Bob", None).unwrap();
    assert_eq!(captured["who"], "Alice");
    assert_eq!(captured["amount"], "30");
    assert_eq!(captured["payee"], "Bob");
}
