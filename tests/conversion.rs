// Copyright (c) 2026  The narrative contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Round-trips through pattern capture and the converter chain.

use std::str::FromStr;

use chrono::NaiveDate;
use narrative::{
    convert::{ConverterChain, FromStrConverter},
    Registry, StepDefinition,
};

/// Substitutes concrete values into a pattern's parameter slots, matches the
/// rendered step and converts every capture back, expecting the original
/// values for every built-in family.
#[test]
fn captured_values_convert_back_to_their_sources() {
    let mut registry = Registry::new();
    registry
        .register(
            StepDefinition::given(
                "on $date I transfer $amount euros $confirmed times $rate",
            )
            .handler_fn(|_| Ok(())),
        )
        .unwrap();

    let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
    let rendered = "Given on 14/03/2025 I transfer 250 euros 3 times 0.25";
    let (_, captured) = registry.find(rendered, None).unwrap();

    let chain = ConverterChain::with_defaults();
    assert_eq!(
        chain.convert_to::<NaiveDate>(&captured["date"]).unwrap(),
        date,
    );
    assert_eq!(chain.convert_to::<i64>(&captured["amount"]).unwrap(), 250);
    assert_eq!(chain.convert_to::<u32>(&captured["confirmed"]).unwrap(), 3);
    assert_eq!(chain.convert_to::<f64>(&captured["rate"]).unwrap(), 0.25);
}

#[test]
fn boolean_and_string_families_round_trip() {
    let mut registry = Registry::new();
    registry
        .register(
            StepDefinition::when("the flag is $flag named $name")
                .handler_fn(|_| Ok(())),
        )
        .unwrap();

    let (_, captured) =
        registry.find("When the flag is true named backups", None).unwrap();

    let chain = ConverterChain::with_defaults();
    assert!(chain.convert_to::<bool>(&captured["flag"]).unwrap());
    assert_eq!(
        chain.convert_to::<String>(&captured["name"]).unwrap(),
        "backups",
    );
}

#[test]
fn enum_like_values_round_trip_case_insensitively() {
    #[derive(Debug, Eq, PartialEq)]
    enum Direction {
        North,
        South,
    }
    impl FromStr for Direction {
        type Err = String;
        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s {
                "NORTH" => Ok(Self::North),
                "SOUTH" => Ok(Self::South),
                other => Err(format!("unknown direction `{other}`")),
            }
        }
    }

    let mut chain = ConverterChain::with_defaults();
    chain.add(FromStrConverter::<Direction>::new());

    assert_eq!(
        chain.convert_to::<Direction>("north").unwrap(),
        Direction::North,
    );
    assert_eq!(
        chain.convert_to::<Direction>("South").unwrap(),
        Direction::South,
    );
    assert!(chain.convert_to::<Direction>("sideways").is_err());
}

#[test]
fn lists_of_every_numeric_width_round_trip() {
    let chain = ConverterChain::with_defaults();
    assert_eq!(
        chain.convert_to::<Vec<u8>>("1, 2, 3").unwrap(),
        vec![1, 2, 3],
    );
    assert_eq!(
        chain.convert_to::<Vec<i128>>("-9, 9").unwrap(),
        vec![-9, 9],
    );
    assert_eq!(
        chain.convert_to::<Vec<f32>>("0.5, 1.5").unwrap(),
        vec![0.5, 1.5],
    );
}

#[test]
fn conversion_failures_name_value_and_target() {
    let chain = ConverterChain::with_defaults();
    let err = chain.convert_to::<i64>("twelve").unwrap_err();
    assert_eq!(err.value, "twelve");
    assert!(err.target.contains("i64"));
}
