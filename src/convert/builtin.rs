// Copyright (c) 2026  The narrative contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Built-in converter families.
//!
//! Everything here is registered by [`ConverterChain::with_defaults`] except
//! the type-specific families ([`FromStrConverter`], [`JsonConverter`],
//! [`RowConverter`], custom [`FnConverter`]s), which callers register per
//! target type.

use std::{
    any::{Any, TypeId},
    collections::HashSet,
    marker::PhantomData,
    str::FromStr,
    sync::Arc,
};

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;

use super::{Converter, ConverterChain, TargetType, Value};
use crate::{
    error::ConversionFailed,
    model::{ExamplesTable, Row},
};

fn failed(
    value: &str,
    target: &TargetType,
    message: impl Into<String>,
) -> ConversionFailed {
    ConversionFailed {
        value: value.to_owned(),
        target: target.name(),
        message: message.into(),
    }
}

/// Decimal and grouping separators used when reading numbers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NumericLocale {
    /// Character separating the integral and fractional parts.
    pub decimal_separator: char,

    /// Character grouping digits of the integral part; stripped before
    /// parsing.
    pub grouping_separator: char,
}

impl NumericLocale {
    /// `1,234.56`
    #[must_use]
    pub const fn english() -> Self {
        Self { decimal_separator: '.', grouping_separator: ',' }
    }

    /// `1.234,56`
    #[must_use]
    pub const fn german() -> Self {
        Self { decimal_separator: ',', grouping_separator: '.' }
    }

    /// Rewrites a localized number into the canonical form accepted by the
    /// standard parsers.
    fn canonicalize(&self, value: &str) -> String {
        value
            .trim()
            .chars()
            .filter(|c| *c != self.grouping_separator)
            .map(|c| if c == self.decimal_separator { '.' } else { c })
            .collect()
    }
}

impl Default for NumericLocale {
    fn default() -> Self {
        Self::english()
    }
}

static NUMERIC_TARGETS: Lazy<HashSet<TypeId>> = Lazy::new(|| {
    [
        TypeId::of::<i8>(),
        TypeId::of::<i16>(),
        TypeId::of::<i32>(),
        TypeId::of::<i64>(),
        TypeId::of::<i128>(),
        TypeId::of::<isize>(),
        TypeId::of::<u8>(),
        TypeId::of::<u16>(),
        TypeId::of::<u32>(),
        TypeId::of::<u64>(),
        TypeId::of::<u128>(),
        TypeId::of::<usize>(),
        TypeId::of::<f32>(),
        TypeId::of::<f64>(),
    ]
    .into_iter()
    .collect()
});

/// Locale-aware conversion to every primitive numeric type.
#[derive(Clone, Copy, Debug, Default)]
pub struct NumberConverter {
    locale: NumericLocale,
}

impl NumberConverter {
    /// Creates a converter reading numbers per `locale`.
    #[must_use]
    pub const fn new(locale: NumericLocale) -> Self {
        Self { locale }
    }

    fn parse<T>(
        canonical: &str,
        target: &TargetType,
    ) -> Result<Value, ConversionFailed>
    where
        T: FromStr + Send + 'static,
        T::Err: std::fmt::Display,
    {
        canonical
            .parse::<T>()
            .map(|n| Value::Typed(Box::new(n)))
            .map_err(|e| failed(canonical, target, e.to_string()))
    }
}

impl Converter for NumberConverter {
    fn accepts(&self, target: &TargetType) -> bool {
        NUMERIC_TARGETS.contains(&target.id())
    }

    fn convert(
        &self,
        input: Value,
        target: &TargetType,
        _: &ConverterChain,
    ) -> Result<Value, ConversionFailed> {
        let text = input.expect_text(target)?;
        let canonical = self.locale.canonicalize(text);
        let id = target.id();
        if id == TypeId::of::<i8>() {
            Self::parse::<i8>(&canonical, target)
        } else if id == TypeId::of::<i16>() {
            Self::parse::<i16>(&canonical, target)
        } else if id == TypeId::of::<i32>() {
            Self::parse::<i32>(&canonical, target)
        } else if id == TypeId::of::<i64>() {
            Self::parse::<i64>(&canonical, target)
        } else if id == TypeId::of::<i128>() {
            Self::parse::<i128>(&canonical, target)
        } else if id == TypeId::of::<isize>() {
            Self::parse::<isize>(&canonical, target)
        } else if id == TypeId::of::<u8>() {
            Self::parse::<u8>(&canonical, target)
        } else if id == TypeId::of::<u16>() {
            Self::parse::<u16>(&canonical, target)
        } else if id == TypeId::of::<u32>() {
            Self::parse::<u32>(&canonical, target)
        } else if id == TypeId::of::<u64>() {
            Self::parse::<u64>(&canonical, target)
        } else if id == TypeId::of::<u128>() {
            Self::parse::<u128>(&canonical, target)
        } else if id == TypeId::of::<usize>() {
            Self::parse::<usize>(&canonical, target)
        } else if id == TypeId::of::<f32>() {
            Self::parse::<f32>(&canonical, target)
        } else {
            Self::parse::<f64>(&canonical, target)
        }
    }
}

/// Conversion to `bool` with configurable literals, compared
/// case-insensitively.
#[derive(Clone, Debug)]
pub struct BoolConverter {
    true_literals: Vec<String>,
    false_literals: Vec<String>,
}

impl BoolConverter {
    /// Creates a converter recognizing the given literals.
    #[must_use]
    pub fn new<S: Into<String>>(
        true_literals: impl IntoIterator<Item = S>,
        false_literals: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            true_literals: true_literals
                .into_iter()
                .map(|s| s.into().to_lowercase())
                .collect(),
            false_literals: false_literals
                .into_iter()
                .map(|s| s.into().to_lowercase())
                .collect(),
        }
    }
}

impl Default for BoolConverter {
    fn default() -> Self {
        Self::new(["true"], ["false"])
    }
}

impl Converter for BoolConverter {
    fn accepts(&self, target: &TargetType) -> bool {
        target.id() == TypeId::of::<bool>()
    }

    fn convert(
        &self,
        input: Value,
        target: &TargetType,
        _: &ConverterChain,
    ) -> Result<Value, ConversionFailed> {
        let text = input.expect_text(target)?.trim().to_lowercase();
        if self.true_literals.contains(&text) {
            Ok(Value::Typed(Box::new(true)))
        } else if self.false_literals.contains(&text) {
            Ok(Value::Typed(Box::new(false)))
        } else {
            Err(failed(&text, target, "not a recognized boolean literal"))
        }
    }
}

/// Conversion to `String`, normalizing line endings.
#[derive(Clone, Copy, Debug, Default)]
pub struct StringConverter;

impl Converter for StringConverter {
    fn accepts(&self, target: &TargetType) -> bool {
        target.id() == TypeId::of::<String>()
    }

    fn convert(
        &self,
        input: Value,
        target: &TargetType,
        _: &ConverterChain,
    ) -> Result<Value, ConversionFailed> {
        let text = input.expect_text(target)?;
        Ok(Value::Typed(Box::new(text.replace("\r\n", "\n"))))
    }
}

/// Conversion to [`NaiveDate`] with a configurable format.
#[derive(Clone, Debug)]
pub struct DateConverter {
    format: String,
}

impl DateConverter {
    /// Creates a converter parsing dates per the [`chrono` format]
    /// `format`.
    ///
    /// [`chrono` format]: chrono::format::strftime
    #[must_use]
    pub fn new(format: impl Into<String>) -> Self {
        Self { format: format.into() }
    }
}

impl Converter for DateConverter {
    fn accepts(&self, target: &TargetType) -> bool {
        target.id() == TypeId::of::<NaiveDate>()
    }

    fn convert(
        &self,
        input: Value,
        target: &TargetType,
        _: &ConverterChain,
    ) -> Result<Value, ConversionFailed> {
        let text = input.expect_text(target)?;
        NaiveDate::parse_from_str(text.trim(), &self.format)
            .map(|d| Value::Typed(Box::new(d)))
            .map_err(|e| failed(text, target, e.to_string()))
    }
}

/// Case-insensitive conversion through [`FromStr`], for ad hoc value types
/// with a fixed set of textual forms (the enum family).
///
/// The input is tried verbatim, then upper-cased with spaces collapsed to
/// `_`, then lower-cased.
pub struct FromStrConverter<T> {
    _target: PhantomData<fn() -> T>,
}

impl<T> FromStrConverter<T> {
    /// Creates a converter producing `T`.
    #[must_use]
    pub fn new() -> Self {
        Self { _target: PhantomData }
    }
}

impl<T> Default for FromStrConverter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Converter for FromStrConverter<T>
where
    T: FromStr + Send + 'static,
    T::Err: std::fmt::Display,
{
    fn accepts(&self, target: &TargetType) -> bool {
        target.id() == TypeId::of::<T>()
    }

    fn convert(
        &self,
        input: Value,
        target: &TargetType,
        _: &ConverterChain,
    ) -> Result<Value, ConversionFailed> {
        let text = input.expect_text(target)?.trim();
        let screaming = text.replace(' ', "_").to_uppercase();
        let lower = text.to_lowercase();
        text.parse::<T>()
            .or_else(|_| screaming.parse::<T>())
            .or_else(|_| lower.parse::<T>())
            .map(|v| Value::Typed(Box::new(v)))
            .map_err(|e| failed(text, target, e.to_string()))
    }
}

/// Conversion to `Vec<T>`: the value is split on a separator and every
/// element converted through the chain.
pub struct ListConverter<T> {
    separator: String,
    _element: PhantomData<fn() -> T>,
}

impl<T> ListConverter<T> {
    /// Creates a converter splitting on `separator`.
    #[must_use]
    pub fn new(separator: impl Into<String>) -> Self {
        Self { separator: separator.into(), _element: PhantomData }
    }
}

impl<T: Send + 'static> Converter for ListConverter<T> {
    fn accepts(&self, target: &TargetType) -> bool {
        target.id() == TypeId::of::<Vec<T>>()
    }

    fn convert(
        &self,
        input: Value,
        target: &TargetType,
        chain: &ConverterChain,
    ) -> Result<Value, ConversionFailed> {
        let text = input.expect_text(target)?;
        let mut elements = Vec::new();
        if !text.trim().is_empty() {
            for element in text.split(&self.separator) {
                elements.push(chain.convert_to::<T>(element.trim())?);
            }
        }
        Ok(Value::Typed(Box::new(elements)))
    }
}

/// Conversion to `Option<T>`: a blank value is `None`, anything else is
/// converted through the chain.
pub struct OptionConverter<T> {
    _element: PhantomData<fn() -> T>,
}

impl<T> OptionConverter<T> {
    /// Creates a converter producing `Option<T>`.
    #[must_use]
    pub fn new() -> Self {
        Self { _element: PhantomData }
    }
}

impl<T> Default for OptionConverter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Converter for OptionConverter<T> {
    fn accepts(&self, target: &TargetType) -> bool {
        target.id() == TypeId::of::<Option<T>>()
    }

    fn convert(
        &self,
        input: Value,
        target: &TargetType,
        chain: &ConverterChain,
    ) -> Result<Value, ConversionFailed> {
        let text = input.expect_text(target)?;
        let converted = if text.trim().is_empty() {
            None
        } else {
            Some(chain.convert_to::<T>(text)?)
        };
        Ok(Value::Typed(Box::new(converted)))
    }
}

/// Conversion of a pipe-separated table literal to [`ExamplesTable`].
#[derive(Clone, Copy, Debug, Default)]
pub struct TableConverter;

impl Converter for TableConverter {
    fn accepts(&self, target: &TargetType) -> bool {
        target.id() == TypeId::of::<ExamplesTable>()
    }

    fn convert(
        &self,
        input: Value,
        target: &TargetType,
        _: &ConverterChain,
    ) -> Result<Value, ConversionFailed> {
        let text = input.expect_text(target)?;
        Ok(Value::Typed(Box::new(ExamplesTable::parse(text))))
    }
}

/// Mapping of one table [`Row`] to a typed value.
pub trait FromRow: Sized {
    /// Builds a value out of `row`, converting cells through `chain` as
    /// needed.
    ///
    /// # Errors
    ///
    /// If a cell is missing or malformed.
    fn from_row(row: &Row, chain: &ConverterChain)
        -> Result<Self, ConversionFailed>;
}

/// Conversion of a single-row table literal to a [`FromRow`] value.
pub struct RowConverter<T> {
    _target: PhantomData<fn() -> T>,
}

impl<T> RowConverter<T> {
    /// Creates a converter producing `T` from exactly one row.
    #[must_use]
    pub fn new() -> Self {
        Self { _target: PhantomData }
    }
}

impl<T> Default for RowConverter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: FromRow + Send + 'static> Converter for RowConverter<T> {
    fn accepts(&self, target: &TargetType) -> bool {
        target.id() == TypeId::of::<T>()
    }

    fn convert(
        &self,
        input: Value,
        target: &TargetType,
        chain: &ConverterChain,
    ) -> Result<Value, ConversionFailed> {
        let text = input.expect_text(target)?;
        let table = ExamplesTable::parse(text);
        match table.rows() {
            [row] => {
                T::from_row(row, chain).map(|v| Value::Typed(Box::new(v)))
            }
            rows => Err(failed(
                text,
                target,
                format!("expected exactly 1 row, found {}", rows.len()),
            )),
        }
    }
}

/// Conversion of a table literal to `Vec<T>`, one [`FromRow`] value per row.
pub struct RowsConverter<T> {
    _target: PhantomData<fn() -> T>,
}

impl<T> RowsConverter<T> {
    /// Creates a converter producing one `T` per row.
    #[must_use]
    pub fn new() -> Self {
        Self { _target: PhantomData }
    }
}

impl<T> Default for RowsConverter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: FromRow + Send + 'static> Converter for RowsConverter<T> {
    fn accepts(&self, target: &TargetType) -> bool {
        target.id() == TypeId::of::<Vec<T>>()
    }

    fn convert(
        &self,
        input: Value,
        target: &TargetType,
        chain: &ConverterChain,
    ) -> Result<Value, ConversionFailed> {
        let text = input.expect_text(target)?;
        let table = ExamplesTable::parse(text);
        let mut values = Vec::with_capacity(table.rows().len());
        for row in table.rows() {
            values.push(T::from_row(row, chain)?);
        }
        Ok(Value::Typed(Box::new(values)))
    }
}

/// Conversion of a JSON blob to any [`DeserializeOwned`] target.
pub struct JsonConverter<T> {
    _target: PhantomData<fn() -> T>,
}

impl<T> JsonConverter<T> {
    /// Creates a converter deserializing `T` from JSON.
    #[must_use]
    pub fn new() -> Self {
        Self { _target: PhantomData }
    }
}

impl<T> Default for JsonConverter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned + Send + 'static> Converter for JsonConverter<T> {
    fn accepts(&self, target: &TargetType) -> bool {
        target.id() == TypeId::of::<T>()
    }

    fn convert(
        &self,
        input: Value,
        target: &TargetType,
        _: &ConverterChain,
    ) -> Result<Value, ConversionFailed> {
        let text = input.expect_text(target)?;
        serde_json::from_str::<T>(text)
            .map(|v| Value::Typed(Box::new(v)))
            .map_err(|e| failed(text, target, e.to_string()))
    }
}

/// Single-argument factory conversion for ad hoc value types: a plain
/// function from text to the target.
pub struct FnConverter<T> {
    #[allow(clippy::type_complexity)]
    convert: Arc<dyn Fn(&str) -> Result<T, String> + Send + Sync>,
}

impl<T: Send + 'static> FnConverter<T> {
    /// Creates a text-sourced factory converter.
    #[must_use]
    pub fn new(
        convert: impl Fn(&str) -> Result<T, String> + Send + Sync + 'static,
    ) -> Self {
        Self { convert: Arc::new(convert) }
    }

    /// Creates a factory converter consuming an already-typed source, so the
    /// chain resolves a path producing `S` first.
    #[must_use]
    pub fn chained<S: Any + Send + 'static>(
        convert: impl Fn(&S) -> Result<T, String> + Send + Sync + 'static,
    ) -> ChainedConverter<S, T> {
        ChainedConverter { convert: Arc::new(convert) }
    }
}

impl<T: Send + 'static> Converter for FnConverter<T> {
    fn accepts(&self, target: &TargetType) -> bool {
        target.id() == TypeId::of::<T>()
    }

    fn convert(
        &self,
        input: Value,
        target: &TargetType,
        _: &ConverterChain,
    ) -> Result<Value, ConversionFailed> {
        let text = input.expect_text(target)?;
        (self.convert)(text)
            .map(|v| Value::Typed(Box::new(v)))
            .map_err(|message| failed(text, target, message))
    }
}

/// Factory conversion whose input is another typed value, linking two chain
/// stages together.
pub struct ChainedConverter<S, T> {
    #[allow(clippy::type_complexity)]
    convert: Arc<dyn Fn(&S) -> Result<T, String> + Send + Sync>,
}

impl<S: Any + Send + 'static, T: Send + 'static> Converter
    for ChainedConverter<S, T>
{
    fn accepts(&self, target: &TargetType) -> bool {
        target.id() == TypeId::of::<T>()
    }

    fn source(&self) -> Option<TargetType> {
        Some(TargetType::of::<S>())
    }

    fn convert(
        &self,
        input: Value,
        target: &TargetType,
        _: &ConverterChain,
    ) -> Result<Value, ConversionFailed> {
        let source =
            input.downcast::<S>(&TargetType::of::<S>()).map_err(|mut e| {
                e.target = target.name();
                e
            })?;
        (self.convert)(&source)
            .map(|v| Value::Typed(Box::new(v)))
            .map_err(|message| failed("<typed value>", target, message))
    }
}

/// Registers the default container conversions: lists and options of every
/// primitive numeric type, `String` and `bool`.
pub(super) fn register_default_containers(
    chain: &mut ConverterChain,
    separator: &str,
) {
    macro_rules! containers {
        ($($ty:ty),* $(,)?) => {$(
            chain.register_list_of::<$ty>(separator);
            chain.register_option_of::<$ty>();
        )*};
    }
    containers!(
        i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32,
        f64, String, bool,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_parse_per_locale() {
        let chain = ConverterChain::with_settings(
            NumericLocale::german(),
            ",",
            "%d/%m/%Y",
        );
        assert_eq!(chain.convert_to::<f64>("1.234,5").unwrap(), 1234.5);
        assert_eq!(chain.convert_to::<i32>("1.234").unwrap(), 1234);
    }

    #[test]
    fn malformed_numbers_fail() {
        let chain = ConverterChain::with_defaults();
        assert!(chain.convert_to::<i64>("not a number").is_err());
        assert!(chain.convert_to::<u8>("-1").is_err());
    }

    #[test]
    fn booleans_use_configured_literals() {
        let mut chain = ConverterChain::with_defaults();
        chain.add(BoolConverter::new(["yes", "ON"], ["no", "off"]));
        assert!(chain.convert_to::<bool>("Yes").unwrap());
        assert!(!chain.convert_to::<bool>("OFF").unwrap());
        assert!(chain.convert_to::<bool>("maybe").is_err());
    }

    #[test]
    fn strings_normalize_line_endings() {
        let chain = ConverterChain::with_defaults();
        assert_eq!(chain.convert_to::<String>("a\r\nb").unwrap(), "a\nb");
    }

    #[test]
    fn dates_parse_with_the_configured_format() {
        let chain = ConverterChain::with_defaults();
        let date = chain.convert_to::<NaiveDate>("25/12/2025").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 12, 25).unwrap());
    }

    #[test]
    fn from_str_conversion_is_case_insensitive() {
        #[derive(Debug, PartialEq)]
        enum Color {
            DarkRed,
        }
        impl FromStr for Color {
            type Err = String;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    "DARK_RED" => Ok(Self::DarkRed),
                    other => Err(format!("unknown color `{other}`")),
                }
            }
        }

        let mut chain = ConverterChain::with_defaults();
        chain.add(FromStrConverter::<Color>::new());
        assert_eq!(
            chain.convert_to::<Color>("dark red").unwrap(),
            Color::DarkRed,
        );
    }

    #[test]
    fn lists_split_and_convert_each_element() {
        let chain = ConverterChain::with_defaults();
        assert_eq!(
            chain.convert_to::<Vec<i64>>("1, 2, 3").unwrap(),
            vec![1, 2, 3],
        );
        assert_eq!(chain.convert_to::<Vec<String>>("").unwrap().len(), 0);
    }

    #[test]
    fn options_treat_blank_as_none() {
        let chain = ConverterChain::with_defaults();
        assert_eq!(chain.convert_to::<Option<i64>>(" ").unwrap(), None);
        assert_eq!(chain.convert_to::<Option<i64>>("5").unwrap(), Some(5));
    }

    #[test]
    fn rows_map_to_typed_values() {
        #[derive(Debug, PartialEq)]
        struct User {
            name: String,
            age: u32,
        }
        impl FromRow for User {
            fn from_row(
                row: &Row,
                chain: &ConverterChain,
            ) -> Result<Self, ConversionFailed> {
                Ok(Self {
                    name: row.get("name").cloned().unwrap_or_default(),
                    age: chain.convert_to::<u32>(
                        row.get("age").map_or("", String::as_str),
                    )?,
                })
            }
        }

        let mut chain = ConverterChain::with_defaults();
        chain.register_rows_of::<User>();

        let users = chain
            .convert_to::<Vec<User>>("|name|age|\n|Alice|30|\n|Bob|25|")
            .unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0], User { name: "Alice".into(), age: 30 });

        let single = chain.convert_to::<User>("|name|age|\n|Carol|41|").unwrap();
        assert_eq!(single.age, 41);
    }

    #[test]
    fn json_blobs_deserialize() {
        #[derive(Debug, PartialEq, serde::Deserialize)]
        struct Point {
            x: i32,
            y: i32,
        }

        let mut chain = ConverterChain::with_defaults();
        chain.add(JsonConverter::<Point>::new());
        assert_eq!(
            chain.convert_to::<Point>(r#"{"x": 1, "y": 2}"#).unwrap(),
            Point { x: 1, y: 2 },
        );
    }
}
