// Copyright (c) 2026  The narrative contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Conversion of textual parameter values to typed values.
//!
//! A [`ConverterChain`] holds [`Converter`]s in a front-priority list: the
//! most recently added converter wins ties, so built-ins can be overridden
//! without removing them. Reaching a target type is a backward chain search:
//! the chain finds a converter producing the target; if that converter's
//! declared source is not plain text, a chain feeding *that* source is
//! resolved recursively, and the assembled chain is applied front-to-back.
//!
//! ```
//! use narrative::convert::ConverterChain;
//!
//! let chain = ConverterChain::with_defaults();
//! assert_eq!(chain.convert_to::<i64>("42").unwrap(), 42);
//! assert_eq!(chain.convert_to::<bool>("true").unwrap(), true);
//! ```

mod builtin;

pub use self::builtin::{
    BoolConverter, ChainedConverter, DateConverter, FnConverter, FromRow,
    FromStrConverter, JsonConverter, ListConverter, NumberConverter,
    NumericLocale, OptionConverter, RowConverter, RowsConverter,
    StringConverter, TableConverter,
};

use std::{
    any::{Any, TypeId},
    fmt,
    sync::Arc,
};

use crate::error::ConversionFailed;

/// Description of a conversion target: its [`TypeId`] plus a display name
/// for diagnostics.
#[derive(Clone, Copy, Debug)]
pub struct TargetType {
    id: TypeId,
    name: &'static str,
}

impl TargetType {
    /// Describes the type `T`.
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self { id: TypeId::of::<T>(), name: std::any::type_name::<T>() }
    }

    /// Display name of the type.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Identity of the type.
    #[must_use]
    pub fn id(&self) -> TypeId {
        self.id
    }
}

impl PartialEq for TargetType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TargetType {}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A value travelling through a conversion chain: either still text, or
/// already typed by an earlier stage.
pub enum Value {
    /// Unconverted textual value.
    Text(String),

    /// Typed value produced by a converter stage.
    Typed(Box<dyn Any + Send>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Typed(_) => f.write_str("Typed(..)"),
        }
    }
}

impl Value {
    /// Borrows the text of this value.
    ///
    /// # Errors
    ///
    /// If an earlier stage already produced a typed value: the converter
    /// asking declared itself text-sourced but was fed a typed input.
    pub fn expect_text(
        &self,
        target: &TargetType,
    ) -> Result<&str, ConversionFailed> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Typed(_) => Err(ConversionFailed {
                value: String::new(),
                target: target.name(),
                message: "converter expected a textual input".into(),
            }),
        }
    }

    /// Unwraps the typed payload the chain produced.
    ///
    /// # Errors
    ///
    /// If the value is still text, meaning the resolved chain never produced
    /// a typed stage.
    pub fn into_any(
        self,
        target: &TargetType,
    ) -> Result<Box<dyn Any + Send>, ConversionFailed> {
        match self {
            Self::Typed(any) => Ok(any),
            Self::Text(text) => Err(ConversionFailed {
                value: text,
                target: target.name(),
                message: "chain produced no typed value".into(),
            }),
        }
    }

    /// Downcasts a typed value to `T`.
    ///
    /// # Errors
    ///
    /// If the value is still text or holds a different type.
    pub fn downcast<T: 'static>(
        self,
        target: &TargetType,
    ) -> Result<T, ConversionFailed> {
        let described = self.describe();
        match self {
            Self::Typed(any) => any.downcast::<T>().map(|b| *b).map_err(|_| {
                ConversionFailed {
                    value: described,
                    target: target.name(),
                    message: "chain produced a different type".into(),
                }
            }),
            Self::Text(text) => Err(ConversionFailed {
                value: text,
                target: target.name(),
                message: "chain produced no typed value".into(),
            }),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Typed(_) => "<typed value>".into(),
        }
    }
}

/// A single conversion stage.
///
/// Implementations declare which target types they can produce, and
/// optionally a typed source they consume instead of plain text. The `chain`
/// argument lets container converters (lists, options, table rows) convert
/// their elements recursively.
pub trait Converter: Send + Sync {
    /// Indicates whether this converter can produce `target`.
    fn accepts(&self, target: &TargetType) -> bool;

    /// The typed source this converter consumes; `None` means it consumes
    /// text.
    fn source(&self) -> Option<TargetType> {
        None
    }

    /// Converts `input` into a value of `target` type.
    ///
    /// # Errors
    ///
    /// If the input is malformed for the target type.
    fn convert(
        &self,
        input: Value,
        target: &TargetType,
        chain: &ConverterChain,
    ) -> Result<Value, ConversionFailed>;
}

/// Resolvable, chainable converter graph with a front-priority list.
#[derive(Clone, Default)]
pub struct ConverterChain {
    converters: Vec<Arc<dyn Converter>>,
}

impl fmt::Debug for ConverterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterChain")
            .field("converters", &self.converters.len())
            .finish()
    }
}

impl ConverterChain {
    /// Creates a chain with no converters at all.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a chain pre-populated with the built-in families under
    /// default settings (English numeric locale, `,` list separator,
    /// `true`/`false` literals, `%d/%m/%Y` dates).
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::with_settings(NumericLocale::english(), ",", "%d/%m/%Y")
    }

    /// Creates a chain pre-populated with the built-in families under the
    /// given settings.
    #[must_use]
    pub fn with_settings(
        locale: NumericLocale,
        list_separator: &str,
        date_format: &str,
    ) -> Self {
        let mut chain = Self::empty();
        chain.add(TableConverter);
        chain.add(DateConverter::new(date_format));
        chain.add(StringConverter);
        chain.add(BoolConverter::default());
        chain.add(NumberConverter::new(locale));
        builtin::register_default_containers(&mut chain, list_separator);
        chain
    }

    /// Adds a converter at the front of the list, so it wins over everything
    /// added before it.
    pub fn add(&mut self, converter: impl Converter + 'static) {
        self.converters.insert(0, Arc::new(converter));
    }

    /// Registers list conversion (`Vec<T>`) for the element type `T`.
    pub fn register_list_of<T: Send + 'static>(&mut self, separator: &str) {
        self.add(ListConverter::<T>::new(separator));
    }

    /// Registers optional conversion (`Option<T>`) for the element type `T`.
    pub fn register_option_of<T: Send + 'static>(&mut self) {
        self.add(OptionConverter::<T>::new());
    }

    /// Registers table-row conversion for `T` (single row) and `Vec<T>`
    /// (one value per row).
    pub fn register_rows_of<T: FromRow + Send + 'static>(&mut self) {
        self.add(RowConverter::<T>::new());
        self.add(RowsConverter::<T>::new());
    }

    /// Converts `text` to a `T`.
    ///
    /// # Errors
    ///
    /// If no conversion path to `T` exists or the input is malformed.
    pub fn convert_to<T: 'static>(
        &self,
        text: &str,
    ) -> Result<T, ConversionFailed> {
        let target = TargetType::of::<T>();
        self.convert_dyn(text, &target)?.downcast::<T>(&target)
    }

    /// Converts `text` to a boxed value of the `target` type.
    ///
    /// # Errors
    ///
    /// If no conversion path exists or the input is malformed.
    pub fn convert_dyn(
        &self,
        text: &str,
        target: &TargetType,
    ) -> Result<Value, ConversionFailed> {
        let mut stages = Vec::new();
        self.resolve(target, text, &mut Vec::new(), &mut stages)?;

        let mut value = Value::Text(text.to_owned());
        for (converter, stage_target) in stages {
            value = converter.convert(value, &stage_target, self)?;
        }
        Ok(value)
    }

    /// Backward chain search: appends to `stages` the converter sequence
    /// producing `target`, front-to-back.
    fn resolve(
        &self,
        target: &TargetType,
        original: &str,
        visited: &mut Vec<TypeId>,
        stages: &mut Vec<(Arc<dyn Converter>, TargetType)>,
    ) -> Result<(), ConversionFailed> {
        if visited.contains(&target.id()) {
            return Err(ConversionFailed {
                value: original.to_owned(),
                target: target.name(),
                message: "cyclic converter chain".into(),
            });
        }
        visited.push(target.id());

        let converter = self
            .converters
            .iter()
            .find(|c| c.accepts(target))
            .cloned()
            .ok_or_else(|| ConversionFailed {
                value: original.to_owned(),
                target: target.name(),
                message: "no conversion path".into(),
            })?;

        if let Some(source) = converter.source() {
            self.resolve(&source, original, visited, stages)?;
        }
        stages.push((converter, *target));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_registrations_win_ties() {
        let mut chain = ConverterChain::with_defaults();
        assert_eq!(chain.convert_to::<i64>("7").unwrap(), 7);

        chain.add(FnConverter::new(|_: &str| Ok(99_i64)));
        assert_eq!(chain.convert_to::<i64>("7").unwrap(), 99);
    }

    #[test]
    fn missing_path_reports_the_target() {
        struct Opaque;
        let chain = ConverterChain::with_defaults();
        let err = chain
            .convert_dyn("x", &TargetType::of::<Opaque>())
            .unwrap_err();
        assert!(err.message.contains("no conversion path"));
    }

    #[test]
    fn chained_sources_resolve_backwards() {
        #[derive(Debug, PartialEq)]
        struct Meters(f64);
        #[derive(Debug, PartialEq)]
        struct Feet(f64);

        let mut chain = ConverterChain::with_defaults();
        chain.add(FnConverter::new(|text: &str| {
            text.parse::<f64>().map(Meters).map_err(|e| e.to_string())
        }));
        chain.add(FnConverter::chained(|m: &Meters| Ok(Feet(m.0 * 3.281))));

        let feet = chain.convert_to::<Feet>("2").unwrap();
        assert!((feet.0 - 6.562).abs() < 1e-9);
    }

    #[test]
    fn cyclic_chains_fail_instead_of_recursing() {
        #[derive(Debug)]
        struct A;
        #[derive(Debug)]
        struct B;

        let mut chain = ConverterChain::empty();
        chain.add(FnConverter::chained(|_: &B| Ok(A)));
        chain.add(FnConverter::chained(|_: &A| Ok(B)));

        let err = chain.convert_dyn("x", &TargetType::of::<A>()).unwrap_err();
        assert!(err.message.contains("cyclic"));
    }
}
