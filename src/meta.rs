// Copyright (c) 2026  The narrative contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Meta tags and the include/exclude filter evaluated over them.
//!
//! [`Meta`] is an ordered name→value tag set attached to stories, scenarios
//! and example rows. A child's meta inherits every parent property it does
//! not define locally. [`MetaFilter`] evaluates a textual expression of
//! whitespace-separated tokens prefixed with `+` (include) or `-` (exclude)
//! against a [`Meta`]:
//!
//! ```
//! use narrative::meta::{Meta, MetaFilter};
//!
//! let filter = MetaFilter::parse("+theme smoke -skip");
//! let meta = Meta::from_pairs([("theme", "smoke")]);
//! assert!(filter.allow(&meta));
//! assert!(!filter.allow(&Meta::from_pairs([("skip", "")])));
//! ```
//!
//! A `*` inside a rule value is a wildcard; a bare key matches on presence
//! alone.

use std::fmt;

use linked_hash_map::LinkedHashMap;
use regex::Regex;

/// Ordered name→value tag set.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Meta {
    properties: LinkedHashMap<String, String>,
}

impl Meta {
    /// Creates an empty [`Meta`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a [`Meta`] from name/value pairs, keeping their order.
    #[must_use]
    pub fn from_pairs<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        Self {
            properties: pairs
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }

    /// Parses a [`Meta`] from `@name value` tokens, one property per `@`
    /// occurrence. The first word after the prefix is the name, the rest of
    /// the token is the value.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut properties = LinkedHashMap::new();
        for token in text.split('@').map(str::trim).filter(|t| !t.is_empty()) {
            let (name, value) =
                token.split_once(char::is_whitespace).unwrap_or((token, ""));
            drop(properties.insert(
                name.trim().to_owned(),
                value.trim().to_owned(),
            ));
        }
        Self { properties }
    }

    /// Property names, in insertion order.
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    /// Indicates whether a property named `name` is present.
    #[must_use]
    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Value of the property named `name`, blank if absent.
    #[must_use]
    pub fn property(&self, name: &str) -> &str {
        self.properties.get(name).map_or("", String::as_str)
    }

    /// Indicates whether no properties are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Returns a new [`Meta`] with every `parent` property this one does not
    /// define locally.
    #[must_use]
    pub fn inherit_from(&self, parent: &Meta) -> Meta {
        let mut inherited = self.properties.clone();
        for (name, value) in &parent.properties {
            if !inherited.contains_key(name) {
                drop(inherited.insert(name.clone(), value.clone()));
            }
        }
        Meta { properties: inherited }
    }

    /// Name/value pairs, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl fmt::Display for Meta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in &self.properties {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            if value.is_empty() {
                write!(f, "@{name}")?;
            } else {
                write!(f, "@{name} {value}")?;
            }
        }
        Ok(())
    }
}

/// One parsed filter rule: a property name and an optional value pattern.
#[derive(Clone, Debug)]
struct Rule {
    name: String,
    value: String,
    /// Compiled wildcard pattern, present when the value contains `*`.
    wildcard: Option<Regex>,
}

impl Rule {
    fn parse(token: &str) -> Self {
        let (name, value) =
            token.split_once(char::is_whitespace).unwrap_or((token, ""));
        let value = value.trim().to_owned();
        let wildcard = value.contains('*').then(|| {
            let escaped = value
                .split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*");
            // The escaped pattern is always a valid regex.
            Regex::new(&format!("^{escaped}$")).unwrap_or_else(|_| {
                unreachable!("escaped wildcard pattern always compiles")
            })
        });
        Self { name: name.trim().to_owned(), value, wildcard }
    }

    /// Tests this rule against every property of `meta`; the first property
    /// with a matching name decides.
    fn matches(&self, meta: &Meta) -> bool {
        for name in meta.property_names() {
            if name != self.name {
                continue;
            }
            let value = meta.property(name);
            if self.value.is_empty() || value.is_empty() {
                return true;
            }
            return match &self.wildcard {
                Some(re) => re.is_match(value),
                None => self.value == value,
            };
        }
        false
    }
}

/// Boolean include/exclude filter over [`Meta`] tag sets.
///
/// Parsed once from its textual form; evaluation per the documented
/// semantics: include-only filters require an include match, exclude-only
/// filters require no exclude match, mixed filters require a match of the
/// merged rule set and no exclude match, and an empty filter allows
/// everything.
#[derive(Clone, Debug, Default)]
pub struct MetaFilter {
    expression: String,
    include: Vec<Rule>,
    exclude: Vec<Rule>,
}

impl MetaFilter {
    /// Parses a filter from its textual form.
    #[must_use]
    pub fn parse(expression: &str) -> Self {
        Self {
            expression: expression.to_owned(),
            include: Self::rules(expression, '+'),
            exclude: Self::rules(expression, '-'),
        }
    }

    /// Splits out the tokens carrying the given `prefix`. A token's value
    /// runs until the next `+`/`-` prefixed word.
    fn rules(expression: &str, prefix: char) -> Vec<Rule> {
        let mut rules = Vec::new();
        let mut current: Option<String> = None;
        for word in expression.split_whitespace() {
            if let Some(rest) = word.strip_prefix(['+', '-']) {
                if let Some(token) = current.take() {
                    rules.push(Rule::parse(&token));
                }
                if word.starts_with(prefix) {
                    current = Some(rest.to_owned());
                }
            } else if let Some(token) = &mut current {
                token.push(' ');
                token.push_str(word);
            }
        }
        if let Some(token) = current {
            rules.push(Rule::parse(&token));
        }
        rules
    }

    /// The filter's textual form, as parsed.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.expression
    }

    /// Indicates whether this filter has no rules at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Evaluates this filter against `meta`.
    #[must_use]
    pub fn allow(&self, meta: &Meta) -> bool {
        let allowed = match (self.include.is_empty(), self.exclude.is_empty())
        {
            (false, true) => Self::any_match(&self.include, meta),
            (true, false) => !Self::any_match(&self.exclude, meta),
            (false, false) => {
                Self::any_match(&self.merged(), meta)
                    && !Self::any_match(&self.exclude, meta)
            }
            (true, true) => true,
        };
        if !allowed {
            tracing::debug!(filter = %self.expression, meta = %meta, "excluded by meta filter");
        }
        allowed
    }

    /// Evaluates this filter against `meta`, treating an absent meta as
    /// allowed. Used for per-row example meta, where most rows carry none.
    #[must_use]
    pub fn excludes(&self, meta: &Meta) -> bool {
        !self.allow(meta)
    }

    fn any_match(rules: &[Rule], meta: &Meta) -> bool {
        rules.iter().any(|rule| rule.matches(meta))
    }

    /// Union of include and exclude rules, include values winning on a name
    /// collision.
    fn merged(&self) -> Vec<Rule> {
        let mut merged: Vec<Rule> = self.include.clone();
        for rule in &self.exclude {
            if !merged.iter().any(|r| r.name == rule.name) {
                merged.push(rule.clone());
            }
        }
        merged
    }
}

impl fmt::Display for MetaFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
