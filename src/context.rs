// Copyright (c) 2026  The narrative contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Per-story run state.
//!
//! A [`RunContext`] is moved into each story's worker task and passed by
//! reference through the whole tree walk: current path, reporter handle,
//! state-machine state, pending record and the scoped object store all live
//! here, never in globals, so concurrently performing stories cannot leak
//! into each other. The only shared pieces are the two thread-safe maps it
//! holds handles to: [`BatchFailures`] and the [`CancelRegistry`].

use std::{any::Any, collections::HashMap, sync::Arc};

use dashmap::DashMap;

use crate::{
    config::Config,
    convert::ConverterChain,
    error::{BatchFailures, Cancellation, Failure, PendingStep},
    event::RunEvent,
    reporter::Reporters,
    state::State,
    step::Registry,
    tree::Status,
};

/// Scope of one entry in the [`ContextStore`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ObjectScope {
    /// Lives until the owning story finishes.
    Story,

    /// Lives until the current scenario finishes.
    Scenario,

    /// Lives until the current example instance finishes.
    Example,
}

/// Typed key→value store for transient objects shared between the steps of
/// one story. Each scope clears at its unit's start boundary, before the
/// unit's first step.
#[derive(Default)]
pub struct ContextStore {
    story: HashMap<String, Box<dyn Any + Send>>,
    scenario: HashMap<String, Box<dyn Any + Send>>,
    example: HashMap<String, Box<dyn Any + Send>>,
}

impl std::fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStore")
            .field("story", &self.story.keys().collect::<Vec<_>>())
            .field("scenario", &self.scenario.keys().collect::<Vec<_>>())
            .field("example", &self.example.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ContextStore {
    /// Stores `value` under `key` in the given `scope`.
    pub fn put<T: Any + Send>(
        &mut self,
        scope: ObjectScope,
        key: impl Into<String>,
        value: T,
    ) {
        drop(self.map_of(scope).insert(key.into(), Box::new(value)));
    }

    /// Fetches the value stored under `key`, searching the narrowest scope
    /// first.
    #[must_use]
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        [&self.example, &self.scenario, &self.story]
            .into_iter()
            .find_map(|map| map.get(key))
            .and_then(|v| v.downcast_ref())
    }

    /// Fetches the value stored under `key` mutably.
    #[must_use]
    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        [&mut self.example, &mut self.scenario, &mut self.story]
            .into_iter()
            .find_map(|map| map.get_mut(key))
            .and_then(|v| v.downcast_mut())
    }

    pub(crate) fn reset_story(&mut self) {
        self.story.clear();
        self.scenario.clear();
        self.example.clear();
    }

    pub(crate) fn reset_scenario(&mut self) {
        self.scenario.clear();
        self.example.clear();
    }

    pub(crate) fn reset_example(&mut self) {
        self.example.clear();
    }

    fn map_of(
        &mut self,
        scope: ObjectScope,
    ) -> &mut HashMap<String, Box<dyn Any + Send>> {
        match scope {
            ObjectScope::Story => &mut self.story,
            ObjectScope::Scenario => &mut self.scenario,
            ObjectScope::Example => &mut self.example,
        }
    }
}

/// Thread-safe registry of cancelled stories, keyed by top-level story path.
///
/// The runner's orchestrator marks; worker tasks observe at step
/// boundaries.
#[derive(Clone, Debug, Default)]
pub struct CancelRegistry {
    cancelled: Arc<DashMap<String, Cancellation>>,
}

impl CancelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the story at `path` cancelled.
    pub fn mark(&self, cancellation: Cancellation) {
        drop(
            self.cancelled
                .insert(cancellation.path.clone(), cancellation),
        );
    }

    /// Indicates whether the story at `path` has been marked.
    #[must_use]
    pub fn is_cancelled(&self, path: &str) -> bool {
        self.cancelled.contains_key(path)
    }

    /// The cancellation recorded for `path`, if any.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Cancellation> {
        self.cancelled.get(path).map(|c| c.value().clone())
    }
}

/// Per-story run state, passed by reference through the tree walk.
pub struct RunContext {
    pub(crate) config: Arc<Config>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) converters: Arc<ConverterChain>,
    pub(crate) reporters: Reporters,
    pub(crate) failures: BatchFailures,
    pub(crate) cancellation: CancelRegistry,

    /// Scoped transient objects of the running story.
    pub store: ContextStore,

    /// Path of the story this task performs; cancellation keys on it.
    root_path: String,

    /// Path currently reported under: switches to a given story's path while
    /// its subtree performs.
    current_path: String,

    state: State,
    genuine_recorded: bool,
    pending: HashMap<String, Vec<PendingStep>>,
}

impl RunContext {
    pub(crate) fn new(
        config: Arc<Config>,
        registry: Arc<Registry>,
        converters: Arc<ConverterChain>,
        reporters: Reporters,
        failures: BatchFailures,
        cancellation: CancelRegistry,
        root_path: impl Into<String>,
    ) -> Self {
        let root_path = root_path.into();
        Self {
            config,
            registry,
            converters,
            reporters,
            failures,
            cancellation,
            store: ContextStore::default(),
            current_path: root_path.clone(),
            root_path,
            state: State::Ok,
            genuine_recorded: false,
            pending: HashMap::new(),
        }
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Path currently being reported under.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.current_path
    }

    pub(crate) fn set_path(&mut self, path: impl Into<String>) {
        self.current_path = path.into();
    }

    /// Path of the story this task owns.
    #[must_use]
    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    pub(crate) fn state(&self) -> &State {
        &self.state
    }

    pub(crate) fn take_state(&mut self) -> State {
        std::mem::take(&mut self.state)
    }

    pub(crate) fn reset_state(&mut self) {
        self.state = State::Ok;
    }

    pub(crate) fn failure_occurred(&self) -> bool {
        self.state.is_failed()
    }

    /// Folds `failure` into the state machine, honoring pending precedence.
    pub(crate) fn fold_failure(&mut self, failure: Failure) {
        if !failure.is_pending() {
            self.genuine_recorded = true;
        }
        self.state =
            self.take_state().with_failure(failure, self.genuine_recorded);
    }

    /// Records the state's current failure (if any) into the batch
    /// aggregate, keyed by this task's story path. A bare pending marker
    /// only counts as a batch failure under the fail-on-pending policy.
    pub(crate) fn record_failure(&mut self) {
        if let Some(failure) = self.state.failure().cloned() {
            if failure.is_pending()
                && self.config.pending_step_policy
                    == crate::config::PendingStepPolicy::PassOnPending
            {
                return;
            }
            self.failures.append(self.root_path.clone(), failure);
        }
    }

    pub(crate) fn reset_story_failures(&mut self) {
        self.failures.reset_story(&self.root_path);
        self.genuine_recorded = false;
    }

    /// Emits one event to the injected reporters.
    pub(crate) fn emit(&self, event: RunEvent) {
        self.reporters.emit(event);
    }

    /// Raises the cancellation of this task's story, if it has been marked.
    /// Checked cooperatively before each step.
    pub(crate) fn check_cancelled(&self) -> Result<(), Failure> {
        match self.cancellation.get(&self.root_path) {
            Some(cancellation) => Err(Failure::Cancelled(cancellation)),
            None => Ok(()),
        }
    }

    pub(crate) fn record_pending(&mut self, steps: Vec<PendingStep>) {
        if !steps.is_empty() {
            self.pending
                .entry(self.current_path.clone())
                .or_default()
                .extend(steps);
        }
    }

    pub(crate) fn take_pending(&mut self) -> Vec<PendingStep> {
        self.pending.remove(&self.current_path).unwrap_or_default()
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.pending.contains_key(&self.current_path)
    }

    /// Folds the scope outcome per the rules: pending steps seen under the
    /// current path make it `Pending` (or `Failed` under the
    /// fail-on-pending policy); a scope entered already-failed is
    /// `NotPerformed`; otherwise the state decides between `Failed` and
    /// `Successful`.
    pub(crate) fn status(&self, initial: &State) -> Status {
        if self.has_pending() {
            match self.config.pending_step_policy {
                crate::config::PendingStepPolicy::PassOnPending => {
                    Status::Pending
                }
                crate::config::PendingStepPolicy::FailOnPending => {
                    Status::Failed
                }
            }
        } else if initial.is_failed() {
            Status::NotPerformed
        } else if self.state.is_failed() {
            Status::Failed
        } else {
            Status::Successful
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn store_scopes_shadow_and_reset() {
        let mut store = ContextStore::default();
        store.put(ObjectScope::Story, "count", 1_u32);
        store.put(ObjectScope::Scenario, "count", 2_u32);
        assert_eq!(store.get::<u32>("count"), Some(&2));

        store.reset_scenario();
        assert_eq!(store.get::<u32>("count"), Some(&1));

        store.reset_story();
        assert_eq!(store.get::<u32>("count"), None);
    }

    #[test]
    fn cancel_registry_round_trips() {
        let registry = CancelRegistry::new();
        assert!(!registry.is_cancelled("a.story"));

        registry.mark(Cancellation {
            path: "a.story".into(),
            elapsed: Duration::from_secs(3),
            timeout: Duration::from_secs(2),
        });
        assert!(registry.is_cancelled("a.story"));
        assert_eq!(registry.get("a.story").unwrap().timeout.as_secs(), 2);
    }
}
