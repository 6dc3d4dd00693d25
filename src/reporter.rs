// Copyright (c) 2026  The narrative contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Listeners consuming the ordered [`Event`] stream.
//!
//! Rendering is not the engine's business: it hands every event to the
//! injected [`Reporter`]s and moves on. Multiple reporters are fanned out in
//! sequence via [`Reporters`].

use std::sync::{Arc, Mutex};

use crate::event::{Event, RunEvent};

/// Listener of run events.
///
/// Implementations must tolerate being called from multiple story worker
/// tasks at once; events of one story arrive in order, events of different
/// stories interleave.
pub trait Reporter: Send + Sync {
    /// Consumes one event.
    fn report(&self, event: &Event<RunEvent>);
}

/// Ordered fan-out over a list of [`Reporter`]s.
#[derive(Clone, Default)]
pub struct Reporters {
    reporters: Vec<Arc<dyn Reporter>>,
}

impl Reporters {
    /// Creates an empty fan-out.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a reporter to the end of the fan-out sequence.
    #[must_use]
    pub fn with(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    /// Stamps `value` and hands it to every reporter, in order.
    pub fn emit(&self, value: RunEvent) {
        let event = Event::new(value);
        for reporter in &self.reporters {
            reporter.report(&event);
        }
    }
}

impl std::fmt::Debug for Reporters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporters")
            .field("reporters", &self.reporters.len())
            .finish()
    }
}

/// Reporter discarding everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn report(&self, _: &Event<RunEvent>) {}
}

/// Reporter collecting every event for later inspection.
#[derive(Debug, Default)]
pub struct EventCollector {
    events: Mutex<Vec<Event<RunEvent>>>,
}

impl EventCollector {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a shared collector alongside a [`Reporters`] fan-out already
    /// containing it.
    #[must_use]
    pub fn fan_out() -> (Arc<Self>, Reporters) {
        let collector = Arc::new(Self::new());
        let reporters =
            Reporters::new().with(Arc::clone(&collector) as Arc<dyn Reporter>);
        (collector, reporters)
    }

    /// Snapshot of the collected event values, in arrival order.
    ///
    /// # Panics
    ///
    /// If a collecting thread panicked while holding the lock.
    #[must_use]
    pub fn values(&self) -> Vec<RunEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.value.clone())
            .collect()
    }
}

impl Reporter for EventCollector {
    fn report(&self, event: &Event<RunEvent>) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_out_invokes_reporters_in_sequence() {
        let (first, reporters) = EventCollector::fan_out();
        let second = Arc::new(EventCollector::new());
        let reporters =
            reporters.with(Arc::clone(&second) as Arc<dyn Reporter>);

        reporters.emit(RunEvent::Started);
        reporters.emit(RunEvent::Finished);

        assert_eq!(first.values().len(), 2);
        assert_eq!(second.values().len(), 2);
        assert!(matches!(first.values()[0], RunEvent::Started));
    }
}
