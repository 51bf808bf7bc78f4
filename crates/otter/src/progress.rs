//! Per-tick progress reporting and cooperative cancellation.
//!
//! Progress is observation only: sinks cannot pause or steer a run, and a panicking sink is
//! logged and ignored.

use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickProgress {
    pub iteration: usize,
    pub alpha: f64,
    /// `min(iteration / max_iterations, 1)`.
    pub progress: f64,
    pub converged: bool,
}

pub trait ProgressSink {
    fn on_tick(&mut self, progress: &TickProgress);
}

impl<F> ProgressSink for F
where
    F: FnMut(&TickProgress),
{
    fn on_tick(&mut self, progress: &TickProgress) {
        self(progress)
    }
}

/// Forwards every tick into a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink(pub Sender<TickProgress>);

impl ProgressSink for ChannelSink {
    fn on_tick(&mut self, progress: &TickProgress) {
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.0.send(*progress);
    }
}

/// Wraps a sink so that panics inside it never abort the simulation.
pub(crate) struct GuardedSink<'a> {
    inner: Box<dyn ProgressSink + Send + 'a>,
    panics: usize,
}

impl<'a> GuardedSink<'a> {
    pub(crate) fn new(inner: Box<dyn ProgressSink + Send + 'a>) -> Self {
        Self { inner, panics: 0 }
    }

    pub(crate) fn emit(&mut self, progress: &TickProgress) {
        let inner = &mut self.inner;
        if catch_unwind(AssertUnwindSafe(|| inner.on_tick(progress))).is_err() {
            self.panics += 1;
            if self.panics == 1 {
                tracing::warn!(
                    iteration = progress.iteration,
                    "progress callback panicked; ignoring and continuing the layout"
                );
            }
        }
    }

    pub(crate) fn panics(&self) -> usize {
        self.panics
    }
}

/// Shared stop flag, checked at the top of every tick.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(iteration: usize) -> TickProgress {
        TickProgress {
            iteration,
            alpha: 0.5,
            progress: 0.1,
            converged: false,
        }
    }

    #[test]
    fn panicking_sink_is_contained() {
        let mut calls = 0usize;
        {
            let mut sink = GuardedSink::new(Box::new(|p: &TickProgress| {
                calls += 1;
                if p.iteration == 2 {
                    panic!("boom");
                }
            }));
            for i in 1..=4 {
                sink.emit(&tick(i));
            }
            assert_eq!(sink.panics(), 1);
        }
        assert_eq!(calls, 4);
    }

    #[test]
    fn channel_sink_forwards_and_tolerates_dropped_receiver() {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut sink = GuardedSink::new(Box::new(ChannelSink(tx)));
        sink.emit(&tick(1));
        assert_eq!(rx.recv().expect("progress").iteration, 1);
        drop(rx);
        sink.emit(&tick(2));
        assert_eq!(sink.panics(), 0);
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }
}
