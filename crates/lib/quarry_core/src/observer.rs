//! Observer capability: structured spans, errors, and counters.
//!
//! The core emits through this seam; the sink is pluggable. The tracing
//! implementation is the default, the no-op one is for tests and minimal
//! profiles.

use std::time::Duration;

pub type Attributes<'a> = &'a [(&'a str, String)];

pub trait Observer: Send + Sync {
    fn emit_span(&self, name: &str, attributes: Attributes<'_>, duration: Duration);

    fn emit_error(&self, kind: &str, message: &str, attributes: Attributes<'_>);

    fn emit_counter(&self, name: &str, tags: Attributes<'_>, delta: u64);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {
    fn emit_span(&self, _name: &str, _attributes: Attributes<'_>, _duration: Duration) {}
    fn emit_error(&self, _kind: &str, _message: &str, _attributes: Attributes<'_>) {}
    fn emit_counter(&self, _name: &str, _tags: Attributes<'_>, _delta: u64) {}
}

/// Emits through `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn emit_span(&self, name: &str, attributes: Attributes<'_>, duration: Duration) {
        tracing::info!(
            span = name,
            duration_ms = duration.as_millis() as u64,
            attributes = ?attributes,
            "span"
        );
    }

    fn emit_error(&self, kind: &str, message: &str, attributes: Attributes<'_>) {
        tracing::warn!(kind, message, attributes = ?attributes, "error");
    }

    fn emit_counter(&self, name: &str, tags: Attributes<'_>, delta: u64) {
        tracing::debug!(counter = name, delta, tags = ?tags, "counter");
    }
}

pub mod testing {
    //! Counting observer for assertions in tests (used by the other tiers'
    //! integration tests too, so not test-gated).

    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct CountingObserver {
        pub spans: AtomicU64,
        pub errors: AtomicU64,
        pub counters: Mutex<Vec<(String, u64)>>,
    }

    impl Observer for CountingObserver {
        fn emit_span(&self, _name: &str, _attributes: Attributes<'_>, _duration: Duration) {
            self.spans.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_error(&self, _kind: &str, _message: &str, _attributes: Attributes<'_>) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_counter(&self, name: &str, _tags: Attributes<'_>, delta: u64) {
            self.counters
                .lock()
                .unwrap()
                .push((name.to_string(), delta));
        }
    }

    impl CountingObserver {
        pub fn counter_total(&self, name: &str) -> u64 {
            self.counters
                .lock()
                .unwrap()
                .iter()
                .filter(|(n, _)| n == name)
                .map(|(_, d)| d)
                .sum()
        }
    }
}
