// Counter delta tracking across scrape cycles.
// Previous totals live in the cache as a generation-versioned slot replaced
// with compare-and-swap; a stale overlapping cycle fails the swap and aborts
// before any bucket write.

use crate::cache::MetricsCache;
use crate::models::{CounterValue, PreviousCounters, ProcessedSnapshot, RawSample};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

pub const PREVIOUS_COUNTERS_KEY: &str = "metrics:counters:previous";

#[derive(Debug, thiserror::Error)]
pub enum DeltaError {
    /// Another cycle replaced the previous-counter slot first. The caller
    /// drops this cycle's output; the winning cycle already accounted for
    /// the interval.
    #[error("previous-counter slot moved past generation {expected}")]
    StaleGeneration { expected: u64 },
}

pub struct CounterDeltaTracker {
    cache: Arc<dyn MetricsCache>,
    counter_names: HashSet<String>,
}

impl CounterDeltaTracker {
    pub fn new(cache: Arc<dyn MetricsCache>, counter_names: impl IntoIterator<Item = String>) -> Self {
        Self {
            cache,
            counter_names: counter_names.into_iter().collect(),
        }
    }

    /// Classification is by allow-listed base name; labels never influence it.
    pub fn is_counter(&self, name: &str) -> bool {
        self.counter_names.contains(name)
    }

    /// Build a processed snapshot from one cycle's samples, then advance the
    /// previous-counter slot. `delta = max(0, current - previous)`: the clamp
    /// absorbs upstream restarts at the cost of under-counting the reset
    /// interval, and each clamped counter bumps `resets_detected`.
    pub fn process(
        &self,
        samples: &[RawSample],
        usage: Option<serde_json::Value>,
        captured_at: u64,
    ) -> Result<ProcessedSnapshot, DeltaError> {
        // Keep the raw stored value for the swap: the CAS must compare
        // against exactly what is in the slot, including a slot whose shape
        // no longer decodes (which then just gets replaced).
        let raw = self.cache.get(PREVIOUS_COUNTERS_KEY);
        let previous: Option<PreviousCounters> = raw
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok());

        let mut gauges = BTreeMap::new();
        let mut counters = BTreeMap::new();
        let mut totals = BTreeMap::new();
        let mut resets_detected: u32 = 0;

        for sample in samples {
            if !sample.value.is_finite() {
                tracing::debug!(metric = %sample.name, "non-finite sample value skipped");
                continue;
            }
            let key = sample.key();
            if self.is_counter(&sample.name) {
                let prev_total = previous
                    .as_ref()
                    .and_then(|p| p.totals.get(&key).copied())
                    .unwrap_or(sample.value);
                let raw_delta = sample.value - prev_total;
                if raw_delta < 0.0 {
                    resets_detected += 1;
                    tracing::warn!(
                        metric = %key,
                        previous = prev_total,
                        current = sample.value,
                        "counter went backwards, upstream restart assumed; delta clamped to 0"
                    );
                }
                counters.insert(
                    key.clone(),
                    CounterValue {
                        total: sample.value,
                        delta: raw_delta.max(0.0),
                    },
                );
                totals.insert(key, sample.value);
            } else {
                gauges.insert(key, sample.value);
            }
        }

        let next = PreviousCounters {
            generation: previous.as_ref().map_or(1, |p| p.generation + 1),
            captured_at,
            totals,
        };
        let next_value = serde_json::to_value(&next)
            .expect("PreviousCounters serializes to plain JSON");
        let swapped =
            self.cache
                .compare_and_swap(PREVIOUS_COUNTERS_KEY, raw.as_ref(), next_value, None);
        if !swapped {
            return Err(DeltaError::StaleGeneration {
                expected: next.generation,
            });
        }

        Ok(ProcessedSnapshot {
            captured_at,
            gauges,
            counters,
            usage,
            resets_detected,
        })
    }
}
