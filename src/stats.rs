//! Self-time and total-time aggregation per method.

use dashmap::DashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{CollapsedStack, LensError, LensResult, Percent, ProfiledEvent};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MethodStats {
    #[serde(rename = "totalSamples")]
    pub total_samples: u64,
    #[serde(rename = "selfSamples")]
    pub self_samples: u64,
}

#[derive(Debug, Default)]
struct MethodCounters {
    total: AtomicU64,
    self_time: AtomicU64,
}

/// Per-method counters built in one pass over a set of stacks.
#[derive(Debug, Default)]
pub struct SelfTotalStats {
    methods: DashMap<Arc<str>, MethodCounters>,
    total: AtomicU64,
}

impl SelfTotalStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_stack_trace(&self, weight: u64) {
        self.total.fetch_add(weight, Ordering::Relaxed);
    }

    pub fn method_sample(&self, name: &Arc<str>, is_self: bool, weight: u64) {
        let record = |counters: &MethodCounters| {
            counters.total.fetch_add(weight, Ordering::Relaxed);
            if is_self {
                counters.self_time.fetch_add(weight, Ordering::Relaxed);
            }
        };
        if let Some(counters) = self.methods.get(&**name) {
            record(counters.value());
            return;
        }
        record(self.methods.entry(name.clone()).or_default().value());
    }

    /// Walks `frames` leaf to root, counting each distinct frame once.
    /// The leaf, the last element, also receives self weight.
    pub fn record_stack(&self, frames: &[Arc<str>], weight: u64) {
        self.new_stack_trace(weight);
        let mut visited = HashSet::with_capacity(frames.len());
        for (idx, frame) in frames.iter().enumerate().rev() {
            if !visited.insert(&**frame) {
                continue;
            }
            self.method_sample(frame, idx + 1 == frames.len(), weight);
        }
    }

    /// Aggregates filtered events in parallel. Allocation and lock events
    /// count their resource label as the self-time leaf.
    pub fn from_events<F>(events: &[&ProfiledEvent], weight: F) -> Self
    where
        F: Fn(&ProfiledEvent) -> u64 + Sync,
    {
        let stats = Self::new();
        events.par_iter().for_each(|event| {
            let Some(stack) = event.stack_trace() else {
                return;
            };
            let w = weight(*event);
            match event.terminal_resource() {
                Some(resource) => {
                    let mut frames = stack.frames().to_vec();
                    frames.push(resource);
                    stats.record_stack(&frames, w);
                }
                None => stats.record_stack(stack.frames(), w),
            }
        });
        stats
    }

    /// Aggregates a collapsed store, splitting each key on `;`.
    pub fn from_collapsed(stacks: &CollapsedStack) -> Self {
        let stats = Self::new();
        stacks.entries().par_iter().for_each(|(stack, weight)| {
            let frames = stack.split(';').map(crate::intern).collect::<Vec<_>>();
            stats.record_stack(&frames, *weight);
        });
        stats
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn get(&self, method: &str) -> Option<MethodStats> {
        self.methods.get(method).map(|c| snapshot(&c))
    }

    pub fn methods(&self) -> Vec<(Arc<str>, MethodStats)> {
        self.methods
            .iter()
            .map(|e| (e.key().clone(), snapshot(e.value())))
            .collect()
    }

    /// Ranked table of the top `limit` methods by the chosen view.
    pub fn table(&self, view: TimeView, limit: usize) -> LensResult<TimeTable> {
        let total = self.total();
        if total == 0 {
            return Err(LensError::NoData("method statistics".to_string()));
        }
        let mut rows = self
            .methods()
            .into_iter()
            .map(|(name, stats)| (name, view.pick(stats)))
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let rows = rows
            .into_iter()
            .take(limit)
            .map(|(name, samples)| TimeRow {
                method_name: name.to_string(),
                samples,
                percent: Percent::of(samples, total).unwrap_or_default(),
            })
            .collect();
        Ok(TimeTable { view, total, rows })
    }
}

fn snapshot(c: &MethodCounters) -> MethodStats {
    MethodStats {
        total_samples: c.total.load(Ordering::Relaxed),
        self_samples: c.self_time.load(Ordering::Relaxed),
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeView {
    #[default]
    Total,
    #[serde(rename = "self")]
    SelfTime,
}

impl TimeView {
    pub fn pick(self, stats: MethodStats) -> u64 {
        match self {
            Self::Total => stats.total_samples,
            Self::SelfTime => stats.self_samples,
        }
    }
}

impl clap::ValueEnum for TimeView {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Total, Self::SelfTime]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Total => clap::builder::PossibleValue::new("total"),
            Self::SelfTime => clap::builder::PossibleValue::new("self"),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeTable {
    pub view: TimeView,
    pub total: u64,
    pub rows: Vec<TimeRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeRow {
    #[serde(rename = "methodName")]
    pub method_name: String,
    pub samples: u64,
    pub percent: Percent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Payload;
    use crate::event::tests::sample;

    fn frames(names: &[&str]) -> Vec<Arc<str>> {
        names.iter().map(|n| crate::intern(n)).collect()
    }

    #[test]
    fn self_and_total_follow_leaf_and_presence() {
        let stats = SelfTotalStats::new();
        for _ in 0..3 {
            stats.record_stack(&frames(&["X", "Y", "Z"]), 1);
        }
        stats.record_stack(&frames(&["X", "Y"]), 2);
        assert_eq!(stats.total(), 5);
        assert_eq!(
            stats.get("Y"),
            Some(MethodStats {
                total_samples: 5,
                self_samples: 2
            })
        );
        assert_eq!(
            stats.get("Z"),
            Some(MethodStats {
                total_samples: 3,
                self_samples: 3
            })
        );
        assert_eq!(stats.get("X").map(|s| s.self_samples), Some(0));
    }

    #[test]
    fn recursive_frame_counted_once_per_stack() {
        let stats = SelfTotalStats::new();
        stats.record_stack(&frames(&["A", "B", "A"]), 4);
        let a = stats.get("A").expect("A");
        assert_eq!(a.total_samples, 4);
        assert_eq!(a.self_samples, 4);
        assert_eq!(stats.get("B").map(|s| s.total_samples), Some(4));
    }

    #[test]
    fn self_never_exceeds_total() {
        let events = vec![
            sample(&["a", "b", "c"], None, 0, 0),
            sample(&["a", "c", "b", "c"], None, 0, 0),
            sample(&["c"], None, 0, 0),
            sample(&["b", "a"], None, 0, 0),
        ];
        let refs = events.iter().collect::<Vec<_>>();
        let stats = SelfTotalStats::from_events(&refs, |_| 3);
        assert_eq!(stats.total(), 12);
        for (_, s) in stats.methods() {
            assert!(s.self_samples <= s.total_samples);
        }
    }

    #[test]
    fn resource_label_takes_self_time() {
        let mut event = sample(&["main", "alloc"], None, 0, 0);
        event.payload = Payload::Allocation {
            object_class: crate::intern("byte[]"),
            size: 64,
            outside_tlab: true,
        };
        let stats = SelfTotalStats::from_events(&[&event], |e| match e.payload {
            Payload::Allocation { size, .. } => size,
            _ => 1,
        });
        assert_eq!(stats.get("byte[]_[i]").map(|s| s.self_samples), Some(64));
        assert_eq!(stats.get("alloc").map(|s| (s.total_samples, s.self_samples)), Some((64, 0)));
    }

    #[test]
    fn table_is_ranked_and_limited() {
        let stats = SelfTotalStats::new();
        stats.record_stack(&frames(&["r", "hot"]), 6);
        stats.record_stack(&frames(&["r", "warm"]), 3);
        stats.record_stack(&frames(&["r", "cold"]), 1);
        let table = stats.table(TimeView::SelfTime, 2).expect("table");
        let names = table.rows.iter().map(|r| r.method_name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["hot", "warm"]);
        assert_eq!(table.rows[0].percent.to_string(), "60.00");

        let total = stats.table(TimeView::Total, 1).expect("table");
        assert_eq!(total.rows[0].method_name, "r");
        assert_eq!(total.rows[0].samples, 10);
    }

    #[test]
    fn empty_stats_refuse_percentages() {
        let stats = SelfTotalStats::new();
        assert!(matches!(stats.table(TimeView::Total, 10), Err(LensError::NoData(_))));
    }

    #[test]
    fn collapsed_input_matches_event_walk() {
        let store = CollapsedStack::new();
        store.add("X;Y;Z", 3);
        store.add("X;Y", 2);
        let stats = SelfTotalStats::from_collapsed(&store);
        assert_eq!(stats.get("Y").map(|s| (s.total_samples, s.self_samples)), Some((5, 2)));
    }
}
