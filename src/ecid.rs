//! Correlation id spans.

use dashmap::DashMap;
use rayon::prelude::*;
use serde::Serialize;
use time::OffsetDateTime;

use crate::ProfiledEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EcidInfo {
    #[serde(rename = "correlationId")]
    pub correlation_id: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub min: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub max: OffsetDateTime,
    #[serde(rename = "wallSamples")]
    pub wall_samples: u64,
    #[serde(rename = "cpuSamples")]
    pub cpu_samples: u64,
}

impl EcidInfo {
    pub fn new(correlation_id: u64, at: OffsetDateTime) -> Self {
        Self {
            correlation_id,
            min: at,
            max: at,
            wall_samples: 0,
            cpu_samples: 0,
        }
    }

    pub fn new_execution_sample(&mut self, at: OffsetDateTime, consumes_cpu: bool) {
        self.min = self.min.min(at);
        self.max = self.max.max(at);
        self.wall_samples += 1;
        if consumes_cpu {
            self.cpu_samples += 1;
        }
    }

    pub fn time_diff_ms(&self) -> i64 {
        crate::epoch_millis(self.max) - crate::epoch_millis(self.min)
    }

    pub fn row(&self) -> EcidRow<'_> {
        EcidRow {
            info: self,
            time_diff_ms: self.time_diff_ms(),
        }
    }
}

/// Serialized span with its derived width.
#[derive(Debug, Clone, Serialize)]
pub struct EcidRow<'a> {
    #[serde(flatten)]
    pub info: &'a EcidInfo,
    #[serde(rename = "timeDiffMs")]
    pub time_diff_ms: i64,
}

/// Per-id spans over execution samples, widest first. Id 0 is skipped.
pub fn correlation_spans(samples: &[&ProfiledEvent], limit: usize) -> Vec<EcidInfo> {
    let spans = DashMap::<u64, EcidInfo>::new();
    samples.par_iter().for_each(|event| {
        let Some(id) = event.correlation_id() else {
            return;
        };
        let at = event.event_time();
        spans
            .entry(id)
            .or_insert_with(|| EcidInfo::new(id, at))
            .new_execution_sample(at, event.consumes_cpu());
    });
    let mut out = spans.into_iter().map(|(_, info)| info).collect::<Vec<_>>();
    out.sort_by(|a, b| {
        b.time_diff_ms()
            .cmp(&a.time_diff_ms())
            .then_with(|| a.correlation_id.cmp(&b.correlation_id))
    });
    out.truncate(limit);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::tests::sample;

    #[test]
    fn spans_rank_by_width_and_skip_missing_ids() {
        let mut idle = sample(&["a"], None, 2, 4_000);
        idle.payload = crate::Payload::ExecutionSample {
            consumes_cpu: false,
            samples: None,
        };
        let events = vec![
            sample(&["a"], None, 1, 1_000),
            sample(&["a"], None, 1, 1_500),
            sample(&["a"], None, 2, 1_000),
            idle,
            sample(&["a"], None, 0, 0),
        ];
        let refs = events.iter().collect::<Vec<_>>();
        let spans = correlation_spans(&refs, 10);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].correlation_id, 2);
        assert_eq!(spans[0].time_diff_ms(), 3_000);
        assert_eq!(spans[0].wall_samples, 2);
        assert_eq!(spans[0].cpu_samples, 1);
        assert_eq!(spans[1].time_diff_ms(), 500);
        assert_eq!(correlation_spans(&refs, 1).len(), 1);
    }

    #[test]
    fn json_carries_rfc3339_instants() {
        let info = EcidInfo::new(9, crate::from_epoch_millis(0).expect("ms"));
        let json = serde_json::to_value(&info).expect("json");
        assert_eq!(json["min"], "1970-01-01T00:00:00Z");
        assert_eq!(json["correlationId"], 9);
    }

    #[test]
    fn row_adds_span_width() {
        let mut info = EcidInfo::new(4, crate::from_epoch_millis(1_000).expect("ms"));
        info.new_execution_sample(crate::from_epoch_millis(3_500).expect("ms"), true);
        let json = serde_json::to_value(info.row()).expect("json");
        assert_eq!(json["timeDiffMs"], 2_500);
        assert_eq!(json["min"], "1970-01-01T00:00:01Z");
        assert_eq!(json["cpuSamples"], 1);
    }
}
