//! Event filter predicates and the viewer filter configuration.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use time::UtcOffset;

use crate::{
    LensError, LensResult, Payload, ProfiledEvent, SessionBounds, TimeWindow, WindowPolicy,
    parse_end_date,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    /// Case-insensitive exact match. Events without thread info pass.
    ThreadName(String),
    /// Exact match. Events without a correlation id are excluded.
    CorrelationId(u64),
    TimeWindow(TimeWindow),
    StackContains(String),
    ConsumesCpu,
}

impl EventFilter {
    pub fn includes(&self, event: &ProfiledEvent) -> bool {
        let cpu_usage = matches!(event.payload, Payload::CpuUsage { .. });
        match self {
            Self::ThreadName(name) => event
                .thread_name()
                .is_none_or(|thread| thread.eq_ignore_ascii_case(name)),
            Self::CorrelationId(_) if cpu_usage => true,
            Self::CorrelationId(id) => event.correlation_id() == Some(*id),
            Self::TimeWindow(window) => window.contains(event.event_time()),
            Self::StackContains(part) => event
                .stack_trace()
                .is_none_or(|stack| stack.contains_text(part)),
            Self::ConsumesCpu => match event.payload {
                Payload::ExecutionSample { consumes_cpu, .. } => consumes_cpu,
                _ => true,
            },
        }
    }
}

/// Logical AND of independent filters.
#[derive(Debug, Clone, Default)]
pub struct FilterPipeline {
    filters: Vec<EventFilter>,
}

impl FilterPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter: EventFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn push(&mut self, filter: EventFilter) {
        self.filters.push(filter);
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn includes(&self, event: &ProfiledEvent) -> bool {
        self.filters.iter().all(|f| f.includes(event))
    }

    /// Filters in parallel, preserving input order.
    pub fn apply<'a>(&self, events: &'a [ProfiledEvent]) -> Vec<&'a ProfiledEvent> {
        events.par_iter().filter(|e| self.includes(e)).collect()
    }
}

/// On/off flags paired with typed parameters, as submitted by a viewer request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct FilterConfig {
    pub thread_filter_on: bool,
    pub thread_filter: String,

    pub ecid_filter_on: bool,
    pub ecid_filter: u64,

    pub stack_filter_on: bool,
    pub stack_filter: String,

    pub consume_cpu_on: bool,

    pub end_duration_on: bool,
    pub end_date: String,
    pub end_date_format: String,
    /// Accepted for compatibility; month and period names are parsed in English.
    pub end_date_locale: Option<String>,
    pub duration_ms: u64,

    pub warmup_cooldown_on: bool,
    pub warmup_secs: u64,
    pub cooldown_secs: u64,

    pub warmup_duration_on: bool,
    pub wd_warmup_secs: u64,
    pub wd_duration_secs: u64,

    pub start_end_timestamp_on: bool,
    pub start_ts: i64,
    pub end_ts: i64,
}

impl FilterConfig {
    fn active_windows(&self) -> Vec<&'static str> {
        [
            (self.end_duration_on, "end_duration"),
            (self.warmup_cooldown_on, "warmup_cooldown"),
            (self.warmup_duration_on, "warmup_duration"),
            (self.start_end_timestamp_on, "start_end_timestamp"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect()
    }

    /// Rejects requests with more than one windowing policy switched on.
    pub fn validate(&self) -> LensResult<()> {
        let active = self.active_windows();
        if active.len() > 1 {
            return Err(LensError::InvalidArgument(format!(
                "only one time window policy may be active, got {}",
                active.join(", ")
            )));
        }
        if self.end_duration_on && self.end_date_format.trim().is_empty() {
            return Err(LensError::InvalidArgument(
                "end_duration requires end_date_format".to_string(),
            ));
        }
        Ok(())
    }

    /// Highest-priority active windowing policy; lower-priority ones are ignored.
    pub fn window_policy(&self, offset: UtcOffset) -> LensResult<Option<WindowPolicy>> {
        let active = self.active_windows();
        if active.len() > 1 {
            tracing::warn!(
                "multiple time window policies set, using {} and ignoring {}",
                active[0],
                active[1..].join(", ")
            );
        }
        let policy = if self.end_duration_on {
            Some(WindowPolicy::EndDuration {
                end: parse_end_date(&self.end_date, &self.end_date_format, offset)?,
                duration_ms: self.duration_ms,
            })
        } else if self.warmup_cooldown_on {
            Some(WindowPolicy::WarmupCooldown {
                warmup_secs: self.warmup_secs,
                cooldown_secs: self.cooldown_secs,
            })
        } else if self.warmup_duration_on {
            Some(WindowPolicy::WarmupDuration {
                warmup_secs: self.wd_warmup_secs,
                duration_secs: self.wd_duration_secs,
            })
        } else if self.start_end_timestamp_on {
            Some(WindowPolicy::Timestamps {
                start_secs: self.start_ts,
                end_secs: self.end_ts,
            })
        } else {
            None
        };
        Ok(policy)
    }

    /// Builds the pipeline; `bounds` feeds warmup-relative windows.
    pub fn pipeline(
        &self,
        bounds: Option<SessionBounds>,
        offset: UtcOffset,
    ) -> LensResult<FilterPipeline> {
        let mut pipeline = FilterPipeline::new();
        if self.consume_cpu_on {
            pipeline.push(EventFilter::ConsumesCpu);
        }
        if self.thread_filter_on {
            pipeline.push(EventFilter::ThreadName(self.thread_filter.clone()));
        }
        if self.ecid_filter_on {
            pipeline.push(EventFilter::CorrelationId(self.ecid_filter));
        }
        if self.stack_filter_on {
            pipeline.push(EventFilter::StackContains(self.stack_filter.clone()));
        }
        if let Some(policy) = self.window_policy(offset)? {
            let window = policy.resolve(bounds);
            tracing::debug!(
                policy = policy.name(),
                start = %window.start,
                end = %window.end,
                "resolved time window"
            );
            pipeline.push(EventFilter::TimeWindow(window));
        }
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::tests::sample;

    #[test]
    fn thread_filter_fails_open_and_ignores_case() {
        let filter = EventFilter::ThreadName("Main".to_string());
        assert!(filter.includes(&sample(&["a"], Some("MAIN"), 0, 0)));
        assert!(!filter.includes(&sample(&["a"], Some("worker"), 0, 0)));
        assert!(filter.includes(&sample(&["a"], None, 0, 0)));
    }

    #[test]
    fn correlation_filter_fails_closed() {
        let filter = EventFilter::CorrelationId(7);
        assert!(filter.includes(&sample(&["a"], None, 7, 0)));
        assert!(!filter.includes(&sample(&["a"], None, 8, 0)));
        assert!(!filter.includes(&sample(&["a"], None, 0, 0)));
    }

    #[test]
    fn stack_filter_matches_any_frame_substring() {
        let filter = EventFilter::StackContains("Service.handle".to_string());
        assert!(filter.includes(&sample(&["main_[j]", "app/Service.handle_[i]"], None, 0, 0)));
        assert!(!filter.includes(&sample(&["main_[j]"], None, 0, 0)));
    }

    #[test]
    fn pipeline_is_conjunction() {
        let events = vec![
            sample(&["a"], Some("main"), 1, 1_000),
            sample(&["a"], Some("main"), 2, 1_000),
            sample(&["a"], Some("other"), 1, 1_000),
            sample(&["a"], Some("main"), 1, 9_000),
        ];
        let window = TimeWindow::new(
            crate::from_epoch_millis(0).expect("ms"),
            crate::from_epoch_millis(5_000).expect("ms"),
        );
        let pipeline = FilterPipeline::new()
            .with(EventFilter::ThreadName("main".to_string()))
            .with(EventFilter::CorrelationId(1))
            .with(EventFilter::TimeWindow(window));
        let kept = pipeline.apply(&events);
        assert_eq!(kept.len(), 1);
        assert!(std::ptr::eq(kept[0], &events[0]));
        assert_eq!(FilterPipeline::new().apply(&events).len(), 4);
    }

    #[test]
    fn validate_rejects_multiple_window_policies() {
        let config = FilterConfig {
            warmup_cooldown_on: true,
            start_end_timestamp_on: true,
            ..FilterConfig::default()
        };
        assert!(matches!(config.validate(), Err(LensError::InvalidArgument(_))));
        let policy = config.window_policy(UtcOffset::UTC).expect("policy");
        assert!(matches!(policy, Some(WindowPolicy::WarmupCooldown { .. })));
    }

    #[test]
    fn pipeline_resolves_warmup_against_bounds() {
        let config = FilterConfig {
            warmup_cooldown_on: true,
            warmup_secs: 5,
            cooldown_secs: 5,
            ..FilterConfig::default()
        };
        let bounds = SessionBounds {
            min: crate::from_epoch_millis(0).expect("ms"),
            max: crate::from_epoch_millis(100_000).expect("ms"),
        };
        let pipeline = config.pipeline(Some(bounds), UtcOffset::UTC).expect("pipeline");
        assert!(!pipeline.includes(&sample(&["a"], None, 0, 3_000)));
        assert!(pipeline.includes(&sample(&["a"], None, 0, 50_000)));
    }
}
