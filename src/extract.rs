//! Decoded events to normalized profiled events.

use rayon::prelude::*;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::decoder::{
    ALLOCATION_IN_NEW_TLAB, ALLOCATION_OUTSIDE_TLAB, CPU_LOAD, EXECUTION_SAMPLE, MONITOR_ENTER,
};
use crate::{
    DecodedEvent, EventMeta, EventSource, JsonLinesSource, LensError, LensResult, Payload,
    ProfiledEvent, StackTrace,
};

const RUNNABLE_STATE: &str = "STATE_RUNNABLE";
const UNKNOWN_CLASS: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchKind {
    ExecutionSample,
    Allocation { outside_tlab: bool },
    Lock,
    CpuLoad,
}

impl BatchKind {
    fn of(event_type: &str) -> Option<Self> {
        match event_type {
            EXECUTION_SAMPLE => Some(Self::ExecutionSample),
            ALLOCATION_IN_NEW_TLAB => Some(Self::Allocation {
                outside_tlab: false,
            }),
            ALLOCATION_OUTSIDE_TLAB => Some(Self::Allocation { outside_tlab: true }),
            MONITOR_ENTER => Some(Self::Lock),
            CPU_LOAD => Some(Self::CpuLoad),
            _ => None,
        }
    }
}

/// Events of one input, split by kind.
#[derive(Debug, Clone, Default)]
pub struct ExtractedEvents {
    pub filename: String,
    pub execution_samples: Vec<ProfiledEvent>,
    pub allocations: Vec<ProfiledEvent>,
    pub locks: Vec<ProfiledEvent>,
    pub cpu_usage: Vec<ProfiledEvent>,
    /// Stack-bearing events dropped for lack of a stack trace.
    pub skipped: usize,
}

impl ExtractedEvents {
    pub fn len(&self) -> usize {
        self.execution_samples.len() + self.allocations.len() + self.locks.len() + self.cpu_usage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// True when a sample's thread state means it was on CPU.
pub fn is_consuming_cpu(state: Option<&str>) -> bool {
    state == Some(RUNNABLE_STATE)
}

/// Drains `source` into normalized events. Unknown event types are ignored.
pub fn extract_source(source: &mut dyn EventSource) -> LensResult<ExtractedEvents> {
    let filename: Arc<str> = crate::intern(source.name());
    let mut out = ExtractedEvents {
        filename: filename.to_string(),
        ..ExtractedEvents::default()
    };
    for batch in source.batches()? {
        let Some(kind) = BatchKind::of(&batch.event_type) else {
            tracing::debug!(event_type = %batch.event_type, count = batch.events.len(), "ignoring event type");
            continue;
        };
        let extracted = batch
            .events
            .par_iter()
            .map(|e| extract_event(e, kind, &filename))
            .collect::<Vec<_>>();
        let before = extracted.len();
        let events = extracted.into_iter().flatten().collect::<Vec<_>>();
        out.skipped += before - events.len();
        match kind {
            BatchKind::ExecutionSample => out.execution_samples.extend(events),
            BatchKind::Allocation { .. } => out.allocations.extend(events),
            BatchKind::Lock => out.locks.extend(events),
            BatchKind::CpuLoad => out.cpu_usage.extend(events),
        }
    }
    if out.skipped > 0 {
        tracing::debug!(file = %out.filename, skipped = out.skipped, "skipped events without stack trace");
    }
    Ok(out)
}

/// Opens and extracts one file; errors name the file.
pub fn extract_file(path: &Path) -> LensResult<ExtractedEvents> {
    let started = Instant::now();
    tracing::info!(file = %path.display(), "parsing input");
    let extracted = JsonLinesSource::open(path)
        .and_then(|mut source| extract_source(&mut source))
        .map_err(|err| err.in_file(path))?;
    tracing::info!(
        file = %path.display(),
        events = extracted.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "parsed input"
    );
    Ok(extracted)
}

/// Outcome of a multi-file parse: successes in input order plus failures.
#[derive(Debug, Default)]
pub struct ExtractReport {
    pub files: Vec<ExtractedEvents>,
    pub failures: Vec<(PathBuf, LensError)>,
}

/// Parses files in parallel; one failing file does not affect the others.
pub fn extract_files(paths: &[PathBuf]) -> ExtractReport {
    let results = paths
        .par_iter()
        .map(|p| (p.clone(), extract_file(p)))
        .collect::<Vec<_>>();
    let mut report = ExtractReport::default();
    for (path, result) in results {
        match result {
            Ok(events) => report.files.push(events),
            Err(err) => {
                tracing::error!(file = %path.display(), "failed to parse: {err}");
                report.failures.push((path, err));
            }
        }
    }
    report
}

fn extract_event(event: &DecodedEvent, kind: BatchKind, filename: &Arc<str>) -> Option<ProfiledEvent> {
    let stack = match kind {
        BatchKind::CpuLoad => StackTrace::default(),
        _ => {
            let raw = event.stack_trace.as_ref().filter(|frames| !frames.is_empty())?;
            // Decoders list frames innermost first.
            let frames = raw.iter().rev().map(|f| f.canonicalize()).collect::<Vec<_>>();
            let lines = raw.iter().rev().map(|f| f.line_number()).collect::<Vec<_>>();
            StackTrace::new(frames, lines)
        }
    };
    let millis = event.start_time.unwrap_or(0).div_euclid(1_000_000);
    let meta = EventMeta {
        stack,
        thread: event.thread.as_deref().map(crate::intern),
        correlation_id: event.ecid.unwrap_or(0),
        filename: filename.clone(),
        time: crate::from_epoch_millis(millis)?,
    };
    let payload = match kind {
        BatchKind::ExecutionSample => Payload::ExecutionSample {
            consumes_cpu: is_consuming_cpu(event.state.as_deref()),
            samples: event.samples,
        },
        BatchKind::Allocation { outside_tlab } => Payload::Allocation {
            object_class: crate::intern(event.object_class.as_deref().unwrap_or(UNKNOWN_CLASS)),
            size: event.allocation_size.unwrap_or(0),
            outside_tlab,
        },
        BatchKind::Lock => Payload::Lock {
            monitor_class: crate::intern(event.monitor_class.as_deref().unwrap_or(UNKNOWN_CLASS)),
            duration_nanos: event.duration.unwrap_or(0),
        },
        BatchKind::CpuLoad => Payload::CpuUsage {
            jvm_user: event.jvm_user.unwrap_or(0.0),
            jvm_system: event.jvm_system.unwrap_or(0.0),
            machine_total: event.machine_total.unwrap_or(0.0),
        },
    };
    Some(ProfiledEvent { meta, payload })
}
