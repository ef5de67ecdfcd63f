//! Normalized profiling events and their stack-trace presentation.

use serde::{Deserialize, Serialize};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::frame::{FrameType, split_suffix};

/// Thread frame for events recorded without thread info.
pub const UNKNOWN_THREAD: &str = "unknown";

const DATE_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]");
const OFFSET_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[offset_hour sign:mandatory]:[offset_minute]");

/// Frames ordered outermost first, leaf last. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackTrace {
    frames: Arc<[Arc<str>]>,
    lines: Arc<[i32]>,
}

impl StackTrace {
    pub fn new(frames: Vec<Arc<str>>, lines: Vec<i32>) -> Self {
        let mut lines = lines;
        lines.resize(frames.len(), -1);
        Self {
            frames: frames.into(),
            lines: lines.into(),
        }
    }

    pub fn from_frames<I, S>(frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let frames = frames
            .into_iter()
            .map(|f| crate::intern(f.as_ref()))
            .collect::<Vec<_>>();
        let lines = vec![-1; frames.len()];
        Self::new(frames, lines)
    }

    pub fn frames(&self) -> &[Arc<str>] {
        &self.frames
    }

    pub fn lines(&self) -> &[i32] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn contains_text(&self, part: &str) -> bool {
        self.frames.iter().any(|f| f.contains(part))
    }

    pub fn position(&self, method: &str) -> Option<usize> {
        self.frames.iter().position(|f| &**f == method)
    }

    /// Sub-trace over `range`, sharing the interned frames.
    pub fn slice(&self, range: std::ops::Range<usize>) -> Self {
        Self {
            frames: self.frames[range.clone()].to_vec().into(),
            lines: self.lines[range].to_vec().into(),
        }
    }

    fn frames_with_lines(&self) -> impl Iterator<Item = String> + '_ {
        self.frames
            .iter()
            .zip(self.lines.iter())
            .map(|(frame, line)| {
                if *line < 0 {
                    return frame.to_string();
                }
                match split_suffix(frame) {
                    (bare, Some(suffix)) => format!("{bare}:{line}{suffix}"),
                    (bare, None) => format!("{bare}:{line}"),
                }
            })
    }
}

/// Synthetic leading frames that slice a flame graph by another dimension.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AdditionalLevel {
    Ecid,
    Timestamp100Ms,
    Timestamp1S,
    Timestamp10S,
    Filename,
    Thread,
    LineNumbers,
}

impl AdditionalLevel {
    fn bucket_millis(self) -> Option<i64> {
        match self {
            Self::Timestamp100Ms => Some(100),
            Self::Timestamp1S => Some(1_000),
            Self::Timestamp10S => Some(10_000),
            _ => None,
        }
    }
}

impl clap::ValueEnum for AdditionalLevel {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            Self::Ecid,
            Self::Timestamp100Ms,
            Self::Timestamp1S,
            Self::Timestamp10S,
            Self::Filename,
            Self::Thread,
            Self::LineNumbers,
        ]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Ecid => clap::builder::PossibleValue::new("ecid"),
            Self::Timestamp100Ms => clap::builder::PossibleValue::new("timestamp-100ms"),
            Self::Timestamp1S => clap::builder::PossibleValue::new("timestamp-1s"),
            Self::Timestamp10S => clap::builder::PossibleValue::new("timestamp-10s"),
            Self::Filename => clap::builder::PossibleValue::new("filename"),
            Self::Thread => clap::builder::PossibleValue::new("thread"),
            Self::LineNumbers => clap::builder::PossibleValue::new("line-numbers"),
        })
    }
}

pub type LevelSet = BTreeSet<AdditionalLevel>;

#[derive(Debug, Clone, PartialEq)]
pub struct EventMeta {
    pub stack: StackTrace,
    pub thread: Option<Arc<str>>,
    /// Zero means the event carries no correlation id.
    pub correlation_id: u64,
    pub filename: Arc<str>,
    pub time: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    ExecutionSample {
        consumes_cpu: bool,
        samples: Option<u64>,
    },
    Allocation {
        object_class: Arc<str>,
        size: u64,
        outside_tlab: bool,
    },
    Lock {
        monitor_class: Arc<str>,
        duration_nanos: u64,
    },
    CpuUsage {
        jvm_user: f64,
        jvm_system: f64,
        machine_total: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfiledEvent {
    pub meta: EventMeta,
    pub payload: Payload,
}

impl ProfiledEvent {
    /// `None` for CPU-usage events, which carry no stack.
    pub fn stack_trace(&self) -> Option<&StackTrace> {
        match self.payload {
            Payload::CpuUsage { .. } => None,
            _ => Some(&self.meta.stack),
        }
    }

    pub fn event_time(&self) -> OffsetDateTime {
        self.meta.time
    }

    pub fn epoch_millis(&self) -> i64 {
        epoch_millis(self.meta.time)
    }

    pub fn thread_name(&self) -> Option<&str> {
        self.meta.thread.as_deref()
    }

    pub fn correlation_id(&self) -> Option<u64> {
        (self.meta.correlation_id != 0).then_some(self.meta.correlation_id)
    }

    pub fn filename(&self) -> &str {
        &self.meta.filename
    }

    pub fn consumes_cpu(&self) -> bool {
        matches!(
            self.payload,
            Payload::ExecutionSample {
                consumes_cpu: true,
                ..
            }
        )
    }

    /// Leaf-only resource label: the allocated class or the lock's monitor class.
    pub fn terminal_resource(&self) -> Option<Arc<str>> {
        match &self.payload {
            Payload::Allocation {
                object_class,
                outside_tlab,
                ..
            } => {
                let suffix = if *outside_tlab {
                    FrameType::Inlined.suffix()
                } else {
                    FrameType::Native.suffix()
                };
                Some(crate::intern(&format!("{object_class}{suffix}")))
            }
            Payload::Lock { monitor_class, .. } => Some(crate::intern(&format!(
                "{monitor_class}{}",
                FrameType::Inlined.suffix()
            ))),
            _ => None,
        }
    }

    /// Copy of this event over a different stack.
    pub fn with_stack(&self, stack: StackTrace) -> Self {
        Self {
            meta: EventMeta {
                stack,
                ..self.meta.clone()
            },
            payload: self.payload.clone(),
        }
    }

    /// Stack with the enabled context levels prepended and the resource label appended.
    pub fn full_stack_trace(&self, levels: &LevelSet, local: UtcOffset) -> Vec<String> {
        let mut out = Vec::with_capacity(self.meta.stack.len() + 8);
        if levels.contains(&AdditionalLevel::Ecid) {
            out.push(self.meta.correlation_id.to_string());
        }
        for level in [
            AdditionalLevel::Timestamp100Ms,
            AdditionalLevel::Timestamp1S,
            AdditionalLevel::Timestamp10S,
        ] {
            if !levels.contains(&level) {
                continue;
            }
            if let Some(bucket) = level.bucket_millis() {
                out.extend(timestamp_frames(self.epoch_millis(), bucket, local));
            }
        }
        if levels.contains(&AdditionalLevel::Filename) {
            out.push(format!("{}{}", self.meta.filename, FrameType::Inlined.suffix()));
        }
        if levels.contains(&AdditionalLevel::Thread) {
            out.push(self.thread_name().unwrap_or(UNKNOWN_THREAD).to_string());
        }
        if levels.contains(&AdditionalLevel::LineNumbers) {
            out.extend(self.meta.stack.frames_with_lines());
        } else {
            out.extend(self.meta.stack.frames().iter().map(|f| f.to_string()));
        }
        if let Some(resource) = self.terminal_resource() {
            out.push(resource.to_string());
        }
        out
    }

    pub fn collapsed_key(&self, levels: &LevelSet, local: UtcOffset) -> String {
        self.full_stack_trace(levels, local).join(";")
    }
}

pub fn epoch_millis(time: OffsetDateTime) -> i64 {
    (time.unix_timestamp_nanos() / 1_000_000) as i64
}

pub fn from_epoch_millis(millis: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
}

fn timestamp_frames(epoch_ms: i64, bucket_ms: i64, local: UtcOffset) -> [String; 2] {
    let bucket = epoch_ms.div_euclid(bucket_ms);
    let start = from_epoch_millis(bucket * bucket_ms).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    let utc = start.format(DATE_FORMAT).unwrap_or_default();
    let local_time = start.to_offset(local);
    let local_date = local_time.format(DATE_FORMAT).unwrap_or_default();
    let zone = local.format(OFFSET_FORMAT).unwrap_or_default();
    let native = FrameType::Native.suffix();
    [
        format!("{bucket:013}_{utc} UTC{native}"),
        format!("{bucket:013}_{local_date} {zone}{native}"),
    ]
}
