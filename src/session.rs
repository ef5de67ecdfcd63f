//! Parsed profiling sessions and the process-local session store.

use dashmap::DashMap;
use serde::Serialize;
use time::{OffsetDateTime, UtcOffset};
use uuid::Uuid;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::{
    CollapsedStack, CpuLoadKind, CpuLoadPoint, Direction, EcidInfo, EventFilter, ExtractedEvents,
    FilterConfig, LensError, LensResult, LevelSet, Payload, ProfiledEvent, SelfTotalStats,
    SessionBounds,
};

/// What a collapsed profile or a method table is weighted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProfileKind {
    #[default]
    Wall,
    Cpu,
    AllocCount,
    AllocSize,
    LockCount,
    LockTime,
    CpuLoad(CpuLoadKind),
}

impl ProfileKind {
    pub const ALL: [Self; 11] = [
        Self::Wall,
        Self::Cpu,
        Self::AllocCount,
        Self::AllocSize,
        Self::LockCount,
        Self::LockTime,
        Self::CpuLoad(CpuLoadKind::JvmUser),
        Self::CpuLoad(CpuLoadKind::JvmSystem),
        Self::CpuLoad(CpuLoadKind::JvmTotal),
        Self::CpuLoad(CpuLoadKind::MachineTotal),
        Self::CpuLoad(CpuLoadKind::MachineMinusJvm),
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Wall => "wall",
            Self::Cpu => "cpu",
            Self::AllocCount => "alloc-count",
            Self::AllocSize => "alloc-size",
            Self::LockCount => "lock-count",
            Self::LockTime => "lock-time",
            Self::CpuLoad(CpuLoadKind::JvmUser) => "cpu-load-jvm-user",
            Self::CpuLoad(CpuLoadKind::JvmSystem) => "cpu-load-jvm-system",
            Self::CpuLoad(CpuLoadKind::JvmTotal) => "cpu-load-jvm-total",
            Self::CpuLoad(CpuLoadKind::MachineTotal) => "cpu-load-machine-total",
            Self::CpuLoad(CpuLoadKind::MachineMinusJvm) => "cpu-load-machine-minus-jvm",
        }
    }

    /// Weight one event contributes under this kind.
    pub fn weight(self, event: &ProfiledEvent) -> u64 {
        match (self, &event.payload) {
            (Self::Wall | Self::Cpu, Payload::ExecutionSample { samples, .. }) => samples.unwrap_or(1),
            (Self::AllocSize, Payload::Allocation { size, .. }) => *size,
            (Self::LockTime, Payload::Lock { duration_nanos, .. }) => *duration_nanos,
            _ => 1,
        }
    }
}

impl Serialize for ProfileKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl clap::ValueEnum for ProfileKind {
    fn value_variants<'a>() -> &'a [Self] {
        &Self::ALL
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(self.name()))
    }
}

/// One parsed file set. Immutable once built; derived views allocate.
#[derive(Debug)]
pub struct ProfileSession {
    pub id: Uuid,
    /// Session this one was trimmed from.
    pub parent: Option<Uuid>,
    pub filenames: Vec<String>,
    pub parse_start: OffsetDateTime,
    pub parse_millis: u64,
    bounds: Option<SessionBounds>,
    execution_samples: Vec<ProfiledEvent>,
    allocations: Vec<ProfiledEvent>,
    locks: Vec<ProfiledEvent>,
    cpu_usage: Vec<ProfiledEvent>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: Uuid,
    pub parent: Option<Uuid>,
    pub filenames: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub parse_start: OffsetDateTime,
    pub parse_millis: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub min_event: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub max_event: Option<OffsetDateTime>,
    pub execution_samples: usize,
    pub allocations: usize,
    pub locks: usize,
    pub cpu_load_samples: usize,
}

impl ProfileSession {
    pub fn from_extracted(files: Vec<ExtractedEvents>, parse_start: OffsetDateTime, parse_millis: u64) -> Self {
        let mut session = Self {
            id: Uuid::new_v4(),
            parent: None,
            filenames: Vec::with_capacity(files.len()),
            parse_start,
            parse_millis,
            bounds: None,
            execution_samples: Vec::new(),
            allocations: Vec::new(),
            locks: Vec::new(),
            cpu_usage: Vec::new(),
        };
        for file in files {
            session.filenames.push(file.filename);
            session.execution_samples.extend(file.execution_samples);
            session.allocations.extend(file.allocations);
            session.locks.extend(file.locks);
            session.cpu_usage.extend(file.cpu_usage);
        }
        session.bounds = session.compute_bounds();
        session
    }

    /// Min/max over stack-bearing events; CPU-load samples do not widen it.
    fn compute_bounds(&self) -> Option<SessionBounds> {
        self.execution_samples
            .iter()
            .chain(&self.allocations)
            .chain(&self.locks)
            .map(ProfiledEvent::event_time)
            .fold(None, |acc, t| match acc {
                None => Some(SessionBounds { min: t, max: t }),
                Some(b) => Some(SessionBounds {
                    min: b.min.min(t),
                    max: b.max.max(t),
                }),
            })
    }

    pub fn bounds(&self) -> Option<SessionBounds> {
        self.bounds
    }

    pub fn events(&self, kind: ProfileKind) -> &[ProfiledEvent] {
        match kind {
            ProfileKind::Wall | ProfileKind::Cpu => &self.execution_samples,
            ProfileKind::AllocCount | ProfileKind::AllocSize => &self.allocations,
            ProfileKind::LockCount | ProfileKind::LockTime => &self.locks,
            ProfileKind::CpuLoad(_) => &self.cpu_usage,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            parent: self.parent,
            filenames: self.filenames.clone(),
            parse_start: self.parse_start,
            parse_millis: self.parse_millis,
            min_event: self.bounds.map(|b| b.min),
            max_event: self.bounds.map(|b| b.max),
            execution_samples: self.execution_samples.len(),
            allocations: self.allocations.len(),
            locks: self.locks.len(),
            cpu_load_samples: self.cpu_usage.len(),
        }
    }

    /// Events of `kind` that pass `filters`. The `cpu` kind always keeps
    /// only CPU-consuming samples.
    pub fn select(
        &self,
        kind: ProfileKind,
        filters: &FilterConfig,
        local: UtcOffset,
    ) -> LensResult<Vec<&ProfiledEvent>> {
        let mut pipeline = filters.pipeline(self.bounds, local)?;
        if kind == ProfileKind::Cpu && !filters.consume_cpu_on {
            pipeline.push(EventFilter::ConsumesCpu);
        }
        Ok(pipeline.apply(self.events(kind)))
    }

    pub fn collapsed(
        &self,
        kind: ProfileKind,
        levels: &LevelSet,
        filters: &FilterConfig,
        local: UtcOffset,
    ) -> LensResult<CollapsedStack> {
        let events = self.select(kind, filters, local)?;
        let started = Instant::now();
        let stacks = match kind {
            ProfileKind::CpuLoad(load) => {
                let per_file = self.filenames.len() > 1
                    || levels.contains(&crate::AdditionalLevel::Filename);
                crate::cpu_load_collapsed(&events, load, per_file)
            }
            _ => CollapsedStack::from_events(&events, levels, local, |e| kind.weight(e)),
        };
        tracing::debug!(
            session = %self.id,
            kind = kind.name(),
            events = events.len(),
            stacks = stacks.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "collapsed profile"
        );
        Ok(stacks)
    }

    pub fn method_stats(
        &self,
        kind: ProfileKind,
        filters: &FilterConfig,
        local: UtcOffset,
    ) -> LensResult<SelfTotalStats> {
        match kind {
            ProfileKind::CpuLoad(_) => {
                let stacks = self.collapsed(kind, &LevelSet::new(), filters, local)?;
                Ok(SelfTotalStats::from_collapsed(&stacks))
            }
            _ => {
                let events = self.select(kind, filters, local)?;
                Ok(SelfTotalStats::from_events(&events, |e| kind.weight(e)))
            }
        }
    }

    /// Correlation-id spans over the filtered execution samples.
    pub fn correlation_spans(
        &self,
        filters: &FilterConfig,
        local: UtcOffset,
        limit: usize,
    ) -> LensResult<Vec<EcidInfo>> {
        let events = self.select(ProfileKind::Wall, filters, local)?;
        Ok(crate::correlation_spans(&events, limit))
    }

    pub fn cpu_load_series(
        &self,
        filters: &FilterConfig,
        local: UtcOffset,
    ) -> LensResult<BTreeMap<String, Vec<CpuLoadPoint>>> {
        let kind = ProfileKind::CpuLoad(CpuLoadKind::JvmTotal);
        let events = self.select(kind, filters, local)?;
        Ok(crate::cpu_load_series(&events))
    }

    /// New session holding only stacks through `method`. Parent bounds are
    /// kept so relative windows resolve the same way on the child.
    pub fn trim_to_method(&self, method: &str, direction: Direction) -> Self {
        let started = Instant::now();
        let child = Self {
            id: Uuid::new_v4(),
            parent: Some(self.id),
            filenames: self.filenames.clone(),
            parse_start: OffsetDateTime::now_utc(),
            parse_millis: 0,
            bounds: self.bounds,
            execution_samples: crate::trim_events(&self.execution_samples, method, direction),
            allocations: crate::trim_events(&self.allocations, method, direction),
            locks: crate::trim_events(&self.locks, method, direction),
            cpu_usage: Vec::new(),
        };
        Self {
            parse_millis: started.elapsed().as_millis() as u64,
            ..child
        }
    }
}

/// Result of parsing a file set: the new session plus any files that failed.
#[derive(Debug)]
pub struct ParseOutcome {
    pub session: Arc<ProfileSession>,
    pub failures: Vec<(PathBuf, LensError)>,
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<Uuid, Arc<ProfileSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `paths` into a new session. Fails only when no file parsed.
    pub fn parse(&self, paths: &[PathBuf]) -> LensResult<ParseOutcome> {
        if paths.is_empty() {
            return Err(LensError::InvalidArgument("no input files".to_string()));
        }
        let parse_start = OffsetDateTime::now_utc();
        let started = Instant::now();
        let mut report = crate::extract_files(paths);
        if report.files.is_empty() && !report.failures.is_empty() {
            let (_, err) = report.failures.remove(0);
            return Err(err);
        }
        let session = ProfileSession::from_extracted(
            report.files,
            parse_start,
            started.elapsed().as_millis() as u64,
        );
        tracing::info!(
            session = %session.id,
            files = session.filenames.len(),
            failed = report.failures.len(),
            elapsed_ms = session.parse_millis,
            "session parsed"
        );
        Ok(ParseOutcome {
            session: self.add(session),
            failures: report.failures,
        })
    }

    pub fn add(&self, session: ProfileSession) -> Arc<ProfileSession> {
        let session = Arc::new(session);
        self.sessions.insert(session.id, session.clone());
        session
    }

    /// All sessions, oldest parse first.
    pub fn list(&self) -> Vec<Arc<ProfileSession>> {
        let mut out = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect::<Vec<_>>();
        out.sort_by(|a, b| a.parse_start.cmp(&b.parse_start).then_with(|| a.id.cmp(&b.id)));
        out
    }

    pub fn get(&self, id: Uuid) -> LensResult<Arc<ProfileSession>> {
        self.sessions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(LensError::UnknownSession(id))
    }

    /// Drops the store's handle; readers holding the session keep it alive.
    pub fn remove(&self, id: Uuid) -> LensResult<Arc<ProfileSession>> {
        self.sessions
            .remove(&id)
            .map(|(_, session)| session)
            .ok_or(LensError::UnknownSession(id))
    }

    pub fn trim_to_method(
        &self,
        id: Uuid,
        method: &str,
        direction: Direction,
    ) -> LensResult<Arc<ProfileSession>> {
        let parent = self.get(id)?;
        Ok(self.add(parent.trim_to_method(method, direction)))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::tests::sample;
    use crate::{AdditionalLevel, TimeView};

    fn alloc(frames: &[&str], size: u64, millis: i64) -> ProfiledEvent {
        let mut event = sample(frames, None, 0, millis);
        event.payload = Payload::Allocation {
            object_class: crate::intern("byte[]"),
            size,
            outside_tlab: false,
        };
        event
    }

    fn idle(frames: &[&str], millis: i64) -> ProfiledEvent {
        let mut event = sample(frames, Some("io"), 0, millis);
        event.payload = Payload::ExecutionSample {
            consumes_cpu: false,
            samples: None,
        };
        event
    }

    fn session() -> ProfileSession {
        let mut load = sample(&[], None, 0, 999_000);
        load.payload = Payload::CpuUsage {
            jvm_user: 0.1,
            jvm_system: 0.05,
            machine_total: 0.5,
        };
        let file = ExtractedEvents {
            filename: "app.jfr".to_string(),
            execution_samples: vec![
                sample(&["a", "b", "c"], Some("main"), 7, 1_000),
                sample(&["a", "b", "c"], Some("main"), 7, 2_000),
                idle(&["a", "b", "d"], 3_000),
            ],
            allocations: vec![alloc(&["a", "x"], 64, 4_000), alloc(&["a", "x"], 36, 5_000)],
            locks: Vec::new(),
            cpu_usage: vec![load],
            skipped: 0,
        };
        ProfileSession::from_extracted(
            vec![file],
            OffsetDateTime::now_utc() - time::Duration::seconds(1),
            1,
        )
    }

    #[test]
    fn bounds_ignore_cpu_load_samples() {
        let s = session();
        let bounds = s.bounds().expect("bounds");
        assert_eq!(crate::epoch_millis(bounds.min), 1_000);
        assert_eq!(crate::epoch_millis(bounds.max), 5_000);
    }

    #[test]
    fn kinds_weight_and_select_events() {
        let s = session();
        let none = FilterConfig::default();
        let levels = LevelSet::new();

        let wall = s.collapsed(ProfileKind::Wall, &levels, &none, UtcOffset::UTC).expect("wall");
        assert_eq!(wall.total_weight(), 3);
        let cpu = s.collapsed(ProfileKind::Cpu, &levels, &none, UtcOffset::UTC).expect("cpu");
        assert_eq!(cpu.total_weight(), 2);
        assert!(!cpu.has_same_shape(&wall));

        let size = s.collapsed(ProfileKind::AllocSize, &levels, &none, UtcOffset::UTC).expect("size");
        assert_eq!(size.weight("a;x;byte[]_[k]"), 100);

        let load = s
            .collapsed(ProfileKind::CpuLoad(CpuLoadKind::JvmTotal), &levels, &none, UtcOffset::UTC)
            .expect("load");
        assert_eq!(load.total_weight(), 1);
    }

    #[test]
    fn method_stats_and_spans_follow_filters() {
        let s = session();
        let filters = FilterConfig {
            thread_filter_on: true,
            thread_filter: "MAIN".to_string(),
            ..FilterConfig::default()
        };
        let stats = s.method_stats(ProfileKind::Wall, &filters, UtcOffset::UTC).expect("stats");
        assert_eq!(stats.total(), 2);
        let table = stats.table(TimeView::SelfTime, 10).expect("table");
        assert_eq!(&*table.rows[0].method_name, "c");

        let spans = s.correlation_spans(&FilterConfig::default(), UtcOffset::UTC, 10).expect("spans");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].time_diff_ms(), 1_000);
    }

    #[test]
    fn store_lists_trims_and_removes() {
        let store = SessionStore::new();
        let parent = store.add(session());
        let child = store
            .trim_to_method(parent.id, "b", Direction::Up)
            .expect("trim");
        assert_eq!(child.parent, Some(parent.id));
        assert_eq!(child.events(ProfileKind::Wall).len(), 3);
        assert!(child.events(ProfileKind::AllocCount).is_empty());
        assert!(child.events(ProfileKind::CpuLoad(CpuLoadKind::JvmUser)).is_empty());
        assert_eq!(child.bounds(), parent.bounds());

        let listed = store.list().iter().map(|s| s.id).collect::<Vec<_>>();
        assert_eq!(listed, vec![parent.id, child.id]);

        store.remove(parent.id).expect("remove");
        assert!(matches!(store.get(parent.id), Err(LensError::UnknownSession(_))));
        assert_eq!(store.get(child.id).expect("child").events(ProfileKind::Wall).len(), 3);
        assert_eq!(parent.events(ProfileKind::Wall).len(), 3);
    }

    #[test]
    fn parse_reports_partial_failures() {
        let dir = std::env::temp_dir().join(format!("jfrlens-session-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("dir");
        let good = dir.join("good.jsonl");
        std::fs::write(
            &good,
            concat!(
                r#"{"type":"jdk.ExecutionSample","startTime":2000000,"thread":"main","state":"STATE_RUNNABLE","stackTrace":[{"method":"leaf"},{"method":"root"}]}"#,
                "\n",
                r#"{"type":"jdk.CPULoad","startTime":1000000,"jvmUser":0.2,"jvmSystem":0.1,"machineTotal":0.4}"#,
                "\n"
            ),
        )
        .expect("write");
        let store = SessionStore::new();
        let outcome = store
            .parse(&[good.clone(), dir.join("missing.jsonl")])
            .expect("parse");
        assert_eq!(outcome.failures.len(), 1);
        let s = outcome.session;
        assert_eq!(s.filenames.len(), 1);
        let levels = LevelSet::from([AdditionalLevel::Thread]);
        let wall = s
            .collapsed(ProfileKind::Wall, &levels, &FilterConfig::default(), UtcOffset::UTC)
            .expect("wall");
        assert_eq!(wall.weight("main;root_[j];leaf_[j]"), 1);
        let series = s.cpu_load_series(&FilterConfig::default(), UtcOffset::UTC).expect("series");
        assert_eq!(series.values().next().map(Vec::len), Some(1));

        let all_bad = store.parse(&[dir.join("missing.jsonl")]);
        assert!(all_bad.is_err());
    }
}
