//! Weighted multiset of collapsed (semicolon-joined) stacks, plus its text format.

use dashmap::DashMap;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use rayon::prelude::*;
use time::UtcOffset;

use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{LensError, LensResult, LevelSet, ProfiledEvent};

/// Grow-only store; `sum(weights) == total_weight()` once writers are done.
#[derive(Debug, Default)]
pub struct CollapsedStack {
    stacks: DashMap<String, u64>,
    total: AtomicU64,
}

impl CollapsedStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `weight` to `stack`. Counters saturate at `u64::MAX`.
    pub fn add(&self, stack: &str, weight: u64) {
        match self.stacks.get_mut(stack) {
            Some(mut existing) => *existing = existing.saturating_add(weight),
            None => {
                let mut entry = self.stacks.entry(stack.to_string()).or_insert(0);
                *entry = entry.saturating_add(weight);
            }
        }
        let _ = self
            .total
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |t| {
                Some(t.saturating_add(weight))
            });
    }

    /// Like `add`, but `None` when the total would overflow. Single writer only.
    fn try_add(&self, stack: &str, weight: u64) -> Option<()> {
        let total = self.total_weight().checked_add(weight)?;
        self.add(stack, weight);
        self.total.store(total, Ordering::Relaxed);
        Some(())
    }

    pub fn add_single(&self, stack: &str) {
        self.add(stack, 1);
    }

    pub fn is_not_empty(&self) -> bool {
        !self.stacks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    pub fn total_weight(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn weight(&self, stack: &str) -> u64 {
        self.stacks.get(stack).map(|w| *w).unwrap_or(0)
    }

    /// Same total weight and same number of distinct stacks.
    pub fn has_same_shape(&self, other: &CollapsedStack) -> bool {
        self.total_weight() == other.total_weight() && self.len() == other.len()
    }

    /// Snapshot of `(stack, weight)` pairs ordered by stack text.
    pub fn entries(&self) -> Vec<(String, u64)> {
        let mut out = self
            .stacks
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect::<Vec<_>>();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Export lines, each `frame1;...;frameN COUNT`.
    pub fn lines(&self) -> impl Iterator<Item = String> {
        self.entries()
            .into_iter()
            .map(|(stack, weight)| format!("{stack} {weight}"))
    }

    /// Folds events into a new store, one key per event.
    pub fn from_events<F>(
        events: &[&ProfiledEvent],
        levels: &LevelSet,
        local: UtcOffset,
        weight: F,
    ) -> Self
    where
        F: Fn(&ProfiledEvent) -> u64 + Sync,
    {
        let out = Self::new();
        events.par_iter().for_each(|event| {
            out.add(&event.collapsed_key(levels, local), weight(*event));
        });
        out
    }

    pub fn write_to<W: Write>(&self, writer: W) -> LensResult<()> {
        let mut writer = BufWriter::new(writer);
        for line in self.lines() {
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> LensResult<()> {
        let file = create_file(path)?;
        self.write_to(file)
            .map_err(|err| err.in_file(path))
    }

    pub fn save_gzip(&self, path: &Path) -> LensResult<()> {
        let file = create_file(path)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        self.write_to(&mut encoder)
            .map_err(|err| err.in_file(path))?;
        encoder.finish().map_err(|err| LensError::from(err).in_file(path))?;
        Ok(())
    }

    /// Parses the export format. Blank lines are skipped; any other line
    /// without a trailing integer count fails the whole read.
    pub fn read_from<R: Read>(reader: R) -> LensResult<Self> {
        let out = Self::new();
        for (idx, line) in BufReader::new(reader).lines().enumerate() {
            let line = line?;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let (stack, count) = parse_line(line).map_err(|reason| LensError::CollapsedParse {
                line: idx + 1,
                reason,
            })?;
            out.try_add(stack, count)
                .ok_or_else(|| LensError::CollapsedParse {
                    line: idx + 1,
                    reason: format!("total weight overflows at count {count}"),
                })?;
        }
        Ok(out)
    }

    /// Loads a collapsed file, gunzipping when the name ends in `.gz`.
    pub fn load(path: &Path) -> LensResult<Self> {
        let file = std::fs::File::open(path).map_err(|err| LensError::from(err).in_file(path))?;
        let parsed = if is_gzip(path) {
            Self::read_from(GzDecoder::new(file))
        } else {
            Self::read_from(file)
        };
        parsed.map_err(|err| err.in_file(path))
    }
}

pub(crate) fn is_gzip(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.to_ascii_lowercase().ends_with(".gz"))
}

fn create_file(path: &Path) -> LensResult<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::File::create(path).map_err(|err| LensError::from(err).in_file(path))
}

fn parse_line(line: &str) -> Result<(&str, u64), String> {
    let Some((stack, count)) = line.rsplit_once(' ') else {
        return Err(format!("missing count in {line:?}"));
    };
    let count = count
        .parse::<u64>()
        .map_err(|e| format!("invalid count {count:?}: {e}"))?;
    Ok((stack, count))
}
