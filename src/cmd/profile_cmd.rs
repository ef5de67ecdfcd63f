//! Analysis commands (`jfrlens collapse|methods|ecid|trim|compare|cpu|info`).

use clap::{Args, Subcommand};
use serde::Serialize;
use time::UtcOffset;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{
    AdditionalLevel, CollapsedStack, CompareInfo, CompareMetric, CompareOptions, Config, Direction,
    EcidInfo, FilterConfig, LensError, LensResult, LevelSet, ProfileKind, ProfileSession,
    SessionStore, TimeView, resolve_inputs,
};

const INPUTS_HELP: &str = "Recording files (JSON lines, optionally .gz or .zip) or glob patterns.";
const DEFAULT_END_DATE_FORMAT: &str = "yyyy-MM-dd HH:mm:ss";

#[derive(Debug, Subcommand)]
pub enum ProfileCommand {
    /// Export a collapsed-stack (flame graph) profile.
    Collapse {
        #[arg(value_name = "INPUT", required = true, help = INPUTS_HELP)]
        inputs: Vec<String>,
        #[arg(long, default_value = "wall")]
        kind: ProfileKind,
        /// Synthetic leading frames; repeatable.
        #[arg(long = "level", value_name = "LEVEL")]
        levels: Vec<AdditionalLevel>,
        #[command(flatten)]
        filters: FilterArgs,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        gzip: bool,
    },
    /// Rank methods by total or self time.
    Methods {
        #[arg(value_name = "INPUT", required = true, help = INPUTS_HELP)]
        inputs: Vec<String>,
        #[arg(long, default_value = "wall")]
        kind: ProfileKind,
        #[arg(long, default_value = "total")]
        view: TimeView,
        #[arg(long)]
        limit: Option<usize>,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Rank correlation ids by the time span they cover.
    Ecid {
        #[arg(value_name = "INPUT", required = true, help = INPUTS_HELP)]
        inputs: Vec<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Keep only stacks through a method and export the trimmed profile.
    Trim {
        #[arg(value_name = "INPUT", required = true, help = INPUTS_HELP)]
        inputs: Vec<String>,
        #[arg(long)]
        method: String,
        #[arg(long, default_value = "up")]
        direction: Direction,
        #[arg(long, default_value = "wall")]
        kind: ProfileKind,
        #[arg(long = "level", value_name = "LEVEL")]
        levels: Vec<AdditionalLevel>,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        gzip: bool,
    },
    /// Compare two collapsed-stack exports method by method.
    Compare {
        #[arg(value_name = "FILE1")]
        first: PathBuf,
        #[arg(value_name = "FILE2")]
        second: PathBuf,
        /// Minimum share of a file's total (0.01 = 1%); 0 keeps every method.
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long, default_value = "self")]
        metric: CompareMetric,
    },
    /// CPU-load series per input file.
    Cpu {
        #[arg(value_name = "INPUT", required = true, help = INPUTS_HELP)]
        inputs: Vec<String>,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Parse inputs and summarize the resulting session.
    Info {
        #[arg(value_name = "INPUT", required = true, help = INPUTS_HELP)]
        inputs: Vec<String>,
    },
}

/// Event filters and the time window, as command-line flags.
#[derive(Debug, Clone, Default, Args)]
pub struct FilterArgs {
    /// TOML file with a full filter configuration; flags below override it.
    #[arg(long = "filters", value_name = "FILE")]
    pub filters_file: Option<PathBuf>,
    /// Keep events of this thread (case-insensitive).
    #[arg(long)]
    pub thread: Option<String>,
    /// Keep events with this correlation id.
    #[arg(long)]
    pub ecid: Option<u64>,
    /// Keep events whose stack has a frame containing this text.
    #[arg(long = "stack-contains")]
    pub stack_contains: Option<String>,
    /// Keep only samples that were running on CPU.
    #[arg(long = "consumes-cpu")]
    pub consumes_cpu: bool,
    /// Window end; the window starts `--duration-ms` earlier.
    #[arg(long = "end-date", requires = "duration_ms")]
    pub end_date: Option<String>,
    #[arg(long = "end-date-format")]
    pub end_date_format: Option<String>,
    #[arg(long = "duration-ms")]
    pub duration_ms: Option<u64>,
    /// Seconds dropped from the start of the session.
    #[arg(long)]
    pub warmup: Option<u64>,
    /// Seconds dropped from the end of the session.
    #[arg(long)]
    pub cooldown: Option<u64>,
    /// Seconds skipped before a fixed-length window.
    #[arg(long = "window-warmup", requires = "window_duration")]
    pub window_warmup: Option<u64>,
    #[arg(long = "window-duration")]
    pub window_duration: Option<u64>,
    /// Window start in epoch seconds.
    #[arg(long = "start-ts", requires = "end_ts")]
    pub start_ts: Option<i64>,
    #[arg(long = "end-ts", requires = "start_ts")]
    pub end_ts: Option<i64>,
}

impl FilterArgs {
    pub fn to_filter_config(&self) -> LensResult<FilterConfig> {
        let mut cfg = match &self.filters_file {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|err| LensError::from(err).in_file(path))?;
                toml::from_str::<FilterConfig>(&text)
                    .map_err(|err| LensError::from(err).in_file(path))?
            }
            None => FilterConfig::default(),
        };
        if let Some(thread) = &self.thread {
            cfg.thread_filter_on = true;
            cfg.thread_filter = thread.clone();
        }
        if let Some(ecid) = self.ecid {
            cfg.ecid_filter_on = true;
            cfg.ecid_filter = ecid;
        }
        if let Some(text) = &self.stack_contains {
            cfg.stack_filter_on = true;
            cfg.stack_filter = text.clone();
        }
        cfg.consume_cpu_on |= self.consumes_cpu;
        if let Some(end) = &self.end_date {
            cfg.end_duration_on = true;
            cfg.end_date = end.clone();
            cfg.duration_ms = self.duration_ms.unwrap_or(0);
        }
        if let Some(format) = &self.end_date_format {
            cfg.end_date_format = format.clone();
        }
        if cfg.end_duration_on && cfg.end_date_format.is_empty() {
            cfg.end_date_format = DEFAULT_END_DATE_FORMAT.to_string();
        }
        if self.warmup.is_some() || self.cooldown.is_some() {
            cfg.warmup_cooldown_on = true;
            cfg.warmup_secs = self.warmup.unwrap_or(0);
            cfg.cooldown_secs = self.cooldown.unwrap_or(0);
        }
        if let Some(duration) = self.window_duration {
            cfg.warmup_duration_on = true;
            cfg.wd_warmup_secs = self.window_warmup.unwrap_or(0);
            cfg.wd_duration_secs = duration;
        }
        if let (Some(start), Some(end)) = (self.start_ts, self.end_ts) {
            cfg.start_end_timestamp_on = true;
            cfg.start_ts = start;
            cfg.end_ts = end;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

pub fn profile_command(
    config: &Config,
    store: &SessionStore,
    command: &ProfileCommand,
) -> LensResult<serde_json::Value> {
    let local = config.local_offset();
    match command {
        ProfileCommand::Collapse {
            inputs,
            kind,
            levels,
            filters,
            out,
            gzip,
        } => {
            let filters = filters.to_filter_config()?;
            let (session, failed) = open_session(store, inputs)?;
            let levels = levels.iter().copied().collect::<LevelSet>();
            let stacks = session.collapsed(*kind, &levels, &filters, local)?;
            let same_as_wall = if *kind == ProfileKind::Cpu {
                let wall = session.collapsed(ProfileKind::Wall, &levels, &filters, local)?;
                stacks.has_same_shape(&wall)
            } else {
                false
            };
            let path = output_path(config, out.as_deref(), &session, *kind, *gzip);
            save_stacks(&stacks, &path, *gzip)?;
            Ok(serde_json::json!({
                "session": session.id,
                "kind": kind,
                "levels": levels,
                "stacks": stacks.len(),
                "totalWeight": stacks.total_weight(),
                "sameAsWall": same_as_wall,
                "path": path.display().to_string(),
                "failedInputs": failed,
            }))
        }
        ProfileCommand::Methods {
            inputs,
            kind,
            view,
            limit,
            filters,
        } => {
            let filters = filters.to_filter_config()?;
            let (session, failed) = open_session(store, inputs)?;
            let stats = session.method_stats(*kind, &filters, local)?;
            let table = stats.table(*view, limit.unwrap_or(config.table_limit))?;
            Ok(serde_json::json!({
                "session": session.id,
                "kind": kind,
                "methods": stats.len(),
                "table": table,
                "failedInputs": failed,
            }))
        }
        ProfileCommand::Ecid {
            inputs,
            limit,
            filters,
        } => {
            let filters = filters.to_filter_config()?;
            let (session, failed) = open_session(store, inputs)?;
            let spans =
                session.correlation_spans(&filters, local, limit.unwrap_or(config.ecid_limit))?;
            let rows = spans.iter().map(EcidInfo::row).collect::<Vec<_>>();
            Ok(serde_json::json!({
                "session": session.id,
                "ecids": rows,
                "failedInputs": failed,
            }))
        }
        ProfileCommand::Trim {
            inputs,
            method,
            direction,
            kind,
            levels,
            out,
            gzip,
        } => {
            let (session, failed) = open_session(store, inputs)?;
            let child = store.trim_to_method(session.id, method, *direction)?;
            let levels = levels.iter().copied().collect::<LevelSet>();
            let stacks = child.collapsed(*kind, &levels, &FilterConfig::default(), local)?;
            let path = output_path(config, out.as_deref(), &child, *kind, *gzip);
            save_stacks(&stacks, &path, *gzip)?;
            Ok(serde_json::json!({
                "session": child.id,
                "parent": session.id,
                "method": method,
                "direction": direction,
                "kind": kind,
                "stacks": stacks.len(),
                "totalWeight": stacks.total_weight(),
                "path": path.display().to_string(),
                "failedInputs": failed,
            }))
        }
        ProfileCommand::Compare {
            first,
            second,
            threshold,
            metric,
        } => {
            let threshold = threshold.unwrap_or(match metric {
                CompareMetric::SelfTime => config.self_time_threshold,
                CompareMetric::Total => config.total_time_threshold,
            });
            let info = CompareInfo::load(first, second)?;
            let comparison = info.compare(CompareOptions {
                threshold,
                metric: *metric,
            })?;
            Ok(serde_json::to_value(comparison)?)
        }
        ProfileCommand::Cpu { inputs, filters } => {
            let filters = filters.to_filter_config()?;
            let (session, failed) = open_session(store, inputs)?;
            let series = session.cpu_load_series(&filters, local)?;
            Ok(serde_json::json!({
                "session": session.id,
                "series": series,
                "failedInputs": failed,
            }))
        }
        ProfileCommand::Info { inputs } => {
            let (session, failed) = open_session(store, inputs)?;
            Ok(serde_json::json!({
                "session": session.summary(),
                "utcOffset": offset_label(local),
                "failedInputs": failed,
            }))
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct FailedInput {
    path: String,
    message: String,
}

/// Parses inputs into a fresh session; per-file failures are returned, not raised.
fn open_session(
    store: &SessionStore,
    inputs: &[String],
) -> LensResult<(Arc<ProfileSession>, Vec<FailedInput>)> {
    let paths = resolve_inputs(inputs)?;
    let outcome = store.parse(&paths)?;
    let failed = outcome
        .failures
        .iter()
        .map(|(path, err)| FailedInput {
            path: path.display().to_string(),
            message: err.to_string(),
        })
        .collect();
    Ok((outcome.session, failed))
}

fn output_path(
    config: &Config,
    out: Option<&Path>,
    session: &ProfileSession,
    kind: ProfileKind,
    gzip: bool,
) -> PathBuf {
    match out {
        Some(path) => path.to_path_buf(),
        None => {
            let ext = if gzip { "collapsed.gz" } else { "collapsed" };
            config
                .output_dir
                .join(format!("{}-{}.{ext}", session.id, kind.name()))
        }
    }
}

fn save_stacks(stacks: &CollapsedStack, path: &Path, gzip: bool) -> LensResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|err| LensError::from(err).in_file(parent))?;
    }
    if gzip || crate::collapsed::is_gzip(path) {
        stacks.save_gzip(path)
    } else {
        stacks.save(path)
    }
}

fn offset_label(offset: UtcOffset) -> String {
    let (h, m, _) = offset.as_hms();
    let sign = if offset.is_negative() { '-' } else { '+' };
    format!("{sign}{:02}:{:02}", h.abs(), m.abs())
}
