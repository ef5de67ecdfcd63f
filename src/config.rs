//! `jfrlens.toml` config loading.

use serde::{Deserialize, Serialize};
use time::UtcOffset;

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Default row limit for method tables.
    #[serde(default = "default_table_limit")]
    pub table_limit: usize,

    /// Default number of correlation ids reported.
    #[serde(default = "default_ecid_limit")]
    pub ecid_limit: usize,

    /// Default comparator threshold (fraction of total) for self time.
    #[serde(default)]
    pub self_time_threshold: f64,

    /// Default comparator threshold (fraction of total) for total time.
    #[serde(default)]
    pub total_time_threshold: f64,

    /// Aggregation pool size; rayon's default when unset.
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Offset for local timestamp frames and end dates, e.g. `+02:00`.
    #[serde(default)]
    pub utc_offset: Option<String>,

    /// Where `collapse` and `trim` write when no output path is given.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_table_limit() -> usize {
    100
}

fn default_ecid_limit() -> usize {
    1000
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".jfrlens")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            table_limit: default_table_limit(),
            ecid_limit: default_ecid_limit(),
            self_time_threshold: 0.0,
            total_time_threshold: 0.0,
            worker_threads: None,
            utc_offset: None,
            output_dir: default_output_dir(),
        }
    }
}

impl Config {
    pub fn load_optional(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => match toml::from_str::<Config>(&s) {
                Ok(cfg) => cfg,
                Err(err) => {
                    tracing::warn!("failed to parse config {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("failed to read config {}: {err}", path.display());
                Self::default()
            }
        }
    }

    /// Configured offset, else the host's, else UTC.
    pub fn local_offset(&self) -> UtcOffset {
        if let Some(text) = self.utc_offset.as_deref() {
            match parse_offset(text) {
                Some(offset) => return offset,
                None => tracing::warn!("ignoring invalid utc_offset {text:?}"),
            }
        }
        UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC)
    }
}

fn parse_offset(text: &str) -> Option<UtcOffset> {
    let format = time::macros::format_description!("[offset_hour sign:mandatory]:[offset_minute]");
    match text.trim() {
        "Z" | "UTC" | "utc" => Some(UtcOffset::UTC),
        other => UtcOffset::parse(other, &format).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_and_malformed_files_fall_back_to_defaults() {
        let dir = std::env::temp_dir().join(format!("jfrlens-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("dir");
        assert_eq!(Config::load_optional(&dir.join("absent.toml")), Config::default());

        let bad = dir.join("bad.toml");
        std::fs::write(&bad, "table_limit = \"many\"").expect("write");
        assert_eq!(Config::load_optional(&bad), Config::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = std::env::temp_dir().join(format!("jfrlens-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("dir");
        let path = dir.join("jfrlens.toml");
        std::fs::write(&path, "table_limit = 5\nutc_offset = \"+02:00\"\n").expect("write");
        let cfg = Config::load_optional(&path);
        assert_eq!(cfg.table_limit, 5);
        assert_eq!(cfg.ecid_limit, 1000);
        assert_eq!(cfg.output_dir, PathBuf::from(".jfrlens"));
        assert_eq!(cfg.local_offset().whole_hours(), 2);
    }

    #[test]
    fn offsets_parse_with_sign() {
        assert_eq!(parse_offset("-05:30").map(|o| o.whole_minutes()), Some(-330));
        assert_eq!(parse_offset("Z"), Some(UtcOffset::UTC));
        assert_eq!(parse_offset("five"), None);
    }
}
