//! Time window resolution from higher-level windowing policies.

use serde::{Deserialize, Serialize};
use time::format_description::OwnedFormatItem;
use time::{Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::{LensError, LensResult};

/// Inclusive `[start, end]` window. An inverted window matches nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
}

impl TimeWindow {
    pub fn new(start: OffsetDateTime, end: OffsetDateTime) -> Self {
        Self { start, end }
    }

    /// Window used when a policy needs session bounds but the session has no events.
    pub fn nothing() -> Self {
        Self {
            start: OffsetDateTime::UNIX_EPOCH + Duration::milliseconds(1),
            end: OffsetDateTime::UNIX_EPOCH,
        }
    }

    pub fn contains(&self, t: OffsetDateTime) -> bool {
        !(t < self.start || t > self.end)
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}

/// Earliest and latest instant over the stack-bearing events of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionBounds {
    pub min: OffsetDateTime,
    pub max: OffsetDateTime,
}

/// Windowing policies in priority order; only one is ever active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowPolicy {
    EndDuration {
        end: OffsetDateTime,
        duration_ms: u64,
    },
    WarmupCooldown {
        warmup_secs: u64,
        cooldown_secs: u64,
    },
    WarmupDuration {
        warmup_secs: u64,
        duration_secs: u64,
    },
    Timestamps {
        start_secs: i64,
        end_secs: i64,
    },
}

impl WindowPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::EndDuration { .. } => "end_duration",
            Self::WarmupCooldown { .. } => "warmup_cooldown",
            Self::WarmupDuration { .. } => "warmup_duration",
            Self::Timestamps { .. } => "start_end_timestamp",
        }
    }

    /// Window for this policy. Offsets past the representable range give an
    /// inverted window.
    pub fn resolve(&self, bounds: Option<SessionBounds>) -> TimeWindow {
        self.checked_resolve(bounds).unwrap_or_else(TimeWindow::nothing)
    }

    fn checked_resolve(&self, bounds: Option<SessionBounds>) -> Option<TimeWindow> {
        match *self {
            Self::EndDuration { end, duration_ms } => {
                Some(TimeWindow::new(end.checked_sub(millis(duration_ms))?, end))
            }
            Self::WarmupCooldown {
                warmup_secs,
                cooldown_secs,
            } => {
                let b = bounds?;
                Some(TimeWindow::new(
                    b.min.checked_add(secs(warmup_secs))?,
                    b.max.checked_sub(secs(cooldown_secs))?,
                ))
            }
            Self::WarmupDuration {
                warmup_secs,
                duration_secs,
            } => {
                let start = bounds?.min.checked_add(secs(warmup_secs))?;
                Some(TimeWindow::new(start, start.checked_add(secs(duration_secs))?))
            }
            Self::Timestamps {
                start_secs,
                end_secs,
            } => {
                let start = crate::from_epoch_millis(start_secs.saturating_mul(1000))?;
                let end = crate::from_epoch_millis(end_secs.saturating_mul(1000).saturating_add(999))?;
                Some(TimeWindow::new(start, end))
            }
        }
    }
}

fn secs(v: u64) -> Duration {
    Duration::seconds(i64::try_from(v).unwrap_or(i64::MAX))
}

fn millis(v: u64) -> Duration {
    Duration::milliseconds(i64::try_from(v).unwrap_or(i64::MAX))
}

/// Parses `input` with `pattern`, interpreting the wall-clock time at `offset`.
///
/// The pattern is either a `time` format description (`[year]-[month]...`) or a
/// Java-style date pattern (`yyyy-MM-dd'T'HH:mm:ss.SSS`). Locale is not consulted.
pub fn parse_end_date(input: &str, pattern: &str, offset: UtcOffset) -> LensResult<OffsetDateTime> {
    let description = if pattern.contains('[') {
        pattern.to_string()
    } else {
        translate_java_pattern(pattern)?
    };
    let items: OwnedFormatItem = time::format_description::parse_owned::<1>(&description)
        .map_err(|e| LensError::InvalidArgument(format!("invalid date pattern {pattern:?}: {e}")))?;
    let parsed = PrimitiveDateTime::parse(input.trim(), &items).map_err(|e| {
        LensError::InvalidArgument(format!("end date {input:?} does not match {pattern:?}: {e}"))
    })?;
    Ok(parsed.assume_offset(offset))
}

fn translate_java_pattern(pattern: &str) -> LensResult<String> {
    let chars = pattern.chars().collect::<Vec<_>>();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            let close = chars[i + 1..]
                .iter()
                .position(|&q| q == '\'')
                .ok_or_else(|| LensError::InvalidArgument(format!("unterminated quote in {pattern:?}")))?;
            let literal = chars[i + 1..i + 1 + close].iter().collect::<String>();
            if literal.is_empty() {
                out.push('\'');
            } else {
                out.push_str(&literal.replace('[', "[["));
            }
            i += close + 2;
            continue;
        }
        let run = chars[i..].iter().take_while(|&&r| r == c).count();
        let component = match (c, run) {
            ('y', 2) => "[year repr:last_two]".to_string(),
            ('y', _) => "[year]".to_string(),
            ('M', 1) => "[month padding:none]".to_string(),
            ('M', 2) => "[month]".to_string(),
            ('M', 3) => "[month repr:short]".to_string(),
            ('M', _) => "[month repr:long]".to_string(),
            ('d', 1) => "[day padding:none]".to_string(),
            ('d', _) => "[day]".to_string(),
            ('H', 1) => "[hour padding:none]".to_string(),
            ('H', _) => "[hour]".to_string(),
            ('h', _) => "[hour repr:12]".to_string(),
            ('a', _) => "[period]".to_string(),
            ('m', _) => "[minute]".to_string(),
            ('s', _) => "[second]".to_string(),
            ('S', n) => format!("[subsecond digits:{}]", n.min(9)),
            (c, _) if c.is_ascii_alphabetic() => {
                return Err(LensError::InvalidArgument(format!(
                    "unsupported date pattern letter {c:?} in {pattern:?}"
                )));
            }
            ('[', n) => "[[".repeat(n),
            (c, n) => c.to_string().repeat(n),
        };
        out.push_str(&component);
        i += run;
    }
    Ok(out)
}
