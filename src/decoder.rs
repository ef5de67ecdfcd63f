//! Event decoder boundary: typed event batches with optional fields.
//!
//! The concrete source reads newline-delimited JSON, one decoded event per
//! line, from plain, `.gz` or `.zip` files.

use flate2::read::GzDecoder;
use serde::Deserialize;

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::{LensError, LensResult, RawFrame};

pub const EXECUTION_SAMPLE: &str = "jdk.ExecutionSample";
pub const ALLOCATION_IN_NEW_TLAB: &str = "jdk.ObjectAllocationInNewTLAB";
pub const ALLOCATION_OUTSIDE_TLAB: &str = "jdk.ObjectAllocationOutsideTLAB";
pub const MONITOR_ENTER: &str = "jdk.JavaMonitorEnter";
pub const CPU_LOAD: &str = "jdk.CPULoad";

/// Decoded event fields keyed by their stable identifiers; absent fields stay `None`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DecodedEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    /// Epoch nanoseconds.
    pub start_time: Option<i64>,
    pub thread: Option<String>,
    pub stack_trace: Option<Vec<RawFrame>>,
    pub state: Option<String>,
    #[serde(alias = "contextId")]
    pub ecid: Option<u64>,
    pub samples: Option<u64>,
    pub allocation_size: Option<u64>,
    pub object_class: Option<String>,
    pub monitor_class: Option<String>,
    /// Nanoseconds.
    pub duration: Option<u64>,
    pub jvm_user: Option<f64>,
    pub jvm_system: Option<f64>,
    pub machine_total: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventBatch {
    pub event_type: String,
    pub events: Vec<DecodedEvent>,
}

/// Yields the typed batches of one input.
pub trait EventSource {
    fn name(&self) -> &str;
    fn batches(&mut self) -> LensResult<Vec<EventBatch>>;
}

/// JSON-lines reader; one `DecodedEvent` per non-blank line.
pub struct JsonLinesSource<R> {
    name: String,
    reader: R,
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            reader,
        }
    }
}

impl JsonLinesSource<BufReader<Box<dyn Read + Send>>> {
    /// Opens `path`, transparently decompressing `.gz` and `.zip` inputs.
    pub fn open(path: &Path) -> LensResult<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let lower = name.to_ascii_lowercase();
        let file = std::fs::File::open(path)?;
        let reader: Box<dyn Read + Send> = if lower.ends_with(".gz") {
            Box::new(GzDecoder::new(file))
        } else if lower.ends_with(".zip") {
            Box::new(first_zip_entry(file)?)
        } else {
            Box::new(file)
        };
        Ok(Self::new(name, BufReader::new(reader)))
    }
}

fn first_zip_entry(file: std::fs::File) -> LensResult<std::io::Cursor<Vec<u8>>> {
    let mut archive = zip::ZipArchive::new(file)?;
    for idx in 0..archive.len() {
        let mut entry = archive.by_index(idx)?;
        if entry.is_dir() {
            continue;
        }
        let mut bytes = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
        entry.read_to_end(&mut bytes)?;
        return Ok(std::io::Cursor::new(bytes));
    }
    Err(LensError::Decode("zip archive has no file entries".to_string()))
}

impl<R: BufRead> EventSource for JsonLinesSource<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn batches(&mut self) -> LensResult<Vec<EventBatch>> {
        let mut grouped = BTreeMap::<String, Vec<DecodedEvent>>::new();
        let mut line = String::new();
        let mut line_no = 0usize;
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                break;
            }
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let event: DecodedEvent = serde_json::from_str(&line)
                .map_err(|e| LensError::Decode(format!("line {line_no}: {e}")))?;
            grouped.entry(event.event_type.clone()).or_default().push(event);
        }
        Ok(grouped
            .into_iter()
            .map(|(event_type, events)| EventBatch { event_type, events })
            .collect())
    }
}

/// In-memory source, mostly for embedding callers that decode elsewhere.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    pub name: String,
    pub batches: Vec<EventBatch>,
}

impl EventSource for VecSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn batches(&mut self) -> LensResult<Vec<EventBatch>> {
        Ok(std::mem::take(&mut self.batches))
    }
}
