use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate};
use ephem_core::{EventKind, ExperimentalGroup, KeyRole, TrainingPhase, TrialType};
use serde::Serialize;

use crate::error::LogError;
use crate::state::EndReason;

/// Column headers of the session data file.
pub const CSV_HEADER: [&str; 15] = [
    "SessionTime",
    "Xcord",
    "Ycord",
    "LocationEvent",
    "LeftKey",
    "RightKey",
    "TrialType",
    "TrialTime",
    "TrialNum",
    "ReinforcersProvided",
    "ITIDuration",
    "Subject",
    "Condition",
    "TrainingPhase",
    "Date",
];

/// One row of the session data file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub session_time: Duration,
    /// Canvas coordinates of the click, absent for session events.
    pub position: Option<(f32, f32)>,
    pub kind: EventKind,
    pub left_key: KeyRole,
    pub right_key: KeyRole,
    pub trial_type: Option<TrialType>,
    /// Seconds into the trial net of the ITI; negative during the ITI.
    pub trial_time: f64,
    pub trial: usize,
    pub reinforcers: usize,
    pub iti_duration_ms: u64,
    pub subject: String,
    pub group: ExperimentalGroup,
    pub phase: TrainingPhase,
    pub date: NaiveDate,
}

impl EventRecord {
    pub fn csv_fields(&self) -> [String; 15] {
        let (x, y) = match self.position {
            Some((x, y)) => (format!("{}", x.round() as i64), format!("{}", y.round() as i64)),
            None => ("NA".to_string(), "NA".to_string()),
        };
        [
            format_session_time(self.session_time),
            x,
            y,
            self.kind.label().to_string(),
            self.left_key.label().to_string(),
            self.right_key.label().to_string(),
            self.trial_type.map_or("NA", |t| t.label()).to_string(),
            format!("{:.5}", self.trial_time),
            self.trial.to_string(),
            self.reinforcers.to_string(),
            self.iti_duration_ms.to_string(),
            self.subject.clone(),
            self.group.name().to_string(),
            self.phase.index().to_string(),
            self.date.format("%Y-%m-%d").to_string(),
        ]
    }

    pub fn csv_row(&self) -> String {
        self.csv_fields()
            .iter()
            .map(|f| escape_field(f))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// `H:MM:SS.ffffff`
pub fn format_session_time(d: Duration) -> String {
    let secs = d.as_secs();
    format!(
        "{}:{:02}:{:02}.{:06}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        d.subsec_micros()
    )
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Written next to the data file when a session ends.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub subject: String,
    pub phase: TrainingPhase,
    pub group: ExperimentalGroup,
    pub started_at: DateTime<Local>,
    pub end_reason: EndReason,
    pub trials: usize,
    pub reinforcers: usize,
    pub events: usize,
    pub plan: Vec<&'static str>,
}

/// Durable destination for the event log.
pub trait RecordSink {
    /// Replaces whatever was stored before with the full record sequence.
    fn write_snapshot(&mut self, records: &[EventRecord]) -> Result<(), LogError>;

    fn write_summary(&mut self, _summary: &SessionSummary) -> Result<(), LogError> {
        Ok(())
    }
}

/// Writes the session as a CSV file, rewritten in full on every flush.
#[derive(Debug, Clone)]
pub struct CsvFileSink {
    path: PathBuf,
}

impl CsvFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data_dir>/<subject>/<subject>_<start>_data-Phase<n>.csv`
    pub fn for_session(
        data_dir: &Path,
        subject: &str,
        started_at: &DateTime<Local>,
        phase: TrainingPhase,
    ) -> Self {
        let file = format!(
            "{}_{}_data-Phase{}.csv",
            subject,
            started_at.format("%Y-%m-%d_%H.%M.%S"),
            phase.index()
        );
        Self::new(data_dir.join(subject).join(file))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn summary_path(&self) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path.with_file_name(format!("{stem}_summary.json"))
    }

    fn io_error(&self, source: std::io::Error) -> LogError {
        LogError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn replace_with(&self, target: &Path, contents: &[u8]) -> Result<(), LogError> {
        if let Some(dir) = target.parent() {
            std::fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;
        }
        let tmp = target.with_extension("tmp");
        std::fs::write(&tmp, contents).map_err(|e| self.io_error(e))?;
        std::fs::rename(&tmp, target).map_err(|e| self.io_error(e))
    }
}

impl RecordSink for CsvFileSink {
    fn write_snapshot(&mut self, records: &[EventRecord]) -> Result<(), LogError> {
        let mut out = CSV_HEADER.join(",");
        out.push('\n');
        for record in records {
            out.push_str(&record.csv_row());
            out.push('\n');
        }
        self.replace_with(&self.path, out.as_bytes())?;
        tracing::debug!(path = %self.path.display(), rows = records.len(), "data file written");
        Ok(())
    }

    fn write_summary(&mut self, summary: &SessionSummary) -> Result<(), LogError> {
        let json = serde_json::to_vec_pretty(summary)?;
        let path = self.summary_path();
        self.replace_with(&path, &json)?;
        tracing::info!(path = %path.display(), "session summary written");
        Ok(())
    }
}

/// Append-only, ordered record of everything that happened in a session.
#[derive(Debug, Default)]
pub struct EventLog {
    records: Vec<EventRecord>,
    flushed: usize,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: EventRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&EventRecord> {
        self.records.last()
    }

    /// Records already persisted by the last successful flush.
    pub fn flushed(&self) -> usize {
        self.flushed
    }

    pub fn flush(&mut self, sink: &mut dyn RecordSink) -> Result<(), LogError> {
        sink.write_snapshot(&self.records)?;
        self.flushed = self.records.len();
        Ok(())
    }
}
