use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ephem_core::{ExperimentalGroup, KeyColor, KeyLayout, KeyRole, TrainingPhase};

use crate::error::ConfigError;

/// Placeholder subject used to try the program without a bird in the box.
pub const TEST_SUBJECT: &str = "TEST";

const COL_SUBJECT: &str = "Subject";
const COL_HOPPER: &str = "Hopper Duration (ms)";
const COL_ITI: &str = "ITI Duration (ms)";
const COL_GROUP: &str = "Group";
const COL_OPTIMAL: &str = "Optimal Color";
const COL_SUBOPTIMAL: &str = "Suboptimal Color";

/// Colors that tell the subject which key is which.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorScheme {
    pub optimal: KeyColor,
    pub suboptimal: KeyColor,
}

impl ColorScheme {
    pub fn color_for(&self, role: KeyRole) -> Option<&KeyColor> {
        match role {
            KeyRole::Optimal => Some(&self.optimal),
            KeyRole::Suboptimal => Some(&self.suboptimal),
            KeyRole::NotApplicable => None,
        }
    }
}

/// One row of the per-subject settings sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectSettings {
    pub subject: String,
    pub hopper_duration_ms: u64,
    pub iti_duration_ms: u64,
    pub group: ExperimentalGroup,
    pub colors: ColorScheme,
}

/// Where per-subject settings come from.
pub trait SettingsSource {
    fn lookup(&self, subject: &str) -> Result<SubjectSettings, ConfigError>;
}

/// Settings sheet in comma-delimited form, one row per subject.
#[derive(Debug, Clone)]
pub struct CsvSettings {
    rows: Vec<HashMap<String, String>>,
}

impl CsvSettings {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::SettingsNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let header: Vec<String> = match lines.next() {
            Some(line) => split_record(line),
            None => return Err(ConfigError::MissingColumn(COL_SUBJECT)),
        };
        for required in [
            COL_SUBJECT,
            COL_HOPPER,
            COL_ITI,
            COL_GROUP,
            COL_OPTIMAL,
            COL_SUBOPTIMAL,
        ] {
            if !header.iter().any(|h| h == required) {
                return Err(ConfigError::MissingColumn(required));
            }
        }

        let rows = lines
            .map(|line| header.iter().cloned().zip(split_record(line)).collect())
            .collect();
        Ok(Self { rows })
    }

    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.rows
            .iter()
            .filter_map(|r| r.get(COL_SUBJECT).map(String::as_str))
    }
}

impl SettingsSource for CsvSettings {
    fn lookup(&self, subject: &str) -> Result<SubjectSettings, ConfigError> {
        // a later row for the same subject overrides an earlier one
        let row = self
            .rows
            .iter()
            .rev()
            .find(|r| r.get(COL_SUBJECT).map(String::as_str) == Some(subject))
            .ok_or_else(|| ConfigError::UnknownSubject(subject.to_string()))?;

        let get = |column: &'static str| field(row, column);
        let invalid = |column: &'static str, value: &str| ConfigError::InvalidValue {
            subject: subject.to_string(),
            column,
            value: value.to_string(),
        };
        let millis = |column: &'static str| -> Result<u64, ConfigError> {
            let raw = get(column)?;
            raw.trim().parse().map_err(|_| invalid(column, raw))
        };
        let color = |column: &'static str| -> Result<KeyColor, ConfigError> {
            let raw = get(column)?;
            KeyColor::from_name(raw).ok_or_else(|| ConfigError::UnknownColor(raw.to_string()))
        };

        let group_raw = get(COL_GROUP)?;
        let group =
            ExperimentalGroup::from_name(group_raw).ok_or_else(|| invalid(COL_GROUP, group_raw))?;

        Ok(SubjectSettings {
            subject: subject.to_string(),
            hopper_duration_ms: millis(COL_HOPPER)?,
            iti_duration_ms: millis(COL_ITI)?,
            group,
            colors: ColorScheme {
                optimal: color(COL_OPTIMAL)?,
                suboptimal: color(COL_SUBOPTIMAL)?,
            },
        })
    }
}

/// In-memory settings, keyed by subject.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings(pub HashMap<String, SubjectSettings>);

impl StaticSettings {
    pub fn with(mut self, settings: SubjectSettings) -> Self {
        self.0.insert(settings.subject.clone(), settings);
        self
    }
}

impl SettingsSource for StaticSettings {
    fn lookup(&self, subject: &str) -> Result<SubjectSettings, ConfigError> {
        self.0
            .get(subject)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownSubject(subject.to_string()))
    }
}

fn field<'a>(row: &'a HashMap<String, String>, column: &'static str) -> Result<&'a str, ConfigError> {
    row.get(column)
        .map(String::as_str)
        .ok_or(ConfigError::MissingColumn(column))
}

/// Splits one comma-delimited record, honoring double-quoted fields.
fn split_record(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

/// What the operator picks before the subject is placed in the box.
#[derive(Debug, Clone)]
pub struct OperatorSettings {
    pub subject: String,
    pub phase: TrainingPhase,
    pub record_data: bool,
    pub data_dir: PathBuf,
}

/// Fixed session delays, shortened for the test subject.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionTimings {
    pub settle_delay: Duration,
    pub subsession_pause: Duration,
    pub session_ceiling: Option<Duration>,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(30),
            subsession_pause: Duration::from_secs(15 * 60),
            session_ceiling: Some(Duration::from_secs(90 * 60)),
        }
    }
}

impl SessionTimings {
    pub fn for_subject(subject: &str) -> Self {
        if subject == TEST_SUBJECT {
            Self {
                settle_delay: Duration::from_millis(1),
                subsession_pause: Duration::from_secs(15),
                ..Self::default()
            }
        } else {
            Self::default()
        }
    }
}

/// Immutable parameters of one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub subject: String,
    pub phase: TrainingPhase,
    pub group: ExperimentalGroup,
    pub hopper_duration: Duration,
    pub iti_duration: Duration,
    pub colors: ColorScheme,
    pub timings: SessionTimings,
    pub record_data: bool,
    pub data_dir: PathBuf,
    pub layout: KeyLayout,
}

impl SessionConfig {
    pub fn new(operator: &OperatorSettings, settings: SubjectSettings) -> Result<Self, ConfigError> {
        if operator.subject.trim().is_empty() {
            return Err(ConfigError::EmptySubject);
        }
        Ok(Self {
            subject: operator.subject.clone(),
            phase: operator.phase,
            group: settings.group,
            hopper_duration: Duration::from_millis(settings.hopper_duration_ms),
            iti_duration: Duration::from_millis(settings.iti_duration_ms),
            colors: settings.colors,
            timings: SessionTimings::for_subject(&operator.subject),
            record_data: operator.record_data,
            data_dir: operator.data_dir.clone(),
            layout: KeyLayout::default(),
        })
    }

    pub fn load(operator: &OperatorSettings, source: &dyn SettingsSource) -> Result<Self, ConfigError> {
        let settings = source.lookup(&operator.subject)?;
        Self::new(operator, settings)
    }

    pub fn is_test_subject(&self) -> bool {
        self.subject == TEST_SUBJECT
    }

    pub fn trials_per_session(&self) -> usize {
        self.phase.trials_per_session()
    }
}
