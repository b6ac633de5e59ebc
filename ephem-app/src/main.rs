use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use ephem_core::TrainingPhase;
use ephem_session::{CsvSettings, OperatorSettings, SessionConfig};
use tracing_subscriber::EnvFilter;

mod app;
pub use app::App;

#[derive(Parser)]
#[command(name = "ephem", about = "Ephemeral-choice sessions for a touchscreen operant box")]
#[command(version)]
struct Cli {
    /// Subject name as written in the settings sheet ("TEST" shortens delays)
    #[arg(short, long, env = "EPHEM_SUBJECT")]
    subject: String,

    /// Training phase to run
    #[arg(short, long, value_enum, default_value_t = PhaseArg::Training)]
    phase: PhaseArg,

    /// Per-subject settings sheet
    #[arg(long, env = "EPHEM_SETTINGS", default_value = "subject_settings.csv")]
    settings: PathBuf,

    /// Directory session data is written under
    #[arg(long, env = "EPHEM_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Run without writing session data
    #[arg(long)]
    no_record: bool,

    /// Open an 800x600 window instead of going fullscreen
    #[arg(long)]
    windowed: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PhaseArg {
    PreTraining,
    Training,
}

impl From<PhaseArg> for TrainingPhase {
    fn from(p: PhaseArg) -> Self {
        match p {
            PhaseArg::PreTraining => TrainingPhase::PreTraining,
            PhaseArg::Training => TrainingPhase::Training,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = CsvSettings::from_path(&cli.settings)
        .with_context(|| format!("loading subject settings from {}", cli.settings.display()))?;
    let operator = OperatorSettings {
        subject: cli.subject,
        phase: cli.phase.into(),
        record_data: !cli.no_record,
        data_dir: cli.data_dir,
    };

    // Fail before a window opens rather than at the begin key.
    let config = SessionConfig::load(&operator, &settings)
        .with_context(|| format!("settings for subject '{}'", operator.subject))?;
    tracing::info!(
        subject = %config.subject,
        phase = config.phase.name(),
        group = config.group.name(),
        hopper_ms = config.hopper_duration.as_millis() as u64,
        iti_ms = config.iti_duration.as_millis() as u64,
        record = config.record_data,
        "settings loaded, press SPACE once the subject is in the box"
    );

    let app = App::new(operator, settings, !cli.windowed)?;
    app.run()
}
