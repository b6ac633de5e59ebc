pub mod config;
pub mod device;
pub mod error;
pub mod event_log;
pub mod plan;
pub mod resolver;
pub mod state;
pub mod trial;

pub use config::{
    ColorScheme, CsvSettings, OperatorSettings, SessionConfig, SessionTimings, SettingsSource,
    StaticSettings, SubjectSettings, TEST_SUBJECT,
};
pub use device::{Hopper, HopperState, LoggingHopper, RewardDevice};
pub use error::{ConfigError, DeviceError, LogError, PlanError, SessionError};
pub use event_log::{CsvFileSink, EventLog, EventRecord, RecordSink, SessionSummary};
pub use plan::{TrialOrderGenerator, TrialPlan};
pub use resolver::{KeyAssignment, resolve};
pub use state::{
    EndReason, Interval, SessionContext, SessionEvent, SessionState, SessionStateMachine,
    TimerCommand,
};
pub use trial::{SessionCounters, TrialState};
