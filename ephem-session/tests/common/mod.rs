#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use ephem_core::{
    DisplaySurface, EventKind, ExperimentalGroup, KeyColor, KeyRegion, Side, TrainingPhase,
    TrialType,
};
use ephem_session::{
    ColorScheme, DeviceError, EventRecord, HopperState, LogError, OperatorSettings, RecordSink,
    RewardDevice, SessionEvent, SessionState, SessionStateMachine, SessionSummary, StaticSettings,
    SubjectSettings,
};
use ephem_timing::{ManualTimer, Timer};
use rand::SeedableRng;
use rand::rngs::StdRng;

#[derive(Debug, Clone, PartialEq)]
pub enum DisplayOp {
    Background(String),
    Shape(KeyRegion, String),
    Clear,
    Release,
}

#[derive(Debug, Default)]
pub struct RecordingDisplay {
    pub ops: Vec<DisplayOp>,
}

impl RecordingDisplay {
    /// Shapes drawn since the last clear.
    pub fn visible_shapes(&self) -> Vec<(KeyRegion, String)> {
        let start = self
            .ops
            .iter()
            .rposition(|op| *op == DisplayOp::Clear)
            .map_or(0, |i| i + 1);
        self.ops[start..]
            .iter()
            .filter_map(|op| match op {
                DisplayOp::Shape(region, color) => Some((*region, color.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn last_background(&self) -> Option<&str> {
        self.ops.iter().rev().find_map(|op| match op {
            DisplayOp::Background(c) => Some(c.as_str()),
            _ => None,
        })
    }
}

impl DisplaySurface for RecordingDisplay {
    fn fill_background(&mut self, color: &KeyColor) {
        self.ops.push(DisplayOp::Background(color.name.clone()));
    }

    fn present_shape(&mut self, region: KeyRegion, color: &KeyColor) {
        self.ops.push(DisplayOp::Shape(region, color.name.clone()));
    }

    fn clear_all(&mut self) {
        self.ops.push(DisplayOp::Clear);
    }

    fn release(&mut self) {
        self.ops.push(DisplayOp::Release);
    }
}

#[derive(Debug, Default)]
pub struct RecordingHopper {
    pub commands: Vec<HopperState>,
}

impl RewardDevice for RecordingHopper {
    fn set_state(&mut self, state: HopperState) -> Result<(), DeviceError> {
        self.commands.push(state);
        Ok(())
    }
}

/// Sink keeping every snapshot in memory. Clones share storage.
#[derive(Clone, Default)]
pub struct MemorySink {
    pub snapshots: Rc<RefCell<Vec<Vec<EventRecord>>>>,
    pub summaries: Rc<RefCell<Vec<SessionSummary>>>,
    /// Number of upcoming writes that fail.
    pub failures: Rc<Cell<usize>>,
}

impl MemorySink {
    pub fn fail_next(&self, n: usize) {
        self.failures.set(n);
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.borrow().len()
    }
}

impl RecordSink for MemorySink {
    fn write_snapshot(&mut self, records: &[EventRecord]) -> Result<(), LogError> {
        let pending = self.failures.get();
        if pending > 0 {
            self.failures.set(pending - 1);
            return Err(LogError::Io {
                path: PathBuf::from("memory"),
                source: std::io::Error::other("disk full"),
            });
        }
        self.snapshots.borrow_mut().push(records.to_vec());
        Ok(())
    }

    fn write_summary(&mut self, summary: &SessionSummary) -> Result<(), LogError> {
        self.summaries.borrow_mut().push(summary.clone());
        Ok(())
    }
}

pub type Machine = SessionStateMachine<RecordingDisplay, RecordingHopper, ManualTimer, StdRng>;

pub const HOPPER_MS: u64 = 3_000;
pub const ITI_MS: u64 = 10_000;

pub fn subject_settings(subject: &str, group: ExperimentalGroup) -> SubjectSettings {
    SubjectSettings {
        subject: subject.to_string(),
        hopper_duration_ms: HOPPER_MS,
        iti_duration_ms: ITI_MS,
        group,
        colors: ColorScheme {
            optimal: KeyColor::from_name("blue").unwrap(),
            suboptimal: KeyColor::from_name("yellow").unwrap(),
        },
    }
}

pub struct Harness {
    pub machine: Machine,
    pub timer: ManualTimer,
    pub sink: MemorySink,
}

impl Harness {
    pub fn new(subject: &str, phase: TrainingPhase, group: ExperimentalGroup) -> Self {
        Self::with_seed(subject, phase, group, 7)
    }

    pub fn with_seed(
        subject: &str,
        phase: TrainingPhase,
        group: ExperimentalGroup,
        seed: u64,
    ) -> Self {
        let operator = OperatorSettings {
            subject: subject.to_string(),
            phase,
            record_data: true,
            data_dir: PathBuf::from("unused"),
        };
        let settings = StaticSettings::default().with(subject_settings(subject, group));
        Self::with_operator(operator, settings, seed)
    }

    pub fn with_operator(operator: OperatorSettings, settings: StaticSettings, seed: u64) -> Self {
        let timer = ManualTimer::new();
        let sink = MemorySink::default();
        let machine = SessionStateMachine::new(
            operator,
            Box::new(settings),
            RecordingDisplay::default(),
            RecordingHopper::default(),
            timer.clone(),
            StdRng::seed_from_u64(seed),
        )
        .with_sink(Box::new(sink.clone()));
        Self {
            machine,
            timer,
            sink,
        }
    }

    pub fn begin(&mut self) {
        assert!(self.machine.handle_event(SessionEvent::Begin).unwrap());
    }

    pub fn state(&self) -> SessionState {
        self.machine.state().clone()
    }

    /// Jumps the clock to the next deadline and handles what falls due.
    pub fn fire_next(&mut self) {
        let deadline = self.machine.next_deadline().expect("a pending timer");
        if deadline > self.timer.now() {
            self.timer.set(deadline);
        }
        self.machine.run_due().unwrap();
    }

    pub fn advance(&mut self, d: Duration) {
        self.timer.advance(d);
        self.machine.run_due().unwrap();
    }

    pub fn click(&mut self, x: f32, y: f32) -> bool {
        self.machine
            .handle_event(SessionEvent::Click { x, y })
            .unwrap()
    }

    pub fn click_side(&mut self, side: Side) -> bool {
        let (x, y) = self.machine.config().unwrap().layout.region(side).center();
        self.click(x, y)
    }

    pub fn current_type(&self) -> TrialType {
        self.machine.current_trial().unwrap().trial_type
    }

    pub fn active_sides(&self) -> Vec<Side> {
        self.machine.current_trial().unwrap().keys.active_sides()
    }

    pub fn advance_to_presentation(&mut self) {
        while self.state() != SessionState::Presentation {
            assert!(!self.machine.is_finished(), "session ended early");
            self.fire_next();
        }
    }

    /// Pecks keys until the trial ends, preferring choices that end it at once.
    pub fn complete_trial(&mut self) {
        loop {
            match self.state() {
                SessionState::Presentation => {
                    let trial = self.machine.current_trial().unwrap();
                    let sides = trial.keys.active_sides();
                    let side = sides
                        .iter()
                        .copied()
                        .find(|s| !trial.is_optimal_side(*s))
                        .unwrap_or(sides[0]);
                    assert!(self.click_side(side));
                }
                SessionState::ReinforcementWindow { .. } => self.fire_next(),
                _ => return,
            }
        }
    }

    /// Runs trials until one of type `wanted` is on screen.
    pub fn seek(&mut self, wanted: TrialType) -> usize {
        loop {
            self.advance_to_presentation();
            if self.current_type() == wanted {
                return self.machine.current_trial().unwrap().index;
            }
            self.complete_trial();
        }
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.machine
            .log()
            .records()
            .iter()
            .map(|r| r.kind)
            .collect()
    }

    pub fn hopper_commands(&self) -> &[HopperState] {
        &self.machine.hopper().device().commands
    }
}
