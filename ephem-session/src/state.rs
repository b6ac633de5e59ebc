use std::time::Duration;

use chrono::{DateTime, Local};
use ephem_core::{DisplaySurface, EventKind, KeyColor, KeyLayout, KeyRole, Side};
use ephem_timing::{Timer, TimerQueue};
use rand::Rng;
use serde::Serialize;

use crate::config::{OperatorSettings, SessionConfig, SettingsSource};
use crate::device::{Hopper, RewardDevice};
use crate::error::{ConfigError, SessionError};
use crate::event_log::{CsvFileSink, EventLog, EventRecord, RecordSink, SessionSummary};
use crate::plan::{TrialOrderGenerator, TrialPlan};
use crate::trial::{SessionCounters, TrialState};

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EndReason {
    TrialLimit,
    TimeLimit,
    Aborted,
}

/// Which pause the inter-trial interval is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Regular,
    BetweenSubsessions,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    AwaitingSubjectPlacement,
    /// Subject placed, waiting out the settle delay before the first ITI.
    Settling,
    InterTrialInterval(Interval),
    Presentation,
    /// Hopper up. `second_chance` returns to presentation afterwards.
    ReinforcementWindow { second_chance: bool },
    SessionEnded(EndReason),
}

/// Deferred step placed on the timer queue. Commands carry the trial they
/// were scheduled for and are dropped on firing if the session moved on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    StartTrial,
    Present { trial: usize },
    EndReinforcement { trial: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionEvent {
    /// Operator confirms the subject is in the box.
    Begin,
    Abort,
    /// Pointer press in canvas coordinates.
    Click { x: f32, y: f32 },
    Timer(TimerCommand),
}

/// Everything fixed when the session begins.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub config: SessionConfig,
    pub plan: TrialPlan,
    pub started: u64,
    pub started_at: DateTime<Local>,
    pub pause_used: bool,
}

/// All mutable session state in one place.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub state: SessionState,
    pub session: Option<ActiveSession>,
    pub trial: Option<TrialState<u64>>,
    pub counters: SessionCounters,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self {
            state: SessionState::AwaitingSubjectPlacement,
            session: None,
            trial: None,
            counters: SessionCounters::default(),
        }
    }
}

pub struct SessionStateMachine<D, H, T, R>
where
    D: DisplaySurface,
    H: RewardDevice,
    T: Timer<Timestamp = u64>,
    R: Rng,
{
    pub timer: T,
    rng: R,
    display: D,
    hopper: Hopper<H>,
    operator: OperatorSettings,
    settings: Box<dyn SettingsSource>,
    ctx: SessionContext,
    queue: TimerQueue<TimerCommand>,
    log: EventLog,
    sink: Option<Box<dyn RecordSink>>,
}

impl<D, H, T, R> SessionStateMachine<D, H, T, R>
where
    D: DisplaySurface,
    H: RewardDevice,
    T: Timer<Timestamp = u64>,
    R: Rng,
{
    pub fn new(
        operator: OperatorSettings,
        settings: Box<dyn SettingsSource>,
        display: D,
        hopper: H,
        timer: T,
        rng: R,
    ) -> Self {
        Self {
            timer,
            rng,
            display,
            hopper: Hopper::new(hopper),
            operator,
            settings,
            ctx: SessionContext::default(),
            queue: TimerQueue::new(),
            log: EventLog::new(),
            sink: None,
        }
    }

    /// Persist to `sink` instead of the CSV file derived from the config.
    pub fn with_sink(mut self, sink: Box<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Timer commands whose deadline has passed, in firing order.
    pub fn update(&mut self) -> Vec<SessionEvent> {
        let now = self.timer.now();
        let mut events = Vec::new();
        while let Some(command) = self.queue.pop_due(now) {
            events.push(SessionEvent::Timer(command));
        }
        events
    }

    /// Handles every due timer, including ones that fall due while handling.
    pub fn run_due(&mut self) -> Result<(), SessionError> {
        loop {
            let events = self.update();
            if events.is_empty() {
                return Ok(());
            }
            for event in events {
                self.handle_event(event)?;
            }
        }
    }

    /// Applies one event. Returns whether the session changed state.
    pub fn handle_event(&mut self, event: SessionEvent) -> Result<bool, SessionError> {
        match (self.ctx.state.clone(), event) {
            (SessionState::SessionEnded(_), _) => Ok(false),

            (_, SessionEvent::Abort) => {
                tracing::info!("session aborted by operator");
                self.end_session(EndReason::Aborted)?;
                Ok(true)
            }

            (SessionState::AwaitingSubjectPlacement, SessionEvent::Begin) => {
                self.begin()?;
                Ok(true)
            }
            (state, SessionEvent::Begin) => Err(SessionError::AlreadyStarted(format!("{state:?}"))),

            (_, SessionEvent::Click { x, y }) => Ok(self.click(x, y)),

            (SessionState::Settling, SessionEvent::Timer(TimerCommand::StartTrial)) => {
                self.enter_iti()?;
                Ok(true)
            }

            (
                SessionState::InterTrialInterval(_),
                SessionEvent::Timer(TimerCommand::Present { trial }),
            ) if self.is_current(trial) => {
                self.present();
                Ok(true)
            }

            (
                SessionState::ReinforcementWindow { second_chance },
                SessionEvent::Timer(TimerCommand::EndReinforcement { trial }),
            ) if self.is_current(trial) => {
                if second_chance {
                    self.present();
                } else {
                    self.enter_iti()?;
                }
                Ok(true)
            }

            (state, SessionEvent::Timer(command)) => {
                tracing::debug!(?state, ?command, "stale timer ignored");
                Ok(false)
            }
        }
    }

    fn is_current(&self, trial: usize) -> bool {
        self.ctx.trial.as_ref().is_some_and(|t| t.index == trial)
    }

    fn begin(&mut self) -> Result<(), SessionError> {
        let config = SessionConfig::load(&self.operator, self.settings.as_ref())?;
        let plan = TrialOrderGenerator::new(&mut self.rng)
            .generate(config.phase, config.group, config.phase.trials_per_subsession())
            .map_err(ConfigError::from)?;

        let started = self.timer.now();
        let started_at = Local::now();
        if self.sink.is_none() && config.record_data {
            self.sink = Some(Box::new(CsvFileSink::for_session(
                &config.data_dir,
                &config.subject,
                &started_at,
                config.phase,
            )));
        }

        let settle = config.timings.settle_delay;
        tracing::info!(
            subject = %config.subject,
            phase = config.phase.name(),
            group = config.group.name(),
            trials = plan.len(),
            settle_ms = settle.as_millis() as u64,
            "session started"
        );

        self.display.clear_all();
        self.ctx.session = Some(ActiveSession {
            config,
            plan,
            started,
            started_at,
            pause_used: false,
        });
        self.ctx.state = SessionState::Settling;
        self.queue
            .schedule(started + nanos(settle), TimerCommand::StartTrial);
        Ok(())
    }

    /// Start of every trial: limit checks, checkpoint, then the ITI timer.
    fn enter_iti(&mut self) -> Result<(), SessionError> {
        self.display.clear_all();
        self.display.fill_background(&KeyColor::iti());
        self.ctx.state = SessionState::InterTrialInterval(Interval::Regular);

        let Some(session) = self.ctx.session.as_ref() else {
            return Ok(());
        };
        if self.ctx.counters.trials >= session.plan.len() {
            tracing::info!(trials = self.ctx.counters.trials, "trial max reached");
            return self.end_session(EndReason::TrialLimit);
        }
        if let Some(ceiling) = session.config.timings.session_ceiling {
            if self.timer.elapsed(session.started) >= ceiling {
                tracing::info!(ceiling_s = ceiling.as_secs(), "time max reached");
                return self.end_session(EndReason::TimeLimit);
            }
        }

        self.hopper.off();
        let now = self.timer.now();
        self.checkpoint();

        let index = self.ctx.counters.trials + 1;
        let Some(session) = self.ctx.session.as_mut() else {
            return Ok(());
        };
        let Some(trial_type) = session.plan.get(index) else {
            return self.end_session(EndReason::TrialLimit);
        };
        let long_pause =
            !session.pause_used && session.config.phase.pause_before_trial() == Some(index);
        let (interval, delay) = if long_pause {
            session.pause_used = true;
            (
                Interval::BetweenSubsessions,
                session.config.timings.subsession_pause,
            )
        } else {
            (Interval::Regular, session.config.iti_duration)
        };

        self.ctx.counters.trials = index;
        self.ctx.trial = Some(TrialState::new(index, trial_type, now));
        if interval == Interval::BetweenSubsessions {
            self.display.clear_all();
            self.display.fill_background(&KeyColor::black());
        }
        self.ctx.state = SessionState::InterTrialInterval(interval);
        self.queue
            .schedule(now + nanos(delay), TimerCommand::Present { trial: index });

        tracing::info!(
            trial = index,
            trial_type = trial_type.label(),
            delay_ms = delay.as_millis() as u64,
            long_pause,
            "trial begins"
        );
        Ok(())
    }

    /// Draws the keys that are active for the current trial.
    fn present(&mut self) {
        self.display.clear_all();
        self.hopper.off();
        self.display.fill_background(&KeyColor::black());

        if let (Some(session), Some(trial)) = (&self.ctx.session, self.ctx.trial.as_mut()) {
            let keys = trial.present();
            for (side, color) in keys.colored(&session.config.colors) {
                self.display
                    .present_shape(session.config.layout.region(side), color);
            }
        }
        self.ctx.state = SessionState::Presentation;
    }

    fn click(&mut self, x: f32, y: f32) -> bool {
        let kind = match &self.ctx.state {
            SessionState::AwaitingSubjectPlacement | SessionState::SessionEnded(_) => {
                return false;
            }
            SessionState::Settling => EventKind::SettlingPeck,
            SessionState::InterTrialInterval(Interval::Regular) => EventKind::ItiPeck,
            SessionState::InterTrialInterval(Interval::BetweenSubsessions) => {
                EventKind::BetweenSessionItiPeck
            }
            SessionState::ReinforcementWindow { .. } => EventKind::HopperUpPeck,
            SessionState::Presentation => {
                let active = self
                    .ctx
                    .trial
                    .as_ref()
                    .map(|t| t.keys.active_sides())
                    .unwrap_or_default();
                match self.layout().side_at(x, y, &active) {
                    Some(side) => {
                        self.choose(side, (x, y));
                        return true;
                    }
                    None => EventKind::BackgroundPeck,
                }
            }
        };
        self.record(kind, Some((x, y)));
        false
    }

    /// A peck on an active key: score it and raise the hopper.
    fn choose(&mut self, side: Side, position: (f32, f32)) {
        let scores = self
            .ctx
            .session
            .as_ref()
            .is_some_and(|s| s.config.phase.scores_choices());
        let Some(trial) = self.ctx.trial.as_ref() else {
            return;
        };

        let (kind, second_chance) = if !scores {
            (EventKind::KeyPeck(side), false)
        } else if trial.is_optimal_side(side) {
            (EventKind::OptimalPeck, !trial.optimal_claimed)
        } else {
            (EventKind::SuboptimalPeck, false)
        };

        self.record(kind, Some(position));
        if let Some(trial) = self.ctx.trial.as_mut() {
            trial.optimal_claimed |= second_chance;
        }
        self.provide_food(second_chance);
    }

    fn provide_food(&mut self, second_chance: bool) {
        self.record(EventKind::ReinforcerProvided, None);
        self.ctx.counters.reinforcers += 1;

        self.display.clear_all();
        self.display.fill_background(&KeyColor::black());
        self.hopper.on();
        self.ctx.state = SessionState::ReinforcementWindow { second_chance };

        let hopper_duration = self
            .ctx
            .session
            .as_ref()
            .map_or(Duration::ZERO, |s| s.config.hopper_duration);
        if let Some(trial) = &self.ctx.trial {
            self.queue.schedule(
                self.timer.now() + nanos(hopper_duration),
                TimerCommand::EndReinforcement { trial: trial.index },
            );
        }
    }

    /// Shared teardown of every way a session can end.
    fn end_session(&mut self, reason: EndReason) -> Result<(), SessionError> {
        if matches!(self.ctx.state, SessionState::SessionEnded(_)) {
            return Ok(());
        }
        self.queue.clear();
        self.hopper.off();
        self.display.clear_all();

        let mut result = Ok(());
        if self.ctx.session.is_some() {
            self.record(EventKind::SessionEnds, None);
            result = self.final_flush();
            self.write_summary(reason);
        }

        self.display.release();
        self.ctx.state = SessionState::SessionEnded(reason);
        tracing::info!(
            ?reason,
            trials = self.ctx.counters.trials,
            reinforcers = self.ctx.counters.reinforcers,
            events = self.log.len(),
            "session ended"
        );
        result
    }

    fn recording(&self) -> bool {
        self.ctx
            .session
            .as_ref()
            .is_some_and(|s| s.config.record_data)
    }

    /// Per-trial flush. Failures are logged and the session carries on.
    fn checkpoint(&mut self) {
        if !self.recording() {
            tracing::debug!("data recording disabled, checkpoint skipped");
            return;
        }
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = self.log.flush(sink.as_mut()) {
                tracing::warn!(error = %e, "checkpoint flush failed, session continues");
            }
        }
    }

    /// End-of-session flush, retried once before giving up.
    fn final_flush(&mut self) -> Result<(), SessionError> {
        if !self.recording() {
            return Ok(());
        }
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        match self.log.flush(sink.as_mut()) {
            Ok(()) => Ok(()),
            Err(first) => {
                tracing::warn!(error = %first, "final flush failed, retrying");
                self.log.flush(sink.as_mut()).map_err(|e| {
                    tracing::error!(error = %e, "session data could not be saved");
                    SessionError::from(e)
                })
            }
        }
    }

    fn write_summary(&mut self, reason: EndReason) {
        if !self.recording() {
            return;
        }
        let (Some(session), Some(sink)) = (&self.ctx.session, self.sink.as_mut()) else {
            return;
        };
        let summary = SessionSummary {
            subject: session.config.subject.clone(),
            phase: session.config.phase,
            group: session.config.group,
            started_at: session.started_at,
            end_reason: reason,
            trials: self.ctx.counters.trials,
            reinforcers: self.ctx.counters.reinforcers,
            events: self.log.len(),
            plan: session.plan.trials().iter().map(|t| t.label()).collect(),
        };
        if let Err(e) = sink.write_summary(&summary) {
            tracing::warn!(error = %e, "session summary not written");
        }
    }

    fn record(&mut self, kind: EventKind, position: Option<(f32, f32)>) {
        let Some(session) = &self.ctx.session else {
            return;
        };
        let config = &session.config;
        let trial = self.ctx.trial.as_ref();
        let session_time = self.timer.elapsed(session.started);
        let trial_time = trial.map_or(0.0, |t| {
            self.timer.elapsed(t.start).as_secs_f64() - config.iti_duration.as_secs_f64()
        });

        let record = EventRecord {
            session_time,
            position,
            kind,
            left_key: trial.map_or(KeyRole::NotApplicable, |t| t.role(Side::Left)),
            right_key: trial.map_or(KeyRole::NotApplicable, |t| t.role(Side::Right)),
            trial_type: trial.map(|t| t.trial_type),
            trial_time,
            trial: self.ctx.counters.trials,
            reinforcers: self.ctx.counters.reinforcers,
            iti_duration_ms: config.iti_duration.as_millis() as u64,
            subject: config.subject.clone(),
            group: config.group,
            phase: config.phase,
            date: session.started_at.date_naive(),
        };
        tracing::info!(
            event = kind.label(),
            x = position.map(|p| p.0),
            y = position.map(|p| p.1),
            session_time = %crate::event_log::format_session_time(session_time),
            trial_type = record.trial_type.map_or("NA", |t| t.label()),
            "event"
        );
        self.log.append(record);
    }

    fn layout(&self) -> KeyLayout {
        self.ctx
            .session
            .as_ref()
            .map(|s| s.config.layout)
            .unwrap_or_default()
    }

    pub fn state(&self) -> &SessionState {
        &self.ctx.state
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn config(&self) -> Option<&SessionConfig> {
        self.ctx.session.as_ref().map(|s| &s.config)
    }

    pub fn plan(&self) -> Option<&TrialPlan> {
        self.ctx.session.as_ref().map(|s| &s.plan)
    }

    pub fn counters(&self) -> SessionCounters {
        self.ctx.counters
    }

    pub fn current_trial(&self) -> Option<&TrialState<u64>> {
        self.ctx.trial.as_ref()
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }

    pub fn hopper(&self) -> &Hopper<H> {
        &self.hopper
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.queue.next_deadline()
    }

    pub fn pending_timers(&self) -> usize {
        self.queue.len()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.ctx.state, SessionState::SessionEnded(_))
    }
}

fn nanos(d: Duration) -> u64 {
    d.as_nanos() as u64
}
