mod common;

use std::path::PathBuf;
use std::time::Duration;

use common::{DisplayOp, Harness, subject_settings};
use ephem_core::{EventKind, ExperimentalGroup, TrainingPhase};
use ephem_session::{
    ConfigError, EndReason, HopperState, OperatorSettings, SessionError, SessionEvent,
    SessionState, StaticSettings,
};

fn operator(subject: &str, phase: TrainingPhase, record_data: bool) -> OperatorSettings {
    OperatorSettings {
        subject: subject.to_string(),
        phase,
        record_data,
        data_dir: PathBuf::from("unused"),
    }
}

#[test]
fn abort_during_presentation_tears_down() {
    let mut h = Harness::new("TEST", TrainingPhase::Training, ExperimentalGroup::Choice);
    h.begin();
    h.advance_to_presentation();
    let trial = h.machine.current_trial().unwrap().index;

    assert!(h.machine.handle_event(SessionEvent::Abort).unwrap());
    assert_eq!(h.state(), SessionState::SessionEnded(EndReason::Aborted));
    assert_eq!(h.machine.pending_timers(), 0);
    assert_eq!(h.kinds().last(), Some(&EventKind::SessionEnds));
    assert_eq!(h.hopper_commands().last(), Some(&HopperState::Off));
    assert_eq!(h.machine.display().ops.last(), Some(&DisplayOp::Release));
    assert_eq!(
        h.sink.snapshots.borrow().last().unwrap().len(),
        h.machine.log().len()
    );

    let late = ephem_session::TimerCommand::Present { trial };
    assert!(!h.machine.handle_event(SessionEvent::Timer(late)).unwrap());
    assert!(!h.click(250.0, 300.0));
    assert!(!h.machine.handle_event(SessionEvent::Abort).unwrap());
    assert_eq!(
        h.kinds().iter().filter(|k| **k == EventKind::SessionEnds).count(),
        1
    );
}

#[test]
fn abort_during_reinforcement_lowers_the_hopper() {
    let mut h = Harness::new("TEST", TrainingPhase::PreTraining, ExperimentalGroup::Choice);
    h.begin();
    h.advance_to_presentation();
    let side = h.current_type().side();
    h.click_side(side);
    assert_eq!(h.hopper_commands().last(), Some(&HopperState::On));

    h.machine.handle_event(SessionEvent::Abort).unwrap();
    assert_eq!(h.hopper_commands().last(), Some(&HopperState::Off));
    assert_eq!(h.sink.summaries.borrow()[0].end_reason, EndReason::Aborted);
}

#[test]
fn abort_before_begin_writes_nothing() {
    let mut h = Harness::new("TEST", TrainingPhase::Training, ExperimentalGroup::Choice);
    assert!(h.machine.handle_event(SessionEvent::Abort).unwrap());
    assert_eq!(h.state(), SessionState::SessionEnded(EndReason::Aborted));
    assert!(h.machine.log().is_empty());
    assert_eq!(h.sink.snapshot_count(), 0);
    assert_eq!(h.machine.display().ops.last(), Some(&DisplayOp::Release));
}

#[test]
fn session_ceiling_ends_at_next_trial_boundary() {
    let mut h = Harness::new("Odin", TrainingPhase::Training, ExperimentalGroup::Choice);
    h.begin();
    assert_eq!(h.machine.next_deadline(), Some(30_000_000_000));
    h.advance_to_presentation();
    let side = h.current_type().side().opposite();
    h.click_side(side);

    h.advance(Duration::from_secs(91 * 60));
    assert_eq!(h.state(), SessionState::SessionEnded(EndReason::TimeLimit));
    assert_eq!(h.machine.counters().trials, 1);
    assert_eq!(h.kinds().last(), Some(&EventKind::SessionEnds));
}

#[test]
fn unknown_subject_blocks_the_start() {
    let settings = StaticSettings::default().with(subject_settings("Odin", ExperimentalGroup::Forced));
    let mut h = Harness::with_operator(operator("Thoth", TrainingPhase::Training, true), settings, 1);
    let err = h.machine.handle_event(SessionEvent::Begin).unwrap_err();
    assert!(matches!(
        err,
        SessionError::Config(ConfigError::UnknownSubject(ref s)) if s == "Thoth"
    ));
    assert_eq!(h.state(), SessionState::AwaitingSubjectPlacement);
    assert_eq!(h.machine.pending_timers(), 0);
}

#[test]
fn recording_disabled_never_touches_the_sink() {
    let settings = StaticSettings::default().with(subject_settings("TEST", ExperimentalGroup::Forced));
    let mut h = Harness::with_operator(operator("TEST", TrainingPhase::PreTraining, false), settings, 3);
    h.begin();
    for _ in 0..3 {
        h.advance_to_presentation();
        h.complete_trial();
    }
    h.machine.handle_event(SessionEvent::Abort).unwrap();
    assert!(!h.machine.log().is_empty());
    assert_eq!(h.sink.snapshot_count(), 0);
    assert!(h.sink.summaries.borrow().is_empty());
}

#[test]
fn checkpoint_failure_does_not_stop_the_session() {
    let mut h = Harness::new("TEST", TrainingPhase::PreTraining, ExperimentalGroup::Forced);
    h.begin();
    h.sink.fail_next(1);
    h.fire_next();
    assert!(matches!(h.state(), SessionState::InterTrialInterval(_)));
    assert_eq!(h.sink.snapshot_count(), 0);

    h.advance_to_presentation();
    h.complete_trial();
    assert_eq!(h.sink.snapshot_count(), 1);
    assert_eq!(h.machine.log().flushed(), h.machine.log().len());
}

#[test]
fn final_flush_is_retried_once() {
    let mut h = Harness::new("TEST", TrainingPhase::PreTraining, ExperimentalGroup::Forced);
    h.begin();
    h.advance_to_presentation();
    h.sink.fail_next(1);
    h.machine.handle_event(SessionEvent::Abort).unwrap();
    let snapshots = h.sink.snapshots.borrow();
    assert_eq!(snapshots.last().unwrap().last().unwrap().kind, EventKind::SessionEnds);
}

#[test]
fn final_flush_failure_is_reported_after_teardown() {
    let mut h = Harness::new("TEST", TrainingPhase::PreTraining, ExperimentalGroup::Forced);
    h.begin();
    h.advance_to_presentation();
    h.sink.fail_next(2);
    let err = h.machine.handle_event(SessionEvent::Abort).unwrap_err();
    assert!(matches!(err, SessionError::Flush(_)));
    assert_eq!(h.state(), SessionState::SessionEnded(EndReason::Aborted));
    assert_eq!(h.machine.display().ops.last(), Some(&DisplayOp::Release));
    assert_eq!(h.hopper_commands().last(), Some(&HopperState::Off));
}

#[test]
fn sessions_write_csv_files_under_the_subject_directory() {
    let dir = tempfile::tempdir().unwrap();
    let operator = OperatorSettings {
        subject: "TEST".into(),
        phase: TrainingPhase::PreTraining,
        record_data: true,
        data_dir: dir.path().to_path_buf(),
    };
    let settings = StaticSettings::default().with(subject_settings("TEST", ExperimentalGroup::Choice));
    let timer = ephem_timing::ManualTimer::new();
    let mut machine = ephem_session::SessionStateMachine::new(
        operator,
        Box::new(settings),
        common::RecordingDisplay::default(),
        common::RecordingHopper::default(),
        timer.clone(),
        <rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(11),
    );
    machine.handle_event(SessionEvent::Begin).unwrap();
    timer.advance(Duration::from_millis(1));
    machine.run_due().unwrap();
    machine.handle_event(SessionEvent::Abort).unwrap();

    let subject_dir = dir.path().join("TEST");
    let mut files: Vec<_> = std::fs::read_dir(&subject_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    files.sort();
    assert_eq!(files.len(), 2);
    assert!(files[0].starts_with("TEST_") && files[0].ends_with("_data-Phase0.csv"));
    assert!(files[1].ends_with("_data-Phase0_summary.json"));

    let csv = std::fs::read_to_string(subject_dir.join(&files[0])).unwrap();
    let mut lines = csv.lines();
    assert!(lines.next().unwrap().starts_with("SessionTime,Xcord,Ycord,LocationEvent"));
    assert!(lines.last().unwrap().contains(",SessionEnds,"));

    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(subject_dir.join(&files[1])).unwrap()).unwrap();
    assert_eq!(summary["end_reason"], "Aborted");
    assert_eq!(summary["plan"].as_array().unwrap().len(), 60);
}
