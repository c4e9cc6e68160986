//! Session state and the reducer that folds events into it.
//!
//! All state changes of a streaming session go through [`SessionState::apply`], regardless of
//! whether they originate from inbound messages or local actions.

use stride_body::{
    phase::{transitions_are_contiguous, transition_at},
    Phase, PhaseTransition,
};

use super::protocol::{Inbound, PhaseTransitionUpdate, PhaseUpdate, TestResult};

/// Phase segmentation state, as reported by the service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseState {
    pub current_phase: Option<Phase>,
    pub phase_label: Option<String>,
    pub elapsed_time: Option<f64>,
    pub leg_angle: Option<f64>,
    pub hip_height: Option<f64>,
    pub transitions: Vec<PhaseTransition>,
}

impl PhaseState {
    /// Start time of the recorded transition into `phase`.
    pub fn phase_start(&self, phase: Phase) -> Option<f64> {
        self.transitions
            .iter()
            .find(|t| t.phase == phase)
            .map(|t| t.start)
    }

    /// The phase covering `time`, according to the transition list.
    pub fn phase_at(&self, time: f64) -> Option<Phase> {
        transition_at(&self.transitions, time).map(|t| t.phase)
    }

    fn merge_update(&mut self, update: PhaseUpdate) {
        let PhaseUpdate {
            current_phase,
            phase_label,
            elapsed_time,
            leg_angle,
            hip_height,
        } = update;
        merge(&mut self.current_phase, current_phase);
        merge(&mut self.phase_label, phase_label);
        merge(&mut self.elapsed_time, elapsed_time);
        merge(&mut self.leg_angle, leg_angle);
        merge(&mut self.hip_height, hip_height);
    }

    fn merge_transitions(&mut self, update: PhaseTransitionUpdate) {
        merge(&mut self.current_phase, update.current_phase);
        merge(&mut self.phase_label, update.phase_label);
        merge(&mut self.elapsed_time, update.elapsed_time);
        if let Some(transitions) = update.transitions {
            if !transitions_are_contiguous(&transitions) {
                log::debug!("received non-contiguous transition list: {transitions:?}");
            }
            self.transitions = transitions;
        }
    }
}

fn merge<T>(field: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *field = value;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Open,
    /// The connection is gone and will not come back on its own.
    Disconnected(String),
}

/// Everything a presentation layer needs to know about a streaming session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub connection: ConnectionStatus,
    pub is_test_running: bool,
    pub phase: PhaseState,
    /// Set exactly once per test, by the terminal message.
    pub result: Option<TestResult>,
    pub error: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            connection: ConnectionStatus::Connecting,
            is_test_running: false,
            phase: PhaseState::default(),
            result: None,
            error: None,
        }
    }
}

/// Inputs of the reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected,
    /// A new test is about to start. Clears all phase and result state.
    Reset,
    Inbound(Inbound),
    /// The test was stopped locally. Phase state is frozen until the next [`Event::Reset`].
    Stopped,
    Disconnected(String),
}

impl SessionState {
    /// Folds `event` into the state.
    pub fn apply(&mut self, event: Event) {
        match event {
            Event::Connected => self.connection = ConnectionStatus::Open,
            Event::Reset => {
                self.is_test_running = true;
                self.phase = PhaseState::default();
                self.result = None;
                self.error = None;
            }
            Event::Stopped => self.is_test_running = false,
            Event::Disconnected(reason) => {
                self.connection = ConnectionStatus::Disconnected(reason);
                self.is_test_running = false;
            }
            Event::Inbound(msg) => self.apply_inbound(msg),
        }
    }

    fn apply_inbound(&mut self, msg: Inbound) {
        match msg {
            // `Reset` already marked the test as running.
            Inbound::TestStarted => log::debug!("service acknowledged test start"),
            Inbound::PhaseUpdate(_) | Inbound::PhaseTransition(_) if !self.is_test_running => {
                log::debug!("ignoring phase message, no test running");
            }
            Inbound::PhaseUpdate(update) => self.phase.merge_update(update),
            Inbound::PhaseTransition(update) => self.phase.merge_transitions(update),
            Inbound::TestCompleted(result) => {
                if self.result.is_some() {
                    log::debug!("ignoring duplicate test result");
                } else {
                    log::info!(
                        "test completed in {:.2}s ({})",
                        result.total_time_seconds,
                        result.assessment.as_deref().unwrap_or("no assessment"),
                    );
                    self.result = Some(result);
                }
                self.is_test_running = false;
            }
            Inbound::Error { message } => {
                log::warn!("service reported an error: {message}");
                self.error = Some(message);
            }
            Inbound::Pong | Inbound::Unknown => {}
        }
    }

    /// Returns whether the state accepts outbound frames.
    pub fn accepts_frames(&self) -> bool {
        self.is_test_running && self.connection == ConnectionStatus::Open
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::*;

    fn result(total: f64) -> TestResult {
        TestResult {
            total_time_seconds: total,
            walk_speed_mps: Some(0.5),
            assessment: Some("normal".into()),
            extra: Map::new(),
        }
    }

    fn running() -> SessionState {
        let mut state = SessionState::default();
        state.apply(Event::Connected);
        state.apply(Event::Reset);
        state
    }

    #[test]
    fn partial_updates_preserve_fields() {
        let mut state = running();
        state.apply(Event::Inbound(Inbound::PhaseUpdate(PhaseUpdate {
            current_phase: Some(Phase::StandUp),
            phase_label: Some("Standing up".into()),
            elapsed_time: Some(0.5),
            leg_angle: Some(90.0),
            hip_height: Some(0.45),
        })));
        state.apply(Event::Inbound(Inbound::PhaseUpdate(PhaseUpdate {
            elapsed_time: Some(0.6),
            ..Default::default()
        })));

        assert_eq!(state.phase.current_phase, Some(Phase::StandUp));
        assert_eq!(state.phase.phase_label.as_deref(), Some("Standing up"));
        assert_eq!(state.phase.elapsed_time, Some(0.6));
        assert_eq!(state.phase.leg_angle, Some(90.0));
    }

    #[test]
    fn transitions_are_replaced() {
        let mut state = running();
        let first = vec![PhaseTransition {
            phase: Phase::StandUp,
            start: 0.0,
            end: None,
        }];
        let second = vec![
            PhaseTransition {
                phase: Phase::StandUp,
                start: 0.0,
                end: Some(1.0),
            },
            PhaseTransition {
                phase: Phase::WalkOut,
                start: 1.0,
                end: None,
            },
        ];
        for transitions in [first, second.clone()] {
            state.apply(Event::Inbound(Inbound::PhaseTransition(PhaseTransitionUpdate {
                transitions: Some(transitions),
                ..Default::default()
            })));
        }
        assert_eq!(state.phase.transitions, second);
        assert_eq!(state.phase.phase_start(Phase::WalkOut), Some(1.0));
        assert_eq!(state.phase.phase_at(0.5), Some(Phase::StandUp));
        assert_eq!(state.phase.phase_at(7.0), Some(Phase::WalkOut));

        // A message without a list keeps the current one.
        state.apply(Event::Inbound(Inbound::PhaseTransition(Default::default())));
        assert_eq!(state.phase.transitions, second);
    }

    #[test]
    fn completion_is_terminal() {
        let mut state = running();
        state.apply(Event::Inbound(Inbound::TestCompleted(result(10.0))));
        assert!(!state.is_test_running);
        assert!(!state.accepts_frames());
        assert_eq!(state.result, Some(result(10.0)));

        state.apply(Event::Inbound(Inbound::TestCompleted(result(12.0))));
        assert_eq!(state.result, Some(result(10.0)));
    }

    #[test]
    fn reset_clears_previous_session() {
        let mut state = running();
        state.apply(Event::Inbound(Inbound::PhaseUpdate(PhaseUpdate {
            current_phase: Some(Phase::Turn),
            ..Default::default()
        })));
        state.apply(Event::Inbound(Inbound::TestCompleted(result(9.0))));
        state.apply(Event::Inbound(Inbound::Error {
            message: "oops".into(),
        }));

        state.apply(Event::Reset);
        assert!(state.is_test_running);
        assert_eq!(state.phase, PhaseState::default());
        assert_eq!(state.result, None);
        assert_eq!(state.error, None);
    }

    #[test]
    fn stop_freezes_phase_state() {
        let mut state = running();
        state.apply(Event::Inbound(Inbound::PhaseUpdate(PhaseUpdate {
            current_phase: Some(Phase::WalkBack),
            ..Default::default()
        })));
        state.apply(Event::Stopped);
        assert!(!state.is_test_running);
        let frozen = state.phase.clone();

        state.apply(Event::Inbound(Inbound::TestStarted));
        state.apply(Event::Inbound(Inbound::PhaseUpdate(PhaseUpdate {
            current_phase: Some(Phase::SitDown),
            ..Default::default()
        })));
        state.apply(Event::Inbound(Inbound::PhaseTransition(PhaseTransitionUpdate {
            current_phase: Some(Phase::Turn),
            transitions: Some(vec![PhaseTransition {
                phase: Phase::Turn,
                start: 0.0,
                end: None,
            }]),
            ..Default::default()
        })));
        assert!(!state.is_test_running);
        assert_eq!(state.phase, frozen);
        assert_eq!(state.phase.current_phase, Some(Phase::WalkBack));
    }

    #[test]
    fn completion_freezes_phase_state() {
        let mut state = running();
        state.apply(Event::Inbound(Inbound::PhaseUpdate(PhaseUpdate {
            current_phase: Some(Phase::SitDown),
            elapsed_time: Some(11.0),
            ..Default::default()
        })));
        state.apply(Event::Inbound(Inbound::TestCompleted(result(11.5))));
        let frozen = state.phase.clone();

        state.apply(Event::Inbound(Inbound::PhaseUpdate(PhaseUpdate {
            elapsed_time: Some(12.0),
            ..Default::default()
        })));
        assert_eq!(state.phase, frozen);

        state.apply(Event::Reset);
        state.apply(Event::Inbound(Inbound::PhaseUpdate(PhaseUpdate {
            elapsed_time: Some(0.1),
            ..Default::default()
        })));
        assert_eq!(state.phase.elapsed_time, Some(0.1));
        assert_eq!(state.phase.current_phase, None);
    }

    #[test]
    fn disconnect_is_explicit() {
        let mut state = running();
        state.apply(Event::Inbound(Inbound::Pong));
        state.apply(Event::Inbound(Inbound::Unknown));
        assert!(state.accepts_frames());

        state.apply(Event::Disconnected("connection reset".into()));
        assert_eq!(
            state.connection,
            ConnectionStatus::Disconnected("connection reset".into())
        );
        assert!(!state.accepts_frames());
    }
}
